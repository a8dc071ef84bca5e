//! Page layout for exported analytic cards.
//!
//! All geometry is in millimetres with the origin at the top-left corner of
//! the page and `y` growing downwards. Text positions are baselines.

use crate::protocol::FileApiCard;

use super::font::wrap_text;

pub const TOP_MARGIN: f64 = 20.0;
pub const BOTTOM_MARGIN: f64 = 20.0;
pub const SIDE_MARGIN: f64 = 20.0;

const TITLE_SIZE: f64 = 24.0;
const TITLE_LINE_HEIGHT: f64 = 10.0;
const TITLE_GAP: f64 = 35.0;
const BODY_SIZE: f64 = 11.0;
const BODY_LINE_HEIGHT: f64 = 6.0;

/// Space the table needs below the cursor before it starts on this page.
const TABLE_MIN_SPACE: f64 = 50.0;
const TABLE_BODY_SIZE: f64 = 10.0;
const TABLE_HEAD_SIZE: f64 = 11.0;
const CELL_PADDING: f64 = 3.0;
const CELL_LINE_HEIGHT: f64 = 4.5;

const CHART_MARGIN: f64 = 25.0;
pub const CHART_HEIGHT: f64 = 70.0;
const CHART_TITLE_SIZE: f64 = 16.0;
const CHART_DESC_SIZE: f64 = 10.0;
const CHART_DESC_LINE_HEIGHT: f64 = 5.0;
pub const BAR_GAP: f64 = 5.0;
pub const MIN_BAR_WIDTH: f64 = 15.0;
const GRIDLINES: usize = 5;
const LEGEND_OFFSET: f64 = 12.0;
const LEGEND_SPACING: f64 = 40.0;
const LEGEND_ITEM_WIDTH: f64 = 50.0;
const LEGEND_ROW_HEIGHT: f64 = 8.0;
const LEGEND_SWATCH: f64 = 6.0;

const STORY_BAND_HEIGHT: f64 = 10.0;
const STORY_LINE_GAP: f64 = 3.0;

/// Landscape is used for tables wider than this many columns.
pub const LANDSCAPE_COLUMN_THRESHOLD: usize = 8;

pub const PALETTE: [Color; 7] = [
    Color(100, 150, 255),
    Color(255, 99, 132),
    Color(75, 192, 192),
    Color(255, 206, 86),
    Color(153, 102, 255),
    Color(255, 159, 64),
    Color(60, 179, 113),
];

const BLACK: Color = Color(0, 0, 0);
const WHITE: Color = Color(255, 255, 255);
const HEADER_FILL: Color = Color(60, 60, 60);
const STRIPE_FILL: Color = Color(245, 245, 245);
const GRID_COLOR: Color = Color(200, 200, 200);
const BORDER_COLOR: Color = Color(220, 220, 220);
const BODY_TEXT: Color = Color(33, 37, 41);
const STORY_TEXT: Color = Color(59, 59, 59);
const AXIS_TEXT: Color = Color(80, 80, 80);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub u8, pub u8, pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

/// One drawing instruction on a page.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Text {
        x: f64,
        y: f64,
        text: String,
        size: f64,
        bold: bool,
        color: Color,
        align: Align,
    },
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        fill: Option<Color>,
        stroke: Option<Color>,
    },
    Line {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        color: Color,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

impl PageSize {
    pub const A4_PORTRAIT: PageSize = PageSize { width: 210.0, height: 297.0 };
    pub const A4_LANDSCAPE: PageSize = PageSize { width: 297.0, height: 210.0 };
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub ops: Vec<DrawOp>,
}

impl Page {
    /// Text drawn on this page, in drawing order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// A laid-out document, ready to be rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub size: PageSize,
    pub pages: Vec<Page>,
}

impl Document {
    /// Index of the first page whose text contains an exact `needle` string.
    pub fn page_of(&self, needle: &str) -> Option<usize> {
        self.pages
            .iter()
            .position(|page| page.texts().any(|text| text == needle))
    }
}

/// Running vertical position and page index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageCursor {
    pub y: f64,
    pub page_index: usize,
}

/// Geometry of one bar, relative to the page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarGeometry {
    pub x: f64,
    pub width: f64,
    pub height: f64,
}

/// 计算柱状图几何
///
/// ## 功能说明
/// 可用宽度在柱之间平均分配，柱间距固定为 [`BAR_GAP`]；平均宽度小于
/// [`MIN_BAR_WIDTH`] 时使用最小宽度并重新计算间距；连最小宽度都放不下时，
/// 柱子无间距地平分宽度。
///
/// 柱高 = 值 / 最大值 × 图高；最大值不为正时所有柱高为零，负值按零处理。
pub fn bar_layout(
    values: &[f64],
    chart_x: f64,
    chart_width: f64,
    chart_height: f64,
) -> Vec<BarGeometry> {
    let count = values.len();
    if count == 0 {
        return Vec::new();
    }

    let n = count as f64;
    let (width, gap) = if count == 1 {
        (chart_width, 0.0)
    } else {
        let even = (chart_width - (n - 1.0) * BAR_GAP) / n;
        if even >= MIN_BAR_WIDTH {
            (even, BAR_GAP)
        } else {
            let gap = (chart_width - MIN_BAR_WIDTH * n) / (n - 1.0);
            if gap >= 0.0 {
                (MIN_BAR_WIDTH, gap)
            } else {
                (chart_width / n, 0.0)
            }
        }
    };

    let max = series_max(values);
    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            let height = if max > 0.0 && value.is_finite() {
                value.clamp(0.0, max) / max * chart_height
            } else {
                0.0
            };
            BarGeometry {
                x: chart_x + index as f64 * (width + gap),
                width,
                height,
            }
        })
        .collect()
}

/// Largest finite value of the series, or 0 when there is none.
pub fn series_max(values: &[f64]) -> f64 {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max)
        .max(0.0)
}

/// Gridline labels from the baseline up: `(max / 5) * i` with one decimal.
pub fn gridline_labels(max: f64) -> Vec<String> {
    (0..=GRIDLINES)
        .map(|i| format!("{:.1}", max / GRIDLINES as f64 * i as f64))
        .collect()
}

/// Legend item positions `(x, y)`; a new row starts when the next item
/// would not fit in the chart width.
pub fn legend_layout(
    count: usize,
    chart_x: f64,
    chart_width: f64,
    first_row_y: f64,
) -> Vec<(f64, f64)> {
    let mut x = chart_x;
    let mut y = first_row_y;
    let mut positions = Vec::with_capacity(count);
    for index in 0..count {
        if index > 0 && x + LEGEND_ITEM_WIDTH > chart_x + chart_width {
            x = chart_x;
            y += LEGEND_ROW_HEIGHT;
        }
        positions.push((x, y));
        x += LEGEND_SPACING;
    }
    positions
}

/// Title shown on the first page and used for the file name.
pub fn document_title(card: &FileApiCard) -> &str {
    let title = card.table.title.trim();
    if title.is_empty() { "Untitled" } else { title }
}

/// Values printed above bars: integers without a fraction.
fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

struct Layout {
    size: PageSize,
    pages: Vec<Page>,
    cursor: PageCursor,
}

impl Layout {
    fn new(size: PageSize) -> Self {
        Self {
            size,
            pages: vec![Page::default()],
            cursor: PageCursor {
                y: TOP_MARGIN,
                page_index: 0,
            },
        }
    }

    fn limit(&self) -> f64 {
        self.size.height - BOTTOM_MARGIN
    }

    fn printable_width(&self) -> f64 {
        self.size.width - 2.0 * SIDE_MARGIN
    }

    fn at_top(&self) -> bool {
        self.cursor.y <= TOP_MARGIN
    }

    fn page_break(&mut self) {
        self.pages.push(Page::default());
        self.cursor = PageCursor {
            y: TOP_MARGIN,
            page_index: self.cursor.page_index + 1,
        };
    }

    /// Break unless `height` more fits on the current page.
    fn ensure_space(&mut self, height: f64) {
        if !self.at_top() && self.cursor.y + height > self.limit() {
            self.page_break();
        }
    }

    fn push(&mut self, op: DrawOp) {
        self.pages[self.cursor.page_index].ops.push(op);
    }

    #[allow(clippy::too_many_arguments)]
    fn text(
        &mut self,
        x: f64,
        y: f64,
        text: impl Into<String>,
        size: f64,
        bold: bool,
        color: Color,
        align: Align,
    ) {
        self.push(DrawOp::Text {
            x,
            y,
            text: text.into(),
            size,
            bold,
            color,
            align,
        });
    }

    /// Wrapped paragraph at the left margin; breaks between lines as needed.
    fn paragraph(&mut self, text: &str, size: f64, line_height: f64, color: Color) -> usize {
        let lines = wrap_text(text, self.printable_width(), size, false);
        for line in &lines {
            if !self.at_top() && self.cursor.y > self.limit() {
                self.page_break();
            }
            let y = self.cursor.y;
            self.text(SIDE_MARGIN, y, line.clone(), size, false, color, Align::Left);
            self.cursor.y += line_height;
        }
        lines.len()
    }

    fn into_document(self) -> Document {
        Document {
            size: self.size,
            pages: self.pages,
        }
    }
}

/// 将可导出的分析卡片排版为分页文档
///
/// ## 排版顺序
/// 1. 标题与描述（始终存在）
/// 2. 表格：表头与数据行都非空时输出；剩余空间不足时先换页；放不下的行整体移到下一页，表头不重复
/// 3. 图表：数据非空时输出；整个图表块放不下时先换页，图表从不跨页
/// 4. 叙述：标题栏、描述和逐行文本；每行放不下时整体移到下一页
///
/// 纯函数：相同输入得到相同的几何结果
pub fn layout_card(card: &FileApiCard) -> Document {
    let size = if card.table.headers.len() > LANDSCAPE_COLUMN_THRESHOLD {
        PageSize::A4_LANDSCAPE
    } else {
        PageSize::A4_PORTRAIT
    };

    let mut layout = Layout::new(size);
    title_block(&mut layout, card);
    table_block(&mut layout, card);
    chart_block(&mut layout, card);
    story_block(&mut layout, card);
    layout.into_document()
}

fn title_block(layout: &mut Layout, card: &FileApiCard) {
    let center = layout.size.width / 2.0;
    let lines = wrap_text(document_title(card), layout.printable_width(), TITLE_SIZE, true);
    for line in lines {
        if !layout.at_top() && layout.cursor.y > layout.limit() {
            layout.page_break();
        }
        let y = layout.cursor.y;
        layout.text(center, y, line, TITLE_SIZE, true, BLACK, Align::Center);
        layout.cursor.y += TITLE_LINE_HEIGHT;
    }
    // The gap is measured from the last title baseline.
    layout.cursor.y += TITLE_GAP - TITLE_LINE_HEIGHT;

    if let Some(description) = card.table.description.as_deref() {
        if layout.paragraph(description, BODY_SIZE, BODY_LINE_HEIGHT, BODY_TEXT) > 0 {
            layout.cursor.y += 5.0;
        }
    }
}

fn table_block(layout: &mut Layout, card: &FileApiCard) {
    let table = &card.table;
    if table.is_empty() {
        return;
    }

    if layout.cursor.y > layout.limit() - TABLE_MIN_SPACE {
        layout.page_break();
    }

    let columns = table.headers.len();
    let column_width = layout.printable_width() / columns as f64;
    let text_width = (column_width - 2.0 * CELL_PADDING).max(1.0);

    let wrap_row = |cells: &[String], size: f64, bold: bool| -> Vec<Vec<String>> {
        (0..columns)
            .map(|c| {
                let cell = cells.get(c).map(String::as_str).unwrap_or("");
                wrap_text(cell, text_width, size, bold)
            })
            .collect()
    };
    let row_height = |wrapped: &[Vec<String>]| -> f64 {
        let lines = wrapped.iter().map(Vec::len).max().unwrap_or(0).max(1);
        lines as f64 * CELL_LINE_HEIGHT + 2.0 * CELL_PADDING
    };

    let header = wrap_row(&table.headers, TABLE_HEAD_SIZE, true);
    let header_height = row_height(&header);
    draw_row(
        layout,
        &header,
        column_width,
        header_height,
        TABLE_HEAD_SIZE,
        true,
        Some(HEADER_FILL),
        WHITE,
    );

    for (index, row) in table.rows.iter().enumerate() {
        let wrapped = wrap_row(row, TABLE_BODY_SIZE, false);
        let height = row_height(&wrapped);
        layout.ensure_space(height);
        let fill = if index % 2 == 1 { Some(STRIPE_FILL) } else { None };
        draw_row(
            layout,
            &wrapped,
            column_width,
            height,
            TABLE_BODY_SIZE,
            false,
            fill,
            BODY_TEXT,
        );
    }

    layout.cursor.y += 10.0;
}

#[allow(clippy::too_many_arguments)]
fn draw_row(
    layout: &mut Layout,
    cells: &[Vec<String>],
    column_width: f64,
    height: f64,
    size: f64,
    bold: bool,
    fill: Option<Color>,
    color: Color,
) {
    let top = layout.cursor.y;
    for (column, lines) in cells.iter().enumerate() {
        let x = SIDE_MARGIN + column as f64 * column_width;
        layout.push(DrawOp::Rect {
            x,
            y: top,
            width: column_width,
            height,
            fill,
            stroke: Some(BORDER_COLOR),
        });
        for (index, line) in lines.iter().enumerate() {
            let baseline = top + CELL_PADDING + (index as f64 + 0.8) * CELL_LINE_HEIGHT;
            layout.text(x + CELL_PADDING, baseline, line.clone(), size, bold, color, Align::Left);
        }
    }
    layout.cursor.y = top + height;
}

fn chart_block(layout: &mut Layout, card: &FileApiCard) {
    let chart = &card.chart;
    let data = &chart.chart_data.data;
    if data.is_empty() {
        return;
    }

    let chart_x = CHART_MARGIN;
    let chart_width = layout.size.width - 2.0 * CHART_MARGIN;

    let description = chart
        .description
        .as_deref()
        .map(|d| wrap_text(d, layout.printable_width(), CHART_DESC_SIZE, false))
        .unwrap_or_default();
    let description_height = if description.is_empty() {
        0.0
    } else {
        description.len() as f64 * CHART_DESC_LINE_HEIGHT + 5.0
    };

    // Legend rows depend only on the item count and chart width.
    let legend = legend_layout(data.len(), chart_x, chart_width, 0.0);
    let legend_extent = legend.last().map(|(_, y)| *y).unwrap_or(0.0) + LEGEND_SWATCH;
    let block_height =
        8.0 + description_height + 10.0 + CHART_HEIGHT + LEGEND_OFFSET + legend_extent;
    layout.ensure_space(block_height);

    let title = if chart.title.trim().is_empty() { "Chart" } else { chart.title.as_str() };
    let y = layout.cursor.y;
    layout.text(SIDE_MARGIN, y, title, CHART_TITLE_SIZE, true, BLACK, Align::Left);
    layout.cursor.y += 8.0;

    for line in description {
        if !layout.at_top() && layout.cursor.y > layout.limit() {
            layout.page_break();
        }
        let y = layout.cursor.y;
        layout.text(SIDE_MARGIN, y, line, CHART_DESC_SIZE, false, BODY_TEXT, Align::Left);
        layout.cursor.y += CHART_DESC_LINE_HEIGHT;
    }
    if description_height > 0.0 {
        layout.cursor.y += 5.0;
    }
    // Plot area and the first legend row stay together.
    layout.ensure_space(10.0 + CHART_HEIGHT + LEGEND_OFFSET + LEGEND_SWATCH);

    let chart_top = layout.cursor.y + 10.0;
    let baseline = chart_top + CHART_HEIGHT;
    let values: Vec<f64> = data.iter().map(|point| point.value).collect();
    let max = series_max(&values);

    for (i, label) in gridline_labels(max).into_iter().enumerate() {
        let y = baseline - i as f64 / GRIDLINES as f64 * CHART_HEIGHT;
        layout.push(DrawOp::Line {
            x1: chart_x,
            y1: y,
            x2: chart_x + chart_width,
            y2: y,
            color: GRID_COLOR,
        });
        layout.text(chart_x - 5.0, y + 2.0, label, 8.0, false, AXIS_TEXT, Align::Right);
    }

    let bars = bar_layout(&values, chart_x, chart_width, CHART_HEIGHT);
    for (index, (bar, point)) in bars.iter().zip(data).enumerate() {
        let top = baseline - bar.height;
        layout.push(DrawOp::Rect {
            x: bar.x,
            y: top,
            width: bar.width,
            height: bar.height,
            fill: Some(PALETTE[index % PALETTE.len()]),
            stroke: None,
        });
        layout.text(
            bar.x + bar.width / 2.0,
            top - 2.0,
            format_value(point.value),
            9.0,
            false,
            BLACK,
            Align::Center,
        );
    }

    // Rows that would cross the bottom margin continue at the top of the next
    // page; only a legend taller than a page ever gets here.
    let first_row = baseline + LEGEND_OFFSET;
    let half_swatch = LEGEND_SWATCH / 2.0;
    let mut shift = 0.0;
    let mut last_row = first_row;
    for (index, ((x, dy), point)) in legend.iter().zip(data).enumerate() {
        let mut y = first_row + dy - shift;
        if y + half_swatch > layout.limit() {
            layout.page_break();
            shift = first_row + dy - (TOP_MARGIN + half_swatch);
            y = TOP_MARGIN + half_swatch;
        }
        layout.push(DrawOp::Rect {
            x: *x,
            y: y - half_swatch,
            width: LEGEND_SWATCH,
            height: LEGEND_SWATCH,
            fill: Some(PALETTE[index % PALETTE.len()]),
            stroke: None,
        });
        layout.text(x + 8.0, y + 2.0, point.label.clone(), 9.0, false, BLACK, Align::Left);
        last_row = y;
    }

    layout.cursor.y = last_row + 20.0;
}

fn story_block(layout: &mut Layout, card: &FileApiCard) {
    let story = &card.story;
    if story.lines.is_empty() {
        return;
    }

    layout.ensure_space(STORY_BAND_HEIGHT);
    let y = layout.cursor.y;
    let width = layout.printable_width();
    layout.push(DrawOp::Rect {
        x: SIDE_MARGIN,
        y,
        width,
        height: STORY_BAND_HEIGHT,
        fill: Some(HEADER_FILL),
        stroke: None,
    });
    let title = if story.title.trim().is_empty() { "Insights" } else { story.title.as_str() };
    layout.text(SIDE_MARGIN + 5.0, y + 7.0, title, 13.0, true, WHITE, Align::Left);
    layout.cursor.y += 18.0;

    if let Some(description) = story.description.as_deref() {
        if layout.paragraph(description, BODY_SIZE, BODY_LINE_HEIGHT, BODY_TEXT) > 0 {
            layout.cursor.y += 5.0;
        }
    }

    for line in &story.lines {
        let wrapped = wrap_text(line, width, BODY_SIZE, false);
        if wrapped.is_empty() {
            continue;
        }
        // The last baseline of the line must stay above the bottom margin.
        let extent = (wrapped.len() - 1) as f64 * BODY_LINE_HEIGHT;
        if !layout.at_top() && layout.cursor.y + extent > layout.limit() {
            layout.page_break();
        }
        for (index, text) in wrapped.iter().enumerate() {
            let y = layout.cursor.y + index as f64 * BODY_LINE_HEIGHT;
            layout.text(SIDE_MARGIN, y, text.clone(), BODY_SIZE, false, STORY_TEXT, Align::Left);
        }
        layout.cursor.y += wrapped.len() as f64 * BODY_LINE_HEIGHT + STORY_LINE_GAP;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bars_share_width_with_fixed_gap() {
        let bars = bar_layout(&[30.0, 25.0], 25.0, 160.0, 70.0);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].width, 77.5);
        assert_eq!(bars[1].x, 25.0 + 77.5 + BAR_GAP);
        assert_eq!(bars[0].height, 70.0);
        assert!((bars[1].height - 25.0 / 30.0 * 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_bars_fall_back_to_minimum_width() {
        // Even split would be below the minimum: gap is recomputed.
        let bars = bar_layout(&[1.0; 10], 0.0, 160.0, 70.0);
        assert_eq!(bars[0].width, MIN_BAR_WIDTH);
        let gap = (160.0 - MIN_BAR_WIDTH * 10.0) / 9.0;
        assert!((bars[1].x - (MIN_BAR_WIDTH + gap)).abs() < 1e-9);

        // Not even the minimum fits: zero gap, bars stay inside the chart.
        let bars = bar_layout(&[1.0; 20], 0.0, 160.0, 70.0);
        assert_eq!(bars[0].width, 8.0);
        let last = bars.last().unwrap();
        assert!((last.x + last.width - 160.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_bar_and_degenerate_values() {
        let bars = bar_layout(&[5.0], 10.0, 100.0, 70.0);
        assert_eq!(bars, vec![BarGeometry { x: 10.0, width: 100.0, height: 70.0 }]);

        let bars = bar_layout(&[0.0, 0.0, 0.0], 0.0, 160.0, 70.0);
        assert!(bars.iter().all(|b| b.height == 0.0));

        let bars = bar_layout(&[-4.0, 8.0], 0.0, 160.0, 70.0);
        assert_eq!(bars[0].height, 0.0);
        assert_eq!(bars[1].height, 70.0);
    }

    #[test]
    fn test_gridline_labels() {
        assert_eq!(gridline_labels(50.0), vec!["0.0", "10.0", "20.0", "30.0", "40.0", "50.0"]);
        assert_eq!(gridline_labels(0.0), vec!["0.0"; 6]);
    }

    #[test]
    fn test_legend_wraps_rows() {
        let positions = legend_layout(5, 25.0, 160.0, 100.0);
        assert_eq!(positions[0], (25.0, 100.0));
        assert_eq!(positions[2], (105.0, 100.0));
        // 145 + 50 runs past 185: the fourth item starts a new row
        assert_eq!(positions[3], (25.0, 108.0));
        assert_eq!(positions[4], (65.0, 108.0));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(30.0), "30");
        assert_eq!(format_value(2.5), "2.5");
    }
}
