use serde_json::{Map, Value};

use super::{
    ChartKind, ChartSpec, DataPoint, FileApiCard, FileApiChart, FileApiStory, FileApiTable,
    StructuredResponse, TableData,
};

/// 将一轮完整输出分类为五种结构之一
///
/// ## 功能说明
/// 先严格解析JSON；解析失败时返回 `PlainText`。解析成功后按以下优先级检查顶层键：
/// `analyticCardWithFileApi` → `analyticCard` → `chart` → `table`（或顶层 headers/rows）→ `PlainText`。
///
/// ## 容错机制
/// 结构不匹配（例如饼图缺少 `labels`）不是错误：回退为包含原始文本的 `PlainText`。
/// 函数是纯函数，同一输入总是得到同一结果。
pub fn resolve(full_text: &str) -> StructuredResponse {
    let Ok(Value::Object(root)) = serde_json::from_str::<Value>(full_text) else {
        return StructuredResponse::plain(full_text);
    };

    match classify(&root) {
        Some(response) => response,
        None => {
            tracing::debug!(
                "Structured output did not match its declared shape, falling back to plain text"
            );
            StructuredResponse::plain(full_text)
        }
    }
}

/// `None` means the object declared a shape but did not honor it.
fn classify(root: &Map<String, Value>) -> Option<StructuredResponse> {
    let content = string_field(root, "content").unwrap_or_default();

    if let Some(card) = root.get("analyticCardWithFileApi") {
        return file_api_card(card.as_object()?).map(StructuredResponse::AnalyticCardWithFileApi);
    }

    if let Some(card) = root.get("analyticCard") {
        let card = card.as_object()?;
        // Table and chart usually sit under `tabs`; accept them at card level too.
        let tabs = card.get("tabs").and_then(Value::as_object).unwrap_or(card);
        return Some(StructuredResponse::AnalyticCard {
            content,
            title: string_field(card, "title").unwrap_or_default(),
            description: string_field(card, "description"),
            table: table_data(tabs.get("table")?.as_object()?)?,
            chart: chart_spec(tabs.get("chart")?.as_object()?)?,
        });
    }

    if let Some(chart) = root.get("chart") {
        return Some(StructuredResponse::Chart {
            content,
            chart: chart_spec(chart.as_object()?)?,
        });
    }

    if let Some(table) = root.get("table") {
        return Some(StructuredResponse::Table {
            content,
            table: table_data(table.as_object()?)?,
        });
    }

    if root.contains_key("headers") && root.contains_key("rows") {
        return Some(StructuredResponse::Table {
            content,
            table: table_data(root)?,
        });
    }

    match root.get("content").and_then(Value::as_str) {
        Some(text) => Some(StructuredResponse::plain(text)),
        None => None,
    }
}

/// Read an exportable card, either wrapped under `analyticCardWithFileApi`
/// or given bare as `{table, chart, story}`.
pub fn parse_file_api_card(value: &Value) -> Option<FileApiCard> {
    let object = value.as_object()?;
    match object.get("analyticCardWithFileApi") {
        Some(inner) => file_api_card(inner.as_object()?),
        None => file_api_card(object),
    }
}

fn file_api_card(card: &Map<String, Value>) -> Option<FileApiCard> {
    let table = match card.get("table") {
        Some(value) => {
            let table = value.as_object()?;
            // Headers/rows are nested under `data`, or sit on the table itself.
            let data = table.get("data").and_then(Value::as_object).unwrap_or(table);
            let TableData { headers, rows } = table_data_lenient(data)?;
            FileApiTable {
                title: string_field(table, "title").unwrap_or_default(),
                description: string_field(table, "description"),
                headers,
                rows,
            }
        }
        None => FileApiTable::default(),
    };

    let chart = match card.get("chart") {
        Some(value) => {
            let chart = value.as_object()?;
            let chart_data = match chart.get("chartData") {
                Some(data) => chart_spec(data.as_object()?)?,
                None => ChartSpec::default(),
            };
            FileApiChart {
                title: string_field(chart, "title").unwrap_or_default(),
                description: string_field(chart, "description"),
                chart_data,
            }
        }
        None => FileApiChart::default(),
    };

    let story = match card.get("story") {
        Some(value) => {
            let story = value.as_object()?;
            let lines = match story.get("data").or_else(|| story.get("lines")) {
                Some(lines) => lines.as_array()?.iter().map(cell_text).collect(),
                None => Vec::new(),
            };
            FileApiStory {
                title: string_field(story, "title").unwrap_or_default(),
                description: string_field(story, "description"),
                lines,
            }
        }
        None => FileApiStory::default(),
    };

    Some(FileApiCard { table, chart, story })
}

/// Headers and rows must both be arrays; rows must be arrays of cells.
fn table_data(table: &Map<String, Value>) -> Option<TableData> {
    let headers = table.get("headers")?.as_array()?.iter().map(cell_text).collect();
    let rows = table
        .get("rows")?
        .as_array()?
        .iter()
        .map(|row| row.as_array().map(|cells| cells.iter().map(cell_text).collect()))
        .collect::<Option<Vec<Vec<String>>>>()?;
    Some(TableData { headers, rows })
}

/// Like [`table_data`], but missing headers or rows count as empty.
fn table_data_lenient(table: &Map<String, Value>) -> Option<TableData> {
    let mut table = table.clone();
    table.entry("headers").or_insert_with(|| Value::Array(Vec::new()));
    table.entry("rows").or_insert_with(|| Value::Array(Vec::new()));
    table_data(&table)
}

fn chart_spec(chart: &Map<String, Value>) -> Option<ChartSpec> {
    let kind = match chart.get("type") {
        Some(kind) => ChartKind::parse(kind.as_str()?)?,
        None => ChartKind::default(),
    };
    let raw_data = chart.get("data")?.as_array()?;

    let labels = match chart.get("labels") {
        Some(labels) => Some(labels.as_array()?.iter().map(cell_text).collect::<Vec<_>>()),
        None => None,
    };

    let data = if kind.uses_parallel_arrays() {
        let labels = labels.as_ref()?;
        if labels.len() != raw_data.len() {
            return None;
        }
        labels
            .iter()
            .zip(raw_data)
            .map(|(label, value)| Some(DataPoint::new(label.clone(), value.as_f64()?)))
            .collect::<Option<Vec<_>>>()?
    } else {
        raw_data
            .iter()
            .map(|point| {
                let point = point.as_object()?;
                Some(DataPoint::new(
                    cell_text(point.get("label")?),
                    point.get("value")?.as_f64()?,
                ))
            })
            .collect::<Option<Vec<_>>>()?
    };

    Some(ChartSpec {
        kind,
        title: string_field(chart, "title"),
        x_axis: string_field(chart, "xAxis"),
        y_axis: string_field(chart, "yAxis"),
        labels,
        data,
    })
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Cells may arrive as numbers or booleans; null renders as empty.
fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
