use insight_chat::{
    export::{self, layout_card, layout::LANDSCAPE_COLUMN_THRESHOLD, Document, DrawOp, PageSize},
    protocol::{ChartKind, ChartSpec, DataPoint, FileApiCard, FileApiChart, FileApiStory, FileApiTable},
};

const PAGE_LIMIT: f64 = 297.0 - 20.0;

fn table(rows: usize) -> FileApiTable {
    FileApiTable {
        title: "Regional Sales".to_string(),
        description: Some("Quarterly revenue by region".to_string()),
        headers: vec!["Region".to_string(), "Amount".to_string()],
        rows: (0..rows).map(|i| vec![format!("r{}", i), format!("{}", i * 10)]).collect(),
    }
}

fn chart(values: &[f64]) -> FileApiChart {
    FileApiChart {
        title: "Revenue".to_string(),
        description: None,
        chart_data: ChartSpec {
            kind: ChartKind::Bar,
            data: values
                .iter()
                .enumerate()
                .map(|(i, v)| DataPoint::new(format!("label{}", i), *v))
                .collect(),
            ..ChartSpec::default()
        },
    }
}

/// Page holding a text op that contains `needle`.
fn page_containing(document: &Document, needle: &str) -> Option<usize> {
    document
        .pages
        .iter()
        .position(|page| page.texts().any(|text| text.contains(needle)))
}

#[test]
fn test_small_card_fits_on_one_page() {
    let card = FileApiCard {
        table: table(3),
        chart: chart(&[30.0, 25.0]),
        story: FileApiStory {
            title: "Highlights".to_string(),
            description: None,
            lines: vec!["North leads the quarter.".to_string()],
        },
    };

    let document = layout_card(&card);
    assert_eq!(document.size, PageSize::A4_PORTRAIT);
    assert_eq!(document.pages.len(), 1);
    for needle in ["Regional Sales", "Region", "r2", "Revenue", "label1", "Highlights", "North leads the quarter."] {
        assert_eq!(document.page_of(needle), Some(0), "missing {}", needle);
    }
}

#[test]
fn test_all_zero_chart_draws_flat_bars() {
    let card = FileApiCard {
        chart: chart(&[0.0, 0.0, 0.0]),
        ..FileApiCard::default()
    };

    let document = layout_card(&card);
    let page = &document.pages[0];

    let bar_heights: Vec<f64> = page
        .ops
        .iter()
        .filter_map(|op| match op {
            DrawOp::Rect { height, width, .. } if *width >= 15.0 => Some(*height),
            _ => None,
        })
        .collect();
    assert_eq!(bar_heights, vec![0.0, 0.0, 0.0]);
    assert_eq!(page.texts().filter(|t| *t == "0.0").count(), 6);
}

#[test]
fn test_long_table_spans_pages_without_repeating_headers() {
    let card = FileApiCard {
        table: table(60),
        ..FileApiCard::default()
    };

    let document = layout_card(&card);
    assert!(document.pages.len() >= 3);
    assert_eq!(document.page_of("r0"), Some(0));
    assert!(document.page_of("r59").unwrap() >= 2);

    let header_count: usize = document
        .pages
        .iter()
        .map(|page| page.texts().filter(|t| *t == "Region").count())
        .sum();
    assert_eq!(header_count, 1);

    let mut last_page = 0;
    for i in 0..60 {
        let page = document.page_of(&format!("r{}", i)).unwrap();
        assert!(page >= last_page, "rows must keep their order");
        last_page = page;
    }

    for page in &document.pages {
        for op in &page.ops {
            if let DrawOp::Rect { y, height, .. } = op {
                assert!(y + height <= PAGE_LIMIT + 1e-9, "row crosses the bottom margin");
            }
        }
    }
}

#[test]
fn test_degenerate_blocks_are_omitted() {
    let card = FileApiCard {
        table: FileApiTable {
            title: "Empty Report".to_string(),
            description: None,
            headers: Vec::new(),
            rows: vec![vec!["orphan".to_string()]],
        },
        chart: chart(&[]),
        story: FileApiStory::default(),
    };

    let document = layout_card(&card);
    assert_eq!(document.pages.len(), 1);
    let texts: Vec<&str> = document.pages[0].texts().collect();
    assert_eq!(texts, vec!["Empty Report"]);
    assert!(!document.pages[0].ops.iter().any(|op| matches!(op, DrawOp::Rect { .. })));
}

#[test]
fn test_wide_tables_switch_to_landscape() {
    let wide = |columns: usize| FileApiCard {
        table: FileApiTable {
            title: "Wide".to_string(),
            description: None,
            headers: (0..columns).map(|c| format!("c{}", c)).collect(),
            rows: vec![(0..columns).map(|c| format!("v{}", c)).collect()],
        },
        ..FileApiCard::default()
    };

    assert_eq!(layout_card(&wide(LANDSCAPE_COLUMN_THRESHOLD)).size, PageSize::A4_PORTRAIT);
    assert_eq!(layout_card(&wide(LANDSCAPE_COLUMN_THRESHOLD + 1)).size, PageSize::A4_LANDSCAPE);
}

#[test]
fn test_chart_is_never_split_across_pages() {
    // Enough rows to leave the cursor close to the bottom of a page.
    for rows in [10, 14, 18, 22, 26, 30] {
        let card = FileApiCard {
            table: table(rows),
            chart: chart(&[5.0, 12.0, 7.0, 3.0, 9.0, 11.0]),
            ..FileApiCard::default()
        };

        let document = layout_card(&card);
        let title_page = document.page_of("Revenue").unwrap();
        for i in 0..6 {
            assert_eq!(
                document.page_of(&format!("label{}", i)),
                Some(title_page),
                "chart split with {} rows",
                rows
            );
        }
        for label in ["0.0", "12.0"] {
            assert_eq!(document.page_of(label), Some(title_page));
        }
    }
}

#[test]
fn test_story_lines_move_whole_to_next_page() {
    let filler = "word ".repeat(40);
    let lines: Vec<String> = (0..30).map(|i| format!("start{} {}end{}.", i, filler, i)).collect();
    let card = FileApiCard {
        story: FileApiStory {
            title: String::new(),
            description: Some("Observations".to_string()),
            lines,
        },
        ..FileApiCard::default()
    };

    let document = layout_card(&card);
    assert!(document.pages.len() > 1);
    assert_eq!(document.page_of("Insights"), Some(0));

    for i in 0..30 {
        let first = page_containing(&document, &format!("start{} ", i)).unwrap();
        let last = page_containing(&document, &format!("end{}.", i)).unwrap();
        assert_eq!(first, last, "story line {} was split", i);
    }

    for page in &document.pages {
        for op in &page.ops {
            if let DrawOp::Text { y, .. } = op {
                assert!(*y <= PAGE_LIMIT + 1e-9);
            }
        }
    }
}

/// Lowest point reached by any op on any page.
fn max_bottom(document: &Document) -> f64 {
    document
        .pages
        .iter()
        .flat_map(|page| page.ops.iter())
        .map(|op| match op {
            DrawOp::Rect { y, height, .. } => y + height,
            DrawOp::Text { y, .. } => *y,
            DrawOp::Line { y1, y2, .. } => y1.max(*y2),
        })
        .fold(0.0, f64::max)
}

#[test]
fn test_large_series_legend_continues_on_next_page() {
    let values: Vec<f64> = (0..200).map(|i| (i % 17) as f64).collect();
    let card = FileApiCard {
        chart: chart(&values),
        ..FileApiCard::default()
    };

    let document = layout_card(&card);
    assert!(document.pages.len() > 1);
    assert!(max_bottom(&document) <= PAGE_LIMIT + 1e-9);

    for i in 0..200 {
        assert!(document.page_of(&format!("label{}", i)).is_some(), "label{} lost", i);
    }
    assert_eq!(document.page_of("Revenue"), document.page_of("16.0"));
    assert!(document.page_of("label199").unwrap() > document.page_of("label0").unwrap());
}

#[test]
fn test_long_title_breaks_across_pages() {
    let card = FileApiCard {
        table: FileApiTable {
            title: "quarterly ".repeat(600),
            ..FileApiTable::default()
        },
        ..FileApiCard::default()
    };

    let document = layout_card(&card);
    assert!(document.pages.len() > 1);
    assert!(max_bottom(&document) <= PAGE_LIMIT + 1e-9);
}

#[test]
fn test_layout_is_deterministic() {
    let card = FileApiCard {
        table: table(25),
        chart: chart(&[1.5, 2.5, 4.0]),
        ..FileApiCard::default()
    };
    assert_eq!(layout_card(&card), layout_card(&card));
}

#[test]
fn test_export_pdf_bytes_and_name() {
    let card = FileApiCard {
        table: table(40),
        chart: chart(&[3.0, 4.0]),
        ..FileApiCard::default()
    };

    let file = export::export_pdf(&card);
    assert_eq!(file.file_name, "Regional_Sales.pdf");
    assert_eq!(file.content_type, export::PDF_CONTENT_TYPE);
    assert!(file.bytes.starts_with(b"%PDF-1.4"));

    let text = String::from_utf8_lossy(&file.bytes);
    let pages = layout_card(&card).pages.len();
    assert!(text.contains(&format!("/Count {}", pages)));
    assert!(text.contains("/BaseFont /Helvetica-Bold"));
    assert!(text.contains("(Regional Sales) Tj"));
    assert!(text.trim_end().ends_with("%%EOF"));
}
