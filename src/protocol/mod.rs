//! Structured response protocol: the shapes a backend is instructed to emit,
//! the prompt that instructs it, and the classifier that reads the result.

pub mod prompt;
pub mod resolver;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use prompt::{assemble, PROTOCOL_INSTRUCTIONS};
pub use resolver::{parse_file_api_card, resolve};

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Role::Assistant)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message of the conversation, in conversation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChartKind {
    Pie,
    Doughnut,
    #[default]
    Bar,
    Line,
    Radar,
    PolarArea,
}

impl ChartKind {
    /// Accepts both the short names and the `-chart` suffixed names
    /// (`"bar"`, `"bar-chart"`, `"polarArea"`, `"polar-area-chart"`).
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let base = lowered.strip_suffix("-chart").unwrap_or(&lowered);
        let normalized: String = base.chars().filter(|c| *c != '-' && *c != '_').collect();
        match normalized.as_str() {
            "pie" => Some(ChartKind::Pie),
            "doughnut" => Some(ChartKind::Doughnut),
            "bar" => Some(ChartKind::Bar),
            "line" => Some(ChartKind::Line),
            "radar" => Some(ChartKind::Radar),
            "polararea" => Some(ChartKind::PolarArea),
            _ => None,
        }
    }

    /// Pie and doughnut charts carry parallel `labels` + `data` arrays;
    /// the others carry `data` as `{label, value}` objects.
    pub fn uses_parallel_arrays(&self) -> bool {
        matches!(self, ChartKind::Pie | ChartKind::Doughnut)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub label: String,
    pub value: f64,
}

impl DataPoint {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    #[serde(rename = "type")]
    pub kind: ChartKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_axis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_axis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<String>>,
    /// Normalized series; pie/doughnut labels are zipped in here.
    pub data: Vec<DataPoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileApiTable {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl FileApiTable {
    /// A table without headers or without rows has nothing to draw.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() || self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileApiChart {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub chart_data: ChartSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileApiStory {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub lines: Vec<String>,
}

/// Payload of the analytic card that can be exported as a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileApiCard {
    pub table: FileApiTable,
    pub chart: FileApiChart,
    pub story: FileApiStory,
}

/// The five output shapes a completed turn can take.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StructuredResponse {
    PlainText {
        content: String,
    },
    Table {
        content: String,
        table: TableData,
    },
    Chart {
        content: String,
        chart: ChartSpec,
    },
    AnalyticCard {
        content: String,
        title: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        table: TableData,
        chart: ChartSpec,
    },
    AnalyticCardWithFileApi(FileApiCard),
}

impl StructuredResponse {
    pub fn plain(content: impl Into<String>) -> Self {
        StructuredResponse::PlainText {
            content: content.into(),
        }
    }

    /// Short name used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StructuredResponse::PlainText { .. } => "plainText",
            StructuredResponse::Table { .. } => "table",
            StructuredResponse::Chart { .. } => "chart",
            StructuredResponse::AnalyticCard { .. } => "analyticCard",
            StructuredResponse::AnalyticCardWithFileApi(_) => "analyticCardWithFileApi",
        }
    }
}
