use anyhow::{Context, Result};
use serde::Deserialize;
use std::{collections::HashMap, path::Path};

use crate::usage::UsageMetrics;

/// Decimal places kept in a cost estimate.
pub const COST_PRECISION: i32 = 6;

/// Price per 1000 tokens for one provider/model pair.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct PricingEntry {
    pub input: f64,
    pub output: f64,
}

#[derive(Deserialize)]
struct PricingFile {
    models: HashMap<String, PricingEntry>,
}

/// Immutable `"{provider}:{model}"` -> price lookup.
///
/// Built once at start-up and shared read-only behind an `Arc`.
#[derive(Debug, Clone)]
pub struct PricingTable {
    entries: HashMap<String, PricingEntry>,
}

const BUILTIN: &[(&str, f64, f64)] = &[
    // OpenAI
    ("openai:gpt-4o-mini", 0.00015, 0.0006),
    ("openai:gpt-4o", 0.0025, 0.01),
    // Google Gemini
    ("google:gemini-1.5-flash", 0.000075, 0.0003),
    ("google:gemini-1.5-pro", 0.00125, 0.005),
    ("google:gemini-2.0-flash", 0.0001, 0.0004),
    ("google:gemini-2.5-flash", 0.0001, 0.0004),
    // Anthropic
    ("claude:claude-3-5-sonnet", 0.003, 0.015),
    ("claude:claude-3-7-sonnet-20250219", 0.003, 0.015),
    // Mistral
    ("mistral:mistral-large-latest", 0.002, 0.006),
    // Groq
    ("groq:llama-3.3-70b", 0.00005, 0.0001),
    ("groq:llama-3.3-70b-versatile", 0.00059, 0.00079),
    // DeepSeek
    ("deepseek:deepseek-chat", 0.00027, 0.0011),
];

impl PricingTable {
    pub fn builtin() -> Self {
        let entries = BUILTIN
            .iter()
            .map(|(key, input, output)| {
                (key.to_string(), PricingEntry { input: *input, output: *output })
            })
            .collect();
        Self { entries }
    }

    /// Built-in prices, with entries from `path` (if given) merged over them.
    ///
    /// The file has the shape `{"models": {"openai:gpt-4o": {"input": .., "output": ..}}}`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut table = Self::builtin();
        if let Some(path) = path {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read pricing file {}", path.display()))?;
            let parsed: PricingFile = serde_json::from_str(&data)
                .with_context(|| format!("Failed to parse pricing file {}", path.display()))?;
            tracing::info!(
                path = %path.display(),
                entries = parsed.models.len(),
                "Loaded pricing overrides"
            );
            table.entries.extend(parsed.models);
        }
        Ok(table)
    }

    pub fn get(&self, provider: &str, model: &str) -> Option<&PricingEntry> {
        self.entries.get(&format!("{provider}:{model}"))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 估算一次生成的费用
    ///
    /// ## 功能说明
    /// 按 `(promptTokens/1000)*input + (completionTokens/1000)*output` 计算费用，
    /// 并四舍五入到6位小数。
    ///
    /// ## 返回值
    /// 价格表中没有对应条目时返回 0，并记录警告（费用仅供参考，不影响本轮对话）
    pub fn estimate(&self, provider: &str, model: &str, usage: &UsageMetrics) -> f64 {
        let Some(price) = self.get(provider, model) else {
            tracing::warn!(provider, model, "No pricing found for {provider}:{model}");
            return 0.0;
        };

        let cost = (usage.prompt_tokens as f64 / 1000.0) * price.input
            + (usage.completion_tokens as f64 / 1000.0) * price.output;
        round_to(cost, COST_PRECISION)
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
