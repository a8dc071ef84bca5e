use serde::{Deserialize, Serialize};

use crate::store::StoredMessage;

/// Token counts reported by a backend once generation has finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl UsageMetrics {
    /// Build usage from prompt/completion counts; the total is their sum,
    /// saturating at `u64::MAX`.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Build usage from a backend that reports its own total.
    ///
    /// A reported total of zero is treated as missing and recomputed.
    pub fn with_total(prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) -> Self {
        let total_tokens = if total_tokens == 0 {
            prompt_tokens.saturating_add(completion_tokens)
        } else {
            total_tokens
        };
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }
}

/// Running totals over a chat's assistant messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
    pub count: u64,
    pub cost: f64,
}

impl UsageTotals {
    /// Sum usage over assistant messages only; other roles are skipped.
    pub fn from_messages(messages: &[StoredMessage]) -> Self {
        messages
            .iter()
            .filter(|m| m.role.is_assistant())
            .fold(Self::default(), |mut acc, m| {
                if let Some(usage) = m.usage {
                    acc.prompt = acc.prompt.saturating_add(usage.prompt_tokens);
                    acc.completion = acc.completion.saturating_add(usage.completion_tokens);
                    acc.total = acc.total.saturating_add(usage.total_tokens);
                }
                acc.cost += m.cost.unwrap_or(0.0);
                acc.count += 1;
                acc
            })
    }
}
