use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;

use crate::streaming::Outcome;
use crate::usage::UsageMetrics;

/// 生成指标收集器
///
/// 统计每个提供商的生成次数、结果、token用量和估算费用，
/// 以及当前进行中的流式生成数量
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// 已开始的生成总数
    generations_started: Arc<AtomicU64>,
    /// 当前进行中的生成数
    active_generations: Arc<AtomicU64>,
    /// 按提供商分组的指标
    provider_metrics: Arc<RwLock<HashMap<String, ProviderMetrics>>>,
    /// 系统启动时间
    start_time: Instant,
}

/// 单个提供商的生成指标
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderMetrics {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    /// 平均生成时长（毫秒），按结束的生成计算
    pub avg_duration_ms: f64,
    pub last_generation_time: Option<String>,
}

/// 指标摘要
#[derive(Debug, Serialize)]
pub struct MetricsSummary {
    pub uptime_seconds: u64,
    pub generations_started: u64,
    pub active_generations: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub providers: HashMap<String, ProviderMetrics>,
    pub timestamp: String,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            generations_started: Arc::new(AtomicU64::new(0)),
            active_generations: Arc::new(AtomicU64::new(0)),
            provider_metrics: Arc::new(RwLock::new(HashMap::new())),
            start_time: Instant::now(),
        }
    }

    /// 记录生成开始
    ///
    /// ## 返回值
    /// - `Instant`: 开始时间，传给 [`MetricsCollector::record_generation_end`] 计算时长
    pub async fn record_generation_start(&self, provider: &str) -> Instant {
        self.generations_started.fetch_add(1, Ordering::Relaxed);
        self.active_generations.fetch_add(1, Ordering::Relaxed);

        let mut providers = self.provider_metrics.write().await;
        providers.entry(provider.to_string()).or_default().started += 1;

        Instant::now()
    }

    /// 记录生成结束
    ///
    /// ## 功能说明
    /// 按结果更新完成/失败/取消计数，累加token用量与费用，并更新平均时长
    pub async fn record_generation_end(
        &self,
        start_time: Instant,
        provider: &str,
        outcome: &Outcome,
        usage: Option<&UsageMetrics>,
        cost_usd: f64,
    ) {
        let duration_ms = start_time.elapsed().as_millis() as f64;
        self.active_generations.fetch_sub(1, Ordering::Relaxed);

        let mut providers = self.provider_metrics.write().await;
        let metrics = providers.entry(provider.to_string()).or_default();
        match outcome {
            Outcome::Completed => metrics.completed += 1,
            Outcome::Failed(_) => metrics.failed += 1,
            Outcome::Cancelled => metrics.cancelled += 1,
        }

        if let Some(usage) = usage {
            metrics.prompt_tokens = metrics.prompt_tokens.saturating_add(usage.prompt_tokens);
            metrics.completion_tokens = metrics
                .completion_tokens
                .saturating_add(usage.completion_tokens);
            metrics.total_tokens = metrics.total_tokens.saturating_add(usage.total_tokens);
        }
        metrics.cost_usd += cost_usd;

        let finished = metrics.completed + metrics.failed + metrics.cancelled;
        metrics.avg_duration_ms =
            (metrics.avg_duration_ms * (finished - 1) as f64 + duration_ms) / finished as f64;
        metrics.last_generation_time = Some(chrono::Utc::now().to_rfc3339());
    }

    pub fn active_generations(&self) -> u64 {
        self.active_generations.load(Ordering::Relaxed)
    }

    /// 获取指标摘要
    pub async fn get_metrics_summary(&self) -> MetricsSummary {
        let providers = self.provider_metrics.read().await.clone();
        let total_tokens = providers
            .values()
            .fold(0u64, |acc, m| acc.saturating_add(m.total_tokens));
        let total_cost_usd = providers.values().map(|m| m.cost_usd).sum();

        MetricsSummary {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            generations_started: self.generations_started.load(Ordering::Relaxed),
            active_generations: self.active_generations(),
            total_tokens,
            total_cost_usd,
            providers,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
