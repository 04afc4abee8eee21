//! 幂等守卫（IdempotencyGuard）
//!
//! Outbox 提供至少一次投递，处理器需自行去重：先查 (event_id, handler_name) 标记，
//! 未处理时执行副作用，成功后再写标记。副作用与标记之间崩溃会导致重复执行一次，
//! 因此副作用本身仍应尽量幂等（例如以 event_id 作为下游请求的幂等键）。
//!
use crate::config::{EnvSource, ProcessEnv, cutoff_before, secs_or};
use crate::domain_event::EventEnvelope;
use crate::error::DomainResult as Result;
use crate::persist::ProcessedEventStore;
use bon::Builder;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Builder)]
pub struct IdempotencyConfig {
    /// 标记保留时长，超过后可被 `prune_expired` 清理
    #[builder(default = Duration::from_secs(7 * 24 * 60 * 60))]
    pub retention: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl IdempotencyConfig {
    /// 读取 `OUTBOX_IDEMPOTENCY_RETENTION_SECS`
    pub fn from_env() -> Self {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(env: &impl EnvSource) -> Self {
        Self {
            retention: secs_or(
                env,
                "OUTBOX_IDEMPOTENCY_RETENTION_SECS",
                Self::default().retention,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// 副作用已执行并写入标记
    Applied,
    /// 已处理过，跳过
    Skipped,
}

#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn ProcessedEventStore>,
    config: IdempotencyConfig,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn ProcessedEventStore>) -> Self {
        Self::with_config(store, IdempotencyConfig::default())
    }

    pub fn with_config(store: Arc<dyn ProcessedEventStore>, config: IdempotencyConfig) -> Self {
        Self { store, config }
    }

    pub async fn is_processed(&self, event_id: &str, handler_name: &str) -> Result<bool> {
        self.store.is_processed(event_id, handler_name).await
    }

    pub async fn mark_processed(&self, event_id: &str, handler_name: &str) -> Result<()> {
        self.store.mark_processed(event_id, handler_name).await
    }

    /// 检查 → 执行 → 标记；动作失败时不写标记，错误原样返回以便重试
    pub async fn run_once<F, Fut>(
        &self,
        envelope: &EventEnvelope,
        handler_name: &str,
        action: F,
    ) -> anyhow::Result<GuardOutcome>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        let event_id = envelope.event_id();

        if self.is_processed(event_id, handler_name).await? {
            debug!(
                event_id,
                handler = handler_name,
                is_replay = envelope.is_replay(),
                "event already processed, skipping"
            );
            return Ok(GuardOutcome::Skipped);
        }

        action().await?;
        self.mark_processed(event_id, handler_name).await?;

        Ok(GuardOutcome::Applied)
    }

    /// 清理超过保留期的标记
    pub async fn prune_expired(&self) -> Result<usize> {
        let cutoff = cutoff_before(Utc::now(), self.config.retention, "retention")?;
        let pruned = self.store.prune(cutoff).await?;
        if pruned > 0 {
            info!(pruned, %cutoff, "pruned expired idempotency markers");
        }
        Ok(pruned)
    }
}
