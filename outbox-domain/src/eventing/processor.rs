//! Outbox 处理器（OutboxProcessor）
//!
//! 周期驱动：认领一批 PENDING 记录 → 构建信封 → 模式校验 → 经总线分发 → 回写状态。
//! - 模式错误：`mark_rejected`，直接进入 FAILED，不重试；
//! - 任一处理器失败：`mark_failed`，未达上限回到 PENDING，否则进入 FAILED；
//! - 同一聚合在本批次中已有记录未完成时，其后续记录 `release` 回 PENDING，保证按创建顺序完成；
//! - 存储错误只记录告警，记录留在 PROCESSING 由回收扫描处理。
//!
//! 多个实例只通过存储的原子认领协调。每条记录分发前先以认领令牌 `touch` 一次：
//! 刷新 `claimed_at`，同时确认记录没有在本批次等待期间被回收转交。
//! 因此 `processing_timeout` 只需覆盖单次分发的最坏耗时，`start` 会据此校验。
//!
use super::bus::EventBus;
use super::reclaimer::{OutboxReclaimer, SweepReport};
use super::scheduler::{PeriodicTask, Scheduler};
use crate::config::{EnvSource, ProcessEnv, parse_or, secs_or};
use crate::domain_event::EventEnvelope;
use crate::error::{DomainError, DomainResult as Result};
use crate::persist::{OutboxRecord, OutboxStatus, OutboxStore};
use crate::schema::SchemaRegistry;
use async_trait::async_trait;
use bon::Builder;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// `processing_timeout` 的上限
pub const MAX_PROCESSING_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// 处理器配置
#[derive(Debug, Clone, Builder)]
pub struct ProcessorConfig {
    /// 轮询间隔（同时决定重试间隔）
    #[builder(default = Duration::from_secs(5))]
    pub poll_interval: Duration,
    /// 回收扫描间隔
    #[builder(default = Duration::from_secs(60))]
    pub sweep_interval: Duration,
    #[builder(default = 50)]
    pub batch_size: usize,
    #[builder(default = 3)]
    pub max_attempts: u32,
    /// PROCESSING 超过该时长视为卡死
    #[builder(default = Duration::from_secs(5 * 60))]
    pub processing_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ProcessorConfig {
    /// 读取 `OUTBOX_POLL_INTERVAL_SECS`、`OUTBOX_SWEEP_INTERVAL_SECS`、`OUTBOX_BATCH_SIZE`、
    /// `OUTBOX_MAX_ATTEMPTS`、`OUTBOX_PROCESSING_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(env: &impl EnvSource) -> Self {
        let default = Self::default();
        Self {
            poll_interval: secs_or(env, "OUTBOX_POLL_INTERVAL_SECS", default.poll_interval),
            sweep_interval: secs_or(env, "OUTBOX_SWEEP_INTERVAL_SECS", default.sweep_interval),
            batch_size: parse_or(env, "OUTBOX_BATCH_SIZE", default.batch_size),
            max_attempts: parse_or(env, "OUTBOX_MAX_ATTEMPTS", default.max_attempts),
            processing_timeout: secs_or(
                env,
                "OUTBOX_PROCESSING_TIMEOUT_SECS",
                default.processing_timeout,
            ),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(DomainError::invalid_value("batch_size must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(DomainError::invalid_value("max_attempts must be positive"));
        }
        if self.poll_interval.is_zero() || self.sweep_interval.is_zero() {
            return Err(DomainError::invalid_value("intervals must be positive"));
        }
        if self.processing_timeout.is_zero() {
            return Err(DomainError::invalid_value(
                "processing_timeout must be positive",
            ));
        }
        if self.processing_timeout > MAX_PROCESSING_TIMEOUT {
            return Err(DomainError::invalid_value(format!(
                "processing_timeout must not exceed {}s",
                MAX_PROCESSING_TIMEOUT.as_secs()
            )));
        }
        Ok(())
    }

    /// 回收扫描不得抢走仍在分发中的记录：`processing_timeout` 至少是单次分发上界的两倍
    pub fn check_dispatch_budget(&self, budget: Option<Duration>) -> Result<()> {
        let Some(budget) = budget else {
            return Ok(());
        };
        let required = budget.saturating_mul(2);
        if self.processing_timeout < required {
            return Err(DomainError::invalid_value(format!(
                "processing_timeout {}ms must be at least twice the dispatch budget of {}ms",
                self.processing_timeout.as_millis(),
                budget.as_millis()
            )));
        }
        Ok(())
    }
}

/// 单次轮询的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub claimed: usize,
    pub completed: usize,
    /// 失败但未达上限，已回到 PENDING
    pub retried: usize,
    /// 达到上限，进入 FAILED
    pub failed: usize,
    /// 模式校验失败，进入 FAILED
    pub rejected: usize,
    /// 因同聚合前序记录未完成而释放
    pub released: usize,
    /// 分发前发现认领已被回收转交，未做任何处理
    pub lost: usize,
}

impl PollReport {
    pub fn is_idle(&self) -> bool {
        self.claimed == 0
    }
}

enum Outcome {
    Completed,
    Retried,
    Failed,
    Rejected,
    Lost,
    Unresolved,
}

#[derive(Builder)]
pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn EventBus>,
    /// 未设置时跳过模式校验
    schemas: Option<Arc<SchemaRegistry>>,
    #[builder(default)]
    config: ProcessorConfig,
}

impl OutboxProcessor {
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn reclaimer(&self) -> OutboxReclaimer {
        OutboxReclaimer::new(self.store.clone(), self.config.processing_timeout)
    }

    /// 执行一轮：仅认领失败会返回错误，单条记录的问题都体现在报告里
    pub async fn poll_once(&self) -> Result<PollReport> {
        let records = self
            .store
            .claim_batch(self.config.max_attempts, self.config.batch_size)
            .await?;

        let mut report = PollReport {
            claimed: records.len(),
            ..Default::default()
        };
        let mut held_back: HashSet<(String, String)> = HashSet::new();

        for record in records {
            let aggregate = (
                record.aggregate_type().to_string(),
                record.aggregate_id().to_string(),
            );

            let Some(token) = record.claim_token() else {
                warn!(event_id = record.id(), "claimed outbox record carries no claim token");
                held_back.insert(aggregate);
                continue;
            };

            if held_back.contains(&aggregate) {
                match self.store.release(record.id(), token).await {
                    Ok(()) => report.released += 1,
                    Err(err) => warn!(
                        event_id = record.id(),
                        error = %err,
                        "failed to release held-back outbox record"
                    ),
                }
                continue;
            }

            match self.process(&record, token).await {
                Outcome::Completed => report.completed += 1,
                Outcome::Retried => {
                    report.retried += 1;
                    held_back.insert(aggregate);
                }
                Outcome::Failed => {
                    report.failed += 1;
                    held_back.insert(aggregate);
                }
                Outcome::Rejected => {
                    report.rejected += 1;
                    held_back.insert(aggregate);
                }
                Outcome::Lost => {
                    report.lost += 1;
                    held_back.insert(aggregate);
                }
                Outcome::Unresolved => {
                    held_back.insert(aggregate);
                }
            }
        }

        if !report.is_idle() {
            info!(
                claimed = report.claimed,
                completed = report.completed,
                retried = report.retried,
                failed = report.failed,
                rejected = report.rejected,
                released = report.released,
                lost = report.lost,
                "outbox poll finished"
            );
        }

        Ok(report)
    }

    pub async fn sweep_once(&self) -> Result<SweepReport> {
        self.reclaimer().sweep_once().await
    }

    /// 启动轮询与回收两个周期任务
    pub fn start(self: Arc<Self>) -> Result<Scheduler> {
        self.config.validate()?;
        self.config.check_dispatch_budget(self.bus.dispatch_budget())?;

        let mut scheduler = Scheduler::new();
        scheduler.schedule(
            self.config.poll_interval,
            Arc::new(PollTask {
                processor: self.clone(),
            }),
        );
        scheduler.schedule(
            self.config.sweep_interval,
            Arc::new(SweepTask { processor: self }),
        );
        Ok(scheduler)
    }

    async fn process(&self, record: &OutboxRecord, token: &str) -> Outcome {
        match self.store.touch(record.id(), token).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    event_id = record.id(),
                    aggregate_id = record.aggregate_id(),
                    "outbox claim was lost before dispatch, skipping record"
                );
                return Outcome::Lost;
            }
            Err(err) => return self.unresolved(record, err),
        }

        let envelope = EventEnvelope::from(record);

        let envelope = match &self.schemas {
            Some(schemas) => match schemas.validate(envelope) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(
                        event_id = record.id(),
                        event_type = record.event_type(),
                        error = %err,
                        "outbox record rejected by schema registry"
                    );
                    return match self
                        .store
                        .mark_rejected(record.id(), token, &err.to_string())
                        .await
                    {
                        Ok(()) => Outcome::Rejected,
                        Err(store_err) => self.unresolved(record, store_err),
                    };
                }
            },
            None => envelope,
        };

        let dispatch = self.bus.dispatch(&envelope).await;

        let Some(error) = dispatch.error_summary() else {
            debug!(
                event_id = record.id(),
                event_type = record.event_type(),
                handlers = dispatch.succeeded.len(),
                "outbox record dispatched"
            );
            return match self.store.mark_completed(record.id(), token).await {
                Ok(()) => Outcome::Completed,
                Err(err) => self.unresolved(record, err),
            };
        };

        match self
            .store
            .mark_failed(record.id(), token, &error, self.config.max_attempts)
            .await
        {
            Ok(OutboxStatus::Failed) => {
                warn!(
                    event_id = record.id(),
                    event_type = record.event_type(),
                    aggregate_id = record.aggregate_id(),
                    attempts = record.attempts() + 1,
                    error = %error,
                    "outbox record exhausted its attempts and was parked as FAILED"
                );
                Outcome::Failed
            }
            Ok(_) => {
                debug!(
                    event_id = record.id(),
                    attempts = record.attempts() + 1,
                    "outbox record will be retried"
                );
                Outcome::Retried
            }
            Err(err) => self.unresolved(record, err),
        }
    }

    fn unresolved(&self, record: &OutboxRecord, err: DomainError) -> Outcome {
        warn!(
            event_id = record.id(),
            error = %err,
            "failed to persist outbox record state, leaving it for the recovery sweep"
        );
        Outcome::Unresolved
    }
}

struct PollTask {
    processor: Arc<OutboxProcessor>,
}

#[async_trait]
impl PeriodicTask for PollTask {
    fn name(&self) -> &str {
        "outbox-poll"
    }

    async fn tick(&self) {
        if let Err(err) = self.processor.poll_once().await {
            warn!(error = %err, "outbox poll failed, retrying next tick");
        }
    }
}

struct SweepTask {
    processor: Arc<OutboxProcessor>,
}

#[async_trait]
impl PeriodicTask for SweepTask {
    fn name(&self) -> &str {
        "outbox-sweep"
    }

    async fn tick(&self) {
        if let Err(err) = self.processor.sweep_once().await {
            warn!(error = %err, "outbox sweep failed, retrying next tick");
        }
    }
}
