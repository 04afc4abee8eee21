//! 回放服务（ReplayService）
//!
//! 选出窗口内的 COMPLETED 记录，按 `created_at` 升序重新经总线分发：
//! 信封保留原 `event_id`，标记 `is_replay`，原始时间写入 `original_timestamp`。
//! 单条失败只计数、不中断；记录状态不受回放影响。
//!
use super::bus::EventBus;
use crate::domain_event::EventEnvelope;
use crate::error::DomainResult as Result;
use crate::persist::{OutboxStore, ReplayFilter};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayResult {
    pub total: usize,
    pub replayed: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ReplayService {
    store: Arc<dyn OutboxStore>,
    bus: Arc<dyn EventBus>,
}

impl ReplayService {
    pub fn new(store: Arc<dyn OutboxStore>, bus: Arc<dyn EventBus>) -> Self {
        Self { store, bus }
    }

    pub async fn replay_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        event_types: Option<Vec<String>>,
        aggregate_id: Option<String>,
    ) -> Result<ReplayResult> {
        let filter = ReplayFilter::builder()
            .start(start)
            .end(end)
            .maybe_event_types(event_types)
            .maybe_aggregate_id(aggregate_id)
            .build();
        self.replay(&filter).await
    }

    pub async fn replay(&self, filter: &ReplayFilter) -> Result<ReplayResult> {
        filter.validate()?;

        let records = self.store.find_completed(filter).await?;
        let mut result = ReplayResult {
            total: records.len(),
            ..Default::default()
        };

        for record in &records {
            let envelope = EventEnvelope::from(record).into_replay(Utc::now());
            let dispatch = self.bus.dispatch(&envelope).await;

            match dispatch.error_summary() {
                None => result.replayed += 1,
                Some(error) => {
                    result.failed += 1;
                    warn!(
                        event_id = record.id(),
                        event_type = record.event_type(),
                        error = %error,
                        "replay dispatch failed"
                    );
                }
            }
        }

        info!(
            start = %filter.start(),
            end = %filter.end(),
            total = result.total,
            replayed = result.replayed,
            failed = result.failed,
            "replay finished"
        );

        Ok(result)
    }
}
