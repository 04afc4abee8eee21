//! 回收扫描（OutboxReclaimer）
//!
//! 处理周期中途中止（崩溃、部署）会把记录留在 PROCESSING。扫描把 `claimed_at`
//! 早于 `now - processing_timeout` 的记录放回 PENDING，可重复执行，不消耗尝试次数。
//!
use crate::config::cutoff_before;
use crate::error::DomainResult as Result;
use crate::persist::OutboxStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub cutoff: DateTime<Utc>,
    pub requeued: usize,
}

#[derive(Clone)]
pub struct OutboxReclaimer {
    store: Arc<dyn OutboxStore>,
    processing_timeout: Duration,
}

impl OutboxReclaimer {
    pub fn new(store: Arc<dyn OutboxStore>, processing_timeout: Duration) -> Self {
        Self {
            store,
            processing_timeout,
        }
    }

    pub fn processing_timeout(&self) -> Duration {
        self.processing_timeout
    }

    pub async fn sweep_once(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// 以给定时刻为基准扫描
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = cutoff_before(now, self.processing_timeout, "processing_timeout")?;
        let requeued = self.store.requeue_stuck(cutoff).await?;

        if requeued > 0 {
            info!(requeued, %cutoff, "requeued stuck outbox records");
        }

        Ok(SweepReport { cutoff, requeued })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{InMemoryOutboxStore, NewOutboxRecord, OutboxStatus, OutboxWriter};
    use serde_json::json;

    #[tokio::test]
    async fn requeues_only_records_past_the_timeout() {
        let store = InMemoryOutboxStore::new();
        let mut tx = store.begin();
        store
            .enqueue(
                &mut tx,
                NewOutboxRecord::builder()
                    .event_type("order.created")
                    .payload(json!({"orderId": "A1"}))
                    .aggregate_type("order")
                    .aggregate_id("A1")
                    .source("orders")
                    .build(),
            )
            .await
            .unwrap();
        tx.commit().unwrap();

        let claimed = store.claim_batch(3, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let reclaimer = OutboxReclaimer::new(Arc::new(store.clone()), Duration::from_secs(300));

        let fresh = reclaimer.sweep_once().await.unwrap();
        assert_eq!(fresh.requeued, 0);

        let later = Utc::now() + chrono::Duration::minutes(10);
        assert_eq!(reclaimer.sweep_at(later).await.unwrap().requeued, 1);
        assert_eq!(reclaimer.sweep_at(later).await.unwrap().requeued, 0);

        let record = store.find(claimed[0].id()).await.unwrap().unwrap();
        assert_eq!(record.status(), OutboxStatus::Pending);
        assert_eq!(record.attempts(), 0);
    }

    #[tokio::test]
    async fn oversized_timeout_is_an_error_not_a_panic() {
        let store = InMemoryOutboxStore::new();
        let reclaimer = OutboxReclaimer::new(
            Arc::new(store),
            Duration::from_secs(1_000_000_000_000_000),
        );
        let err = reclaimer.sweep_once().await.unwrap_err();
        assert!(matches!(err, crate::error::DomainError::InvalidValue { .. }));
    }
}
