use crate::error::DomainResult as Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// 幂等标记存储：以 (event_id, handler_name) 为键
///
/// 键存在表示该处理器针对该事件的副作用已持久生效。
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    async fn is_processed(&self, event_id: &str, handler_name: &str) -> Result<bool>;

    /// upsert：重复标记为 no-op，可并发调用
    async fn mark_processed(&self, event_id: &str, handler_name: &str) -> Result<()>;

    /// 删除早于截止时刻的标记，返回删除数量
    async fn prune(&self, older_than: DateTime<Utc>) -> Result<usize>;
}

/// 基于 DashMap 的内存实现
#[derive(Debug, Default)]
pub struct InMemoryProcessedEvents {
    markers: DashMap<(String, String), DateTime<Utc>>,
}

impl InMemoryProcessedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// 标记时间（首次标记时写入，之后不变）
    pub fn processed_at(&self, event_id: &str, handler_name: &str) -> Option<DateTime<Utc>> {
        self.markers
            .get(&(event_id.to_string(), handler_name.to_string()))
            .map(|entry| *entry.value())
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryProcessedEvents {
    async fn is_processed(&self, event_id: &str, handler_name: &str) -> Result<bool> {
        Ok(self
            .markers
            .contains_key(&(event_id.to_string(), handler_name.to_string())))
    }

    async fn mark_processed(&self, event_id: &str, handler_name: &str) -> Result<()> {
        self.markers
            .entry((event_id.to_string(), handler_name.to_string()))
            .or_insert_with(Utc::now);
        Ok(())
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let before = self.markers.len();
        self.markers.retain(|_, processed_at| *processed_at >= older_than);
        Ok(before.saturating_sub(self.markers.len()))
    }
}
