use chrono::{DateTime, Utc};
use outbox_domain::persist::{OutboxRecord, OutboxStatus};
use serde::Serialize;

/// 数据传输对象（DTO）
///
/// - 作为应用层的输出载体，面向接口/外部系统序列化友好；
/// - 与领域模型解耦，避免将 Outbox 记录直接暴露到接口层。
pub trait Dto: Serialize + Send + Sync + 'static {}

impl<T: Dto> Dto for Vec<T> {}

impl<T: Dto> Dto for Option<T> {}

/// Outbox 记录的只读视图（运维排查用）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxRecordDto {
    pub id: String,
    pub event_type: String,
    pub event_version: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub correlation_id: String,
    pub causation_id: Option<String>,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Dto for OutboxRecordDto {}

impl From<&OutboxRecord> for OutboxRecordDto {
    fn from(record: &OutboxRecord) -> Self {
        Self {
            id: record.id().to_string(),
            event_type: record.event_type().to_string(),
            event_version: record.event_version().to_string(),
            aggregate_type: record.aggregate_type().to_string(),
            aggregate_id: record.aggregate_id().to_string(),
            correlation_id: record.correlation_id().to_string(),
            causation_id: record.causation_id().map(str::to_string),
            status: record.status(),
            attempts: record.attempts(),
            error: record.error().map(str::to_string),
            created_at: record.created_at(),
            processed_at: record.processed_at(),
        }
    }
}
