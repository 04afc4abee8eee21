use super::event_version::EventVersion;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 生成新的事件 ID（UUIDv7，按时间有序）
pub fn new_event_id() -> String {
    Uuid::now_v7().to_string()
}

/// 事件信封：跨模块边界传递的每个事件的线上形态
///
/// `event_id` 全局唯一，且在同一逻辑事件的重试与回放之间保持不变；
/// `correlation_id` 在因果相关的事件链中原样传播。
///
/// `is_replay`/`original_timestamp` 为旁路字段，仅在回放时设置，
/// 反序列化缺省时为 `false`/`None`。
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// 事件唯一标识符
    #[builder(default = new_event_id())]
    event_id: String,
    /// 事件类型（点分名称，如 `order.created`）
    #[builder(into)]
    event_type: String,
    /// 载荷版本
    #[builder(default)]
    version: EventVersion,
    /// 事件发生（或回放分发）时间
    #[builder(default = Utc::now())]
    timestamp: DateTime<Utc>,
    /// 关联 ID
    #[builder(default = new_event_id())]
    correlation_id: String,
    /// 因果 ID：触发本事件的上游事件
    #[serde(default, skip_serializing_if = "Option::is_none")]
    causation_id: Option<String>,
    /// 来源模块
    #[builder(into)]
    source: String,
    /// 事件负载
    payload: Value,
    #[serde(default)]
    #[builder(default)]
    is_replay: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    original_timestamp: Option<DateTime<Utc>>,
}

impl EventEnvelope {
    /// 由上游事件派生新事件：继承 `correlation_id`，并以上游 `event_id` 作为因果 ID
    pub fn caused_by(
        parent: &EventEnvelope,
        event_type: impl Into<String>,
        source: impl Into<String>,
        payload: Value,
    ) -> Self {
        EventEnvelope::builder()
            .event_type(event_type)
            .source(source)
            .payload(payload)
            .correlation_id(parent.correlation_id.clone())
            .causation_id(parent.event_id.clone())
            .build()
    }

    /// 标记为回放：分发时间改为 `replayed_at`，原始时间保存在旁路字段
    pub fn into_replay(mut self, replayed_at: DateTime<Utc>) -> Self {
        if !self.is_replay {
            self.original_timestamp = Some(self.timestamp);
            self.is_replay = true;
        }
        self.timestamp = replayed_at;
        self
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn version(&self) -> EventVersion {
        self.version
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn is_replay(&self) -> bool {
        self.is_replay
    }

    pub fn original_timestamp(&self) -> Option<DateTime<Utc>> {
        self.original_timestamp
    }
}
