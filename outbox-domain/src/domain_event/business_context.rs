use super::EventEnvelope;
use bon::Builder;
use serde::{Deserialize, Serialize};

/// 业务上下文信息
#[derive(Builder, Default, Debug, Clone, Serialize, Deserialize)]
pub struct BusinessContext {
    /// 关联ID
    correlation_id: Option<String>,
    /// 因果ID
    causation_id: Option<String>,
    /// 触发事件的主体类型（如用户、系统等）
    actor_type: Option<String>,
    /// 触发事件的主体ID
    actor_id: Option<String>,
}

impl BusinessContext {
    /// 处理上游事件时的语境：沿用其关联 ID，并以其 `event_id` 作为因果 ID
    pub fn caused_by(parent: &EventEnvelope) -> Self {
        Self {
            correlation_id: Some(parent.correlation_id().to_string()),
            causation_id: Some(parent.event_id().to_string()),
            ..Self::default()
        }
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    pub fn actor_type(&self) -> Option<&str> {
        self.actor_type.as_deref()
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }
}
