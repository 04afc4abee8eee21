//! 事件总线（EventBus）协议
//!
//! 处理器／回放服务只依赖该协议：把一个信封分发给所有匹配的处理器，
//! 等待全部完成后返回逐处理器的结果。单个处理器的错误、panic 与超时
//! 都被隔离为 `HandlerFailure`，不会中断其他处理器或调用方。
//!
use crate::domain_event::EventEnvelope;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn dispatch(&self, envelope: &EventEnvelope) -> DispatchReport;

    /// 单次 `dispatch` 的最长耗时；无法给出上界时返回 `None`
    fn dispatch_budget(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Error,
    Panic,
    Timeout,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FailureKind::Error => "error",
            FailureKind::Panic => "panic",
            FailureKind::Timeout => "timeout",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerFailure {
    pub handler_name: String,
    pub kind: FailureKind,
    pub message: String,
}

impl Display for HandlerFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.handler_name, self.kind, self.message)
    }
}

/// 单次分发的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub event_id: String,
    pub event_type: String,
    /// 成功的处理器（登记顺序）
    pub succeeded: Vec<String>,
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    pub fn new(envelope: &EventEnvelope) -> Self {
        Self {
            event_id: envelope.event_id().to_string(),
            event_type: envelope.event_type().to_string(),
            ..Default::default()
        }
    }

    /// 没有匹配的处理器同样视为成功
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn matched(&self) -> usize {
        self.succeeded.len() + self.failures.len()
    }

    /// 汇总失败信息，写入 Outbox 记录的 `error`
    pub fn error_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        Some(
            self.failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
