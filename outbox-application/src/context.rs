use outbox_domain::domain_event::{BusinessContext, EventEnvelope};

/// 应用层上下文（Application Context）
///
/// 承载一次应用层调用（发布、命令、查询）所需的横切信息：
/// - 业务语境（`BusinessContext`）：关联 `correlation_id`、因果 `causation_id`、
///   操作主体类型/ID；发布事件时关联 ID 原样写入 Outbox 记录，缺省时生成新的。
///
/// 典型用法：
/// ```rust
/// use outbox_application::context::AppContext;
/// use outbox_domain::domain_event::{BusinessContext, EventEnvelope};
///
/// let ctx = AppContext {
///     biz: BusinessContext::builder()
///         .correlation_id("cor-123".into())
///         .actor_type("operator".into())
///         .actor_id("ops-1".into())
///         .build(),
/// };
/// assert_eq!(ctx.correlation_id(), Some("cor-123"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct AppContext {
    /// 业务语境（链路追踪、审计主体、操作因果）
    pub biz: BusinessContext,
}

impl AppContext {
    pub fn new(biz: BusinessContext) -> Self {
        Self { biz }
    }

    /// 在事件处理器内继续发布时使用，保持同一条因果链
    pub fn from_event(parent: &EventEnvelope) -> Self {
        Self::new(BusinessContext::caused_by(parent))
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.biz.correlation_id()
    }

    /// 审计日志中的操作主体，形如 `operator:ops-1`
    pub fn actor(&self) -> String {
        match (self.biz.actor_type(), self.biz.actor_id()) {
            (Some(kind), Some(id)) => format!("{kind}:{id}"),
            (None, Some(id)) => id.to_string(),
            (Some(kind), None) => kind.to_string(),
            (None, None) => "anonymous".to_string(),
        }
    }
}
