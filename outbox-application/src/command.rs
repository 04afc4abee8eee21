/// 应用层命令（Command）
///
/// 表达“意图”的写操作请求，通常会修改 Outbox 状态或重新驱动事件。
/// - `Output` 为执行结果（如回放统计、受影响记录数），无结果时使用 `()`；
/// - 建议保持语义化的“动宾结构”命名，如 `ReplayEvents`、`RetryFailedEvent`。
///
/// 关联常量：
/// - `NAME`：命令的稳定名称，用于日志、审计与路由。避免依赖 `type_name::<T>()`。
pub trait Command: Send + Sync + 'static {
    /// 命令的稳定名称（建议常量字符串，不随重构变化）
    const NAME: &'static str;

    /// 命令执行结果
    type Output: Send + 'static;
}
