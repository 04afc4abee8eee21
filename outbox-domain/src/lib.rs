//! 事务性 Outbox 与进程内事件总线（outbox-domain）
//!
//! 为“不可丢失”的业务事件（订单生命周期、支付、合规等）提供：
//! - 事件信封（`domain_event`）：全局唯一 ID、关联 ID、版本与回放标记；
//! - 模式注册表（`schema`）：按版本校验载荷，并为版本化处理器解析分支；
//! - 持久化（`persist`）：与业务写入同事务入队的 Outbox 记录、原子认领与幂等标记存储；
//! - 事件子系统（`eventing`）：进程内总线、Outbox 处理器、回收扫描、回放与调度。
//!
//! 投递语义为至少一次：崩溃后由回收扫描恢复，处理器借助幂等守卫去重；
//! 同一聚合的事件按创建顺序完成。
//!
//! 典型用法：
//! 1. 启动时构建 `HandlerRegistry` 与 `SchemaRegistry`；
//! 2. 业务事务内通过 `OutboxWriter::enqueue` 写入事件；
//! 3. 以 `OutboxProcessor::start` 启动轮询与回收任务；
//! 4. 需要时用 `ReplayService` 回放某个时间窗口。
//!
pub mod config;
pub mod domain_event;
pub mod error;
#[cfg(feature = "eventing")]
pub mod eventing;
pub mod persist;
pub mod schema;
