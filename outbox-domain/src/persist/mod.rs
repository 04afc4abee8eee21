//! 持久化（persist）
//!
//! 定义 Outbox 记录及其状态机、Outbox 存储与幂等标记存储的协议，并提供：
//! - 事务内入队（`OutboxWriter`），保证业务写入与事件记录同提交/同回滚；
//! - 处理器协调所需的原子认领、迁移与回收（`OutboxStore`）；
//! - 按 (event_id, handler_name) 的幂等标记（`ProcessedEventStore`）；
//! - 内存实现（测试与单进程部署）与 Postgres 实现（`postgres` 特性）。
//!
mod inmemory_outbox;
mod outbox_record;
mod outbox_store;
mod processed_event_store;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use inmemory_outbox::{InMemoryOutboxStore, InMemoryTransaction};
pub use outbox_record::{NewOutboxRecord, OutboxRecord, OutboxStatus};
pub use outbox_store::{OutboxStore, OutboxWriter, ReplayFilter};
pub use processed_event_store::{InMemoryProcessedEvents, ProcessedEventStore};
