//! 事件子系统（eventing）
//!
//! 提供进程内事件分发与 Outbox 投递的运行时：
//! - `HandlerRegistry`/`EventHandler`：启动时显式登记的处理器（支持 `*`/`**` 通配）；
//! - `InProcessEventBus`：顺序或并发分发，隔离错误、panic 与超时；
//! - `IdempotencyGuard`：按 (event_id, handler_name) 去重；
//! - `OutboxProcessor`：认领、校验、分发并回写 Outbox 记录；
//! - `OutboxReclaimer`：回收卡在 PROCESSING 的记录；
//! - `ReplayService`：按时间窗口回放已完成事件；
//! - `Scheduler`：可取消、可手动推进的周期任务。
//!
pub mod bus;
pub mod bus_inprocess;
pub mod handler;
pub mod idempotency;
pub mod processor;
pub mod reclaimer;
pub mod registry;
pub mod replay;
pub mod scheduler;

pub use bus::{DispatchReport, EventBus, FailureKind, HandlerFailure};
pub use bus_inprocess::{BusConfig, InProcessEventBus};
pub use handler::{EventHandler, FnHandler, TypedHandler, VersionedHandler, handler_fn};
pub use idempotency::{GuardOutcome, IdempotencyConfig, IdempotencyGuard};
pub use processor::{MAX_PROCESSING_TIMEOUT, OutboxProcessor, PollReport, ProcessorConfig};
pub use reclaimer::{OutboxReclaimer, SweepReport};
pub use registry::{EventPattern, HandlerRegistration, HandlerRegistry};
pub use replay::{ReplayResult, ReplayService};
pub use scheduler::{PeriodicTask, Scheduler};
