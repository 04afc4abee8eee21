//! 模式注册表（Schema Registry）
//!
//! 事件载荷随业务演进时，按版本登记载荷形状并在分发前校验：
//! - `PayloadSchema`：某一版本的字段与类型约束；
//! - `SchemaRegistry`：校验信封（`validate`）与版本分支解析（`resolve_handler`）；
//! - `VersionedEvent`：以枚举变体表达多个 major 版本，由注册表选择分支。
//!
//! 未知版本降级到最高已知版本并记录告警，属于有意的宽松降级策略。
//!
mod payload_schema;
mod registry;
mod versioned;

pub use payload_schema::{FieldKind, FieldSpec, PayloadSchema};
pub use registry::{HandlerVariant, SchemaRegistry};
pub use versioned::{VersionedEvent, decode_payload};
