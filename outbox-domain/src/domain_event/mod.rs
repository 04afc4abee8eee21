//! 领域事件信封（Event Envelope）
//!
//! 定义跨模块边界传递的事件形态（`EventEnvelope`）、载荷版本（`EventVersion`）
//! 以及承载关联/因果链的业务上下文（`BusinessContext`）。

mod business_context;
mod event_envelope;
mod event_version;

pub use business_context::BusinessContext;
pub use event_envelope::{EventEnvelope, new_event_id};
pub use event_version::EventVersion;
