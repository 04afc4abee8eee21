use crate::{context::AppContext, error::AppError};
use bon::Builder;
use outbox_domain::domain_event::{EventEnvelope, EventVersion, new_event_id};
use outbox_domain::eventing::{DispatchReport, InProcessEventBus};
use outbox_domain::persist::{NewOutboxRecord, OutboxRecord, OutboxWriter};
use outbox_domain::schema::SchemaRegistry;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// 事件发布门面
///
/// - `publish`：在调用方的业务事务内写入 Outbox 记录，提交后由处理器可靠投递；
/// - `emit`：进程内即时分发，尽力而为，不落库、不重试。
#[derive(Builder)]
pub struct EventPublisher<W> {
    writer: Arc<W>,
    bus: Arc<InProcessEventBus>,
    schemas: Option<Arc<SchemaRegistry>>,
    /// 写入记录与信封的来源模块名
    #[builder(into)]
    source: String,
}

impl<W> EventPublisher<W> {
    pub fn source(&self) -> &str {
        &self.source
    }

    fn version_of(&self, event_type: &str) -> EventVersion {
        self.schemas
            .as_ref()
            .and_then(|schemas| schemas.latest_version(event_type))
            .unwrap_or_default()
    }

    fn correlation_id(ctx: &AppContext) -> String {
        ctx.correlation_id()
            .map(str::to_string)
            .unwrap_or_else(new_event_id)
    }

    pub async fn publish<Tx: Send>(
        &self,
        ctx: &AppContext,
        tx: &mut Tx,
        event_type: &str,
        payload: Value,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<OutboxRecord, AppError>
    where
        W: OutboxWriter<Tx>,
    {
        let record = NewOutboxRecord::builder()
            .event_type(event_type)
            .event_version(self.version_of(event_type))
            .payload(payload)
            .aggregate_type(aggregate_type)
            .aggregate_id(aggregate_id)
            .correlation_id(Self::correlation_id(ctx))
            .maybe_causation_id(ctx.biz.causation_id().map(str::to_string))
            .source(self.source.clone())
            .build();

        let record = self.writer.enqueue(tx, record).await?;
        debug!(
            event_id = record.id(),
            event_type,
            aggregate_id,
            correlation_id = record.correlation_id(),
            causation_id = record.causation_id(),
            "event staged in outbox"
        );
        Ok(record)
    }

    pub async fn emit(&self, ctx: &AppContext, event_type: &str, payload: Value) -> DispatchReport {
        let envelope = EventEnvelope::builder()
            .event_type(event_type)
            .version(self.version_of(event_type))
            .correlation_id(Self::correlation_id(ctx))
            .maybe_causation_id(ctx.biz.causation_id().map(str::to_string))
            .source(self.source.clone())
            .payload(payload)
            .build();

        self.bus.emit_envelope(&envelope).await
    }
}
