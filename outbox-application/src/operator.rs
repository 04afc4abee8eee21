//! 运维入口（Operator Surface）
//!
//! 回放、回收卡死记录、重试死信等运维动作以命令形式经 `CommandBus` 派发，
//! 排查类只读操作以查询形式经 `QueryBus` 派发。每个动作都会留下带操作主体的审计日志。

use crate::{
    command::Command, command_handler::CommandHandler, context::AppContext,
    dto::OutboxRecordDto, error::AppError, inmemory_command_bus::InMemoryCommandBus,
    inmemory_query_bus::InMemoryQueryBus, query::Query, query_handler::QueryHandler,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outbox_domain::eventing::{EventBus, ReplayResult, ReplayService};
use outbox_domain::persist::{OutboxStatus, OutboxStore};
use std::sync::Arc;
use tracing::info;

/// 按时间窗口 `[start, end)` 回放已完成的事件
#[derive(Debug, Clone)]
pub struct ReplayEvents {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub event_types: Option<Vec<String>>,
    pub aggregate_id: Option<String>,
}

impl Command for ReplayEvents {
    const NAME: &'static str = "ReplayEvents";
    type Output = ReplayResult;
}

/// 将认领时间早于 `older_than` 的 PROCESSING 记录放回 PENDING
#[derive(Debug, Clone)]
pub struct RequeueStuckEvents {
    pub older_than: DateTime<Utc>,
}

impl Command for RequeueStuckEvents {
    const NAME: &'static str = "RequeueStuckEvents";
    type Output = usize;
}

/// 死信重试：FAILED → PENDING，尝试次数清零
#[derive(Debug, Clone)]
pub struct RetryFailedEvent {
    pub id: String,
}

impl Command for RetryFailedEvent {
    const NAME: &'static str = "RetryFailedEvent";
    type Output = ();
}

#[derive(Debug, Clone)]
pub struct ListFailedEvents {
    pub limit: usize,
}

impl Query for ListFailedEvents {
    const NAME: &'static str = "ListFailedEvents";
    type Dto = Vec<OutboxRecordDto>;
}

#[derive(Debug, Clone)]
pub struct GetOutboxRecord {
    pub id: String,
}

impl Query for GetOutboxRecord {
    const NAME: &'static str = "GetOutboxRecord";
    type Dto = Option<OutboxRecordDto>;
}

/// 运维命令与查询的统一处理器
pub struct OutboxOperator {
    store: Arc<dyn OutboxStore>,
    replay: ReplayService,
}

impl OutboxOperator {
    pub fn new(store: Arc<dyn OutboxStore>, bus: Arc<dyn EventBus>) -> Self {
        let replay = ReplayService::new(store.clone(), bus);
        Self { store, replay }
    }
}

/// 将全部运维命令/查询注册到给定总线
pub fn register_operator(
    commands: &InMemoryCommandBus,
    queries: &InMemoryQueryBus,
    operator: Arc<OutboxOperator>,
) -> Result<(), AppError> {
    commands.register::<ReplayEvents, _>(operator.clone())?;
    commands.register::<RequeueStuckEvents, _>(operator.clone())?;
    commands.register::<RetryFailedEvent, _>(operator.clone())?;
    queries.register::<ListFailedEvents, _>(operator.clone())?;
    queries.register::<GetOutboxRecord, _>(operator)?;
    Ok(())
}

#[async_trait]
impl CommandHandler<ReplayEvents> for OutboxOperator {
    async fn handle(&self, ctx: &AppContext, cmd: ReplayEvents) -> Result<ReplayResult, AppError> {
        if cmd.start >= cmd.end {
            return Err(AppError::Validation(format!(
                "replay window start {} must be before end {}",
                cmd.start, cmd.end
            )));
        }

        info!(
            actor = %ctx.actor(),
            correlation_id = ctx.correlation_id(),
            start = %cmd.start,
            end = %cmd.end,
            event_types = ?cmd.event_types,
            aggregate_id = cmd.aggregate_id.as_deref(),
            "operator requested replay"
        );

        let result = self
            .replay
            .replay_window(cmd.start, cmd.end, cmd.event_types, cmd.aggregate_id)
            .await?;
        Ok(result)
    }
}

#[async_trait]
impl CommandHandler<RequeueStuckEvents> for OutboxOperator {
    async fn handle(&self, ctx: &AppContext, cmd: RequeueStuckEvents) -> Result<usize, AppError> {
        let requeued = self.store.requeue_stuck(cmd.older_than).await?;
        info!(
            actor = %ctx.actor(),
            older_than = %cmd.older_than,
            requeued,
            "operator requeued stuck records"
        );
        Ok(requeued)
    }
}

#[async_trait]
impl CommandHandler<RetryFailedEvent> for OutboxOperator {
    async fn handle(&self, ctx: &AppContext, cmd: RetryFailedEvent) -> Result<(), AppError> {
        self.store.retry_failed(&cmd.id).await?;
        info!(actor = %ctx.actor(), event_id = %cmd.id, "operator retried failed record");
        Ok(())
    }
}

#[async_trait]
impl QueryHandler<ListFailedEvents> for OutboxOperator {
    async fn handle(
        &self,
        _ctx: &AppContext,
        q: ListFailedEvents,
    ) -> Result<Vec<OutboxRecordDto>, AppError> {
        let records = self
            .store
            .list_by_status(OutboxStatus::Failed, q.limit)
            .await?;
        Ok(records.iter().map(OutboxRecordDto::from).collect())
    }
}

#[async_trait]
impl QueryHandler<GetOutboxRecord> for OutboxOperator {
    async fn handle(
        &self,
        _ctx: &AppContext,
        q: GetOutboxRecord,
    ) -> Result<Option<OutboxRecordDto>, AppError> {
        let record = self.store.find(&q.id).await?;
        Ok(record.as_ref().map(OutboxRecordDto::from))
    }
}
