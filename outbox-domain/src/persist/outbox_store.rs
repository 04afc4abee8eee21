use super::outbox_record::{NewOutboxRecord, OutboxRecord, OutboxStatus};
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};

/// 在业务事务内写入 Outbox 记录
///
/// `Tx` 为具体存储的事务作用域（如 `sqlx::Transaction<'_, Postgres>`）：
/// 业务状态变更与 Outbox 记录要么同时提交，要么都不存在。
#[async_trait]
pub trait OutboxWriter<Tx: Send>: Send + Sync {
    async fn enqueue(&self, tx: &mut Tx, record: NewOutboxRecord) -> Result<OutboxRecord>;
}

/// Outbox 存储：多个处理器实例之间唯一的协调点
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// 原子地选出至多 `limit` 条 `PENDING 且 attempts < max_attempts` 的记录（按 `created_at` 升序），
    /// 并在同一操作内迁移到 PROCESSING；并发调用之间不会重复认领同一条记录。
    /// 返回的记录都带有本次认领的令牌，后续回写须原样出示。
    async fn claim_batch(&self, max_attempts: u32, limit: usize) -> Result<Vec<OutboxRecord>>;

    /// 刷新仍由 `claim_token` 持有的记录的 `claimed_at`；认领已丢失时返回 `false`
    async fn touch(&self, id: &str, claim_token: &str) -> Result<bool>;

    async fn mark_completed(&self, id: &str, claim_token: &str) -> Result<()>;

    /// attempts+1；未达上限回到 PENDING，否则置为 FAILED。返回迁移后的状态。
    async fn mark_failed(
        &self,
        id: &str,
        claim_token: &str,
        error: &str,
        max_attempts: u32,
    ) -> Result<OutboxStatus>;

    /// 模式校验失败，直接置为 FAILED
    async fn mark_rejected(&self, id: &str, claim_token: &str, error: &str) -> Result<()>;

    /// 释放认领但不消耗尝试次数
    async fn release(&self, id: &str, claim_token: &str) -> Result<()>;

    /// 将 `claimed_at` 早于截止时刻的 PROCESSING 记录放回 PENDING 并作废其令牌，返回数量（可重复执行）
    async fn requeue_stuck(&self, older_than: DateTime<Utc>) -> Result<usize>;

    /// 回放查询：窗口内的 COMPLETED 记录，按 `created_at` 升序
    async fn find_completed(&self, filter: &ReplayFilter) -> Result<Vec<OutboxRecord>>;

    async fn find(&self, id: &str) -> Result<Option<OutboxRecord>>;

    async fn list_by_status(&self, status: OutboxStatus, limit: usize)
    -> Result<Vec<OutboxRecord>>;

    /// 运维操作：FAILED → PENDING
    async fn retry_failed(&self, id: &str) -> Result<()>;
}

/// 回放过滤条件：时间窗口为 `[start, end)`，空的事件类型列表视为不过滤
#[derive(Debug, Clone, Builder)]
pub struct ReplayFilter {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    event_types: Option<Vec<String>>,
    aggregate_id: Option<String>,
}

impl ReplayFilter {
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn event_types(&self) -> Option<&[String]> {
        self.event_types.as_deref()
    }

    pub fn aggregate_id(&self) -> Option<&str> {
        self.aggregate_id.as_deref()
    }

    pub fn validate(&self) -> Result<()> {
        if self.start >= self.end {
            return Err(DomainError::invalid_value(format!(
                "replay window start {} must be before end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    /// 内存实现与测试替身共用的匹配逻辑
    pub fn matches(&self, record: &OutboxRecord) -> bool {
        record.status() == OutboxStatus::Completed
            && record.created_at() >= self.start
            && record.created_at() < self.end
            && self
                .event_types
                .as_ref()
                .is_none_or(|types| {
                    types.is_empty() || types.iter().any(|t| t == record.event_type())
                })
            && self
                .aggregate_id
                .as_deref()
                .is_none_or(|id| id == record.aggregate_id())
    }
}
