//! Outbox 记录（OutboxRecord）
//!
//! 记录的状态机集中在此处，各存储实现只负责在原子操作内调用这些迁移：
//!
//! ```text
//! PENDING ──claim──▶ PROCESSING ──complete──▶ COMPLETED
//!    ▲                   │ │
//!    └──fail(<max)───────┘ └──fail(>=max) / reject──▶ FAILED
//!    ▲                   │
//!    └──release/sweep────┘
//! ```
//!
//! 每次认领都会生成新的认领令牌。离开 PROCESSING 的迁移（回收扫描除外）以及心跳 `touch`
//! 都必须出示当前令牌：记录被回收并由其他实例重新认领后，原持有者的回写一律失败。
//!
//! FAILED 只能由运维显式 `retry` 回到 PENDING，不会自动重试。
//!
use crate::domain_event::{EventEnvelope, EventVersion, new_event_id};
use crate::error::{DomainError, DomainResult};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Completed => "COMPLETED",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl Display for OutboxStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "PROCESSING" => Ok(OutboxStatus::Processing),
            "COMPLETED" => Ok(OutboxStatus::Completed),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(DomainError::Parse {
                reason: format!("unknown outbox status: {other}"),
            }),
        }
    }
}

/// 待入队的 Outbox 记录（由业务事务创建）
#[derive(Debug, Clone, Builder)]
pub struct NewOutboxRecord {
    #[builder(default = new_event_id())]
    id: String,
    #[builder(into)]
    event_type: String,
    #[builder(default)]
    event_version: EventVersion,
    payload: Value,
    #[builder(into)]
    aggregate_type: String,
    #[builder(into)]
    aggregate_id: String,
    #[builder(default = new_event_id())]
    correlation_id: String,
    /// 触发本事件的上游事件 id
    causation_id: Option<String>,
    #[builder(into)]
    source: String,
}

impl NewOutboxRecord {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }
}

/// Outbox 记录：由 Outbox 存储独占，仅由处理器（及运维操作）修改，永不删除
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// 同时作为信封的 `event_id`
    pub(crate) id: String,
    pub(crate) event_type: String,
    pub(crate) event_version: EventVersion,
    pub(crate) payload: Value,
    pub(crate) aggregate_type: String,
    pub(crate) aggregate_id: String,
    pub(crate) correlation_id: String,
    #[serde(default)]
    pub(crate) causation_id: Option<String>,
    pub(crate) source: String,
    pub(crate) status: OutboxStatus,
    pub(crate) attempts: u32,
    pub(crate) error: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    /// 进入 PROCESSING 的时刻，供回收扫描判断是否卡死
    pub(crate) claimed_at: Option<DateTime<Utc>>,
    /// 当前认领的令牌，仅在 PROCESSING 时存在
    #[serde(default)]
    pub(crate) claim_token: Option<String>,
    pub(crate) processed_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// 以 PENDING 状态创建记录
    pub fn from_new(new: NewOutboxRecord, created_at: DateTime<Utc>) -> Self {
        Self {
            id: new.id,
            event_type: new.event_type,
            event_version: new.event_version,
            payload: new.payload,
            aggregate_type: new.aggregate_type,
            aggregate_id: new.aggregate_id,
            correlation_id: new.correlation_id,
            causation_id: new.causation_id,
            source: new.source,
            status: OutboxStatus::Pending,
            attempts: 0,
            error: None,
            created_at,
            claimed_at: None,
            claim_token: None,
            processed_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> EventVersion {
        self.event_version
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn status(&self) -> OutboxStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn claimed_at(&self) -> Option<DateTime<Utc>> {
        self.claimed_at
    }

    pub fn claim_token(&self) -> Option<&str> {
        self.claim_token.as_deref()
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    /// 是否可被 `claim_batch` 选中
    pub fn is_claimable(&self, max_attempts: u32) -> bool {
        self.status == OutboxStatus::Pending && self.attempts < max_attempts
    }

    /// 是否已在 PROCESSING 中停留超过截止时刻
    pub fn is_stuck(&self, older_than: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Processing
            && self.claimed_at.is_none_or(|claimed| claimed < older_than)
    }

    /// PENDING → PROCESSING，记下认领令牌
    pub fn claim(&mut self, token: &str, now: DateTime<Utc>) -> DomainResult<()> {
        self.expect_status(OutboxStatus::Pending, "claim")?;
        self.status = OutboxStatus::Processing;
        self.claimed_at = Some(now);
        self.claim_token = Some(token.to_string());
        Ok(())
    }

    /// 心跳：刷新 `claimed_at`，避免仍在处理中的记录被回收
    pub fn touch(&mut self, token: &str, now: DateTime<Utc>) -> DomainResult<()> {
        self.expect_claim(token, "touch")?;
        self.claimed_at = Some(now);
        Ok(())
    }

    /// PROCESSING → COMPLETED
    pub fn complete(&mut self, token: &str, now: DateTime<Utc>) -> DomainResult<()> {
        self.expect_claim(token, "complete")?;
        self.status = OutboxStatus::Completed;
        self.processed_at = Some(now);
        self.claim_token = None;
        Ok(())
    }

    /// PROCESSING → PENDING（attempts+1）或达到上限后 → FAILED
    pub fn fail(
        &mut self,
        token: &str,
        error: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<OutboxStatus> {
        self.expect_claim(token, "fail")?;
        self.attempts = self.attempts.saturating_add(1);
        self.error = Some(error.to_string());
        self.claimed_at = None;
        self.claim_token = None;

        if self.attempts >= max_attempts {
            self.status = OutboxStatus::Failed;
            self.processed_at = Some(now);
        } else {
            self.status = OutboxStatus::Pending;
        }

        Ok(self.status)
    }

    /// 模式校验失败：PROCESSING → FAILED，不再重试
    pub fn reject(&mut self, token: &str, error: &str, now: DateTime<Utc>) -> DomainResult<()> {
        self.expect_claim(token, "reject")?;
        self.attempts = self.attempts.saturating_add(1);
        self.error = Some(error.to_string());
        self.status = OutboxStatus::Failed;
        self.processed_at = Some(now);
        self.claim_token = None;
        Ok(())
    }

    /// PROCESSING → PENDING，不消耗尝试次数
    pub fn release(&mut self, token: &str) -> DomainResult<()> {
        self.expect_claim(token, "release")?;
        self.requeue()
    }

    /// 回收扫描：不论由谁持有，PROCESSING → PENDING 并作废当前令牌
    pub fn requeue(&mut self) -> DomainResult<()> {
        self.expect_status(OutboxStatus::Processing, "requeue")?;
        self.status = OutboxStatus::Pending;
        self.claimed_at = None;
        self.claim_token = None;
        Ok(())
    }

    /// 运维重试：FAILED → PENDING，尝试次数清零，保留最后一次错误以便审计
    pub fn retry(&mut self) -> DomainResult<()> {
        self.expect_status(OutboxStatus::Failed, "retry")?;
        self.status = OutboxStatus::Pending;
        self.attempts = 0;
        self.claimed_at = None;
        self.claim_token = None;
        self.processed_at = None;
        Ok(())
    }

    fn expect_claim(&self, token: &str, transition: &str) -> DomainResult<()> {
        self.expect_status(OutboxStatus::Processing, transition)?;
        if self.claim_token.as_deref() == Some(token) {
            Ok(())
        } else {
            Err(lost_claim(&self.id))
        }
    }

    fn expect_status(&self, expected: OutboxStatus, transition: &str) -> DomainResult<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(DomainError::invalid_state(format!(
                "cannot {transition} outbox record {} in status {}",
                self.id, self.status
            )))
        }
    }
}

/// 认领已被回收或转交给其他实例
pub(crate) fn lost_claim(id: &str) -> DomainError {
    DomainError::invalid_state(format!("claim on outbox record {id} was lost"))
}

impl From<&OutboxRecord> for EventEnvelope {
    fn from(record: &OutboxRecord) -> Self {
        EventEnvelope::builder()
            .event_id(record.id.clone())
            .event_type(record.event_type.clone())
            .version(record.event_version)
            .timestamp(record.created_at)
            .correlation_id(record.correlation_id.clone())
            .maybe_causation_id(record.causation_id.clone())
            .source(record.source.clone())
            .payload(record.payload.clone())
            .build()
    }
}
