//! 领域层统一错误定义
//!
//! 聚焦信封校验、Outbox/幂等存储与状态迁移等最小必要集合，
//! 便于在各实现层统一转换为 `DomainError`。
//!
use thiserror::Error;

/// 模式（Schema）校验错误：信封在分发前被拒绝，永不重试
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unknown event type: {event_type}")]
    UnknownEventType { event_type: String },
    #[error("invalid event version: {value}")]
    InvalidVersion { value: String },
    #[error("payload mismatch: type={event_type}, version={version}, reason={reason}")]
    PayloadMismatch {
        event_type: String,
        version: String,
        reason: String,
    },
    #[error("decode failed: type={event_type}, version={version}, reason={reason}")]
    Decode {
        event_type: String,
        version: String,
        reason: String,
    },
}

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 解析/模式 ---
    #[error("parse error: {reason}")]
    Parse { reason: String },
    #[error("schema error: {source}")]
    Schema {
        #[from]
        source: SchemaError,
    },

    // --- 存储 ---
    #[error("outbox store error: {reason}")]
    OutboxStore { reason: String },
    #[error("idempotency store error: {reason}")]
    IdempotencyStore { reason: String },
    #[error("database error: {reason}")]
    Database { reason: String },

    // --- 状态/取值 ---
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("invalid value: {reason}")]
    InvalidValue { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
}

impl DomainError {
    pub fn outbox_store(reason: impl Into<String>) -> Self {
        DomainError::OutboxStore {
            reason: reason.into(),
        }
    }

    pub fn idempotency_store(reason: impl Into<String>) -> Self {
        DomainError::IdempotencyStore {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        DomainError::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn invalid_value(reason: impl Into<String>) -> Self {
        DomainError::InvalidValue {
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        DomainError::NotFound {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;

// 允许在基础设施层直接使用 `?` 将 sqlx 错误转换为 DomainError
#[cfg(feature = "postgres")]
impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DomainError::NotFound {
                reason: "row not found".to_string(),
            },
            other => DomainError::Database {
                reason: other.to_string(),
            },
        }
    }
}
