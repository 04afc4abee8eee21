//! Postgres 版 Outbox 与幂等存储
//!
//! - 认领使用 `FOR UPDATE SKIP LOCKED` 在单条语句内完成“选取 + 迁移”，多实例互不阻塞；
//! - `enqueue` 在调用方传入的事务内执行，与业务写入同提交/同回滚；
//! - 失败计数与状态判定在同一条 UPDATE 中完成，避免读后写竞争；
//! - 回写与心跳都以 `claim_token` 为条件，回收后被重新认领的记录不会被原持有者改写。
//!
use super::outbox_record::{NewOutboxRecord, OutboxRecord, OutboxStatus, lost_claim};
use super::outbox_store::{OutboxStore, OutboxWriter, ReplayFilter};
use super::processed_event_store::ProcessedEventStore;
use crate::domain_event::new_event_id;
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

/// 建表语句（部署时执行一次，可重复执行）
pub const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS event_outbox (
        id             TEXT PRIMARY KEY,
        event_type     TEXT        NOT NULL,
        event_version  TEXT        NOT NULL,
        payload        JSONB       NOT NULL,
        aggregate_type TEXT        NOT NULL,
        aggregate_id   TEXT        NOT NULL,
        correlation_id TEXT        NOT NULL,
        causation_id   TEXT,
        source         TEXT        NOT NULL,
        status         TEXT        NOT NULL DEFAULT 'PENDING',
        attempts       INTEGER     NOT NULL DEFAULT 0,
        error          TEXT,
        created_at     TIMESTAMPTZ NOT NULL,
        claimed_at     TIMESTAMPTZ,
        claim_token    TEXT,
        processed_at   TIMESTAMPTZ
    )
    "#,
    "ALTER TABLE event_outbox ADD COLUMN IF NOT EXISTS causation_id TEXT",
    "ALTER TABLE event_outbox ADD COLUMN IF NOT EXISTS claim_token TEXT",
    r#"
    CREATE INDEX IF NOT EXISTS event_outbox_pending_idx
        ON event_outbox (created_at, id) WHERE status = 'PENDING'
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS event_outbox_completed_idx
        ON event_outbox (created_at) WHERE status = 'COMPLETED'
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS processed_events (
        event_id     TEXT        NOT NULL,
        handler_name TEXT        NOT NULL,
        processed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (event_id, handler_name)
    )
    "#,
];

/// 执行建表语句
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    for statement in MIGRATIONS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

const RECORD_COLUMNS: &str = "id, event_type, event_version, payload, aggregate_type, aggregate_id, \
     correlation_id, causation_id, source, status, attempts, error, created_at, claimed_at, \
     claim_token, processed_at";

#[derive(FromRow)]
struct OutboxRow {
    id: String,
    event_type: String,
    event_version: String,
    payload: Value,
    aggregate_type: String,
    aggregate_id: String,
    correlation_id: String,
    causation_id: Option<String>,
    source: String,
    status: String,
    attempts: i32,
    error: Option<String>,
    created_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    claim_token: Option<String>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = DomainError;

    fn try_from(row: OutboxRow) -> Result<Self> {
        Ok(OutboxRecord {
            id: row.id,
            event_type: row.event_type,
            event_version: row.event_version.parse()?,
            payload: row.payload,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            correlation_id: row.correlation_id,
            causation_id: row.causation_id,
            source: row.source,
            status: row.status.parse()?,
            attempts: u32::try_from(row.attempts).map_err(|_| DomainError::Parse {
                reason: format!("negative attempts: {}", row.attempts),
            })?,
            error: row.error,
            created_at: row.created_at,
            claimed_at: row.claimed_at,
            claim_token: row.claim_token,
            processed_at: row.processed_at,
        })
    }
}

fn into_records(rows: Vec<OutboxRow>) -> Result<Vec<OutboxRecord>> {
    rows.into_iter().map(OutboxRecord::try_from).collect()
}

fn to_i32(value: u32, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| DomainError::invalid_value(format!("{what} out of range")))
}

fn to_i64(value: usize, what: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| DomainError::invalid_value(format!("{what} out of range")))
}

fn idempotency_error(err: sqlx::Error) -> DomainError {
    DomainError::idempotency_store(err.to_string())
}

#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 条件更新未命中时，区分记录不存在与状态不符
    async fn ensure_transitioned(&self, id: &str, rows: u64, transition: &str) -> Result<()> {
        if rows == 0 {
            return Err(self.transition_error(id, transition).await);
        }
        Ok(())
    }

    /// 带令牌的条件更新未命中时，PROCESSING 意味着认领已转交给他人
    async fn ensure_claimed(&self, id: &str, rows: u64, transition: &str) -> Result<()> {
        if rows == 0 {
            return Err(self.claim_error(id, transition).await);
        }
        Ok(())
    }

    async fn claim_error(&self, id: &str, transition: &str) -> DomainError {
        match self.find(id).await {
            Ok(Some(record)) if record.status() == OutboxStatus::Processing => lost_claim(id),
            _ => self.transition_error(id, transition).await,
        }
    }

    async fn transition_error(&self, id: &str, transition: &str) -> DomainError {
        match self.find(id).await {
            Ok(Some(record)) => DomainError::invalid_state(format!(
                "cannot {transition} outbox record {id} in status {}",
                record.status()
            )),
            Ok(None) => DomainError::not_found(format!("outbox record {id}")),
            Err(err) => err,
        }
    }
}

#[async_trait]
impl<'c> OutboxWriter<Transaction<'c, Postgres>> for PgOutboxStore {
    async fn enqueue(
        &self,
        tx: &mut Transaction<'c, Postgres>,
        record: NewOutboxRecord,
    ) -> Result<OutboxRecord> {
        let record = OutboxRecord::from_new(record, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO event_outbox
                (id, event_type, event_version, payload, aggregate_type, aggregate_id,
                 correlation_id, causation_id, source, status, attempts, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, $11)
            "#,
        )
        .bind(&record.id)
        .bind(&record.event_type)
        .bind(record.event_version.to_string())
        .bind(&record.payload)
        .bind(&record.aggregate_type)
        .bind(&record.aggregate_id)
        .bind(&record.correlation_id)
        .bind(&record.causation_id)
        .bind(&record.source)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&mut **tx)
        .await?;

        Ok(record)
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn claim_batch(&self, max_attempts: u32, limit: usize) -> Result<Vec<OutboxRecord>> {
        let sql = format!(
            r#"
            WITH picked AS (
                SELECT id FROM event_outbox
                WHERE status = 'PENDING' AND attempts < $1
                ORDER BY created_at ASC, id ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE event_outbox o
            SET status = 'PROCESSING', claimed_at = now(), claim_token = $3
            FROM picked
            WHERE o.id = picked.id
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let rows: Vec<OutboxRow> = sqlx::query_as(&sql)
            .bind(to_i32(max_attempts, "max_attempts")?)
            .bind(to_i64(limit, "limit")?)
            .bind(new_event_id())
            .fetch_all(&self.pool)
            .await?;

        // RETURNING 不保证顺序
        let mut records = into_records(rows)?;
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn touch(&self, id: &str, claim_token: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE event_outbox SET claimed_at = now() \
             WHERE id = $1 AND status = 'PROCESSING' AND claim_token = $2",
        )
        .bind(id)
        .bind(claim_token)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(&self, id: &str, claim_token: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE event_outbox SET status = 'COMPLETED', processed_at = now(), \
             claim_token = NULL WHERE id = $1 AND status = 'PROCESSING' AND claim_token = $2",
        )
        .bind(id)
        .bind(claim_token)
        .execute(&self.pool)
        .await?;

        self.ensure_claimed(id, result.rows_affected(), "complete")
            .await
    }

    async fn mark_failed(
        &self,
        id: &str,
        claim_token: &str,
        error: &str,
        max_attempts: u32,
    ) -> Result<OutboxStatus> {
        let status: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE event_outbox
            SET attempts = attempts + 1,
                error = $3,
                claimed_at = NULL,
                claim_token = NULL,
                status = CASE WHEN attempts + 1 >= $4 THEN 'FAILED' ELSE 'PENDING' END,
                processed_at = CASE WHEN attempts + 1 >= $4 THEN now() ELSE processed_at END
            WHERE id = $1 AND status = 'PROCESSING' AND claim_token = $2
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(claim_token)
        .bind(error)
        .bind(to_i32(max_attempts, "max_attempts")?)
        .fetch_optional(&self.pool)
        .await?;

        match status {
            Some(status) => status.parse(),
            None => Err(self.claim_error(id, "fail").await),
        }
    }

    async fn mark_rejected(&self, id: &str, claim_token: &str, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE event_outbox SET status = 'FAILED', attempts = attempts + 1, error = $3, \
             processed_at = now(), claim_token = NULL \
             WHERE id = $1 AND status = 'PROCESSING' AND claim_token = $2",
        )
        .bind(id)
        .bind(claim_token)
        .bind(error)
        .execute(&self.pool)
        .await?;

        self.ensure_claimed(id, result.rows_affected(), "reject")
            .await
    }

    async fn release(&self, id: &str, claim_token: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE event_outbox SET status = 'PENDING', claimed_at = NULL, claim_token = NULL \
             WHERE id = $1 AND status = 'PROCESSING' AND claim_token = $2",
        )
        .bind(id)
        .bind(claim_token)
        .execute(&self.pool)
        .await?;

        self.ensure_claimed(id, result.rows_affected(), "release")
            .await
    }

    async fn requeue_stuck(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query(
            r#"
            UPDATE event_outbox
            SET status = 'PENDING', claimed_at = NULL, claim_token = NULL
            WHERE status = 'PROCESSING' AND (claimed_at IS NULL OR claimed_at < $1)
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as usize)
    }

    async fn find_completed(&self, filter: &ReplayFilter) -> Result<Vec<OutboxRecord>> {
        let event_types: Option<Vec<String>> = filter
            .event_types()
            .filter(|types| !types.is_empty())
            .map(|types| types.to_vec());

        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM event_outbox
            WHERE status = 'COMPLETED'
              AND created_at >= $1 AND created_at < $2
              AND ($3::TEXT[] IS NULL OR event_type = ANY($3))
              AND ($4::TEXT IS NULL OR aggregate_id = $4)
            ORDER BY created_at ASC, id ASC
            "#
        );

        let rows: Vec<OutboxRow> = sqlx::query_as(&sql)
            .bind(filter.start())
            .bind(filter.end())
            .bind(event_types)
            .bind(filter.aggregate_id())
            .fetch_all(&self.pool)
            .await?;

        into_records(rows)
    }

    async fn find(&self, id: &str) -> Result<Option<OutboxRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM event_outbox WHERE id = $1");
        let row: Option<OutboxRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(OutboxRecord::try_from).transpose()
    }

    async fn list_by_status(
        &self,
        status: OutboxStatus,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM event_outbox WHERE status = $1 \
             ORDER BY created_at ASC, id ASC LIMIT $2"
        );
        let rows: Vec<OutboxRow> = sqlx::query_as(&sql)
            .bind(status.as_str())
            .bind(to_i64(limit, "limit")?)
            .fetch_all(&self.pool)
            .await?;

        into_records(rows)
    }

    async fn retry_failed(&self, id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE event_outbox SET status = 'PENDING', attempts = 0, claimed_at = NULL, \
             claim_token = NULL, processed_at = NULL WHERE id = $1 AND status = 'FAILED'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.ensure_transitioned(id, result.rows_affected(), "retry")
            .await
    }
}

#[derive(Clone)]
pub struct PgProcessedEvents {
    pool: PgPool,
}

impl PgProcessedEvents {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedEventStore for PgProcessedEvents {
    async fn is_processed(&self, event_id: &str, handler_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM processed_events WHERE event_id = $1 AND handler_name = $2)",
        )
        .bind(event_id)
        .bind(handler_name)
        .fetch_one(&self.pool)
        .await
        .map_err(idempotency_error)?;

        Ok(exists)
    }

    async fn mark_processed(&self, event_id: &str, handler_name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO processed_events (event_id, handler_name) VALUES ($1, $2) \
             ON CONFLICT (event_id, handler_name) DO NOTHING",
        )
        .bind(event_id)
        .bind(handler_name)
        .execute(&self.pool)
        .await
        .map_err(idempotency_error)?;

        Ok(())
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(idempotency_error)?;

        Ok(result.rows_affected() as usize)
    }
}
