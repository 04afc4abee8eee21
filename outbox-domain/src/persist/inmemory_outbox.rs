//! 内存版 Outbox 存储（InMemoryOutboxStore）
//!
//! 以单把互斥锁保护整张表，认领在一次加锁内完成“选取 + 迁移”，
//! 因此并发认领天然互斥。`InMemoryTransaction` 把业务写入与 Outbox 记录暂存起来，
//! 在 `commit` 时于同一临界区内一并生效；未提交即丢弃时二者都不会出现。
//!
//! 典型用途：测试环境、示例与本地开发。
//!
use super::outbox_record::{NewOutboxRecord, OutboxRecord, OutboxStatus};
use super::outbox_store::{OutboxStore, OutboxWriter, ReplayFilter};
use crate::domain_event::new_event_id;
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct OutboxTable {
    // 按提交顺序追加
    records: Vec<OutboxRecord>,
}

impl OutboxTable {
    fn get_mut(&mut self, id: &str) -> Result<&mut OutboxRecord> {
        self.records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| DomainError::not_found(format!("outbox record {id}")))
    }

    fn sorted_by_creation<'a>(
        &'a self,
        mut pred: impl FnMut(&OutboxRecord) -> bool,
    ) -> Vec<&'a OutboxRecord> {
        let mut picked: Vec<&OutboxRecord> = self.records.iter().filter(|&r| pred(r)).collect();
        // 稳定排序：created_at 相同时保持提交顺序
        picked.sort_by_key(|r| r.created_at);
        picked
    }
}

#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    table: Arc<Mutex<OutboxTable>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开启一个事务作用域
    pub fn begin(&self) -> InMemoryTransaction {
        InMemoryTransaction {
            table: self.table.clone(),
            staged: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// 全部记录（按提交顺序），便于审计与断言
    pub fn records(&self) -> Result<Vec<OutboxRecord>> {
        Ok(self.lock()?.records.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, OutboxTable>> {
        lock_table(&self.table)
    }
}

fn lock_table(table: &Mutex<OutboxTable>) -> Result<MutexGuard<'_, OutboxTable>> {
    table
        .lock()
        .map_err(|_| DomainError::outbox_store("outbox table lock poisoned"))
}

type DeferredWrite = Box<dyn FnOnce() + Send>;

/// 内存事务：暂存业务写入与 Outbox 记录，`commit` 时原子生效
pub struct InMemoryTransaction {
    table: Arc<Mutex<OutboxTable>>,
    staged: Vec<OutboxRecord>,
    writes: Vec<DeferredWrite>,
}

impl InMemoryTransaction {
    /// 登记一笔业务状态写入，仅在提交时执行
    pub fn defer(&mut self, write: impl FnOnce() + Send + 'static) {
        self.writes.push(Box::new(write));
    }

    pub fn staged(&self) -> &[OutboxRecord] {
        &self.staged
    }

    /// 提交：业务写入与 Outbox 记录在同一临界区内生效，返回写入的记录数
    pub fn commit(self) -> Result<usize> {
        let InMemoryTransaction {
            table,
            staged,
            writes,
        } = self;

        let mut guard = lock_table(&table)?;
        for write in writes {
            write();
        }
        let count = staged.len();
        guard.records.extend(staged);
        Ok(count)
    }

    /// 回滚：丢弃所有暂存内容
    pub fn rollback(self) {}
}

#[async_trait]
impl OutboxWriter<InMemoryTransaction> for InMemoryOutboxStore {
    async fn enqueue(
        &self,
        tx: &mut InMemoryTransaction,
        record: NewOutboxRecord,
    ) -> Result<OutboxRecord> {
        if !Arc::ptr_eq(&tx.table, &self.table) {
            return Err(DomainError::invalid_state(
                "transaction was opened on a different outbox store",
            ));
        }

        let record = OutboxRecord::from_new(record, Utc::now());
        tx.staged.push(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn claim_batch(&self, max_attempts: u32, limit: usize) -> Result<Vec<OutboxRecord>> {
        let mut table = self.lock()?;
        let now = Utc::now();
        let token = new_event_id();

        let ids: Vec<String> = table
            .sorted_by_creation(|r| r.is_claimable(max_attempts))
            .into_iter()
            .take(limit)
            .map(|r| r.id.clone())
            .collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            let record = table.get_mut(&id)?;
            record.claim(&token, now)?;
            claimed.push(record.clone());
        }

        Ok(claimed)
    }

    async fn touch(&self, id: &str, claim_token: &str) -> Result<bool> {
        let mut table = self.lock()?;
        match table.get_mut(id)?.touch(claim_token, Utc::now()) {
            Ok(()) => Ok(true),
            Err(DomainError::InvalidState { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn mark_completed(&self, id: &str, claim_token: &str) -> Result<()> {
        self.lock()?.get_mut(id)?.complete(claim_token, Utc::now())
    }

    async fn mark_failed(
        &self,
        id: &str,
        claim_token: &str,
        error: &str,
        max_attempts: u32,
    ) -> Result<OutboxStatus> {
        self.lock()?
            .get_mut(id)?
            .fail(claim_token, error, max_attempts, Utc::now())
    }

    async fn mark_rejected(&self, id: &str, claim_token: &str, error: &str) -> Result<()> {
        self.lock()?
            .get_mut(id)?
            .reject(claim_token, error, Utc::now())
    }

    async fn release(&self, id: &str, claim_token: &str) -> Result<()> {
        self.lock()?.get_mut(id)?.release(claim_token)
    }

    async fn requeue_stuck(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut table = self.lock()?;
        let mut requeued = 0;
        for record in table.records.iter_mut().filter(|r| r.is_stuck(older_than)) {
            record.requeue()?;
            requeued += 1;
        }
        Ok(requeued)
    }

    async fn find_completed(&self, filter: &ReplayFilter) -> Result<Vec<OutboxRecord>> {
        let table = self.lock()?;
        Ok(table
            .sorted_by_creation(|r| filter.matches(r))
            .into_iter()
            .cloned()
            .collect())
    }

    async fn find(&self, id: &str) -> Result<Option<OutboxRecord>> {
        Ok(self.lock()?.records.iter().find(|r| r.id == id).cloned())
    }

    async fn list_by_status(
        &self,
        status: OutboxStatus,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>> {
        let table = self.lock()?;
        Ok(table
            .sorted_by_creation(|r| r.status == status)
            .into_iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn retry_failed(&self, id: &str) -> Result<()> {
        self.lock()?.get_mut(id)?.retry()
    }
}
