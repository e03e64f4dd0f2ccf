//! In-process implementation of the storage ports.
//!
//! Each user's row has its own async mutex. A transaction holds the owned
//! guard from `locked_read` until it commits or is dropped, so operations
//! on one user serialize while different users never contend. Writes are
//! staged in the transaction and published together with its audit entries.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use tally_shared::types::{AlertId, PageRequest, PageResponse, UserId};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{AlertStore, AuditLog, LedgerStore, LedgerTransaction, StoreError};
use crate::alert::{Alert, AlertKind, AlertStatus};
use crate::balance::{Balance, BalanceDelta, BalanceGuard, LedgerEntry, OperationKind};

/// Default bound on how long a locked read waits.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

struct Inner {
    rows: DashMap<UserId, Balance>,
    locks: DashMap<UserId, Arc<Mutex<()>>>,
    entries: RwLock<Vec<LedgerEntry>>,
    alerts: RwLock<Vec<Alert>>,
    lock_timeout: Duration,
}

impl Inner {
    fn lock_handle(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let handle = self.locks.entry(user_id).or_default();
        Arc::clone(handle.value())
    }

    async fn acquire(&self, user_id: UserId) -> Result<OwnedMutexGuard<()>, StoreError> {
        let handle = self.lock_handle(user_id);
        tokio::time::timeout(self.lock_timeout, handle.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout(user_id))
    }
}

fn poisoned(what: &str) -> StoreError {
    StoreError::Internal(format!("{what} lock poisoned"))
}

/// In-memory ledger, audit log, and alert store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Creates an empty store with the default lock timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Creates an empty store whose locked reads give up after `lock_timeout`.
    #[must_use]
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                rows: DashMap::new(),
                locks: DashMap::new(),
                entries: RwLock::new(Vec::new()),
                alerts: RwLock::new(Vec::new()),
                lock_timeout,
            }),
        }
    }

    /// Overwrites a row outside the ledger to seed corrupted or legacy rows.
    ///
    /// Takes the row lock, so it waits for in-flight transactions on the user.
    #[cfg(test)]
    pub(crate) async fn put_balance(&self, balance: Balance) -> Result<(), StoreError> {
        let _guard = self.inner.acquire(balance.user_id).await?;
        self.inner.rows.insert(balance.user_id, balance);
        Ok(())
    }

    /// Number of committed audit entries.
    pub fn entry_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.entries.read().map_err(|_| poisoned("audit log"))?.len())
    }

    /// Snapshot of every stored alert, oldest first.
    pub fn alerts(&self) -> Result<Vec<Alert>, StoreError> {
        Ok(self.inner.alerts.read().map_err(|_| poisoned("alert"))?.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("rows", &self.inner.rows.len())
            .field("lock_timeout", &self.inner.lock_timeout)
            .finish_non_exhaustive()
    }
}

struct LockedRow {
    _guard: OwnedMutexGuard<()>,
    staged: Balance,
}

/// Transaction over a [`MemoryStore`].
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    rows: HashMap<UserId, LockedRow>,
    entries: Vec<LedgerEntry>,
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn locked_read(&mut self, user_id: UserId) -> Result<Balance, StoreError> {
        if let Some(row) = self.rows.get(&user_id) {
            return Ok(row.staged.clone());
        }

        let guard = self.inner.acquire(user_id).await?;
        let current = self
            .inner
            .rows
            .entry(user_id)
            .or_insert_with(|| Balance::zero(user_id))
            .value()
            .clone();

        self.rows.insert(
            user_id,
            LockedRow {
                _guard: guard,
                staged: current.clone(),
            },
        );
        Ok(current)
    }

    async fn conditional_update(
        &mut self,
        user_id: UserId,
        guard: &BalanceGuard,
        delta: &BalanceDelta,
    ) -> Result<u64, StoreError> {
        if !self.rows.contains_key(&user_id) {
            self.locked_read(user_id).await?;
        }
        let row = self
            .rows
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::Internal(format!("row for user {user_id} not locked")))?;

        if !guard.holds(&row.staged) {
            return Ok(0);
        }

        let mut next = delta.apply(&row.staged).ok_or_else(|| {
            StoreError::Internal(format!("update for user {user_id} leaves the storable range"))
        })?;
        next.updated_at = Utc::now();
        row.staged = next;
        Ok(1)
    }

    async fn recharged_since(
        &mut self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> Result<Decimal, StoreError> {
        let is_match = |e: &&LedgerEntry| {
            e.user_id == user_id && e.kind == OperationKind::Recharge && e.created_at >= since
        };
        let total = |acc: Decimal, e: &LedgerEntry| acc.saturating_add(e.amount);
        let committed = self
            .inner
            .entries
            .read()
            .map_err(|_| poisoned("audit log"))?
            .iter()
            .filter(is_match)
            .fold(Decimal::ZERO, total);
        Ok(self.entries.iter().filter(is_match).fold(committed, total))
    }

    async fn append_entry(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.entries.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self {
            inner,
            rows,
            entries,
        } = *self;

        // Row guards stay held until both the log and the rows are published.
        inner
            .entries
            .write()
            .map_err(|_| poisoned("audit log"))?
            .extend(entries);
        for (user_id, row) in &rows {
            inner.rows.insert(*user_id, row.staged.clone());
        }
        drop(rows);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        drop(self);
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            rows: HashMap::new(),
            entries: Vec::new(),
        }))
    }

    async fn find_balance(&self, user_id: UserId) -> Result<Option<Balance>, StoreError> {
        Ok(self.inner.rows.get(&user_id).map(|row| row.value().clone()))
    }

    async fn list_balances(&self, page: PageRequest) -> Result<Vec<Balance>, StoreError> {
        let mut rows: Vec<Balance> = self
            .inner
            .rows
            .iter()
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by_key(|row| row.user_id);
        Ok(paginate(rows, page))
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn query_recent(
        &self,
        user_id: UserId,
        kind: OperationKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut found: Vec<LedgerEntry> = self
            .inner
            .entries
            .read()
            .map_err(|_| poisoned("audit log"))?
            .iter()
            .filter(|e| e.user_id == user_id && e.kind == kind && e.created_at >= since)
            .cloned()
            .collect();
        found.sort_by_key(|e| (e.created_at, e.id));
        Ok(found)
    }

    async fn history(
        &self,
        user_id: UserId,
        page: PageRequest,
        kind: Option<OperationKind>,
    ) -> Result<PageResponse<LedgerEntry>, StoreError> {
        let mut found: Vec<LedgerEntry> = self
            .inner
            .entries
            .read()
            .map_err(|_| poisoned("audit log"))?
            .iter()
            .filter(|e| e.user_id == user_id && kind.is_none_or(|k| e.kind == k))
            .cloned()
            .collect();
        found.sort_by_key(|e| std::cmp::Reverse((e.created_at, e.id)));
        let total = found.len() as u64;
        Ok(PageResponse::new(
            paginate(found, page),
            page.page,
            page.per_page,
            total,
        ))
    }

    async fn find_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut found: Vec<LedgerEntry> = self
            .inner
            .entries
            .read()
            .map_err(|_| poisoned("audit log"))?
            .iter()
            .filter(|e| e.correlation_id.as_deref() == Some(correlation_id))
            .cloned()
            .collect();
        found.sort_by_key(|e| (e.created_at, e.id));
        Ok(found)
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        self.inner
            .alerts
            .write()
            .map_err(|_| poisoned("alert"))?
            .push(alert.clone());
        Ok(())
    }

    async fn has_pending_since(
        &self,
        user_id: UserId,
        kind: AlertKind,
        since: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .alerts
            .read()
            .map_err(|_| poisoned("alert"))?
            .iter()
            .any(|a| a.user_id == user_id && a.kind == kind && a.is_pending() && a.created_at >= since))
    }

    async fn list_alerts(
        &self,
        user_id: Option<UserId>,
        status: Option<AlertStatus>,
        page: PageRequest,
    ) -> Result<PageResponse<Alert>, StoreError> {
        let mut found: Vec<Alert> = self
            .inner
            .alerts
            .read()
            .map_err(|_| poisoned("alert"))?
            .iter()
            .filter(|a| user_id.is_none_or(|u| a.user_id == u))
            .filter(|a| status.is_none_or(|s| a.status == s))
            .cloned()
            .collect();
        found.sort_by_key(|a| std::cmp::Reverse((a.created_at, a.id)));
        let total = found.len() as u64;
        Ok(PageResponse::new(
            paginate(found, page),
            page.page,
            page.per_page,
            total,
        ))
    }

    async fn acknowledge(&self, alert_id: AlertId) -> Result<bool, StoreError> {
        let mut alerts = self.inner.alerts.write().map_err(|_| poisoned("alert"))?;
        match alerts.iter_mut().find(|a| a.id == alert_id && a.is_pending()) {
            Some(alert) => {
                alert.status = AlertStatus::Acknowledged;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn paginate<T>(items: Vec<T>, page: PageRequest) -> Vec<T> {
    let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
    let limit = usize::try_from(page.limit()).unwrap_or(usize::MAX);
    items.into_iter().skip(offset).take(limit).collect()
}
