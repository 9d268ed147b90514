//! Client side of the replicated SQL store
//!
//! Every workload shares one relation, `map (key INT, value INT)`. The
//! engine is reached through the [`Database`] and [`Transaction`] traits;
//! statements are a closed, typed set rather than SQL text.
//!
//! [`MemStore`] is the in-process engine used by the standalone node and
//! the tests. It mimics the replicated engine's locking model: readers
//! never block, a transaction takes the single writer lock at its first
//! write, and a writer that cannot get the lock within the busy timeout,
//! or whose snapshot went stale, fails with [`Error::Contention`].

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use crate::common::{Error, Result};

/// Schema of the shared relation.
pub const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS map (key INT, value INT)";

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
}

impl Value {
    /// Coerce to the integer column type. Text must hold a base-10 integer.
    fn to_column(&self) -> Result<Option<i64>> {
        match self {
            Value::Null => Ok(None),
            Value::Integer(v) => Ok(Some(*v)),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| Error::Storage(format!("datatype mismatch: {:?}", s))),
        }
    }

    fn to_required_column(&self) -> Result<i64> {
        self.to_column()?
            .ok_or_else(|| Error::Storage("NOT NULL constraint failed: map.value".into()))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// One row of `map`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub key: Option<i64>,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `INSERT INTO map(key, value) VALUES(?, ?)`
    Insert { key: Value, value: Value },
    /// `UPDATE map SET value = value - ? WHERE key = ?`
    Debit { key: Value, amount: Value },
    /// `UPDATE map SET value = value + ? WHERE key = ?`
    Credit { key: Value, amount: Value },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// `SELECT key, value FROM map WHERE key = ?`, in insertion order
    ByKey(Value),
    /// `SELECT key, value FROM map`, in insertion order
    All,
}

#[async_trait]
pub trait Transaction: Send {
    /// Execute a statement, returning the number of affected rows.
    async fn exec(&mut self, stmt: &Statement) -> Result<u64>;
    async fn query(&mut self, query: &Query) -> Result<Vec<Entry>>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait Database: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Run [`SCHEMA`]. Idempotent; fails with `Contention` while another
    /// writer holds the lock.
    async fn create_schema(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Execute a single statement in its own transaction.
    async fn exec(&self, stmt: &Statement) -> Result<u64> {
        let mut tx = self.begin().await?;
        let result = tx.exec(stmt).await;
        complete_tx(tx, result).await
    }

    /// Run a single query in its own transaction.
    async fn query(&self, query: &Query) -> Result<Vec<Entry>> {
        let mut tx = self.begin().await?;
        let result = tx.query(query).await;
        complete_tx(tx, result).await
    }
}

/// Commit `tx` when `result` is a success, roll it back otherwise.
///
/// A failed rollback is logged; the caller always sees the original error.
pub async fn complete_tx<T>(tx: Box<dyn Transaction>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

#[derive(Debug, Default)]
struct TableState {
    /// `None` until the schema has been created.
    rows: Option<Vec<Entry>>,
    /// Bumped by every committed write.
    version: u64,
}

#[derive(Debug)]
struct MemInner {
    state: Mutex<TableState>,
    writer: Arc<tokio::sync::Mutex<()>>,
    busy_timeout: Duration,
    closed: AtomicBool,
}

impl MemInner {
    fn state(&self) -> std::sync::MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Storage("database is closed".into()));
        }
        Ok(())
    }

    async fn acquire_writer(&self) -> Result<OwnedMutexGuard<()>> {
        if self.busy_timeout.is_zero() {
            return self
                .writer
                .clone()
                .try_lock_owned()
                .map_err(|_| Error::Contention);
        }
        tokio::time::timeout(self.busy_timeout, self.writer.clone().lock_owned())
            .await
            .map_err(|_| Error::Contention)
    }
}

/// In-process engine for the `map` relation.
#[derive(Debug, Clone)]
pub struct MemStore {
    inner: Arc<MemInner>,
}

impl MemStore {
    /// A store whose writers fail immediately when the lock is taken.
    pub fn new() -> Self {
        Self::with_busy_timeout(Duration::ZERO)
    }

    pub fn with_busy_timeout(busy_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(MemInner {
                state: Mutex::new(TableState::default()),
                writer: Arc::new(tokio::sync::Mutex::new(())),
                busy_timeout,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Committed rows, in insertion order.
    pub fn snapshot(&self) -> Vec<Entry> {
        self.inner.state().rows.clone().unwrap_or_default()
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for MemStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.inner.check_open()?;
        let (rows, version) = {
            let state = self.inner.state();
            (state.rows.clone(), state.version)
        };
        Ok(Box::new(MemTransaction {
            inner: self.inner.clone(),
            version,
            rows,
            writer: None,
            dirty: false,
        }))
    }

    async fn create_schema(&self) -> Result<()> {
        self.inner.check_open()?;
        let _guard = self.inner.acquire_writer().await?;
        let mut state = self.inner.state();
        if state.rows.is_none() {
            state.rows = Some(Vec::new());
            state.version += 1;
            tracing::debug!("{}", SCHEMA);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Snapshot transaction over [`MemStore`]. Dropping it without committing
/// discards its writes and releases the writer lock.
struct MemTransaction {
    inner: Arc<MemInner>,
    version: u64,
    rows: Option<Vec<Entry>>,
    writer: Option<OwnedMutexGuard<()>>,
    dirty: bool,
}

impl MemTransaction {
    fn table(&self) -> Result<&Vec<Entry>> {
        self.rows
            .as_ref()
            .ok_or_else(|| Error::Storage("no such table: map".into()))
    }

    fn table_mut(&mut self) -> Result<&mut Vec<Entry>> {
        self.rows
            .as_mut()
            .ok_or_else(|| Error::Storage("no such table: map".into()))
    }

    async fn upgrade_to_writer(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }
        let guard = self.inner.acquire_writer().await?;
        if self.inner.state().version != self.version {
            // Someone committed since our snapshot was taken.
            return Err(Error::Contention);
        }
        self.writer = Some(guard);
        Ok(())
    }

    fn adjust(&mut self, key: &Value, amount: &Value, sign: i64) -> Result<u64> {
        let key = key.to_column()?;
        let amount = amount.to_required_column()?;
        let Some(key) = key else {
            // `key = NULL` never matches.
            return Ok(0);
        };
        let delta = amount
            .checked_mul(sign)
            .ok_or_else(|| Error::Storage("integer overflow".into()))?;

        let mut updated = Vec::new();
        for (i, entry) in self.table()?.iter().enumerate() {
            if entry.key == Some(key) {
                let value = entry
                    .value
                    .checked_add(delta)
                    .ok_or_else(|| Error::Storage("integer overflow".into()))?;
                updated.push((i, value));
            }
        }

        let table = self.table_mut()?;
        for (i, value) in &updated {
            table[*i].value = *value;
        }
        Ok(updated.len() as u64)
    }
}

#[async_trait]
impl Transaction for MemTransaction {
    async fn exec(&mut self, stmt: &Statement) -> Result<u64> {
        self.inner.check_open()?;
        self.table()?;
        self.upgrade_to_writer().await?;

        let affected = match stmt {
            Statement::Insert { key, value } => {
                let entry = Entry {
                    key: key.to_column()?,
                    value: value.to_required_column()?,
                };
                self.table_mut()?.push(entry);
                1
            }
            Statement::Debit { key, amount } => self.adjust(key, amount, -1)?,
            Statement::Credit { key, amount } => self.adjust(key, amount, 1)?,
        };
        self.dirty = true;
        Ok(affected)
    }

    async fn query(&mut self, query: &Query) -> Result<Vec<Entry>> {
        self.inner.check_open()?;
        let table = self.table()?;
        match query {
            Query::All => Ok(table.clone()),
            Query::ByKey(key) => {
                let Some(key) = key.to_column()? else {
                    return Ok(Vec::new());
                };
                Ok(table
                    .iter()
                    .filter(|e| e.key == Some(key))
                    .copied()
                    .collect())
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut tx = *self;
        tx.inner.check_open()?;
        if tx.dirty {
            let mut state = tx.inner.state();
            state.rows = tx.rows.take();
            state.version += 1;
        }
        // Releasing the writer lock publishes the commit to other writers.
        tx.writer = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> MemStore {
        let store = MemStore::new();
        store.create_schema().await.unwrap();
        store
    }

    fn insert(key: i64, value: i64) -> Statement {
        Statement::Insert {
            key: key.into(),
            value: value.into(),
        }
    }

    #[tokio::test]
    async fn test_missing_schema() {
        let store = MemStore::new();
        let err = store.exec(&insert(1, 1)).await.unwrap_err();
        assert!(matches!(err, Error::Storage(msg) if msg.contains("no such table")));
    }

    #[tokio::test]
    async fn test_text_coercion() {
        let store = store().await;
        store
            .exec(&Statement::Insert {
                key: "7".into(),
                value: " 42 ".into(),
            })
            .await
            .unwrap();
        let err = store
            .exec(&Statement::Insert {
                key: "x".into(),
                value: "1".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(
            store.snapshot(),
            vec![Entry {
                key: Some(7),
                value: 42
            }]
        );
    }

    #[tokio::test]
    async fn test_read_your_writes_and_rollback() {
        let store = store().await;
        let mut tx = store.begin().await.unwrap();
        tx.exec(&insert(1, 10)).await.unwrap();
        let rows = tx.query(&Query::ByKey(1.into())).await.unwrap();
        assert_eq!(rows.len(), 1);
        tx.rollback().await.unwrap();

        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_second_writer_is_contended() {
        let store = store().await;
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();

        first.exec(&insert(1, 1)).await.unwrap();
        let err = second.exec(&insert(2, 2)).await.unwrap_err();
        assert!(err.is_contention());

        first.commit().await.unwrap();
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_contended() {
        let store = store().await;
        let mut stale = store.begin().await.unwrap();
        store.exec(&insert(1, 1)).await.unwrap();

        let err = stale.exec(&insert(2, 2)).await.unwrap_err();
        assert!(err.is_contention());
    }

    #[tokio::test]
    async fn test_busy_timeout_waits_for_writer() {
        let store = MemStore::with_busy_timeout(Duration::from_secs(1));
        store.create_schema().await.unwrap();

        let mut first = store.begin().await.unwrap();
        first.exec(&insert(1, 1)).await.unwrap();
        let writer = tokio::spawn({
            let store = store.clone();
            async move { store.create_schema().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        first.commit().await.unwrap();

        writer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_debit_credit() {
        let store = store().await;
        store.exec(&insert(1, 50)).await.unwrap();
        store.exec(&insert(2, 50)).await.unwrap();

        let debited = store
            .exec(&Statement::Debit {
                key: 1.into(),
                amount: 70.into(),
            })
            .await
            .unwrap();
        let credited = store
            .exec(&Statement::Credit {
                key: 3.into(),
                amount: 70.into(),
            })
            .await
            .unwrap();
        assert_eq!((debited, credited), (1, 0));
        assert_eq!(store.snapshot()[0].value, -20);
    }

    #[tokio::test]
    async fn test_closed_store() {
        let store = store().await;
        store.close().await.unwrap();
        assert!(store.begin().await.is_err());
    }
}
