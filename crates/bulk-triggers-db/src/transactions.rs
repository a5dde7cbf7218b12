//! Transaction support.
//!
//! [`TransactionManager`] wraps a shared [`DbExecutor`] and tracks the
//! nesting depth of atomic blocks, the stack of open savepoints and the
//! callbacks waiting for the outermost commit. The [`atomic()`] function is
//! the entry point: it begins a transaction (or a savepoint when one is
//! already open), awaits the given future, then commits on `Ok` and rolls
//! back on `Err`.
//!
//! Clones of a `TransactionManager` share their state, so every layer of a
//! nested operation sees the same transaction.
//!
//! # Examples
//!
//! ```ignore
//! use bulk_triggers_db::transactions::{atomic, TransactionManager};
//!
//! let txn = TransactionManager::new(db);
//! let created = atomic(&txn, async {
//!     txn.execute_sql("INSERT INTO crm_account (name) VALUES (?)", &[name.into()]).await?;
//!     Ok("created")
//! })
//! .await?;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bulk_triggers_core::{TriggerError, TriggerResult};
use tokio::sync::Mutex;

use crate::executor::DbExecutor;
use crate::query::compiler::DatabaseBackendType;
use crate::row::Row;
use crate::value::Value;

static SAVEPOINT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn savepoint_name() -> String {
    format!("sp_{}", SAVEPOINT_COUNTER.fetch_add(1, Ordering::Relaxed))
}

type OnCommitCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct TxnState {
    /// 0 = no transaction, 1 = outermost, 2+ = savepoints.
    depth: u32,
    savepoints: Vec<String>,
    /// Callbacks tagged with the depth they were registered at.
    on_commit: Vec<(u32, OnCommitCallback)>,
}

/// Manages transaction state for a shared executor.
#[derive(Clone)]
pub struct TransactionManager {
    db: Arc<dyn DbExecutor>,
    state: Arc<Mutex<TxnState>>,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("backend", &self.db.backend_type())
            .finish_non_exhaustive()
    }
}

impl TransactionManager {
    pub fn new(db: Arc<dyn DbExecutor>) -> Self {
        Self {
            db,
            state: Arc::new(Mutex::new(TxnState::default())),
        }
    }

    /// Returns the current nesting depth.
    pub async fn depth(&self) -> u32 {
        self.state.lock().await.depth
    }

    pub async fn in_transaction(&self) -> bool {
        self.depth().await > 0
    }

    /// Returns the wrapped executor.
    pub fn executor(&self) -> &Arc<dyn DbExecutor> {
        &self.db
    }

    /// Begins a transaction, or creates a savepoint inside an open one.
    pub async fn begin(&self) -> TriggerResult<()> {
        let mut state = self.state.lock().await;
        if state.depth == 0 {
            self.db.execute_sql("BEGIN", &[]).await?;
        } else {
            let name = savepoint_name();
            self.db
                .execute_sql(&format!("SAVEPOINT {name}"), &[])
                .await?;
            state.savepoints.push(name);
        }
        state.depth += 1;
        Ok(())
    }

    /// Commits the outermost transaction, or releases the innermost savepoint.
    ///
    /// Commit callbacks run after the outermost COMMIT. Releasing a
    /// savepoint hands its callbacks to the enclosing level.
    pub async fn commit(&self) -> TriggerResult<()> {
        let mut state = self.state.lock().await;
        match state.depth {
            0 => Err(TriggerError::DatabaseError(
                "Cannot commit: not in a transaction".to_string(),
            )),
            1 => {
                self.db.execute_sql("COMMIT", &[]).await?;
                state.depth = 0;
                let callbacks = std::mem::take(&mut state.on_commit);
                drop(state);
                for (_, callback) in callbacks {
                    callback();
                }
                Ok(())
            }
            depth => {
                if let Some(name) = state.savepoints.pop() {
                    self.db
                        .execute_sql(&format!("RELEASE SAVEPOINT {name}"), &[])
                        .await?;
                }
                for (level, _) in &mut state.on_commit {
                    if *level == depth {
                        *level = depth - 1;
                    }
                }
                state.depth -= 1;
                Ok(())
            }
        }
    }

    /// Rolls back the outermost transaction, or the innermost savepoint.
    ///
    /// Callbacks registered inside the rolled-back level are discarded.
    pub async fn rollback(&self) -> TriggerResult<()> {
        let mut state = self.state.lock().await;
        match state.depth {
            0 => Err(TriggerError::DatabaseError(
                "Cannot rollback: not in a transaction".to_string(),
            )),
            1 => {
                state.depth = 0;
                state.on_commit.clear();
                self.db.execute_sql("ROLLBACK", &[]).await?;
                Ok(())
            }
            depth => {
                state.on_commit.retain(|(level, _)| *level < depth);
                state.depth -= 1;
                if let Some(name) = state.savepoints.pop() {
                    self.db
                        .execute_sql(&format!("ROLLBACK TO SAVEPOINT {name}"), &[])
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Registers a callback to run after the outermost transaction commits.
    ///
    /// Outside a transaction the callback runs immediately.
    pub async fn on_commit<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock().await;
        if state.depth == 0 {
            drop(state);
            callback();
        } else {
            let depth = state.depth;
            state.on_commit.push((depth, Box::new(callback)));
        }
    }

    /// Returns the number of callbacks waiting for commit.
    pub async fn pending_callbacks(&self) -> usize {
        self.state.lock().await.on_commit.len()
    }
}

#[async_trait::async_trait]
impl DbExecutor for TransactionManager {
    fn backend_type(&self) -> DatabaseBackendType {
        self.db.backend_type()
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> TriggerResult<u64> {
        self.db.execute_sql(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> TriggerResult<Vec<Row>> {
        self.db.query(sql, params).await
    }

    async fn query_one(&self, sql: &str, params: &[Value]) -> TriggerResult<Row> {
        self.db.query_one(sql, params).await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> TriggerResult<Value> {
        self.db.insert_returning_id(sql, params).await
    }

    fn supports_returning(&self) -> bool {
        self.db.supports_returning()
    }
}

/// Runs `body` inside a transaction on `txn`.
///
/// Commits when `body` resolves to `Ok` and rolls back when it resolves to
/// `Err`. Nested calls use savepoints. A failed rollback is logged and the
/// original error is returned.
pub async fn atomic<T, F>(txn: &TransactionManager, body: F) -> TriggerResult<T>
where
    F: Future<Output = TriggerResult<T>>,
{
    txn.begin().await?;
    match body.await {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::testing::MockDb;

    fn manager() -> (Arc<MockDb>, TransactionManager) {
        let db = Arc::new(MockDb::new(DatabaseBackendType::SQLite));
        let txn = TransactionManager::new(db.clone());
        (db, txn)
    }

    #[tokio::test]
    async fn test_basic_transaction_commit() {
        let (db, txn) = manager();
        let result = atomic(&txn, async {
            txn.execute_sql("INSERT INTO t (a) VALUES (1)", &[]).await?;
            Ok(42)
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(
            db.statements().await,
            vec!["BEGIN", "INSERT INTO t (a) VALUES (1)", "COMMIT"]
        );
        assert_eq!(txn.depth().await, 0);
    }

    #[tokio::test]
    async fn test_basic_transaction_rollback() {
        let (db, txn) = manager();
        let result: TriggerResult<()> = atomic(&txn, async {
            Err(TriggerError::DatabaseError("boom".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(db.statements().await, vec!["BEGIN", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn test_nested_uses_savepoints() {
        let (db, txn) = manager();
        atomic(&txn, async {
            assert_eq!(txn.depth().await, 1);
            atomic(&txn, async {
                assert_eq!(txn.depth().await, 2);
                Ok(())
            })
            .await
        })
        .await
        .unwrap();

        let stmts = db.statements().await;
        assert_eq!(stmts.len(), 4);
        assert_eq!(stmts[0], "BEGIN");
        assert!(stmts[1].starts_with("SAVEPOINT sp_"));
        assert!(stmts[2].starts_with("RELEASE SAVEPOINT sp_"));
        assert_eq!(stmts[3], "COMMIT");
    }

    #[tokio::test]
    async fn test_nested_error_rolls_back_everything() {
        let (db, txn) = manager();
        let result: TriggerResult<()> = atomic(&txn, async {
            atomic(&txn, async { Err(TriggerError::IntegrityError("dup".into())) }).await
        })
        .await;

        assert!(matches!(result, Err(TriggerError::IntegrityError(_))));
        let stmts = db.statements().await;
        assert!(stmts[2].starts_with("ROLLBACK TO SAVEPOINT sp_"));
        assert_eq!(stmts[3], "ROLLBACK");
    }

    #[tokio::test]
    async fn test_on_commit_runs_after_outermost_commit() {
        let (_db, txn) = manager();
        let counter = Arc::new(AtomicUsize::new(0));

        atomic(&txn, async {
            let c = counter.clone();
            atomic(&txn, async {
                txn.on_commit(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .await;
                Ok(())
            })
            .await?;
            assert_eq!(counter.load(Ordering::SeqCst), 0);
            assert_eq!(txn.pending_callbacks().await, 1);
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(txn.pending_callbacks().await, 0);
    }

    #[tokio::test]
    async fn test_on_commit_discarded_with_savepoint_rollback() {
        let (_db, txn) = manager();
        let counter = Arc::new(AtomicUsize::new(0));

        atomic(&txn, async {
            let c = counter.clone();
            let inner: TriggerResult<()> = atomic(&txn, async {
                txn.on_commit(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .await;
                Err(TriggerError::DatabaseError("inner".into()))
            })
            .await;
            assert!(inner.is_err());
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_on_commit_outside_transaction_runs_immediately() {
        let (_db, txn) = manager();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        txn.on_commit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_commit_without_transaction_fails() {
        let (_db, txn) = manager();
        assert!(txn.commit().await.is_err());
        assert!(txn.rollback().await.is_err());
    }
}
