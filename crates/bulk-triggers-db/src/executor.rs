//! The async database executor seam.
//!
//! [`DbExecutor`] is the minimal interface the ORM layer needs from a storage
//! backend. Query sets, bulk writes and the trigger engine all take
//! `&dyn DbExecutor`; backends in `bulk-triggers-db-backends` implement it.

use bulk_triggers_core::{TriggerError, TriggerResult};

use crate::query::compiler::DatabaseBackendType;
use crate::row::Row;
use crate::value::Value;

/// Minimal async database executor.
#[async_trait::async_trait]
pub trait DbExecutor: Send + Sync {
    /// Returns the backend type for SQL compilation.
    fn backend_type(&self) -> DatabaseBackendType;

    /// Runs a statement that does not return rows. Returns rows affected.
    async fn execute_sql(&self, sql: &str, params: &[Value]) -> TriggerResult<u64>;

    /// Runs a query and returns all result rows.
    async fn query(&self, sql: &str, params: &[Value]) -> TriggerResult<Vec<Row>>;

    /// Runs a query that must return exactly one row.
    ///
    /// Returns `DoesNotExist` for no rows and `MultipleObjectsReturned` for
    /// more than one.
    async fn query_one(&self, sql: &str, params: &[Value]) -> TriggerResult<Row> {
        let mut rows = self.query(sql, params).await?;
        match rows.len() {
            0 => Err(TriggerError::DoesNotExist("Query returned no rows".to_string())),
            1 => Ok(rows.remove(0)),
            n => Err(TriggerError::MultipleObjectsReturned(format!(
                "Query returned {n} rows, expected 1"
            ))),
        }
    }

    /// Executes a single-row INSERT and returns the new primary key.
    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> TriggerResult<Value>;

    /// Whether multi-row INSERTs can report generated keys with `RETURNING`.
    fn supports_returning(&self) -> bool {
        !matches!(self.backend_type(), DatabaseBackendType::MySQL)
    }
}

#[async_trait::async_trait]
impl<T: DbExecutor + ?Sized> DbExecutor for std::sync::Arc<T> {
    fn backend_type(&self) -> DatabaseBackendType {
        (**self).backend_type()
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> TriggerResult<u64> {
        (**self).execute_sql(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> TriggerResult<Vec<Row>> {
        (**self).query(sql, params).await
    }

    async fn query_one(&self, sql: &str, params: &[Value]) -> TriggerResult<Row> {
        (**self).query_one(sql, params).await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> TriggerResult<Value> {
        (**self).insert_returning_id(sql, params).await
    }

    fn supports_returning(&self) -> bool {
        (**self).supports_returning()
    }
}
