//! SQLite database backend using `rusqlite`.
//!
//! [`SqliteBackend`] implements [`DbExecutor`] on one `rusqlite`
//! connection. Every call runs inside `tokio::task::spawn_blocking` so the
//! synchronous driver never blocks the async runtime.
//!
//! - In-memory databases via the `:memory:` path
//! - `INSERT ... RETURNING` for multi-row key population
//! - Constraint violations surface as `IntegrityError`

use std::path::PathBuf;
use std::sync::Arc;

use bulk_triggers_core::{TriggerError, TriggerResult};
use bulk_triggers_db::query::compiler::DatabaseBackendType;
use bulk_triggers_db::row::Row;
use bulk_triggers_db::value::Value;
use bulk_triggers_db::DbExecutor;
use tokio::sync::Mutex;

use crate::base::DatabaseBackend;

/// A SQLite database backend.
///
/// Clones share the same connection.
#[derive(Clone)]
pub struct SqliteBackend {
    path: PathBuf,
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn map_err(e: rusqlite::Error) -> TriggerError {
    match e {
        rusqlite::Error::SqliteFailure(ref code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            TriggerError::IntegrityError(e.to_string())
        }
        other => TriggerError::DatabaseError(other.to_string()),
    }
}

fn join_err(e: tokio::task::JoinError) -> TriggerError {
    TriggerError::DatabaseError(format!("Task join error: {e}"))
}

impl SqliteBackend {
    /// Opens a SQLite database at the given path.
    ///
    /// `:memory:` opens a private in-memory database. Foreign keys are
    /// enforced.
    pub fn open(path: impl Into<PathBuf>) -> TriggerResult<Self> {
        let path = path.into();
        let conn = if path.to_str() == Some(":memory:") {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| TriggerError::OperationalError(format!("SQLite open failed: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| TriggerError::OperationalError(format!("Failed to set pragmas: {e}")))?;

        tracing::debug!(path = %path.display(), "opened sqlite database");
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database.
    pub fn memory() -> TriggerResult<Self> {
        Self::open(":memory:")
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Runs several `;`-separated statements without parameters, e.g. a
    /// schema.
    pub async fn execute_script(&self, sql: &str) -> TriggerResult<()> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || conn.blocking_lock().execute_batch(&sql).map_err(map_err))
            .await
            .map_err(join_err)?
    }

    fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> TriggerResult<()> {
        for (i, param) in params.iter().enumerate() {
            let idx = i + 1;
            match param {
                Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
                Value::Bool(b) => stmt.raw_bind_parameter(idx, b),
                Value::Int(v) => stmt.raw_bind_parameter(idx, v),
                Value::Float(v) => stmt.raw_bind_parameter(idx, v),
                Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
                Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
                Value::Date(d) => stmt.raw_bind_parameter(idx, d.to_string().as_str()),
                Value::DateTime(dt) => stmt.raw_bind_parameter(idx, dt.to_string().as_str()),
                Value::DateTimeTz(dt) => stmt.raw_bind_parameter(idx, dt.to_rfc3339().as_str()),
                Value::Time(t) => stmt.raw_bind_parameter(idx, t.to_string().as_str()),
                Value::Uuid(u) => stmt.raw_bind_parameter(idx, u.to_string().as_str()),
                Value::Json(j) => stmt.raw_bind_parameter(idx, j.to_string().as_str()),
                Value::List(vals) => {
                    let json = serde_json::to_string(vals)
                        .map_err(|e| TriggerError::SerializationError(e.to_string()))?;
                    stmt.raw_bind_parameter(idx, json.as_str())
                }
            }
            .map_err(|e| TriggerError::DatabaseError(format!("Bind error: {e}")))?;
        }
        Ok(())
    }

    fn convert_row(sqlite_row: &rusqlite::Row<'_>, column_names: &[String]) -> TriggerResult<Row> {
        let mut values = Vec::with_capacity(column_names.len());
        for i in 0..column_names.len() {
            let value = match sqlite_row.get_ref(i).map_err(map_err)? {
                rusqlite::types::ValueRef::Null => Value::Null,
                rusqlite::types::ValueRef::Integer(v) => Value::Int(v),
                rusqlite::types::ValueRef::Real(v) => Value::Float(v),
                rusqlite::types::ValueRef::Text(b) => {
                    Value::String(String::from_utf8_lossy(b).into_owned())
                }
                rusqlite::types::ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
            };
            values.push(value);
        }
        Ok(Row::new(column_names.to_vec(), values))
    }

    fn run_query(conn: &rusqlite::Connection, sql: &str, params: &[Value]) -> TriggerResult<Vec<Row>> {
        let mut stmt = conn.prepare(sql).map_err(map_err)?;
        let column_names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        Self::bind_params(&mut stmt, params)?;

        let mut raw_rows = stmt.raw_query();
        let mut rows = Vec::new();
        while let Some(row) = raw_rows.next().map_err(map_err)? {
            rows.push(Self::convert_row(row, &column_names)?);
        }
        Ok(rows)
    }
}

impl DatabaseBackend for SqliteBackend {
    fn vendor(&self) -> &str {
        "sqlite"
    }
}

#[async_trait::async_trait]
impl DbExecutor for SqliteBackend {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    async fn execute_sql(&self, sql: &str, params: &[Value]) -> TriggerResult<u64> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let params = params.to_vec();
        tracing::trace!(%sql, "execute");

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&sql).map_err(map_err)?;
            Self::bind_params(&mut stmt, &params)?;
            let count = stmt.raw_execute().map_err(map_err)?;
            Ok(count as u64)
        })
        .await
        .map_err(join_err)?
    }

    async fn query(&self, sql: &str, params: &[Value]) -> TriggerResult<Vec<Row>> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let params = params.to_vec();
        tracing::trace!(%sql, "query");

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            Self::run_query(&conn, &sql, &params)
        })
        .await
        .map_err(join_err)?
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> TriggerResult<Value> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let params = params.to_vec();
        tracing::trace!(%sql, "insert");

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&sql).map_err(map_err)?;
            Self::bind_params(&mut stmt, &params)?;
            stmt.raw_execute().map_err(map_err)?;
            Ok(Value::Int(conn.last_insert_rowid()))
        })
        .await
        .map_err(join_err)?
    }
}
