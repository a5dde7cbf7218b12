//! # bulk-triggers-db-backends
//!
//! Concrete database engines for bulk-triggers. Each backend implements
//! [`DbExecutor`](bulk_triggers_db::DbExecutor), so the baseline ORM and the
//! trigger engine run against it unchanged.
//!
//! Supported backends:
//! - `SQLite` (feature `sqlite`)

pub mod base;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use base::{connect, DatabaseBackend};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
