//! The backend trait and connection entry point.
//!
//! [`DatabaseBackend`] extends [`DbExecutor`] with the vendor name and a
//! dialect-configured compiler. [`connect`] opens the backend named by
//! [`DatabaseSettings`].

use std::sync::Arc;

use bulk_triggers_core::settings::DatabaseSettings;
use bulk_triggers_core::{TriggerError, TriggerResult};
use bulk_triggers_db::query::compiler::SqlCompiler;
use bulk_triggers_db::DbExecutor;

/// A concrete database engine.
pub trait DatabaseBackend: DbExecutor {
    /// Returns the vendor name, e.g. "sqlite".
    fn vendor(&self) -> &str;

    /// Returns a SQL compiler configured for this backend's dialect.
    fn compiler(&self) -> SqlCompiler {
        SqlCompiler::new(self.backend_type())
    }
}

/// Opens the database described by `settings`.
///
/// # Errors
///
/// Returns `ImproperlyConfigured` for an unknown engine, or for an engine
/// whose feature is not enabled.
pub fn connect(settings: &DatabaseSettings) -> TriggerResult<Arc<dyn DbExecutor>> {
    match settings.engine.as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" | "sqlite3" => {
            let backend = crate::sqlite::SqliteBackend::open(&settings.name)?;
            Ok(Arc::new(backend))
        }
        other => Err(TriggerError::ImproperlyConfigured(format!(
            "Unsupported database engine '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_unknown_engine() {
        let settings = DatabaseSettings {
            engine: "oracle".to_string(),
            name: "x".to_string(),
        };
        let Err(err) = connect(&settings) else {
            panic!("expected connect to fail");
        };
        assert!(matches!(err, TriggerError::ImproperlyConfigured(_)));
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_connect_default_is_sqlite_memory() {
        let db = connect(&DatabaseSettings::default()).unwrap();
        assert_eq!(
            db.backend_type(),
            bulk_triggers_db::DatabaseBackendType::SQLite
        );
    }
}
