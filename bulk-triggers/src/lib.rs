//! # bulk-triggers
//!
//! BEFORE, AFTER and VALIDATE triggers around bulk ORM operations.
//!
//! This is the meta-crate that re-exports all sub-crates for convenient access.
//! Depend on `bulk-triggers` for the whole stack, or on individual crates for
//! finer-grained control.
//!
//! ```ignore
//! use bulk_triggers::prelude::*;
//!
//! let db = SqliteBackend::memory()?;
//! let ctx = TriggerContext::new(Arc::new(db));
//! Account::objects(&ctx).bulk_create(&mut accounts).await?;
//! ```

/// Error types, settings and logging setup.
pub use bulk_triggers_core as core;

/// ORM: models, values, expressions, querysets and transactions.
pub use bulk_triggers_db as db;

/// Database backends.
pub use bulk_triggers_db_backends as db_backends;

/// The trigger engine.
pub use bulk_triggers_engine as engine;

/// Third-party crates the public API exposes.
pub use anyhow;
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tracing;
pub use tracing_subscriber;

/// The names most trigger code needs.
pub mod prelude {
    pub use std::sync::Arc;

    pub use bulk_triggers_core::{Settings, TriggerError, TriggerResult, TriggerSettings, ValidationError};
    pub use bulk_triggers_db::{
        atomic, BulkCreateOptions, BulkUpdateOptions, DbExecutor, Expression, FieldDef, FieldType,
        FromValue, Model, ModelMeta, Record, RelatedCache, Row, SubqueryExpression, Value, When, Q,
    };
    #[cfg(feature = "sqlite")]
    pub use bulk_triggers_db_backends::SqliteBackend;
    pub use bulk_triggers_engine::{
        handle, Condition, HandlerFactories, HandlerFactory, HandlerFuture, Priority, TriggerArgs,
        TriggerContext, TriggerEvent, TriggerHandler, TriggerModelExt, TriggerRegistration,
        TriggerRegistry, UpdateValue,
    };
}
