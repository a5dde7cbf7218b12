//! Settings for bulk-triggers.
//!
//! [`Settings`] holds the logging, database and trigger-engine options, and
//! [`LazySettings`] is a process-wide, set-once holder for them. Everything has
//! a sensible default so an unconfigured process still works.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{TriggerError, TriggerResult};

/// Database connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// The database engine ("sqlite" is the only bundled engine).
    pub engine: String,
    /// The database name, or file path for SQLite (`:memory:` for in-memory).
    pub name: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            engine: "sqlite".to_string(),
            name: ":memory:".to_string(),
        }
    }
}

/// Options that shape trigger dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSettings {
    /// Maximum nesting depth for one (model, event) pair before dispatch fails.
    pub max_depth: usize,
    /// Emit per-record trace output from the engine.
    pub debug_verbose: bool,
    /// Batch size used by bulk operations that do not specify one.
    pub default_batch_size: Option<usize>,
    /// Queue nesting depth past which `handle()` dispatches inline.
    pub queue_circuit_breaker: usize,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            max_depth: 10,
            debug_verbose: false,
            default_batch_size: None,
            queue_circuit_breaker: 100,
        }
    }
}

/// All bulk-triggers configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    // ── Core ─────────────────────────────────────────────────────────

    /// Debug mode switches logging to the human-readable format.
    pub debug: bool,
    /// The tracing filter directive (e.g. "info", "bulk_triggers_engine=debug").
    pub log_level: String,

    // ── Database ─────────────────────────────────────────────────────

    /// The default database.
    pub database: DatabaseSettings,

    // ── Triggers ─────────────────────────────────────────────────────

    /// Trigger engine options.
    pub triggers: TriggerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: true,
            log_level: "info".to_string(),
            database: DatabaseSettings::default(),
            triggers: TriggerSettings::default(),
        }
    }
}

/// A set-once, globally reachable [`Settings`] holder.
pub struct LazySettings {
    inner: OnceLock<Settings>,
}

impl Default for LazySettings {
    fn default() -> Self {
        Self::new()
    }
}

impl LazySettings {
    /// Creates an unconfigured holder.
    pub const fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    /// Installs the settings. Only the first call succeeds.
    pub fn configure(&self, settings: Settings) -> TriggerResult<()> {
        self.inner.set(settings).map_err(|_| {
            TriggerError::ConfigurationError("Settings have already been configured".to_string())
        })
    }

    /// Returns the configured settings, if any.
    pub fn get(&self) -> Option<&Settings> {
        self.inner.get()
    }

    /// Returns the configured settings, or the defaults when unconfigured.
    pub fn get_or_default(&self) -> &Settings {
        static DEFAULTS: OnceLock<Settings> = OnceLock::new();
        self.inner
            .get()
            .unwrap_or_else(|| DEFAULTS.get_or_init(Settings::default))
    }

    /// Returns `true` once [`configure`](Self::configure) has succeeded.
    pub fn is_configured(&self) -> bool {
        self.inner.get().is_some()
    }
}

/// The global settings instance.
pub static SETTINGS: LazySettings = LazySettings::new();
