//! # bulk-triggers-core
//!
//! Foundation types shared by every bulk-triggers crate. This crate has no
//! framework dependencies.
//!
//! ## Modules
//!
//! - [`error`] - The [`TriggerError`] taxonomy and result alias
//! - [`settings`] - Settings structs and the global [`SETTINGS`] holder
//! - [`settings_loader`] - TOML/JSON/environment loading
//! - [`logging`] - Tracing subscriber setup and span helpers

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{TriggerError, TriggerResult, ValidationError};
pub use settings::{DatabaseSettings, Settings, TriggerSettings, SETTINGS};
