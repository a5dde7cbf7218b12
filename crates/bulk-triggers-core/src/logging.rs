//! Logging setup for bulk-triggers.
//!
//! Provides [`setup_logging`] to install a [`tracing`] subscriber from
//! [`Settings`], and span helpers used by the engine so every log line emitted
//! during a bulk operation carries the operation and model.

use crate::settings::Settings;

/// The tracing target used by the trigger engine.
pub const ENGINE_TARGET: &str = "bulk_triggers_engine";

/// Builds the filter directive string for the given settings.
///
/// With `triggers.debug_verbose` set, the engine target is raised to `trace`
/// on top of the configured level.
pub fn filter_directive(settings: &Settings) -> String {
    if settings.triggers.debug_verbose {
        format!("{},{ENGINE_TARGET}=trace", settings.log_level)
    } else {
        settings.log_level.clone()
    }
}

/// Installs the global tracing subscriber.
///
/// Debug mode uses a pretty, human-readable format; otherwise output is JSON.
/// Installing twice is a no-op.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(filter_directive(settings))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a span for one bulk operation.
///
/// # Examples
///
/// ```
/// use bulk_triggers_core::logging::operation_span;
///
/// let span = operation_span("bulk_update", "crm_account", 3);
/// let _guard = span.enter();
/// tracing::debug!("loading originals");
/// ```
pub fn operation_span(operation: &str, model: &str, count: usize) -> tracing::Span {
    tracing::debug_span!(target: ENGINE_TARGET, "bulk_operation", operation, model, count)
}

/// Creates a span for one trigger handler invocation.
pub fn trigger_span(model: &str, event: &str, handler: &str, method: &str) -> tracing::Span {
    tracing::debug_span!(target: ENGINE_TARGET, "trigger", model, event, handler, method)
}
