//! Error types for bulk-triggers.
//!
//! [`TriggerError`] is the single error enum shared by the ORM layer, the
//! database backends and the trigger engine. Errors raised inside trigger
//! handlers travel through the engine in whichever variant the handler chose,
//! so callers can match on exactly what their own code produced.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// A validation failure, optionally carrying per-field errors.
///
/// This is what `VALIDATE_*` and `BEFORE_*` handlers usually return when they
/// reject a batch.
///
/// # Examples
///
/// ```
/// use bulk_triggers_core::error::ValidationError;
///
/// let err = ValidationError::new("Amount must be positive.", "min_value")
///     .with_param("field", "amount");
/// assert_eq!(err.to_string(), "Amount must be positive.");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The primary error message.
    pub message: String,
    /// A short machine-readable code (e.g. "required", "invalid").
    pub code: String,
    /// Extra context for the message.
    pub params: HashMap<String, String>,
    /// Per-field errors keyed by field name.
    pub field_errors: HashMap<String, Vec<Self>>,
}

impl ValidationError {
    /// Creates a `ValidationError` with a message and code.
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            params: HashMap::new(),
            field_errors: HashMap::new(),
        }
    }

    /// Creates a `ValidationError` made only of per-field errors.
    pub fn with_field_errors(field_errors: HashMap<String, Vec<Self>>) -> Self {
        Self {
            message: String::new(),
            code: String::new(),
            params: HashMap::new(),
            field_errors,
        }
    }

    /// Adds a context parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.message.is_empty() {
            return write!(f, "{}", self.message);
        }
        let mut fields: Vec<_> = self.field_errors.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        let mut first = true;
        for (field, errors) in fields {
            for error in errors {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{field}: {error}")?;
                first = false;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// The error type for every fallible operation in bulk-triggers.
#[derive(Error, Debug)]
pub enum TriggerError {
    // ── ORM errors ───────────────────────────────────────────────────

    /// A query expected exactly one row but found none.
    #[error("Object does not exist: {0}")]
    DoesNotExist(String),

    /// A query expected exactly one row but found several.
    #[error("Multiple objects returned when one expected: {0}")]
    MultipleObjectsReturned(String),

    /// A generic database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A database integrity constraint was violated.
    #[error("Integrity error: {0}")]
    IntegrityError(String),

    /// The database could not be reached or opened.
    #[error("Operational error: {0}")]
    OperationalError(String),

    // ── Validation ───────────────────────────────────────────────────

    /// Raised by trigger handlers that reject a batch.
    #[error("Validation error: {0}")]
    ValidationError(ValidationError),

    // ── Operation parameters ─────────────────────────────────────────

    /// An object passed to a bulk operation is not an instance of the target model.
    #[error("TypeError: {0}")]
    TypeError(String),

    /// An operation parameter is invalid (batch size, missing primary keys).
    #[error("ValueError: {0}")]
    ValueError(String),

    // ── Engine ───────────────────────────────────────────────────────

    /// An SQL expression has no output type and none could be inferred.
    #[error("Cannot resolve output field for '{field}': {expression}")]
    OutputFieldUnresolved {
        /// The update target.
        field: String,
        /// A short description of the expression.
        expression: String,
    },

    /// Nested trigger dispatch went deeper than the configured bound.
    #[error("Maximum trigger depth ({depth}) exceeded for {model}.{event}: {path}")]
    RecursionLimit {
        /// The model whose dispatch overflowed.
        model: String,
        /// The event being dispatched.
        event: String,
        /// The configured maximum.
        depth: usize,
        /// The dispatch chain that led here.
        path: String,
    },

    /// An arbitrary error raised by trigger code.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A model, handler or registry is wired up incorrectly.
    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    // ── Serialization ────────────────────────────────────────────────

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TriggerError {
    /// Returns `true` for errors that originate in user trigger code rather
    /// than in the engine or the database.
    pub const fn is_user_error(&self) -> bool {
        matches!(self, Self::ValidationError(_) | Self::Handler(_))
    }

    /// Returns `true` for errors raised by the database layer.
    pub const fn is_database_error(&self) -> bool {
        matches!(
            self,
            Self::DoesNotExist(_)
                | Self::MultipleObjectsReturned(_)
                | Self::DatabaseError(_)
                | Self::IntegrityError(_)
                | Self::OperationalError(_)
        )
    }
}

impl From<ValidationError> for TriggerError {
    fn from(err: ValidationError) -> Self {
        Self::ValidationError(err)
    }
}

/// A convenience type alias for `Result<T, TriggerError>`.
pub type TriggerResult<T> = Result<T, TriggerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display_simple() {
        let err = ValidationError::new("This field is required.", "required");
        assert_eq!(err.to_string(), "This field is required.");
    }

    #[test]
    fn test_validation_error_display_field_errors_sorted() {
        let mut field_errors = HashMap::new();
        field_errors.insert(
            "status".to_string(),
            vec![ValidationError::new("Unknown status.", "invalid")],
        );
        field_errors.insert(
            "amount".to_string(),
            vec![ValidationError::new("Too small.", "min_value")],
        );
        let err = ValidationError::with_field_errors(field_errors);
        assert_eq!(err.to_string(), "amount: Too small.; status: Unknown status.");
    }

    #[test]
    fn test_validation_error_with_param() {
        let err = ValidationError::new("Too short.", "min_length").with_param("min", "8");
        assert_eq!(err.params.get("min").unwrap(), "8");
    }

    #[test]
    fn test_user_error_classification() {
        assert!(TriggerError::from(ValidationError::new("x", "y")).is_user_error());
        assert!(TriggerError::from(anyhow::anyhow!("boom")).is_user_error());
        assert!(!TriggerError::ValueError("x".into()).is_user_error());
        assert!(TriggerError::IntegrityError("x".into()).is_database_error());
        assert!(!TriggerError::TypeError("x".into()).is_database_error());
    }

    #[test]
    fn test_handler_error_is_transparent() {
        let err: TriggerError = anyhow::anyhow!("credit limit exceeded").into();
        assert_eq!(err.to_string(), "credit limit exceeded");
    }

    #[test]
    fn test_recursion_limit_display() {
        let err = TriggerError::RecursionLimit {
            model: "account".into(),
            event: "after_update".into(),
            depth: 10,
            path: "account.after_update -> account.after_update".into(),
        };
        assert!(err
            .to_string()
            .starts_with("Maximum trigger depth (10) exceeded for account.after_update"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: TriggerError = io_err.into();
        assert!(err.to_string().contains("file missing"));
    }
}
