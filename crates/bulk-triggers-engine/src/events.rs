//! Trigger events.
//!
//! Every bulk operation fires up to three events: a validate pass, a before
//! pass and an after pass. [`TriggerEvent`] names the nine combinations.

use std::fmt;
use std::str::FromStr;

use bulk_triggers_core::TriggerError;

/// When, relative to the database write, an event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Validate,
    Before,
    After,
}

/// The kind of write an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// A point in a bulk operation where handlers can run.
///
/// # Examples
///
/// ```
/// use bulk_triggers_engine::events::{Operation, Phase, TriggerEvent};
///
/// let event: TriggerEvent = "before_update".parse().unwrap();
/// assert_eq!(event, TriggerEvent::BeforeUpdate);
/// assert_eq!(event.phase(), Phase::Before);
/// assert_eq!(event.operation(), Operation::Update);
/// assert_eq!(event.to_string(), "before_update");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TriggerEvent {
    ValidateCreate,
    ValidateUpdate,
    ValidateDelete,
    BeforeCreate,
    BeforeUpdate,
    BeforeDelete,
    AfterCreate,
    AfterUpdate,
    AfterDelete,
}

impl TriggerEvent {
    /// All events, validate events first.
    pub const ALL: [Self; 9] = [
        Self::ValidateCreate,
        Self::ValidateUpdate,
        Self::ValidateDelete,
        Self::BeforeCreate,
        Self::BeforeUpdate,
        Self::BeforeDelete,
        Self::AfterCreate,
        Self::AfterUpdate,
        Self::AfterDelete,
    ];

    /// Builds the event for a phase of an operation.
    pub const fn new(phase: Phase, operation: Operation) -> Self {
        match (phase, operation) {
            (Phase::Validate, Operation::Create) => Self::ValidateCreate,
            (Phase::Validate, Operation::Update) => Self::ValidateUpdate,
            (Phase::Validate, Operation::Delete) => Self::ValidateDelete,
            (Phase::Before, Operation::Create) => Self::BeforeCreate,
            (Phase::Before, Operation::Update) => Self::BeforeUpdate,
            (Phase::Before, Operation::Delete) => Self::BeforeDelete,
            (Phase::After, Operation::Create) => Self::AfterCreate,
            (Phase::After, Operation::Update) => Self::AfterUpdate,
            (Phase::After, Operation::Delete) => Self::AfterDelete,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidateCreate => "validate_create",
            Self::ValidateUpdate => "validate_update",
            Self::ValidateDelete => "validate_delete",
            Self::BeforeCreate => "before_create",
            Self::BeforeUpdate => "before_update",
            Self::BeforeDelete => "before_delete",
            Self::AfterCreate => "after_create",
            Self::AfterUpdate => "after_update",
            Self::AfterDelete => "after_delete",
        }
    }

    pub const fn phase(self) -> Phase {
        match self {
            Self::ValidateCreate | Self::ValidateUpdate | Self::ValidateDelete => Phase::Validate,
            Self::BeforeCreate | Self::BeforeUpdate | Self::BeforeDelete => Phase::Before,
            Self::AfterCreate | Self::AfterUpdate | Self::AfterDelete => Phase::After,
        }
    }

    pub const fn operation(self) -> Operation {
        match self {
            Self::ValidateCreate | Self::BeforeCreate | Self::AfterCreate => Operation::Create,
            Self::ValidateUpdate | Self::BeforeUpdate | Self::AfterUpdate => Operation::Update,
            Self::ValidateDelete | Self::BeforeDelete | Self::AfterDelete => Operation::Delete,
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerEvent {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| TriggerError::ValueError(format!("Unknown trigger event '{s}'")))
    }
}
