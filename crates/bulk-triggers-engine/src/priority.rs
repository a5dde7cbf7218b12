//! Handler priorities.

use std::fmt;

/// Orders handlers registered for the same model and event.
///
/// Lower values run first. Any integer is allowed; the named levels are
/// the usual choices.
///
/// ```
/// use bulk_triggers_engine::Priority;
///
/// assert!(Priority::HIGHEST < Priority::NORMAL);
/// assert_eq!(Priority::default(), Priority::NORMAL);
/// assert!(Priority::from(30) > Priority::HIGH);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Priority(pub i32);

impl Priority {
    pub const HIGHEST: Self = Self(0);
    pub const HIGH: Self = Self(25);
    pub const NORMAL: Self = Self(50);
    pub const LOW: Self = Self(75);
    pub const LOWEST: Self = Self(100);

    pub const fn value(self) -> i32 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
