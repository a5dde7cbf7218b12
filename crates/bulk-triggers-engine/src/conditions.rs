//! Record-level conditions.
//!
//! A [`Condition`] decides, for one `(new, old)` pair, whether a handler
//! should see that record. Conditions read fields through [`Record`], so a
//! path like `owner.email` follows the related row cached on the instance.
//!
//! Conditions never fail. A path that cannot be resolved reads as NULL, and a
//! comparison between incomparable values is `false`.
//!
//! # Examples
//!
//! ```
//! use bulk_triggers_db::{RelatedRecord, Value};
//! use bulk_triggers_engine::conditions::Condition;
//!
//! let old = RelatedRecord::new("crm_account", vec![("status".into(), Value::from("open"))]);
//! let new = RelatedRecord::new("crm_account", vec![("status".into(), Value::from("won"))]);
//!
//! let cond = Condition::changes_to("status", "won") & !Condition::is_equal("status", "lost");
//! assert!(cond.check(&new, Some(&old)));
//! assert!(!Condition::has_changed("status").check(&new, None));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

use bulk_triggers_db::{Record, Value};

/// A comparison operator for ordered conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    const fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Gt => matches!(ordering, Ordering::Greater),
            Self::Gte => matches!(ordering, Ordering::Greater | Ordering::Equal),
            Self::Lt => matches!(ordering, Ordering::Less),
            Self::Lte => matches!(ordering, Ordering::Less | Ordering::Equal),
        }
    }

    const fn symbol(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// A user-supplied predicate over `(new, old)`.
pub type CustomCheck = Arc<dyn Fn(&dyn Record, Option<&dyn Record>) -> bool + Send + Sync>;

/// A predicate over a new record and its stored original.
#[derive(Clone)]
pub enum Condition {
    /// The new value equals `value`.
    IsEqual {
        field: String,
        value: Value,
        only_on_change: bool,
    },
    /// The new value differs from `value`.
    IsNotEqual {
        field: String,
        value: Value,
        only_on_change: bool,
    },
    /// The value differs between old and new (or does not, when
    /// `has_changed` is false).
    HasChanged { field: String, has_changed: bool },
    /// The old value equals `value`.
    WasEqual {
        field: String,
        value: Value,
        only_on_change: bool,
    },
    /// The value changed, and the new value equals `value`.
    ChangesTo { field: String, value: Value },
    /// The new value compares to `value` under `op`.
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    Custom(CustomCheck),
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IsEqual { field, value, only_on_change } => f
                .debug_struct("IsEqual")
                .field("field", field)
                .field("value", value)
                .field("only_on_change", only_on_change)
                .finish(),
            Self::IsNotEqual { field, value, only_on_change } => f
                .debug_struct("IsNotEqual")
                .field("field", field)
                .field("value", value)
                .field("only_on_change", only_on_change)
                .finish(),
            Self::HasChanged { field, has_changed } => f
                .debug_struct("HasChanged")
                .field("field", field)
                .field("has_changed", has_changed)
                .finish(),
            Self::WasEqual { field, value, only_on_change } => f
                .debug_struct("WasEqual")
                .field("field", field)
                .field("value", value)
                .field("only_on_change", only_on_change)
                .finish(),
            Self::ChangesTo { field, value } => f
                .debug_struct("ChangesTo")
                .field("field", field)
                .field("value", value)
                .finish(),
            Self::Compare { field, op, value } => {
                write!(f, "Compare({field} {} {value:?})", op.symbol())
            }
            Self::And(a, b) => f.debug_tuple("And").field(a).field(b).finish(),
            Self::Or(a, b) => f.debug_tuple("Or").field(a).field(b).finish(),
            Self::Not(c) => f.debug_tuple("Not").field(c).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Condition {
    pub fn is_equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::IsEqual {
            field: field.into(),
            value: value.into(),
            only_on_change: false,
        }
    }

    pub fn is_not_equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::IsNotEqual {
            field: field.into(),
            value: value.into(),
            only_on_change: false,
        }
    }

    pub fn has_changed(field: impl Into<String>) -> Self {
        Self::HasChanged {
            field: field.into(),
            has_changed: true,
        }
    }

    /// True when the field did not change, or there is no old record.
    pub fn has_not_changed(field: impl Into<String>) -> Self {
        Self::HasChanged {
            field: field.into(),
            has_changed: false,
        }
    }

    pub fn was_equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::WasEqual {
            field: field.into(),
            value: value.into(),
            only_on_change: false,
        }
    }

    pub fn changes_to(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::ChangesTo {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_greater_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn is_greater_than_or_equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gte, value)
    }

    pub fn is_less_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn is_less_than_or_equal(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lte, value)
    }

    fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Wraps an arbitrary predicate.
    pub fn custom<F>(check: F) -> Self
    where
        F: Fn(&dyn Record, Option<&dyn Record>) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(check))
    }

    /// Additionally requires the field to differ between old and new.
    ///
    /// Applies to equality, inequality and was-equal conditions; other
    /// conditions are returned unchanged.
    #[must_use]
    pub fn only_on_change(mut self) -> Self {
        match &mut self {
            Self::IsEqual { only_on_change, .. }
            | Self::IsNotEqual { only_on_change, .. }
            | Self::WasEqual { only_on_change, .. } => *only_on_change = true,
            _ => {}
        }
        self
    }

    /// Evaluates the condition for one record.
    pub fn check(&self, new: &dyn Record, old: Option<&dyn Record>) -> bool {
        match self {
            Self::IsEqual { field, value, only_on_change } => {
                values_equal(&resolve(new, field), value)
                    && (!only_on_change || changed(new, old, field))
            }
            Self::IsNotEqual { field, value, only_on_change } => {
                !values_equal(&resolve(new, field), value)
                    && (!only_on_change || changed(new, old, field))
            }
            Self::HasChanged { field, has_changed } => {
                if *has_changed {
                    changed(new, old, field)
                } else {
                    old.map_or(true, |old| {
                        values_equal(&resolve(new, field), &resolve(old, field))
                    })
                }
            }
            Self::WasEqual { field, value, only_on_change } => old.is_some_and(|old| {
                values_equal(&resolve(old, field), value)
                    && (!only_on_change || changed(new, Some(old), field))
            }),
            Self::ChangesTo { field, value } => {
                values_equal(&resolve(new, field), value) && changed(new, old, field)
            }
            Self::Compare { field, op, value } => resolve(new, field)
                .compare(value)
                .is_some_and(|ordering| op.accepts(ordering)),
            Self::And(a, b) => a.check(new, old) && b.check(new, old),
            Self::Or(a, b) => a.check(new, old) || b.check(new, old),
            Self::Not(c) => !c.check(new, old),
            Self::Custom(check) => check(new, old),
        }
    }

    /// The root fields this condition reads, in first-use order.
    ///
    /// For `owner.email` the root is `owner`. Custom conditions read
    /// nothing the engine can see.
    pub fn fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut Vec<String>) {
        match self {
            Self::IsEqual { field, .. }
            | Self::IsNotEqual { field, .. }
            | Self::HasChanged { field, .. }
            | Self::WasEqual { field, .. }
            | Self::ChangesTo { field, .. }
            | Self::Compare { field, .. } => {
                let root = field.split('.').next().unwrap_or(field).to_string();
                if !out.contains(&root) {
                    out.push(root);
                }
            }
            Self::And(a, b) | Self::Or(a, b) => {
                a.collect_fields(out);
                b.collect_fields(out);
            }
            Self::Not(c) => c.collect_fields(out),
            Self::Custom(_) => {}
        }
    }
}

impl BitAnd for Condition {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self::And(Box::new(self), Box::new(rhs))
    }
}

impl BitOr for Condition {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self::Or(Box::new(self), Box::new(rhs))
    }
}

impl Not for Condition {
    type Output = Self;

    fn not(self) -> Self {
        Self::Not(Box::new(self))
    }
}

/// Reads a possibly dotted path. Any missing hop reads as NULL.
pub fn resolve(record: &dyn Record, path: &str) -> Value {
    let mut current = record;
    let mut hops = path.split('.').peekable();
    while let Some(hop) = hops.next() {
        if hops.peek().is_none() {
            return current.get_value(hop).unwrap_or(Value::Null);
        }
        match current.related(hop) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    Value::Null
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b || a.compare(b) == Some(Ordering::Equal)
}

fn changed(new: &dyn Record, old: Option<&dyn Record>, field: &str) -> bool {
    old.is_some_and(|old| !values_equal(&resolve(new, field), &resolve(old, field)))
}
