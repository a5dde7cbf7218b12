//! Field lookups and composable `Q` filters.
//!
//! # Examples
//!
//! ```
//! use bulk_triggers_db::query::lookups::{Lookup, Q};
//! use bulk_triggers_db::value::Value;
//!
//! let open = Q::exact("status", "open");
//! let big = Q::filter("revenue", Lookup::Gte(Value::from(1000)));
//! let either = open.clone() | big.clone();
//! let both = open & !big;
//! assert!(matches!(either, Q::Or(_)));
//! assert!(matches!(both, Q::And(_)));
//! ```

use std::ops;

use crate::value::Value;

/// A field-level comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// `field = value`; `Null` compiles to `IS NULL`.
    Exact(Value),
    /// `LOWER(field) = LOWER(value)`.
    IExact(Value),
    /// `field LIKE '%value%'`.
    Contains(String),
    /// `field IN (values...)`; an empty list matches nothing.
    In(Vec<Value>),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    /// `field BETWEEN low AND high`.
    Range(Value, Value),
    /// `field IS NULL` / `IS NOT NULL`.
    IsNull(bool),
    /// `field = <outer table>.column`, for correlated subqueries.
    OuterRef(String),
}

/// A composable filter combined with `&`, `|` and `!`.
#[derive(Debug, Clone, PartialEq)]
pub enum Q {
    /// A single field lookup.
    Filter {
        /// The column name.
        field: String,
        /// The comparison.
        lookup: Lookup,
    },
    And(Vec<Q>),
    Or(Vec<Q>),
    Not(Box<Q>),
}

impl Q {
    pub fn filter(field: impl Into<String>, lookup: Lookup) -> Self {
        Self::Filter {
            field: field.into(),
            lookup,
        }
    }

    /// Shorthand for an exact match.
    pub fn exact(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::filter(field, Lookup::Exact(value.into()))
    }

    /// Shorthand for an `IN` filter.
    pub fn any_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::filter(field, Lookup::In(values))
    }

    /// Shorthand for a correlated reference to the outer query.
    pub fn outer_ref(field: impl Into<String>, outer_column: impl Into<String>) -> Self {
        Self::filter(field, Lookup::OuterRef(outer_column.into()))
    }

    /// Returns `true` for an empty AND/OR.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::And(children) | Self::Or(children) => children.is_empty(),
            _ => false,
        }
    }

    /// Renames every filter on `from` to filter on `to` instead.
    pub fn rename_field(&mut self, from: &str, to: &str) {
        match self {
            Self::Filter { field, .. } => {
                if field == from {
                    *field = to.to_string();
                }
            }
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.rename_field(from, to);
                }
            }
            Self::Not(inner) => inner.rename_field(from, to),
        }
    }
}

impl ops::BitAnd for Q {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (other, Self::And(mut right)) => {
                right.insert(0, other);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }
}

impl ops::BitOr for Q {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), other) => {
                left.push(other);
                Self::Or(left)
            }
            (other, Self::Or(mut right)) => {
                right.insert(0, other);
                Self::Or(right)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }
}

impl ops::Not for Q {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }
}
