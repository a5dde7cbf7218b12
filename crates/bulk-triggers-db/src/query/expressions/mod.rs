//! Query expressions and subquery builders.
//!
//! - [`core`] - The [`Expression`] enum, CASE/WHEN, aggregates, arithmetic
//! - [`subquery`] - [`SubqueryExpression`] for correlated scalar subqueries

pub mod core;
pub mod subquery;

pub use self::core::{AggregateFunc, Expression, ExpressionKind, When};
pub use self::subquery::SubqueryExpression;
