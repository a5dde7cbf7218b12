//! Query building, compilation, and execution.
//!
//! - [`lookups`] - Q objects and lookup types for filtering
//! - [`expressions`] - Column references, CASE/WHEN, aggregates and subqueries
//! - [`compiler`] - Query AST and SQL compilation
//! - [`queryset`] - The baseline QuerySet and Manager
//! - [`bulk`] - Baseline bulk insert and bulk update

pub mod bulk;
pub mod compiler;
pub mod expressions;
pub mod lookups;
pub mod queryset;

pub use compiler::{
    DatabaseBackendType, Join, OnConflict, OrderBy, Query, SelectColumn, SqlCompiler, WhereNode,
};
pub use expressions::{AggregateFunc, Expression, ExpressionKind, SubqueryExpression, When};
pub use lookups::{Lookup, Q};
pub use queryset::{fetch_by_pks, Manager, QuerySet};
