//! # bulk-triggers-db
//!
//! The ORM layer the trigger engine works on. Provides the
//! [`Model`](model::Model) trait and its metadata, the backend-agnostic
//! [`Value`](value::Value), query expressions (including CASE and correlated
//! subqueries), the [`SqlCompiler`](query::SqlCompiler), and the baseline,
//! trigger-free [`Manager`](query::Manager) and [`QuerySet`](query::QuerySet).
//!
//! ## Architecture
//!
//! A [`QuerySet`](query::QuerySet) builds a [`Query`](query::Query) AST
//! through method chaining without touching the database. SQL is generated
//! only in the async terminal methods, where the compiler translates the AST
//! into parameterized SQL for the executor's backend. Every write path here
//! is trigger-free: the engine crate layers triggers on top.
//!
//! ## Module Overview
//!
//! - [`model`] - The [`Model`](model::Model) and [`Record`](model::Record) traits
//! - [`fields`] - Field definitions ([`FieldDef`](fields::FieldDef)) and types
//! - [`value`] - The [`Value`](value::Value) enum
//! - [`row`] - Result rows and typed extraction
//! - [`query`] - Lookups, expressions, compilation, querysets and bulk writes
//! - [`relations`] - Cached related rows
//! - [`inheritance`] - Multi-table inheritance write paths
//! - [`transactions`] - Atomic blocks, savepoints and commit hooks

// These clippy lints are intentionally allowed for the ORM crate:
// - struct_excessive_bools: FieldDef carries one flag per field option
// - too_many_lines: the SQL compiler methods are large match statements
// - format_push_string: format! with push_str is clearer than write! for SQL generation
// - doc_markdown: backtick requirements for documentation items are too strict
// - needless_pass_by_value: builder-style signatures take owned values
// - return_self_not_must_use: builder pattern methods are self-documenting
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::result_large_err)]
#![allow(clippy::format_push_string)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::use_self)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::match_same_arms)]
// significant_drop_tightening: false positives with async Mutex guards
#![allow(clippy::significant_drop_tightening)]

pub mod executor;
pub mod fields;
pub mod inheritance;
pub mod model;
pub mod query;
pub mod relations;
pub mod row;
pub mod transactions;
pub mod value;

#[cfg(test)]
mod testing;

pub use executor::DbExecutor;
pub use fields::{FieldDef, FieldType, OnDelete, PreSaveFn};
pub use model::{Model, ModelMeta, ParentLink, Record};
pub use query::{
    AggregateFunc, DatabaseBackendType, Expression, ExpressionKind, Lookup, Manager, OnConflict,
    OrderBy, Query, QuerySet, SelectColumn, SqlCompiler, SubqueryExpression, When, WhereNode, Q,
};
pub use relations::{cache_relations, load_related, LookupFailed, RelatedCache, RelatedRecord};
pub use row::{FromValue, Row};
pub use transactions::{atomic, TransactionManager};
pub use value::Value;

pub use query::bulk::{
    bulk_create, bulk_update, conflict_handling, BulkCreateOptions, BulkUpdateOptions,
};
