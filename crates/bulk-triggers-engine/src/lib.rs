//! # bulk-triggers-engine
//!
//! Salesforce-style triggers over the bulk operations of
//! [`bulk_triggers_db`]. Handlers register against a model and an event
//! such as `BEFORE_UPDATE`. Each bulk write runs the matching handlers
//! over the whole batch inside the write's transaction.
//!
//! ## Architecture
//!
//! A [`TriggerContext`] owns the transaction, the registry and the
//! per-call state: the bypass flag, nesting frames and the dispatch queue.
//! The façade ([`TriggerQuerySet`], reached through
//! [`TriggerModelExt::objects`]) sequences the VALIDATE, BEFORE and AFTER
//! events of each operation around the baseline write. The
//! [`dispatcher`] filters each batch by the registration's [`Condition`]
//! and calls handlers in priority order.
//!
//! ## Module Overview
//!
//! - [`events`] - The nine [`TriggerEvent`]s
//! - [`priority`] - Handler ordering
//! - [`conditions`] - Declarative record filters
//! - [`handler`] - Handler classes, methods and factories
//! - [`registry`] - The registration table and the process-wide [`REGISTRY`]
//! - [`context`] - Per-call trigger state
//! - [`dispatcher`] - Running and queueing handler batches
//! - [`mutation`] - Detecting handler changes and folding them into CASE updates
//! - [`safety`] - Update values, subquery handling and record validation
//! - [`queryset`] - The trigger-firing bulk operations
//! - [`manager`] - `Model::objects(&ctx)`

// These clippy lints are intentionally allowed for the engine crate:
// - doc_markdown: event names like BEFORE_UPDATE read better without backticks
// - needless_pass_by_value: builder-style signatures take owned values
// - return_self_not_must_use: builder pattern methods are self-documenting
// - type_complexity: the registry's nested maps are spelled out once
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::type_complexity)]
#![allow(clippy::use_self)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::cast_possible_truncation)]
// significant_drop_tightening: false positives with guard-scoped state
#![allow(clippy::significant_drop_tightening)]

pub mod conditions;
pub mod context;
pub mod dispatcher;
pub mod events;
pub mod handler;
pub mod manager;
pub mod mutation;
pub mod priority;
pub mod queryset;
pub mod registry;
pub mod safety;

#[cfg(test)]
mod testing;

pub use conditions::Condition;
pub use context::{TriggerContext, TriggerContextBuilder};
pub use dispatcher::{handle, run};
pub use events::{Operation, Phase, TriggerEvent};
pub use handler::{
    HandlerClass, HandlerFactories, HandlerFactory, HandlerFuture, TriggerArgs, TriggerHandler,
};
pub use manager::{BulkTriggerManager, TriggerModelExt};
pub use priority::Priority;
pub use queryset::TriggerQuerySet;
pub use registry::{RegistrationInfo, TriggerRegistration, TriggerRegistry, REGISTRY};
pub use safety::UpdateValue;
