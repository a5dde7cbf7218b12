//! Field definitions.
//!
//! [`FieldDef`] describes one model field: its name, storage attribute and
//! column, [`FieldType`], and the save-time options (`auto_now`,
//! `auto_now_add`, `pre_save`) the bulk engine applies.

pub mod types;

pub use types::{FieldDef, FieldType, OnDelete, PreSaveFn};
