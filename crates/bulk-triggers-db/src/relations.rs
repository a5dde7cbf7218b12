//! Loaded related rows.
//!
//! A model instance can keep the rows its foreign keys point to in a
//! [`RelatedCache`], so that code running after those rows are gone (or
//! without a database handle) can still read them through
//! [`Record::related`]. Loading is best-effort: [`load_related`] reports a
//! [`LookupFailed`] value instead of an error, and [`cache_relations`]
//! simply skips fields it cannot load.

use std::collections::HashMap;

use crate::executor::DbExecutor;
use crate::model::{Model, Record};
use crate::query::compiler::{Query, SqlCompiler, WhereNode};
use crate::query::lookups::Q;
use crate::row::Row;
use crate::value::Value;

/// Why a related row could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot load '{field}': {reason}")]
pub struct LookupFailed {
    pub field: String,
    pub reason: String,
}

impl LookupFailed {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// A detached copy of one row of a related table.
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedRecord {
    table: String,
    values: Vec<(String, Value)>,
}

impl RelatedRecord {
    pub fn new(table: impl Into<String>, values: Vec<(String, Value)>) -> Self {
        Self {
            table: table.into(),
            values,
        }
    }

    pub fn from_row(table: impl Into<String>, row: Row) -> Self {
        Self::new(table, row.into_pairs())
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }
}

impl Record for RelatedRecord {
    fn model_name(&self) -> &str {
        &self.table
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        self.get(field)
            .or_else(|| self.get(&format!("{field}_id")))
            .cloned()
    }

    fn related(&self, _field: &str) -> Option<&dyn Record> {
        None
    }
}

/// Related rows keyed by relation field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelatedCache {
    entries: HashMap<String, RelatedRecord>,
}

impl RelatedCache {
    pub fn get(&self, field: &str) -> Option<&RelatedRecord> {
        self.entries.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.entries.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, record: RelatedRecord) {
        self.entries.insert(field.into(), record);
    }

    pub fn remove(&mut self, field: &str) -> Option<RelatedRecord> {
        self.entries.remove(field)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Loads the row that relation `field` of `obj` points to.
pub async fn load_related<M: Model>(
    db: &dyn DbExecutor,
    obj: &M,
    field: &str,
) -> Result<RelatedRecord, LookupFailed> {
    let def = M::meta()
        .get_field(field)
        .ok_or_else(|| LookupFailed::new(field, "no such field"))?;
    let (to, to_field) = def
        .field_type
        .relation_target()
        .ok_or_else(|| LookupFailed::new(field, "not a single-valued relation"))?;
    let key = match obj.field_value(&def.attname) {
        None | Some(Value::Null) => return Err(LookupFailed::new(field, "relation is null")),
        Some(key) => key,
    };

    let mut query = Query::new(to);
    query.add_filter(WhereNode::from_q(&Q::exact(to_field, key)));
    query.limit = Some(1);
    let (sql, params) = SqlCompiler::new(db.backend_type()).compile_select(&query);
    let rows = db
        .query(&sql, &params)
        .await
        .map_err(|e| LookupFailed::new(field, e.to_string()))?;
    rows.into_iter()
        .next()
        .map(|row| RelatedRecord::from_row(to, row))
        .ok_or_else(|| LookupFailed::new(field, "related row does not exist"))
}

/// Fills each object's related cache for `fields`, or for every
/// single-valued relation when `fields` is `None`.
///
/// Entries already cached are left alone. Returns how many entries were
/// loaded.
pub async fn cache_relations<M: Model>(
    db: &dyn DbExecutor,
    objs: &mut [M],
    fields: Option<&[&str]>,
) -> usize {
    let names: Vec<&str> = match fields {
        Some(fields) => fields.to_vec(),
        None => M::meta().relation_fields().map(|f| f.name).collect(),
    };
    let mut loaded = 0;
    for obj in objs.iter_mut() {
        for name in &names {
            let cached = obj
                .related_cache()
                .map_or(true, |cache| cache.contains(name));
            if cached {
                continue;
            }
            match load_related(db, obj, name).await {
                Ok(record) => {
                    if let Some(cache) = obj.related_cache_mut() {
                        cache.insert(*name, record);
                        loaded += 1;
                    }
                }
                Err(failed) => {
                    tracing::trace!(model = M::table_name(), %failed, "relation not cached");
                }
            }
        }
    }
    loaded
}
