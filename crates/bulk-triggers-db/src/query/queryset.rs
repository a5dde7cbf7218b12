//! The baseline, trigger-free `QuerySet` and `Manager`.
//!
//! A [`QuerySet`] lazily builds a [`Query`] and only touches the database in
//! its async terminal methods. Nothing here fires triggers: the trigger
//! engine uses these types as its base manager, both to load originals and
//! to perform the underlying writes.
//!
//! # Examples
//!
//! ```
//! use bulk_triggers_db::query::{DatabaseBackendType, Manager, Q};
//! # use bulk_triggers_db::model::Model;
//! # fn demo<M: Model>() {
//! let qs = Manager::<M>::new().filter(Q::exact("status", "open"));
//! let (sql, _params) = qs.to_sql(DatabaseBackendType::SQLite);
//! # let _ = sql;
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use bulk_triggers_core::{TriggerError, TriggerResult};

use super::compiler::{DatabaseBackendType, Join, OrderBy, Query, SqlCompiler, WhereNode};
use super::expressions::Expression;
use super::lookups::Q;
use crate::executor::DbExecutor;
use crate::inheritance;
use crate::model::Model;
use crate::value::Value;

/// Entry point for baseline query operations on a model.
pub struct Manager<M: Model> {
    _phantom: PhantomData<M>,
}

impl<M: Model> fmt::Debug for Manager<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("model", &M::table_name())
            .finish()
    }
}

impl<M: Model> Default for Manager<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> Manager<M> {
    pub const fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }

    pub fn all(&self) -> QuerySet<M> {
        QuerySet::new()
    }

    pub fn filter(&self, q: Q) -> QuerySet<M> {
        QuerySet::new().filter(q)
    }

    pub fn exclude(&self, q: Q) -> QuerySet<M> {
        QuerySet::new().exclude(q)
    }

    /// Rows whose primary key is in `pks`.
    pub fn pk_in(&self, pks: Vec<Value>) -> QuerySet<M> {
        QuerySet::new().pk_in(pks)
    }
}

/// A lazy query over one model's table.
pub struct QuerySet<M: Model> {
    query: Query,
    _phantom: PhantomData<M>,
}

impl<M: Model> Clone for QuerySet<M> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<M: Model> fmt::Debug for QuerySet<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuerySet")
            .field("query", &self.query)
            .finish()
    }
}

impl<M: Model> Default for QuerySet<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> QuerySet<M> {
    /// `SELECT *` over the model's table, joined to its parent under
    /// multi-table inheritance.
    pub fn new() -> Self {
        let mut query = Query::new(M::table_name());
        if let Some(parent) = &M::meta().parent {
            query.joins.push(Join {
                table: parent.table.clone(),
                left: format!("{}.{}", M::table_name(), M::pk_field_name()),
                right: format!("{}.{}", parent.table, parent.parent_pk),
            });
        }
        Self {
            query,
            _phantom: PhantomData,
        }
    }

    /// ANDs a filter.
    pub fn filter(mut self, q: Q) -> Self {
        self.query.add_filter(WhereNode::from_q(&q));
        self
    }

    /// ANDs a negated filter.
    pub fn exclude(mut self, q: Q) -> Self {
        self.query.add_filter(WhereNode::from_q(&!q));
        self
    }

    /// Restricts to primary keys in `pks`.
    pub fn pk_in(self, pks: Vec<Value>) -> Self {
        self.filter(Q::any_of(M::pk_field_name(), pks))
    }

    pub fn order_by(mut self, order: Vec<OrderBy>) -> Self {
        self.query.order_by = order;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.query.limit = Some(n);
        self
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// The WHERE clause, or an always-true node when unfiltered.
    pub fn where_node(&self) -> WhereNode {
        self.query
            .where_clause
            .clone()
            .unwrap_or_else(|| WhereNode::And(vec![]))
    }

    pub fn to_sql(&self, backend: DatabaseBackendType) -> (String, Vec<Value>) {
        SqlCompiler::new(backend).compile_select(&self.query)
    }

    /// Loads every matching row.
    pub async fn fetch(&self, db: &dyn DbExecutor) -> TriggerResult<Vec<M>> {
        let (sql, params) = self.to_sql(db.backend_type());
        let rows = db.query(&sql, &params).await?;
        rows.iter().map(M::from_row).collect()
    }

    pub async fn first(&self, db: &dyn DbExecutor) -> TriggerResult<Option<M>> {
        let limited = self.clone().limit(1);
        Ok(limited.fetch(db).await?.into_iter().next())
    }

    pub async fn count(&self, db: &dyn DbExecutor) -> TriggerResult<i64> {
        let (sql, params) = SqlCompiler::new(db.backend_type()).compile_count(&self.query);
        let row = db.query_one(&sql, &params).await?;
        row.get::<i64>("count")
    }

    pub async fn exists(&self, db: &dyn DbExecutor) -> TriggerResult<bool> {
        Ok(self.count(db).await? > 0)
    }

    /// Loads the primary keys of every matching row.
    pub async fn pks(&self, db: &dyn DbExecutor) -> TriggerResult<Vec<Value>> {
        let mut query = self.query.clone();
        let pk = format!("{}.{}", M::table_name(), M::pk_field_name());
        query.select_columns(&[pk.as_str()]);
        let (sql, params) = SqlCompiler::new(db.backend_type()).compile_select(&query);
        let rows = db.query(&sql, &params).await?;
        rows.into_iter()
            .map(|row| row.get_by_index::<Value>(0))
            .collect()
    }

    /// Issues one UPDATE over the matching rows. Returns rows affected.
    ///
    /// Under multi-table inheritance, the assignments are split between the
    /// parent and child tables.
    pub async fn update(
        &self,
        db: &dyn DbExecutor,
        assignments: &[(String, Expression)],
    ) -> TriggerResult<u64> {
        if assignments.is_empty() {
            return Ok(0);
        }
        if M::meta().has_parent() {
            let pks = self.pks(db).await?;
            return inheritance::update_multi_table::<M>(db, &pks, assignments).await;
        }
        let (sql, params) = SqlCompiler::new(db.backend_type()).compile_update(
            M::table_name(),
            assignments,
            &self.where_node(),
        );
        db.execute_sql(&sql, &params).await
    }

    /// Deletes the matching rows. Returns rows deleted.
    pub async fn delete(&self, db: &dyn DbExecutor) -> TriggerResult<u64> {
        if M::meta().has_parent() {
            let pks = self.pks(db).await?;
            return inheritance::delete_multi_table::<M>(db, &pks).await;
        }
        let (sql, params) =
            SqlCompiler::new(db.backend_type()).compile_delete(M::table_name(), &self.where_node());
        db.execute_sql(&sql, &params).await
    }
}

/// Loads instances by primary key, keyed by [`Value::key`].
pub async fn fetch_by_pks<M: Model>(
    db: &dyn DbExecutor,
    pks: &[Value],
) -> TriggerResult<HashMap<String, M>> {
    if pks.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = Manager::<M>::new().pk_in(pks.to_vec()).fetch(db).await?;
    rows.into_iter()
        .map(|obj| {
            let pk = obj.pk().ok_or_else(|| {
                TriggerError::DatabaseError(format!(
                    "Row loaded from {} has no primary key",
                    M::table_name()
                ))
            })?;
            Ok((pk.key(), obj))
        })
        .collect()
}
