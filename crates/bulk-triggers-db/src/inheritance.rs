//! Write paths for multi-table inheritance.
//!
//! A child model's fields are split between two tables. Fields marked
//! `inherited` live on the parent table; the rest live on the child table,
//! whose primary key column holds the parent row's primary key.

use bulk_triggers_core::TriggerResult;

use crate::executor::DbExecutor;
use crate::model::{Model, ParentLink};
use crate::query::bulk::{chunk_len, BulkCreateOptions};
use crate::query::compiler::{OnConflict, SqlCompiler, WhereNode};
use crate::query::expressions::Expression;
use crate::value::Value;

fn parent_link<M: Model>() -> TriggerResult<&'static ParentLink> {
    M::meta().parent.as_ref().ok_or_else(|| {
        bulk_triggers_core::TriggerError::ImproperlyConfigured(format!(
            "{} has no parent table",
            M::meta().label()
        ))
    })
}

/// Inserts each object as a parent row followed by a child row.
///
/// Parent rows are inserted one at a time so each generated key can be
/// linked; child rows are then inserted in batches.
pub async fn insert_multi_table<M: Model>(
    db: &dyn DbExecutor,
    objs: &mut [M],
    options: &BulkCreateOptions,
) -> TriggerResult<u64> {
    let link = parent_link::<M>()?;
    let meta = M::meta();
    let pk_column = M::pk_field_name();
    let compiler = SqlCompiler::new(db.backend_type());
    let child_conflict = if options.ignore_conflicts {
        OnConflict::Ignore
    } else {
        OnConflict::Error
    };

    for obj in objs.iter_mut() {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (column, value) in obj.field_values() {
            if meta.is_parent_column(column) {
                columns.push(column);
                values.push(value);
            }
        }
        match obj.pk() {
            Some(pk) => {
                columns.push(link.parent_pk.as_str());
                values.push(pk);
                let (sql, params) =
                    compiler.compile_insert(&link.table, &columns, &[values], &OnConflict::Error, None);
                db.execute_sql(&sql, &params).await?;
            }
            None => {
                let (sql, params) =
                    compiler.compile_insert(&link.table, &columns, &[values], &OnConflict::Error, None);
                let pk = db.insert_returning_id(&sql, &params).await?;
                obj.set_pk(pk);
            }
        }
    }

    let mut inserted = 0;
    for chunk in objs.chunks(chunk_len(options.batch_size, objs.len())) {
        let child_values = |obj: &M| -> Vec<(&'static str, Value)> {
            obj.field_values()
                .into_iter()
                .filter(|(column, _)| !meta.is_parent_column(column))
                .collect()
        };
        let Some(first) = chunk.first() else {
            continue;
        };
        let columns: Vec<&str> = child_values(first).into_iter().map(|(c, _)| c).collect();
        let rows: Vec<Vec<Value>> = chunk
            .iter()
            .map(|obj| child_values(obj).into_iter().map(|(_, v)| v).collect())
            .collect();
        debug_assert!(columns.contains(&pk_column));
        let (sql, params) =
            compiler.compile_insert(M::table_name(), &columns, &rows, &child_conflict, None);
        inserted += db.execute_sql(&sql, &params).await?;
    }
    Ok(inserted)
}

/// Applies `assignments` to the rows with primary keys `pks`, sending each
/// column to the table that owns it. Returns rows affected.
pub async fn update_multi_table<M: Model>(
    db: &dyn DbExecutor,
    pks: &[Value],
    assignments: &[(String, Expression)],
) -> TriggerResult<u64> {
    if pks.is_empty() || assignments.is_empty() {
        return Ok(0);
    }
    let link = parent_link::<M>()?;
    let meta = M::meta();
    let pk_column = M::pk_field_name();
    let compiler = SqlCompiler::new(db.backend_type());

    let (parent, child): (Vec<_>, Vec<_>) = assignments
        .iter()
        .cloned()
        .partition(|(column, _)| meta.is_parent_column(column));

    let mut affected = 0;
    if !parent.is_empty() {
        let parent: Vec<(String, Expression)> = parent
            .into_iter()
            .map(|(column, mut expr)| {
                expr.rename_column(pk_column, &link.parent_pk);
                (column, expr)
            })
            .collect();
        let filter = WhereNode::column_in(link.parent_pk.clone(), pks.to_vec());
        let (sql, params) = compiler.compile_update(&link.table, &parent, &filter);
        affected = db.execute_sql(&sql, &params).await?;
    }
    if !child.is_empty() {
        let filter = WhereNode::column_in(pk_column, pks.to_vec());
        let (sql, params) = compiler.compile_update(M::table_name(), &child, &filter);
        affected = affected.max(db.execute_sql(&sql, &params).await?);
    }
    Ok(affected)
}

/// Deletes the child rows, then their parent rows. Returns child rows deleted.
pub async fn delete_multi_table<M: Model>(
    db: &dyn DbExecutor,
    pks: &[Value],
) -> TriggerResult<u64> {
    if pks.is_empty() {
        return Ok(0);
    }
    let link = parent_link::<M>()?;
    let compiler = SqlCompiler::new(db.backend_type());

    let filter = WhereNode::column_in(M::pk_field_name(), pks.to_vec());
    let (sql, params) = compiler.compile_delete(M::table_name(), &filter);
    let deleted = db.execute_sql(&sql, &params).await?;

    let filter = WhereNode::column_in(link.parent_pk.clone(), pks.to_vec());
    let (sql, params) = compiler.compile_delete(&link.table, &filter);
    db.execute_sql(&sql, &params).await?;
    Ok(deleted)
}
