//! Baseline bulk writes.
//!
//! [`bulk_create`] inserts many rows per statement and populates generated
//! primary keys: through `RETURNING` where the backend supports it, and one
//! insert per row otherwise. [`bulk_update`] writes many rows per statement
//! with one `CASE WHEN pk = ... THEN ...` expression per field.
//!
//! Both split work into batches of `batch_size` objects.
//!
//! `bulk_create` can also upsert: with `update_conflicts`, a row that
//! collides on `unique_fields` overwrites the stored row's `update_fields`
//! instead of failing.

use bulk_triggers_core::{TriggerError, TriggerResult};

use crate::executor::DbExecutor;
use crate::fields::FieldType;
use crate::inheritance;
use crate::model::Model;
use crate::query::compiler::{OnConflict, SqlCompiler};
use crate::query::expressions::{Expression, When};
use crate::query::lookups::Q;
use crate::query::queryset::Manager;
use crate::value::Value;

/// Options for [`bulk_create`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkCreateOptions {
    /// Objects per INSERT. `None` means all at once.
    pub batch_size: Option<usize>,
    /// Skip rows that violate unique constraints. Primary keys are not
    /// populated in this mode.
    pub ignore_conflicts: bool,
    /// Overwrite the stored row when an insert collides on `unique_fields`.
    pub update_conflicts: bool,
    /// Fields written over the stored row on conflict.
    pub update_fields: Vec<String>,
    /// Fields whose collision turns the insert into an update.
    pub unique_fields: Vec<String>,
}

/// Options for [`bulk_update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkUpdateOptions {
    /// Objects per UPDATE. `None` means all at once.
    pub batch_size: Option<usize>,
}

/// Rejects a batch size of zero.
///
/// # Errors
///
/// Returns `ValueError` for `Some(0)`.
pub fn validate_batch_size(batch_size: Option<usize>) -> TriggerResult<()> {
    match batch_size {
        Some(0) => Err(TriggerError::ValueError(
            "Batch size must be a positive integer.".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Resolves the conflict options of a `bulk_create` on `M` into columns.
///
/// # Errors
///
/// Returns `ValueError` when both conflict modes are requested, when an
/// upsert names no update or unique fields, names a field `M` does not
/// have, or tries to overwrite the primary key.
pub fn conflict_handling<M: Model>(options: &BulkCreateOptions) -> TriggerResult<OnConflict> {
    if options.ignore_conflicts && options.update_conflicts {
        return Err(TriggerError::ValueError(
            "ignore_conflicts and update_conflicts are mutually exclusive.".to_string(),
        ));
    }
    if options.ignore_conflicts {
        return Ok(OnConflict::Ignore);
    }
    if !options.update_conflicts {
        return Ok(OnConflict::Error);
    }
    if options.update_fields.is_empty() {
        return Err(TriggerError::ValueError(
            "Fields that will be updated when a row insertion fails on conflicts must be provided."
                .to_string(),
        ));
    }
    if options.unique_fields.is_empty() {
        return Err(TriggerError::ValueError(
            "Unique fields that can trigger the upsert must be provided.".to_string(),
        ));
    }
    if M::meta().has_parent() {
        return Err(TriggerError::ValueError(format!(
            "update_conflicts is not supported for multi-table inherited model {}.",
            M::meta().model_name
        )));
    }

    let update = resolve_conflict_fields::<M>(&options.update_fields, "update_fields")?;
    if update.iter().any(|column| column == M::pk_field_name()) {
        return Err(TriggerError::ValueError(
            "bulk_create() cannot be used with primary keys in update_fields.".to_string(),
        ));
    }
    let unique = resolve_conflict_fields::<M>(&options.unique_fields, "unique_fields")?;
    Ok(OnConflict::Update { unique, update })
}

fn resolve_conflict_fields<M: Model>(names: &[String], option: &str) -> TriggerResult<Vec<String>> {
    let meta = M::meta();
    names
        .iter()
        .map(|name| {
            let field = meta.get_field(name).ok_or_else(|| {
                TriggerError::ValueError(format!("{} has no field named '{name}'", meta.model_name))
            })?;
            if !field.is_concrete() {
                return Err(TriggerError::ValueError(format!(
                    "bulk_create() can only be used with concrete fields in {option}."
                )));
            }
            Ok(field.attname.clone())
        })
        .collect()
}

/// The chunk length to use for `total` objects.
pub fn chunk_len(batch_size: Option<usize>, total: usize) -> usize {
    batch_size.unwrap_or(total).max(1)
}

/// Builds `CASE WHEN pk = ? THEN value ... ELSE column END` for one column.
///
/// Rows not covered by a branch keep their stored value.
pub fn case_for_column(
    pk_column: &str,
    column: &str,
    rows: Vec<(Value, Expression)>,
    output_field: Option<FieldType>,
) -> Expression {
    let whens = rows
        .into_iter()
        .map(|(pk, then)| When::new(Q::exact(pk_column, pk), then))
        .collect();
    let case = Expression::case(whens, Some(Expression::col(column)));
    match output_field {
        Some(ft) => case.with_output_field(ft),
        None => case,
    }
}

/// Inserts `objs` and populates their primary keys. Returns rows inserted.
///
/// Objects that already carry a primary key are inserted with it; the rest
/// get one generated by the database.
pub async fn bulk_create<M: Model>(
    db: &dyn DbExecutor,
    objs: &mut [M],
    options: &BulkCreateOptions,
) -> TriggerResult<u64> {
    validate_batch_size(options.batch_size)?;
    let on_conflict = conflict_handling::<M>(options)?;
    if objs.is_empty() {
        return Ok(0);
    }
    if M::meta().has_parent() {
        return inheritance::insert_multi_table(db, objs, options).await;
    }

    let (with_pk, without_pk): (Vec<usize>, Vec<usize>) =
        (0..objs.len()).partition(|&i| objs[i].pk().is_some());

    let mut inserted = 0;
    for (indices, explicit_pk) in [(with_pk, true), (without_pk, false)] {
        for chunk in indices.chunks(chunk_len(options.batch_size, indices.len())) {
            inserted += insert_chunk(db, objs, chunk, explicit_pk, &on_conflict).await?;
        }
    }
    Ok(inserted)
}

async fn insert_chunk<M: Model>(
    db: &dyn DbExecutor,
    objs: &mut [M],
    chunk: &[usize],
    explicit_pk: bool,
    on_conflict: &OnConflict,
) -> TriggerResult<u64> {
    let Some(&first) = chunk.first() else {
        return Ok(0);
    };
    let values_of = |obj: &M| {
        if explicit_pk {
            obj.field_values()
        } else {
            obj.non_pk_field_values()
        }
    };
    let columns: Vec<&'static str> = values_of(&objs[first]).into_iter().map(|(c, _)| c).collect();
    let rows: Vec<Vec<Value>> = chunk
        .iter()
        .map(|&i| values_of(&objs[i]).into_iter().map(|(_, v)| v).collect())
        .collect();

    let compiler = SqlCompiler::new(db.backend_type());
    let pk_column = M::pk_field_name();
    let wants_pks = !explicit_pk && *on_conflict != OnConflict::Ignore;

    if wants_pks && (columns.is_empty() || !db.supports_returning()) {
        for (&i, row) in chunk.iter().zip(&rows) {
            let (sql, params) =
                compiler.compile_insert(M::table_name(), &columns, std::slice::from_ref(row), on_conflict, None);
            let pk = db.insert_returning_id(&sql, &params).await?;
            objs[i].set_pk(pk);
        }
        return Ok(chunk.len() as u64);
    }

    if wants_pks {
        let (sql, params) =
            compiler.compile_insert(M::table_name(), &columns, &rows, on_conflict, Some(pk_column));
        let returned = db.query(&sql, &params).await?;
        for (&i, row) in chunk.iter().zip(&returned) {
            objs[i].set_pk(row.get::<Value>(pk_column)?);
        }
        return Ok(returned.len() as u64);
    }

    let (sql, params) = compiler.compile_insert(M::table_name(), &columns, &rows, on_conflict, None);
    db.execute_sql(&sql, &params).await
}

/// Writes `fields` of `objs` back to storage. Returns rows affected.
///
/// This is the trigger-free baseline. The trigger engine stages its values
/// and writes them through its own update path, so handlers that run
/// during the write see the staged values.
///
/// # Errors
///
/// Returns `ValueError` for a zero batch size, unsaved objects, primary key
/// fields, many-to-many fields, or unknown fields.
pub async fn bulk_update<M: Model>(
    db: &dyn DbExecutor,
    objs: &[M],
    fields: &[&str],
    options: &BulkUpdateOptions,
) -> TriggerResult<u64> {
    validate_batch_size(options.batch_size)?;
    if objs.is_empty() || fields.is_empty() {
        return Ok(0);
    }
    let meta = M::meta();
    let mut targets = Vec::with_capacity(fields.len());
    for name in fields {
        let field = meta.get_field(name).ok_or_else(|| {
            TriggerError::ValueError(format!("{} has no field named '{name}'", meta.model_name))
        })?;
        if field.primary_key {
            return Err(TriggerError::ValueError(
                "bulk_update() cannot be used with primary key fields.".to_string(),
            ));
        }
        if !field.is_concrete() {
            return Err(TriggerError::ValueError(
                "bulk_update() can only be used with concrete fields.".to_string(),
            ));
        }
        targets.push(field);
    }

    let mut pks = Vec::with_capacity(objs.len());
    for obj in objs {
        pks.push(obj.pk().ok_or_else(|| {
            TriggerError::ValueError(
                "All bulk_update() objects must have a primary key set.".to_string(),
            )
        })?);
    }

    let pk_column = M::pk_field_name();
    let mut affected = 0;
    let size = chunk_len(options.batch_size, objs.len());
    for (chunk, chunk_pks) in objs.chunks(size).zip(pks.chunks(size)) {
        let assignments: Vec<(String, Expression)> = targets
            .iter()
            .map(|field| {
                let rows = chunk
                    .iter()
                    .zip(chunk_pks)
                    .map(|(obj, pk)| {
                        let value = obj.field_value(&field.attname).unwrap_or(Value::Null);
                        (pk.clone(), Expression::Value(value))
                    })
                    .collect();
                let case = case_for_column(
                    pk_column,
                    &field.attname,
                    rows,
                    Some(field.field_type.clone()),
                );
                (field.attname.clone(), case)
            })
            .collect();
        affected += Manager::<M>::new()
            .pk_in(chunk_pks.to_vec())
            .update(db, &assignments)
            .await?;
    }
    Ok(affected)
}
