//! The trigger-firing queryset.
//!
//! [`TriggerQuerySet`] wraps the baseline [`QuerySet`] and runs every write
//! through the trigger pipeline inside one atomic block on the context's
//! transaction:
//!
//! | operation     | order                                                        |
//! |---------------|--------------------------------------------------------------|
//! | `bulk_create` | validate, before, stamp and pre_save, insert, after          |
//! | `bulk_update` | load originals, stamp, validate, before, CASE update, after  |
//! | `update`      | load rows, assign, validate, before, UPDATE, after           |
//! | `bulk_delete` | validate, before, cache relations, delete, after             |
//!
//! Updates carrying a subquery run their BEFORE handlers after the write,
//! once the computed values have been read back.
//!
//! An upserting `bulk_create` splits the batch into objects that will
//! overwrite a stored row and objects that are new. Each group gets its own
//! CREATE events, and the overwriting group sees the stored rows as its
//! old records.
//!
//! Any error rolls the whole block back, nested trigger writes included.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use bulk_triggers_core::logging::{operation_span, ENGINE_TARGET};
use bulk_triggers_core::{TriggerError, TriggerResult};
use bulk_triggers_db::query::bulk::{chunk_len, validate_batch_size};
use bulk_triggers_db::query::fetch_by_pks;
use bulk_triggers_db::{
    atomic, bulk_create, cache_relations, conflict_handling, BulkCreateOptions, BulkUpdateOptions,
    Expression, FieldDef, Manager, Model, OnConflict, PreSaveFn, QuerySet, Record, Value, Q,
};
use chrono::Utc;
use tracing::Instrument;

use crate::context::{TriggerContext, ValueMap};
use crate::dispatcher;
use crate::events::{Phase, TriggerEvent};
use crate::mutation::{build_case_statements, detect_modified_fields, detect_modified_fields_except};
use crate::safety::{complete_output_fields, has_subquery, refresh_from_db, validate_records, UpdateValue};

type CountFuture<'a> = Pin<Box<dyn Future<Output = TriggerResult<u64>> + Send + 'a>>;

/// A queryset whose bulk writes fire triggers.
pub struct TriggerQuerySet<'c, M: Model> {
    ctx: &'c TriggerContext,
    base: QuerySet<M>,
    bypass_triggers: bool,
    bypass_validation: bool,
}

impl<M: Model> Clone for TriggerQuerySet<'_, M> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx,
            base: self.base.clone(),
            bypass_triggers: self.bypass_triggers,
            bypass_validation: self.bypass_validation,
        }
    }
}

impl<M: Model> std::fmt::Debug for TriggerQuerySet<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerQuerySet")
            .field("model", &M::table_name())
            .field("base", &self.base)
            .field("bypass_triggers", &self.bypass_triggers)
            .field("bypass_validation", &self.bypass_validation)
            .finish()
    }
}

impl<'c, M: Model> TriggerQuerySet<'c, M> {
    /// Every row of `M`.
    pub fn new(ctx: &'c TriggerContext) -> Self {
        Self::from_base(ctx, QuerySet::new())
    }

    pub fn from_base(ctx: &'c TriggerContext, base: QuerySet<M>) -> Self {
        Self {
            ctx,
            base,
            bypass_triggers: false,
            bypass_validation: false,
        }
    }

    #[must_use]
    pub fn filter(mut self, q: Q) -> Self {
        self.base = self.base.filter(q);
        self
    }

    #[must_use]
    pub fn exclude(mut self, q: Q) -> Self {
        self.base = self.base.exclude(q);
        self
    }

    #[must_use]
    pub fn pk_in(mut self, pks: Vec<Value>) -> Self {
        self.base = self.base.pk_in(pks);
        self
    }

    /// Skips every trigger for operations on this queryset.
    #[must_use]
    pub fn bypass_triggers(mut self, bypass: bool) -> Self {
        self.bypass_triggers = bypass;
        self
    }

    /// Skips only the VALIDATE events.
    #[must_use]
    pub fn bypass_validation(mut self, bypass: bool) -> Self {
        self.bypass_validation = bypass;
        self
    }

    pub const fn context(&self) -> &'c TriggerContext {
        self.ctx
    }

    /// The trigger-free queryset underneath.
    pub const fn base(&self) -> &QuerySet<M> {
        &self.base
    }

    // ── Reads ────────────────────────────────────────────────────────────

    pub async fn fetch(&self) -> TriggerResult<Vec<M>> {
        self.base.fetch(self.ctx.db()).await
    }

    pub async fn first(&self) -> TriggerResult<Option<M>> {
        self.base.first(self.ctx.db()).await
    }

    pub async fn count(&self) -> TriggerResult<i64> {
        self.base.count(self.ctx.db()).await
    }

    pub async fn exists(&self) -> TriggerResult<bool> {
        self.base.exists(self.ctx.db()).await
    }

    // ── Dispatch ─────────────────────────────────────────────────────────

    async fn fire(
        &self,
        event: TriggerEvent,
        new_records: &mut [M],
        old_records: Option<&[M]>,
    ) -> TriggerResult<()> {
        if self.bypass_triggers || (self.bypass_validation && event.phase() == Phase::Validate) {
            return Ok(());
        }
        dispatcher::run(self.ctx, event, new_records, old_records).await
    }

    // ── bulk_create ──────────────────────────────────────────────────────

    /// Inserts `objs`, populating their primary keys.
    pub async fn bulk_create(&self, objs: &mut [M]) -> TriggerResult<u64> {
        self.bulk_create_with(objs, BulkCreateOptions::default()).await
    }

    /// Inserts `objs` with explicit options. A missing `batch_size` falls
    /// back to the configured default.
    ///
    /// # Errors
    ///
    /// Returns `ValueError` for a zero batch size or invalid conflict
    /// options, and any trigger or database error. Nothing is written on
    /// error.
    pub async fn bulk_create_with(
        &self,
        objs: &mut [M],
        mut options: BulkCreateOptions,
    ) -> TriggerResult<u64> {
        options.batch_size = options.batch_size.or(self.ctx.settings().default_batch_size);
        validate_batch_size(options.batch_size)?;
        let on_conflict = conflict_handling::<M>(&options)?;
        validate_records::<M>("bulk_create", &erase(objs))?;
        if objs.is_empty() {
            return Ok(0);
        }

        let span = operation_span("bulk_create", M::table_name(), objs.len());
        atomic(self.ctx.txn(), async move {
            let plan = match &on_conflict {
                OnConflict::Update { unique, .. } if !self.bypass_triggers => {
                    Some(self.classify_upsert(objs, unique).await?)
                }
                _ => None,
            };
            self.fire_create(TriggerEvent::ValidateCreate, objs, plan.as_ref())
                .await?;
            self.fire_create(TriggerEvent::BeforeCreate, objs, plan.as_ref())
                .await?;
            stamp_for_create(objs)?;
            let inserted = bulk_create(self.ctx.db(), objs, &options).await?;
            tracing::debug!(target: ENGINE_TARGET, inserted, "rows inserted");
            self.fire_create(TriggerEvent::AfterCreate, objs, plan.as_ref())
                .await?;
            Ok(inserted)
        })
        .instrument(span)
        .await
    }

    async fn fire_create(
        &self,
        event: TriggerEvent,
        objs: &mut [M],
        plan: Option<&UpsertPlan<M>>,
    ) -> TriggerResult<()> {
        let Some(plan) = plan else {
            return self.fire(event, objs, None).await;
        };
        let mut existing: Vec<M> = plan.existing.iter().map(|&i| objs[i].clone()).collect();
        if !existing.is_empty() {
            self.fire(event, &mut existing, Some(plan.stored.as_slice())).await?;
        }
        let mut fresh: Vec<M> = plan.fresh.iter().map(|&i| objs[i].clone()).collect();
        if !fresh.is_empty() {
            self.fire(event, &mut fresh, None).await?;
        }
        for (&i, obj) in plan.existing.iter().zip(existing) {
            objs[i] = obj;
        }
        for (&i, obj) in plan.fresh.iter().zip(fresh) {
            objs[i] = obj;
        }
        Ok(())
    }

    /// Splits `objs` by whether a stored row already holds their `unique`
    /// column values.
    async fn classify_upsert(&self, objs: &[M], unique: &[String]) -> TriggerResult<UpsertPlan<M>> {
        let key_of = |record: &M| -> Option<String> {
            let mut parts = Vec::with_capacity(unique.len());
            for column in unique {
                match record.field_value(column) {
                    Some(value) if !value.is_null() => parts.push(value.key()),
                    _ => return None,
                }
            }
            Some(parts.join("|"))
        };

        let lookups: Vec<Q> = objs
            .iter()
            .filter(|&obj| key_of(obj).is_some())
            .map(|obj| {
                Q::And(
                    unique
                        .iter()
                        .map(|column| {
                            Q::exact(column.clone(), obj.field_value(column).unwrap_or(Value::Null))
                        })
                        .collect(),
                )
            })
            .collect();
        let stored: HashMap<String, M> = if lookups.is_empty() {
            HashMap::new()
        } else {
            QuerySet::<M>::new()
                .filter(Q::Or(lookups))
                .fetch(self.ctx.db())
                .await?
                .into_iter()
                .filter_map(|row| key_of(&row).map(|key| (key, row)))
                .collect()
        };

        let mut plan = UpsertPlan {
            existing: Vec::new(),
            stored: Vec::new(),
            fresh: Vec::new(),
        };
        for (i, obj) in objs.iter().enumerate() {
            match key_of(obj).and_then(|key| stored.get(&key)) {
                Some(row) => {
                    plan.existing.push(i);
                    plan.stored.push(row.clone());
                }
                None => plan.fresh.push(i),
            }
        }
        tracing::debug!(
            target: ENGINE_TARGET,
            model = M::table_name(),
            existing = plan.existing.len(),
            fresh = plan.fresh.len(),
            "classified upsert batch"
        );
        Ok(plan)
    }

    // ── bulk_update ──────────────────────────────────────────────────────

    /// Writes `fields` of `objs`, or every field that differs from the
    /// stored row when `fields` is `None`.
    pub async fn bulk_update(&self, objs: &mut [M], fields: Option<&[&str]>) -> TriggerResult<u64> {
        self.bulk_update_with(objs, fields, BulkUpdateOptions::default())
            .await
    }

    /// [`bulk_update`](Self::bulk_update) with explicit options.
    ///
    /// Objects whose row no longer exists are skipped. Handler mutations
    /// and stamped fields are copied back into `objs`.
    ///
    /// # Errors
    ///
    /// Returns `ValueError` for a zero batch size, unsaved objects, or
    /// fields that are unknown, primary keys or many-to-many.
    pub async fn bulk_update_with(
        &self,
        objs: &mut [M],
        fields: Option<&[&str]>,
        mut options: BulkUpdateOptions,
    ) -> TriggerResult<u64> {
        options.batch_size = options.batch_size.or(self.ctx.settings().default_batch_size);
        validate_batch_size(options.batch_size)?;
        validate_records::<M>("bulk_update", &erase(objs))?;
        if objs.is_empty() {
            return Ok(0);
        }
        let pks = require_pks("bulk_update", objs)?;
        let requested = fields.map(update_fields::<M>).transpose()?;

        let span = operation_span("bulk_update", M::table_name(), objs.len());
        atomic(
            self.ctx.txn(),
            self.bulk_update_inner(objs, pks, requested, options),
        )
        .instrument(span)
        .await
    }

    async fn bulk_update_inner(
        &self,
        objs: &mut [M],
        pks: Vec<Value>,
        requested: Option<Vec<&'static str>>,
        options: BulkUpdateOptions,
    ) -> TriggerResult<u64> {
        let ctx = self.ctx;
        let mut stored = fetch_by_pks::<M>(ctx.db(), &pks).await?;

        let mut slots = Vec::with_capacity(objs.len());
        let mut batch = Vec::with_capacity(objs.len());
        let mut originals = Vec::with_capacity(objs.len());
        for (slot, (obj, pk)) in objs.iter().zip(&pks).enumerate() {
            match stored.remove(&pk.key()) {
                Some(original) => {
                    slots.push(slot);
                    batch.push(obj.clone());
                    originals.push(original);
                }
                None => tracing::warn!(
                    target: ENGINE_TARGET,
                    model = M::table_name(),
                    pk = %pk,
                    "skipping object with no stored row"
                ),
            }
        }

        let mut write_fields = match requested {
            Some(fields) => fields,
            None => {
                let changed = detect_modified_fields(&batch, &originals);
                if changed.is_empty() {
                    tracing::debug!(target: ENGINE_TARGET, model = M::table_name(), "no changes detected");
                    return Ok(0);
                }
                let keep: Vec<bool> = batch
                    .iter()
                    .zip(&originals)
                    .map(|(obj, original)| {
                        !detect_modified_fields(std::slice::from_ref(obj), std::slice::from_ref(original))
                            .is_empty()
                    })
                    .collect();
                retain_flagged(&mut slots, &keep);
                retain_flagged(&mut batch, &keep);
                retain_flagged(&mut originals, &keep);
                changed
            }
        };
        if batch.is_empty() {
            return Ok(0);
        }

        for field in stamp_for_update(&mut batch)? {
            push_unique(&mut write_fields, field);
        }

        let snapshot = batch.clone();
        self.fire(TriggerEvent::ValidateUpdate, &mut batch, Some(&originals))
            .await?;
        self.fire(TriggerEvent::BeforeUpdate, &mut batch, Some(&originals))
            .await?;
        for field in detect_modified_fields(&batch, &snapshot) {
            push_unique(&mut write_fields, field);
        }
        tracing::debug!(
            target: ENGINE_TARGET,
            model = M::table_name(),
            fields = ?write_fields,
            objects = batch.len(),
            "writing bulk update"
        );

        let affected = self.write_staged(&batch, &write_fields, &options).await?;

        self.fire(TriggerEvent::AfterUpdate, &mut batch, Some(&originals))
            .await?;
        for (slot, obj) in slots.into_iter().zip(batch) {
            objs[slot] = obj;
        }
        Ok(affected)
    }

    /// Stages each object's values and funnels them through the update path
    /// with triggers suppressed, one chunk at a time.
    async fn write_staged(
        &self,
        batch: &[M],
        write_fields: &[&'static str],
        options: &BulkUpdateOptions,
    ) -> TriggerResult<u64> {
        let ctx = self.ctx;
        let meta = M::meta();
        let attnames: Vec<&str> = write_fields
            .iter()
            .filter_map(|name| meta.get_field(name))
            .map(|field| field.attname.as_str())
            .collect();

        let _active = ctx.enter_bulk_update(M::table_name());
        let mut affected = 0;
        for chunk in batch.chunks(chunk_len(options.batch_size, batch.len())) {
            let mut values = ValueMap::new();
            let mut chunk_pks = Vec::with_capacity(chunk.len());
            for obj in chunk {
                let Some(pk) = obj.pk() else { continue };
                let row = attnames
                    .iter()
                    .map(|attname| {
                        let value = obj.field_value(attname).unwrap_or(Value::Null);
                        ((*attname).to_string(), value)
                    })
                    .collect();
                values.insert(pk.key(), row);
                chunk_pks.push(pk);
            }
            let _staged = ctx.stage_pending_values(M::table_name(), values);
            affected += TriggerQuerySet::<M>::new(ctx)
                .pk_in(chunk_pks)
                .apply_update(Vec::new())
                .await?;
        }
        Ok(affected)
    }

    // ── update ───────────────────────────────────────────────────────────

    /// Applies `assignments` to every matching row in one UPDATE.
    ///
    /// ```ignore
    /// Account::objects(&ctx)
    ///     .filter(Q::exact("status", "open"))
    ///     .update([("status", UpdateValue::from("won"))])
    ///     .await?;
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `ValueError` for unknown or many-to-many fields, and
    /// `OutputFieldUnresolved` for an expression whose type cannot be
    /// inferred.
    pub async fn update<I, K, V>(&self, assignments: I) -> TriggerResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<UpdateValue>,
    {
        let assignments: Vec<(String, UpdateValue)> = assignments
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let span = operation_span("update", M::table_name(), assignments.len());
        atomic(self.ctx.txn(), self.apply_update(assignments))
            .instrument(span)
            .await
    }

    async fn apply_update(&self, assignments: Vec<(String, UpdateValue)>) -> TriggerResult<u64> {
        let ctx = self.ctx;
        let table = M::table_name();
        let assignments = resolve_columns::<M>(assignments)?;

        let mut instances = self.base.fetch(ctx.db()).await?;
        if instances.is_empty() {
            return Ok(0);
        }
        let originals = instances.clone();
        let subquery = has_subquery(&assignments);
        let expression_columns: Vec<&str> = assignments
            .iter()
            .filter(|(_, value)| value.in_memory_value().is_none())
            .map(|(column, _)| column.as_str())
            .collect();

        if !subquery {
            for instance in &mut instances {
                let staged = instance
                    .pk()
                    .and_then(|pk| ctx.pending_values(table, &pk.key()));
                match staged {
                    Some(values) => {
                        for (attname, value) in values {
                            instance.set_field_value(&attname, value)?;
                        }
                    }
                    None => {
                        for (column, value) in &assignments {
                            if let Some(value) = value.in_memory_value() {
                                instance.set_field_value(column, value)?;
                            }
                        }
                    }
                }
            }
        }

        let triggers_on =
            !self.bypass_triggers && !ctx.bypass_triggers() && !ctx.bulk_update_active(table);
        if triggers_on {
            self.fire(TriggerEvent::ValidateUpdate, &mut instances, Some(&originals))
                .await?;
            if !subquery {
                self.fire(TriggerEvent::BeforeUpdate, &mut instances, Some(&originals))
                    .await?;
            }
        }

        // A subquery update skips the in-memory pass, so every assignment
        // goes to the database as written.
        let mut writes: Vec<(String, Expression)> = assignments
            .iter()
            .filter(|(column, _)| subquery || expression_columns.contains(&column.as_str()))
            .map(|(column, value)| (column.clone(), value.clone().into_expression()))
            .collect();
        if !subquery {
            let modified = detect_modified_fields_except(&instances, &originals, &expression_columns);
            writes.extend(build_case_statements(&instances, &expression_columns, &modified));
        }
        let pks: Vec<Value> = instances.iter().filter_map(Model::pk).collect();
        let affected = if writes.is_empty() {
            instances.len() as u64
        } else {
            let writes = complete_output_fields::<M>(writes)?;
            Manager::<M>::new().pk_in(pks).update(ctx.db(), &writes).await?
        };
        tracing::debug!(target: ENGINE_TARGET, model = table, affected, subquery, "update written");

        if !triggers_on {
            return Ok(affected);
        }
        if subquery {
            refresh_from_db(ctx.db(), &mut instances).await?;
            let refreshed = instances.clone();
            self.fire(TriggerEvent::BeforeUpdate, &mut instances, Some(&originals))
                .await?;
            let modified = detect_modified_fields(&instances, &refreshed);
            if !modified.is_empty() {
                persist_changes(ctx, self.bypass_validation, &mut instances, Some(modified)).await?;
            }
            let settled = instances.clone();
            self.fire(TriggerEvent::AfterUpdate, &mut instances, Some(&originals))
                .await?;
            if !detect_modified_fields(&instances, &settled).is_empty() {
                persist_changes(ctx, self.bypass_validation, &mut instances, None).await?;
            }
        } else {
            self.fire(TriggerEvent::AfterUpdate, &mut instances, Some(&originals))
                .await?;
        }
        Ok(affected)
    }

    // ── delete ───────────────────────────────────────────────────────────

    /// Deletes `objs` by primary key.
    ///
    /// Single-valued relations are cached on each object first, so AFTER
    /// handlers can still read them.
    ///
    /// # Errors
    ///
    /// Returns `ValueError` for unsaved objects.
    pub async fn bulk_delete(&self, objs: &mut [M]) -> TriggerResult<u64> {
        validate_records::<M>("bulk_delete", &erase(objs))?;
        if objs.is_empty() {
            return Ok(0);
        }
        let pks = require_pks("bulk_delete", objs)?;

        let span = operation_span("bulk_delete", M::table_name(), objs.len());
        atomic(self.ctx.txn(), async move {
            self.fire(TriggerEvent::ValidateDelete, objs, None).await?;
            self.fire(TriggerEvent::BeforeDelete, objs, None).await?;
            let cached = cache_relations(self.ctx.db(), objs, None).await;
            tracing::trace!(target: ENGINE_TARGET, cached, "relations cached before delete");
            let deleted = Manager::<M>::new().pk_in(pks).delete(self.ctx.db()).await?;
            self.fire(TriggerEvent::AfterDelete, objs, None).await?;
            Ok(deleted)
        })
        .instrument(span)
        .await
    }

    /// Deletes every matching row, firing delete triggers over them.
    pub async fn delete(&self) -> TriggerResult<u64> {
        atomic(self.ctx.txn(), async {
            let mut rows = self.base.fetch(self.ctx.db()).await?;
            self.bulk_delete(&mut rows).await
        })
        .await
    }
}

/// Positions of an upsert batch by whether they overwrite a stored row.
struct UpsertPlan<M> {
    existing: Vec<usize>,
    /// The stored rows, aligned with `existing`.
    stored: Vec<M>,
    fresh: Vec<usize>,
}

/// Writes trigger mutations found after a subquery update. Triggers fire
/// for this write like for any other bulk update, and a caller that
/// bypassed validation keeps it bypassed.
fn persist_changes<'a, M: Model>(
    ctx: &'a TriggerContext,
    bypass_validation: bool,
    instances: &'a mut [M],
    fields: Option<Vec<&'static str>>,
) -> CountFuture<'a> {
    Box::pin(async move {
        TriggerQuerySet::<M>::new(ctx)
            .bypass_validation(bypass_validation)
            .bulk_update(instances, fields.as_deref())
            .await
    })
}

fn erase<M: Model>(objs: &[M]) -> Vec<&dyn Record> {
    objs.iter().map(|obj| obj as &dyn Record).collect()
}

fn require_pks<M: Model>(operation: &str, objs: &[M]) -> TriggerResult<Vec<Value>> {
    let missing = objs.iter().filter(|obj| obj.pk().is_none()).count();
    if missing > 0 {
        return Err(TriggerError::ValueError(format!(
            "{operation} cannot operate on unsaved {} instances. {missing} object(s) have no primary key.",
            M::meta().model_name
        )));
    }
    Ok(objs.iter().filter_map(Model::pk).collect())
}

/// Resolves requested bulk_update field names to declared field names.
fn update_fields<M: Model>(fields: &[&str]) -> TriggerResult<Vec<&'static str>> {
    let meta = M::meta();
    let mut names = Vec::with_capacity(fields.len());
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
        push_unique(&mut names, field.name);
    }
    Ok(names)
}

/// Keys update assignments by column.
fn resolve_columns<M: Model>(
    assignments: Vec<(String, UpdateValue)>,
) -> TriggerResult<Vec<(String, UpdateValue)>> {
    let meta = M::meta();
    assignments
        .into_iter()
        .map(|(name, value)| {
            let field = meta.get_field(&name).ok_or_else(|| {
                TriggerError::ValueError(format!("{} has no field named '{name}'", meta.model_name))
            })?;
            if !field.is_concrete() {
                return Err(TriggerError::ValueError(format!(
                    "Cannot update many-to-many field '{name}' with update()"
                )));
            }
            Ok((field.attname.clone(), value))
        })
        .collect()
}

fn stamp_for_create<M: Model>(objs: &mut [M]) -> TriggerResult<()> {
    let now = Value::from(Utc::now());
    for field in M::meta().concrete_fields() {
        if field.auto_now || field.auto_now_add {
            for obj in objs.iter_mut() {
                if obj.field_value(&field.attname).map_or(true, |v| v.is_null()) {
                    obj.set_field_value(&field.attname, now.clone())?;
                }
            }
        }
        if let Some(hook) = field.pre_save {
            run_pre_save(objs, field, hook, true)?;
        }
    }
    Ok(())
}

/// Stamps `auto_now` fields and runs pre_save hooks. Returns the fields that
/// must join the update.
fn stamp_for_update<M: Model>(objs: &mut [M]) -> TriggerResult<Vec<&'static str>> {
    let now = Value::from(Utc::now());
    let mut added = Vec::new();
    for field in M::meta().concrete_fields().filter(|f| !f.primary_key) {
        if field.auto_now {
            for obj in objs.iter_mut() {
                obj.set_field_value(&field.attname, now.clone())?;
            }
            added.push(field.name);
        }
        if let Some(hook) = field.pre_save {
            if run_pre_save(objs, field, hook, false)? {
                push_unique(&mut added, field.name);
            }
        }
    }
    Ok(added)
}

fn run_pre_save<M: Model>(
    objs: &mut [M],
    field: &FieldDef,
    hook: PreSaveFn,
    add: bool,
) -> TriggerResult<bool> {
    let mut assigned = false;
    for obj in objs.iter_mut() {
        match hook(&*obj, add) {
            Some(value) => {
                obj.set_field_value(&field.attname, value)?;
                assigned = true;
            }
            None => tracing::warn!(
                target: ENGINE_TARGET,
                model = M::table_name(),
                field = field.name,
                "pre_save produced no value"
            ),
        }
    }
    Ok(assigned)
}

fn push_unique(fields: &mut Vec<&'static str>, field: &'static str) {
    if !fields.contains(&field) {
        fields.push(field);
    }
}

fn retain_flagged<T>(items: &mut Vec<T>, keep: &[bool]) {
    let mut flags = keep.iter();
    items.retain(|_| flags.next().copied().unwrap_or(false));
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::registry::TriggerRegistry;
    use crate::testing::{schema_db, Account};

    async fn ctx() -> TriggerContext {
        TriggerContext::builder(schema_db().await)
            .registry(Arc::new(TriggerRegistry::new()))
            .build()
    }

    #[tokio::test]
    async fn test_bulk_create_stamps_auto_now() {
        let ctx = ctx().await;
        let mut objs = vec![Account::new("a", "open", 1), Account::new("b", "open", 2)];
        let n = TriggerQuerySet::<Account>::new(&ctx)
            .bulk_create(&mut objs)
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert!(objs.iter().all(|o| o.id.is_some() && o.updated_at.is_some()));
    }

    #[tokio::test]
    async fn test_zero_batch_size_rejected() {
        let ctx = ctx().await;
        let mut objs = vec![Account::new("a", "open", 1)];
        let err = TriggerQuerySet::<Account>::new(&ctx)
            .bulk_create_with(
                &mut objs,
                BulkCreateOptions {
                    batch_size: Some(0),
                    ..BulkCreateOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "ValueError: Batch size must be a positive integer.");
        assert!(objs[0].id.is_none());
    }

    #[tokio::test]
    async fn test_unsaved_objects_rejected() {
        let ctx = ctx().await;
        let mut objs = vec![Account::saved(1, "a", "open", 1), Account::new("b", "open", 2)];
        let qs = TriggerQuerySet::<Account>::new(&ctx);
        let err = qs.bulk_update(&mut objs, Some(&["status"])).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "ValueError: bulk_update cannot operate on unsaved Account instances. \
             1 object(s) have no primary key."
        );
        let err = qs.bulk_delete(&mut objs).await.unwrap_err();
        assert!(err.to_string().contains("bulk_delete cannot operate on unsaved"));
    }

    #[tokio::test]
    async fn test_bad_update_fields_rejected() {
        let ctx = ctx().await;
        let qs = TriggerQuerySet::<Account>::new(&ctx);
        let mut objs = vec![Account::saved(1, "a", "open", 1)];
        let err = qs.bulk_update(&mut objs, Some(&["id"])).await.unwrap_err();
        assert!(err.to_string().contains("primary key"));
        let err = qs.bulk_update(&mut objs, Some(&["ghost"])).await.unwrap_err();
        assert_eq!(err.to_string(), "ValueError: Account has no field named 'ghost'");
        let err = qs.update([("ghost", 1)]).await.unwrap_err();
        assert!(matches!(err, TriggerError::ValueError(_)));
    }

    #[tokio::test]
    async fn test_bulk_update_writes_and_stamps() {
        let ctx = ctx().await;
        let qs = TriggerQuerySet::<Account>::new(&ctx);
        let mut objs = vec![Account::new("a", "open", 1), Account::new("b", "open", 2)];
        qs.bulk_create(&mut objs).await.unwrap();
        let created_at = objs[0].updated_at;

        objs[0].status = "won".into();
        objs[1].revenue = 50;
        let n = qs
            .bulk_update_with(&mut objs, None, BulkUpdateOptions { batch_size: Some(1) })
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert!(objs[0].updated_at >= created_at);

        let stored = qs.fetch().await.unwrap();
        assert_eq!(stored[0].status, "won");
        assert_eq!(stored[1].revenue, 50);
        assert!(!ctx.bulk_update_active("crm_account"));
        assert!(!ctx.has_pending_values("crm_account"));
    }

    #[tokio::test]
    async fn test_bulk_update_skips_missing_rows() {
        let ctx = ctx().await;
        let qs = TriggerQuerySet::<Account>::new(&ctx);
        let mut objs = vec![Account::new("a", "open", 1)];
        qs.bulk_create(&mut objs).await.unwrap();
        objs[0].status = "won".into();
        objs.push(Account::saved(404, "ghost", "won", 0));
        let n = qs.bulk_update(&mut objs, Some(&["status"])).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(qs.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queryset_update_and_delete() {
        let ctx = ctx().await;
        let qs = TriggerQuerySet::<Account>::new(&ctx);
        let mut objs = vec![
            Account::new("a", "open", 1),
            Account::new("b", "open", 2),
            Account::new("c", "lost", 3),
        ];
        qs.bulk_create(&mut objs).await.unwrap();

        let n = qs
            .clone()
            .filter(Q::exact("status", "open"))
            .update([("revenue", UpdateValue::from(Expression::value(7)))])
            .await
            .unwrap();
        assert_eq!(n, 2);
        let revenues: Vec<i64> = qs.fetch().await.unwrap().iter().map(|a| a.revenue).collect();
        assert_eq!(revenues, vec![7, 7, 3]);

        let deleted = qs.clone().filter(Q::exact("status", "lost")).delete().await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(qs.count().await.unwrap(), 2);
    }

    #[test]
    fn test_retain_flagged() {
        let mut items = vec!['a', 'b', 'c'];
        retain_flagged(&mut items, &[true, false, true]);
        assert_eq!(items, vec!['a', 'c']);
    }
}
