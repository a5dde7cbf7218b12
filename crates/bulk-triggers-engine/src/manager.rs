//! The trigger-aware manager.
//!
//! `Model::objects(&ctx)` hands out a [`BulkTriggerManager`], the entry point
//! a model's code uses for its writes. Every method passes straight through
//! to a [`TriggerQuerySet`].

use std::marker::PhantomData;

use bulk_triggers_core::TriggerResult;
use bulk_triggers_db::{BulkCreateOptions, BulkUpdateOptions, Manager, Model, QuerySet, Value, Q};

use crate::context::TriggerContext;
use crate::queryset::TriggerQuerySet;
use crate::safety::UpdateValue;

pub struct BulkTriggerManager<'c, M: Model> {
    ctx: &'c TriggerContext,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Clone for BulkTriggerManager<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: Model> Copy for BulkTriggerManager<'_, M> {}

impl<M: Model> std::fmt::Debug for BulkTriggerManager<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkTriggerManager")
            .field("model", &M::table_name())
            .finish_non_exhaustive()
    }
}

impl<'c, M: Model> BulkTriggerManager<'c, M> {
    pub const fn new(ctx: &'c TriggerContext) -> Self {
        Self {
            ctx,
            _model: PhantomData,
        }
    }

    pub fn all(&self) -> TriggerQuerySet<'c, M> {
        TriggerQuerySet::new(self.ctx)
    }

    pub fn filter(&self, q: Q) -> TriggerQuerySet<'c, M> {
        self.all().filter(q)
    }

    pub fn exclude(&self, q: Q) -> TriggerQuerySet<'c, M> {
        self.all().exclude(q)
    }

    pub fn pk_in(&self, pks: Vec<Value>) -> TriggerQuerySet<'c, M> {
        self.all().pk_in(pks)
    }

    pub fn bypass_triggers(&self, bypass: bool) -> TriggerQuerySet<'c, M> {
        self.all().bypass_triggers(bypass)
    }

    pub fn bypass_validation(&self, bypass: bool) -> TriggerQuerySet<'c, M> {
        self.all().bypass_validation(bypass)
    }

    /// The plain manager, for writes that must never fire triggers.
    pub const fn base_manager(&self) -> Manager<M> {
        Manager::new()
    }

    pub fn base_queryset(&self) -> QuerySet<M> {
        QuerySet::new()
    }

    pub async fn bulk_create(&self, objs: &mut [M]) -> TriggerResult<u64> {
        self.all().bulk_create(objs).await
    }

    pub async fn bulk_create_with(
        &self,
        objs: &mut [M],
        options: BulkCreateOptions,
    ) -> TriggerResult<u64> {
        self.all().bulk_create_with(objs, options).await
    }

    pub async fn bulk_update(&self, objs: &mut [M], fields: Option<&[&str]>) -> TriggerResult<u64> {
        self.all().bulk_update(objs, fields).await
    }

    pub async fn bulk_update_with(
        &self,
        objs: &mut [M],
        fields: Option<&[&str]>,
        options: BulkUpdateOptions,
    ) -> TriggerResult<u64> {
        self.all().bulk_update_with(objs, fields, options).await
    }

    pub async fn bulk_delete(&self, objs: &mut [M]) -> TriggerResult<u64> {
        self.all().bulk_delete(objs).await
    }

    /// Updates every row of the model.
    pub async fn update<I, K, V>(&self, assignments: I) -> TriggerResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<UpdateValue>,
    {
        self.all().update(assignments).await
    }

    /// Deletes every row of the model.
    pub async fn delete(&self) -> TriggerResult<u64> {
        self.all().delete().await
    }
}

/// Adds `objects(&ctx)` to every model.
pub trait TriggerModelExt: Model {
    fn objects(ctx: &TriggerContext) -> BulkTriggerManager<'_, Self> {
        BulkTriggerManager::new(ctx)
    }
}

impl<M: Model> TriggerModelExt for M {}
