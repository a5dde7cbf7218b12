//! Trigger dispatch.
//!
//! [`run`] executes every registration for one `(model, event)` over a batch,
//! in priority order, and is what the façade calls at each phase. [`handle`]
//! is the queueing entry point: the outermost call drains a FIFO of batches,
//! and calls made while it drains are appended to the queue instead of
//! running immediately.
//!
//! Handler errors are never caught here. They are logged and returned as-is.

use bulk_triggers_core::logging::{trigger_span, ENGINE_TARGET};
use bulk_triggers_core::{TriggerError, TriggerResult};
use bulk_triggers_db::{cache_relations, Model, Record};
use tracing::Instrument;

use crate::context::TriggerContext;
use crate::events::TriggerEvent;
use crate::handler::{HandlerFuture, TriggerArgs};
use crate::registry::TriggerRegistration;
use crate::safety::validate_records;

/// Runs the handlers registered for `event` on `M` over `new_records`.
///
/// `old_records`, when given, is aligned with `new_records` by position.
/// Handlers may mutate the records; the mutations are visible to the caller
/// and to later handlers.
///
/// # Errors
///
/// Returns the first handler error, or `RecursionLimit` when this
/// `(model, event)` is already nested `max_depth` deep.
pub async fn run<M: Model>(
    ctx: &TriggerContext,
    event: TriggerEvent,
    new_records: &mut [M],
    old_records: Option<&[M]>,
) -> TriggerResult<()> {
    if new_records.is_empty() || ctx.bypass_triggers() {
        return Ok(());
    }
    let registrations = ctx.registry().get(M::table_name(), event);
    if registrations.is_empty() {
        return Ok(());
    }

    let _frame = ctx.enter_frame(M::table_name(), event)?;
    tracing::debug!(
        target: ENGINE_TARGET,
        model = M::table_name(),
        %event,
        records = new_records.len(),
        handlers = registrations.len(),
        "dispatching"
    );
    for registration in &registrations {
        invoke(ctx, registration, event, new_records, old_records).await?;
    }
    Ok(())
}

async fn invoke<M: Model>(
    ctx: &TriggerContext,
    registration: &TriggerRegistration,
    event: TriggerEvent,
    new_records: &mut [M],
    old_records: Option<&[M]>,
) -> TriggerResult<()> {
    let class = registration.handler();
    let invoker = registration.invoker::<M>().ok_or_else(|| {
        TriggerError::ImproperlyConfigured(format!(
            "{}.{} is registered for {} but does not accept its records",
            class.short_name(),
            registration.method_name(),
            M::table_name()
        ))
    })?;

    if !registration.preload_fields().is_empty() {
        let fields: Vec<&str> = registration
            .preload_fields()
            .iter()
            .map(String::as_str)
            .collect();
        cache_relations(ctx.db(), new_records, Some(&fields)).await;
    }

    let matched: Vec<usize> = match registration.condition_ref() {
        None => (0..new_records.len()).collect(),
        Some(condition) => (0..new_records.len())
            .filter(|&i| {
                let old = old_records.and_then(|o| o.get(i)).map(|o| o as &dyn Record);
                condition.check(&new_records[i], old)
            })
            .collect(),
    };
    if matched.is_empty() {
        tracing::trace!(
            target: ENGINE_TARGET,
            handler = class.short_name(),
            method = registration.method_name(),
            "no records matched the condition"
        );
        return Ok(());
    }

    let instance = class.instantiate(ctx.factory())?;
    let span = trigger_span(
        M::table_name(),
        event.as_str(),
        class.short_name(),
        registration.method_name(),
    );

    let result = if matched.len() == new_records.len() {
        let args = TriggerArgs {
            ctx,
            event,
            new_records,
            old_records,
        };
        invoker.0.invoke(instance.as_ref(), args).instrument(span).await
    } else {
        let mut subset: Vec<M> = matched.iter().map(|&i| new_records[i].clone()).collect();
        let old_subset: Option<Vec<M>> = old_records
            .map(|old| matched.iter().filter_map(|&i| old.get(i).cloned()).collect());
        let args = TriggerArgs {
            ctx,
            event,
            new_records: &mut subset,
            old_records: old_subset.as_deref(),
        };
        let result = invoker.0.invoke(instance.as_ref(), args).instrument(span).await;
        for (&slot, record) in matched.iter().zip(subset) {
            new_records[slot] = record;
        }
        result
    };

    if let Err(err) = &result {
        tracing::error!(
            target: ENGINE_TARGET,
            model = M::table_name(),
            %event,
            handler = class.short_name(),
            method = registration.method_name(),
            error = %err,
            "trigger failed"
        );
    }
    result
}

/// A batch waiting in the [`handle`] queue.
pub(crate) trait PendingDispatch: Send {
    fn dispatch(self: Box<Self>, ctx: &TriggerContext) -> HandlerFuture<'_>;
}

struct QueuedBatch<M> {
    event: TriggerEvent,
    new_records: Vec<M>,
    old_records: Option<Vec<M>>,
}

impl<M: Model> PendingDispatch for QueuedBatch<M> {
    fn dispatch(self: Box<Self>, ctx: &TriggerContext) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Self {
                event,
                mut new_records,
                old_records,
            } = *self;
            run(ctx, event, &mut new_records, old_records.as_deref()).await
        })
    }
}

/// Queues a batch for dispatch.
///
/// The outermost call processes the queue: it runs its own batch, then every
/// batch queued while running, strictly in the order they were queued.
/// Nested calls only append and return. A batch queued more than
/// `queue_circuit_breaker` generations deep runs inline instead.
///
/// Records are taken by value, so mutations made by handlers are not
/// returned. Use the façade operations for write paths.
///
/// # Errors
///
/// Returns `TypeError` for records of another model, and otherwise the first
/// dispatch error. A failure discards everything still queued.
pub async fn handle<M: Model>(
    ctx: &TriggerContext,
    event: TriggerEvent,
    new_records: Vec<M>,
    old_records: Option<Vec<M>>,
) -> TriggerResult<()> {
    {
        let erased: Vec<&dyn Record> = new_records
            .iter()
            .chain(old_records.iter().flatten())
            .map(|r| r as &dyn Record)
            .collect();
        validate_records::<M>("handle", &erased)?;
    }

    let entry: Box<dyn PendingDispatch> = Box::new(QueuedBatch {
        event,
        new_records,
        old_records,
    });

    let Some(drain) = ctx.begin_drain() else {
        let generation = ctx.generation() + 1;
        if generation > ctx.settings().queue_circuit_breaker {
            tracing::warn!(
                target: ENGINE_TARGET,
                model = M::table_name(),
                %event,
                generation,
                "queue circuit breaker tripped, dispatching inline"
            );
            return entry.dispatch(ctx).await;
        }
        tracing::trace!(target: ENGINE_TARGET, model = M::table_name(), %event, generation, "queued");
        ctx.enqueue(generation, entry);
        return Ok(());
    };

    ctx.enqueue(0, entry);
    while let Some(next) = ctx.next_queued() {
        next.dispatch(ctx).await?;
    }
    drop(drain);
    Ok(())
}
