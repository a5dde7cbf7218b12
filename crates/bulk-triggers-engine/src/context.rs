//! The trigger context.
//!
//! A [`TriggerContext`] is the unit of work the engine runs in. It owns the
//! transaction every façade operation joins, the registry and settings
//! dispatch reads, the optional handler factory, and all the mutable
//! dispatch state: the bypass flag, per-model bulk-update markers, the
//! pending value map, the recursion frames and the [`handle`] queue.
//!
//! Nothing here is process-global. Two contexts never see each other's
//! state, so concurrent requests each build their own.
//!
//! State changes that must be undone are handed out as guards. Dropping the
//! guard restores the previous state, on the error path as well.
//!
//! [`handle`]: crate::dispatcher::handle

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bulk_triggers_core::settings::TriggerSettings;
use bulk_triggers_core::{TriggerError, TriggerResult, SETTINGS};
use bulk_triggers_db::{DbExecutor, TransactionManager, Value};

use crate::dispatcher::PendingDispatch;
use crate::events::TriggerEvent;
use crate::handler::HandlerFactory;
use crate::registry::{TriggerRegistry, REGISTRY};

/// Per-object values keyed by [`Value::key`] of the primary key.
pub type ValueMap = HashMap<String, Vec<(String, Value)>>;

pub(crate) type QueuedEntry = (usize, Box<dyn PendingDispatch>);

struct Frame {
    id: u64,
    table: String,
    event: TriggerEvent,
}

#[derive(Default)]
struct ContextState {
    bypass: bool,
    bulk_update: HashMap<String, usize>,
    pending: HashMap<String, ValueMap>,
    frames: Vec<Frame>,
    next_frame: u64,
    queue: VecDeque<QueuedEntry>,
    draining: bool,
    generation: usize,
}

/// Dispatch state and collaborators for one unit of work.
pub struct TriggerContext {
    txn: TransactionManager,
    registry: Arc<TriggerRegistry>,
    settings: TriggerSettings,
    factory: Option<Arc<dyn HandlerFactory>>,
    state: Mutex<ContextState>,
}

impl fmt::Debug for TriggerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerContext")
            .field("txn", &self.txn)
            .field("settings", &self.settings)
            .field("has_factory", &self.factory.is_some())
            .finish_non_exhaustive()
    }
}

impl TriggerContext {
    /// A context on `db` with the global registry and settings.
    pub fn new(db: Arc<dyn DbExecutor>) -> Self {
        Self::builder(db).build()
    }

    pub fn builder(db: Arc<dyn DbExecutor>) -> TriggerContextBuilder {
        TriggerContextBuilder {
            db,
            registry: None,
            settings: None,
            factory: None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub const fn txn(&self) -> &TransactionManager {
        &self.txn
    }

    /// The executor façade operations write through. Statements issued here
    /// join the context's transaction.
    pub fn db(&self) -> &dyn DbExecutor {
        &self.txn
    }

    pub fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    pub const fn settings(&self) -> &TriggerSettings {
        &self.settings
    }

    pub fn factory(&self) -> Option<&dyn HandlerFactory> {
        self.factory.as_deref()
    }

    // ── Bypass ──────────────────────────────────────────────────────────

    /// Whether every trigger is currently suppressed.
    pub fn bypass_triggers(&self) -> bool {
        self.lock().bypass
    }

    /// Sets the bypass flag. It stays set until cleared.
    pub fn set_bypass_triggers(&self, bypass: bool) {
        self.lock().bypass = bypass;
    }

    /// Suppresses every trigger until the guard is dropped.
    pub fn bypass_guard(&self) -> BypassGuard<'_> {
        let previous = std::mem::replace(&mut self.lock().bypass, true);
        BypassGuard {
            ctx: self,
            previous,
        }
    }

    // ── Bulk update marker ───────────────────────────────────────────────

    /// Whether a trigger-firing bulk update on `table` is in progress.
    pub fn bulk_update_active(&self, table: &str) -> bool {
        self.lock().bulk_update.get(table).copied().unwrap_or(0) > 0
    }

    pub(crate) fn enter_bulk_update(&self, table: &str) -> BulkUpdateGuard<'_> {
        *self.lock().bulk_update.entry(table.to_string()).or_insert(0) += 1;
        BulkUpdateGuard {
            ctx: self,
            table: table.to_string(),
        }
    }

    // ── Pending values ───────────────────────────────────────────────────

    /// The values staged for `pk_key` on `table`, if any.
    pub fn pending_values(&self, table: &str, pk_key: &str) -> Option<Vec<(String, Value)>> {
        self.lock()
            .pending
            .get(table)
            .and_then(|map| map.get(pk_key))
            .cloned()
    }

    pub fn has_pending_values(&self, table: &str) -> bool {
        self.lock().pending.contains_key(table)
    }

    pub(crate) fn stage_pending_values(&self, table: &str, values: ValueMap) -> PendingValuesGuard<'_> {
        let previous = self.lock().pending.insert(table.to_string(), values);
        PendingValuesGuard {
            ctx: self,
            table: table.to_string(),
            previous,
        }
    }

    // ── Recursion frames ─────────────────────────────────────────────────

    /// Pushes a dispatch frame for `(table, event)`.
    ///
    /// # Errors
    ///
    /// Returns `RecursionLimit` when the pair is already `max_depth` deep.
    pub(crate) fn enter_frame(&self, table: &str, event: TriggerEvent) -> TriggerResult<FrameGuard<'_>> {
        let mut state = self.lock();
        let depth = state
            .frames
            .iter()
            .filter(|frame| frame.table == table && frame.event == event)
            .count();
        if depth >= self.settings.max_depth {
            let path = state
                .frames
                .iter()
                .map(|frame| (frame.table.as_str(), frame.event))
                .chain(std::iter::once((table, event)))
                .map(|(t, e)| format!("{t}.{e}"))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(TriggerError::RecursionLimit {
                model: table.to_string(),
                event: event.to_string(),
                depth: self.settings.max_depth,
                path,
            });
        }
        let id = state.next_frame;
        state.next_frame += 1;
        state.frames.push(Frame {
            id,
            table: table.to_string(),
            event,
        });
        drop(state);
        Ok(FrameGuard { ctx: self, id })
    }

    /// How many dispatch frames are open.
    pub fn depth(&self) -> usize {
        self.lock().frames.len()
    }

    // ── Queue ────────────────────────────────────────────────────────────

    pub(crate) fn is_draining(&self) -> bool {
        self.lock().draining
    }

    pub(crate) fn generation(&self) -> usize {
        self.lock().generation
    }

    pub(crate) fn enqueue(&self, generation: usize, entry: Box<dyn PendingDispatch>) {
        self.lock().queue.push_back((generation, entry));
    }

    /// Marks the queue as draining. `None` when it already is.
    pub(crate) fn begin_drain(&self) -> Option<DrainGuard<'_>> {
        let mut state = self.lock();
        if state.draining {
            return None;
        }
        state.draining = true;
        state.generation = 0;
        drop(state);
        Some(DrainGuard { ctx: self })
    }

    /// Pops the oldest queued entry and makes its generation current.
    pub(crate) fn next_queued(&self) -> Option<Box<dyn PendingDispatch>> {
        let mut state = self.lock();
        let (generation, entry) = state.queue.pop_front()?;
        state.generation = generation;
        Some(entry)
    }

    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }
}

/// Builds a [`TriggerContext`].
pub struct TriggerContextBuilder {
    db: Arc<dyn DbExecutor>,
    registry: Option<Arc<TriggerRegistry>>,
    settings: Option<TriggerSettings>,
    factory: Option<Arc<dyn HandlerFactory>>,
}

impl fmt::Debug for TriggerContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerContextBuilder")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TriggerContextBuilder {
    /// Uses `registry` instead of the global [`REGISTRY`].
    #[must_use]
    pub fn registry(mut self, registry: Arc<TriggerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: TriggerSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    #[must_use]
    pub fn factory(mut self, factory: Arc<dyn HandlerFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn build(self) -> TriggerContext {
        TriggerContext {
            txn: TransactionManager::new(self.db),
            registry: self.registry.unwrap_or_else(|| Arc::clone(&REGISTRY)),
            settings: self
                .settings
                .unwrap_or_else(|| SETTINGS.get_or_default().triggers.clone()),
            factory: self.factory,
            state: Mutex::new(ContextState::default()),
        }
    }
}

// ── Guards ───────────────────────────────────────────────────────────────

/// Restores the previous bypass flag on drop.
#[must_use = "bypass ends when the guard is dropped"]
pub struct BypassGuard<'a> {
    ctx: &'a TriggerContext,
    previous: bool,
}

impl Drop for BypassGuard<'_> {
    fn drop(&mut self) {
        self.ctx.lock().bypass = self.previous;
    }
}

#[must_use]
pub(crate) struct BulkUpdateGuard<'a> {
    ctx: &'a TriggerContext,
    table: String,
}

impl Drop for BulkUpdateGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.ctx.lock();
        if let Some(count) = state.bulk_update.get_mut(&self.table) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.bulk_update.remove(&self.table);
            }
        }
    }
}

#[must_use]
pub(crate) struct PendingValuesGuard<'a> {
    ctx: &'a TriggerContext,
    table: String,
    previous: Option<ValueMap>,
}

impl Drop for PendingValuesGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.ctx.lock();
        match self.previous.take() {
            Some(previous) => {
                state.pending.insert(self.table.clone(), previous);
            }
            None => {
                state.pending.remove(&self.table);
            }
        }
    }
}

#[must_use]
#[derive(Debug)]
pub(crate) struct FrameGuard<'a> {
    ctx: &'a TriggerContext,
    id: u64,
}

/// Removes only the guard's own frame, wherever it sits in the path.
impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.ctx.lock();
        if let Some(index) = state.frames.iter().rposition(|frame| frame.id == self.id) {
            state.frames.remove(index);
        }
    }
}

/// Ends draining on drop. Whatever is still queued is discarded.
#[must_use]
pub(crate) struct DrainGuard<'a> {
    ctx: &'a TriggerContext,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.ctx.lock();
        state.draining = false;
        state.generation = 0;
        state.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::memory_db;

    fn settings(max_depth: usize) -> TriggerSettings {
        TriggerSettings {
            max_depth,
            ..TriggerSettings::default()
        }
    }

    fn ctx() -> TriggerContext {
        TriggerContext::builder(memory_db())
            .registry(Arc::new(TriggerRegistry::new()))
            .settings(settings(2))
            .build()
    }

    #[test]
    fn test_bypass_guard_restores() {
        let ctx = ctx();
        assert!(!ctx.bypass_triggers());
        {
            let _guard = ctx.bypass_guard();
            assert!(ctx.bypass_triggers());
        }
        assert!(!ctx.bypass_triggers());

        ctx.set_bypass_triggers(true);
        drop(ctx.bypass_guard());
        assert!(ctx.bypass_triggers());
    }

    #[test]
    fn test_bulk_update_marker_is_per_model() {
        let ctx = ctx();
        let outer = ctx.enter_bulk_update("crm_account");
        let inner = ctx.enter_bulk_update("crm_account");
        assert!(ctx.bulk_update_active("crm_account"));
        assert!(!ctx.bulk_update_active("crm_line"));
        drop(inner);
        assert!(ctx.bulk_update_active("crm_account"));
        drop(outer);
        assert!(!ctx.bulk_update_active("crm_account"));
    }

    #[test]
    fn test_pending_values_cleared_and_restored() {
        let ctx = ctx();
        let mut outer = ValueMap::new();
        outer.insert("i:1".into(), vec![("status".into(), Value::from("open"))]);
        let guard = ctx.stage_pending_values("crm_account", outer);
        {
            let mut inner = ValueMap::new();
            inner.insert("i:1".into(), vec![("status".into(), Value::from("won"))]);
            let _inner = ctx.stage_pending_values("crm_account", inner);
            assert_eq!(
                ctx.pending_values("crm_account", "i:1").unwrap()[0].1,
                Value::from("won")
            );
        }
        assert_eq!(
            ctx.pending_values("crm_account", "i:1").unwrap()[0].1,
            Value::from("open")
        );
        drop(guard);
        assert!(!ctx.has_pending_values("crm_account"));
        assert!(ctx.pending_values("crm_account", "i:1").is_none());
    }

    #[test]
    fn test_frames_enforce_max_depth() {
        let ctx = ctx();
        let _a = ctx.enter_frame("crm_account", TriggerEvent::AfterUpdate).unwrap();
        let _b = ctx.enter_frame("crm_line", TriggerEvent::AfterCreate).unwrap();
        let _c = ctx.enter_frame("crm_account", TriggerEvent::AfterUpdate).unwrap();
        assert_eq!(ctx.depth(), 3);

        let err = ctx
            .enter_frame("crm_account", TriggerEvent::AfterUpdate)
            .unwrap_err();
        match err {
            TriggerError::RecursionLimit { model, depth, path, .. } => {
                assert_eq!(model, "crm_account");
                assert_eq!(depth, 2);
                assert_eq!(
                    path,
                    "crm_account.after_update -> crm_line.after_create -> \
                     crm_account.after_update -> crm_account.after_update"
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ctx.depth(), 3);
    }

    #[test]
    fn test_frame_guard_pops() {
        let ctx = ctx();
        {
            let _frame = ctx.enter_frame("crm_account", TriggerEvent::BeforeCreate).unwrap();
            assert_eq!(ctx.depth(), 1);
        }
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_frame_guards_dropped_out_of_order() {
        let ctx = ctx();
        let first = ctx.enter_frame("crm_account", TriggerEvent::AfterUpdate).unwrap();
        let second = ctx.enter_frame("crm_line", TriggerEvent::AfterCreate).unwrap();
        drop(first);
        assert_eq!(ctx.depth(), 1);

        let err = {
            let _a = ctx.enter_frame("crm_line", TriggerEvent::AfterCreate).unwrap();
            ctx.enter_frame("crm_line", TriggerEvent::AfterCreate).unwrap_err()
        };
        match err {
            TriggerError::RecursionLimit { path, .. } => assert_eq!(
                path,
                "crm_line.after_create -> crm_line.after_create -> crm_line.after_create"
            ),
            other => panic!("unexpected error: {other}"),
        }
        drop(second);
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_drain_guard_is_exclusive() {
        let ctx = ctx();
        let guard = ctx.begin_drain().unwrap();
        assert!(ctx.is_draining());
        assert!(ctx.begin_drain().is_none());
        drop(guard);
        assert!(!ctx.is_draining());
        assert!(ctx.begin_drain().is_some());
    }

    #[test]
    fn test_builder_defaults() {
        let ctx = TriggerContext::new(memory_db());
        assert_eq!(ctx.settings().max_depth, 10);
        assert!(ctx.factory().is_none());
        assert_eq!(ctx.queued(), 0);
    }
}
