//! The trigger registry.
//!
//! Maps `(model, event)` to an ordered list of registrations. A registration
//! is identified by its model, event, handler key and method name;
//! registering the same identity again replaces the earlier entry in place.
//! Lists are kept sorted by priority, ties in registration order.
//!
//! The process-wide [`REGISTRY`] is what a [`TriggerContext`] uses unless it
//! is given its own registry, which is how tests keep their registrations
//! apart.
//!
//! [`TriggerContext`]: crate::context::TriggerContext

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use bulk_triggers_db::Model;
use once_cell::sync::Lazy;

use crate::conditions::Condition;
use crate::events::TriggerEvent;
use crate::handler::{BoundMethod, HandlerClass, HandlerMethod, TriggerHandler, TypedInvoker};
use crate::priority::Priority;

/// One handler method bound to a model and event.
#[derive(Clone)]
pub struct TriggerRegistration {
    model: &'static str,
    event: TriggerEvent,
    class: HandlerClass,
    method: &'static str,
    condition: Option<Condition>,
    priority: Priority,
    preload: Vec<String>,
    invoker: Arc<dyn Any + Send + Sync>,
    seq: u64,
}

impl fmt::Debug for TriggerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerRegistration")
            .field("model", &self.model)
            .field("event", &self.event)
            .field("handler", &self.class.name())
            .field("method", &self.method)
            .field("condition", &self.condition)
            .field("priority", &self.priority)
            .field("preload", &self.preload)
            .finish_non_exhaustive()
    }
}

impl TriggerRegistration {
    /// Binds `method` of handler `H` to `event` on model `M`.
    ///
    /// `H` is built with `Default` unless a factory provides it.
    pub fn new<M, H>(event: TriggerEvent, method_name: &'static str, method: HandlerMethod<H, M>) -> Self
    where
        M: Model,
        H: TriggerHandler + Default,
    {
        Self::with_class::<M, H>(HandlerClass::of::<H>(), event, method_name, method)
    }

    /// Like [`new`](Self::new), for handlers only a factory can build.
    pub fn injected<M, H>(
        event: TriggerEvent,
        method_name: &'static str,
        method: HandlerMethod<H, M>,
    ) -> Self
    where
        M: Model,
        H: TriggerHandler,
    {
        Self::with_class::<M, H>(HandlerClass::injected::<H>(), event, method_name, method)
    }

    fn with_class<M: Model, H: TriggerHandler>(
        class: HandlerClass,
        event: TriggerEvent,
        method_name: &'static str,
        method: HandlerMethod<H, M>,
    ) -> Self {
        let invoker: TypedInvoker<M> = TypedInvoker(Arc::new(BoundMethod { method }));
        Self {
            model: M::table_name(),
            event,
            class,
            method: method_name,
            condition: None,
            priority: Priority::default(),
            preload: Vec::new(),
            invoker: Arc::new(invoker),
            seq: 0,
        }
    }

    /// Only records passing `condition` reach the handler.
    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Relation fields to load into each record's cache before the
    /// condition and handler run.
    #[must_use]
    pub fn preload(mut self, fields: &[&str]) -> Self {
        self.preload = fields.iter().map(|f| (*f).to_string()).collect();
        self
    }

    /// Replaces handler `P`'s registration of the same method.
    #[must_use]
    pub fn overrides<P: TriggerHandler>(mut self) -> Self {
        self.class = self.class.overrides::<P>();
        self
    }

    pub const fn model(&self) -> &'static str {
        self.model
    }

    pub const fn event(&self) -> TriggerEvent {
        self.event
    }

    pub const fn handler(&self) -> &HandlerClass {
        &self.class
    }

    pub const fn method_name(&self) -> &'static str {
        self.method
    }

    pub const fn condition_ref(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    pub const fn priority_value(&self) -> Priority {
        self.priority
    }

    pub fn preload_fields(&self) -> &[String] {
        &self.preload
    }

    pub(crate) fn invoker<M: Model>(&self) -> Option<&TypedInvoker<M>> {
        self.invoker.downcast_ref::<TypedInvoker<M>>()
    }

    fn same_identity(&self, other: &Self) -> bool {
        self.class.key() == other.class.key() && self.method == other.method
    }

    pub fn info(&self) -> RegistrationInfo {
        RegistrationInfo {
            model: self.model.to_string(),
            event: self.event,
            handler: self.class.name().to_string(),
            method: self.method.to_string(),
            priority: self.priority,
            has_condition: self.condition.is_some(),
        }
    }
}

/// A printable summary of one registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub model: String,
    pub event: TriggerEvent,
    pub handler: String,
    pub method: String,
    pub priority: Priority,
    pub has_condition: bool,
}

type EventMap = HashMap<TriggerEvent, Vec<Arc<TriggerRegistration>>>;

#[derive(Default)]
struct Inner {
    entries: HashMap<&'static str, EventMap>,
    next_seq: u64,
}

/// Registrations keyed by model and event.
#[derive(Default)]
pub struct TriggerRegistry {
    inner: RwLock<Inner>,
}

impl fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a registration. Returns `true` when it replaced an existing one.
    pub fn register(&self, mut registration: TriggerRegistration) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let (model, event) = (registration.model, registration.event);
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let list = inner
            .entries
            .entry(model)
            .or_default()
            .entry(event)
            .or_default();
        let replaced = match list.iter_mut().find(|r| r.same_identity(&registration)) {
            Some(existing) => {
                registration.seq = existing.seq;
                *existing = Arc::new(registration);
                true
            }
            None => {
                registration.seq = seq;
                list.push(Arc::new(registration));
                false
            }
        };
        list.sort_by_key(|r| (r.priority, r.seq));
        tracing::debug!(
            target: bulk_triggers_core::logging::ENGINE_TARGET,
            model,
            event = %event,
            replaced,
            "trigger registered"
        );
        replaced
    }

    /// Registers everything `H` declares.
    pub fn register_handler<H: TriggerHandler>(&self) {
        for registration in H::triggers() {
            self.register(registration);
        }
    }

    /// The registrations for `(model, event)`, in execution order.
    pub fn get(&self, model: &str, event: TriggerEvent) -> Vec<Arc<TriggerRegistration>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .entries
            .get(model)
            .and_then(|events| events.get(&event))
            .cloned()
            .unwrap_or_default()
    }

    /// Removes one registration. Returns `true` when something was removed.
    pub fn unregister(
        &self,
        model: &str,
        event: TriggerEvent,
        handler_key: &str,
        method: &str,
    ) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = inner
            .entries
            .get_mut(model)
            .and_then(|events| events.get_mut(&event))
        else {
            return false;
        };
        let before = list.len();
        list.retain(|r| !(r.class.key() == handler_key && r.method == method));
        before != list.len()
    }

    /// Removes every registration.
    pub fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .values()
            .flat_map(HashMap::values)
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every registration, sorted by model, event, then execution order.
    pub fn list_all(&self) -> Vec<RegistrationInfo> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<(&str, TriggerEvent)> = inner
            .entries
            .iter()
            .flat_map(|(model, events)| events.keys().map(move |event| (*model, *event)))
            .collect();
        keys.sort_unstable();
        keys.into_iter()
            .flat_map(|(model, event)| inner.entries[model][&event].iter().map(|r| r.info()))
            .collect()
    }
}

/// The process-wide registry.
pub static REGISTRY: Lazy<Arc<TriggerRegistry>> = Lazy::new(|| Arc::new(TriggerRegistry::new()));

/// Registers on the process-wide registry.
pub fn register(registration: TriggerRegistration) -> bool {
    REGISTRY.register(registration)
}

/// Clears the process-wide registry.
pub fn clear_triggers() {
    REGISTRY.clear();
}

/// Lists the process-wide registry.
pub fn list_all() -> Vec<RegistrationInfo> {
    REGISTRY.list_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerFuture, TriggerArgs};
    use crate::testing::Account;

    #[derive(Default)]
    struct Audit;

    impl Audit {
        fn stamp<'a>(&'a self, _args: TriggerArgs<'a, Account>) -> HandlerFuture<'a> {
            Box::pin(async { Ok(()) })
        }
        fn check<'a>(&'a self, _args: TriggerArgs<'a, Account>) -> HandlerFuture<'a> {
            Box::pin(async { Ok(()) })
        }
    }

    impl TriggerHandler for Audit {
        fn triggers() -> Vec<TriggerRegistration> {
            vec![
                TriggerRegistration::new::<Account, Self>(TriggerEvent::BeforeUpdate, "stamp", Self::stamp),
                TriggerRegistration::new::<Account, Self>(TriggerEvent::ValidateUpdate, "check", Self::check),
            ]
        }
    }

    #[derive(Default)]
    struct StrictAudit;
    impl TriggerHandler for StrictAudit {}

    impl StrictAudit {
        fn stamp<'a>(&'a self, _args: TriggerArgs<'a, Account>) -> HandlerFuture<'a> {
            Box::pin(async { Ok(()) })
        }
    }

    fn reg(method: &'static str, priority: Priority) -> TriggerRegistration {
        TriggerRegistration::new::<Account, Audit>(TriggerEvent::BeforeUpdate, method, Audit::stamp)
            .priority(priority)
    }

    #[test]
    fn test_empty_lookup() {
        let registry = TriggerRegistry::new();
        assert!(registry.get("crm_account", TriggerEvent::BeforeUpdate).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sorted_by_priority_then_insertion() {
        let registry = TriggerRegistry::new();
        registry.register(reg("low", Priority::LOW));
        registry.register(reg("first_normal", Priority::NORMAL));
        registry.register(reg("highest", Priority::HIGHEST));
        registry.register(reg("second_normal", Priority::NORMAL));

        let methods: Vec<&str> = registry
            .get("crm_account", TriggerEvent::BeforeUpdate)
            .iter()
            .map(|r| r.method_name())
            .collect();
        assert_eq!(methods, vec!["highest", "first_normal", "second_normal", "low"]);
    }

    #[test]
    fn test_reregistering_replaces_in_place() {
        let registry = TriggerRegistry::new();
        assert!(!registry.register(reg("stamp", Priority::NORMAL)));
        assert!(!registry.register(reg("other", Priority::NORMAL)));
        assert!(registry.register(reg("stamp", Priority::NORMAL).condition(Condition::has_changed("status"))));

        let list = registry.get("crm_account", TriggerEvent::BeforeUpdate);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].method_name(), "stamp");
        assert!(list[0].condition_ref().is_some());
    }

    #[test]
    fn test_override_points_to_child() {
        let registry = TriggerRegistry::new();
        registry.register_handler::<Audit>();
        registry.register(
            TriggerRegistration::new::<Account, StrictAudit>(
                TriggerEvent::BeforeUpdate,
                "stamp",
                StrictAudit::stamp,
            )
            .overrides::<Audit>(),
        );
        let list = registry.get("crm_account", TriggerEvent::BeforeUpdate);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].handler().short_name(), "StrictAudit");
    }

    #[test]
    fn test_unregister_and_clear() {
        let registry = TriggerRegistry::new();
        registry.register_handler::<Audit>();
        assert_eq!(registry.len(), 2);

        let key = std::any::type_name::<Audit>();
        assert!(registry.unregister("crm_account", TriggerEvent::ValidateUpdate, key, "check"));
        assert!(!registry.unregister("crm_account", TriggerEvent::ValidateUpdate, key, "check"));
        assert!(!registry.unregister("crm_other", TriggerEvent::ValidateUpdate, key, "check"));
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_all() {
        let registry = TriggerRegistry::new();
        registry.register_handler::<Audit>();
        let infos = registry.list_all();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].event, TriggerEvent::ValidateUpdate);
        assert_eq!(infos[1].method, "stamp");
        assert_eq!(infos[1].priority, Priority::NORMAL);
        assert!(!infos[1].has_condition);
        assert!(infos[1].handler.ends_with("Audit"));
    }

    #[test]
    fn test_invoker_is_typed_by_model() {
        let registration = reg("stamp", Priority::NORMAL);
        assert!(registration.invoker::<Account>().is_some());
        assert!(registration.invoker::<crate::testing::Line>().is_none());
    }
}
