//! Handler types.
//!
//! A trigger handler is a plain struct implementing [`TriggerHandler`].
//! Each of its trigger methods has the [`HandlerMethod`] shape: it borrows
//! the handler and a [`TriggerArgs`] and returns a boxed future.
//!
//! ```ignore
//! #[derive(Default)]
//! struct AccountTriggers;
//!
//! impl AccountTriggers {
//!     fn normalize<'a>(&'a self, args: TriggerArgs<'a, Account>) -> HandlerFuture<'a> {
//!         Box::pin(async move {
//!             for account in args.new_records.iter_mut() {
//!                 account.name = account.name.trim().to_string();
//!             }
//!             Ok(())
//!         })
//!     }
//! }
//!
//! impl TriggerHandler for AccountTriggers {
//!     fn triggers() -> Vec<TriggerRegistration> {
//!         vec![TriggerRegistration::new::<Account, Self>(
//!             TriggerEvent::BeforeCreate,
//!             "normalize",
//!             Self::normalize,
//!         )]
//!     }
//! }
//! ```
//!
//! Instances are built per dispatch. An installed [`HandlerFactory`] gets the
//! first chance to build one; otherwise the handler's `Default` is used.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bulk_triggers_core::{TriggerError, TriggerResult};
use bulk_triggers_db::Model;

use crate::context::TriggerContext;
use crate::events::TriggerEvent;
use crate::registry::TriggerRegistration;

/// The future a handler method returns.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = TriggerResult<()>> + Send + 'a>>;

/// A type-erased handler instance.
pub type HandlerInstance = Arc<dyn Any + Send + Sync>;

/// The signature of a trigger method on handler `H` for model `M`.
pub type HandlerMethod<H, M> = for<'a> fn(&'a H, TriggerArgs<'a, M>) -> HandlerFuture<'a>;

/// What a handler method receives.
pub struct TriggerArgs<'a, M> {
    /// The context of the running operation. Nested bulk operations go
    /// through it.
    pub ctx: &'a TriggerContext,
    pub event: TriggerEvent,
    /// The records that passed the registration's condition, in batch order.
    pub new_records: &'a mut [M],
    /// The stored originals, aligned with `new_records`. `None` for deletes
    /// and for creates, except the group of an upsert that overwrites
    /// stored rows.
    pub old_records: Option<&'a [M]>,
}

impl<M> fmt::Debug for TriggerArgs<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerArgs")
            .field("event", &self.event)
            .field("new_records", &self.new_records.len())
            .field("old_records", &self.old_records.map(<[M]>::len))
            .finish_non_exhaustive()
    }
}

/// Implemented by every trigger handler.
pub trait TriggerHandler: Send + Sync + 'static {
    /// The registrations this handler declares.
    ///
    /// [`TriggerRegistry::register_handler`](crate::registry::TriggerRegistry::register_handler)
    /// installs all of them at once.
    fn triggers() -> Vec<TriggerRegistration>
    where
        Self: Sized,
    {
        Vec::new()
    }
}

fn default_instance<H: TriggerHandler + Default>() -> HandlerInstance {
    Arc::new(H::default())
}

/// Identifies a handler type and knows how to build it.
#[derive(Clone)]
pub struct HandlerClass {
    type_id: TypeId,
    name: &'static str,
    key: &'static str,
    construct: Option<fn() -> HandlerInstance>,
}

impl fmt::Debug for HandlerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerClass")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("default_constructible", &self.construct.is_some())
            .finish()
    }
}

impl HandlerClass {
    /// A handler that falls back to `H::default()`.
    pub fn of<H: TriggerHandler + Default>() -> Self {
        Self {
            construct: Some(default_instance::<H>),
            ..Self::injected::<H>()
        }
    }

    /// A handler that can only be built by a [`HandlerFactory`].
    pub fn injected<H: TriggerHandler>() -> Self {
        let name = std::any::type_name::<H>();
        Self {
            type_id: TypeId::of::<H>(),
            name,
            key: name,
            construct: None,
        }
    }

    /// Takes over the registrations of handler `P`.
    ///
    /// Registering a method under the same name then replaces `P`'s entry
    /// instead of adding a second one.
    #[must_use]
    pub fn overrides<P: TriggerHandler>(mut self) -> Self {
        self.key = std::any::type_name::<P>();
        self
    }

    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The full type name.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The identity used for replacement.
    pub const fn key(&self) -> &'static str {
        self.key
    }

    /// The type name without its module path.
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }

    pub(crate) fn instantiate(
        &self,
        factory: Option<&dyn HandlerFactory>,
    ) -> TriggerResult<HandlerInstance> {
        if let Some(instance) = factory.and_then(|f| f.create_instance(self)) {
            return Ok(instance);
        }
        self.construct.map(|construct| construct()).ok_or_else(|| {
            TriggerError::ImproperlyConfigured(format!(
                "No factory provides an instance of {} and it has no default constructor",
                self.name
            ))
        })
    }
}

/// Builds handler instances for the engine.
pub trait HandlerFactory: Send + Sync {
    /// Returns an instance of `class`, or `None` to fall back to its default.
    fn create_instance(&self, class: &HandlerClass) -> Option<HandlerInstance>;
}

type Constructor = Arc<dyn Fn() -> HandlerInstance + Send + Sync>;

/// A [`HandlerFactory`] backed by per-type constructors.
///
/// ```
/// use bulk_triggers_engine::handler::{HandlerClass, HandlerFactories, HandlerFactory, TriggerHandler};
///
/// struct Notifier {
///     channel: String,
/// }
/// impl TriggerHandler for Notifier {}
///
/// let mut factories = HandlerFactories::new();
/// factories.register(|| Notifier { channel: "ops".into() });
/// assert!(factories
///     .create_instance(&HandlerClass::injected::<Notifier>())
///     .is_some());
/// ```
#[derive(Default, Clone)]
pub struct HandlerFactories {
    constructors: HashMap<TypeId, Constructor>,
}

impl fmt::Debug for HandlerFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFactories")
            .field("len", &self.constructors.len())
            .finish()
    }
}

impl HandlerFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the constructor for `H`, replacing any earlier one.
    pub fn register<H, F>(&mut self, constructor: F) -> &mut Self
    where
        H: TriggerHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.constructors.insert(
            TypeId::of::<H>(),
            Arc::new(move || Arc::new(constructor()) as HandlerInstance),
        );
        self
    }

    pub fn contains<H: TriggerHandler>(&self) -> bool {
        self.constructors.contains_key(&TypeId::of::<H>())
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl HandlerFactory for HandlerFactories {
    fn create_instance(&self, class: &HandlerClass) -> Option<HandlerInstance> {
        self.constructors
            .get(&class.type_id())
            .map(|constructor| constructor())
    }
}

/// Calls a typed method on an erased instance.
pub(crate) trait Invoke<M>: Send + Sync {
    fn invoke<'a>(
        &self,
        instance: &'a (dyn Any + Send + Sync),
        args: TriggerArgs<'a, M>,
    ) -> HandlerFuture<'a>;
}

pub(crate) struct BoundMethod<H, M> {
    pub(crate) method: HandlerMethod<H, M>,
}

impl<H: TriggerHandler, M: Model> Invoke<M> for BoundMethod<H, M> {
    fn invoke<'a>(
        &self,
        instance: &'a (dyn Any + Send + Sync),
        args: TriggerArgs<'a, M>,
    ) -> HandlerFuture<'a> {
        match instance.downcast_ref::<H>() {
            Some(handler) => (self.method)(handler, args),
            None => Box::pin(async {
                Err(TriggerError::ImproperlyConfigured(format!(
                    "Handler instance is not a {}",
                    std::any::type_name::<H>()
                )))
            }),
        }
    }
}

/// The invoker of one registration, typed by model.
pub(crate) struct TypedInvoker<M>(pub(crate) Arc<dyn Invoke<M>>);
