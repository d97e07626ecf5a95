//! Process-wide dependency graph.
//!
//! The host and every loaded module contribute [`DependencyModule`]s. A
//! [`GraphComposer`] runs all of them against one [`Binder`], then
//! materializes every provider so the resulting [`ServiceGraph`] is complete
//! before any module starts. The graph is immutable afterwards and is shared
//! through an `Arc`.
//!
//! Bindings are keyed by type. Providers receive a [`Resolver`] to look up
//! their own dependencies, which may come from any contributor regardless of
//! registration order.

use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::loader::panic_message;

/// Errors raised while composing or reading the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Two contributors bound the same type.
    #[error("{type_name} is bound by both {first} and {second}")]
    DuplicateBinding {
        /// The doubly bound type.
        type_name: String,
        /// Contributor that bound it first.
        first: String,
        /// Contributor that tried to bind it again.
        second: String,
    },

    /// A provider asked for a type nobody bound.
    #[error("{type_name} is not bound (requested by {requested_by})")]
    Unbound {
        /// The missing type.
        type_name: String,
        /// Who asked for it.
        requested_by: String,
    },

    /// Providers depend on each other in a loop.
    #[error("dependency cycle through {type_name}")]
    Cycle {
        /// A type on the cycle.
        type_name: String,
    },

    /// A contributor rejected its own configuration.
    #[error("dependency module {module} failed to configure: {message}")]
    Configure {
        /// The contributor.
        module: String,
        /// Failure reason.
        message: String,
    },

    /// A provider failed to build its value.
    #[error("provider for {type_name} failed: {message}")]
    Provider {
        /// The type being built.
        type_name: String,
        /// Failure reason.
        message: String,
    },

    /// The graph can only be composed once per runtime.
    #[error("dependency graph already composed")]
    AlreadyComposed,
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// A set of bindings contributed to the graph.
pub trait DependencyModule: Send + Sync {
    /// Name used in error messages.
    fn name(&self) -> &str;

    /// Register bindings.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphError`] if a binding collides or the contributor
    /// cannot configure itself.
    fn configure(&self, binder: &mut Binder<'_>) -> GraphResult<()>;
}

type ErasedValue = Box<dyn Any + Send + Sync>;
type Provider = Box<dyn Fn(&Resolver<'_>) -> GraphResult<ErasedValue> + Send + Sync>;

/// One registered type. `value` always holds an `Arc<T>` once set.
struct Binding {
    type_name: &'static str,
    origin: String,
    value: OnceLock<ErasedValue>,
    provider: Option<Provider>,
}

/// Registration surface handed to [`DependencyModule::configure`].
pub struct Binder<'a> {
    bindings: &'a mut HashMap<TypeId, Binding>,
    origin: &'a str,
}

impl Binder<'_> {
    /// Contributor currently configuring, as `<owner>/<module>`.
    #[must_use]
    pub fn origin(&self) -> &str {
        self.origin
    }

    /// Bind `T` to an existing shared value. Works for trait objects:
    /// `binder.bind::<dyn Greeter>(Arc::new(English))`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateBinding`] if `T` is already bound.
    pub fn bind<T>(&mut self, value: Arc<T>) -> GraphResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let slot = OnceLock::new();
        let _ = slot.set(Box::new(value) as ErasedValue);
        self.insert::<T>(slot, None)
    }

    /// Bind `T` to an owned value.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateBinding`] if `T` is already bound.
    pub fn bind_value<T>(&mut self, value: T) -> GraphResult<()>
    where
        T: Send + Sync + 'static,
    {
        self.bind(Arc::new(value))
    }

    /// Bind `T` to a provider that builds it from other bindings. The
    /// provider runs once, during composition.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateBinding`] if `T` is already bound.
    pub fn provide<T, F>(&mut self, provider: F) -> GraphResult<()>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&Resolver<'_>) -> GraphResult<Arc<T>> + Send + Sync + 'static,
    {
        let erased: Provider =
            Box::new(move |resolver| provider(resolver).map(|v| Box::new(v) as ErasedValue));
        self.insert::<T>(OnceLock::new(), Some(erased))
    }

    fn insert<T: ?Sized + 'static>(
        &mut self,
        value: OnceLock<ErasedValue>,
        provider: Option<Provider>,
    ) -> GraphResult<()> {
        let id = TypeId::of::<T>();
        if let Some(existing) = self.bindings.get(&id) {
            return Err(GraphError::DuplicateBinding {
                type_name: type_name::<T>().to_string(),
                first: existing.origin.clone(),
                second: self.origin.to_string(),
            });
        }

        debug!(service = type_name::<T>(), origin = self.origin, "Bound service");
        self.bindings.insert(
            id,
            Binding {
                type_name: type_name::<T>(),
                origin: self.origin.to_string(),
                value,
                provider,
            },
        );
        Ok(())
    }
}

/// Lookup surface handed to providers during composition.
pub struct Resolver<'g> {
    bindings: &'g HashMap<TypeId, Binding>,
    stack: RefCell<Vec<TypeId>>,
}

impl<'g> Resolver<'g> {
    fn new(bindings: &'g HashMap<TypeId, Binding>) -> Self {
        Self {
            bindings,
            stack: RefCell::new(Vec::new()),
        }
    }

    /// Resolve `T`, running its provider first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Unbound`] if `T` has no binding,
    /// [`GraphError::Cycle`] if resolving it requires itself, or whatever
    /// its provider returned.
    pub fn get<T: ?Sized + 'static>(&self) -> GraphResult<Arc<T>> {
        let value = self.resolve_slot(TypeId::of::<T>(), type_name::<T>())?;
        value
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or_else(|| GraphError::Provider {
                type_name: type_name::<T>().to_string(),
                message: "stored value has an unexpected type".into(),
            })
    }

    fn resolve_slot(
        &self,
        id: TypeId,
        requested: &'static str,
    ) -> GraphResult<&'g (dyn Any + Send + Sync)> {
        let Some(binding) = self.bindings.get(&id) else {
            return Err(GraphError::Unbound {
                type_name: requested.to_string(),
                requested_by: self.current_requester(),
            });
        };

        if let Some(value) = binding.value.get() {
            return Ok(&**value);
        }

        let Some(provider) = &binding.provider else {
            return Err(GraphError::Unbound {
                type_name: requested.to_string(),
                requested_by: self.current_requester(),
            });
        };

        if self.stack.borrow().contains(&id) {
            return Err(GraphError::Cycle {
                type_name: binding.type_name.to_string(),
            });
        }

        self.stack.borrow_mut().push(id);
        let built = provider(self);
        self.stack.borrow_mut().pop();

        // A nested resolution cannot have filled this slot: that would have
        // been reported as a cycle.
        let _ = binding.value.set(built?);
        binding
            .value
            .get()
            .map(|v| &**v)
            .ok_or_else(|| GraphError::Provider {
                type_name: binding.type_name.to_string(),
                message: "provider produced no value".into(),
            })
    }

    fn current_requester(&self) -> String {
        self.stack
            .borrow()
            .last()
            .and_then(|id| self.bindings.get(id))
            .map_or_else(|| "composition".to_string(), |b| b.type_name.to_string())
    }
}

/// Collects contributors and builds the [`ServiceGraph`].
#[derive(Default)]
pub struct GraphComposer {
    contributors: Vec<(String, Box<dyn DependencyModule>)>,
}

impl GraphComposer {
    /// Create an empty composer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a contributor owned by `owner` (`"host"` or a module name).
    #[must_use]
    pub fn add(mut self, owner: impl Into<String>, module: Box<dyn DependencyModule>) -> Self {
        self.contributors.push((owner.into(), module));
        self
    }

    /// Queue several contributors owned by `owner`.
    #[must_use]
    pub fn add_all(
        mut self,
        owner: &str,
        modules: impl IntoIterator<Item = Box<dyn DependencyModule>>,
    ) -> Self {
        for module in modules {
            self.contributors.push((owner.to_string(), module));
        }
        self
    }

    /// Number of queued contributors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.contributors.len()
    }

    /// Whether nothing was queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contributors.is_empty()
    }

    /// Configure every contributor in queue order, then build every bound
    /// value.
    ///
    /// # Errors
    ///
    /// Returns the first [`GraphError`] hit. No partial graph is produced.
    pub fn compose(self) -> GraphResult<ServiceGraph> {
        let mut bindings = HashMap::new();

        for (owner, module) in &self.contributors {
            let origin = format!("{owner}/{}", module.name());
            let mut binder = Binder {
                bindings: &mut bindings,
                origin: &origin,
            };
            catch_unwind(AssertUnwindSafe(|| module.configure(&mut binder))).map_err(|payload| {
                GraphError::Configure {
                    module: origin.clone(),
                    message: format!("panicked: {}", panic_message(&*payload)),
                }
            })??;
        }

        let resolver = Resolver::new(&bindings);
        let ids: Vec<TypeId> = bindings.keys().copied().collect();
        for id in ids {
            let name = bindings.get(&id).map_or("<unknown>", |b| b.type_name);
            resolver.resolve_slot(id, name)?;
        }
        drop(resolver);

        let services = bindings
            .into_iter()
            .filter_map(|(id, binding)| {
                let Binding {
                    type_name,
                    origin,
                    value,
                    ..
                } = binding;
                value.into_inner().map(|value| {
                    (
                        id,
                        Service {
                            type_name,
                            origin,
                            value,
                        },
                    )
                })
            })
            .collect();

        Ok(ServiceGraph { services })
    }
}

struct Service {
    type_name: &'static str,
    origin: String,
    value: ErasedValue,
}

/// The composed, read-only dependency graph.
#[derive(Default)]
pub struct ServiceGraph {
    services: HashMap<TypeId, Service>,
}

impl ServiceGraph {
    /// A graph with no bindings.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a bound value.
    #[must_use]
    pub fn get<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|s| s.value.downcast_ref::<Arc<T>>())
            .cloned()
    }

    /// Look up a bound value, failing with [`GraphError::Unbound`].
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Unbound`] if `T` is not bound.
    pub fn require<T: ?Sized + 'static>(&self) -> GraphResult<Arc<T>> {
        self.get::<T>().ok_or_else(|| GraphError::Unbound {
            type_name: type_name::<T>().to_string(),
            requested_by: "caller".into(),
        })
    }

    /// Whether `T` is bound.
    #[must_use]
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    /// Contributor that bound `T`, as `<owner>/<module>`.
    #[must_use]
    pub fn origin_of<T: ?Sized + 'static>(&self) -> Option<&str> {
        self.services
            .get(&TypeId::of::<T>())
            .map(|s| s.origin.as_str())
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether the graph has no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for ServiceGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.services.values().map(|s| s.type_name).collect();
        names.sort_unstable();
        f.debug_struct("ServiceGraph")
            .field("services", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct English;

    impl Greeter for English {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    struct Prefix(String);

    struct Banner(String);

    struct Closure<F>(&'static str, F);

    impl<F> DependencyModule for Closure<F>
    where
        F: Fn(&mut Binder<'_>) -> GraphResult<()> + Send + Sync,
    {
        fn name(&self) -> &str {
            self.0
        }

        fn configure(&self, binder: &mut Binder<'_>) -> GraphResult<()> {
            (self.1)(binder)
        }
    }

    fn module<F>(name: &'static str, f: F) -> Box<dyn DependencyModule>
    where
        F: Fn(&mut Binder<'_>) -> GraphResult<()> + Send + Sync + 'static,
    {
        Box::new(Closure(name, f))
    }

    #[test]
    fn empty_composer_yields_empty_graph() {
        let graph = GraphComposer::new().compose().unwrap();
        assert!(graph.is_empty());
        assert!(graph.get::<Prefix>().is_none());
    }

    #[test]
    fn binds_values_and_trait_objects() {
        let graph = GraphComposer::new()
            .add(
                "host",
                module("core", |b| {
                    b.bind::<dyn Greeter>(Arc::new(English))?;
                    b.bind_value(Prefix(">> ".into()))
                }),
            )
            .compose()
            .unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.get::<dyn Greeter>().unwrap().greet(), "hello");
        assert_eq!(graph.get::<Prefix>().unwrap().0, ">> ");
        assert_eq!(graph.origin_of::<Prefix>(), Some("host/core"));
    }

    #[test]
    fn providers_see_bindings_from_later_contributors() {
        let graph = GraphComposer::new()
            .add(
                "hello-tools",
                module("banner", |b| {
                    b.provide::<Banner, _>(|r| {
                        let prefix = r.get::<Prefix>()?;
                        let greeter = r.get::<dyn Greeter>()?;
                        Ok(Arc::new(Banner(format!("{}{}", prefix.0, greeter.greet()))))
                    })
                }),
            )
            .add(
                "host",
                module("core", |b| {
                    b.bind::<dyn Greeter>(Arc::new(English))?;
                    b.bind_value(Prefix("* ".into()))
                }),
            )
            .compose()
            .unwrap();

        assert_eq!(graph.get::<Banner>().unwrap().0, "* hello");
    }

    #[test]
    fn duplicate_binding_names_both_contributors() {
        let err = GraphComposer::new()
            .add("host", module("core", |b| b.bind_value(Prefix("a".into()))))
            .add("alpha", module("extras", |b| b.bind_value(Prefix("b".into()))))
            .compose()
            .unwrap_err();

        match err {
            GraphError::DuplicateBinding { first, second, .. } => {
                assert_eq!(first, "host/core");
                assert_eq!(second, "alpha/extras");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn configure_panic_becomes_configure_error() {
        let err = GraphComposer::new()
            .add("host", module("core", |b| b.bind_value(Prefix("a".into()))))
            .add("alpha", module("wiring", |_| panic!("bad wiring")))
            .compose()
            .unwrap_err();

        assert_eq!(
            err,
            GraphError::Configure {
                module: "alpha/wiring".into(),
                message: "panicked: bad wiring".into(),
            }
        );
    }

    #[test]
    fn unbound_dependency_is_reported() {
        let err = GraphComposer::new()
            .add(
                "alpha",
                module("banner", |b| {
                    b.provide::<Banner, _>(|r| {
                        let prefix = r.get::<Prefix>()?;
                        Ok(Arc::new(Banner(prefix.0.clone())))
                    })
                }),
            )
            .compose()
            .unwrap_err();

        assert!(matches!(err, GraphError::Unbound { ref requested_by, .. } if requested_by.contains("Banner")));
    }

    #[test]
    fn cycles_are_detected() {
        let err = GraphComposer::new()
            .add(
                "alpha",
                module("loop", |b| {
                    b.provide::<Prefix, _>(|r| {
                        let banner = r.get::<Banner>()?;
                        Ok(Arc::new(Prefix(banner.0.clone())))
                    })?;
                    b.provide::<Banner, _>(|r| {
                        let prefix = r.get::<Prefix>()?;
                        Ok(Arc::new(Banner(prefix.0.clone())))
                    })
                }),
            )
            .compose()
            .unwrap_err();

        assert!(matches!(err, GraphError::Cycle { .. }));
    }

    #[test]
    fn configure_failure_aborts_composition() {
        let err = GraphComposer::new()
            .add(
                "alpha",
                module("broken", |b| {
                    Err(GraphError::Configure {
                        module: b.origin().to_string(),
                        message: "missing key".into(),
                    })
                }),
            )
            .compose()
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "dependency module alpha/broken failed to configure: missing key"
        );
    }

    #[test]
    fn providers_run_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let graph = GraphComposer::new()
            .add(
                "host",
                module("core", |b| {
                    b.provide::<Prefix, _>(|_| {
                        CALLS.fetch_add(1, Ordering::SeqCst);
                        Ok(Arc::new(Prefix("x".into())))
                    })?;
                    b.provide::<Banner, _>(|r| Ok(Arc::new(Banner(r.get::<Prefix>()?.0.clone()))))
                }),
            )
            .compose()
            .unwrap();

        assert_eq!(graph.get::<Banner>().unwrap().0, "x");
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(
            &graph.get::<Prefix>().unwrap(),
            &graph.get::<Prefix>().unwrap()
        ));
    }
}
