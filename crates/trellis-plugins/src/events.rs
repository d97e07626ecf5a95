//! Module state-change notifications.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::loader::panic_message;
use crate::metadata::ModuleName;
use crate::state::ModuleState;

/// Something that happened to a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ModuleEvent {
    /// A module moved between lifecycle states.
    StateChanged {
        /// The module.
        name: ModuleName,
        /// Previous state.
        from: ModuleState,
        /// New state.
        to: ModuleState,
    },
    /// A module was installed into the plugin root.
    Installed {
        /// The module.
        name: ModuleName,
    },
    /// A module was removed from the plugin root.
    Uninstalled {
        /// The module.
        name: ModuleName,
    },
}

impl ModuleEvent {
    /// The module the event is about.
    #[must_use]
    pub fn module(&self) -> &ModuleName {
        match self {
            Self::StateChanged { name, .. } | Self::Installed { name } | Self::Uninstalled { name } => {
                name
            },
        }
    }
}

/// Receives [`ModuleEvent`]s.
pub trait ModuleEventListener: Send + Sync {
    /// Called synchronously on the orchestration thread. A panic is logged
    /// and swallowed.
    fn on_event(&self, event: &ModuleEvent);
}

impl<F> ModuleEventListener for F
where
    F: Fn(&ModuleEvent) + Send + Sync,
{
    fn on_event(&self, event: &ModuleEvent) {
        self(event);
    }
}

/// Handle returned by [`ListenerRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

/// Subscribed listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ModuleEventListener>)>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener.
    pub fn subscribe(&self, listener: Arc<dyn ModuleEventListener>) -> ListenerId {
        let id = ListenerId(Uuid::new_v4());
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns whether it was subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no listener is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener in subscription order.
    pub fn emit(&self, event: &ModuleEvent) {
        // Snapshot so a listener may subscribe or unsubscribe re-entrantly.
        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                warn!(
                    module = %event.module(),
                    panic = %panic_message(&*payload),
                    "Module event listener panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}
