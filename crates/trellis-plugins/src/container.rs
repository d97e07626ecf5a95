//! The runtime record of one loaded module.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tracing::{info, warn};

use crate::capability::{self, CapabilityPoint, CapabilityType, ExtensionMap};
use crate::error::{LifecycleStage, PluginError, PluginResult};
use crate::graph::DependencyModule;
use crate::loader::{LoadBoundary, panic_message};
use crate::metadata::{Metadata, ModuleName};
use crate::module::{Module, ModuleContext};
use crate::state::ModuleState;

/// Pairs a module instance with its lifecycle state and its resolved
/// capabilities.
///
/// Metadata, capabilities and boundary never change after construction.
/// Only the [`RuntimeManager`](crate::RuntimeManager) changes the state.
pub struct ModuleContainer {
    metadata: Metadata,
    module: Box<dyn Module>,
    state: ModuleState,
    capabilities: ExtensionMap,
    boundary: LoadBoundary,
    loaded_at: DateTime<Utc>,
}

impl ModuleContainer {
    /// Wrap a freshly loaded module. Capabilities are resolved here, once.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::LoadFailed`] if the module panics while
    /// listing its capabilities.
    pub fn new(
        metadata: Metadata,
        module: Box<dyn Module>,
        boundary: LoadBoundary,
    ) -> PluginResult<Self> {
        let declared = catch_unwind(AssertUnwindSafe(|| module.capabilities())).map_err(
            |payload| PluginError::LoadFailed {
                name: metadata.name.clone(),
                message: format!("capabilities panicked: {}", panic_message(&*payload)),
            },
        )?;
        Ok(Self {
            metadata,
            module,
            state: ModuleState::Discovered,
            capabilities: capability::resolve(&declared),
            boundary,
            loaded_at: Utc::now(),
        })
    }

    /// Module name.
    #[must_use]
    pub fn name(&self) -> &ModuleName {
        &self.metadata.name
    }

    /// Validated metadata.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> &ModuleState {
        &self.state
    }

    /// Resolved capability map.
    #[must_use]
    pub fn capabilities(&self) -> &ExtensionMap {
        &self.capabilities
    }

    /// Whether the module supplies `capability`.
    #[must_use]
    pub fn provides_capability(&self, capability: &CapabilityType) -> bool {
        self.capabilities.values().any(|set| set.contains(capability))
    }

    /// Whether the module supplies anything for `point`.
    #[must_use]
    pub fn provides_point(&self, point: CapabilityPoint) -> bool {
        self.capabilities.get(&point).is_some_and(|set| !set.is_empty())
    }

    /// Capability types supplied for `point`, in type order.
    pub fn capabilities_of(&self, point: CapabilityPoint) -> impl Iterator<Item = &CapabilityType> {
        self.capabilities.get(&point).into_iter().flatten()
    }

    /// Resources owned by the module.
    #[must_use]
    pub fn boundary(&self) -> &LoadBoundary {
        &self.boundary
    }

    /// When the module instance was created.
    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// The module instance.
    #[must_use]
    pub fn module(&self) -> &dyn Module {
        self.module.as_ref()
    }

    /// Serializable snapshot.
    #[must_use]
    pub fn info(&self) -> ModuleInfo {
        ModuleInfo {
            metadata: self.metadata.clone(),
            state: self.state.clone(),
            dir: self.boundary.module_dir.clone(),
            icon: self
                .metadata
                .icon
                .as_ref()
                .map(|icon| self.boundary.module_dir.join(icon)),
            entry_digest: self.boundary.entry_digest.clone(),
            loaded_at: self.loaded_at,
        }
    }

    pub(crate) fn boundary_mut(&mut self) -> &mut LoadBoundary {
        &mut self.boundary
    }

    /// The module's graph contributions. `Err` carries a panic message.
    pub(crate) fn dependency_modules(&self) -> Result<Vec<Box<dyn DependencyModule>>, String> {
        catch_unwind(AssertUnwindSafe(|| self.module.dependency_modules()))
            .map_err(|payload| format!("panicked: {}", panic_message(&*payload)))
    }

    /// Resolve the module's artifacts into its library directory, `None` if
    /// it has no repository.
    pub(crate) fn resolve_artifacts(&self) -> Option<Result<Vec<PathBuf>, String>> {
        let lib_dir = &self.boundary.lib_dir;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.module
                .artifact_repository()
                .map(|repo| repo.resolve(lib_dir))
        }));
        match outcome {
            Ok(resolved) => resolved.map(|r| r.map_err(|e| e.to_string())),
            Err(payload) => Some(Err(format!(
                "artifact resolution panicked: {}",
                panic_message(&*payload)
            ))),
        }
    }

    /// Move to `next`, returning the previous state.
    pub(crate) fn transition(&mut self, next: ModuleState) -> PluginResult<ModuleState> {
        if !self.state.can_transition_to(&next) {
            return Err(PluginError::InvalidTransition {
                name: self.metadata.name.clone(),
                from: self.state.clone(),
                to: next,
            });
        }
        Ok(std::mem::replace(&mut self.state, next))
    }

    /// Mark failed, returning the previous state. A container that is
    /// already failed keeps its first cause.
    pub(crate) fn fail(&mut self, cause: impl Into<String>) -> ModuleState {
        if self.state.is_failed() {
            return self.state.clone();
        }
        std::mem::replace(&mut self.state, ModuleState::Failed(cause.into()))
    }

    /// Run `Module::start` and move to `Started`, or to `Failed` on error or
    /// panic.
    pub(crate) async fn start(&mut self, ctx: &ModuleContext) -> PluginResult<ModuleState> {
        if !self.state.can_transition_to(&ModuleState::Started) {
            return Err(PluginError::InvalidTransition {
                name: self.metadata.name.clone(),
                from: self.state.clone(),
                to: ModuleState::Started,
            });
        }

        let outcome = AssertUnwindSafe(self.module.start(ctx)).catch_unwind().await;
        self.settle(outcome, LifecycleStage::Start, ModuleState::Started)
    }

    /// Run `Module::stop` and move to `Stopped`, or to `Failed` on error or
    /// panic.
    pub(crate) async fn stop(&mut self) -> PluginResult<ModuleState> {
        if !self.state.can_transition_to(&ModuleState::Stopped) {
            return Err(PluginError::InvalidTransition {
                name: self.metadata.name.clone(),
                from: self.state.clone(),
                to: ModuleState::Stopped,
            });
        }

        let outcome = AssertUnwindSafe(self.module.stop()).catch_unwind().await;
        self.settle(outcome, LifecycleStage::Stop, ModuleState::Stopped)
    }

    fn settle(
        &mut self,
        outcome: std::thread::Result<anyhow::Result<()>>,
        stage: LifecycleStage,
        success: ModuleState,
    ) -> PluginResult<ModuleState> {
        let message = match outcome {
            Ok(Ok(())) => {
                let previous = std::mem::replace(&mut self.state, success);
                info!(module = %self.metadata.name, state = %self.state, "Module {stage} succeeded");
                return Ok(previous);
            },
            Ok(Err(e)) => format!("{e:#}"),
            Err(payload) => format!("panicked: {}", panic_message(&*payload)),
        };

        warn!(module = %self.metadata.name, %stage, error = %message, "Module {stage} failed");
        self.fail(message.clone());
        Err(PluginError::Lifecycle {
            name: self.metadata.name.clone(),
            stage,
            message,
        })
    }
}

impl std::fmt::Debug for ModuleContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContainer")
            .field("name", &self.metadata.name)
            .field("state", &self.state)
            .field("capabilities", &self.capabilities)
            .field("dir", &self.boundary.module_dir)
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a module, safe to hand to UIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    /// Validated metadata.
    pub metadata: Metadata,
    /// State at snapshot time.
    pub state: ModuleState,
    /// Module directory.
    pub dir: PathBuf,
    /// Absolute icon path, if the module declares one.
    pub icon: Option<PathBuf>,
    /// `blake3:<hex>` digest of the entry point.
    pub entry_digest: String,
    /// When the module instance was created.
    pub loaded_at: DateTime<Utc>,
}
