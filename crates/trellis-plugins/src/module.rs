//! The loadable unit.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::artifact::ArtifactRepository;
use crate::capability::CapabilityType;
use crate::graph::{DependencyModule, ServiceGraph};
use crate::metadata::ModuleName;

/// Behaviour of a module's entry type.
///
/// Implementations are produced by a [`ModuleLoader`](crate::ModuleLoader)
/// and owned by their [`ModuleContainer`](crate::ModuleContainer). Work a
/// module spawns from `start` is its own to cancel in `stop`; the runtime does
/// not supervise it.
#[async_trait]
pub trait Module: Send + Sync {
    /// Capability types this module ships.
    fn capabilities(&self) -> Vec<CapabilityType> {
        Vec::new()
    }

    /// Bindings this module contributes to the process-wide graph. Called
    /// once, when the graph is composed.
    fn dependency_modules(&self) -> Vec<Box<dyn DependencyModule>> {
        Vec::new()
    }

    /// Resolver for the module's extra runtime libraries.
    fn artifact_repository(&self) -> Option<&dyn ArtifactRepository> {
        None
    }

    /// Activate the module.
    ///
    /// # Errors
    ///
    /// Any error marks the module failed; the rest of the bulk pass continues.
    async fn start(&mut self, ctx: &ModuleContext) -> anyhow::Result<()>;

    /// Deactivate the module.
    ///
    /// # Errors
    ///
    /// Any error marks the module failed; the rest of the bulk pass continues.
    async fn stop(&mut self) -> anyhow::Result<()>;
}

/// What a module sees of the runtime when it starts.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    /// The module's name.
    pub name: ModuleName,
    /// The module's directory under the plugin root.
    pub module_dir: PathBuf,
    /// Directory for the module's own settings. Created before `start`.
    pub config_dir: PathBuf,
    /// Directory holding resolved artifacts.
    pub lib_dir: PathBuf,
    /// The composed dependency graph.
    pub services: Arc<ServiceGraph>,
}
