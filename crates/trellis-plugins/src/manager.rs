//! Top-level orchestration of the module runtime.
//!
//! [`RuntimeManager`] is the single owner of every [`ModuleContainer`] and of
//! the composed [`ServiceGraph`]. All mutation goes through it, on the
//! caller's task, one operation at a time.
//!
//! Failure policy:
//!
//! - Per-module problems (bad metadata, incompatible host, load or artifact
//!   failures, start/stop errors) are recorded against that module and never
//!   interrupt a pass. Bulk operations report them together in one
//!   [`BulkFailure`].
//! - Root directory I/O errors and dependency graph composition errors are
//!   fatal and returned immediately.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use semver::Version;
use tracing::{debug, error, info, warn};

use crate::capability::{CapabilityPoint, CapabilityType};
use crate::cleanup::{CleanupQueue, CleanupTask};
use crate::container::{ModuleContainer, ModuleInfo};
use crate::discovery::{self, Candidate, RejectedCandidate};
use crate::error::{
    BulkFailure, BulkOperation, LifecycleStage, ModuleFailure, PluginError, PluginResult,
};
use crate::events::{ListenerId, ListenerRegistry, ModuleEvent, ModuleEventListener};
use crate::graph::{DependencyModule, GraphComposer, GraphError, ServiceGraph};
use crate::install;
use crate::loader::{LoadBoundary, ModuleLoader};
use crate::metadata::{Metadata, ModuleName, check_compatibility};
use crate::module::ModuleContext;
use crate::preferences::{DisabledStore, FileDisabledStore};
use crate::state::ModuleState;

/// Default name of the disabled-set file under the plugin root.
pub const DISABLED_FILE_NAME: &str = ".disabled.toml";

/// Owner label of the host's own dependency modules.
const HOST_OWNER: &str = "host";

/// Construction parameters of a [`RuntimeManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Plugin root; each immediate subdirectory is one module.
    pub root: PathBuf,
    /// Version of the running host.
    pub host_version: Version,
    /// Disabled-set file. Defaults to `<root>/.disabled.toml`.
    pub disabled_file: Option<PathBuf>,
}

impl RuntimeOptions {
    /// Options with the default disabled-set location.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, host_version: Version) -> Self {
        Self {
            root: root.into(),
            host_version,
            disabled_file: None,
        }
    }

    /// Use a custom disabled-set file.
    #[must_use]
    pub fn with_disabled_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.disabled_file = Some(path.into());
        self
    }

    /// The effective disabled-set file.
    #[must_use]
    pub fn disabled_file(&self) -> PathBuf {
        self.disabled_file
            .clone()
            .unwrap_or_else(|| self.root.join(DISABLED_FILE_NAME))
    }
}

/// Outcome of one [`RuntimeManager::discover`] pass.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Modules that reached `Loaded`.
    pub loaded: Vec<ModuleName>,
    /// Modules registered as `Disabled`.
    pub disabled: Vec<ModuleName>,
    /// Modules registered as `Failed` (artifact resolution).
    pub failed: Vec<ModuleFailure>,
    /// Directories that produced no container.
    pub rejected: Vec<RejectedCandidate>,
    /// The scan found no structurally valid candidate.
    pub empty_root: bool,
}

impl DiscoveryReport {
    /// Number of containers the pass registered.
    #[must_use]
    pub fn registered(&self) -> usize {
        self.loaded
            .len()
            .saturating_add(self.disabled.len())
            .saturating_add(self.failed.len())
    }
}

/// Outcome of [`RuntimeManager::startup`].
#[derive(Debug)]
pub struct StartupReport {
    /// The discovery pass.
    pub discovery: DiscoveryReport,
    /// The activation pass. Partial failure does not abort startup.
    pub activation: Result<(), BulkFailure>,
}

/// A capability instance built by its factory.
#[derive(Clone)]
pub struct CapabilityInstance {
    /// Module supplying the capability.
    pub provider: ModuleName,
    /// The capability type.
    pub capability: CapabilityType,
    /// The instance; downcast to the concrete type.
    pub instance: Arc<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for CapabilityInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityInstance")
            .field("provider", &self.provider)
            .field("capability", &self.capability)
            .finish_non_exhaustive()
    }
}

/// Result of registering one candidate.
enum Admission {
    Loaded(ModuleName),
    Disabled(ModuleName),
    Failed(ModuleFailure),
}

/// Owns the module collection and drives the lifecycle.
pub struct RuntimeManager {
    root: PathBuf,
    host_version: Version,
    loader: Arc<dyn ModuleLoader>,
    disabled: Box<dyn DisabledStore>,
    containers: BTreeMap<ModuleName, ModuleContainer>,
    graph: Option<Arc<ServiceGraph>>,
    activation_order: Vec<ModuleName>,
    active: bool,
    listeners: ListenerRegistry,
    cleanup: CleanupQueue,
}

impl RuntimeManager {
    /// Create a manager persisting the disabled set to
    /// [`RuntimeOptions::disabled_file`].
    #[must_use]
    pub fn new(options: RuntimeOptions, loader: Arc<dyn ModuleLoader>) -> Self {
        let store = FileDisabledStore::new(options.disabled_file());
        Self::with_disabled_store(options, loader, Box::new(store))
    }

    /// Create a manager with a custom disabled-set store.
    #[must_use]
    pub fn with_disabled_store(
        options: RuntimeOptions,
        loader: Arc<dyn ModuleLoader>,
        disabled: Box<dyn DisabledStore>,
    ) -> Self {
        info!(
            root = %options.root.display(),
            host_version = %options.host_version,
            "Creating module runtime"
        );
        Self {
            cleanup: CleanupQueue::for_root(&options.root),
            root: options.root,
            host_version: options.host_version,
            loader,
            disabled,
            containers: BTreeMap::new(),
            graph: None,
            activation_order: Vec::new(),
            active: false,
            listeners: ListenerRegistry::new(),
        }
    }

    /// The plugin root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The host version read at construction.
    #[must_use]
    pub fn host_version(&self) -> &Version {
        &self.host_version
    }

    /// The composed graph, once [`RuntimeManager::compose_graph`] ran.
    #[must_use]
    pub fn graph(&self) -> Option<&Arc<ServiceGraph>> {
        self.graph.as_ref()
    }

    /// Whether modules are running: after `start_all`, before `stop_all`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Started modules, in activation order.
    #[must_use]
    pub fn activation_order(&self) -> &[ModuleName] {
        &self.activation_order
    }

    // ── discovery ──────────────────────────────────────────────────────

    /// Scan the plugin root and register every new valid module.
    ///
    /// Pending cleanup tasks run first. A missing root is created. Module
    /// directories already owned by a container are skipped, so repeated
    /// passes only pick up new arrivals.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`] if the root cannot be created or read.
    /// Everything else is reported per directory in the returned report.
    pub fn discover(&mut self) -> PluginResult<DiscoveryReport> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
            info!(root = %self.root.display(), "Created plugin root");
        }

        install::sweep_staging(&self.root);
        if let Err(e) = self.cleanup.execute_all() {
            warn!(error = %e, "Failed to run deferred cleanup tasks");
        }

        let disabled = self.disabled.load().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read disabled modules, treating all as enabled");
            BTreeSet::new()
        });

        let scan = discovery::scan_root(&self.root)?;
        let mut report = DiscoveryReport {
            rejected: scan.rejected,
            empty_root: scan.candidates.is_empty(),
            ..DiscoveryReport::default()
        };

        let owned: HashSet<PathBuf> = self
            .containers
            .values()
            .map(|c| c.boundary().module_dir.clone())
            .collect();

        for candidate in scan.candidates {
            if owned.contains(&candidate.dir) {
                debug!(dir = %candidate.dir.display(), "Module directory already registered");
                continue;
            }

            let admitted = Metadata::load(&candidate.metadata_path)
                .and_then(|metadata| self.admit(&candidate, metadata, &disabled));
            match admitted {
                Ok(Admission::Loaded(name)) => report.loaded.push(name),
                Ok(Admission::Disabled(name)) => report.disabled.push(name),
                Ok(Admission::Failed(failure)) => report.failed.push(failure),
                Err(error) => {
                    warn!(dir = %candidate.dir.display(), %error, "Module rejected");
                    report.rejected.push(RejectedCandidate {
                        dir: candidate.dir,
                        error,
                    });
                },
            }
        }

        if report.empty_root {
            info!(root = %self.root.display(), "No modules found");
        }
        info!(
            loaded = report.loaded.len(),
            disabled = report.disabled.len(),
            failed = report.failed.len(),
            rejected = report.rejected.len(),
            "Discovery complete"
        );
        Ok(report)
    }

    /// Validate, load and register one candidate.
    fn admit(
        &mut self,
        candidate: &Candidate,
        metadata: Metadata,
        disabled: &BTreeSet<ModuleName>,
    ) -> PluginResult<Admission> {
        check_compatibility(&metadata, &self.host_version)?;
        if self.containers.contains_key(&metadata.name) {
            return Err(PluginError::AlreadyInstalled(metadata.name));
        }

        let module = self.loader.load(candidate, &metadata)?;
        let boundary = LoadBoundary::for_candidate(candidate)?;
        let mut container = ModuleContainer::new(metadata, module, boundary)?;
        let name = container.name().clone();

        let admission = match container.resolve_artifacts() {
            Some(Err(message)) => {
                let cause = PluginError::LoadFailed {
                    name: name.clone(),
                    message,
                }
                .to_string();
                warn!(module = %name, error = %cause, "Module artifacts could not be resolved");
                let from = container.fail(cause.clone());
                emit_state(&self.listeners, &name, from, container.state().clone());
                Admission::Failed(ModuleFailure {
                    name: name.clone(),
                    cause,
                })
            },
            resolved => {
                if let Some(Ok(paths)) = resolved {
                    container.boundary_mut().artifacts = paths;
                }
                let next = if disabled.contains(&name) {
                    ModuleState::Disabled
                } else {
                    ModuleState::Loaded
                };
                let from = container.transition(next.clone())?;
                emit_state(&self.listeners, &name, from, next.clone());
                info!(
                    module = %name,
                    version = %container.metadata().version,
                    state = %next,
                    "Module registered"
                );
                if next == ModuleState::Disabled {
                    Admission::Disabled(name.clone())
                } else {
                    Admission::Loaded(name.clone())
                }
            },
        };

        self.containers.insert(name, container);
        Ok(admission)
    }

    // ── dependency graph ───────────────────────────────────────────────

    /// Merge the host's dependency modules with those of every `Loaded`
    /// module into the process-wide graph. Runs at most once.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::GraphComposition`] if the graph was already
    /// composed or any contribution fails. Nothing is started in that case.
    pub fn compose_graph(
        &mut self,
        host_modules: Vec<Box<dyn DependencyModule>>,
    ) -> PluginResult<Arc<ServiceGraph>> {
        if self.graph.is_some() {
            return Err(GraphError::AlreadyComposed.into());
        }

        let mut composer = GraphComposer::new().add_all(HOST_OWNER, host_modules);
        for container in self.containers.values() {
            if *container.state() != ModuleState::Loaded {
                continue;
            }
            let contributions = container.dependency_modules().map_err(|message| {
                let e = GraphError::Configure {
                    module: container.name().to_string(),
                    message,
                };
                error!(error = %e, "Dependency graph composition failed");
                e
            })?;
            composer = composer.add_all(container.name().as_str(), contributions);
        }

        let contributors = composer.len();
        let graph = match composer.compose() {
            Ok(graph) => Arc::new(graph),
            Err(e) => {
                error!(error = %e, "Dependency graph composition failed");
                return Err(e.into());
            },
        };

        info!(contributors, services = graph.len(), "Dependency graph composed");
        self.graph = Some(Arc::clone(&graph));
        Ok(graph)
    }

    // ── bulk lifecycle ─────────────────────────────────────────────────

    /// Discover, compose the graph with `host_modules`, then start every
    /// loaded module.
    ///
    /// # Errors
    ///
    /// Returns the fatal errors of [`RuntimeManager::discover`] and
    /// [`RuntimeManager::compose_graph`]. Per-module activation failures are
    /// in [`StartupReport::activation`].
    pub async fn startup(
        &mut self,
        host_modules: Vec<Box<dyn DependencyModule>>,
    ) -> PluginResult<StartupReport> {
        let discovery = self.discover()?;
        self.compose_graph(host_modules)?;
        let activation = self.activate().await;
        Ok(StartupReport {
            discovery,
            activation,
        })
    }

    /// Start every `Loaded` (or previously `Stopped`) module in name order.
    ///
    /// Composes a graph without host modules first if none was composed.
    /// Every module is attempted; failures move that module to `Failed` and
    /// are reported together afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::GraphComposition`] if the implicit composition
    /// fails, or [`PluginError::Bulk`] naming every module that failed to
    /// start.
    pub async fn start_all(&mut self) -> PluginResult<()> {
        if self.graph.is_none() {
            self.compose_graph(Vec::new())?;
        }
        self.activate().await.map_err(PluginError::from)
    }

    async fn activate(&mut self) -> Result<(), BulkFailure> {
        let graph = self
            .graph
            .clone()
            .unwrap_or_else(|| Arc::new(ServiceGraph::empty()));

        let pending: Vec<ModuleName> = self
            .containers
            .values()
            .filter(|c| matches!(c.state(), ModuleState::Loaded | ModuleState::Stopped))
            .map(|c| c.name().clone())
            .collect();

        let mut failures = Vec::new();
        for name in &pending {
            let Some(container) = self.containers.get_mut(name) else {
                continue;
            };
            match start_container(container, &graph, &self.listeners).await {
                Ok(()) => self.activation_order.push(name.clone()),
                Err(cause) => failures.push(ModuleFailure {
                    name: name.clone(),
                    cause,
                }),
            }
        }

        self.active = true;
        info!(
            attempted = pending.len(),
            failed = failures.len(),
            "Activation pass complete"
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BulkFailure {
                operation: BulkOperation::StartAll,
                attempted: pending.len(),
                failures,
            })
        }
    }

    /// Stop every `Started` module, most recently started first.
    ///
    /// Every module is asked exactly once; failures move that module to
    /// `Failed` and are reported together afterwards.
    ///
    /// # Errors
    ///
    /// Returns a [`BulkFailure`] naming every module that failed to stop.
    pub async fn stop_all(&mut self) -> Result<(), BulkFailure> {
        self.active = false;

        let mut order: Vec<ModuleName> = self.activation_order.drain(..).rev().collect();
        for container in self.containers.values() {
            if *container.state() == ModuleState::Started && !order.contains(container.name()) {
                order.push(container.name().clone());
            }
        }
        order.retain(|name| {
            self.containers
                .get(name)
                .is_some_and(|c| *c.state() == ModuleState::Started)
        });

        let mut failures = Vec::new();
        for name in &order {
            let Some(container) = self.containers.get_mut(name) else {
                continue;
            };
            if let Err(cause) = stop_container(container, &self.listeners).await {
                failures.push(ModuleFailure {
                    name: name.clone(),
                    cause,
                });
            }
        }

        info!(
            attempted = order.len(),
            failed = failures.len(),
            "Deactivation pass complete"
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BulkFailure {
                operation: BulkOperation::StopAll,
                attempted: order.len(),
                failures,
            })
        }
    }

    // ── queries ────────────────────────────────────────────────────────

    /// Snapshot of every module, sorted by name.
    #[must_use]
    pub fn list_modules(&self) -> Vec<ModuleInfo> {
        self.containers.values().map(ModuleContainer::info).collect()
    }

    /// Snapshot of one module.
    #[must_use]
    pub fn get_module(&self, name: &str) -> Option<ModuleInfo> {
        self.containers.get(name).map(ModuleContainer::info)
    }

    /// Borrow one container.
    #[must_use]
    pub fn container(&self, name: &str) -> Option<&ModuleContainer> {
        self.containers.get(name)
    }

    /// Every capability type supplied for `point` by a `Started` module.
    #[must_use]
    pub fn capabilities_of_type(&self, point: CapabilityPoint) -> BTreeSet<CapabilityType> {
        self.started()
            .flat_map(|c| c.capabilities_of(point).copied())
            .collect()
    }

    /// The module that supplies `capability`, if any.
    #[must_use]
    pub fn provider_of(&self, capability: &CapabilityType) -> Option<&ModuleName> {
        self.containers
            .values()
            .find(|c| c.provides_capability(capability))
            .map(ModuleContainer::name)
    }

    /// Build every factory-backed capability for `point` supplied by a
    /// `Started` module, using the composed graph. Types without a factory
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Instantiation`] for the first factory that fails.
    pub fn instantiate_capabilities(
        &self,
        point: CapabilityPoint,
    ) -> PluginResult<Vec<CapabilityInstance>> {
        let empty = ServiceGraph::empty();
        let graph = self.graph.as_deref().unwrap_or(&empty);

        let mut instances = Vec::new();
        for container in self.started() {
            for capability in container.capabilities_of(point) {
                let Some(factory) = capability.factory() else {
                    continue;
                };
                let instance = factory(graph).map_err(|e| PluginError::Instantiation {
                    type_name: capability.name.to_string(),
                    message: e.to_string(),
                })?;
                instances.push(CapabilityInstance {
                    provider: container.name().clone(),
                    capability: *capability,
                    instance,
                });
            }
        }
        Ok(instances)
    }

    fn started(&self) -> impl Iterator<Item = &ModuleContainer> {
        self.containers
            .values()
            .filter(|c| *c.state() == ModuleState::Started)
    }

    // ── management ─────────────────────────────────────────────────────

    /// Install a module from a directory or a `.tar.gz`/`.tgz` archive.
    ///
    /// The module is copied to `<root>/<name>/` and registered as `Loaded`
    /// (or `Disabled`). It is not started; the next `start_all` (or an
    /// `enable` while active) does that.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::AlreadyInstalled`] on a name collision and
    /// [`PluginError::Preferences`] if the disabled set cannot be read (no
    /// state changes in either case), validation and compatibility errors,
    /// extraction errors, or
    /// [`PluginError::LoadFailed`] if the module cannot be loaded (the copied
    /// directory is removed again).
    pub fn install(&mut self, source: &Path) -> PluginResult<ModuleInfo> {
        let scratch = tempfile::tempdir()?;
        let package = install::unpack_source(source, scratch.path())?;
        let staged = discovery::inspect_dir(&package)?;
        let metadata = Metadata::load(&staged.metadata_path)?;
        check_compatibility(&metadata, &self.host_version)?;

        let name = metadata.name.clone();
        if self.containers.contains_key(&name) {
            return Err(PluginError::AlreadyInstalled(name));
        }
        let disabled = self.disabled.load()?;

        std::fs::create_dir_all(&self.root)?;
        let target = self.root.join(name.as_str());
        if target.exists() {
            // A directory left behind by an uninstall whose removal was
            // deferred may be replaced; anything else is a collision.
            if !self.cleanup.cancel(&target)? {
                return Err(PluginError::AlreadyInstalled(name));
            }
            std::fs::remove_dir_all(&target)?;
        }

        let dir = install::commit(&package, &self.root, &name)?;
        let admitted = discovery::inspect_dir(&dir)
            .and_then(|candidate| self.admit(&candidate, metadata, &disabled));

        let rollback = |manager: &mut Self| {
            manager.containers.remove(&name);
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(dir = %dir.display(), error = %e, "Failed to roll back install");
            }
        };

        match admitted {
            Ok(Admission::Failed(failure)) => {
                rollback(self);
                return Err(PluginError::LoadFailed {
                    name: failure.name,
                    message: failure.cause,
                });
            },
            Err(e) => {
                rollback(self);
                return Err(e);
            },
            Ok(Admission::Loaded(_) | Admission::Disabled(_)) => {},
        }

        let Some(container) = self.containers.get(&name) else {
            return Err(PluginError::NotFound(name.to_string()));
        };
        if self.graph.is_some() && container.dependency_modules().is_ok_and(|m| !m.is_empty()) {
            warn!(
                module = %name,
                "Dependency graph already composed; module bindings take effect after restart"
            );
        }

        let info = container.info();
        self.listeners.emit(&ModuleEvent::Installed { name: name.clone() });
        info!(module = %name, version = %info.metadata.version, dir = %dir.display(), "Module installed");
        Ok(info)
    }

    /// Stop (best-effort), unregister and delete a module.
    ///
    /// A stop failure is logged and does not block removal. If the directory
    /// cannot be deleted now, the removal is queued for the next discovery.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`] for an unknown name, or a
    /// [`PluginError::Preferences`] error if the cleanup queue cannot be
    /// written.
    pub async fn uninstall(&mut self, name: &str) -> PluginResult<()> {
        let Some(mut container) = self.containers.remove(name) else {
            return Err(PluginError::NotFound(name.to_string()));
        };
        let name = container.name().clone();

        if *container.state() == ModuleState::Started
            && let Err(cause) = stop_container(&mut container, &self.listeners).await
        {
            warn!(module = %name, error = %cause, "Stop failed during uninstall, removing anyway");
        }
        self.activation_order.retain(|n| *n != name);

        let dir = container.boundary().module_dir.clone();
        drop(container);

        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => {
                warn!(module = %name, dir = %dir.display(), error = %e, "Deferring module directory removal");
                self.cleanup.enqueue(CleanupTask::dir(&dir))?;
            },
        }

        if let Err(e) = self.disabled.set_disabled(&name, false) {
            warn!(module = %name, error = %e, "Failed to clear disabled flag");
        }

        self.listeners.emit(&ModuleEvent::Uninstalled { name: name.clone() });
        info!(module = %name, "Module uninstalled");
        Ok(())
    }

    /// Persistently disable a module, stopping it first if it runs.
    ///
    /// A failed module stays failed; the flag still applies on the next run.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`], a preferences error, or the
    /// [`PluginError::Lifecycle`] error of a failed stop (the module is then
    /// `Failed`).
    pub async fn disable(&mut self, name: &str) -> PluginResult<()> {
        let Some(container) = self.containers.get_mut(name) else {
            return Err(PluginError::NotFound(name.to_string()));
        };
        let name = container.name().clone();
        self.disabled.set_disabled(&name, true)?;

        match container.state().clone() {
            ModuleState::Disabled | ModuleState::Failed(_) => return Ok(()),
            ModuleState::Started => {
                self.activation_order.retain(|n| *n != name);
                if let Err(cause) = stop_container(container, &self.listeners).await {
                    return Err(PluginError::Lifecycle {
                        name,
                        stage: LifecycleStage::Stop,
                        message: cause,
                    });
                }
            },
            _ => {},
        }

        let from = container.transition(ModuleState::Disabled)?;
        emit_state(&self.listeners, &name, from, ModuleState::Disabled);
        info!(module = %name, "Module disabled");
        Ok(())
    }

    /// Clear a module's disabled flag. A `Disabled` module becomes `Loaded`
    /// and, while the runtime is active, is started right away.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::NotFound`], a preferences error, or the
    /// [`PluginError::Lifecycle`] error of a failed start.
    pub async fn enable(&mut self, name: &str) -> PluginResult<()> {
        let Some(container) = self.containers.get_mut(name) else {
            return Err(PluginError::NotFound(name.to_string()));
        };
        let name = container.name().clone();
        self.disabled.set_disabled(&name, false)?;

        if *container.state() != ModuleState::Disabled {
            return Ok(());
        }

        let from = container.transition(ModuleState::Loaded)?;
        emit_state(&self.listeners, &name, from, ModuleState::Loaded);
        info!(module = %name, "Module enabled");

        if !self.active {
            return Ok(());
        }

        if self.graph.is_some() && container.dependency_modules().is_ok_and(|m| !m.is_empty()) {
            warn!(
                module = %name,
                "Dependency graph already composed; module bindings take effect after restart"
            );
        }
        let graph = self
            .graph
            .clone()
            .unwrap_or_else(|| Arc::new(ServiceGraph::empty()));
        match start_container(container, &graph, &self.listeners).await {
            Ok(()) => {
                self.activation_order.push(name);
                Ok(())
            },
            Err(cause) => Err(PluginError::Lifecycle {
                name,
                stage: LifecycleStage::Start,
                message: cause,
            }),
        }
    }

    // ── events ─────────────────────────────────────────────────────────

    /// Receive module events.
    pub fn subscribe(&self, listener: Arc<dyn ModuleEventListener>) -> ListenerId {
        self.listeners.subscribe(listener)
    }

    /// Stop receiving module events. Returns whether `id` was subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

impl std::fmt::Debug for RuntimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeManager")
            .field("root", &self.root)
            .field("host_version", &self.host_version)
            .field("modules", &self.containers.keys().collect::<Vec<_>>())
            .field("composed", &self.graph.is_some())
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

fn emit_state(listeners: &ListenerRegistry, name: &ModuleName, from: ModuleState, to: ModuleState) {
    if from != to {
        listeners.emit(&ModuleEvent::StateChanged {
            name: name.clone(),
            from,
            to,
        });
    }
}

/// Start one container, returning the failure cause on error.
async fn start_container(
    container: &mut ModuleContainer,
    graph: &Arc<ServiceGraph>,
    listeners: &ListenerRegistry,
) -> Result<(), String> {
    let name = container.name().clone();
    let from = container.state().clone();

    let boundary = container.boundary();
    let ctx = ModuleContext {
        name: name.clone(),
        module_dir: boundary.module_dir.clone(),
        config_dir: boundary.config_dir(),
        lib_dir: boundary.lib_dir.clone(),
        services: Arc::clone(graph),
    };

    if let Err(e) = std::fs::create_dir_all(&ctx.config_dir) {
        let cause = format!("failed to create config directory: {e}");
        warn!(module = %name, error = %cause, "Module activation failed");
        let from = container.fail(cause.clone());
        emit_state(listeners, &name, from, container.state().clone());
        return Err(cause);
    }

    let result = container.start(&ctx).await;
    emit_state(listeners, &name, from, container.state().clone());
    result.map(|_| ()).map_err(lifecycle_cause)
}

/// Stop one container, returning the failure cause on error.
async fn stop_container(
    container: &mut ModuleContainer,
    listeners: &ListenerRegistry,
) -> Result<(), String> {
    let from = container.state().clone();
    let result = container.stop().await;
    emit_state(listeners, container.name(), from, container.state().clone());
    result.map(|_| ()).map_err(lifecycle_cause)
}

fn lifecycle_cause(error: PluginError) -> String {
    match error {
        PluginError::Lifecycle { message, .. } => message,
        other => other.to_string(),
    }
}
