//! Mock modules, loaders and dependency contributors.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use trellis_plugins::{
    ArtifactRepository, Binder, CapabilityType, DependencyModule, FactoryLoader, GraphError,
    GraphResult, LocalArtifactRepository, Module, ModuleContext, ServiceGraph,
};

/// A tool capability with a factory.
pub const ECHO_TOOL: CapabilityType =
    CapabilityType::concrete("demo.EchoTool", &["trellis.tool"]).with_factory(build_echo_tool);

/// A completion provider capability without a factory.
pub const SPELL_COMPLETER: CapabilityType =
    CapabilityType::concrete("demo.SpellCompleter", &["trellis.completion-provider"]);

/// A type implementing both recognized points.
pub const DUAL_HELPER: CapabilityType = CapabilityType::concrete(
    "demo.DualHelper",
    &["trellis.tool", "trellis.completion-provider"],
);

/// An abstract tool base. Never resolved.
pub const BASE_TOOL: CapabilityType =
    CapabilityType::abstract_type("demo.BaseTool", &["trellis.tool"]);

/// A concrete type implementing nothing the host recognizes.
pub const UNRELATED: CapabilityType =
    CapabilityType::concrete("demo.Unrelated", &["demo.internal"]);

/// A tool whose factory always fails.
pub const BROKEN_TOOL: CapabilityType =
    CapabilityType::concrete("demo.BrokenTool", &["trellis.tool"]).with_factory(build_broken_tool);

/// Instance built by [`ECHO_TOOL`]'s factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoTool {
    /// Greeting taken from a bound [`Greeting`], if any.
    pub greeting: String,
}

/// A simple value modules and hosts bind into the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting(pub String);

fn build_echo_tool(graph: &ServiceGraph) -> GraphResult<Arc<dyn Any + Send + Sync>> {
    let greeting = graph
        .get::<Greeting>()
        .map_or_else(|| "hello".to_owned(), |g| g.0.clone());
    Ok(Arc::new(EchoTool { greeting }))
}

fn build_broken_tool(_graph: &ServiceGraph) -> GraphResult<Arc<dyn Any + Send + Sync>> {
    Err(GraphError::Provider {
        type_name: "demo.BrokenTool".into(),
        message: "missing license key".into(),
    })
}

/// What a scripted lifecycle call does.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Outcome {
    /// Return `Ok(())`.
    #[default]
    Succeed,
    /// Return an error with this message.
    Fail(String),
    /// Panic with this message.
    Panic(String),
}

impl Outcome {
    /// Shorthand for [`Outcome::Fail`].
    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }

    /// Shorthand for [`Outcome::Panic`].
    #[must_use]
    pub fn panic(message: impl Into<String>) -> Self {
        Self::Panic(message.into())
    }

    #[allow(clippy::panic)]
    fn run(&self) -> anyhow::Result<()> {
        match self {
            Self::Succeed => Ok(()),
            Self::Fail(message) => Err(anyhow::anyhow!("{message}")),
            Self::Panic(message) => panic!("{message}"),
        }
    }
}

/// One recorded lifecycle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `start` was called on the module.
    Start(String),
    /// `stop` was called on the module.
    Stop(String),
}

/// Shared, ordered record of lifecycle calls across mock modules.
///
/// Uses `std::sync::Mutex` so it works from sync and async tests alike.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
    contexts: Arc<Mutex<Vec<ModuleContext>>>,
}

impl CallLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: Call) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }

    fn record_context(&self, ctx: &ModuleContext) {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ctx.clone());
    }

    /// Every call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Modules whose `start` was called, in order.
    #[must_use]
    pub fn starts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Start(name) => Some(name),
                Call::Stop(_) => None,
            })
            .collect()
    }

    /// Modules whose `stop` was called, in order.
    #[must_use]
    pub fn stops(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Stop(name) => Some(name),
                Call::Start(_) => None,
            })
            .collect()
    }

    /// The context each `start` received, in order.
    #[must_use]
    pub fn contexts(&self) -> Vec<ModuleContext> {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

type BindingFactory = Arc<dyn Fn() -> Box<dyn DependencyModule> + Send + Sync>;

/// A module whose lifecycle is scripted and recorded.
#[derive(Clone)]
pub struct MockModule {
    name: String,
    log: CallLog,
    on_start: Outcome,
    on_stop: Outcome,
    capabilities: Vec<CapabilityType>,
    bindings: Vec<BindingFactory>,
    artifacts: Option<LocalArtifactRepository>,
    manifest_panic: Option<String>,
}

impl MockModule {
    /// A module that starts and stops cleanly, recording into `log`.
    #[must_use]
    pub fn new(name: impl Into<String>, log: &CallLog) -> Self {
        Self {
            name: name.into(),
            log: log.clone(),
            on_start: Outcome::Succeed,
            on_stop: Outcome::Succeed,
            capabilities: Vec::new(),
            bindings: Vec::new(),
            artifacts: None,
            manifest_panic: None,
        }
    }

    /// Entry point id this mock is registered under (its name).
    #[must_use]
    pub fn entry_id(&self) -> &str {
        &self.name
    }

    /// Script `start`.
    #[must_use]
    pub fn on_start(mut self, outcome: Outcome) -> Self {
        self.on_start = outcome;
        self
    }

    /// Script `stop`.
    #[must_use]
    pub fn on_stop(mut self, outcome: Outcome) -> Self {
        self.on_stop = outcome;
        self
    }

    /// Declare a capability type.
    #[must_use]
    pub fn with_capability(mut self, capability: CapabilityType) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Contribute a binding of `value` to the dependency graph.
    #[must_use]
    pub fn with_binding<T>(mut self, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        let owner = self.name.clone();
        self.bindings.push(Arc::new(move || {
            Box::new(BindValue::new(format!("{owner}-bindings"), value.clone()))
                as Box<dyn DependencyModule>
        }));
        self
    }

    /// Contribute a dependency module that fails to configure.
    #[must_use]
    pub fn with_failing_binding(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.bindings.push(Arc::new(move || {
            Box::new(FailingModule(message.clone())) as Box<dyn DependencyModule>
        }));
        self
    }

    /// Panic with `message` when asked for capabilities.
    #[must_use]
    pub fn panicking_manifest(mut self, message: impl Into<String>) -> Self {
        self.manifest_panic = Some(message.into());
        self
    }

    /// Resolve artifacts from `repository` at load time.
    #[must_use]
    pub fn with_artifacts(mut self, repository: LocalArtifactRepository) -> Self {
        self.artifacts = Some(repository);
        self
    }
}

impl fmt::Debug for MockModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockModule")
            .field("name", &self.name)
            .field("on_start", &self.on_start)
            .field("on_stop", &self.on_stop)
            .field("capabilities", &self.capabilities.len())
            .field("bindings", &self.bindings.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Module for MockModule {
    fn capabilities(&self) -> Vec<CapabilityType> {
        if let Some(message) = &self.manifest_panic {
            panic!("{message}");
        }
        self.capabilities.clone()
    }

    fn dependency_modules(&self) -> Vec<Box<dyn DependencyModule>> {
        self.bindings.iter().map(|make| make()).collect()
    }

    fn artifact_repository(&self) -> Option<&dyn ArtifactRepository> {
        self.artifacts
            .as_ref()
            .map(|repo| repo as &dyn ArtifactRepository)
    }

    async fn start(&mut self, ctx: &ModuleContext) -> anyhow::Result<()> {
        self.log.record(Call::Start(self.name.clone()));
        self.log.record_context(ctx);
        self.on_start.run()
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.log.record(Call::Stop(self.name.clone()));
        self.on_stop.run()
    }
}

/// A loader serving each mock under its entry id. Every load hands out a
/// fresh clone sharing the same [`CallLog`].
#[must_use]
pub fn mock_loader(modules: impl IntoIterator<Item = MockModule>) -> Arc<FactoryLoader> {
    let mut loader = FactoryLoader::new();
    for module in modules {
        let entry_id = module.entry_id().to_owned();
        loader.register(entry_id, move |_| Ok(Box::new(module.clone()) as Box<dyn Module>));
    }
    Arc::new(loader)
}

/// Dependency module binding one value.
#[derive(Debug, Clone)]
pub struct BindValue<T> {
    name: String,
    value: T,
}

impl<T> BindValue<T> {
    /// Bind `value` under contributor name `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, value: T) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl<T> DependencyModule for BindValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&self, binder: &mut Binder<'_>) -> GraphResult<()> {
        binder.bind_value(self.value.clone())
    }
}

/// Dependency module that rejects its own configuration.
#[derive(Debug, Clone)]
pub struct FailingModule(pub String);

impl DependencyModule for FailingModule {
    fn name(&self) -> &str {
        "failing"
    }

    fn configure(&self, _binder: &mut Binder<'_>) -> GraphResult<()> {
        Err(GraphError::Configure {
            module: "failing".into(),
            message: self.0.clone(),
        })
    }
}
