//! Integration tests for discovery, graph composition and bulk start/stop.

use std::sync::Arc;

use trellis_plugins::{
    BulkOperation, DependencyModule, GraphError, ModuleName, ModuleState, PluginError,
    RuntimeManager,
};
use trellis_test::{
    BindValue, CallLog, Greeting, MockModule, ModuleFixture, Outcome, PluginRoot,
    init_test_logging, mock_loader, test_runtime, test_runtime_with_disabled,
};

/// Marker a module binds into the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Telemetry(&'static str);

fn state_of(runtime: &RuntimeManager, name: &str) -> ModuleState {
    runtime.get_module(name).unwrap().state
}

#[tokio::test]
async fn valid_failing_and_invalid_modules_end_to_end() {
    init_test_logging();
    let root = PluginRoot::new();
    let _ = root.add(&ModuleFixture::new("a"));
    let _ = root.add(&ModuleFixture::new("b"));
    let _ = root.add(&ModuleFixture::new("c").version("not-a-version"));

    let log = CallLog::new();
    let loader = mock_loader([
        MockModule::new("a", &log),
        MockModule::new("b", &log).on_start(Outcome::fail("port 8080 in use")),
        MockModule::new("c", &log),
    ]);
    let mut runtime = test_runtime(root.path(), loader);

    let report = runtime.discover().unwrap();
    let names: Vec<_> = runtime
        .list_modules()
        .into_iter()
        .map(|m| m.metadata.name.to_string())
        .collect();
    assert_eq!(names, ["a", "b"]);
    assert_eq!(report.rejected.len(), 1);
    assert!(report.rejected[0].dir.ends_with("c"));
    assert!(matches!(
        report.rejected[0].error,
        PluginError::Validation { .. }
    ));

    let err = runtime.start_all().await.unwrap_err();
    let PluginError::Bulk(failure) = err else {
        panic!("expected a bulk failure");
    };
    assert_eq!(failure.operation, BulkOperation::StartAll);
    assert_eq!(failure.attempted, 2);
    assert_eq!(failure.failed_names(), [&ModuleName::from_static("b")]);
    assert!(failure.failures[0].cause.contains("port 8080 in use"));

    assert_eq!(state_of(&runtime, "a"), ModuleState::Started);
    assert!(state_of(&runtime, "b").is_failed());
    assert_eq!(log.starts(), ["a", "b"]);
}

#[tokio::test]
async fn k_of_n_failures_are_reported_together() {
    let root = PluginRoot::new();
    let log = CallLog::new();
    let mut mocks = Vec::new();
    for (name, outcome) in [
        ("m1", Outcome::Succeed),
        ("m2", Outcome::fail("bad config")),
        ("m3", Outcome::Succeed),
        ("m4", Outcome::panic("index out of bounds")),
        ("m5", Outcome::Succeed),
    ] {
        let _ = root.add(&ModuleFixture::new(name));
        mocks.push(MockModule::new(name, &log).on_start(outcome));
    }
    let mut runtime = test_runtime(root.path(), mock_loader(mocks));
    runtime.discover().unwrap();

    let Err(PluginError::Bulk(failure)) = runtime.start_all().await else {
        panic!("expected a bulk failure");
    };

    assert_eq!(failure.attempted, 5);
    assert!(failure.contains("m2"));
    assert!(failure.contains("m4"));
    assert_eq!(failure.failures.len(), 2);
    assert_eq!(
        failure.failures[1].cause,
        "panicked: index out of bounds"
    );

    let started: Vec<_> = runtime
        .list_modules()
        .into_iter()
        .filter(|m| m.state == ModuleState::Started)
        .map(|m| m.metadata.name.to_string())
        .collect();
    assert_eq!(started, ["m1", "m3", "m5"]);
    assert_eq!(log.starts().len(), 5);
}

#[tokio::test]
async fn stop_all_is_best_effort_in_reverse_activation_order() {
    let root = PluginRoot::new();
    let log = CallLog::new();
    for name in ["alpha", "beta", "gamma"] {
        let _ = root.add(&ModuleFixture::new(name));
    }
    let loader = mock_loader([
        MockModule::new("alpha", &log),
        MockModule::new("beta", &log).on_stop(Outcome::fail("flush failed")),
        MockModule::new("gamma", &log),
    ]);
    let mut runtime = test_runtime(root.path(), loader);
    runtime.discover().unwrap();
    runtime.start_all().await.unwrap();
    assert!(runtime.is_active());

    let failure = runtime.stop_all().await.unwrap_err();

    assert_eq!(failure.operation, BulkOperation::StopAll);
    assert_eq!(failure.attempted, 3);
    assert_eq!(failure.failures.len(), 1);
    assert!(failure.contains("beta"));
    assert_eq!(log.stops(), ["gamma", "beta", "alpha"]);
    assert_eq!(state_of(&runtime, "alpha"), ModuleState::Stopped);
    assert!(state_of(&runtime, "beta").is_failed());
    assert_eq!(state_of(&runtime, "gamma"), ModuleState::Stopped);
    assert!(!runtime.is_active());
}

#[tokio::test]
async fn disabled_modules_neither_start_nor_contribute_bindings() {
    let root = PluginRoot::new();
    let log = CallLog::new();
    let _ = root.add(&ModuleFixture::new("alpha"));
    let _ = root.add(&ModuleFixture::new("beta"));
    let loader = mock_loader([
        MockModule::new("alpha", &log),
        MockModule::new("beta", &log).with_binding(Telemetry("beta")),
    ]);
    let mut runtime = test_runtime_with_disabled(root.path(), loader, ["beta"]);

    let report = runtime.startup(Vec::new()).await.unwrap();

    assert_eq!(report.discovery.disabled.len(), 1);
    assert!(report.activation.is_ok());
    assert_eq!(log.starts(), ["alpha"]);
    assert_eq!(state_of(&runtime, "beta"), ModuleState::Disabled);
    assert!(!runtime.graph().unwrap().contains::<Telemetry>());
}

#[tokio::test]
async fn composed_graph_is_shared_with_every_started_module() {
    let root = PluginRoot::new();
    let log = CallLog::new();
    let _ = root.add(&ModuleFixture::new("alpha"));
    let _ = root.add(&ModuleFixture::new("beta"));
    let loader = mock_loader([
        MockModule::new("alpha", &log).with_binding(Telemetry("alpha")),
        MockModule::new("beta", &log),
    ]);
    let mut runtime = test_runtime(root.path(), loader);

    let host: Vec<Box<dyn DependencyModule>> =
        vec![Box::new(BindValue::new("host-core", Greeting("hi".into())))];
    let report = runtime.startup(host).await.unwrap();
    assert!(report.activation.is_ok());

    let graph = Arc::clone(runtime.graph().unwrap());
    assert_eq!(graph.origin_of::<Greeting>(), Some("host/host-core"));
    assert_eq!(graph.origin_of::<Telemetry>(), Some("alpha/alpha-bindings"));

    let contexts = log.contexts();
    assert_eq!(contexts.len(), 2);
    for ctx in &contexts {
        assert!(Arc::ptr_eq(&ctx.services, &graph));
        assert_eq!(ctx.services.get::<Telemetry>().unwrap().0, "alpha");
        assert!(ctx.config_dir.is_dir());
    }
}

#[tokio::test]
async fn graph_composition_failure_is_fatal() {
    let root = PluginRoot::new();
    let log = CallLog::new();
    let _ = root.add(&ModuleFixture::new("alpha"));
    let _ = root.add(&ModuleFixture::new("beta"));
    let loader = mock_loader([
        MockModule::new("alpha", &log).with_binding(Telemetry("alpha")),
        MockModule::new("beta", &log).with_binding(Telemetry("beta")),
    ]);
    let mut runtime = test_runtime(root.path(), loader);

    let err = runtime.startup(Vec::new()).await.unwrap_err();

    assert!(matches!(
        err,
        PluginError::GraphComposition(GraphError::DuplicateBinding { .. })
    ));
    assert!(log.starts().is_empty());
    assert!(runtime.graph().is_none());
    assert!(!runtime.is_active());
}

#[tokio::test]
async fn failing_contributor_aborts_startup() {
    let root = PluginRoot::new();
    let log = CallLog::new();
    let _ = root.add(&ModuleFixture::new("alpha"));
    let loader = mock_loader([MockModule::new("alpha", &log).with_failing_binding("no keys")]);
    let mut runtime = test_runtime(root.path(), loader);
    runtime.discover().unwrap();

    let err = runtime.start_all().await.unwrap_err();
    assert!(matches!(
        err,
        PluginError::GraphComposition(GraphError::Configure { .. })
    ));
    assert_eq!(state_of(&runtime, "alpha"), ModuleState::Loaded);
}

#[test]
fn unreadable_root_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("plugins");
    std::fs::write(&root, b"not a directory").unwrap();
    let mut runtime = test_runtime(&root, mock_loader(Vec::<MockModule>::new()));

    assert!(matches!(runtime.discover(), Err(PluginError::Io(_))));
}
