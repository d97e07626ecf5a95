//! Integration tests for discovery edge cases: compatibility, structure,
//! artifacts and the persisted disabled set.

use std::sync::Arc;

use semver::Version;
use trellis_plugins::{
    ArtifactSpec, LocalArtifactRepository, ModuleLoader, ModuleState, PluginError, RuntimeManager,
    RuntimeOptions, artifact,
};
use trellis_test::{
    CallLog, MockModule, ModuleFixture, PluginRoot, mock_loader, test_runtime,
};

#[tokio::test]
async fn incompatible_module_never_loads() {
    let root = PluginRoot::new();
    let log = CallLog::new();
    let _ = root.add(&ModuleFixture::new("future").host_version(Some("2.0.0")));
    let _ = root.add(&ModuleFixture::new("current").host_version(Some("1.0.0-beta.1")));
    let loader = mock_loader([
        MockModule::new("future", &log),
        MockModule::new("current", &log),
    ]);
    let mut runtime = test_runtime(root.path(), loader);

    let report = runtime.discover().unwrap();
    runtime.start_all().await.unwrap();

    assert_eq!(report.loaded.len(), 1);
    assert!(matches!(
        report.rejected[0].error,
        PluginError::Incompatible { .. }
    ));
    assert!(runtime.get_module("future").is_none());
    assert_eq!(log.starts(), ["current"]);
}

#[test]
fn build_metadata_does_not_affect_compatibility() {
    let root = PluginRoot::new();
    let _ = root.add(&ModuleFixture::new("tagged").host_version(Some("1.0.0+build.7")));
    let mut runtime = test_runtime(
        root.path(),
        mock_loader([MockModule::new("tagged", &CallLog::new())]),
    );

    let report = runtime.discover().unwrap();

    assert!(report.rejected.is_empty());
    assert_eq!(runtime.get_module("tagged").unwrap().state, ModuleState::Loaded);
}

#[test]
fn panicking_manifest_rejects_only_that_module() {
    let root = PluginRoot::new();
    let log = CallLog::new();
    let _ = root.add(&ModuleFixture::new("broken"));
    let _ = root.add(&ModuleFixture::new("steady"));
    let loader = mock_loader([
        MockModule::new("broken", &log).panicking_manifest("manifest exploded"),
        MockModule::new("steady", &log),
    ]);
    let mut runtime = test_runtime(root.path(), loader);

    let report = runtime.discover().unwrap();

    assert_eq!(report.loaded.len(), 1);
    assert_eq!(report.loaded[0].as_str(), "steady");
    assert!(matches!(
        report.rejected[0].error,
        PluginError::LoadFailed { ref message, .. } if message.contains("manifest exploded")
    ));
    assert!(runtime.get_module("broken").is_none());
}

#[test]
fn missing_host_version_is_a_validation_error() {
    let root = PluginRoot::new();
    let _ = root.add(&ModuleFixture::new("loose").host_version(None));
    let mut runtime = test_runtime(
        root.path(),
        mock_loader([MockModule::new("loose", &CallLog::new())]),
    );

    let report = runtime.discover().unwrap();
    assert!(report.loaded.is_empty());
    assert!(matches!(
        report.rejected[0].error,
        PluginError::Validation { .. }
    ));
}

#[test]
fn two_entry_points_reject_only_that_directory() {
    let root = PluginRoot::new();
    let log = CallLog::new();
    let _ = root.add(&ModuleFixture::new("split").extra_entry("split-extra"));
    let _ = root.add(&ModuleFixture::new("sound"));
    let loader = mock_loader([
        MockModule::new("split", &log),
        MockModule::new("sound", &log),
    ]);
    let mut runtime = test_runtime(root.path(), loader);

    let report = runtime.discover().unwrap();

    assert!(runtime.get_module("split").is_none());
    assert_eq!(runtime.get_module("sound").unwrap().state, ModuleState::Loaded);
    assert!(matches!(
        report.rejected[0].error,
        PluginError::DiscoveryStructure { .. }
    ));
}

#[test]
fn structural_problems_are_isolated_per_directory() {
    let root = PluginRoot::new();
    let log = CallLog::new();
    let _ = root.add(&ModuleFixture::new("no-entry").without_entry());
    let _ = root.add(&ModuleFixture::new("no-metadata").without_metadata());
    let _ = root.add(&ModuleFixture::new("hidden").dir_name(".hidden"));
    std::fs::write(root.path().join("README.md"), b"notes").unwrap();
    let _ = root.add(&ModuleFixture::new("valid"));
    let mut runtime = test_runtime(root.path(), mock_loader([MockModule::new("valid", &log)]));

    let report = runtime.discover().unwrap();

    assert_eq!(report.loaded.len(), 1);
    assert_eq!(report.rejected.len(), 2);
    assert!(!report.empty_root);
    assert!(runtime.get_module("hidden").is_none());
}

#[test]
fn name_collision_during_discovery_keeps_first_directory() {
    let root = PluginRoot::new();
    let log = CallLog::new();
    let _ = root.add(&ModuleFixture::new("shared").dir_name("a-shared"));
    let _ = root.add(&ModuleFixture::new("shared").dir_name("b-shared").version("2.0.0"));
    let mut runtime = test_runtime(root.path(), mock_loader([MockModule::new("shared", &log)]));

    let report = runtime.discover().unwrap();

    assert_eq!(report.loaded.len(), 1);
    assert!(matches!(
        report.rejected[0].error,
        PluginError::AlreadyInstalled(_)
    ));
    assert_eq!(
        runtime.get_module("shared").unwrap().metadata.version,
        Version::new(1, 0, 0)
    );
}

#[tokio::test]
async fn artifact_failure_marks_module_failed() {
    let root = PluginRoot::new();
    let store = tempfile::tempdir().unwrap();
    std::fs::write(store.path().join("libcodec.so"), b"codec").unwrap();
    let log = CallLog::new();
    let _ = root.add(&ModuleFixture::new("codec"));
    let _ = root.add(&ModuleFixture::new("pinned"));

    let good = LocalArtifactRepository::new(
        store.path(),
        vec![ArtifactSpec::new("libcodec.so").with_digest(artifact::digest(b"codec"))],
    );
    let bad = LocalArtifactRepository::new(
        store.path(),
        vec![ArtifactSpec::new("libcodec.so").with_digest(artifact::digest(b"other"))],
    );
    let loader = mock_loader([
        MockModule::new("codec", &log).with_artifacts(good),
        MockModule::new("pinned", &log).with_artifacts(bad),
    ]);
    let mut runtime = test_runtime(root.path(), loader);

    let report = runtime.discover().unwrap();
    runtime.start_all().await.unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].name.as_str(), "pinned");
    assert!(runtime.get_module("pinned").unwrap().state.is_failed());

    let codec = runtime.container("codec").unwrap();
    assert_eq!(codec.state(), &ModuleState::Started);
    assert_eq!(
        codec.boundary().artifacts,
        vec![root.path().join("codec").join("lib").join("libcodec.so")]
    );
    assert!(codec.boundary().contains(&codec.boundary().artifacts[0]));
    assert_eq!(log.starts(), ["codec"]);
}

#[tokio::test]
async fn disabled_set_survives_restart() {
    let root = PluginRoot::new();
    let log = CallLog::new();
    let _ = root.add(&ModuleFixture::new("alpha"));
    let loader: Arc<dyn ModuleLoader> = mock_loader([MockModule::new("alpha", &log)]);
    let options = RuntimeOptions::new(root.path(), Version::new(1, 0, 0));

    let mut first = RuntimeManager::new(options.clone(), Arc::clone(&loader));
    first.discover().unwrap();
    first.disable("alpha").await.unwrap();
    assert!(options.disabled_file().is_file());
    drop(first);

    let mut second = RuntimeManager::new(options, loader);
    let report = second.discover().unwrap();
    assert_eq!(report.disabled.len(), 1);
    assert_eq!(second.get_module("alpha").unwrap().state, ModuleState::Disabled);
}

#[test]
fn empty_root_is_reported() {
    let root = PluginRoot::new();
    let mut runtime = test_runtime(root.path(), mock_loader(Vec::<MockModule>::new()));

    let report = runtime.discover().unwrap();
    assert!(report.empty_root);
    assert_eq!(report.registered(), 0);
    assert!(runtime.list_modules().is_empty());
}
