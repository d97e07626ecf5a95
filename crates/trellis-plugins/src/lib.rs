//! Plugin runtime for trellis hosts.
//!
//! Discovers modules under a plugin root, loads each behind its own
//! boundary, resolves what it contributes, and drives its lifecycle:
//!
//! - [`Metadata`]: Validated `plugin.toml` (name, version, minimum host version)
//! - [`Module`]: Trait every module entry type implements (start/stop, capabilities, bindings)
//! - [`ModuleLoader`] / [`FactoryLoader`]: Turn a discovered entry point into a module
//! - [`CapabilityPoint`] / [`CapabilityType`]: The host's extension points and what modules supply for them
//! - [`GraphComposer`] / [`ServiceGraph`]: One process-wide dependency graph, composed before any module starts
//! - [`ModuleContainer`]: A module plus its state, capabilities and boundary
//! - [`RuntimeManager`]: Discovery, bulk start/stop, install, uninstall, enable and disable
//!
//! # Layout on disk
//!
//! ```text
//! <root>/
//!   .disabled.toml        persisted disabled set
//!   .cleanup.toml         deferred removals
//!   hello-tools/
//!     plugin.toml         metadata
//!     hello.plugin        the single entry point
//!     lib/                resolved artifacts
//!     config/             module-private settings
//! ```
//!
//! # Failure isolation
//!
//! A broken module never takes the host down. Bad metadata, an incompatible
//! host version, a structural problem or a panic while the module describes
//! itself rejects that directory only; a failing or panicking `start`/`stop`
//! marks that module `Failed`. Only plugin-root I/O errors and dependency
//! graph composition errors (a panicking contributor included) are fatal.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod archive;
pub mod artifact;
pub mod capability;
pub mod cleanup;
#[cfg(feature = "config")]
pub mod config_bridge;
pub mod container;
pub mod discovery;
pub mod error;
pub mod events;
pub mod graph;
pub mod install;
pub mod loader;
pub mod manager;
pub mod metadata;
pub mod module;
mod persist;
pub mod preferences;
pub mod state;

pub use artifact::{ArtifactError, ArtifactRepository, ArtifactSpec, LocalArtifactRepository};
pub use capability::{
    CapabilityFactory, CapabilityPoint, CapabilityType, ExtensionMap, TypeKind, resolve,
    resolve_with,
};
pub use cleanup::{CleanupKind, CleanupQueue, CleanupTask};
pub use container::{ModuleContainer, ModuleInfo};
pub use discovery::{Candidate, RejectedCandidate, ScanOutcome, scan_root};
pub use error::{
    BulkFailure, BulkOperation, LifecycleStage, ModuleFailure, PluginError, PluginResult,
};
pub use events::{ListenerId, ListenerRegistry, ModuleEvent, ModuleEventListener};
pub use graph::{
    Binder, DependencyModule, GraphComposer, GraphError, GraphResult, Resolver, ServiceGraph,
};
pub use loader::{FactoryLoader, LoadBoundary, ModuleFactory, ModuleLoader};
pub use manager::{
    CapabilityInstance, DiscoveryReport, RuntimeManager, RuntimeOptions, StartupReport,
};
pub use metadata::{Metadata, ModuleName, check_compatibility};
pub use module::{Module, ModuleContext};
pub use preferences::{DisabledStore, FileDisabledStore, MemoryDisabledStore};
pub use state::ModuleState;
