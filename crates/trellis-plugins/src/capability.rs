//! Capability points and extension resolution.
//!
//! A module's entry type lists the capability types it ships through
//! [`Module::capabilities`](crate::Module::capabilities). The host only cares
//! about types that implement one of its closed set of [`CapabilityPoint`]s.
//! [`resolve`] turns a declared list into a map from point to the concrete
//! types supplied for it.

use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::graph::{GraphResult, ServiceGraph};

/// A host-defined interface modules may implement.
///
/// The set is closed and known in advance; modules never add points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityPoint {
    /// A user-facing tool.
    Tool,
    /// A completion provider for editors and prompts.
    CompletionProvider,
}

impl CapabilityPoint {
    /// Every recognized point.
    pub const ALL: [Self; 2] = [Self::Tool, Self::CompletionProvider];

    /// Stable interface identifier that capability types list in
    /// [`CapabilityType::interfaces`].
    #[must_use]
    pub fn interface(self) -> &'static str {
        match self {
            Self::Tool => "trellis.tool",
            Self::CompletionProvider => "trellis.completion-provider",
        }
    }

    /// Map an interface identifier back to its point.
    #[must_use]
    pub fn from_interface(interface: &str) -> Option<Self> {
        match interface {
            "trellis.tool" => Some(Self::Tool),
            "trellis.completion-provider" => Some(Self::CompletionProvider),
            _ => None,
        }
    }
}

impl fmt::Display for CapabilityPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.interface())
    }
}

/// Whether a declared type can be instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    /// Instantiable implementation.
    Concrete,
    /// Partial implementation meant to be extended.
    Abstract,
    /// Pure interface.
    Interface,
}

/// Creates an instance of a capability type from the composed service graph.
pub type CapabilityFactory = fn(&ServiceGraph) -> GraphResult<Arc<dyn Any + Send + Sync>>;

/// A type declared by a module: a reference, not a running instance.
///
/// Equality, ordering and hashing use `(name, kind, interfaces)`; the
/// factory is not part of a type's identity.
#[derive(Clone, Copy, Serialize)]
pub struct CapabilityType {
    /// Fully qualified type name, unique within a module.
    pub name: &'static str,
    /// Concrete, abstract or interface.
    pub kind: TypeKind,
    /// Interface identifiers the type is assignable to.
    pub interfaces: &'static [&'static str],
    #[serde(skip)]
    factory: Option<CapabilityFactory>,
}

impl CapabilityType {
    /// Declare a concrete type implementing `interfaces`.
    #[must_use]
    pub const fn concrete(name: &'static str, interfaces: &'static [&'static str]) -> Self {
        Self {
            name,
            kind: TypeKind::Concrete,
            interfaces,
            factory: None,
        }
    }

    /// Declare an abstract type. Never resolved.
    #[must_use]
    pub const fn abstract_type(name: &'static str, interfaces: &'static [&'static str]) -> Self {
        Self {
            name,
            kind: TypeKind::Abstract,
            interfaces,
            factory: None,
        }
    }

    /// Declare an interface type. Never resolved.
    #[must_use]
    pub const fn interface(name: &'static str, interfaces: &'static [&'static str]) -> Self {
        Self {
            name,
            kind: TypeKind::Interface,
            interfaces,
            factory: None,
        }
    }

    /// Attach a factory used by
    /// [`RuntimeManager::instantiate_capabilities`](crate::RuntimeManager::instantiate_capabilities).
    #[must_use]
    pub const fn with_factory(mut self, factory: CapabilityFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// The factory, if one was attached.
    #[must_use]
    pub fn factory(&self) -> Option<CapabilityFactory> {
        self.factory
    }

    /// Whether the type can be instantiated.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        self.kind == TypeKind::Concrete
    }

    /// Whether the type is assignable to `point`.
    #[must_use]
    pub fn implements(&self, point: CapabilityPoint) -> bool {
        self.interfaces
            .iter()
            .any(|i| CapabilityPoint::from_interface(i) == Some(point))
    }

    fn key(&self) -> (&'static str, TypeKind, &'static [&'static str]) {
        (self.name, self.kind, self.interfaces)
    }
}

impl fmt::Debug for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityType")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("interfaces", &self.interfaces)
            .field("factory", &self.factory.is_some())
            .finish()
    }
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl PartialEq for CapabilityType {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for CapabilityType {}

impl PartialOrd for CapabilityType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CapabilityType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for CapabilityType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Concrete capability types per recognized point.
pub type ExtensionMap = BTreeMap<CapabilityPoint, BTreeSet<CapabilityType>>;

/// Resolve a declared manifest against every recognized point.
#[must_use]
pub fn resolve(manifest: &[CapabilityType]) -> ExtensionMap {
    resolve_with(manifest, &CapabilityPoint::ALL)
}

/// Resolve a declared manifest against an explicit set of points.
///
/// Abstract and interface types, and types matching none of `recognized`,
/// are dropped. A type matching several points is listed under each. Points
/// with no match have no entry.
#[must_use]
pub fn resolve_with(manifest: &[CapabilityType], recognized: &[CapabilityPoint]) -> ExtensionMap {
    let mut map = ExtensionMap::new();

    for candidate in manifest {
        if !candidate.is_concrete() {
            warn!(
                capability = candidate.name,
                kind = ?candidate.kind,
                "Dropping non-concrete capability type"
            );
            continue;
        }

        let mut matched = false;
        for &point in recognized {
            if candidate.implements(point) {
                map.entry(point).or_default().insert(*candidate);
                matched = true;
            }
        }

        if matched {
            debug!(capability = candidate.name, "Resolved capability type");
        } else {
            warn!(
                capability = candidate.name,
                interfaces = ?candidate.interfaces,
                "Dropping capability type that implements no recognized point"
            );
        }
    }

    map
}
