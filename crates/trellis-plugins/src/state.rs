//! Module lifecycle states.

use std::fmt;

use serde::Serialize;

/// The lifecycle state of a module.
///
/// Legal transitions:
///
/// - `Discovered` → `Loaded` | `Disabled` | `Failed`
/// - `Loaded` → `Started` | `Disabled` | `Failed`
/// - `Started` → `Stopped` | `Failed`
/// - `Stopped` → `Started` | `Disabled` | `Failed`
/// - `Disabled` → `Loaded`
///
/// Nothing leaves `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "cause", rename_all = "lowercase")]
pub enum ModuleState {
    /// Found on disk and validated, not yet ready to start.
    Discovered,
    /// Ready to be activated by the next `start_all`.
    Loaded,
    /// Activated.
    Started,
    /// Deactivated after having been started.
    Stopped,
    /// Listed in the persisted disabled set; never activated.
    Disabled,
    /// Loading, activation or deactivation failed. Terminal.
    Failed(String),
}

impl ModuleState {
    /// Whether the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        use ModuleState::{Disabled, Discovered, Failed, Loaded, Started, Stopped};

        matches!(
            (self, next),
            (Discovered, Loaded | Disabled | Failed(_))
                | (Loaded, Started | Disabled | Failed(_))
                | (Started, Stopped | Failed(_))
                | (Stopped, Started | Disabled | Failed(_))
                | (Disabled, Loaded)
        )
    }

    /// Whether this is the terminal failure state.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The failure cause, if failed.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        match self {
            Self::Failed(cause) => Some(cause),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovered => f.write_str("discovered"),
            Self::Loaded => f.write_str("loaded"),
            Self::Started => f.write_str("started"),
            Self::Stopped => f.write_str("stopped"),
            Self::Disabled => f.write_str("disabled"),
            Self::Failed(_) => f.write_str("failed"),
        }
    }
}
