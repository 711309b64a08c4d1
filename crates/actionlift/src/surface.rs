//! Reserved names and the client capability surface.
//!
//! The capability surface is the fixed allow-list of attributes on the
//! client object that denote remote-API sub-layers. A call reached through
//! one of these attributes runs against the backend and must therefore be
//! awaited in the rewritten program.

/// Python class name of the SDK client.
pub const CLIENT_CLASS: &str = "Client";

/// The one variable name allowed to hold the client instance.
pub const CLIENT_VARIABLE: &str = "shimoku_client";

/// Name of the user-defined entry function.
pub const ACTION_FUNCTION: &str = "action";

/// Top-level SDK package the client class is imported from.
pub const SDK_PACKAGE: &str = "shimoku";

/// Concurrency module reserved for the harness.
pub const ASYNC_MODULE: &str = "asyncio";

/// A client attribute whose method calls reach the backend.
///
/// The string form of each variant is the attribute name as it appears in
/// action code (`shimoku_client.menu_paths`, `shimoku_client.plt`, ...).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "snake_case")]
pub enum ClientCapability {
    Universes,
    Workspaces,
    Boards,
    MenuPaths,
    Components,
    Data,
    Io,
    Activities,
    /// The plotting layer.
    Plt,
    SetWorkspace,
    SetBoard,
    SetMenuPath,
    /// The run/execute entry point.
    Run,
}

impl ClientCapability {
    /// Looks up a client attribute name in the allow-list.
    #[must_use]
    pub fn from_attr(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    /// Returns `true` if the attribute name is part of the capability surface.
    #[must_use]
    pub fn is_capability(name: &str) -> bool {
        Self::from_attr(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_names_round_trip() {
        assert_eq!(ClientCapability::from_attr("plt"), Some(ClientCapability::Plt));
        assert_eq!(ClientCapability::from_attr("menu_paths"), Some(ClientCapability::MenuPaths));
        assert_eq!(ClientCapability::from_attr("set_workspace"), Some(ClientCapability::SetWorkspace));
        assert_eq!(ClientCapability::Plt.to_string(), "plt");
        assert_eq!(ClientCapability::MenuPaths.to_string(), "menu_paths");
    }

    #[test]
    fn unknown_attributes_are_not_capabilities() {
        assert!(!ClientCapability::is_capability("pop"));
        assert!(!ClientCapability::is_capability("set_config"));
        assert!(ClientCapability::is_capability("activities"));
    }
}
