//! Plugin lifecycle and isolation manager for the noxa desktop shell.
//!
//! The lifecycle core is plain Rust and talks to the windowing layer through
//! [`ViewBackend`] and [`ScriptHost`]. The `desktop` feature adds the Tauri
//! implementations, the command surface and [`run`].

pub mod config;
pub mod error;
pub mod extension;
pub(crate) mod fs_tree;
pub mod host;
pub mod http;
pub mod installer;
pub mod logging;
pub mod manifest;
pub mod manifest_store;
pub mod package;
pub mod permissions;
pub mod protocol;
pub mod runtime;
pub mod state;
pub mod store;

#[cfg(feature = "desktop")]
mod commands;
#[cfg(feature = "desktop")]
pub mod desktop;

#[cfg(test)]
mod testing;

pub use error::PluginError;
pub use extension::{ExtensionLoader, ScriptHost, UiReadiness};
pub use host::{PluginHost, PluginObserver, PluginOrder};
pub use manifest::{PluginKind, PluginManifest};
pub use manifest_store::ManifestStore;
pub use runtime::{Bounds, ContentLayout, RuntimeRegistry, ViewBackend, ViewSpec};

#[cfg(feature = "desktop")]
pub use desktop::run;
