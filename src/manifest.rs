//! Plugin manifest model.
//!
//! A manifest lives at `{plugins_dir}/{id}/manifest.json`. Fields this crate
//! does not know about are carried in `extra` so read-modify-write cycles never
//! drop author-supplied data.

use crate::error::PluginError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::path::{Component, Path};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Sidebar position used when a manifest does not declare one.
pub const DEFAULT_ORDER: i64 = 999;

/// How a plugin is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// Remote URL rendered in an isolated view.
    Web,
    /// Local entry file rendered in an isolated view.
    #[default]
    App,
    /// Script injected into the host UI; never gets a view.
    Extension,
}

impl PluginKind {
    pub fn parse(raw: &str) -> Result<Self, PluginError> {
        match raw {
            "web" => Ok(Self::Web),
            "app" => Ok(Self::App),
            "extension" => Ok(Self::Extension),
            other => Err(PluginError::InvalidPackage(format!(
                "unknown plugin type \"{other}\""
            ))),
        }
    }

    pub fn has_view(self) -> bool {
        !matches!(self, Self::Extension)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: PluginKind,
    #[serde(default, deserialize_with = "null_as_default")]
    pub entry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default = "default_version", deserialize_with = "version_or_default")]
    pub version: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default = "default_order", deserialize_with = "order_or_default")]
    pub order: i64,
    #[serde(default = "default_enabled", deserialize_with = "enabled_or_default")]
    pub enabled: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub permissions: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub granted_permissions: Vec<String>,
    /// Extension only: global function the host calls on unload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<String>,
    /// Extension only: DOM id fragments the extension creates.
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_default")]
    pub markers: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_order() -> i64 {
    DEFAULT_ORDER
}

fn default_enabled() -> bool {
    true
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

fn version_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_else(default_version))
}

/// Any JSON number is accepted and truncated; anything else is the default.
fn order_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let order = match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        _ => None,
    };
    Ok(order.unwrap_or(DEFAULT_ORDER))
}

fn enabled_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(d)?.unwrap_or(true))
}

impl PluginManifest {
    /// Parse a manifest document, rejecting unknown `type` values.
    pub fn from_value(value: Value) -> Result<Self, PluginError> {
        if let Some(kind) = value.get("type").and_then(Value::as_str) {
            PluginKind::parse(kind)?;
        }
        serde_json::from_value(value).map_err(|e| {
            PluginError::InvalidPackage(format!("invalid manifest: {e}"))
        })
    }

    pub fn from_json(text: &str) -> Result<Self, PluginError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Parse and require the fields an installable package must carry.
    pub fn from_package_json(text: &str) -> Result<Self, PluginError> {
        let manifest = Self::from_json(text)?;
        manifest.validate_for_install()?;
        Ok(manifest)
    }

    pub fn validate_for_install(&self) -> Result<(), PluginError> {
        if self.id.trim().is_empty() || self.name.trim().is_empty() {
            return Err(PluginError::InvalidPackage(
                "Invalid manifest: missing id or name".into(),
            ));
        }
        validate_plugin_id(&self.id)
    }

    pub fn to_pretty_json(&self) -> Result<String, PluginError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PluginError::Io(format!("Failed to serialize manifest: {e}")))
    }

    /// True when the user approved `name` for this plugin.
    pub fn is_granted(&self, name: &str) -> bool {
        self.granted_permissions.iter().any(|p| p == name)
    }

    pub fn wants_view(&self) -> bool {
        self.enabled && self.kind.has_view()
    }
}

// ---------------------------------------------------------------------------
// Path safety
// ---------------------------------------------------------------------------

/// Returns true if a relative path attempts to escape its root via `..`,
/// absolute components, or drive prefixes.
pub fn is_path_escape(relative: &str) -> bool {
    let path = Path::new(relative);
    if path.is_absolute() {
        return true;
    }
    path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Plugin ids double as directory names.
pub fn validate_plugin_id(id: &str) -> Result<(), PluginError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && !is_path_escape(id)
        && !id.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(PluginError::InvalidPackage(format!(
            "plugin id \"{id}\" is not a valid directory name"
        )))
    }
}
