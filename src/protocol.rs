//! `plugin://` asset protocol: serves files out of installed plugin folders
//! to the `app` views that load them.

use crate::manifest::{is_path_escape, validate_plugin_id};
use std::path::{Path, PathBuf};

pub const SCHEME: &str = "plugin";

/// URL an `app` view loads for `entry` of plugin `id`.
///
/// Custom schemes are exposed as `http://{scheme}.localhost` on Windows and
/// Android and as `{scheme}://localhost` elsewhere.
pub fn entry_url(id: &str, entry: &str) -> String {
    let entry = entry.trim_start_matches('/');
    if cfg!(any(windows, target_os = "android")) {
        format!("http://{SCHEME}.localhost/{id}/{entry}")
    } else {
        format!("{SCHEME}://localhost/{id}/{entry}")
    }
}

/// Resolve a `/{id}/{file}` request path to a file within `root`. Returns
/// `None` if the path is malformed or escapes the plugin directory.
pub fn resolve_plugin_path(root: &Path, uri_path: &str) -> Option<PathBuf> {
    let trimmed = uri_path.strip_prefix('/').unwrap_or(uri_path);
    let (plugin_id, file) = trimmed.split_once('/')?;
    if file.is_empty() || validate_plugin_id(plugin_id).is_err() || is_path_escape(file) {
        return None;
    }
    Some(root.join(plugin_id).join(file))
}

/// What the protocol handler sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetResponse {
    pub status: u16,
    pub mime: String,
    pub body: Vec<u8>,
}

impl AssetResponse {
    fn text(status: u16, message: &str) -> Self {
        Self {
            status,
            mime: "text/plain".to_string(),
            body: message.as_bytes().to_vec(),
        }
    }
}

/// Serve `uri_path` from `root`: 400 for a bad path, 404 for a missing file.
pub fn serve(root: &Path, uri_path: &str) -> AssetResponse {
    let Some(file_path) = resolve_plugin_path(root, uri_path) else {
        return AssetResponse::text(400, "Invalid plugin path");
    };
    match std::fs::read(&file_path) {
        Ok(body) => AssetResponse {
            status: 200,
            mime: mime_guess::from_path(&file_path)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            body,
        },
        Err(e) => {
            tracing::debug!(path = %file_path.display(), "Plugin asset not served: {e}");
            AssetResponse::text(404, "Plugin file not found")
        }
    }
}
