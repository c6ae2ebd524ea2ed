//! Remote plugin store client: fetch the catalog and derive per-plugin URLs.
//!
//! The store is optional and best-effort. Any failure to reach it, or a
//! response of the wrong shape, yields an empty catalog; only the logs tell
//! "store unreachable" apart from "store has nothing".

use crate::http::Fetcher;
use crate::manifest::PluginKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Path of the catalog under the store origin.
const CATALOG_PATH: &str = "/api/plugins";

/// One installable plugin as offered by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCatalogEntry {
    pub id: String,
    pub name: String,
    /// Icon filename, kept for local use after install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(rename = "type")]
    pub kind: PluginKind,
    pub entry: String,
    pub version: String,
    pub description: String,
    pub folder_name: String,
    pub manifest_url: String,
    pub content_url: String,
    pub folder_contents_url: String,
}

/// Raw entry of `GET /api/plugins`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStorePlugin {
    id: String,
    name: String,
    #[serde(default)]
    icon: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    entry: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    folder_name: Option<String>,
}

/// One file of `GET /api/plugins/{id}/folder`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFile {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FolderListing {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub files: Vec<FolderFile>,
}

/// Trim whitespace and a trailing slash from a configured origin.
pub fn normalize_origin(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

/// `{origin}/api/plugins/{id}`
pub fn plugin_base_url(origin: &str, id: &str) -> String {
    format!("{origin}{CATALOG_PATH}/{id}")
}

/// Convention URL of a single plugin file on the store.
pub fn plugin_file_url(origin: &str, id: &str, file: &str) -> String {
    format!("{}/files/{file}", plugin_base_url(origin, id))
}

fn to_catalog_entry(origin: &str, raw: RawStorePlugin) -> Option<StoreCatalogEntry> {
    let kind = match raw.kind.as_deref() {
        None => PluginKind::App,
        Some(k) => match PluginKind::parse(k) {
            Ok(kind) => kind,
            Err(e) => {
                warn!(plugin_id = %raw.id, "Skipping store plugin: {e}");
                return None;
            }
        },
    };
    let base = plugin_base_url(origin, &raw.id);
    let folder_contents_url = format!("{base}/folder");
    Some(StoreCatalogEntry {
        icon_url: raw.icon.as_ref().map(|icon| format!("{base}/files/{icon}")),
        manifest_url: format!("{base}/manifest"),
        content_url: folder_contents_url.clone(),
        folder_contents_url,
        folder_name: raw.folder_name.unwrap_or_else(|| raw.id.clone()),
        version: raw.version.unwrap_or_else(|| "1.0.0".to_string()),
        description: raw.description.unwrap_or_default(),
        icon: raw.icon,
        kind,
        entry: raw.entry,
        name: raw.name,
        id: raw.id,
    })
}

/// Parse a catalog response body; anything unexpected becomes an empty list.
fn parse_catalog(origin: &str, body: Value) -> Vec<StoreCatalogEntry> {
    if body.get("success").and_then(Value::as_bool) != Some(true) {
        warn!(error = ?body.get("error"), "Store returned an error response");
        return Vec::new();
    }
    let Some(plugins) = body.get("plugins").and_then(Value::as_array) else {
        warn!("Store returned no plugins array");
        return Vec::new();
    };
    plugins
        .iter()
        .filter_map(|raw| match serde_json::from_value::<RawStorePlugin>(raw.clone()) {
            Ok(raw) => to_catalog_entry(origin, raw),
            Err(e) => {
                warn!("Skipping malformed store entry: {e}");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct StoreClient {
    fetcher: Fetcher,
}

impl StoreClient {
    pub fn new(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Fetch the catalog from `server_origin`. Never fails: an unreachable or
    /// misbehaving store yields an empty catalog.
    pub async fn fetch_catalog(&self, server_origin: &str) -> Vec<StoreCatalogEntry> {
        let origin = normalize_origin(server_origin);
        let url = format!("{origin}{CATALOG_PATH}");
        info!(%url, "Fetching plugins from store");

        match self.fetcher.get_json(&url).await {
            Ok(body) => {
                let plugins = parse_catalog(&origin, body);
                info!(count = plugins.len(), "Fetched store catalog");
                plugins
            }
            Err(e) => {
                warn!(%url, "Could not fetch from store: {e}");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client() -> StoreClient {
        StoreClient::new(Fetcher::new(Duration::from_secs(5), 5).unwrap())
    }

    #[test]
    fn normalize_strips_whitespace_and_slash() {
        assert_eq!(normalize_origin("  https://store.test/ "), "https://store.test");
        assert_eq!(normalize_origin("http://127.0.0.1:3000"), "http://127.0.0.1:3000");
        assert_eq!(normalize_origin(" https://my store.test/ "), "https://my store.test");
    }

    #[test]
    fn catalog_entry_urls_are_derived_from_origin() {
        let body = serde_json::json!({
            "success": true,
            "plugins": [
                {"id": "clock", "name": "Clock", "icon": "icon.png", "type": "app", "entry": "index.html"},
                {"id": "notes", "name": "Notes", "entry": "index.html", "version": "2.1.0", "folderName": "notes-v2"}
            ]
        });
        let entries = parse_catalog("https://s.test", body);
        assert_eq!(entries.len(), 2);
        let clock = &entries[0];
        assert_eq!(clock.manifest_url, "https://s.test/api/plugins/clock/manifest");
        assert_eq!(clock.folder_contents_url, "https://s.test/api/plugins/clock/folder");
        assert_eq!(clock.content_url, clock.folder_contents_url);
        assert_eq!(clock.icon_url.as_deref(), Some("https://s.test/api/plugins/clock/files/icon.png"));
        assert_eq!(clock.version, "1.0.0");
        assert_eq!(clock.folder_name, "clock");

        let notes = &entries[1];
        assert_eq!(notes.kind, PluginKind::App);
        assert!(notes.icon_url.is_none());
        assert_eq!(notes.version, "2.1.0");
        assert_eq!(notes.folder_name, "notes-v2");
    }

    #[test]
    fn wrong_shape_is_empty() {
        assert!(parse_catalog("o", serde_json::json!({"success": false, "error": "down"})).is_empty());
        assert!(parse_catalog("o", serde_json::json!({"success": true})).is_empty());
        assert!(parse_catalog("o", serde_json::json!({"success": true, "plugins": {}})).is_empty());
    }

    #[test]
    fn unknown_type_entries_are_dropped() {
        let body = serde_json::json!({
            "success": true,
            "plugins": [{"id": "x", "name": "X", "type": "widget", "entry": "x"}]
        });
        assert!(parse_catalog("o", body).is_empty());
    }

    #[tokio::test]
    async fn fetch_catalog_from_server() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/plugins")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true,"plugins":[{"id":"a","name":"A","type":"web","entry":"https://a.test"}]}"#)
            .create_async()
            .await;

        let origin = format!("{}/", server.url());
        let plugins = client().fetch_catalog(&origin).await;
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].kind, PluginKind::Web);
        assert_eq!(plugins[0].manifest_url, format!("{}/api/plugins/a/manifest", server.url()));
    }

    #[tokio::test]
    async fn server_error_degrades_to_empty() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/plugins")
            .with_status(500)
            .create_async()
            .await;
        assert!(client().fetch_catalog(&server.url()).await.is_empty());
    }

    #[tokio::test]
    async fn unreachable_store_degrades_to_empty() {
        // Port 9 (discard) on loopback is closed in test environments
        assert!(client().fetch_catalog("http://127.0.0.1:9").await.is_empty());
    }
}
