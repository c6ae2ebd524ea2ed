//! On-disk plugin layout: `{plugins_dir}/{id}/manifest.json` plus assets.
//!
//! The directory name is the plugin's identity. Listing never fails: broken
//! manifests are logged and skipped, an unreadable root yields an empty list.

use crate::error::PluginError;
use crate::fs_tree;
use crate::manifest::{is_path_escape, validate_plugin_id, PluginManifest, MANIFEST_FILE};
use base64::Engine;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ManifestStore {
    root: PathBuf,
    defaults: PathBuf,
}

impl ManifestStore {
    pub fn new(root: impl Into<PathBuf>, defaults: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            defaults: defaults.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of plugin `id`. Callers validate the id first.
    pub fn plugin_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn manifest_path(&self, id: &str) -> PathBuf {
        self.plugin_dir(id).join(MANIFEST_FILE)
    }

    pub fn exists(&self, id: &str) -> bool {
        validate_plugin_id(id).is_ok() && self.manifest_path(id).is_file()
    }

    /// Create the plugins root on first run and copy in the bundled defaults.
    /// Defaults whose target already exists are left alone.
    pub fn ensure_seeded(&self) -> Result<(), PluginError> {
        if self.root.exists() {
            fs_tree::sweep_stale_staging(&self.root);
            return Ok(());
        }
        std::fs::create_dir_all(&self.root).map_err(|e| {
            PluginError::io(format!("Failed to create plugins dir {}", self.root.display()), e)
        })?;
        self.copy_defaults();
        Ok(())
    }

    fn copy_defaults(&self) {
        let entries = match std::fs::read_dir(&self.defaults) {
            Ok(e) => e,
            Err(err) => {
                info!(path = %self.defaults.display(), "No bundled default plugins: {err}");
                return;
            }
        };

        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let target = self.root.join(entry.file_name());
            if target.exists() {
                continue;
            }
            match fs_tree::copy_dir_recursive(&entry.path(), &target) {
                Ok(()) => info!(plugin_id = %entry.file_name().to_string_lossy(), "Seeded default plugin"),
                Err(e) => error!(path = %entry.path().display(), "Error copying default plugin: {e}"),
            }
        }
    }

    /// Scan the plugins root and return every readable manifest, sorted by
    /// `order` (stable, so ties keep discovery order). Icons are resolved to
    /// `data:` URLs.
    pub fn list_manifests(&self) -> Vec<PluginManifest> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(err) => {
                warn!(path = %self.root.display(), "Failed to read plugins dir: {err}");
                return Vec::new();
            }
        };

        let mut dirs: Vec<(String, PathBuf)> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_string();
                (!name.starts_with('.')).then(|| (name, e.path()))
            })
            .collect();
        dirs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut manifests = Vec::new();
        for (dir_name, path) in dirs {
            let manifest_path = path.join(MANIFEST_FILE);
            if !manifest_path.is_file() {
                continue;
            }
            match read_manifest_file(&manifest_path) {
                Ok(mut manifest) => {
                    manifest.id = dir_name.clone();
                    manifest.icon = manifest
                        .icon
                        .as_deref()
                        .and_then(|icon| icon_data_url(&path, icon));
                    manifests.push(manifest);
                }
                Err(err) => error!(plugin_id = %dir_name, "Error loading plugin: {err}"),
            }
        }

        manifests.sort_by_key(|m| m.order);
        manifests
    }

    /// Read the raw manifest record for `id` (icon left as a relative path).
    pub fn read_manifest(&self, id: &str) -> Result<PluginManifest, PluginError> {
        validate_plugin_id(id)?;
        let path = self.manifest_path(id);
        if !path.is_file() {
            return Err(PluginError::NotFound(format!("Plugin not found: {id}")));
        }
        let mut manifest = read_manifest_file(&path)?;
        manifest.id = id.to_string();
        Ok(manifest)
    }

    /// Serialize `manifest` into `{id}/manifest.json` via temp file + rename.
    pub fn write_manifest(&self, id: &str, manifest: &PluginManifest) -> Result<(), PluginError> {
        validate_plugin_id(id)?;
        write_manifest_atomic(&self.plugin_dir(id), manifest)
    }

    /// Remove the whole plugin directory.
    pub fn remove(&self, id: &str) -> Result<(), PluginError> {
        validate_plugin_id(id)?;
        fs_tree::remove_dir_if_exists(&self.plugin_dir(id))
    }

    /// Resolve a plugin-relative icon path to a `data:` URL.
    pub fn icon_data_url(&self, id: &str, icon: &str) -> Option<String> {
        validate_plugin_id(id).ok()?;
        icon_data_url(&self.plugin_dir(id), icon)
    }
}

fn read_manifest_file(path: &Path) -> Result<PluginManifest, PluginError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| PluginError::io(format!("Failed to read {}", path.display()), e))?;
    PluginManifest::from_json(&text)
}

/// Write `manifest.json` into `dir` so readers see either the old or the new file.
pub(crate) fn write_manifest_atomic(dir: &Path, manifest: &PluginManifest) -> Result<(), PluginError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| PluginError::io(format!("Failed to create {}", dir.display()), e))?;
    let json = manifest.to_pretty_json()?;
    let target = dir.join(MANIFEST_FILE);
    let temp = dir.join(format!(".{MANIFEST_FILE}.tmp.{}", uuid::Uuid::new_v4()));

    std::fs::write(&temp, json)
        .map_err(|e| PluginError::io("Failed to write temp manifest", e))?;
    std::fs::rename(&temp, &target).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        PluginError::io("Failed to commit manifest", e)
    })
}

/// MIME from the icon extension; anything that is not an image is served as PNG.
fn icon_mime(icon: &str) -> String {
    mime_guess::from_path(icon)
        .first()
        .filter(|m| m.type_() == mime_guess::mime::IMAGE)
        .map(|m| m.essence_str().to_string())
        .unwrap_or_else(|| "image/png".to_string())
}

fn icon_data_url(plugin_dir: &Path, icon: &str) -> Option<String> {
    if icon.is_empty() || is_path_escape(icon) {
        return None;
    }
    let path = plugin_dir.join(icon);
    match std::fs::read(&path) {
        Ok(bytes) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            Some(format!("data:{};base64,{encoded}", icon_mime(icon)))
        }
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!(path = %path.display(), "Error reading icon: {e}");
            }
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ManifestStore {
        ManifestStore::new(dir.path().join("plugins"), dir.path().join("defaults"))
    }

    fn put(store: &ManifestStore, id: &str, json: &str) {
        let d = store.plugin_dir(id);
        fs::create_dir_all(&d).unwrap();
        fs::write(d.join(MANIFEST_FILE), json).unwrap();
    }

    #[test]
    fn listing_keeps_manifests_with_null_fields() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        put(&store, "a", r#"{"name":"A","entry":"index.html","description":null}"#);
        put(&store, "b", r#"{"name":"B","entry":"index.html","version":null}"#);
        put(&store, "c", r#"{"name":"C","entry":"index.html","permissions":null}"#);
        put(&store, "d", r#"{"name":"D","entry":"index.html","order":2.0}"#);
        put(&store, "ok", r#"{"name":"Ok","entry":"index.html"}"#);

        let listed = store.list_manifests();
        let ids: Vec<&str> = listed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["d", "a", "b", "c", "ok"]);
        assert_eq!(listed[0].order, 2);
        assert_eq!(listed[2].version, "1.0.0");
    }

    #[test]
    fn seeding_empty_defaults_lists_nothing() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("defaults")).unwrap();
        let store = store_in(&dir);
        store.ensure_seeded().unwrap();
        assert!(store.root().is_dir());
        assert!(store.list_manifests().is_empty());
    }

    #[test]
    fn seeding_copies_defaults_once() {
        let dir = TempDir::new().unwrap();
        let default_plugin = dir.path().join("defaults/welcome");
        fs::create_dir_all(default_plugin.join("assets")).unwrap();
        fs::write(default_plugin.join(MANIFEST_FILE), r#"{"name":"Welcome"}"#).unwrap();
        fs::write(default_plugin.join("assets/app.js"), "1").unwrap();
        let store = store_in(&dir);

        store.ensure_seeded().unwrap();
        assert!(store.plugin_dir("welcome").join("assets/app.js").exists());

        // User edits survive later startups
        fs::write(store.plugin_dir("welcome").join("assets/app.js"), "2").unwrap();
        store.ensure_seeded().unwrap();
        let content = fs::read_to_string(store.plugin_dir("welcome").join("assets/app.js")).unwrap();
        assert_eq!(content, "2");
    }

    #[test]
    fn missing_root_lists_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store_in(&dir).list_manifests().is_empty());
    }

    #[test]
    fn directory_name_overrides_manifest_id() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        put(&store, "real-id", r#"{"id":"other","name":"A"}"#);
        let list = store.list_manifests();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "real-id");
    }

    #[test]
    fn malformed_manifest_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        put(&store, "good", r#"{"name":"Good"}"#);
        put(&store, "broken", "{ nope");
        put(&store, "weird", r#"{"name":"W","type":"widget"}"#);
        let ids: Vec<_> = store.list_manifests().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["good"]);
    }

    #[test]
    fn order_defaults_and_ties_keep_discovery_order() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        put(&store, "b-second", r#"{"name":"B","order":1}"#);
        put(&store, "a-first", r#"{"name":"A","order":1}"#);
        put(&store, "c-none", r#"{"name":"C"}"#);
        put(&store, "d-zero", r#"{"name":"D","order":0}"#);
        let list = store.list_manifests();
        let ids: Vec<_> = list.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["d-zero", "a-first", "b-second", "c-none"]);
        assert_eq!(list[3].order, 999);
    }

    #[test]
    fn hidden_and_staging_dirs_are_ignored() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        put(&store, ".staging-x-1", r#"{"name":"Half"}"#);
        put(&store, "x", r#"{"name":"X"}"#);
        assert_eq!(store.list_manifests().len(), 1);
    }

    #[test]
    fn icon_becomes_data_url_with_mime() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        put(&store, "svg", r#"{"name":"S","icon":"icon.svg"}"#);
        fs::write(store.plugin_dir("svg").join("icon.svg"), "<svg/>").unwrap();
        put(&store, "odd", r#"{"name":"O","icon":"icon.bin"}"#);
        fs::write(store.plugin_dir("odd").join("icon.bin"), [1u8, 2]).unwrap();
        put(&store, "gone", r#"{"name":"G","icon":"missing.png"}"#);

        let list = store.list_manifests();
        let by_id = |id: &str| list.iter().find(|m| m.id == id).unwrap().icon.clone();
        assert!(by_id("svg").unwrap().starts_with("data:image/svg+xml;base64,"));
        assert!(by_id("odd").unwrap().starts_with("data:image/png;base64,"));
        assert!(by_id("gone").is_none());
    }

    #[test]
    fn read_manifest_keeps_relative_icon() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        put(&store, "p", r#"{"name":"P","icon":"icon.png"}"#);
        let m = store.read_manifest("p").unwrap();
        assert_eq!(m.icon.as_deref(), Some("icon.png"));
        assert!(store.read_manifest("absent").unwrap_err().is_not_found());
        assert!(store.read_manifest("../p").is_err());
    }

    #[test]
    fn write_manifest_preserves_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        put(&store, "p", r#"{"name":"P","author":"someone","enabled":true}"#);
        let mut m = store.read_manifest("p").unwrap();
        m.enabled = false;
        store.write_manifest("p", &m).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.manifest_path("p")).unwrap()).unwrap();
        assert_eq!(raw["author"], "someone");
        assert_eq!(raw["enabled"], false);
        let files: Vec<_> = fs::read_dir(store.plugin_dir("p")).unwrap().flatten().collect();
        assert_eq!(files.len(), 1, "temp file must not linger");
    }

    #[test]
    fn remove_deletes_directory() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        put(&store, "p", r#"{"name":"P"}"#);
        store.remove("p").unwrap();
        assert!(!store.plugin_dir("p").exists());
        store.remove("p").unwrap();
    }
}
