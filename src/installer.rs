//! Package installer: local archives and remote store downloads.
//!
//! Both paths build the complete plugin tree in a staging directory and only
//! then swap it into `{plugins_dir}/{id}`, so an interrupted install never
//! leaves a listable half-written plugin. Reinstalling an archive replaces the
//! whole directory, including any data the plugin kept there.

use crate::error::PluginError;
use crate::fs_tree::StagedDir;
use crate::http::Fetcher;
use crate::manifest::{is_path_escape, validate_plugin_id, PluginKind, PluginManifest, MANIFEST_FILE};
use crate::manifest_store::{write_manifest_atomic, ManifestStore};
use crate::package;
use crate::store::{plugin_file_url, FolderListing};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

/// Temporary archive name inside the staging directory.
const DOWNLOADED_ARCHIVE: &str = "temp.zip";

/// Arguments of `installFromStore` / `updateFromStore`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInstallRequest {
    pub id: String,
    pub manifest_url: String,
    #[serde(default)]
    pub content_url: String,
    /// Kind advertised by the catalog; used when the manifest omits `type`
    #[serde(rename = "type", default)]
    pub kind: Option<PluginKind>,
    #[serde(default)]
    pub folder_contents_url: Option<String>,
}

fn ensure_root(store: &ManifestStore) -> Result<(), PluginError> {
    std::fs::create_dir_all(store.root()).map_err(|e| {
        PluginError::io(format!("Failed to create plugins dir {}", store.root().display()), e)
    })
}

/// Look up the freshly written plugin in a new listing.
fn installed_manifest(store: &ManifestStore, id: &str) -> Result<PluginManifest, PluginError> {
    store
        .list_manifests()
        .into_iter()
        .find(|m| m.id == id)
        .ok_or_else(|| PluginError::NotFound(format!("Plugin {id} not found after install")))
}

/// Install a local package, stamping `granted` as the approved permissions.
/// An existing directory for the same id is replaced wholesale.
pub fn install_from_archive(
    store: &ManifestStore,
    archive: &Path,
    granted: Vec<String>,
) -> Result<PluginManifest, PluginError> {
    let mut manifest = package::read_package_manifest(archive)?;
    manifest.granted_permissions = granted;
    let id = manifest.id.clone();

    ensure_root(store)?;
    let staged = StagedDir::create(store.root(), &id)?;
    let files = package::extract_package(archive, staged.path(), &manifest)?;
    staged.commit_replace(&store.plugin_dir(&id))?;
    info!(plugin_id = %id, files, "Installed plugin from archive");

    installed_manifest(store, &id)
}

/// Accept either a bare manifest or `{ "manifest": { ... } }`.
fn unwrap_manifest_document(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.get("manifest").is_some_and(Value::is_object) => {
            map.remove("manifest").unwrap_or(Value::Null)
        }
        other => other,
    }
}

async fn fetch_manifest(fetcher: &Fetcher, request: &StoreInstallRequest) -> Result<PluginManifest, PluginError> {
    let url = request.manifest_url.trim();
    if url.is_empty() {
        return Err(PluginError::InvalidPackage(format!(
            "Invalid manifestUrl for plugin {}",
            request.id
        )));
    }

    info!(plugin_id = %request.id, %url, "Fetching manifest");
    let document = match fetcher.get_json(url).await {
        Ok(value) => value,
        Err(e) => {
            warn!(%url, "Failed to fetch manifest as JSON, trying as text: {e}");
            let text = fetcher.get_text(url).await?;
            serde_json::from_str(&text)?
        }
    };

    let mut document = unwrap_manifest_document(document);
    if let (Some(kind), Value::Object(map)) = (request.kind, &mut document)
        && !map.contains_key("type")
    {
        map.insert("type".into(), serde_json::to_value(kind)?);
    }
    let manifest = PluginManifest::from_value(document)?;
    manifest.validate_for_install()?;
    Ok(manifest)
}

/// Origin used to resolve relative download URLs.
fn server_origin(request: &StoreInstallRequest) -> Result<url::Url, PluginError> {
    let source = request
        .folder_contents_url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or(&request.manifest_url);
    let parsed = url::Url::parse(source.trim())
        .map_err(|e| PluginError::Network(format!("Invalid store URL {source}: {e}")))?;
    let origin = parsed.origin().ascii_serialization();
    url::Url::parse(&origin).map_err(|e| PluginError::Network(format!("Invalid store origin {origin}: {e}")))
}

fn is_archive_url(content_url: &str) -> bool {
    content_url.contains(".zip")
}

/// Directory part of `url`, without the trailing slash.
fn url_dir(url: &str) -> &str {
    url.rfind('/').map(|i| &url[..i]).unwrap_or(url)
}

/// Download or unpack the plugin tree into `dir`, then make sure its manifest
/// carries `manifest` semantics and the target `order`.
async fn acquire_content(
    fetcher: &Fetcher,
    request: &StoreInstallRequest,
    manifest: &PluginManifest,
    dir: &Path,
) -> Result<(), PluginError> {
    if is_archive_url(&request.content_url) {
        let archive = dir.join(DOWNLOADED_ARCHIVE);
        fetcher.download_to(&request.content_url, &archive).await?;
        let extracted = package::extract_all(&archive, dir);
        let _ = std::fs::remove_file(&archive);
        let files = extracted?;
        debug!(plugin_id = %request.id, files, "Extracted store archive");

        let manifest_path = dir.join(MANIFEST_FILE);
        let patched = match std::fs::read_to_string(&manifest_path) {
            Ok(text) => {
                let mut extracted = PluginManifest::from_json(&text)?;
                extracted.order = manifest.order;
                extracted.granted_permissions = manifest.granted_permissions.clone();
                extracted
            }
            Err(_) => manifest.clone(),
        };
        return write_manifest_atomic(dir, &patched);
    }

    write_manifest_atomic(dir, manifest)?;
    let origin = server_origin(request)?;

    match request.folder_contents_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(folder_url) => match fetch_listing(fetcher, folder_url).await {
            Ok(listing) => download_listing(fetcher, &request.id, &origin, &listing, dir).await,
            Err(e) => {
                warn!(plugin_id = %request.id, "Could not fetch folder contents: {e}");
                let base = origin.as_str().trim_end_matches('/').to_string();
                download_by_convention(fetcher, manifest, dir, |file| {
                    plugin_file_url(&base, &request.id, file)
                })
                .await;
            }
        },
        None => {
            let source = if request.content_url.is_empty() {
                &request.manifest_url
            } else {
                &request.content_url
            };
            let base = url_dir(source).to_string();
            download_by_convention(fetcher, manifest, dir, |file| format!("{base}/{file}")).await;
        }
    }
    Ok(())
}

async fn fetch_listing(fetcher: &Fetcher, url: &str) -> Result<FolderListing, PluginError> {
    let value = fetcher.get_json(url).await?;
    let listing: FolderListing = serde_json::from_value(value)?;
    if !listing.success {
        return Err(PluginError::Network(format!("{url} reported failure")));
    }
    Ok(listing)
}

async fn download_listing(
    fetcher: &Fetcher,
    id: &str,
    origin: &url::Url,
    listing: &FolderListing,
    dir: &Path,
) {
    for file in &listing.files {
        if file.kind != "file" || file.name == MANIFEST_FILE {
            continue;
        }
        let Some(download_url) = file.download_url.as_deref() else {
            continue;
        };
        if file.name.is_empty() || is_path_escape(&file.name) {
            warn!(plugin_id = %id, file = %file.name, "Skipping file with unsafe path");
            continue;
        }
        let url = if download_url.starts_with("http") {
            download_url.to_string()
        } else {
            match origin.join(download_url) {
                Ok(u) => u.to_string(),
                Err(e) => {
                    warn!(plugin_id = %id, file = %file.name, "Bad download URL {download_url}: {e}");
                    continue;
                }
            }
        };
        match fetcher.download_to(&url, &dir.join(&file.name)).await {
            Ok(bytes) => debug!(plugin_id = %id, file = %file.name, bytes, "Downloaded"),
            Err(e) => warn!(plugin_id = %id, file = %file.name, "Could not download file: {e}"),
        }
    }
}

/// Best-effort download of just the entry and icon files.
async fn download_by_convention<F>(fetcher: &Fetcher, manifest: &PluginManifest, dir: &Path, url_for: F)
where
    F: Fn(&str) -> String,
{
    let wanted = [Some(manifest.entry.as_str()), manifest.icon.as_deref()];
    for file in wanted.into_iter().flatten() {
        if file.is_empty() || is_path_escape(file) || file.contains("://") {
            continue;
        }
        if let Err(e) = fetcher.download_to(&url_for(file), &dir.join(file)).await {
            warn!(plugin_id = %manifest.id, %file, "Could not download file: {e}");
        }
    }
}

/// Install or update a plugin from the store.
///
/// Updates keep the existing `order` and permission grants and replace the
/// directory. Fresh installs append to the end of the list and lay the new
/// files over any directory already present.
pub async fn install_from_store(
    store: &ManifestStore,
    fetcher: &Fetcher,
    request: &StoreInstallRequest,
    is_update: bool,
) -> Result<PluginManifest, PluginError> {
    validate_plugin_id(&request.id)?;
    let mut manifest = fetch_manifest(fetcher, request).await?;
    manifest.id = request.id.clone();

    let existing = if is_update {
        match store.read_manifest(&request.id) {
            Ok(m) => Some(m),
            Err(e) => {
                if !e.is_not_found() {
                    warn!(plugin_id = %request.id, "Could not read existing manifest for order: {e}");
                }
                None
            }
        }
    } else {
        None
    };
    match existing {
        Some(existing) => {
            manifest.order = existing.order;
            manifest.granted_permissions = existing.granted_permissions;
        }
        None => {
            manifest.order = store.list_manifests().len() as i64;
            manifest.granted_permissions = Vec::new();
        }
    }

    ensure_root(store)?;
    let staged = StagedDir::create(store.root(), &request.id)?;
    acquire_content(fetcher, request, &manifest, staged.path()).await?;

    let target = store.plugin_dir(&request.id);
    if is_update {
        staged.commit_replace(&target)?;
    } else {
        staged.commit_overlay(&target)?;
    }
    info!(plugin_id = %request.id, update = is_update, "Installed plugin from store");

    installed_manifest(store, &request.id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
