//! Shell controller: the single owner of plugin lifecycle state.
//!
//! Every UI-facing operation lives here. Mutations for one plugin id are
//! serialized through [`IdLocks`]; the runtime registry sits behind a
//! synchronous mutex that is never held across an await.

use crate::config::{AppConfig, ShellPaths};
use crate::error::PluginError;
use crate::extension::{ExtensionLoader, ScriptHost, UiReadiness};
use crate::http::Fetcher;
use crate::installer::{self, StoreInstallRequest};
use crate::manifest::{validate_plugin_id, PluginKind, PluginManifest};
use crate::manifest_store::ManifestStore;
use crate::package;
use crate::permissions;
use crate::runtime::{ContentLayout, RuntimeRegistry, ViewBackend};
use crate::state::IdLocks;
use crate::store::{StoreCatalogEntry, StoreClient};
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Receives the refreshed plugin list whenever the installed set changes.
pub trait PluginObserver: Send + Sync {
    fn plugins_changed(&self, plugins: &[PluginManifest]);
}

/// One entry of `reorderPlugins`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PluginOrder {
    pub id: String,
    pub order: i64,
}

pub struct PluginHost<B: ViewBackend, S: ScriptHost> {
    store: ManifestStore,
    client: StoreClient,
    store_origin: String,
    registry: Mutex<RuntimeRegistry<B>>,
    extensions: ExtensionLoader<S>,
    locks: IdLocks,
    observer: Arc<dyn PluginObserver>,
}

impl<B: ViewBackend, S: ScriptHost> PluginHost<B, S> {
    pub fn new(
        config: &AppConfig,
        paths: ShellPaths,
        views: B,
        scripts: S,
        observer: Arc<dyn PluginObserver>,
    ) -> Result<Self, PluginError> {
        let fetcher = Fetcher::new(
            Duration::from_secs(config.request_timeout_secs),
            config.max_redirects,
        )?;
        let layout = ContentLayout {
            sidebar_width: config.sidebar_width,
            title_bar_height: config.title_bar_height,
        };
        Ok(Self {
            store: ManifestStore::new(paths.plugins_dir, paths.default_plugins_dir),
            client: StoreClient::new(fetcher),
            store_origin: config.store_origin(),
            registry: Mutex::new(RuntimeRegistry::new(views, layout)),
            extensions: ExtensionLoader::new(
                scripts,
                UiReadiness::new(),
                Duration::from_millis(config.ui_ready_timeout_ms),
            ),
            locks: IdLocks::new(),
            observer,
        })
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    pub fn active_plugin(&self) -> Option<String> {
        self.registry.lock().active().map(str::to_string)
    }

    /// Push the refreshed list and drop per-id locks left idle by the
    /// finished mutation.
    fn notify(&self) {
        self.locks.prune();
        let plugins = self.store.list_manifests();
        self.observer.plugins_changed(&plugins);
    }

    // -- startup and window events --

    /// Seed the plugins root and preload a hidden view for every enabled
    /// web/app plugin. Extensions wait for [`Self::load_extensions`].
    pub fn start(&self) -> Vec<PluginManifest> {
        if let Err(e) = self.store.ensure_seeded() {
            error!("Failed to prepare plugins dir: {e}");
        }
        let plugins = self.store.list_manifests();

        let mut registry = self.registry.lock();
        for manifest in plugins.iter().filter(|m| m.wants_view()) {
            if let Err(e) = registry.materialize(manifest) {
                warn!(plugin_id = %manifest.id, "Failed to preload plugin: {e}");
            }
        }
        info!(
            plugins = plugins.len(),
            views = registry.view_ids().len(),
            "Plugins preloaded"
        );
        plugins
    }

    /// Load every enabled extension in list order once the host UI is ready
    /// (or the readiness wait gives up). Returns how many were injected.
    pub async fn load_extensions(&self) -> usize {
        self.extensions
            .readiness()
            .wait(self.extensions.ready_timeout())
            .await;

        let mut loaded = 0;
        let plugins = self.store.list_manifests();
        for manifest in plugins
            .iter()
            .filter(|m| m.enabled && m.kind == PluginKind::Extension)
        {
            let _guard = self.locks.lock(&manifest.id).await;
            match self
                .extensions
                .load(manifest, &self.store.plugin_dir(&manifest.id))
                .await
            {
                Ok(true) => loaded += 1,
                Ok(false) => {}
                Err(e) => error!(plugin_id = %manifest.id, "Error loading extension: {e}"),
            }
        }
        info!(loaded, "Extensions loaded");
        loaded
    }

    /// Called once by the host UI after its first render.
    pub fn mark_ui_ready(&self) {
        self.extensions.readiness().mark_ready();
    }

    pub fn on_window_resized(&self) {
        self.registry.lock().resize();
    }

    /// Tear down every view; the host window is gone.
    pub fn on_window_closed(&self) {
        self.registry.lock().destroy_all();
        self.extensions.forget_all();
        self.locks.prune();
        info!("Destroyed all plugin views");
    }

    // -- listing and display --

    pub fn list_plugins(&self) -> Vec<PluginManifest> {
        self.store.list_manifests()
    }

    /// Hide the active view and show `id`'s, materializing it on demand.
    /// Extensions and unknown ids only clear the active marker.
    pub fn show_plugin(&self, id: Option<&str>) {
        let mut registry = self.registry.lock();
        let Some(id) = id else {
            registry.show(None);
            return;
        };

        if !registry.has_view(id) {
            match self.store.read_manifest(id) {
                Ok(manifest) if manifest.wants_view() => {
                    if let Err(e) = registry.materialize(&manifest) {
                        warn!(plugin_id = %id, "Failed to create plugin view: {e}");
                    }
                }
                Ok(manifest) => {
                    debug!(plugin_id = %id, kind = ?manifest.kind, enabled = manifest.enabled, "Plugin has no view to show");
                }
                Err(e) => warn!(plugin_id = %id, "Cannot show plugin: {e}"),
            }
        }
        registry.show(Some(id));
    }

    pub fn check_permission(&self, id: &str, permission: &str) -> bool {
        match self.store.read_manifest(id) {
            Ok(manifest) => manifest.is_granted(permission),
            Err(e) => {
                debug!(plugin_id = %id, "Permission check on unreadable manifest: {e}");
                false
            }
        }
    }

    /// Whether a live view of `id` may open the requested media device.
    pub fn decide_view_permission(&self, id: &str, requested: &str) -> bool {
        match self.store.read_manifest(id) {
            Ok(manifest) => permissions::decide(&manifest.granted_permissions, requested),
            Err(_) => false,
        }
    }

    pub fn plugin_icon_data_url(&self, id: &str, icon: &str) -> Option<String> {
        self.store.icon_data_url(id, icon)
    }

    // -- installs --

    /// Validate a package and return its manifest without installing it.
    pub fn read_manifest_preview(&self, archive: &Path) -> Result<PluginManifest, PluginError> {
        package::read_package_manifest(archive)
    }

    /// Install a local package with the permissions the user approved.
    pub async fn confirm_install(
        &self,
        archive: &Path,
        granted: Vec<String>,
    ) -> Result<PluginManifest, PluginError> {
        let preview = package::read_package_manifest(archive)?;
        let _guard = self.locks.lock(&preview.id).await;

        let store = self.store.clone();
        let path = archive.to_path_buf();
        let manifest = tokio::task::spawn_blocking(move || {
            installer::install_from_archive(&store, &path, granted)
        })
        .await
        .map_err(|e| PluginError::Io(format!("Install task failed: {e}")))??;

        self.activate_installed(&manifest, true).await;
        self.notify();
        Ok(manifest)
    }

    /// Install a package without granting any permission.
    pub async fn install_plugin(&self, archive: &Path) -> Result<PluginManifest, PluginError> {
        self.confirm_install(archive, Vec::new()).await
    }

    pub async fn install_from_store(
        &self,
        request: &StoreInstallRequest,
    ) -> Result<PluginManifest, PluginError> {
        self.store_install(request, false).await
    }

    pub async fn update_from_store(
        &self,
        request: &StoreInstallRequest,
    ) -> Result<PluginManifest, PluginError> {
        self.store_install(request, true).await
    }

    async fn store_install(
        &self,
        request: &StoreInstallRequest,
        is_update: bool,
    ) -> Result<PluginManifest, PluginError> {
        validate_plugin_id(&request.id)?;
        let _guard = self.locks.lock(&request.id).await;
        let manifest =
            installer::install_from_store(&self.store, self.client.fetcher(), request, is_update)
                .await?;
        self.activate_installed(&manifest, false).await;
        self.notify();
        Ok(manifest)
    }

    /// Bring the runtime in line with a freshly written plugin. Archive
    /// installs always create a view; store installs only refresh one that
    /// already exists.
    async fn activate_installed(&self, manifest: &PluginManifest, create_view: bool) {
        if manifest.kind == PluginKind::Extension {
            if !manifest.enabled {
                return;
            }
            if self.extensions.is_loaded(&manifest.id)
                && let Err(e) = self.extensions.unload(manifest)
            {
                warn!(plugin_id = %manifest.id, "Failed to unload previous extension: {e}");
            }
            if let Err(e) = self
                .extensions
                .load(manifest, &self.store.plugin_dir(&manifest.id))
                .await
            {
                error!(plugin_id = %manifest.id, "Error loading extension: {e}");
            }
            return;
        }

        let mut registry = self.registry.lock();
        if !manifest.enabled {
            registry.destroy(&manifest.id);
            return;
        }
        if create_view || registry.has_view(&manifest.id) {
            if let Err(e) = registry.rematerialize(manifest) {
                warn!(plugin_id = %manifest.id, "Failed to create plugin view: {e}");
            }
        }
    }

    // -- mutations --

    pub async fn delete_plugin(&self, id: &str) -> Result<(), PluginError> {
        validate_plugin_id(id)?;
        let _guard = self.locks.lock(id).await;
        if !self.store.plugin_dir(id).exists() {
            return Err(PluginError::NotFound(format!("Plugin not found: {id}")));
        }

        if self.extensions.is_loaded(id) {
            match self.store.read_manifest(id) {
                Ok(manifest) => {
                    if let Err(e) = self.extensions.unload(&manifest) {
                        warn!(plugin_id = %id, "Failed to unload extension: {e}");
                    }
                }
                Err(e) => warn!(plugin_id = %id, "Cannot unload extension: {e}"),
            }
        }
        self.registry.lock().destroy(id);
        self.store.remove(id)?;
        info!(plugin_id = %id, "Deleted plugin");

        self.notify();
        Ok(())
    }

    pub async fn toggle_plugin(&self, id: &str, enabled: bool) -> Result<(), PluginError> {
        validate_plugin_id(id)?;
        let _guard = self.locks.lock(id).await;
        let mut manifest = self.store.read_manifest(id)?;
        manifest.enabled = enabled;
        self.store.write_manifest(id, &manifest)?;
        info!(plugin_id = %id, enabled, "Toggled plugin");

        match manifest.kind {
            PluginKind::Extension if enabled => {
                if let Err(e) = self.extensions.load(&manifest, &self.store.plugin_dir(id)).await {
                    error!(plugin_id = %id, "Error loading extension: {e}");
                }
            }
            PluginKind::Extension => {
                if let Err(e) = self.extensions.unload(&manifest) {
                    warn!(plugin_id = %id, "Failed to unload extension: {e}");
                }
            }
            PluginKind::Web | PluginKind::App => {
                let mut registry = self.registry.lock();
                if enabled {
                    if let Err(e) = registry.materialize(&manifest) {
                        warn!(plugin_id = %id, "Failed to create plugin view: {e}");
                    }
                } else {
                    registry.destroy(id);
                }
            }
        }

        self.notify();
        Ok(())
    }

    /// Persist new sidebar positions. Every entry is attempted; the first
    /// failure is returned.
    pub async fn reorder_plugins(&self, orders: &[PluginOrder]) -> Result<(), PluginError> {
        let mut first_error = None;
        for entry in orders {
            if let Err(e) = self.set_order(entry).await {
                warn!(plugin_id = %entry.id, "Failed to reorder plugin: {e}");
                first_error.get_or_insert(e);
            }
        }
        self.notify();
        first_error.map_or(Ok(()), Err)
    }

    async fn set_order(&self, entry: &PluginOrder) -> Result<(), PluginError> {
        validate_plugin_id(&entry.id)?;
        let _guard = self.locks.lock(&entry.id).await;
        let mut manifest = self.store.read_manifest(&entry.id)?;
        manifest.order = entry.order;
        self.store.write_manifest(&entry.id, &manifest)
    }

    // -- store --

    /// Catalog of `origin`, or of the configured store when omitted.
    pub async fn fetch_store_catalog(&self, origin: Option<&str>) -> Vec<StoreCatalogEntry> {
        let origin = origin
            .filter(|o| !o.trim().is_empty())
            .unwrap_or(&self.store_origin);
        self.client.fetch_catalog(origin).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
