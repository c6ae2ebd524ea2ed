//! `#[tauri::command]` surface consumed by the shell UI. Every command hands
//! back a wire result; failures travel in its `error` field.

use crate::desktop::DesktopHost;
use crate::error::{CatalogResult, CommandResult, ManifestResult, PermissionResult, PluginError};
use crate::host::PluginOrder;
use crate::installer::StoreInstallRequest;
use crate::manifest::{PluginKind, PluginManifest};
use crate::store::StoreCatalogEntry;
use std::path::PathBuf;
use std::sync::Arc;
use tauri::{AppHandle, Manager, State, Window};
use tauri_plugin_dialog::DialogExt;
use tracing::warn;

fn host(app: &AppHandle) -> Arc<DesktopHost> {
    app.state::<Arc<DesktopHost>>().inner().clone()
}

#[tauri::command]
pub fn list_plugins(state: State<'_, Arc<DesktopHost>>) -> Vec<PluginManifest> {
    state.list_plugins()
}

#[tauri::command]
pub async fn show_plugin(app: AppHandle, id: Option<String>) {
    let host = host(&app);
    let shown = tauri::async_runtime::spawn_blocking(move || host.show_plugin(id.as_deref())).await;
    if let Err(e) = shown {
        warn!("show_plugin task failed: {e}");
    }
}

#[tauri::command]
pub fn read_manifest_preview(
    state: State<'_, Arc<DesktopHost>>,
    path: String,
) -> ManifestResult<PluginManifest> {
    state.read_manifest_preview(&PathBuf::from(path)).into()
}

#[tauri::command]
pub async fn confirm_install(
    app: AppHandle,
    path: String,
    granted_permissions: Vec<String>,
) -> ManifestResult<PluginManifest> {
    host(&app)
        .confirm_install(&PathBuf::from(path), granted_permissions)
        .await
        .into()
}

#[tauri::command]
pub async fn install_plugin(app: AppHandle, path: String) -> ManifestResult<PluginManifest> {
    host(&app).install_plugin(&PathBuf::from(path)).await.into()
}

#[tauri::command]
pub async fn delete_plugin(app: AppHandle, id: String) -> CommandResult {
    host(&app).delete_plugin(&id).await.into()
}

#[tauri::command]
pub async fn toggle_plugin(app: AppHandle, id: String, enabled: bool) -> CommandResult {
    host(&app).toggle_plugin(&id, enabled).await.into()
}

#[tauri::command]
pub fn check_permission(
    state: State<'_, Arc<DesktopHost>>,
    id: String,
    permission: String,
) -> PermissionResult {
    PermissionResult {
        granted: state.check_permission(&id, &permission),
    }
}

#[tauri::command]
pub fn plugin_icon_data_url(
    state: State<'_, Arc<DesktopHost>>,
    id: String,
    icon_path: String,
) -> Option<String> {
    state.plugin_icon_data_url(&id, &icon_path)
}

/// Store failures degrade to an empty catalog, so this always succeeds.
#[tauri::command]
pub async fn fetch_store_catalog(
    app: AppHandle,
    server_origin: Option<String>,
) -> CatalogResult<StoreCatalogEntry> {
    let plugins = host(&app)
        .fetch_store_catalog(server_origin.as_deref())
        .await;
    Ok::<_, PluginError>(plugins).into()
}

#[tauri::command]
pub async fn install_from_store(
    app: AppHandle,
    id: String,
    manifest_url: String,
    content_url: String,
    plugin_type: Option<String>,
    folder_contents_url: Option<String>,
) -> CommandResult {
    let kind = match plugin_type.as_deref().map(PluginKind::parse).transpose() {
        Ok(kind) => kind,
        Err(e) => return Err::<(), _>(e).into(),
    };
    let request = StoreInstallRequest {
        id,
        manifest_url,
        content_url,
        kind,
        folder_contents_url,
    };
    host(&app).install_from_store(&request).await.into()
}

#[tauri::command]
pub async fn update_from_store(
    app: AppHandle,
    id: String,
    manifest_url: String,
    content_url: String,
    folder_contents_url: Option<String>,
) -> CommandResult {
    let request = StoreInstallRequest {
        id,
        manifest_url,
        content_url,
        kind: None,
        folder_contents_url,
    };
    host(&app).update_from_store(&request).await.into()
}

#[tauri::command]
pub async fn reorder_plugins(app: AppHandle, orders: Vec<PluginOrder>) -> CommandResult {
    host(&app).reorder_plugins(&orders).await.into()
}

/// Called once by the shell UI after its first render.
#[tauri::command]
pub fn ui_ready(state: State<'_, Arc<DesktopHost>>) {
    state.mark_ui_ready();
}

/// Native picker for a plugin package; `None` when cancelled.
#[tauri::command]
pub async fn open_package_dialog(app: AppHandle) -> Option<String> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    app.dialog()
        .file()
        .add_filter("Plugin package", &["zip"])
        .pick_file(move |picked| {
            let _ = tx.send(picked);
        });
    let picked = rx.await.ok().flatten()?;
    match picked.into_path() {
        Ok(path) => Some(path.display().to_string()),
        Err(e) => {
            warn!("Picked package is not a local file: {e}");
            None
        }
    }
}

#[tauri::command]
pub fn window_minimize(window: Window) {
    if let Err(e) = window.minimize() {
        warn!("Failed to minimize window: {e}");
    }
}

#[tauri::command]
pub fn window_toggle_maximize(window: Window) {
    let result = match window.is_maximized() {
        Ok(true) => window.unmaximize(),
        Ok(false) => window.maximize(),
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!("Failed to toggle maximize: {e}");
    }
}

#[tauri::command]
pub fn window_close(window: Window) {
    if let Err(e) = window.close() {
        warn!("Failed to close window: {e}");
    }
}
