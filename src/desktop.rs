//! Tauri wiring: child webviews as plugin views, the main webview as the
//! extension script host, the `plugin://` protocol and the app entry point.

use crate::config::{self, AppConfig};
use crate::error::PluginError;
use crate::extension::ScriptHost;
use crate::host::{PluginHost, PluginObserver};
use crate::manifest::PluginManifest;
use crate::permissions::{self, MediaAccess};
use crate::protocol::{self, AssetResponse};
use crate::runtime::{Bounds, ViewBackend, ViewSource, ViewSpec};
use crate::{commands, logging};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tauri::http::{HeaderValue, Response, StatusCode, header::CONTENT_TYPE};
use tauri::webview::{NewWindowResponse, PermissionKind, PermissionResponse};
use tauri::{
    AppHandle, Emitter, LogicalPosition, LogicalSize, Manager, Webview, WebviewBuilder, WebviewUrl,
    Window, WindowEvent,
};
use tauri_plugin_opener::OpenerExt;
use tracing::{debug, info, warn};

pub const MAIN_WINDOW: &str = "main";
pub const PLUGINS_CHANGED_EVENT: &str = "plugins-changed";

/// Where hidden views are parked so they never cover the host UI.
const OFFSCREEN: f64 = -10_000.0;

pub type DesktopHost = PluginHost<TauriViews, MainWindowScripts>;

/// Webview labels only allow alphanumerics and `-/:_`.
fn view_label(plugin_id: &str, serial: u64) -> String {
    let safe: String = plugin_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("plugin-{safe}-{serial}")
}

fn media_decision(access: MediaAccess, kind: &PermissionKind) -> PermissionResponse {
    let allowed = match kind {
        PermissionKind::Microphone => access.microphone,
        PermissionKind::Camera => access.camera,
        _ => false,
    };
    if allowed {
        PermissionResponse::Allow
    } else {
        PermissionResponse::Deny
    }
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Plugin views as child webviews of the main window.
pub struct TauriViews {
    app: AppHandle,
    serial: AtomicU64,
}

impl TauriViews {
    pub fn new(app: AppHandle) -> Self {
        Self {
            app,
            serial: AtomicU64::new(0),
        }
    }

    fn window(&self) -> Option<Window> {
        self.app.get_window(MAIN_WINDOW)
    }
}

impl ViewBackend for TauriViews {
    type View = Webview;

    fn create(&self, spec: &ViewSpec) -> Result<Webview, PluginError> {
        let window = self
            .window()
            .ok_or_else(|| PluginError::NotFound("main window is closed".to_string()))?;
        let url = match &spec.source {
            ViewSource::Remote(url) => WebviewUrl::External(url.clone()),
            ViewSource::Local { entry } => {
                let raw = protocol::entry_url(&spec.plugin_id, entry);
                let url = url::Url::parse(&raw).map_err(|e| {
                    PluginError::InvalidPackage(format!("bad entry URL {raw}: {e}"))
                })?;
                WebviewUrl::CustomProtocol(url)
            }
        };

        let label = view_label(&spec.plugin_id, self.serial.fetch_add(1, Ordering::Relaxed));
        let access = spec.media;
        let plugin_id = spec.plugin_id.clone();
        let opener = self.app.clone();
        let builder = WebviewBuilder::new(&label, url)
            .initialization_script(permissions::view_gate_script(&spec.plugin_id, access))
            .on_permission_request(move |_webview, kind| {
                let response = media_decision(access, &kind);
                debug!(plugin_id = %plugin_id, ?kind, ?response, "View permission request");
                response
            })
            .on_new_window(move |url, _features| {
                if let Err(e) = opener.opener().open_url(url.as_str(), None::<&str>) {
                    warn!(%url, "Failed to open link externally: {e}");
                }
                NewWindowResponse::Deny
            });

        let webview = window
            .add_child(
                builder,
                LogicalPosition::new(OFFSCREEN, OFFSCREEN),
                LogicalSize::new(1.0, 1.0),
            )
            .map_err(|e| PluginError::Io(format!("failed to create view {label}: {e}")))?;
        if let Err(e) = webview.hide() {
            debug!(%label, "Failed to hide new view: {e}");
        }
        Ok(webview)
    }

    fn window_size(&self) -> Option<(u32, u32)> {
        let window = self.window()?;
        let size = window.inner_size().ok()?;
        let scale = window.scale_factor().unwrap_or(1.0);
        let logical = size.to_logical::<f64>(scale);
        Some((logical.width.max(0.0) as u32, logical.height.max(0.0) as u32))
    }

    fn place(&self, view: &Webview, bounds: Bounds) {
        let position = LogicalPosition::new(f64::from(bounds.x), f64::from(bounds.y));
        let size = LogicalSize::new(f64::from(bounds.width), f64::from(bounds.height));
        if let Err(e) = view.set_position(position) {
            warn!(label = view.label(), "Failed to position view: {e}");
        }
        if let Err(e) = view.set_size(size) {
            warn!(label = view.label(), "Failed to size view: {e}");
        }
    }

    fn set_visible(&self, view: &Webview, visible: bool) {
        let result = if visible {
            view.show()
        } else {
            view.hide()
                .and_then(|()| view.set_position(LogicalPosition::new(OFFSCREEN, OFFSCREEN)))
        };
        if let Err(e) = result {
            warn!(label = view.label(), visible, "Failed to change view visibility: {e}");
        }
        let notify = format!("window.__noxaVisibility && window.__noxaVisibility({visible});");
        if let Err(e) = view.eval(notify) {
            debug!(label = view.label(), "Visibility hook not delivered: {e}");
        }
    }

    fn destroy(&self, view: Webview) {
        if let Err(e) = view.close() {
            warn!(label = view.label(), "Failed to close view: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Extension script host
// ---------------------------------------------------------------------------

/// Evaluates extension scripts in the shell's own webview.
pub struct MainWindowScripts {
    app: AppHandle,
}

impl MainWindowScripts {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl ScriptHost for MainWindowScripts {
    fn eval(&self, script: &str) -> Result<(), PluginError> {
        let webview = self
            .app
            .get_webview(MAIN_WINDOW)
            .ok_or_else(|| PluginError::NotFound("main webview is closed".to_string()))?;
        webview
            .eval(script)
            .map_err(|e| PluginError::Io(format!("script evaluation failed: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Change notifications
// ---------------------------------------------------------------------------

pub struct EmitObserver {
    app: AppHandle,
}

impl PluginObserver for EmitObserver {
    fn plugins_changed(&self, plugins: &[PluginManifest]) {
        if let Err(e) = self.app.emit(PLUGINS_CHANGED_EVENT, plugins.to_vec()) {
            warn!("Failed to emit {PLUGINS_CHANGED_EVENT}: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// plugin:// protocol
// ---------------------------------------------------------------------------

fn asset_response(asset: AssetResponse) -> Response<Vec<u8>> {
    let mut response = Response::new(asset.body);
    *response.status_mut() =
        StatusCode::from_u16(asset.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if let Ok(value) = HeaderValue::from_str(&asset.mime) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

pub fn register_plugin_protocol(
    builder: tauri::Builder<tauri::Wry>,
    plugins_root: PathBuf,
) -> tauri::Builder<tauri::Wry> {
    builder.register_uri_scheme_protocol(protocol::SCHEME, move |_ctx, request| {
        asset_response(protocol::serve(&plugins_root, request.uri().path()))
    })
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn build_host(app: &tauri::App, config: &AppConfig) -> Result<Arc<DesktopHost>, PluginError> {
    let bundled = app
        .path()
        .resource_dir()
        .map(|dir| dir.join("plugins"))
        .map_err(|e| debug!("No bundled resource dir: {e}"))
        .ok();
    let handle = app.handle().clone();
    let host = PluginHost::new(
        config,
        config.shell_paths(bundled),
        TauriViews::new(handle.clone()),
        MainWindowScripts::new(handle.clone()),
        Arc::new(EmitObserver { app: handle }),
    )?;
    Ok(Arc::new(host))
}

/// Run `f` against the host off the main thread. View creation dispatches to
/// the main thread and waits, so the registry lock is never taken there.
fn with_host_in_background(app: &AppHandle, f: impl FnOnce(&DesktopHost) + Send + 'static) {
    let Some(host) = app.try_state::<Arc<DesktopHost>>().map(|s| s.inner().clone()) else {
        return;
    };
    tauri::async_runtime::spawn_blocking(move || f(&host));
}

pub fn run() {
    logging::init();
    let config = config::load_app_config();
    if !config::app_config_path().exists()
        && let Err(e) = config::save_app_config(&config)
    {
        warn!("Failed to write default config: {e}");
    }
    let plugins_root = config.shell_paths(None).plugins_dir;
    info!(plugins_dir = %plugins_root.display(), "Starting noxa");

    let builder = register_plugin_protocol(tauri::Builder::default(), plugins_root);
    builder
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_dialog::init())
        .setup(move |app| {
            let host = build_host(app, &config)?;
            app.manage(host.clone());

            let active = host.start();
            info!(count = active.len(), "Plugins discovered");

            tauri::async_runtime::spawn(async move {
                let loaded = host.load_extensions().await;
                info!(loaded, "Startup extensions loaded");
            });
            Ok(())
        })
        .on_window_event(|window, event| {
            if window.label() != MAIN_WINDOW {
                return;
            }
            match event {
                WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                    with_host_in_background(window.app_handle(), |host| host.on_window_resized());
                }
                WindowEvent::Destroyed => {
                    with_host_in_background(window.app_handle(), |host| host.on_window_closed());
                }
                _ => {}
            }
        })
        .invoke_handler(tauri::generate_handler![
            commands::list_plugins,
            commands::show_plugin,
            commands::read_manifest_preview,
            commands::confirm_install,
            commands::install_plugin,
            commands::delete_plugin,
            commands::toggle_plugin,
            commands::check_permission,
            commands::plugin_icon_data_url,
            commands::fetch_store_catalog,
            commands::install_from_store,
            commands::update_from_store,
            commands::reorder_plugins,
            commands::ui_ready,
            commands::open_package_dialog,
            commands::window_minimize,
            commands::window_toggle_maximize,
            commands::window_close,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
