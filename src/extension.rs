//! Extension loader: runs `extension` plugins inside the host UI.
//!
//! Extensions have no isolated view. Their entry script is wrapped so that a
//! throw is caught and logged inside the page, and so that a second load of an
//! extension whose artifacts are still present is skipped. Unloading runs the
//! hooks the extension registered through `noxa.onUnload`, then the cleanup
//! function its manifest declares, then removes any tagged DOM leftovers.

use crate::error::PluginError;
use crate::manifest::{is_path_escape, PluginKind, PluginManifest};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Evaluates script in the host UI document.
pub trait ScriptHost: Send + Sync {
    fn eval(&self, script: &str) -> Result<(), PluginError>;
}

/// One-shot "host UI finished its first render" signal. Once a wait has
/// timed out, later waits return immediately.
#[derive(Clone)]
pub struct UiReadiness {
    tx: Arc<watch::Sender<bool>>,
    gave_up: Arc<AtomicBool>,
}

impl Default for UiReadiness {
    fn default() -> Self {
        Self::new()
    }
}

impl UiReadiness {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            gave_up: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mark_ready(&self) {
        if !self.tx.send_replace(true) {
            info!("Host UI reported ready");
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the UI is ready or `timeout` elapses. Returns false on
    /// timeout; callers proceed anyway.
    pub async fn wait(&self, timeout: Duration) -> bool {
        if self.is_ready() {
            return true;
        }
        if self.gave_up.load(Ordering::Acquire) {
            return false;
        }
        let mut rx = self.tx.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await {
            Ok(Ok(_)) => true,
            _ => {
                if !self.gave_up.swap(true, Ordering::AcqRel) {
                    warn!(timeout_ms = timeout.as_millis() as u64, "Host UI not ready, continuing anyway");
                }
                false
            }
        }
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn js_string_array(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

/// Wrap `source` so it runs once, cannot throw into the host, and can register
/// unload hooks through `noxa.onUnload`.
pub fn build_load_script(manifest: &PluginManifest, source: &str) -> String {
    let id = js_string(&manifest.id);
    let markers = js_string_array(&manifest.markers);
    let mut script = format!(
        r#"(function() {{
  const id = {id};
  const markers = {markers};
  const registry = window.__noxaExtensions = window.__noxaExtensions || {{}};
  const present = registry[id]
    || document.querySelector('[data-noxa-extension="' + CSS.escape(id) + '"]')
    || markers.some((m) => m && document.querySelector('[id*="' + CSS.escape(m) + '"]'));
  if (present) {{
    console.info('[noxa] extension ' + id + ' already loaded');
    return;
  }}
  const hooks = [];
  registry[id] = {{ hooks: hooks }};
  const noxa = Object.assign({{}}, window.noxa, {{
    pluginId: id,
    onUnload: function(fn) {{ if (typeof fn === 'function') hooks.push(fn); }}
  }});
  try {{
    (function(noxa) {{
"#
    );
    script.push_str(source);
    script.push_str(
        r#"
    })(noxa);
  } catch (err) {
    console.error('[noxa] extension ' + id + ' failed:', err);
  }
})();"#,
    );
    script
}

/// Run registered hooks, the declared cleanup function, then remove every
/// element tagged with the plugin id and every element whose id contains a
/// declared marker.
pub fn build_unload_script(manifest: &PluginManifest) -> String {
    let id = js_string(&manifest.id);
    let cleanup = manifest
        .cleanup
        .as_deref()
        .map(js_string)
        .unwrap_or_else(|| "null".to_string());
    let markers = js_string_array(&manifest.markers);
    format!(
        r#"(function() {{
  const id = {id};
  const cleanup = {cleanup};
  const markers = {markers};
  const registry = window.__noxaExtensions || {{}};
  const entry = registry[id];
  if (entry) {{
    for (const fn of entry.hooks) {{
      try {{ fn(); }} catch (err) {{ console.error('[noxa] unload hook of ' + id + ' failed:', err); }}
    }}
    delete registry[id];
  }}
  if (cleanup && typeof window[cleanup] === 'function') {{
    try {{ window[cleanup](); }} catch (err) {{ console.error('[noxa] cleanup of ' + id + ' failed:', err); }}
  }}
  document.querySelectorAll('[data-noxa-extension="' + CSS.escape(id) + '"]').forEach((el) => el.remove());
  markers.filter((fragment) => fragment).forEach((fragment) => {{
    document.querySelectorAll('[id*="' + CSS.escape(fragment) + '"]').forEach((el) => el.remove());
  }});
}})();"#
    )
}

pub struct ExtensionLoader<S: ScriptHost> {
    host: S,
    readiness: UiReadiness,
    ready_timeout: Duration,
    loaded: Mutex<HashSet<String>>,
}

impl<S: ScriptHost> ExtensionLoader<S> {
    pub fn new(host: S, readiness: UiReadiness, ready_timeout: Duration) -> Self {
        Self {
            host,
            readiness,
            ready_timeout,
            loaded: Mutex::new(HashSet::new()),
        }
    }

    pub fn readiness(&self) -> &UiReadiness {
        &self.readiness
    }

    pub fn ready_timeout(&self) -> Duration {
        self.ready_timeout
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.loaded.lock().contains(id)
    }

    /// Inject the extension's entry script once the host UI is ready.
    /// Returns false when it was already loaded.
    pub async fn load(&self, manifest: &PluginManifest, plugin_dir: &Path) -> Result<bool, PluginError> {
        if manifest.kind != PluginKind::Extension {
            return Err(PluginError::InvalidPackage(format!(
                "{} is not an extension",
                manifest.id
            )));
        }
        if self.is_loaded(&manifest.id) {
            debug!(plugin_id = %manifest.id, "Extension already loaded");
            return Ok(false);
        }
        if manifest.entry.is_empty() || is_path_escape(&manifest.entry) {
            return Err(PluginError::InvalidPackage(format!(
                "extension {} has invalid entry \"{}\"",
                manifest.id, manifest.entry
            )));
        }

        let entry_path = plugin_dir.join(&manifest.entry);
        let source = tokio::fs::read_to_string(&entry_path).await.map_err(|e| {
            PluginError::io(format!("Failed to read extension entry {}", entry_path.display()), e)
        })?;

        self.readiness.wait(self.ready_timeout).await;

        self.host.eval(&build_load_script(manifest, &source))?;
        self.loaded.lock().insert(manifest.id.clone());
        info!(plugin_id = %manifest.id, "Loaded extension");
        Ok(true)
    }

    /// Remove the extension from the host UI. Safe to call for an extension
    /// that was never loaded.
    pub fn unload(&self, manifest: &PluginManifest) -> Result<(), PluginError> {
        self.host.eval(&build_unload_script(manifest))?;
        if self.loaded.lock().remove(&manifest.id) {
            info!(plugin_id = %manifest.id, "Unloaded extension");
        }
        Ok(())
    }

    /// Forget loaded state after the host UI document is gone.
    pub fn forget_all(&self) {
        self.loaded.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{manifest, RecordingScripts};
    use std::fs;
    use tempfile::TempDir;

    fn extension_in(dir: &TempDir, id: &str, source: &str) -> PluginManifest {
        let plugin_dir = dir.path().join(id);
        fs::create_dir_all(&plugin_dir).unwrap();
        fs::write(plugin_dir.join("main.js"), source).unwrap();
        manifest(id, PluginKind::Extension, "main.js")
    }

    fn loader(scripts: &RecordingScripts) -> ExtensionLoader<RecordingScripts> {
        let readiness = UiReadiness::new();
        readiness.mark_ready();
        ExtensionLoader::new(scripts.clone(), readiness, Duration::from_millis(50))
    }

    #[test]
    fn load_script_wraps_source_in_try() {
        let m = manifest("dark-mode", PluginKind::Extension, "main.js");
        let script = build_load_script(&m, "document.body.classList.add('dark')");
        assert!(script.contains("const id = \"dark-mode\";"));
        let body = script.find("classList.add").unwrap();
        assert!(script.find("try {").unwrap() < body);
        assert!(script.find("catch (err)").unwrap() > body);
    }

    #[test]
    fn load_script_survives_trailing_line_comment() {
        let m = manifest("x", PluginKind::Extension, "main.js");
        let script = build_load_script(&m, "run(); // trailing");
        assert!(script.contains("// trailing\n    })(noxa);"));
    }

    #[test]
    fn unload_script_uses_declared_cleanup_and_markers() {
        let mut m = manifest("theme", PluginKind::Extension, "main.js");
        m.cleanup = Some("themeTeardown".into());
        m.markers = vec!["theme-style".into()];
        let script = build_unload_script(&m);
        assert!(script.contains(r#"const cleanup = "themeTeardown";"#));
        assert!(script.contains(r#"const markers = ["theme-style"];"#));

        let bare = build_unload_script(&manifest("bare", PluginKind::Extension, "main.js"));
        assert!(bare.contains("const cleanup = null;"));
    }

    #[tokio::test]
    async fn load_injects_once() {
        let dir = TempDir::new().unwrap();
        let m = extension_in(&dir, "clock", "window.clockLoaded = true;");
        let scripts = RecordingScripts::default();
        let loader = loader(&scripts);

        assert!(loader.load(&m, &dir.path().join("clock")).await.unwrap());
        assert!(!loader.load(&m, &dir.path().join("clock")).await.unwrap());
        assert_eq!(scripts.count_containing("window.clockLoaded = true;"), 1);
        assert!(loader.is_loaded("clock"));
    }

    #[tokio::test]
    async fn unload_allows_reload() {
        let dir = TempDir::new().unwrap();
        let m = extension_in(&dir, "clock", "tick();");
        let scripts = RecordingScripts::default();
        let loader = loader(&scripts);

        loader.load(&m, &dir.path().join("clock")).await.unwrap();
        loader.unload(&m).unwrap();
        assert!(!loader.is_loaded("clock"));
        assert!(loader.load(&m, &dir.path().join("clock")).await.unwrap());
        assert_eq!(scripts.count_containing("tick();"), 2);
    }

    #[tokio::test]
    async fn missing_entry_is_error() {
        let dir = TempDir::new().unwrap();
        let m = manifest("ghost", PluginKind::Extension, "main.js");
        let scripts = RecordingScripts::default();
        let err = loader(&scripts).load(&m, &dir.path().join("ghost")).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(scripts.scripts().is_empty());
    }

    #[tokio::test]
    async fn non_extension_is_rejected() {
        let dir = TempDir::new().unwrap();
        let m = manifest("app", PluginKind::App, "index.html");
        let scripts = RecordingScripts::default();
        assert!(loader(&scripts).load(&m, dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn failed_eval_is_not_marked_loaded() {
        let dir = TempDir::new().unwrap();
        let m = extension_in(&dir, "x", "1;");
        let scripts = RecordingScripts::default();
        scripts.fail_evals(true);
        let loader = loader(&scripts);
        assert!(loader.load(&m, &dir.path().join("x")).await.is_err());
        assert!(!loader.is_loaded("x"));
    }

    #[tokio::test]
    async fn readiness_wait_times_out() {
        let readiness = UiReadiness::new();
        assert!(!readiness.wait(Duration::from_millis(20)).await);
        readiness.mark_ready();
        assert!(readiness.is_ready());
        assert!(readiness.wait(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn readiness_gives_up_once() {
        let readiness = UiReadiness::new();
        assert!(!readiness.wait(Duration::from_millis(50)).await);
        let started = std::time::Instant::now();
        assert!(!readiness.wait(Duration::from_secs(5)).await);
        assert!(started.elapsed() < Duration::from_millis(100));
        readiness.mark_ready();
        assert!(readiness.wait(Duration::from_millis(1)).await);
    }

    #[test]
    fn unload_script_only_targets_tagged_elements_and_markers() {
        let script = build_unload_script(&manifest("app", PluginKind::Extension, "main.js"));
        assert!(script.contains("data-noxa-extension"));
        assert!(!script.contains("[id].concat(markers)"));
        assert!(script.contains("const markers = [];"));
    }

    #[tokio::test]
    async fn readiness_wakes_waiters() {
        let readiness = UiReadiness::new();
        let waiter = {
            let r = readiness.clone();
            tokio::spawn(async move { r.wait(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        readiness.mark_ready();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn load_proceeds_after_timeout_when_ui_never_ready() {
        let dir = TempDir::new().unwrap();
        let m = extension_in(&dir, "late", "late();");
        let scripts = RecordingScripts::default();
        let loader = ExtensionLoader::new(scripts.clone(), UiReadiness::new(), Duration::from_millis(10));
        assert!(loader.load(&m, &dir.path().join("late")).await.unwrap());
        assert_eq!(scripts.count_containing("late();"), 1);
    }
}
