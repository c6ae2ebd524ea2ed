//! Recording implementations of the windowing seams for unit tests.

use crate::error::PluginError;
use crate::extension::ScriptHost;
use crate::host::PluginObserver;
use crate::manifest::{PluginKind, PluginManifest};
use crate::runtime::{Bounds, ViewBackend, ViewSpec};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) fn manifest(id: &str, kind: PluginKind, entry: &str) -> PluginManifest {
    let mut m = PluginManifest::from_json(r#"{"name":"Test"}"#).unwrap();
    m.id = id.to_string();
    m.name = id.to_uppercase();
    m.kind = kind;
    m.entry = entry.to_string();
    m
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ViewEvent {
    Created(String),
    Placed(String, Bounds),
    Visible(String, bool),
    Destroyed(String),
}

#[derive(Debug)]
pub(crate) struct MockView {
    serial: u64,
    plugin_id: String,
}

#[derive(Default)]
struct ViewsInner {
    window: Option<(u32, u32)>,
    next_serial: u64,
    events: Vec<ViewEvent>,
    created: HashMap<String, usize>,
    live: HashMap<u64, String>,
    visible: HashMap<String, bool>,
    bounds: HashMap<String, Bounds>,
    specs: HashMap<String, ViewSpec>,
}

/// View backend that records every call instead of touching a window.
#[derive(Clone, Default)]
pub(crate) struct RecordingViews {
    inner: Arc<Mutex<ViewsInner>>,
}

impl RecordingViews {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        let views = Self::default();
        views.inner.lock().window = Some((width, height));
        views
    }

    pub(crate) fn set_window_size(&self, width: u32, height: u32) {
        self.inner.lock().window = Some((width, height));
    }

    pub(crate) fn events(&self) -> Vec<ViewEvent> {
        self.inner.lock().events.clone()
    }

    pub(crate) fn clear_events(&self) {
        self.inner.lock().events.clear();
    }

    /// How many views were ever created for `id`.
    pub(crate) fn created(&self, id: &str) -> usize {
        self.inner.lock().created.get(id).copied().unwrap_or(0)
    }

    pub(crate) fn live_count(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub(crate) fn is_live(&self, id: &str) -> bool {
        self.inner.lock().live.values().any(|v| v == id)
    }

    pub(crate) fn is_visible(&self, id: &str) -> bool {
        self.inner.lock().visible.get(id).copied().unwrap_or(false)
    }

    pub(crate) fn bounds_of(&self, id: &str) -> Option<Bounds> {
        self.inner.lock().bounds.get(id).copied()
    }

    pub(crate) fn spec_of(&self, id: &str) -> Option<ViewSpec> {
        self.inner.lock().specs.get(id).cloned()
    }
}

impl ViewBackend for RecordingViews {
    type View = MockView;

    fn create(&self, spec: &ViewSpec) -> Result<MockView, PluginError> {
        let mut inner = self.inner.lock();
        inner.next_serial += 1;
        let serial = inner.next_serial;
        let id = spec.plugin_id.clone();
        inner.events.push(ViewEvent::Created(id.clone()));
        *inner.created.entry(id.clone()).or_default() += 1;
        inner.live.insert(serial, id.clone());
        inner.visible.insert(id.clone(), false);
        inner.specs.insert(id.clone(), spec.clone());
        Ok(MockView { serial, plugin_id: id })
    }

    fn window_size(&self) -> Option<(u32, u32)> {
        self.inner.lock().window
    }

    fn place(&self, view: &MockView, bounds: Bounds) {
        let mut inner = self.inner.lock();
        inner.events.push(ViewEvent::Placed(view.plugin_id.clone(), bounds));
        inner.bounds.insert(view.plugin_id.clone(), bounds);
    }

    fn set_visible(&self, view: &MockView, visible: bool) {
        let mut inner = self.inner.lock();
        inner.events.push(ViewEvent::Visible(view.plugin_id.clone(), visible));
        inner.visible.insert(view.plugin_id.clone(), visible);
    }

    fn destroy(&self, view: MockView) {
        let mut inner = self.inner.lock();
        inner.events.push(ViewEvent::Destroyed(view.plugin_id.clone()));
        inner.live.remove(&view.serial);
        inner.visible.insert(view.plugin_id, false);
    }
}

/// Script host that keeps every evaluated script.
#[derive(Clone, Default)]
pub(crate) struct RecordingScripts {
    scripts: Arc<Mutex<Vec<String>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingScripts {
    pub(crate) fn scripts(&self) -> Vec<String> {
        self.scripts.lock().clone()
    }

    pub(crate) fn count_containing(&self, needle: &str) -> usize {
        self.scripts.lock().iter().filter(|s| s.contains(needle)).count()
    }

    pub(crate) fn fail_evals(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

impl ScriptHost for RecordingScripts {
    fn eval(&self, script: &str) -> Result<(), PluginError> {
        if *self.fail.lock() {
            return Err(PluginError::Io("host UI is gone".into()));
        }
        self.scripts.lock().push(script.to_string());
        Ok(())
    }
}

/// Observer that keeps each pushed plugin list.
#[derive(Clone, Default)]
pub(crate) struct RecordingObserver {
    pushes: Arc<Mutex<Vec<Vec<String>>>>,
}

impl RecordingObserver {
    pub(crate) fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }

    pub(crate) fn last_ids(&self) -> Option<Vec<String>> {
        self.pushes.lock().last().cloned()
    }
}

impl PluginObserver for RecordingObserver {
    fn plugins_changed(&self, plugins: &[PluginManifest]) {
        self.pushes
            .lock()
            .push(plugins.iter().map(|p| p.id.clone()).collect());
    }
}
