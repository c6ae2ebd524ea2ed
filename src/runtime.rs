//! Runtime registry: one live isolated view per enabled web/app plugin, and at
//! most one of them visible.
//!
//! The registry owns every view handle exclusively. The windowing layer is
//! reached only through [`ViewBackend`], so the bookkeeping here is identical
//! for the Tauri child webviews and the recording backend used in tests.

use crate::error::PluginError;
use crate::manifest::{is_path_escape, PluginKind, PluginManifest};
use crate::permissions::MediaAccess;
use std::collections::HashMap;
use tracing::{debug, info};

/// Rectangle in logical pixels relative to the host window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Fixed chrome around the plugin content region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentLayout {
    pub sidebar_width: u32,
    pub title_bar_height: u32,
}

impl Default for ContentLayout {
    fn default() -> Self {
        Self {
            sidebar_width: 80,
            title_bar_height: 40,
        }
    }
}

impl ContentLayout {
    /// Content region for a window of `width` x `height`.
    pub fn content_bounds(&self, width: u32, height: u32) -> Bounds {
        Bounds {
            x: i32::try_from(self.sidebar_width).unwrap_or(i32::MAX),
            y: i32::try_from(self.title_bar_height).unwrap_or(i32::MAX),
            width: width.saturating_sub(self.sidebar_width),
            height: height.saturating_sub(self.title_bar_height),
        }
    }
}

/// Where a view loads its content from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewSource {
    /// `web` plugins: an absolute http(s) URL.
    Remote(url::Url),
    /// `app` plugins: an entry file inside the plugin directory.
    Local { entry: String },
}

/// Everything a backend needs to build one isolated view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewSpec {
    pub plugin_id: String,
    pub source: ViewSource,
    pub media: MediaAccess,
}

impl ViewSpec {
    pub fn for_manifest(manifest: &PluginManifest) -> Result<Self, PluginError> {
        let source = match manifest.kind {
            PluginKind::Web => {
                let url = url::Url::parse(&manifest.entry).map_err(|e| {
                    PluginError::InvalidPackage(format!(
                        "web plugin {} has invalid entry URL \"{}\": {e}",
                        manifest.id, manifest.entry
                    ))
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(PluginError::InvalidPackage(format!(
                        "web plugin {} must use an http(s) entry URL",
                        manifest.id
                    )));
                }
                ViewSource::Remote(url)
            }
            PluginKind::App => {
                if manifest.entry.is_empty() || is_path_escape(&manifest.entry) {
                    return Err(PluginError::InvalidPackage(format!(
                        "app plugin {} has invalid entry \"{}\"",
                        manifest.id, manifest.entry
                    )));
                }
                ViewSource::Local {
                    entry: manifest.entry.clone(),
                }
            }
            PluginKind::Extension => {
                return Err(PluginError::InvalidPackage(format!(
                    "extension {} cannot be rendered as a view",
                    manifest.id
                )));
            }
        };
        Ok(Self {
            plugin_id: manifest.id.clone(),
            source,
            media: MediaAccess::from_grants(&manifest.granted_permissions),
        })
    }
}

/// Windowing operations the registry drives.
pub trait ViewBackend: Send + Sync {
    type View: Send;

    /// Build an isolated, initially hidden view.
    fn create(&self, spec: &ViewSpec) -> Result<Self::View, PluginError>;

    /// Current host window size, `None` once the window is gone.
    fn window_size(&self) -> Option<(u32, u32)>;

    fn place(&self, view: &Self::View, bounds: Bounds);

    /// Move the view in or out of the visible region and tell its content.
    fn set_visible(&self, view: &Self::View, visible: bool);

    /// Release the rendering context.
    fn destroy(&self, view: Self::View);
}

pub struct RuntimeRegistry<B: ViewBackend> {
    backend: B,
    layout: ContentLayout,
    views: HashMap<String, B::View>,
    active: Option<String>,
}

impl<B: ViewBackend> RuntimeRegistry<B> {
    pub fn new(backend: B, layout: ContentLayout) -> Self {
        Self {
            backend,
            layout,
            views: HashMap::new(),
            active: None,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn has_view(&self, id: &str) -> bool {
        self.views.contains_key(id)
    }

    pub fn view_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.views.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Create the view for `manifest` unless one already exists.
    /// Returns true when a new view was created.
    pub fn materialize(&mut self, manifest: &PluginManifest) -> Result<bool, PluginError> {
        if self.views.contains_key(&manifest.id) {
            return Ok(false);
        }
        let spec = ViewSpec::for_manifest(manifest)?;
        let view = self.backend.create(&spec)?;
        info!(plugin_id = %manifest.id, media = ?spec.media, "Materialized plugin view");
        self.views.insert(manifest.id.clone(), view);
        Ok(true)
    }

    /// Tear down and rebuild the view so updated content is loaded. Keeps the
    /// view visible if it was the active one.
    pub fn rematerialize(&mut self, manifest: &PluginManifest) -> Result<(), PluginError> {
        let was_active = self.active.as_deref() == Some(manifest.id.as_str());
        self.destroy(&manifest.id);
        self.materialize(manifest)?;
        if was_active {
            self.show(Some(&manifest.id));
        }
        Ok(())
    }

    /// Hide the active view and reveal `id`'s view. Returns true when a view
    /// is visible afterwards. Showing the already-active id only re-applies
    /// its bounds.
    pub fn show(&mut self, id: Option<&str>) -> bool {
        if let Some(id) = id
            && self.active.as_deref() == Some(id)
            && self.views.contains_key(id)
        {
            self.resize();
            return true;
        }

        if let Some(previous) = self.active.take()
            && let Some(view) = self.views.get(&previous)
        {
            debug!(plugin_id = %previous, "Hiding plugin view");
            self.backend.set_visible(view, false);
        }

        let Some(id) = id else {
            return false;
        };
        let Some(view) = self.views.get(id) else {
            return false;
        };
        if let Some((w, h)) = self.backend.window_size() {
            self.backend.place(view, self.layout.content_bounds(w, h));
        }
        self.backend.set_visible(view, true);
        self.active = Some(id.to_string());
        true
    }

    /// Re-apply the content region to the active view after a window
    /// resize or move.
    pub fn resize(&self) {
        let Some(id) = self.active.as_deref() else {
            return;
        };
        let (Some(view), Some((w, h))) = (self.views.get(id), self.backend.window_size()) else {
            return;
        };
        self.backend.place(view, self.layout.content_bounds(w, h));
    }

    /// Destroy `id`'s view. Returns true when a view existed.
    pub fn destroy(&mut self, id: &str) -> bool {
        if self.active.as_deref() == Some(id) {
            self.active = None;
        }
        match self.views.remove(id) {
            Some(view) => {
                self.backend.destroy(view);
                info!(plugin_id = %id, "Destroyed plugin view");
                true
            }
            None => false,
        }
    }

    /// Destroy every view; used when the host window closes.
    pub fn destroy_all(&mut self) {
        self.active = None;
        for (id, view) in self.views.drain() {
            debug!(plugin_id = %id, "Destroying plugin view on shutdown");
            self.backend.destroy(view);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
