//! Capability allow-list for isolated plugin views.
//!
//! Only media capture can ever be granted to a view; every other permission
//! request is denied. `media` covers both devices, `microphone` and `camera`
//! each cover themselves and, for a generic `media` request, either suffices.

use serde::Serialize;

pub const MEDIA: &str = "media";
pub const MICROPHONE: &str = "microphone";
pub const CAMERA: &str = "camera";

fn has(granted: &[String], name: &str) -> bool {
    granted.iter().any(|g| g == name)
}

/// Media devices a view may open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MediaAccess {
    pub microphone: bool,
    pub camera: bool,
}

impl MediaAccess {
    pub fn from_grants(granted: &[String]) -> Self {
        let media = has(granted, MEDIA);
        Self {
            microphone: media || has(granted, MICROPHONE),
            camera: media || has(granted, CAMERA),
        }
    }

    pub fn any(self) -> bool {
        self.microphone || self.camera
    }
}

/// Decide a permission request raised by an isolated view.
pub fn decide(granted: &[String], requested: &str) -> bool {
    let access = MediaAccess::from_grants(granted);
    match requested {
        MEDIA => access.any(),
        MICROPHONE => access.microphone,
        CAMERA => access.camera,
        _ => false,
    }
}

/// Initialization script installed in every isolated view before its content
/// runs. Denies web permission APIs and rejects `getUserMedia` for devices the
/// plugin was not granted. Exposes `window.__noxaVisibility` for show/hide.
pub fn view_gate_script(plugin_id: &str, access: MediaAccess) -> String {
    let id = serde_json::to_string(plugin_id).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"(function() {{
  const pluginId = {id};
  const allowMic = {mic};
  const allowCam = {cam};
  const deny = (what) => Promise.reject(new DOMException(what + ' denied for plugin ' + pluginId, 'NotAllowedError'));
  const md = navigator.mediaDevices;
  if (md && md.getUserMedia) {{
    const original = md.getUserMedia.bind(md);
    md.getUserMedia = function(constraints) {{
      constraints = constraints || {{}};
      if (constraints.audio && !allowMic) return deny('microphone');
      if (constraints.video && !allowCam) return deny('camera');
      return original(constraints);
    }};
  }}
  if (md && md.getDisplayMedia) md.getDisplayMedia = () => deny('display-capture');
  if (navigator.permissions && navigator.permissions.query) {{
    const query = navigator.permissions.query.bind(navigator.permissions);
    navigator.permissions.query = function(desc) {{
      const name = desc && desc.name;
      if ((name === 'microphone' && allowMic) || (name === 'camera' && allowCam)) return query(desc);
      return Promise.resolve({{ state: 'denied', name: name, onchange: null }});
    }};
  }}
  if (navigator.geolocation) {{
    const fail = (_ok, err) => err && err({{ code: 1, message: 'denied' }});
    navigator.geolocation.getCurrentPosition = fail;
    navigator.geolocation.watchPosition = (ok, err) => {{ fail(ok, err); return 0; }};
  }}
  if (window.Notification) {{
    window.Notification.requestPermission = () => Promise.resolve('denied');
  }}
  if (navigator.clipboard && navigator.clipboard.readText) {{
    navigator.clipboard.readText = () => deny('clipboard-read');
  }}
  window.__noxaVisibility = function(visible) {{
    if (document.body) document.body.style.opacity = visible ? '1' : '0';
    document.dispatchEvent(new CustomEvent('noxa:visibility', {{ detail: {{ visible: visible }} }}));
  }};
}})();"#,
        mic = access.microphone,
        cam = access.camera,
    )
}
