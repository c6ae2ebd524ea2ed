//! Error taxonomy shared by every plugin lifecycle operation, plus the
//! `{success, error}` result shapes handed back across the UI boundary.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    /// Missing or malformed manifest, bad archive, unknown plugin type.
    #[error("Invalid plugin package: {0}")]
    InvalidPackage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport failure, timeout, excessive redirects, unexpected HTTP status.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote quota exhausted.
    #[error("Rate limit reached: {message}")]
    RateLimited {
        message: String,
        /// Unix epoch from `x-ratelimit-reset`
        reset_at: Option<u64>,
        /// Seconds from `retry-after`
        retry_after: Option<u64>,
    },

    /// Remote access denied with quota remaining (private or missing resource).
    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl PluginError {
    /// Wrap a filesystem error with the operation that failed.
    pub fn io(context: impl AsRef<str>, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(format!("{}: {err}", context.as_ref()));
        }
        Self::Io(format!("{}: {err}", context.as_ref()))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPackage(format!("malformed JSON: {err}"))
    }
}

impl From<zip::result::ZipError> for PluginError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => Self::io("archive read failed", io),
            other => Self::InvalidPackage(format!("unreadable archive: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// UI boundary results
// ---------------------------------------------------------------------------

/// `{success, error?}` returned by every mutating command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok() -> Self {
        Self { success: true, error: None }
    }
}

impl<T> From<Result<T, PluginError>> for CommandResult {
    fn from(result: Result<T, PluginError>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(e) => Self {
                success: false,
                error: Some(e.to_string()),
            },
        }
    }
}

/// `{success, manifest?, error?}` for manifest preview and archive install.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestResult<M> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<M>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<M> From<Result<M, PluginError>> for ManifestResult<M> {
    fn from(result: Result<M, PluginError>) -> Self {
        match result {
            Ok(manifest) => Self {
                success: true,
                manifest: Some(manifest),
                error: None,
            },
            Err(e) => Self {
                success: false,
                manifest: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// `{success, plugins?, error?}` for the store catalog.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogResult<P> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<P>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<P> From<Result<Vec<P>, PluginError>> for CatalogResult<P> {
    fn from(result: Result<Vec<P>, PluginError>) -> Self {
        match result {
            Ok(plugins) => Self {
                success: true,
                plugins: Some(plugins),
                error: None,
            },
            Err(e) => Self {
                success: false,
                plugins: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PermissionResult {
    pub granted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = PluginError::io(
            "read manifest",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());
        assert!(err.to_string().contains("read manifest"));
    }

    #[test]
    fn io_other_maps_to_io() {
        let err = PluginError::io(
            "write manifest",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, PluginError::Io(_)));
    }

    #[test]
    fn rate_limited_and_forbidden_messages_differ() {
        let limited = PluginError::RateLimited {
            message: "retry after 12:00:00".into(),
            reset_at: Some(1),
            retry_after: None,
        };
        let forbidden = PluginError::Forbidden("repository may be private".into());
        assert!(limited.to_string().starts_with("Rate limit reached"));
        assert!(forbidden.to_string().starts_with("Access denied"));
    }

    #[test]
    fn command_result_serialises_error_verbatim() {
        let result: CommandResult =
            Err::<(), _>(PluginError::NotFound("Plugin not found".into())).into();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Not found: Plugin not found");
    }

    #[test]
    fn command_result_ok_omits_error() {
        let json = serde_json::to_value(CommandResult::ok()).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true }));
    }
}
