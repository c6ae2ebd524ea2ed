//! Directory tree helpers used by seeding and installs.
//!
//! Installs build a complete tree in a hidden staging directory next to the
//! target and swap it into place, so a half-written plugin is never listed.

use crate::error::PluginError;
use std::path::{Path, PathBuf};

/// Prefix of staging directories inside the plugins root.
pub(crate) const STAGING_PREFIX: &str = ".staging-";

/// Recursively copy `from` into `to`, creating `to` and overwriting files.
pub(crate) fn copy_dir_recursive(from: &Path, to: &Path) -> Result<(), PluginError> {
    std::fs::create_dir_all(to)
        .map_err(|e| PluginError::io(format!("Failed to create dir {}", to.display()), e))?;

    let entries = std::fs::read_dir(from)
        .map_err(|e| PluginError::io(format!("Failed to read dir {}", from.display()), e))?;

    for entry in entries {
        let entry = entry.map_err(|e| PluginError::io("Dir entry error", e))?;
        let dest = to.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| PluginError::io("File type error", e))?;

        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &dest)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &dest).map_err(|e| {
                PluginError::io(format!("Failed to copy {}", entry.path().display()), e)
            })?;
        }
    }
    Ok(())
}

/// Remove a directory tree; a missing directory is not an error.
pub(crate) fn remove_dir_if_exists(dir: &Path) -> Result<(), PluginError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PluginError::io(
            format!("Failed to remove {}", dir.display()),
            e,
        )),
    }
}

/// Write `bytes` to `path`, creating parent directories first.
pub(crate) fn write_file_creating_dirs(path: &Path, bytes: &[u8]) -> Result<(), PluginError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PluginError::io(format!("Failed to create {}", parent.display()), e))?;
    }
    std::fs::write(path, bytes)
        .map_err(|e| PluginError::io(format!("Failed to write {}", path.display()), e))
}

/// A hidden directory that becomes `{root}/{id}` on [`StagedDir::commit`] and
/// is removed if dropped uncommitted.
pub(crate) struct StagedDir {
    path: PathBuf,
    committed: bool,
}

impl StagedDir {
    pub(crate) fn create(root: &Path, id: &str) -> Result<Self, PluginError> {
        let path = root.join(format!("{STAGING_PREFIX}{id}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).map_err(|e| {
            PluginError::io(format!("Failed to create staging dir {}", path.display()), e)
        })?;
        Ok(Self {
            path,
            committed: false,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Replace `target` entirely with the staged tree.
    pub(crate) fn commit_replace(mut self, target: &Path) -> Result<(), PluginError> {
        remove_dir_if_exists(target)?;
        std::fs::rename(&self.path, target).map_err(|e| {
            PluginError::io(format!("Failed to move plugin into {}", target.display()), e)
        })?;
        self.committed = true;
        Ok(())
    }

    /// Lay the staged tree over `target`, keeping files the stage does not carry.
    pub(crate) fn commit_overlay(mut self, target: &Path) -> Result<(), PluginError> {
        if !target.exists() {
            return self.commit_replace(target);
        }
        copy_dir_recursive(&self.path, target)?;
        remove_dir_if_exists(&self.path)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedDir {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

/// Delete staging directories left behind by a crash mid-install.
pub(crate) fn sweep_stale_staging(root: &Path) {
    let Ok(entries) = std::fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
            if let Err(e) = std::fs::remove_dir_all(entry.path()) {
                tracing::warn!(path = %entry.path().display(), "Failed to sweep staging dir: {e}");
            }
        }
    }
}
