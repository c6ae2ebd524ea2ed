//! Plugin package (zip) inspection and extraction.
//!
//! A package carries `manifest.json` either at the archive root or one level
//! down under a single top-level folder. In the nested case that folder is
//! stripped on extraction so the manifest always lands at the plugin root.

use crate::error::PluginError;
use crate::fs_tree::write_file_creating_dirs;
use crate::manifest::{is_path_escape, PluginManifest, MANIFEST_FILE};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Archive location of the manifest and the prefix shared by the package tree.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ManifestLocation {
    index: usize,
    /// `""` for root manifests, `"folder/"` for nested ones
    prefix: String,
}

fn open_archive(path: &Path) -> Result<zip::ZipArchive<File>, PluginError> {
    let file = File::open(path)
        .map_err(|e| PluginError::io(format!("Failed to open package {}", path.display()), e))?;
    Ok(zip::ZipArchive::new(file)?)
}

/// Find the shallowest `manifest.json` at depth 0 or 1.
fn locate_manifest<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<ManifestLocation, PluginError> {
    let mut best: Option<(usize, ManifestLocation)> = None;
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().replace('\\', "/");
        let Some(prefix) = name.strip_suffix(MANIFEST_FILE) else {
            continue;
        };
        if !(prefix.is_empty() || prefix.ends_with('/')) {
            continue;
        }
        let depth = prefix.matches('/').count();
        if depth > 1 {
            continue;
        }
        if best.as_ref().is_none_or(|(d, _)| depth < *d) {
            best = Some((
                depth,
                ManifestLocation {
                    index,
                    prefix: prefix.to_string(),
                },
            ));
        }
    }
    best.map(|(_, loc)| loc).ok_or_else(|| {
        PluginError::InvalidPackage("No manifest.json found in plugin package".into())
    })
}

fn read_manifest_at<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    location: &ManifestLocation,
) -> Result<PluginManifest, PluginError> {
    let mut entry = archive.by_index(location.index)?;
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| PluginError::InvalidPackage(format!("unreadable manifest.json: {e}")))?;
    PluginManifest::from_package_json(&text)
}

/// Read and validate the manifest of a package without installing it.
pub fn read_package_manifest(path: &Path) -> Result<PluginManifest, PluginError> {
    let mut archive = open_archive(path)?;
    let location = locate_manifest(&mut archive)?;
    read_manifest_at(&mut archive, &location)
}

/// Extract the package at `archive_path` into `dest`, replacing the archived
/// manifest with `manifest`. Returns the number of files written.
pub fn extract_package(
    archive_path: &Path,
    dest: &Path,
    manifest: &PluginManifest,
) -> Result<usize, PluginError> {
    let mut archive = open_archive(archive_path)?;
    let location = locate_manifest(&mut archive)?;
    extract_entries(&mut archive, dest, &location.prefix, Some(manifest))
}

/// Extract every file of the zip at `archive_path` into `dest` as-is,
/// stripping a single wrapping folder when the manifest sits under one.
pub fn extract_all(archive_path: &Path, dest: &Path) -> Result<usize, PluginError> {
    let mut archive = open_archive(archive_path)?;
    let prefix = locate_manifest(&mut archive)
        .map(|loc| loc.prefix)
        .unwrap_or_default();
    extract_entries(&mut archive, dest, &prefix, None)
}

fn extract_entries<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    dest: &Path,
    prefix: &str,
    manifest: Option<&PluginManifest>,
) -> Result<usize, PluginError> {
    let mut written = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().replace('\\', "/");
        let Some(relative) = name.strip_prefix(prefix) else {
            debug!(entry = %name, "Skipping archive entry outside package folder");
            continue;
        };
        if relative.is_empty() || is_path_escape(relative) {
            return Err(PluginError::InvalidPackage(format!(
                "archive entry \"{name}\" escapes the plugin directory"
            )));
        }

        let target = dest.join(relative);
        match manifest {
            Some(m) if relative == MANIFEST_FILE => {
                write_file_creating_dirs(&target, m.to_pretty_json()?.as_bytes())?;
            }
            _ => {
                let mut bytes = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut bytes).map_err(|e| {
                    PluginError::InvalidPackage(format!("corrupt archive entry \"{name}\": {e}"))
                })?;
                write_file_creating_dirs(&target, &bytes)?;
            }
        }
        written += 1;
    }
    Ok(written)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    /// Write a zip containing `files` (path, content) to `path`.
    pub(crate) fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn reads_root_manifest() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("p.zip");
        write_zip(&pkg, &[("manifest.json", r#"{"id":"p","name":"P"}"#), ("index.html", "x")]);
        let m = read_package_manifest(&pkg).unwrap();
        assert_eq!(m.id, "p");
    }

    #[test]
    fn missing_manifest_is_invalid_package() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("p.zip");
        write_zip(&pkg, &[("index.html", "x")]);
        let err = read_package_manifest(&pkg).unwrap_err();
        assert!(matches!(err, PluginError::InvalidPackage(_)));
    }

    #[test]
    fn manifest_without_name_is_invalid_package() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("p.zip");
        write_zip(&pkg, &[("manifest.json", r#"{"id":"p"}"#)]);
        let err = read_package_manifest(&pkg).unwrap_err();
        assert!(err.to_string().contains("missing id or name"));
    }

    #[test]
    fn garbage_file_is_invalid_package() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("p.zip");
        fs::write(&pkg, "definitely not a zip").unwrap();
        assert!(matches!(
            read_package_manifest(&pkg).unwrap_err(),
            PluginError::InvalidPackage(_)
        ));
    }

    #[test]
    fn nested_manifest_strips_wrapping_folder() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("p.zip");
        write_zip(
            &pkg,
            &[
                ("clock/manifest.json", r#"{"id":"clock","name":"Clock"}"#),
                ("clock/assets/app.js", "js"),
            ],
        );
        let mut m = read_package_manifest(&pkg).unwrap();
        m.granted_permissions = vec!["media".into()];

        let dest = dir.path().join("out");
        let written = extract_package(&pkg, &dest, &m).unwrap();
        assert_eq!(written, 2);
        assert!(dest.join("assets/app.js").exists());
        let on_disk = PluginManifest::from_json(&fs::read_to_string(dest.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(on_disk.granted_permissions, vec!["media".to_string()]);
    }

    #[test]
    fn manifest_deeper_than_one_level_is_ignored() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("p.zip");
        write_zip(&pkg, &[("a/b/manifest.json", r#"{"id":"p","name":"P"}"#)]);
        assert!(read_package_manifest(&pkg).is_err());
    }

    #[test]
    fn traversal_entries_are_rejected() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("p.zip");
        write_zip(
            &pkg,
            &[("manifest.json", r#"{"id":"p","name":"P"}"#), ("../evil.js", "x")],
        );
        let m = read_package_manifest(&pkg).unwrap();
        let err = extract_package(&pkg, &dir.path().join("out"), &m).unwrap_err();
        assert!(matches!(err, PluginError::InvalidPackage(_)));
        assert!(!dir.path().join("evil.js").exists());
    }

    #[test]
    fn extract_all_keeps_archived_manifest() {
        let dir = TempDir::new().unwrap();
        let pkg = dir.path().join("p.zip");
        write_zip(&pkg, &[("manifest.json", r#"{"id":"p","name":"P","order":4}"#), ("main.js", "1")]);
        let dest = dir.path().join("out");
        extract_all(&pkg, &dest).unwrap();
        let m = PluginManifest::from_json(&fs::read_to_string(dest.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(m.order, 4);
        assert!(dest.join("main.js").exists());
    }
}
