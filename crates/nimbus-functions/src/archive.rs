//! Function archive intake: gzip-compressed tar only.
//!
//! Extraction refuses anything that could escape the working directory:
//! absolute paths, parent components, links of either kind. Structural
//! validation then checks that what was unpacked looks like a Dart
//! package at all.

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use nimbus_core::fs::is_safe_relative;
use nimbus_core::PlatformError;
use tracing::debug;

/// Extract `bytes` into `dest`, enforcing the unpacked-size cap.
pub fn extract_tar_gz(bytes: &[u8], dest: &Path, max_bytes: u64) -> Result<(), PlatformError> {
    let decoder = GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);

    let entries = archive
        .entries()
        .map_err(|e| PlatformError::InvalidArchive(format!("not a gzip tar archive: {e}")))?;

    let mut total: u64 = 0;
    for entry in entries {
        let mut entry = entry
            .map_err(|e| PlatformError::InvalidArchive(format!("corrupted archive entry: {e}")))?;

        let path = entry
            .path()
            .map_err(|e| PlatformError::InvalidArchive(format!("undecodable entry path: {e}")))?
            .into_owned();

        if !is_safe_relative(&path) {
            return Err(PlatformError::InvalidArchive(format!(
                "entry '{}' escapes the archive root",
                path.display()
            )));
        }

        let entry_type = entry.header().entry_type();
        match entry_type {
            tar::EntryType::Regular | tar::EntryType::Directory => {}
            tar::EntryType::Symlink | tar::EntryType::Link => {
                return Err(PlatformError::InvalidArchive(format!(
                    "entry '{}' is a link, links are not allowed",
                    path.display()
                )));
            }
            other => {
                return Err(PlatformError::InvalidArchive(format!(
                    "entry '{}' has unsupported type {other:?}",
                    path.display()
                )));
            }
        }

        total = total.saturating_add(entry.size());
        if total > max_bytes {
            return Err(PlatformError::InvalidArchive(format!(
                "archive exceeds the {max_bytes} byte cap when unpacked"
            )));
        }

        let target = dest.join(&path);
        if entry_type == tar::EntryType::Directory {
            std::fs::create_dir_all(&target)
                .map_err(|e| PlatformError::Internal(format!("failed to create dir: {e}")))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PlatformError::Internal(format!("failed to create dir: {e}")))?;
        }

        let mut content = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut content)
            .map_err(|e| PlatformError::InvalidArchive(format!("truncated archive: {e}")))?;
        std::fs::write(&target, content)
            .map_err(|e| PlatformError::Internal(format!("failed to write entry: {e}")))?;
    }

    debug!(bytes = total, dest = %dest.display(), "archive extracted");
    Ok(())
}

/// The extracted tree must carry a usable package manifest and at least
/// one source file; everything deeper is the synthesizer's concern.
pub fn validate_structure(dir: &Path) -> Result<(), PlatformError> {
    let manifest_path = dir.join("pubspec.yaml");
    if !manifest_path.is_file() {
        return Err(PlatformError::InvalidArchive(
            "archive has no pubspec.yaml at its root".to_string(),
        ));
    }

    let manifest = std::fs::read_to_string(&manifest_path)
        .map_err(|e| PlatformError::InvalidArchive(format!("unreadable pubspec.yaml: {e}")))?;
    let pubspec = nimbus_codegen::parse_pubspec(&manifest);
    if pubspec.name.is_none() {
        return Err(PlatformError::InvalidArchive(
            "pubspec.yaml declares no package name".to_string(),
        ));
    }
    if !pubspec.depends_on(nimbus_codegen::PLATFORM_PACKAGE) {
        return Err(PlatformError::InvalidArchive(format!(
            "pubspec.yaml does not depend on {}",
            nimbus_codegen::PLATFORM_PACKAGE
        )));
    }

    if !contains_dart_source(dir) {
        return Err(PlatformError::InvalidArchive(
            "archive contains no Dart source files".to_string(),
        ));
    }

    Ok(())
}

fn contains_dart_source(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if contains_dart_source(&path) {
                return true;
            }
        } else if path.extension().map(|e| e == "dart").unwrap_or(false) {
            return true;
        }
    }
    false
}
