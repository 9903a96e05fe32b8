//! Filesystem port: scoped directories, atomic writes, path hygiene.
//!
//! Every path handed to the container runtime must be absolute and
//! normalized; every directory the platform creates for a build or an
//! invocation must be removed on all exit paths, including panics. The
//! guards in this module own that invariant.

use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Create `path` and all missing parents.
pub async fn ensure_dir(path: &Path) -> io::Result<()> {
    tokio::fs::create_dir_all(path).await
}

/// Write `bytes` to `path` atomically: the content lands in a sibling temp
/// file first and is renamed into place, so readers never observe a
/// partial file.
pub async fn write_file_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        Uuid::new_v4().simple()
    ));

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await
}

pub async fn read_to_string(path: &Path) -> io::Result<String> {
    tokio::fs::read_to_string(path).await
}

pub async fn read_bytes(path: &Path) -> io::Result<Vec<u8>> {
    tokio::fs::read(path).await
}

/// Remove a directory tree; a missing tree is not an error.
pub async fn remove_tree(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Reject any path that could escape its root once joined: absolute paths,
/// `..` components, or drive prefixes.
pub fn is_safe_relative(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Normalize `path` to an absolute form without touching the filesystem:
/// `.` and `..` components are resolved lexically.
pub fn absolutize(path: &Path) -> io::Result<PathBuf> {
    let base = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir()?
    };
    let mut out = base;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// A directory that is removed when the guard is dropped, on every exit
/// path. Used for per-invocation shared directories, which live under the
/// functions root rather than the system temp dir.
#[derive(Debug)]
pub struct ScopedDir {
    path: PathBuf,
    disarmed: bool,
}

impl ScopedDir {
    /// Create `path` (and parents) and take ownership of its removal.
    pub async fn create(path: PathBuf) -> io::Result<Self> {
        ensure_dir(&path).await?;
        Ok(Self {
            path,
            disarmed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the directory on disk instead of removing it on drop.
    pub fn keep(mut self) -> PathBuf {
        self.disarmed = true;
        self.path.clone()
    }

    /// Remove the directory now rather than waiting for drop.
    pub async fn close(mut self) -> io::Result<()> {
        self.disarmed = true;
        remove_tree(&self.path).await
    }
}

impl Drop for ScopedDir {
    fn drop(&mut self) {
        if self.disarmed {
            return;
        }
        // Synchronous removal: drop must clean up even during unwinding,
        // where no executor is guaranteed to be running.
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove scoped dir");
            }
        }
    }
}

/// A temp directory under the system temp root, removed on drop. Thin
/// wrapper over `tempfile` so callers stay on the port instead of the
/// crate.
pub fn temp_dir(prefix: &str) -> io::Result<tempfile::TempDir> {
    tempfile::Builder::new().prefix(prefix).tempdir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_replaces_content() {
        let dir = temp_dir("nimbus-fs-test").unwrap();
        let target = dir.path().join("result.json");

        write_file_atomic(&target, b"{\"a\":1}").await.unwrap();
        write_file_atomic(&target, b"{\"a\":2}").await.unwrap();

        let content = read_to_string(&target).await.unwrap();
        assert_eq!(content, "{\"a\":2}");

        // No temp droppings left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn scoped_dir_removes_tree_on_drop() {
        let root = temp_dir("nimbus-fs-test").unwrap();
        let target = root.path().join("inv-1");
        {
            let scoped = ScopedDir::create(target.clone()).await.unwrap();
            write_file_atomic(&scoped.path().join("request.json"), b"{}")
                .await
                .unwrap();
            assert!(target.exists());
        }
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn scoped_dir_keep_disarms_removal() {
        let root = temp_dir("nimbus-fs-test").unwrap();
        let target = root.path().join("inv-2");
        let kept = {
            let scoped = ScopedDir::create(target.clone()).await.unwrap();
            scoped.keep()
        };
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn remove_tree_tolerates_missing() {
        let root = temp_dir("nimbus-fs-test").unwrap();
        remove_tree(&root.path().join("never-created"))
            .await
            .unwrap();
    }

    #[test]
    fn safe_relative_rejects_escapes() {
        assert!(is_safe_relative(Path::new("lib/handler.dart")));
        assert!(is_safe_relative(Path::new("./pubspec.yaml")));
        assert!(!is_safe_relative(Path::new("/etc/passwd")));
        assert!(!is_safe_relative(Path::new("../outside")));
        assert!(!is_safe_relative(Path::new("lib/../../outside")));
        assert!(!is_safe_relative(Path::new("")));
    }

    #[test]
    fn absolutize_resolves_lexically() {
        let path = absolutize(Path::new("/data/functions/../functions/./f1")).unwrap();
        assert_eq!(path, PathBuf::from("/data/functions/f1"));
    }
}
