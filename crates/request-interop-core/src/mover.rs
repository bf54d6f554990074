//! Moving uploaded files out of their temporary location

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Host capability that persists an uploaded file
///
/// Implementations must only move files that the upload mechanism itself
/// created, and report every failure as `false`.
pub trait FileMover {
    /// Move `from` to `to`, returning whether the move happened
    fn move_uploaded_file(&self, from: &Path, to: &Path) -> bool;
}

/// A [`FileMover`] that only moves files registered as genuine uploads
///
/// Each registered path can be moved once; a successful move forgets it.
#[derive(Debug, Default)]
pub struct RegisteredUploads {
    paths: Mutex<HashSet<PathBuf>>,
}

impl RegisteredUploads {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path as a genuine upload
    pub fn register(&self, path: impl Into<PathBuf>) {
        self.lock().insert(path.into());
    }

    /// Register a path, builder style
    pub fn with(self, path: impl Into<PathBuf>) -> Self {
        self.register(path);
        self
    }

    /// Check whether a path is registered
    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    /// Number of registered paths
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check whether no path is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        match self.paths.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for RegisteredUploads {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self {
            paths: Mutex::new(iter.into_iter().map(Into::into).collect()),
        }
    }
}

impl FileMover for RegisteredUploads {
    fn move_uploaded_file(&self, from: &Path, to: &Path) -> bool {
        let mut paths = self.lock();

        if !paths.contains(from) {
            crate::trace_debug!(from = %from.display(), "refusing to move unregistered upload");
            return false;
        }

        if !from.is_file() {
            crate::trace_debug!(from = %from.display(), "registered upload no longer exists");
            return false;
        }

        // rename fails across filesystems; fall back to copy + remove
        let moved = fs::rename(from, to)
            .or_else(|_| copy_and_remove(from, to, |path| fs::remove_file(path)));

        match moved {
            Ok(()) => {
                paths.remove(from);
                true
            }
            Err(_err) => {
                crate::trace_debug!(
                    from = %from.display(),
                    to = %to.display(),
                    error = %_err,
                    "moving upload failed"
                );
                false
            }
        }
    }
}

/// Copy `from` to `to`, then remove `from`
///
/// When `from` cannot be removed the copy is deleted again, so a failure
/// never leaves the upload in both places.
fn copy_and_remove(
    from: &Path,
    to: &Path,
    remove: impl Fn(&Path) -> io::Result<()>,
) -> io::Result<()> {
    fs::copy(from, to)?;
    remove(from).map_err(|err| {
        let _ = fs::remove_file(to);
        err
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_copy_and_remove_cleans_up_when_source_stays() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("phpXyZ789");
        let to = dir.path().join("copy.txt");
        fs::File::create(&from).unwrap().write_all(b"upload").unwrap();

        let err = copy_and_remove(&from, &to, |_| {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "busy"))
        })
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(from.exists());
        assert!(!to.exists());

        copy_and_remove(&from, &to, |path| fs::remove_file(path)).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).unwrap(), "upload");
    }

    #[test]
    fn test_moves_registered_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("phpAbC123");
        let to = dir.path().join("saved.txt");
        fs::File::create(&from).unwrap().write_all(b"upload").unwrap();

        let mover = RegisteredUploads::new().with(&from);
        assert!(mover.contains(&from));

        assert!(mover.move_uploaded_file(&from, &to));
        assert_eq!(fs::read_to_string(&to).unwrap(), "upload");
        assert!(!from.exists());
        assert!(mover.is_empty());

        // a second attempt has nothing left to move
        assert!(!mover.move_uploaded_file(&from, &to));
    }

    #[test]
    fn test_refuses_unregistered_file() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("stray");
        fs::write(&from, "stray").unwrap();

        let mover: RegisteredUploads = vec![dir.path().join("other")].into_iter().collect();
        assert!(!mover.move_uploaded_file(&from, &dir.path().join("dest")));
        assert!(from.exists());
    }

    #[test]
    fn test_failed_move_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("upload");
        fs::write(&from, "data").unwrap();

        let mover = RegisteredUploads::new().with(&from);
        let to = dir.path().join("missing-dir").join("dest");
        assert!(!mover.move_uploaded_file(&from, &to));
        assert!(mover.contains(&from));
    }
}
