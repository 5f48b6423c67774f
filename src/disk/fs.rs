//! Filesystem capabilities the reconciler depends on.
//!
//! The reconciler never calls `std::fs` directly; it goes through [`DiskFs`] so
//! tests can swap in an in-memory filesystem, including one without symlink
//! support.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Kind of a directory entry, as seen without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

/// The narrow set of filesystem operations used to reconcile the data disk.
pub trait DiskFs {
    /// Kind of the entry at `path`. Does not follow symlinks, so a dangling
    /// link still reports [`EntryKind::Symlink`].
    fn stat(&self, path: &Path) -> io::Result<EntryKind>;

    /// Move `from` to `to`, replacing any existing file at `to`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Create `path` and all missing parents.
    fn mkdir_all(&self, path: &Path) -> io::Result<()>;

    /// Remove a file or symlink.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Target of the symlink at `path`, or `None` when `path` is missing or is
    /// not a symlink.
    fn read_link_if_possible(&self, path: &Path) -> io::Result<Option<PathBuf>>;

    /// Create an alias at `link` for `original`.
    ///
    /// This is a no-op when `link` already exists, whatever it is. Callers that
    /// need to replace an entry must remove it first. Where symlinks are not
    /// available the alias degrades to a hard link, then to a copy.
    fn symlink_if_possible(&self, original: &Path, link: &Path) -> io::Result<()>;
}

impl<T: DiskFs + ?Sized> DiskFs for &T {
    fn stat(&self, path: &Path) -> io::Result<EntryKind> {
        (**self).stat(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        (**self).rename(from, to)
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        (**self).mkdir_all(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        (**self).remove(path)
    }

    fn read_link_if_possible(&self, path: &Path) -> io::Result<Option<PathBuf>> {
        (**self).read_link_if_possible(path)
    }

    fn symlink_if_possible(&self, original: &Path, link: &Path) -> io::Result<()> {
        (**self).symlink_if_possible(original, link)
    }
}

/// [`DiskFs`] backed by the host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFs;

impl DiskFs for OsFs {
    fn stat(&self, path: &Path) -> io::Result<EntryKind> {
        let ft = std::fs::symlink_metadata(path)?.file_type();
        Ok(if ft.is_symlink() {
            EntryKind::Symlink
        } else if ft.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        })
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn read_link_if_possible(&self, path: &Path) -> io::Result<Option<PathBuf>> {
        match std::fs::read_link(path) {
            Ok(target) => Ok(Some(target)),
            // EINVAL: exists but is not a symlink.
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::InvalidInput) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn symlink_if_possible(&self, original: &Path, link: &Path) -> io::Result<()> {
        if std::fs::symlink_metadata(link).is_ok() {
            debug!(link = %link.display(), "alias target occupied, leaving it in place");
            return Ok(());
        }

        let err = match platform_symlink(original, link) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(e),
            Err(e) => e,
        };

        debug!(link = %link.display(), error = %err, "symlink unavailable, trying hard link");
        if std::fs::hard_link(original, link).is_ok() {
            return Ok(());
        }

        debug!(link = %link.display(), "hard link unavailable, copying");
        std::fs::copy(original, link).map(|_| ())
    }
}

#[cfg(unix)]
fn platform_symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn platform_symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(original, link)
}

#[cfg(not(any(unix, windows)))]
fn platform_symlink(_original: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}
