//! Error types for finch-disk.
//!
//! Messages follow the `"<operation> failed: <context>"` form, lowercase, and
//! always name the disk or path involved so a single error line is enough to
//! diagnose which step of the reconciliation stopped.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using finch-disk's error type.
pub type Result<T> = std::result::Result<T, DiskError>;

/// Errors surfaced by the user-data disk reconciler and its collaborators.
#[derive(Error, Debug)]
pub enum DiskError {
    // ========================================================================
    // Registry (limactl) errors
    // ========================================================================
    /// A `limactl disk ...` command exited non-zero.
    #[error("disk {op} failed: {name}, debug logs:\n{output}")]
    Registry {
        /// Subcommand that failed (`create`, `unlock`).
        op: &'static str,
        /// Registry disk name.
        name: String,
        /// Combined stdout/stderr of the command.
        output: String,
    },

    // ========================================================================
    // Image tool (qemu-img) errors
    // ========================================================================
    /// `qemu-img info` exited non-zero.
    #[error("disk info failed: {}: {output}", path.display())]
    Inspect { path: PathBuf, output: String },

    /// `qemu-img info` printed something that is not the expected JSON.
    #[error("disk info decode failed: {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// `qemu-img convert` exited non-zero.
    #[error("disk conversion failed: {} from {format} to raw: {output}", path.display())]
    Convert {
        path: PathBuf,
        format: String,
        output: String,
    },

    // ========================================================================
    // Process and filesystem errors
    // ========================================================================
    /// A collaborator binary could not be started at all.
    #[error("process launch failed: {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A filesystem operation failed.
    #[error("{op} failed: {}: {source}", path.display())]
    Fs {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persistent disk is gone and the slot holds only a link to it, so
    /// there are no bytes left to capture.
    #[error(
        "persistent disk not found: {} (registry slot {} is a dangling link)",
        path.display(),
        slot.display()
    )]
    PersistentDiskMissing { path: PathBuf, slot: PathBuf },

    /// The registry slot is a directory, which cannot become the disk image.
    #[error("capture data disk failed: registry slot {} is a directory", path.display())]
    SlotIsDirectory { path: PathBuf },

    // ========================================================================
    // Configuration errors
    // ========================================================================
    /// The config file exists but could not be read or parsed.
    #[error("config load failed: {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },
}

impl DiskError {
    /// Wrap an `io::Error` from a filesystem operation on `path`.
    pub fn fs(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Fs {
            op,
            path: path.into(),
            source,
        }
    }
}
