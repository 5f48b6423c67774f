//! Directory layout for finch-disk.
//!
//! Every path the reconciler touches is derived from two roots:
//!
//! - Install root: where Finch ships its bundled Lima (`<install>/lima/...`)
//! - Home:         the user's home directory, holding the persistent disk
//!
//! ```text
//! <install>/lima/bin/limactl
//! <install>/lima/bin/qemu-img
//! <install>/lima/data/                          LIMA_HOME
//! <install>/lima/data/_disks/<name>/datadisk    registry slot
//! <install>/lima/data/_disks/<name>/in_use_by   lock marker
//! <home>/.finch/.disks/datadisk                 persistent disk
//! ```

use std::path::{Path, PathBuf};

const FINCH_DIR: &str = ".finch";
const PERSISTENT_DISKS_DIR: &str = ".disks";
const DATA_DISK_FILE: &str = "datadisk";
const LOCK_FILE: &str = "in_use_by";

#[cfg(target_os = "macos")]
const DEFAULT_INSTALL_ROOT: &str = "/Applications/Finch";
#[cfg(not(target_os = "macos"))]
const DEFAULT_INSTALL_ROOT: &str = "/usr/local/finch";

/// Resolved Finch path layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinchPaths {
    /// Finch installation root containing the bundled `lima/` tree.
    pub install_root: PathBuf,
    /// User home directory.
    pub home: PathBuf,
}

impl FinchPaths {
    /// Relative roots are resolved against the current directory, so every
    /// derived path (and every symlink target written from one) is absolute.
    pub fn new(install_root: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        Self {
            install_root: absolute(install_root.into()),
            home: absolute(home.into()),
        }
    }

    /// Default install root for the current platform.
    pub fn default_install_root() -> PathBuf {
        PathBuf::from(DEFAULT_INSTALL_ROOT)
    }

    /// Home directory from `$HOME`.
    pub fn home_from_env() -> Option<PathBuf> {
        std::env::var("HOME").ok().map(PathBuf::from)
    }

    /// `~/.finch`
    pub fn finch_dir(&self) -> PathBuf {
        self.home.join(FINCH_DIR)
    }

    /// Location of the persistent user-data disk.
    pub fn user_data_disk_path(&self) -> PathBuf {
        self.finch_dir()
            .join(PERSISTENT_DISKS_DIR)
            .join(DATA_DISK_FILE)
    }

    /// `LIMA_HOME` for the bundled Lima.
    pub fn lima_home(&self) -> PathBuf {
        self.install_root.join("lima").join("data")
    }

    /// Directory containing `limactl` and `qemu-img`.
    pub fn lima_bin_dir(&self) -> PathBuf {
        self.install_root.join("lima").join("bin")
    }

    pub fn limactl(&self) -> PathBuf {
        self.lima_bin_dir().join("limactl")
    }

    pub fn qemu_img(&self) -> PathBuf {
        self.lima_bin_dir().join("qemu-img")
    }

    /// Lima's private directory for the named disk.
    pub fn lima_disk_dir(&self, disk_name: &str) -> PathBuf {
        self.lima_home().join("_disks").join(disk_name)
    }

    /// Where Lima expects the disk's bytes (or a link to them).
    pub fn lima_disk_slot(&self, disk_name: &str) -> PathBuf {
        self.lima_disk_dir(disk_name).join(DATA_DISK_FILE)
    }

    /// Sentinel Lima writes while a VM session holds the disk.
    pub fn lima_disk_lock(&self, disk_name: &str) -> PathBuf {
        self.lima_disk_dir(disk_name).join(LOCK_FILE)
    }

    /// Default config file location: `~/.finch/finch-disk.toml`.
    pub fn default_config_file(home: &Path) -> PathBuf {
        home.join(FINCH_DIR).join("finch-disk.toml")
    }

    /// Directory for `FINCH_DISK_LOG` output: `~/.finch/logs`.
    pub fn log_dir(home: &Path) -> PathBuf {
        home.join(FINCH_DIR).join("logs")
    }
}

/// `std::path::absolute` only fails for an empty path or an unreadable
/// current directory; the path is kept as given in that case.
fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}
