//! finch-disk configuration.
//!
//! A small TOML file (default `~/.finch/finch-disk.toml`) selects the VM
//! backend and names the registry disk. Every field has a default, so a
//! missing file or a partial file is fine:
//!
//! ```toml
//! vm_type = "vz"
//! disk_name = "finch"
//! disk_size = "50G"
//! install_root = "/Applications/Finch"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{DiskError, Result};
use crate::paths::FinchPaths;

/// Name of the registry disk. Must match `additionalDisks` in the Lima
/// instance template.
pub const DEFAULT_DISK_NAME: &str = "finch";

/// Size passed to `limactl disk create` the first time the disk is made.
pub const DEFAULT_DISK_SIZE: &str = "50G";

/// VM backend Lima runs the instance with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VmType {
    #[default]
    Qemu,
    /// Apple Virtualization.framework. Only attaches raw images.
    Vz,
    Wsl2,
}

impl VmType {
    /// Whether the backend refuses non-raw disk images.
    pub fn requires_raw(self) -> bool {
        matches!(self, VmType::Vz)
    }
}

impl fmt::Display for VmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmType::Qemu => "qemu",
            VmType::Vz => "vz",
            VmType::Wsl2 => "wsl2",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    pub vm_type: VmType,
    pub disk_name: String,
    pub disk_size: String,
    pub install_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vm_type: VmType::default(),
            disk_name: DEFAULT_DISK_NAME.to_string(),
            disk_size: DEFAULT_DISK_SIZE.to_string(),
            install_root: FinchPaths::default_install_root(),
        }
    }
}

impl Config {
    /// Deserialize from a TOML string.
    pub fn from_toml(s: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load from `path`. A missing file yields the defaults; an unreadable or
    /// malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(DiskError::Config {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        Self::from_toml(&content).map_err(|e| DiskError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}
