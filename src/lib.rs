//! finch-disk: keeps Finch's persistent user-data disk attached to Lima.
//!
//! See [`disk::UserDataDiskManager`] for the reconciliation itself.

pub mod config;
pub mod disk;
pub mod error;
pub mod logging;
pub mod paths;

pub use config::{Config, VmType};
pub use disk::{DiskStatus, UserDataDiskManager};
pub use error::{DiskError, Result};
pub use paths::FinchPaths;
