//! Persistent user-data disk management.
//!
//! Finch keeps containerd's data on a disk image under the user's home
//! directory so it survives VM re-creation. Lima, however, only attaches disks
//! from its own registry directory. [`UserDataDiskManager`] reconciles the two:
//!
//! ```text
//! <lima-home>/_disks/finch/datadisk  ──symlink──►  ~/.finch/.disks/datadisk
//! <lima-home>/_disks/finch/in_use_by               (absent after reconcile)
//! ```
//!
//! Each step is idempotent, so a run interrupted at any point is repaired by
//! simply running again. Nothing is retried internally.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

pub mod command;
pub mod fs;
pub mod image;
pub mod registry;

#[cfg(test)]
mod testutil;

pub use command::{CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use fs::{DiskFs, EntryKind, OsFs};
pub use image::{DiskInfo, QemuImg, RAW_FORMAT};
pub use registry::LimaDisks;

use crate::config::{Config, VmType};
use crate::error::{DiskError, Result};
use crate::paths::FinchPaths;

/// Source formats a staged pre-conversion copy may carry, checked in order
/// when resuming an interrupted conversion.
const STAGED_FORMATS: &[&str] = &["qcow2", "vmdk", "vdi", "vhdx"];

/// Read-only snapshot of the disk's observed state.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DiskStatus {
    pub disk_name: String,
    pub vm_type: VmType,
    pub registry_disk_exists: bool,
    pub persistent_disk: PathBuf,
    pub persistent_disk_exists: bool,
    /// Image format of the persistent disk, when it could be inspected.
    pub format: Option<String>,
    pub slot: PathBuf,
    pub slot_target: Option<PathBuf>,
    pub linked: bool,
    pub locked: bool,
}

impl DiskStatus {
    /// Whether the backend needs raw and the inspected format is something else.
    pub fn needs_conversion(&self) -> bool {
        self.vm_type.requires_raw() && self.format.as_deref().is_some_and(|f| f != RAW_FORMAT)
    }

    /// Whether a reconcile run would find nothing to do.
    pub fn is_converged(&self) -> bool {
        self.registry_disk_exists
            && self.persistent_disk_exists
            && self.linked
            && !self.locked
            && !self.needs_conversion()
    }
}

/// Checks the user data disk configuration and fixes it when needed.
pub struct UserDataDiskManager<F, R> {
    fs: F,
    runner: R,
    paths: FinchPaths,
    vm_type: VmType,
    registry: LimaDisks,
    qemu_img: QemuImg,
}

impl<F: DiskFs, R: CommandRunner> UserDataDiskManager<F, R> {
    pub fn new(fs: F, runner: R, paths: FinchPaths, config: &Config) -> Self {
        let registry = LimaDisks::new(&paths, &config.disk_name, &config.disk_size);
        let qemu_img = QemuImg::new(paths.qemu_img());
        Self {
            fs,
            runner,
            paths,
            vm_type: config.vm_type,
            registry,
            qemu_img,
        }
    }

    pub fn paths(&self) -> &FinchPaths {
        &self.paths
    }

    /// Bring the registry disk, the persistent disk and the link between them
    /// to the converged state, then clear any stale lock.
    pub fn ensure_user_data_disk(&self) -> Result<()> {
        let disk_path = self.paths.user_data_disk_path();

        if self.registry.exists(&self.runner) {
            if self.vm_type.requires_raw() {
                // Lima converts non-raw disks itself, but through the symlink it
                // would write the raw copy into _disks/ instead of the
                // persistent location, so convert here first.
                self.ensure_raw_format(&disk_path)?;
            }

            let slot = self.registry.slot();
            let target = self
                .fs
                .read_link_if_possible(slot)
                .map_err(|e| DiskError::fs("readlink", slot, e))?;

            if target.as_deref() != Some(disk_path.as_path()) || !self.exists(&disk_path)? {
                debug!(
                    slot = %slot.display(),
                    link_target = ?target,
                    "registry slot does not point at persistent disk"
                );
                self.attach_persistent_disk()?;
            }
        } else {
            self.registry.create(&self.runner)?;
            self.attach_persistent_disk()?;
        }

        if self.registry.is_locked(&self.fs) {
            info!(
                disk = %self.registry.name(),
                marker = %self.registry.lock_marker().display(),
                "clearing stale disk lock"
            );
            self.registry.unlock(&self.runner)?;
        }

        Ok(())
    }

    /// Observe the current state without changing anything.
    pub fn status(&self) -> Result<DiskStatus> {
        let disk_path = self.paths.user_data_disk_path();
        let slot = self.registry.slot().clone();

        let persistent_disk_exists = self.exists(&disk_path)?;
        let format = if persistent_disk_exists {
            match self.qemu_img.info(&self.runner, &disk_path) {
                Ok(info) => Some(info.format),
                Err(e) => {
                    warn!(path = %disk_path.display(), error = %e, "could not inspect disk");
                    None
                }
            }
        } else {
            None
        };

        let slot_target = self
            .fs
            .read_link_if_possible(&slot)
            .map_err(|e| DiskError::fs("readlink", &slot, e))?;
        let linked = slot_target.as_deref() == Some(disk_path.as_path());

        Ok(DiskStatus {
            disk_name: self.registry.name().to_string(),
            vm_type: self.vm_type,
            registry_disk_exists: self.registry.exists(&self.runner),
            persistent_disk: disk_path,
            persistent_disk_exists,
            format,
            slot,
            slot_target,
            linked,
            locked: self.registry.is_locked(&self.fs),
        })
    }

    /// Convert the persistent disk to raw if it is in another format.
    ///
    /// The original is renamed to `<disk>.<format>` and kept. When the disk is
    /// missing but such a staged copy exists, a previous run stopped between
    /// the rename and the conversion; the conversion resumes from it.
    fn ensure_raw_format(&self, disk_path: &Path) -> Result<()> {
        let format = if self.exists(disk_path)? {
            let info = self.qemu_img.info(&self.runner, disk_path)?;
            if info.is_raw() {
                return Ok(());
            }

            let staged = staged_path(disk_path, &info.format);
            info!(
                from = %disk_path.display(),
                to = %staged.display(),
                format = %info.format,
                "staging disk for conversion to raw"
            );
            self.fs
                .rename(disk_path, &staged)
                .map_err(|e| DiskError::fs("rename", disk_path, e))?;
            info.format
        } else {
            match self.find_staged(disk_path)? {
                Some(format) => {
                    warn!(
                        path = %disk_path.display(),
                        format,
                        "persistent disk missing, resuming interrupted conversion"
                    );
                    format.to_string()
                }
                // Nothing to convert; link repair will capture the registry's disk.
                None => return Ok(()),
            }
        };

        let staged = staged_path(disk_path, &format);
        self.qemu_img
            .convert_to_raw(&self.runner, &format, &staged, disk_path)?;

        // The rename left the slot's symlink pointing at nothing it expects.
        self.attach_persistent_disk()
    }

    fn find_staged(&self, disk_path: &Path) -> Result<Option<&'static str>> {
        for &format in STAGED_FORMATS {
            if self.exists(&staged_path(disk_path, format))? {
                return Ok(Some(format));
            }
        }
        Ok(None)
    }

    /// Make the registry slot an alias of the persistent disk.
    ///
    /// The first time through, the registry's freshly created disk is moved
    /// into the persistent location.
    fn attach_persistent_disk(&self) -> Result<()> {
        let disk_path = self.paths.user_data_disk_path();
        let slot = self.registry.slot();

        if !self.exists(&disk_path)? {
            match self.fs.stat(slot) {
                Ok(EntryKind::File) => {}
                // Moving a link would make the persistent disk a link itself.
                Ok(EntryKind::Symlink) => {
                    return Err(DiskError::PersistentDiskMissing {
                        path: disk_path,
                        slot: slot.clone(),
                    });
                }
                Ok(EntryKind::Dir) => {
                    return Err(DiskError::SlotIsDirectory { path: slot.clone() });
                }
                Err(e) => return Err(DiskError::fs("stat", slot, e)),
            }

            if let Some(disks_dir) = disk_path.parent() {
                if !self.exists(disks_dir)? {
                    self.fs
                        .mkdir_all(disks_dir)
                        .map_err(|e| DiskError::fs("create persistent disk directory", disks_dir, e))?;
                }
            }

            self.fs
                .rename(slot, &disk_path)
                .map_err(|e| DiskError::fs("move data disk to persistent path", slot, e))?;
            info!(
                from = %slot.display(),
                to = %disk_path.display(),
                "moved registry disk to persistent path"
            );
        }

        // Aliasing is a no-op over an existing entry, so clear the slot first.
        if self.exists(slot)? {
            self.fs
                .remove(slot)
                .map_err(|e| DiskError::fs("remove", slot, e))?;
        }

        self.fs
            .symlink_if_possible(&disk_path, slot)
            .map_err(|e| DiskError::fs("symlink", slot, e))?;
        info!(
            slot = %slot.display(),
            persistent = %disk_path.display(),
            "linked registry slot to persistent disk"
        );
        Ok(())
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        match self.fs.stat(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DiskError::fs("stat", path, e)),
        }
    }
}

/// `<disk>.<format>`, e.g. `datadisk.qcow2`.
fn staged_path(disk_path: &Path, format: &str) -> PathBuf {
    let mut s = OsString::from(disk_path.as_os_str());
    s.push(".");
    s.push(format);
    PathBuf::from(s)
}
