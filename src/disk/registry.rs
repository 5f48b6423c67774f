//! Lima disk registry wrappers (`limactl disk ...`) and the lock marker probe.

use std::path::PathBuf;

use tracing::{debug, info};

use super::command::{CommandRunner, Invocation};
use super::fs::DiskFs;
use crate::error::{DiskError, Result};
use crate::paths::FinchPaths;

/// One entry of `limactl disk ls --json`. Lima prints more fields; only the
/// name is needed.
#[derive(Debug, Clone, serde::Deserialize)]
struct DiskListing {
    name: String,
}

/// A named disk in the Lima registry.
#[derive(Debug, Clone)]
pub struct LimaDisks {
    limactl: PathBuf,
    lima_home: PathBuf,
    name: String,
    size: String,
    slot: PathBuf,
    lock: PathBuf,
}

impl LimaDisks {
    pub fn new(paths: &FinchPaths, name: &str, size: &str) -> Self {
        Self {
            limactl: paths.limactl(),
            lima_home: paths.lima_home(),
            name: name.to_string(),
            size: size.to_string(),
            slot: paths.lima_disk_slot(name),
            lock: paths.lima_disk_lock(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path where Lima expects the disk's bytes.
    pub fn slot(&self) -> &PathBuf {
        &self.slot
    }

    /// Path of the `in_use_by` lock marker.
    pub fn lock_marker(&self) -> &PathBuf {
        &self.lock
    }

    fn limactl(&self) -> Invocation {
        Invocation::new(&self.limactl).env("LIMA_HOME", self.lima_home.as_os_str())
    }

    /// Whether the registry knows a disk with this name.
    ///
    /// A failed query or undecodable output counts as "does not exist":
    /// creating the disk is the only recovery either way.
    pub fn exists(&self, runner: &impl CommandRunner) -> bool {
        let inv = self
            .limactl()
            .arg("disk")
            .arg("ls")
            .arg(&self.name)
            .arg("--json");

        let out = match runner.run(&inv) {
            Ok(out) if out.success => out,
            Ok(out) => {
                debug!(disk = %self.name, output = %out.combined().trim(), "disk ls failed");
                return false;
            }
            Err(e) => {
                debug!(disk = %self.name, error = %e, "disk ls could not run");
                return false;
            }
        };

        // limactl emits one JSON object per line.
        let found = serde_json::Deserializer::from_slice(&out.stdout)
            .into_iter::<DiskListing>()
            .map_while(|entry| entry.ok())
            .any(|entry| entry.name == self.name);

        debug!(disk = %self.name, found, "queried registry");
        found
    }

    /// `limactl disk create <name> --size <size> --format raw`
    pub fn create(&self, runner: &impl CommandRunner) -> Result<()> {
        let inv = self
            .limactl()
            .arg("disk")
            .arg("create")
            .arg(&self.name)
            .arg("--size")
            .arg(&self.size)
            .arg("--format")
            .arg("raw");

        self.run_checked(runner, &inv, "create")?;
        info!(disk = %self.name, size = %self.size, "created registry disk");
        Ok(())
    }

    /// `limactl disk unlock <name>`
    pub fn unlock(&self, runner: &impl CommandRunner) -> Result<()> {
        let inv = self.limactl().arg("disk").arg("unlock").arg(&self.name);

        self.run_checked(runner, &inv, "unlock")?;
        info!(disk = %self.name, "unlocked registry disk");
        Ok(())
    }

    /// Whether a previous VM session left the disk marked in use.
    pub fn is_locked(&self, fs: &impl DiskFs) -> bool {
        fs.stat(&self.lock).is_ok()
    }

    fn run_checked(
        &self,
        runner: &impl CommandRunner,
        inv: &Invocation,
        op: &'static str,
    ) -> Result<()> {
        let out = runner.run(inv).map_err(|source| DiskError::Spawn {
            program: inv.program.clone(),
            source,
        })?;

        if !out.success {
            return Err(DiskError::Registry {
                op,
                name: self.name.clone(),
                output: out.combined(),
            });
        }
        Ok(())
    }
}
