//! `qemu-img` wrappers: format inspection and conversion to raw.

use std::path::{Path, PathBuf};

use tracing::info;

use super::command::{CommandRunner, Invocation};
use crate::error::{DiskError, Result};

pub const RAW_FORMAT: &str = "raw";

/// Output of `qemu-img info --output=json`. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiskInfo {
    pub virtual_size: u64,
    pub filename: String,
    pub format: String,
    #[serde(default)]
    pub actual_size: u64,
    #[serde(default)]
    pub dirty_flag: bool,
}

impl DiskInfo {
    pub fn is_raw(&self) -> bool {
        self.format == RAW_FORMAT
    }
}

#[derive(Debug, Clone)]
pub struct QemuImg {
    binary: PathBuf,
}

impl QemuImg {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Inspect the image at `path`.
    pub fn info(&self, runner: &impl CommandRunner, path: &Path) -> Result<DiskInfo> {
        let inv = Invocation::new(&self.binary)
            .arg("info")
            .arg("--output=json")
            .path_arg(path);

        let out = runner.run(&inv).map_err(|source| DiskError::Spawn {
            program: self.binary.clone(),
            source,
        })?;
        if !out.success {
            return Err(DiskError::Inspect {
                path: path.to_path_buf(),
                output: out.combined(),
            });
        }

        serde_json::from_slice(&out.stdout).map_err(|source| DiskError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write a raw copy of `src` (in `src_format`) to `dst`.
    pub fn convert_to_raw(
        &self,
        runner: &impl CommandRunner,
        src_format: &str,
        src: &Path,
        dst: &Path,
    ) -> Result<()> {
        let inv = Invocation::new(&self.binary)
            .arg("convert")
            .arg("-f")
            .arg(src_format)
            .arg("-O")
            .arg(RAW_FORMAT)
            .path_arg(src)
            .path_arg(dst);

        let out = runner.run(&inv).map_err(|source| DiskError::Spawn {
            program: self.binary.clone(),
            source,
        })?;
        if !out.success {
            return Err(DiskError::Convert {
                path: dst.to_path_buf(),
                format: src_format.to_string(),
                output: out.combined(),
            });
        }

        info!(
            src = %src.display(),
            dst = %dst.display(),
            format = src_format,
            "converted disk to raw"
        );
        Ok(())
    }
}
