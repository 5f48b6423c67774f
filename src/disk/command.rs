//! Subprocess seam for `limactl` and `qemu-img`.
//!
//! Commands are described as plain [`Invocation`] values and executed by a
//! [`CommandRunner`]. The real runner blocks on `std::process::Command`;
//! timeouts and cancellation belong to whoever calls the reconciler.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

/// A fully-described subprocess call. Arguments stay `OsString` so host
/// paths reach the tool byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Name of the executable without its directory (`limactl`, `qemu-img`).
    pub fn program_name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// stdout followed by stderr, lossily decoded. Used for diagnostics.
    pub fn combined(&self) -> String {
        let mut s = String::from_utf8_lossy(&self.stdout).into_owned();
        s.push_str(&String::from_utf8_lossy(&self.stderr));
        s
    }
}

/// Runs an [`Invocation`] to completion.
///
/// `Err` means the process could not be started; a process that ran and
/// exited non-zero is `Ok` with `success == false`.
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        (**self).run(invocation)
    }
}

/// [`CommandRunner`] that spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        debug!(
            program = %invocation.program.display(),
            args = ?invocation.args,
            "running command"
        );

        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().cloned())
            .stdin(Stdio::null())
            .output()?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
