//! In-memory doubles for reconciler tests.
//!
//! [`MemFs`] stores files whose content is the image format they hold
//! (`"raw"`, `"qcow2"`), which lets [`FakeTools`] answer `qemu-img info` and
//! perform `qemu-img convert` without real images.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use super::command::{CommandOutput, CommandRunner, Invocation};
use super::fs::{DiskFs, EntryKind};
use crate::paths::FinchPaths;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Content is the image format.
    File(String),
    Dir,
    Symlink(PathBuf),
}

/// Mutating calls made through the [`DiskFs`] interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsOp {
    Rename(PathBuf, PathBuf),
    MkdirAll(PathBuf),
    Remove(PathBuf),
    Symlink(PathBuf, PathBuf),
}

pub struct MemFs {
    nodes: RefCell<BTreeMap<PathBuf, Node>>,
    ops: RefCell<Vec<FsOp>>,
    symlinks: bool,
}

fn not_found() -> io::Error {
    io::Error::from(io::ErrorKind::NotFound)
}

impl MemFs {
    pub fn new() -> Self {
        Self {
            nodes: RefCell::new(BTreeMap::new()),
            ops: RefCell::new(Vec::new()),
            symlinks: true,
        }
    }

    /// A filesystem where aliases degrade to copies.
    pub fn without_symlinks() -> Self {
        Self {
            symlinks: false,
            ..Self::new()
        }
    }

    pub fn node(&self, path: &Path) -> Option<Node> {
        self.nodes.borrow().get(path).cloned()
    }

    /// Place a node directly, creating parent directories. Not recorded.
    pub fn put(&self, path: &Path, node: Node) {
        let mut nodes = self.nodes.borrow_mut();
        for dir in path.ancestors().skip(1) {
            if dir.as_os_str().is_empty() || dir == Path::new("/") {
                break;
            }
            nodes.entry(dir.to_path_buf()).or_insert(Node::Dir);
        }
        nodes.insert(path.to_path_buf(), node);
    }

    pub fn file(&self, path: &Path, format: &str) {
        self.put(path, Node::File(format.to_string()));
    }

    /// Content of the file at `path`, following symlinks.
    pub fn read(&self, path: &Path) -> Option<String> {
        let mut current = path.to_path_buf();
        for _ in 0..8 {
            match self.node(&current)? {
                Node::File(content) => return Some(content),
                Node::Dir => return None,
                Node::Symlink(target) => current = target,
            }
        }
        None
    }

    pub fn ops(&self) -> Vec<FsOp> {
        self.ops.borrow().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.borrow_mut().clear();
    }

    pub fn count_ops(&self, pred: impl Fn(&FsOp) -> bool) -> usize {
        self.ops.borrow().iter().filter(|op| pred(op)).count()
    }

    fn parent_exists(&self, path: &Path) -> bool {
        match path.parent() {
            None => true,
            Some(p) if p.as_os_str().is_empty() || p == Path::new("/") => true,
            Some(p) => matches!(self.node(p), Some(Node::Dir)),
        }
    }

    fn record(&self, op: FsOp) {
        self.ops.borrow_mut().push(op);
    }
}

impl DiskFs for MemFs {
    fn stat(&self, path: &Path) -> io::Result<EntryKind> {
        match self.node(path) {
            Some(Node::File(_)) => Ok(EntryKind::File),
            Some(Node::Dir) => Ok(EntryKind::Dir),
            Some(Node::Symlink(_)) => Ok(EntryKind::Symlink),
            None => Err(not_found()),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        if !self.parent_exists(to) {
            return Err(not_found());
        }
        let node = self.nodes.borrow_mut().remove(from).ok_or_else(not_found)?;
        self.nodes.borrow_mut().insert(to.to_path_buf(), node);
        self.record(FsOp::Rename(from.to_path_buf(), to.to_path_buf()));
        Ok(())
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        self.put(path, Node::Dir);
        self.record(FsOp::MkdirAll(path.to_path_buf()));
        Ok(())
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.nodes.borrow_mut().remove(path).ok_or_else(not_found)?;
        self.record(FsOp::Remove(path.to_path_buf()));
        Ok(())
    }

    fn read_link_if_possible(&self, path: &Path) -> io::Result<Option<PathBuf>> {
        Ok(match self.node(path) {
            Some(Node::Symlink(target)) => Some(target),
            _ => None,
        })
    }

    fn symlink_if_possible(&self, original: &Path, link: &Path) -> io::Result<()> {
        if self.node(link).is_some() {
            return Ok(());
        }
        if !self.parent_exists(link) {
            return Err(not_found());
        }
        let node = if self.symlinks {
            Node::Symlink(original.to_path_buf())
        } else {
            Node::File(self.read(original).ok_or_else(not_found)?)
        };
        self.nodes.borrow_mut().insert(link.to_path_buf(), node);
        self.record(FsOp::Symlink(original.to_path_buf(), link.to_path_buf()));
        Ok(())
    }
}

/// Simulated `limactl` and `qemu-img` operating on a [`MemFs`].
pub struct FakeTools<'a> {
    fs: &'a MemFs,
    paths: FinchPaths,
    disk_name: String,
    pub registry_has_disk: Cell<bool>,
    /// Name reported by `disk ls`; defaults to the queried name.
    pub listed_name: RefCell<Option<String>>,
    pub fail_create: Cell<bool>,
    pub fail_unlock: Cell<bool>,
    pub fail_info: Cell<bool>,
    pub fail_convert: Cell<bool>,
    /// Replaces the `qemu-img info` JSON.
    pub info_stdout: RefCell<Option<String>>,
    calls: RefCell<Vec<Invocation>>,
}

impl<'a> FakeTools<'a> {
    pub fn new(fs: &'a MemFs, paths: &FinchPaths, disk_name: &str) -> Self {
        Self {
            fs,
            paths: paths.clone(),
            disk_name: disk_name.to_string(),
            registry_has_disk: Cell::new(false),
            listed_name: RefCell::new(None),
            fail_create: Cell::new(false),
            fail_unlock: Cell::new(false),
            fail_info: Cell::new(false),
            fail_convert: Cell::new(false),
            info_stdout: RefCell::new(None),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Number of calls whose program and leading arguments match, e.g.
    /// `count("limactl", &["disk", "create"])`.
    pub fn count(&self, program: &str, prefix: &[&str]) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| {
                c.program_name() == program
                    && c.args.len() >= prefix.len()
                    && c.args.iter().zip(prefix).all(|(a, p)| a == p)
            })
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    fn limactl(&self, args: &[OsString]) -> CommandOutput {
        let args = utf8_args(args);
        match args.as_slice() {
            ["disk", "ls", name, "--json"] if *name == self.disk_name => {
                if !self.registry_has_disk.get() {
                    return failed(&format!("level=fatal msg=\"disk {name} does not exist\""));
                }
                let listed = self
                    .listed_name
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| name.to_string());
                ok(&format!("{{\"name\":\"{listed}\",\"size\":53687091200,\"format\":\"raw\"}}\n"))
            }
            ["disk", "create", name, "--size", _, "--format", format] => {
                if self.fail_create.get() {
                    return failed("level=fatal msg=\"failed to create disk\"");
                }
                self.registry_has_disk.set(true);
                self.fs.file(&self.paths.lima_disk_slot(name), format);
                ok("")
            }
            ["disk", "unlock", name] => {
                if self.fail_unlock.get() {
                    return failed("level=fatal msg=\"instance is running\"");
                }
                self.fs
                    .nodes
                    .borrow_mut()
                    .remove(&self.paths.lima_disk_lock(name));
                ok("")
            }
            other => failed(&format!("unexpected limactl args: {other:?}")),
        }
    }

    fn qemu_img(&self, args: &[OsString]) -> CommandOutput {
        let args = utf8_args(args);
        match args.as_slice() {
            ["info", "--output=json", path] => {
                if self.fail_info.get() {
                    return failed("qemu-img: Could not open: Permission denied");
                }
                if let Some(stdout) = self.info_stdout.borrow().clone() {
                    return ok(&stdout);
                }
                match self.fs.read(Path::new(path)) {
                    Some(format) => ok(&format!(
                        "{{\"virtual-size\":53687091200,\"filename\":\"{path}\",\"format\":\"{format}\",\"actual-size\":4096,\"dirty-flag\":false}}"
                    )),
                    None => failed(&format!("qemu-img: Could not open '{path}'")),
                }
            }
            ["convert", "-f", from, "-O", "raw", src, dst] => {
                if self.fail_convert.get() {
                    return failed("qemu-img: error while writing: No space left on device");
                }
                match self.fs.read(Path::new(src)) {
                    Some(content) if content == *from => {
                        self.fs.file(Path::new(dst), "raw");
                        ok("")
                    }
                    _ => failed(&format!("qemu-img: Could not open '{src}'")),
                }
            }
            other => failed(&format!("unexpected qemu-img args: {other:?}")),
        }
    }
}

impl CommandRunner for FakeTools<'_> {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        self.calls.borrow_mut().push(invocation.clone());
        Ok(match invocation.program_name() {
            "limactl" => self.limactl(&invocation.args),
            "qemu-img" => self.qemu_img(&invocation.args),
            _ => return Err(not_found()),
        })
    }
}

fn utf8_args(args: &[OsString]) -> Vec<&str> {
    args.iter().map(|a| a.to_str().unwrap_or_default()).collect()
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        success: true,
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

fn failed(stderr: &str) -> CommandOutput {
    CommandOutput {
        success: false,
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}
