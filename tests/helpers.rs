//! Shared test utilities for loopimg tests.
//!
//! [`FakeHost`] stands in for the real host: it keeps a loop/mount table,
//! answers `losetup`, `findmnt` and `blkid` from it, and performs `truncate`
//! and `dd` on real files so sizes and contents can be asserted.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::rc::Rc;

use loopimg::config::Config;
use loopimg::context::Context;
use loopimg::process::{Cmd, CommandResult, Runner};
use loopimg::provision::ImageSize;
use tempfile::TempDir;

#[derive(Debug, Clone)]
pub struct FakeLoop {
    pub device: String,
    pub backing: PathBuf,
    pub mountpoint: Option<PathBuf>,
}

#[derive(Default)]
struct HostState {
    calls: Vec<Vec<String>>,
    loops: Vec<FakeLoop>,
    next_loop: u32,
    fstypes: HashMap<PathBuf, String>,
    failing: Vec<Vec<String>>,
}

/// Simulated host. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct FakeHost {
    state: Rc<RefCell<HostState>>,
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn result(code: i32, stdout: &str, stderr: &str) -> CommandResult {
    CommandResult {
        status: ExitStatus::from_raw(code << 8),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

fn ok(stdout: &str) -> CommandResult {
    result(0, stdout, "")
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every invocation of `program` exit 1.
    pub fn fail(&self, program: &str) {
        self.fail_command(&[program]);
    }

    /// Make every invocation whose argv starts with `prefix` exit 1,
    /// e.g. `["losetup", "-d"]`.
    pub fn fail_command(&self, prefix: &[&str]) {
        let prefix = prefix.iter().map(|s| s.to_string()).collect();
        self.state.borrow_mut().failing.push(prefix);
    }

    /// Pretend `image` carries a filesystem of type `fstype`.
    pub fn set_fstype(&self, image: &Path, fstype: &str) {
        self.state
            .borrow_mut()
            .fstypes
            .insert(canonical(image), fstype.to_string());
    }

    /// Attach `image` to a loop device, optionally mounted, as a dead run would leave it.
    pub fn attach(&self, image: &Path, mountpoint: Option<&Path>) -> String {
        let mut state = self.state.borrow_mut();
        let device = format!("/dev/loop{}", state.next_loop);
        state.next_loop += 1;
        state.loops.push(FakeLoop {
            device: device.clone(),
            backing: canonical(image),
            mountpoint: mountpoint.map(canonical),
        });
        device
    }

    pub fn loops_for(&self, image: &Path) -> Vec<FakeLoop> {
        let image = canonical(image);
        self.state
            .borrow()
            .loops
            .iter()
            .filter(|l| l.backing == image)
            .cloned()
            .collect()
    }

    pub fn is_attached(&self, image: &Path) -> bool {
        !self.loops_for(image).is_empty()
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state.borrow().calls.clone()
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls().into_iter().map(|argv| argv[0].clone()).collect()
    }

    pub fn ran(&self, program: &str) -> bool {
        self.programs().iter().any(|p| p == program)
    }

    pub fn calls_of(&self, program: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|argv| argv[0] == program)
            .collect()
    }

    /// Index of the first call to `program`, for ordering assertions.
    pub fn position(&self, program: &str) -> Option<usize> {
        self.programs().iter().position(|p| p == program)
    }

    fn simulate(&self, argv: &[String]) -> CommandResult {
        let mut state = self.state.borrow_mut();
        let (program, args) = (argv[0].as_str(), &argv[1..]);

        if state.failing.iter().any(|prefix| argv.starts_with(prefix)) {
            return result(1, "", &format!("{}: simulated failure", program));
        }

        match program {
            "truncate" => {
                let size: ImageSize = match args[1].parse() {
                    Ok(size) => size,
                    Err(e) => return result(1, "", &e),
                };
                let file = match fs::OpenOptions::new().write(true).create(true).open(&args[2]) {
                    Ok(f) => f,
                    Err(e) => return result(1, "", &e.to_string()),
                };
                match file.set_len(size.bytes()) {
                    Ok(()) => ok(""),
                    Err(e) => result(1, "", &e.to_string()),
                }
            }
            p if p.starts_with("mkfs.") => {
                let image = canonical(Path::new(args.last().map(String::as_str).unwrap_or("")));
                let fstype = p.trim_start_matches("mkfs.").to_string();
                state.fstypes.insert(image, fstype);
                ok("")
            }
            "mount" => {
                let (image, target) = (Path::new(&args[2]), Path::new(&args[3]));
                if !image.exists() || !target.is_dir() {
                    return result(32, "", "mount: special device does not exist");
                }
                let device = format!("/dev/loop{}", state.next_loop);
                state.next_loop += 1;
                state.loops.push(FakeLoop {
                    device,
                    backing: canonical(image),
                    mountpoint: Some(canonical(target)),
                });
                ok("")
            }
            "umount" => {
                let target = canonical(Path::new(&args[0]));
                let Some(idx) = state
                    .loops
                    .iter()
                    .position(|l| l.mountpoint.as_deref() == Some(target.as_path()))
                else {
                    return result(32, "", "umount: not mounted");
                };
                // Loop mounts auto-clear their device on umount.
                state.loops.remove(idx);
                ok("")
            }
            "losetup" if args[0] == "-j" => {
                let image = Path::new(&args[1]);
                if !image.exists() {
                    return result(1, "", "losetup: No such file or directory");
                }
                let image = canonical(image);
                let out: String = state
                    .loops
                    .iter()
                    .filter(|l| l.backing == image)
                    .map(|l| format!("{}: [2049]:1311 ({})\n", l.device, l.backing.display()))
                    .collect();
                ok(&out)
            }
            "losetup" if args[0].starts_with("/dev/") => {
                match state.loops.iter().find(|l| l.device == args[0]) {
                    Some(l) => ok(&format!("{}: [2049]:1311 ({})\n", l.device, l.backing.display())),
                    None => result(1, "", "losetup: No such device or address"),
                }
            }
            "losetup" if args[0] == "-d" => {
                match state.loops.iter().position(|l| l.device == args[1]) {
                    Some(idx) => {
                        state.loops.remove(idx);
                        ok("")
                    }
                    None => result(1, "", "losetup: No such device or address"),
                }
            }
            "findmnt" if args.iter().any(|a| a == "--mountpoint") => {
                let target = canonical(Path::new(args.last().map(String::as_str).unwrap_or("")));
                match state
                    .loops
                    .iter()
                    .find(|l| l.mountpoint.as_deref() == Some(target.as_path()))
                {
                    Some(l) => ok(&format!("{}\n", l.device)),
                    None => result(1, "", ""),
                }
            }
            "findmnt" => {
                let device = args.last().map(String::as_str).unwrap_or("");
                match state
                    .loops
                    .iter()
                    .find(|l| l.device == device)
                    .and_then(|l| l.mountpoint.clone())
                {
                    Some(target) => ok(&format!("{}\n", target.display())),
                    None => result(1, "", ""),
                }
            }
            "blkid" => {
                let image = canonical(Path::new(args.last().map(String::as_str).unwrap_or("")));
                match state.fstypes.get(&image) {
                    Some(fstype) => ok(&format!("{}\n", fstype)),
                    None => result(2, "", ""),
                }
            }
            "dd" => {
                let operand = |key: &str| {
                    args.iter()
                        .find_map(|a| a.strip_prefix(key))
                        .map(PathBuf::from)
                        .unwrap_or_default()
                };
                match fs::copy(operand("if="), operand("of=")) {
                    Ok(_) => ok(""),
                    Err(e) => result(1, "", &format!("dd: {}", e)),
                }
            }
            "id" => ok("0\n"),
            _ => ok(""),
        }
    }
}

impl Runner for FakeHost {
    fn exec(&self, cmd: Cmd) -> anyhow::Result<CommandResult> {
        let argv = cmd.argv();
        self.state.borrow_mut().calls.push(argv.clone());
        let result = self.simulate(&argv);
        cmd.check(result)
    }
}

/// Temporary artifact, scratch and mount directories wired to a [`FakeHost`].
pub struct TestEnv {
    /// Kept alive for the lifetime of the environment.
    pub _temp_dir: TempDir,
    pub artifacts: PathBuf,
    pub scratch: PathBuf,
    pub mnt: PathBuf,
    pub host: FakeHost,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base = canonical(temp_dir.path());
        let artifacts = base.join("artifacts");
        let scratch = base.join("scratch");
        let mnt = base.join("mnt");
        for dir in [&artifacts, &scratch, &mnt] {
            fs::create_dir_all(dir).expect("Failed to create test dir");
        }

        Self {
            _temp_dir: temp_dir,
            artifacts,
            scratch,
            mnt,
            host: FakeHost::new(),
        }
    }

    pub fn config(&self) -> Config {
        Config {
            artifact_dir: self.artifacts.clone(),
            scratch_dir: self.scratch.clone(),
            mount_root: self.mnt.clone(),
        }
    }

    pub fn ctx(&self) -> Context {
        Context::with_runner(&self.config(), Box::new(self.host.clone()))
    }

    /// Write an image file of `len` bytes with recognizable content.
    pub fn image(&self, path: &Path, len: usize) -> PathBuf {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create image parent");
        }
        let content: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        fs::write(path, content).expect("Failed to write image");
        path.to_path_buf()
    }
}

pub fn file_len(path: &Path) -> u64 {
    fs::metadata(path)
        .unwrap_or_else(|e| panic!("{}: {}", path.display(), e))
        .len()
}
