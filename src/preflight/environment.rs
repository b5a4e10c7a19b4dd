//! Host environment checks (privileges, directories).

use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::process::{Cmd, Runner, SystemRunner};

use super::CheckResult;

pub fn check_environment(config: &Config) -> Vec<CheckResult> {
    vec![
        check_root(&SystemRunner),
        check_writable("artifact dir", &config.artifact_dir),
        check_scratch(&config.scratch_dir),
        check_writable("mount root", &config.mount_root),
    ]
}

/// Loop mounting and detaching need root.
fn check_root(runner: &dyn Runner) -> CheckResult {
    match runner.exec(Cmd::new("id").arg("-u")) {
        Ok(result) if result.stdout_trimmed() == "0" => CheckResult::pass("root", "running as uid 0"),
        Ok(result) => CheckResult::fail(
            "root",
            &format!(
                "running as uid {}; mount and losetup require root",
                result.stdout_trimmed()
            ),
        ),
        Err(e) => CheckResult::warn("root", &format!("could not determine uid: {}", e)),
    }
}

fn check_writable(name: &str, dir: &Path) -> CheckResult {
    if let Err(e) = fs::create_dir_all(dir) {
        return CheckResult::fail(name, &format!("cannot create {}: {}", dir.display(), e));
    }
    let probe = dir.join(".loopimg-preflight");
    match fs::write(&probe, "test") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            CheckResult::pass(name, &dir.display().to_string())
        }
        Err(e) => CheckResult::fail(name, &format!("cannot write to {}: {}", dir.display(), e)),
    }
}

fn check_scratch(dir: &Path) -> CheckResult {
    if dir.is_dir() {
        CheckResult::pass("scratch dir", &dir.display().to_string())
    } else {
        CheckResult::warn(
            "scratch dir",
            &format!("{} does not exist; exports by name will fail", dir.display()),
        )
    }
}
