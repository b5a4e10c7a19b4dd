//! Centralized command execution with consistent error handling.
//!
//! Every external tool (`mkfs.*`, `losetup`, `dd`, ...) is described with a
//! [`Cmd`] and handed to a [`Runner`]. The production runner spawns the
//! process; tests substitute a runner that simulates the host's loop and
//! mount tables.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::Path;
use std::process::{Command, ExitStatus};

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for configuring command execution.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            allow_fail: false,
            error_prefix: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Spawn the command and capture output.
    pub fn run(self) -> Result<CommandResult> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        self.check(result)
    }

    /// Apply this command's failure policy to a finished result.
    ///
    /// Non-zero exits become errors carrying the exit code and stderr,
    /// unless [`Cmd::allow_fail`] was set.
    pub fn check(self, result: CommandResult) -> Result<CommandResult> {
        if !self.allow_fail && !result.success() {
            let prefix = self
                .error_prefix
                .unwrap_or_else(|| format!("'{}' failed", self.program));

            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }

        Ok(result)
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Executes commands on behalf of the lifecycle logic.
pub trait Runner {
    fn exec(&self, cmd: Cmd) -> Result<CommandResult>;
}

/// Runs commands on the real host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl Runner for SystemRunner {
    fn exec(&self, cmd: Cmd) -> Result<CommandResult> {
        tracing::debug!(command = %cmd, "exec");
        cmd.run()
    }
}

impl<R: Runner + ?Sized> Runner for &R {
    fn exec(&self, cmd: Cmd) -> Result<CommandResult> {
        (**self).exec(cmd)
    }
}

impl<R: Runner + ?Sized> Runner for Box<R> {
    fn exec(&self, cmd: Cmd) -> Result<CommandResult> {
        (**self).exec(cmd)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_success() {
        let result = Cmd::new("echo").arg("hello").run().unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[test]
    fn test_run_failure_includes_stderr() {
        let err = Cmd::new("ls")
            .arg("/nonexistent_path_12345")
            .run()
            .unwrap_err();
        let msg = err.to_string();

        assert!(msg.contains("No such file") || msg.contains("cannot access"));
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let err = Cmd::new("nonexistent_program_12345").run().unwrap_err();
        assert!(err.to_string().contains("Is it installed?"));
    }

    #[test]
    fn test_custom_error_message() {
        let err = Cmd::new("false")
            .error_msg("umount /mnt/work failed")
            .run()
            .unwrap_err();

        assert!(err.to_string().contains("umount /mnt/work failed"));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn test_allow_fail() {
        let result = Cmd::new("false").allow_fail().run().unwrap();

        assert!(!result.success());
        assert_eq!(result.code(), 1);
    }

    #[test]
    fn test_system_runner_through_trait_object() {
        let runner: Box<dyn Runner> = Box::new(SystemRunner);
        let result = runner.exec(Cmd::new("echo").args(["one", "two"])).unwrap();
        assert_eq!(result.stdout_trimmed(), "one two");
    }

    #[test]
    fn test_display_and_argv() {
        let cmd = Cmd::new("losetup")
            .arg("-j")
            .arg_path(Path::new("/tmp/disk.img"));
        assert_eq!(cmd.to_string(), "losetup -j /tmp/disk.img");
        assert_eq!(cmd.argv(), vec!["losetup", "-j", "/tmp/disk.img"]);
        assert_eq!(cmd.program(), "losetup");
        assert_eq!(cmd.arguments().len(), 2);
    }
}
