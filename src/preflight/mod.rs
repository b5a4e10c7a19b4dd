//! Preflight checks for image lifecycle operations.
//!
//! Verifies the external tools and host permissions the lifecycle relies on
//! before any image is touched. Run with `loopimg preflight`.

mod environment;
mod host_tools;

use anyhow::{bail, Result};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    /// The corresponding operation will fail.
    Fail,
    /// Only some filesystems or features are affected.
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, details: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            status,
            details: details.map(String::from),
        }
    }

    pub fn pass(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Pass, Some(details))
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Fail, Some(details))
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Warn, Some(details))
    }
}

pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    pub fn all_passed(&self) -> bool {
        self.count(CheckStatus::Fail) == 0
    }

    pub fn fail_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");
        for check in &self.checks {
            let tag = match check.status {
                CheckStatus::Pass => "[OK]  ",
                CheckStatus::Fail => "[FAIL]",
                CheckStatus::Warn => "[WARN]",
            };
            match &check.details {
                Some(details) => println!("  {} {}: {}", tag, check.name, details),
                None => println!("  {} {}", tag, check.name),
            }
        }

        println!();
        println!(
            "Summary: {}/{} passed",
            self.count(CheckStatus::Pass),
            self.checks.len()
        );
        if self.fail_count() > 0 {
            println!("         {} FAILED", self.fail_count());
        }
        let warned = self.count(CheckStatus::Warn);
        if warned > 0 {
            println!("         {} warnings", warned);
        }
    }
}

/// Run all preflight checks.
pub fn run_preflight(config: &Config) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Checking host tools...");
    checks.extend(host_tools::check_host_tools());

    println!("Checking environment...");
    checks.extend(environment::check_environment(config));

    println!();
    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(config: &Config) -> Result<()> {
    let report = run_preflight(config);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above first.",
            report.fail_count()
        );
    }

    println!("All preflight checks passed!\n");
    Ok(())
}
