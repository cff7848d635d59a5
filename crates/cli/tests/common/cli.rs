//! CLI command execution helpers with automatic timing
//!
//! Wraps the `ngate` binary, points it at a private config file, and
//! captures output plus wall-clock duration.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

/// CLI command builder with timing
pub struct NgateCommand {
    config_path: PathBuf,
    args: Vec<String>,
}

impl NgateCommand {
    /// Create a command that reads and writes `config_path`
    pub fn new(config_path: impl AsRef<Path>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    /// Add command arguments
    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    /// Execute command and return result with timing
    pub fn execute(&self) -> Result<CommandResult> {
        let start = Instant::now();

        let output = Command::new(env!("CARGO_BIN_EXE_ngate"))
            .arg("--config")
            .arg(&self.config_path)
            .args(&self.args)
            .output()
            .context("Failed to execute command")?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        })
    }

    /// Execute and assert success
    pub fn assert_success(&self) -> Result<CommandResult> {
        let result = self.execute()?;

        if !result.success() {
            anyhow::bail!(
                "Command failed (exit code: {}):\nArgs: {:?}\nStdout: {}\nStderr: {}",
                result.exit_code,
                self.args,
                result.stdout,
                result.stderr
            );
        }

        Ok(result)
    }

    /// Execute and expect failure
    pub fn assert_failure(&self) -> Result<CommandResult> {
        let result = self.execute()?;

        if result.success() {
            anyhow::bail!(
                "Command should have failed but succeeded:\nArgs: {:?}\nStdout: {}",
                self.args,
                result.stdout
            );
        }

        Ok(result)
    }
}

/// Command execution result with timing
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl CommandResult {
    /// Check if command succeeded
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Check if stdout contains text
    pub fn contains_stdout(&self, text: &str) -> bool {
        self.stdout.contains(text)
    }

    /// Check if stderr contains text
    pub fn contains_stderr(&self, text: &str) -> bool {
        self.stderr.contains(text)
    }

    /// Number of delivered calls from `ngate simulate` output
    pub fn delivered_calls(&self) -> Option<usize> {
        self.stdout
            .lines()
            .find(|line| line.contains("collapsed into"))
            .and_then(|line| line.split_whitespace().rev().nth(1))
            .and_then(|count| count.parse().ok())
    }
}

/// Macro for convenient command construction
///
/// Usage:
/// ```ignore
/// ngate!(config_path, "config", "--list").assert_success()?;
/// ```
#[macro_export]
macro_rules! ngate {
    ($config:expr, $($arg:expr),*) => {{
        let mut cmd = $crate::common::cli::NgateCommand::new($config);
        cmd.args(&[$($arg),*]);
        cmd
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivered_calls_parsing() {
        let result = CommandResult {
            stdout: "Dispatcher stats\n  fired       1\n\n✓ 10 requests collapsed into 1 calls\n"
                .to_string(),
            stderr: String::new(),
            exit_code: 0,
            duration: Duration::from_millis(10),
        };
        assert_eq!(result.delivered_calls(), Some(1));
    }
}
