//! External tool invocation.
//!
//! Every stage reaches its external tool (demosaic engine, converter,
//! metadata tool) through the [`ToolRunner`] trait, so tests can substitute a
//! recording fake. The production [`CommandRunner`] is a blocking
//! `std::process::Command` wrapper.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{Error, Result};

/// One external tool invocation, fully described.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Program to execute.
    pub program: PathBuf,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Redirect stdout into this file (dcraw emits its TIFF on stdout).
    pub stdout_to: Option<PathBuf>,
}

impl ToolCommand {
    /// Starts a command for `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdout_to: None,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends a path argument.
    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Redirects stdout into `path`.
    pub fn stdout_to(mut self, path: &Path) -> Self {
        self.stdout_to = Some(path.to_path_buf());
        self
    }

    /// Command line for logging.
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Returns `true` if any argument equals `flag`.
    pub fn has_arg(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// Returns the argument following the first occurrence of `flag`.
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        let pos = self.args.iter().position(|a| a == flag)?;
        self.args.get(pos + 1).map(String::as_str)
    }
}

/// Result of one tool invocation.
///
/// Raw decoders routinely chatter on stderr and exit non-zero for benign
/// reasons, so neither is treated as failure by the stages; they check the
/// output file instead. The status and stderr are still surfaced for logging.
#[derive(Debug, Default)]
pub struct ToolOutput {
    /// Whether the process exited with status 0.
    pub status_ok: bool,
    /// Captured stderr.
    pub stderr: String,
}

/// Executes [`ToolCommand`]s.
pub trait ToolRunner: Send + Sync {
    /// Runs the command to completion.
    fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput>;
}

/// Blocking subprocess runner used in production.
#[derive(Debug, Default)]
pub struct CommandRunner;

impl ToolRunner for CommandRunner {
    fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput> {
        debug!(cmd = %cmd.display(), "invoking external tool");

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stderr(Stdio::piped());
        match &cmd.stdout_to {
            Some(path) => {
                let file = File::create(path)?;
                command.stdout(Stdio::from(file));
            }
            None => {
                command.stdout(Stdio::piped());
            }
        }

        let output = command.output().map_err(|source| Error::ToolLaunch {
            tool: cmd.program.display().to_string(),
            source,
        })?;

        // An empty redirect target means the tool wrote nothing; remove it so
        // the caller's output-file existence check stays meaningful.
        if let Some(path) = &cmd.stdout_to {
            if std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(false) {
                let _ = std::fs::remove_file(path);
            }
        }

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !stderr.trim().is_empty() {
            debug!(tool = %cmd.program.display(), stderr = %stderr.trim(), "tool stderr");
        }

        Ok(ToolOutput {
            status_ok: output.status.success(),
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_building() {
        let cmd = ToolCommand::new("/usr/bin/oiiotool")
            .arg("-v")
            .arg_path(Path::new("/tmp/in.tif"))
            .args(["--rangecompress", "--resize", "50%", "--rangeexpand"])
            .arg("-o")
            .arg_path(Path::new("/out/img.exr"));
        assert!(cmd.has_arg("--rangecompress"));
        assert_eq!(cmd.arg_after("-o"), Some("/out/img.exr"));
        assert_eq!(cmd.arg_after("--resize"), Some("50%"));
        assert!(cmd.display().starts_with("/usr/bin/oiiotool -v"));
    }

    #[test]
    fn test_arg_after_missing() {
        let cmd = ToolCommand::new("tool").arg("-v");
        assert_eq!(cmd.arg_after("-o"), None);
        assert!(!cmd.has_arg("-o"));
    }
}
