//! External tool invocation.
//!
//! Every interaction with the kernel goes through command-line tools
//! (`losetup`, `qemu-nbd`, `lsblk`, `blkid`, `mount`, `umount`). They are
//! run through the [`CommandRunner`] trait so the lifecycle logic can be
//! exercised without root privileges.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use imgmount_common::error::{ImgmountError, Result};

/// Captured result of one finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub status: Option<i32>,
    /// Standard output decoded lossily as UTF-8.
    pub stdout: String,
    /// Standard error decoded lossily as UTF-8.
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns whether the process exited with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs programs and checks for their presence.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` to completion, capturing its output.
    ///
    /// A nonzero exit is not an error at this level.
    ///
    /// # Errors
    ///
    /// Returns [`ImgmountError::Spawn`] if the process cannot be started.
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;

    /// Returns whether `program` can be found on the execution path.
    fn locate(&self, program: &str) -> bool;
}

/// [`CommandRunner`] backed by [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| ImgmountError::Spawn {
                tool: program.to_owned(),
                source: e,
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn locate(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

/// Device tools, run through a [`CommandRunner`] with an optional
/// privilege-escalation prefix.
#[derive(Clone)]
pub struct Tools {
    runner: Arc<dyn CommandRunner>,
    privilege_tool: Option<String>,
}

impl std::fmt::Debug for Tools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tools")
            .field("privilege_tool", &self.privilege_tool)
            .finish_non_exhaustive()
    }
}

impl Tools {
    /// Wraps `runner`, prefixing every invocation with `privilege_tool`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, privilege_tool: Option<String>) -> Self {
        Self {
            runner,
            privilege_tool,
        }
    }

    /// Tools run directly on the host.
    #[must_use]
    pub fn system(privilege_tool: Option<String>) -> Self {
        Self::new(Arc::new(SystemRunner), privilege_tool)
    }

    /// The configured privilege-escalation tool, if any.
    #[must_use]
    pub fn privilege_tool(&self) -> Option<&str> {
        self.privilege_tool.as_deref()
    }

    /// The underlying runner.
    #[must_use]
    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// Runs `tool` with `args` and returns its stdout.
    ///
    /// `target` names the object the tool operates on and is only used to
    /// make error messages specific.
    ///
    /// # Errors
    ///
    /// Returns [`ImgmountError::Command`] carrying the tool's stderr and
    /// stdout when it exits unsuccessfully.
    pub fn run(&self, tool: &str, args: &[String], target: Option<&str>) -> Result<String> {
        let (program, argv) = match &self.privilege_tool {
            Some(prefix) => {
                let mut argv = Vec::with_capacity(args.len() + 1);
                argv.push(tool.to_owned());
                argv.extend_from_slice(args);
                (prefix.as_str(), argv)
            }
            None => (tool, args.to_vec()),
        };

        tracing::debug!(program, args = ?argv, "running command");
        let output = self.runner.run(program, &argv)?;
        if output.success() {
            return Ok(output.stdout);
        }

        tracing::debug!(tool, status = ?output.status, stderr = %output.stderr.trim(), "command failed");
        Err(ImgmountError::Command {
            tool: tool.to_owned(),
            target: target.map(str::to_owned),
            status: output.status,
            stderr: output.stderr.trim().to_owned(),
            stdout: output.stdout.trim().to_owned(),
        })
    }
}

/// Converts a path into a command argument.
///
/// # Errors
///
/// Returns [`ImgmountError::InvalidImage`] for paths that are not valid UTF-8.
pub fn path_arg(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_owned)
        .ok_or_else(|| ImgmountError::InvalidImage {
            path: path.to_path_buf(),
            message: "path is not valid UTF-8".into(),
        })
}
