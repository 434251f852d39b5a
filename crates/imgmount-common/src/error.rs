//! Unified error types for the imgmount workspace.
//!
//! Every failure of an external tool carries the tool's name and its raw
//! diagnostic output so callers can surface it unchanged.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of an [`ImgmountError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Host environment is not usable: missing tools, unreachable lock store,
    /// invalid configuration.
    Environment,
    /// A bounded resource pool is exhausted.
    ResourceExhausted,
    /// An external tool exited unsuccessfully.
    Invocation,
    /// The caller asked for something that cannot be done.
    Usage,
    /// An external tool produced output in an unexpected shape.
    Parse,
    /// A local filesystem operation failed.
    Io,
    /// Several independent failures, reported together.
    Multiple,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Environment => "environment",
            Self::ResourceExhausted => "resource-exhausted",
            Self::Invocation => "invocation",
            Self::Usage => "usage",
            Self::Parse => "parse",
            Self::Io => "io",
            Self::Multiple => "multiple",
        };
        f.write_str(s)
    }
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum ImgmountError {
    /// One or more required executables are not on `PATH`.
    #[error("missing required tools: {}", .tools.join(", "))]
    ToolsMissing {
        /// Every tool that could not be located.
        tools: Vec<String>,
    },

    /// The shared lock store could not be used.
    #[error("lock store unavailable at {location}: {message}")]
    LockStore {
        /// Where the store lives (directory, address).
        location: String,
        /// Description of the failure.
        message: String,
    },

    /// Every device in the NBD pool is currently claimed.
    #[error("All NBD devices locked! ({pool_size} devices claimed on host {host})")]
    NoFreeDevice {
        /// Number of devices in the pool.
        pool_size: u32,
        /// Host identity the pool is scoped to.
        host: String,
    },

    /// An external tool exited with a nonzero status.
    #[error(
        "error running {tool}{}: {}",
        target_suffix(.target.as_deref()),
        command_details(.stderr, .stdout, .status.as_ref())
    )]
    Command {
        /// Name of the tool (without the privilege prefix).
        tool: String,
        /// Device, image, or mountpoint the tool operated on, if any.
        target: Option<String>,
        /// Exit code, `None` if terminated by a signal.
        status: Option<i32>,
        /// Captured standard error, trimmed.
        stderr: String,
        /// Captured standard output, trimmed.
        stdout: String,
    },

    /// An external tool could not be started at all.
    #[error("failed to execute {tool}: {source}")]
    Spawn {
        /// Name of the program.
        tool: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The image to attach is unusable.
    #[error("invalid image {path}: {message}")]
    InvalidImage {
        /// Image path as given by the caller.
        path: PathBuf,
        /// Why it was rejected.
        message: String,
    },

    /// A requested partition is not among the discovered ones.
    #[error("partition name {name} not found")]
    PartitionNotFound {
        /// Partition device node that was requested.
        name: String,
    },

    /// Mount was requested but there is no target.
    #[error("nothing to mount")]
    NothingToMount,

    /// An operation was invoked in the wrong lifecycle state.
    #[error("cannot {operation} a block device in state {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// Current lifecycle state.
        state: String,
    },

    /// Tool output did not have the expected shape.
    #[error("unexpected {tool} output: {message}")]
    Parse {
        /// Tool that produced the output.
        tool: &'static str,
        /// Description of the mismatch.
        message: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// Several steps failed; each error is kept in order of occurrence.
    #[error("{} errors: {}", .errors.len(), join_errors(.errors))]
    Multiple {
        /// The individual failures.
        errors: Vec<ImgmountError>,
    },
}

impl ImgmountError {
    /// Returns the coarse classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ToolsMissing { .. } | Self::LockStore { .. } | Self::Config { .. } => {
                ErrorKind::Environment
            }
            Self::NoFreeDevice { .. } => ErrorKind::ResourceExhausted,
            Self::Command { .. } | Self::Spawn { .. } => ErrorKind::Invocation,
            Self::InvalidImage { .. }
            | Self::PartitionNotFound { .. }
            | Self::NothingToMount
            | Self::InvalidState { .. } => ErrorKind::Usage,
            Self::Parse { .. } | Self::Serialization { .. } => ErrorKind::Parse,
            Self::Io { .. } => ErrorKind::Io,
            Self::Multiple { .. } => ErrorKind::Multiple,
        }
    }

    /// Builds an [`ImgmountError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Folds a list of errors into one, or `None` when the list is empty.
    #[must_use]
    pub fn aggregate(mut errors: Vec<Self>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple { errors }),
        }
    }
}

fn target_suffix(target: Option<&str>) -> String {
    target.map(|t| format!(" on {t}")).unwrap_or_default()
}

/// Non-empty captured output, or the exit status when the tool printed
/// nothing.
fn command_details(stderr: &str, stdout: &str, status: Option<&i32>) -> String {
    let output: Vec<&str> = [stderr, stdout]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();
    if !output.is_empty() {
        return output.join(" ");
    }
    status.map_or_else(
        || "terminated by signal".to_owned(),
        |code| format!("exited with status {code}"),
    )
}

fn join_errors(errors: &[ImgmountError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ImgmountError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tools_are_listed_together() {
        let err = ImgmountError::ToolsMissing {
            tools: vec!["losetup".into(), "qemu-nbd".into()],
        };
        assert_eq!(err.to_string(), "missing required tools: losetup, qemu-nbd");
        assert_eq!(err.kind(), ErrorKind::Environment);
    }

    #[test]
    fn exhausted_pool_message() {
        let err = ImgmountError::NoFreeDevice {
            pool_size: 16,
            host: "worker-1".into(),
        };
        assert!(err.to_string().starts_with("All NBD devices locked!"));
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn command_error_embeds_tool_output() {
        let err = ImgmountError::Command {
            tool: "mount".into(),
            target: Some("/dev/loop0p1".into()),
            status: Some(32),
            stderr: "wrong fs type".into(),
            stdout: String::new(),
        };
        assert_eq!(
            err.to_string(),
            "error running mount on /dev/loop0p1: wrong fs type"
        );
        assert_eq!(err.kind(), ErrorKind::Invocation);
    }

    #[test]
    fn command_error_joins_only_present_output() {
        let both = ImgmountError::Command {
            tool: "losetup".into(),
            target: None,
            status: Some(1),
            stderr: "losetup: failed".into(),
            stdout: "partial".into(),
        };
        assert_eq!(both.to_string(), "error running losetup: losetup: failed partial");

        let silent = ImgmountError::Command {
            tool: "blkid".into(),
            target: Some("/dev/loop0".into()),
            status: Some(2),
            stderr: String::new(),
            stdout: String::new(),
        };
        assert_eq!(
            silent.to_string(),
            "error running blkid on /dev/loop0: exited with status 2"
        );

        let killed = ImgmountError::Command {
            tool: "umount".into(),
            target: None,
            status: None,
            stderr: String::new(),
            stdout: String::new(),
        };
        assert_eq!(killed.to_string(), "error running umount: terminated by signal");
    }

    #[test]
    fn aggregate_collapses_single_error() {
        assert!(ImgmountError::aggregate(Vec::new()).is_none());

        let one = ImgmountError::aggregate(vec![ImgmountError::NothingToMount]).unwrap();
        assert!(matches!(one, ImgmountError::NothingToMount));

        let many = ImgmountError::aggregate(vec![
            ImgmountError::NothingToMount,
            ImgmountError::PartitionNotFound { name: "/dev/sda9".into() },
        ])
        .unwrap();
        assert_eq!(many.kind(), ErrorKind::Multiple);
        assert!(many.to_string().starts_with("2 errors: nothing to mount; "));
    }

    #[test]
    fn partition_not_found_is_usage_error() {
        let err = ImgmountError::PartitionNotFound {
            name: "/dev/loop0p7".into(),
        };
        assert_eq!(err.to_string(), "partition name /dev/loop0p7 not found");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
