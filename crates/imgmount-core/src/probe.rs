//! Filesystem type probing with `blkid`.

use imgmount_common::constants::SUPPORTED_FILESYSTEMS;
use imgmount_common::error::{ImgmountError, Result};

use crate::command::Tools;

/// Returns the filesystem type of `device` (e.g. `ext4`, `vfat`).
///
/// # Errors
///
/// Returns [`ImgmountError::Command`] if `blkid` fails, including when it
/// finds no recognizable filesystem, and [`ImgmountError::Parse`] if it
/// succeeds without printing a type.
pub fn probe_fs_type(tools: &Tools, device: &str) -> Result<String> {
    let args = ["-s", "TYPE", "-o", "value", device].map(str::to_owned);
    let stdout = tools.run("blkid", &args, Some(device))?;
    let fs_type = parse_blkid_type(&stdout)?;
    tracing::debug!(device, fs_type = %fs_type, "probed filesystem type");
    Ok(fs_type)
}

/// Parses the output of `blkid -s TYPE -o value`: a single token.
///
/// # Errors
///
/// Returns [`ImgmountError::Parse`] for empty or multi-token output.
pub fn parse_blkid_type(output: &str) -> Result<String> {
    let value = output.trim();
    if value.is_empty() {
        return Err(ImgmountError::Parse {
            tool: "blkid",
            message: "empty TYPE value".into(),
        });
    }
    if value.split_whitespace().nth(1).is_some() {
        return Err(ImgmountError::Parse {
            tool: "blkid",
            message: format!("expected a single TYPE value, got {value:?}"),
        });
    }
    Ok(value.to_owned())
}

/// Returns whether `fs_type` is one the inspector mounts.
#[must_use]
pub fn is_supported_fs(fs_type: &str) -> bool {
    SUPPORTED_FILESYSTEMS.contains(&fs_type)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::command::CommandOutput;
    use crate::testing::ScriptedRunner;

    #[test]
    fn parse_trims_value() {
        assert_eq!(parse_blkid_type("ext4\n").unwrap(), "ext4");
    }

    #[test]
    fn parse_rejects_unexpected_shapes() {
        assert!(parse_blkid_type("  \n").is_err());
        assert!(parse_blkid_type("ext4\nvfat\n").is_err());
    }

    #[test]
    fn probe_invokes_blkid_for_type_only() {
        let runner = Arc::new(ScriptedRunner::new(|_| CommandOutput::ok("vfat\n")));
        let tools = Tools::new(runner.clone(), Some("sudo".into()));

        assert_eq!(probe_fs_type(&tools, "/dev/loop0").unwrap(), "vfat");
        assert_eq!(
            runner.command_lines(),
            vec!["sudo blkid -s TYPE -o value /dev/loop0"]
        );
    }

    #[test]
    fn probe_failure_carries_stderr() {
        let runner = Arc::new(ScriptedRunner::new(|_| {
            CommandOutput::failed(4, "blkid: cannot open /dev/loop0p3: Permission denied\n")
        }));
        let tools = Tools::new(runner, None);

        let err = probe_fs_type(&tools, "/dev/loop0p3").unwrap_err();
        assert_eq!(
            err.to_string(),
            "error running blkid on /dev/loop0p3: blkid: cannot open /dev/loop0p3: Permission denied"
        );
    }

    #[test]
    fn unformatted_device_is_an_error() {
        let runner = Arc::new(ScriptedRunner::new(|_| CommandOutput::failed(2, "")));
        let tools = Tools::new(runner, None);

        let err = probe_fs_type(&tools, "/dev/loop0p3").unwrap_err();
        assert!(matches!(
            err,
            ImgmountError::Command { status: Some(2), .. }
        ));
        assert_eq!(
            err.to_string(),
            "error running blkid on /dev/loop0p3: exited with status 2"
        );
    }

    #[test]
    fn supported_set() {
        for fs in ["ext2", "ext3", "ext4", "xfs", "ntfs", "vfat", "dos"] {
            assert!(is_supported_fs(fs), "{fs}");
        }
        assert!(!is_supported_fs("swap"));
        assert!(!is_supported_fs("btrfs"));
    }
}
