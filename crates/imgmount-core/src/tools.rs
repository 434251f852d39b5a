//! Host tool availability checks.

use imgmount_common::error::{ImgmountError, Result};

use crate::command::Tools;

/// Executables every attach, inspect, mount, and teardown path relies on.
pub const DEVICE_TOOLS: &[&str] = &["lsblk", "blkid", "mount", "umount", "losetup", "qemu-nbd"];

/// Presence of one required tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    /// Program name.
    pub name: String,
    /// Whether it was found on the execution path.
    pub found: bool,
}

/// Lists the required tools, including the privilege tool when configured.
#[must_use]
pub fn required_tools(tools: &Tools) -> Vec<String> {
    tools
        .privilege_tool()
        .into_iter()
        .chain(DEVICE_TOOLS.iter().copied())
        .map(str::to_owned)
        .collect()
}

/// Probes every required tool.
#[must_use]
pub fn tool_status(tools: &Tools) -> Vec<ToolStatus> {
    required_tools(tools)
        .into_iter()
        .map(|name| {
            let found = tools.runner().locate(&name);
            ToolStatus { name, found }
        })
        .collect()
}

/// Verifies that every required tool is present.
///
/// # Errors
///
/// Returns [`ImgmountError::ToolsMissing`] naming all absent tools.
pub fn ensure_available(tools: &Tools) -> Result<()> {
    let missing: Vec<String> = tool_status(tools)
        .into_iter()
        .filter(|status| !status.found)
        .map(|status| status.name)
        .collect();

    if missing.is_empty() {
        return Ok(());
    }
    tracing::error!(missing = ?missing, "required tools not found");
    Err(ImgmountError::ToolsMissing { tools: missing })
}
