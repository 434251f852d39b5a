//! Block device topology as reported by `lsblk -ba -J`.
//!
//! Depending on the util-linux version, `lsblk` prints sizes either as JSON
//! numbers or as strings of digits. Both forms are accepted; anything else
//! is rejected rather than guessed at.

use serde::{Deserialize, Deserializer, Serialize};

use imgmount_common::error::{ImgmountError, Result};

use crate::command::Tools;

/// Top-level `lsblk --json` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsblkReport {
    /// Devices matched by the query.
    pub blockdevices: Vec<BlockDeviceInfo>,
}

/// One node of the device tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDeviceInfo {
    /// Kernel name, e.g. `loop0` or `loop0p1`.
    pub name: String,
    /// Size in bytes.
    #[serde(deserialize_with = "deserialize_size")]
    pub size: u64,
    /// Device type, e.g. `loop`, `disk`, `part`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Child devices (partitions).
    #[serde(default)]
    pub children: Vec<BlockDeviceInfo>,
}

/// A child partition of an attached device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Partition {
    /// Kernel name, e.g. `loop0p1`.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Kernel name of the parent device.
    pub parent: String,
}

impl Partition {
    /// Device node path, e.g. `/dev/loop0p1`.
    #[must_use]
    pub fn device_node(&self) -> String {
        format!("/dev/{}", self.name)
    }
}

impl BlockDeviceInfo {
    /// Device node path, e.g. `/dev/loop0`.
    #[must_use]
    pub fn device_node(&self) -> String {
        format!("/dev/{}", self.name)
    }

    /// Direct children as partition descriptors, in reported order.
    #[must_use]
    pub fn partitions(&self) -> Vec<Partition> {
        self.children
            .iter()
            .map(|child| Partition {
                name: child.name.clone(),
                size: child.size,
                parent: self.name.clone(),
            })
            .collect()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeField {
    Bytes(u64),
    Text(String),
}

fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match SizeField::deserialize(deserializer)? {
        SizeField::Bytes(n) => Ok(n),
        SizeField::Text(s) => s.trim().parse().map_err(|_| {
            serde::de::Error::custom(format!("size {s:?} is not a byte count (was -b given?)"))
        }),
    }
}

/// Parses `lsblk -ba -J <device>` output and returns the queried device.
///
/// # Errors
///
/// Returns [`ImgmountError::Parse`] if the document is malformed or does
/// not describe exactly one top-level device.
pub fn parse_lsblk(json: &str) -> Result<BlockDeviceInfo> {
    let report: LsblkReport = serde_json::from_str(json).map_err(|e| ImgmountError::Parse {
        tool: "lsblk",
        message: e.to_string(),
    })?;

    let mut devices = report.blockdevices.into_iter();
    match (devices.next(), devices.next()) {
        (Some(device), None) => Ok(device),
        (None, _) => Err(ImgmountError::Parse {
            tool: "lsblk",
            message: "no block devices reported".into(),
        }),
        (Some(_), Some(_)) => Err(ImgmountError::Parse {
            tool: "lsblk",
            message: "more than one top-level block device reported".into(),
        }),
    }
}

/// Queries the topology of `device`.
///
/// # Errors
///
/// Returns an error if `lsblk` fails or its output cannot be parsed.
pub fn query_topology(tools: &Tools, device: &str) -> Result<BlockDeviceInfo> {
    let args = ["-ba", "-J", device].map(str::to_owned);
    let stdout = tools.run("lsblk", &args, Some(device))?;
    let info = parse_lsblk(&stdout)?;
    tracing::debug!(
        device,
        size = info.size,
        children = info.children.len(),
        "queried block device topology"
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_PARTITIONS: &str = r#"{
       "blockdevices": [
          {"name":"loop0", "maj:min":"7:0", "rm":false, "size":2158000128, "ro":false, "type":"loop", "mountpoints":[null],
             "children": [
                {"name":"loop0p1", "maj:min":"259:0", "rm":false, "size":2147483648, "ro":false, "type":"part", "mountpoints":[null]},
                {"name":"loop0p2", "maj:min":"259:1", "rm":false, "size":10485760, "ro":false, "type":"part", "mountpoints":[null]}
             ]
          }
       ]
    }"#;

    #[test]
    fn parses_children_in_order() {
        let info = parse_lsblk(TWO_PARTITIONS).unwrap();
        assert_eq!(info.device_node(), "/dev/loop0");
        assert_eq!(info.kind, "loop");

        let parts = info.partitions();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].device_node(), "/dev/loop0p1");
        assert_eq!(parts[0].size, 2_147_483_648);
        assert_eq!(parts[1].name, "loop0p2");
        assert_eq!(parts[1].parent, "loop0");
    }

    #[test]
    fn accepts_string_sizes_from_older_lsblk() {
        let json = r#"{"blockdevices":[{"name":"loop1","size":"1048576","type":"loop"}]}"#;
        let info = parse_lsblk(json).unwrap();
        assert_eq!(info.size, 1_048_576);
        assert!(info.children.is_empty());
    }

    #[test]
    fn rejects_human_readable_sizes() {
        let json = r#"{"blockdevices":[{"name":"loop0","size":"1M","type":"loop"}]}"#;
        let err = parse_lsblk(json).unwrap_err();
        assert!(matches!(err, ImgmountError::Parse { tool: "lsblk", .. }));
    }

    #[test]
    fn rejects_empty_and_ambiguous_reports() {
        assert!(parse_lsblk(r#"{"blockdevices":[]}"#).is_err());
        assert!(parse_lsblk("not json").is_err());
        let two = r#"{"blockdevices":[
            {"name":"loop0","size":1,"type":"loop"},
            {"name":"loop1","size":1,"type":"loop"}]}"#;
        assert!(parse_lsblk(two).is_err());
    }
}
