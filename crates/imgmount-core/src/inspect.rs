//! Partition discovery and relevance filtering.
//!
//! Only large partitions carrying a common filesystem are worth mounting for
//! analysis. Small ones (EFI stubs, boot loaders, reserved areas) are dropped
//! without probing.

use imgmount_common::error::Result;

use crate::command::Tools;
use crate::probe;
use crate::topology::{BlockDeviceInfo, Partition};

/// Returns whether a partition of `size` bytes holding `fs_type` is worth
/// mounting.
#[must_use]
pub fn is_important(size: u64, fs_type: &str, min_size: u64) -> bool {
    size >= min_size && probe::is_supported_fs(fs_type)
}

/// Decides whether `partition` is worth mounting, probing its filesystem
/// only when it passes the size check.
///
/// # Errors
///
/// Returns an error if probing fails, including when `blkid` finds no
/// recognizable filesystem on a partition large enough to matter.
pub fn check_partition(tools: &Tools, partition: &Partition, min_size: u64) -> Result<bool> {
    let node = partition.device_node();
    if partition.size < min_size {
        tracing::debug!(partition = %node, size = partition.size, "skipping small partition");
        return Ok(false);
    }

    let fs_type = probe::probe_fs_type(tools, &node)?;

    let important = is_important(partition.size, &fs_type, min_size);
    if !important {
        tracing::debug!(partition = %node, fs_type = %fs_type, "skipping unsupported filesystem");
    }
    Ok(important)
}

/// Returns the device nodes of the relevant partitions of `topology`, in
/// reported order. An unpartitioned device yields an empty list.
///
/// # Errors
///
/// Returns an error if probing a candidate partition fails.
pub fn relevant_partitions(
    tools: &Tools,
    topology: &BlockDeviceInfo,
    min_size: u64,
) -> Result<Vec<String>> {
    let mut relevant = Vec::new();
    for partition in topology.partitions() {
        if check_partition(tools, &partition, min_size)? {
            relevant.push(partition.device_node());
        }
    }
    tracing::info!(
        device = %topology.device_node(),
        found = topology.children.len(),
        relevant = relevant.len(),
        "inspected partitions"
    );
    Ok(relevant)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use imgmount_common::constants::MIN_PARTITION_SIZE;
    use imgmount_common::error::ImgmountError;

    use super::*;
    use crate::command::CommandOutput;
    use crate::testing::ScriptedRunner;
    use crate::topology::parse_lsblk;

    fn blkid_answers(
        table: &'static [(&'static str, &'static str)],
    ) -> (Arc<ScriptedRunner>, Tools) {
        let runner = Arc::new(ScriptedRunner::new(move |call| {
            let device = call.tool_args().last().cloned().unwrap_or_default();
            table
                .iter()
                .find(|(dev, _)| *dev == device)
                .map_or_else(
                    || CommandOutput::failed(2, ""),
                    |(_, fs)| CommandOutput::ok(format!("{fs}\n")),
                )
        }));
        let tools = Tools::new(runner.clone(), None);
        (runner, tools)
    }

    #[test]
    fn size_threshold_is_inclusive() {
        assert!(is_important(MIN_PARTITION_SIZE, "ext4", MIN_PARTITION_SIZE));
        assert!(!is_important(MIN_PARTITION_SIZE - 1, "ext4", MIN_PARTITION_SIZE));
    }

    #[test]
    fn small_partitions_excluded_for_every_type() {
        for fs in ["ext2", "ext3", "ext4", "xfs", "ntfs", "vfat", "dos"] {
            assert!(!is_important(10 * 1024 * 1024, fs, MIN_PARTITION_SIZE));
            assert!(is_important(2 * 1024 * 1024 * 1024, fs, MIN_PARTITION_SIZE));
        }
        assert!(!is_important(u64::MAX, "swap", MIN_PARTITION_SIZE));
    }

    #[test]
    fn keeps_large_supported_partitions_only() {
        let topology = parse_lsblk(
            r#"{"blockdevices":[{"name":"loop0","size":4000000000,"type":"loop","children":[
                {"name":"loop0p1","size":2147483648,"type":"part"},
                {"name":"loop0p2","size":10485760,"type":"part"},
                {"name":"loop0p3","size":500000000,"type":"part"},
                {"name":"loop0p4","size":500000000,"type":"part"}
            ]}]}"#,
        )
        .unwrap();
        let (runner, tools) = blkid_answers(&[
            ("/dev/loop0p1", "ext4"),
            ("/dev/loop0p2", "vfat"),
            ("/dev/loop0p3", "swap"),
            ("/dev/loop0p4", "crypto_LUKS"),
        ]);

        let relevant = relevant_partitions(&tools, &topology, MIN_PARTITION_SIZE).unwrap();
        assert_eq!(relevant, vec!["/dev/loop0p1"]);
        // The 10 MB partition is never probed.
        assert_eq!(runner.count("blkid"), 3);
    }

    #[test]
    fn large_partition_without_filesystem_fails_inspection() {
        let topology = parse_lsblk(
            r#"{"blockdevices":[{"name":"loop0","size":2158000128,"type":"loop","children":[
                {"name":"loop0p1","size":2147483648,"type":"part"}
            ]}]}"#,
        )
        .unwrap();
        let (_, tools) = blkid_answers(&[]);

        let err = relevant_partitions(&tools, &topology, MIN_PARTITION_SIZE).unwrap_err();
        assert!(matches!(
            err,
            ImgmountError::Command { ref tool, status: Some(2), .. } if tool == "blkid"
        ));
        assert!(err.to_string().contains("blkid on /dev/loop0p1"));
    }

    #[test]
    fn unpartitioned_device_yields_no_partitions() {
        let topology =
            parse_lsblk(r#"{"blockdevices":[{"name":"loop0","size":1048576,"type":"loop"}]}"#)
                .unwrap();
        let (runner, tools) = blkid_answers(&[]);
        assert!(relevant_partitions(&tools, &topology, MIN_PARTITION_SIZE)
            .unwrap()
            .is_empty());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn probe_errors_other_than_unrecognized_propagate() {
        let runner = Arc::new(ScriptedRunner::new(|_| {
            CommandOutput::failed(4, "blkid: cannot open /dev/loop0p1: Permission denied")
        }));
        let tools = Tools::new(runner, None);
        let partition = Partition {
            name: "loop0p1".into(),
            size: MIN_PARTITION_SIZE,
            parent: "loop0".into(),
        };
        let err = check_partition(&tools, &partition, MIN_PARTITION_SIZE).unwrap_err();
        assert!(err.to_string().contains("Permission denied"));
    }
}
