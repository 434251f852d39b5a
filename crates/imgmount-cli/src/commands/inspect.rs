//! `imgmount inspect`: attach an image, report its partitions, detach it.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use imgmount_common::config::ImgmountConfig;
use imgmount_common::types::BackendKind;
use imgmount_core::BlockDevice;
use imgmount_core::command::SystemRunner;
use imgmount_core::lock::DirLockStore;
use imgmount_core::topology::BlockDeviceInfo;
use serde::Serialize;

use crate::output::format_bytes;

/// Arguments for the `inspect` command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Path to the disk image.
    pub image: PathBuf,

    /// Name the image was uploaded under, when the path has no extension.
    #[arg(long)]
    pub name: Option<String>,

    /// Print a table instead of JSON.
    #[arg(long)]
    pub table: bool,
}

/// What `inspect` reports about an attached image.
#[derive(Debug, Serialize)]
pub struct InspectReport {
    /// Source image path.
    pub image: PathBuf,
    /// Backend the image was attached with.
    pub backend: Option<BackendKind>,
    /// Device node the image was attached to.
    pub device: Option<String>,
    /// Device topology as reported by `lsblk`.
    pub topology: Option<BlockDeviceInfo>,
    /// Partitions worth mounting.
    pub partitions: Vec<String>,
}

impl InspectReport {
    fn capture(device: &BlockDevice) -> Self {
        Self {
            image: device.image_path().to_path_buf(),
            backend: device.backend(),
            device: device.device_node().map(str::to_owned),
            topology: device.topology().cloned(),
            partitions: device.partitions().to_vec(),
        }
    }
}

/// Builds an unattached handle on the host's tools and lease directory.
pub(crate) fn open_device(
    image: PathBuf,
    name: Option<String>,
    config: ImgmountConfig,
) -> BlockDevice {
    let store = Arc::new(DirLockStore::new(config.lock_dir.clone()));
    let device = BlockDevice::new(image, config, Arc::new(SystemRunner), store);
    match name {
        Some(name) => device.with_display_name(name),
        None => device,
    }
}

/// Executes the `inspect` command.
///
/// The image is detached again before anything is printed.
///
/// # Errors
///
/// Returns an error if the image cannot be attached or inspected, or if
/// teardown fails.
pub fn execute(args: InspectArgs, config: ImgmountConfig) -> anyhow::Result<()> {
    let mut device = open_device(args.image, args.name, config);
    device.setup()?;
    let report = InspectReport::capture(&device);
    device.teardown()?;

    if args.table {
        print_table(&report);
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn print_table(report: &InspectReport) {
    let Some(topology) = &report.topology else {
        println!("No topology reported.");
        return;
    };

    println!(
        "{:<20} {:<10} {:<12} {:<8}",
        "DEVICE", "TYPE", "SIZE", "MOUNT"
    );
    println!(
        "{:<20} {:<10} {:<12} {:<8}",
        topology.device_node(),
        topology.kind,
        format_bytes(topology.size),
        if report.partitions.is_empty() { "yes" } else { "-" }
    );
    for partition in topology.partitions() {
        let node = partition.device_node();
        let relevant = if report.partitions.contains(&node) {
            "yes"
        } else {
            "no"
        };
        println!(
            "{:<20} {:<10} {:<12} {:<8}",
            node,
            "part",
            format_bytes(partition.size),
            relevant
        );
    }
}
