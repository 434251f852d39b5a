//! `imgmount run`: mount an image read-only and run a command against it.

use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Args;
use imgmount_common::config::ImgmountConfig;
use imgmount_common::constants::ENV_MOUNTPOINTS;
use imgmount_core::BlockDevice;

use super::inspect::open_device;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the disk image.
    pub image: PathBuf,

    /// Mount only this partition, e.g. `/dev/loop0p2`.
    #[arg(short, long)]
    pub partition: Option<String>,

    /// Name the image was uploaded under, when the path has no extension.
    #[arg(long)]
    pub name: Option<String>,

    /// Command to run once the image is mounted.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `run` command.
///
/// The mountpoints are passed to the command in `IMGMOUNT_MOUNTPOINTS`,
/// separated like `PATH`. Mounts, the device, and any NBD lease are
/// released whether the command succeeds, fails, or is interrupted. The
/// process exits with the command's status.
///
/// # Errors
///
/// Returns an error if the image cannot be mounted, the command cannot be
/// started, or teardown fails.
pub fn execute(args: RunArgs, config: ImgmountConfig) -> anyhow::Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        tracing::warn!("interrupted, tearing down once the command exits");
    })
    .context("failed to install the interrupt handler")?;

    let mut device = open_device(args.image, args.name, config);
    device.setup()?;

    let outcome = mount_and_run(&mut device, args.partition.as_deref(), &args.command);
    let teardown = device.teardown_best_effort();
    drop(device);

    let status = match (outcome, teardown) {
        (Ok(status), Ok(())) => status,
        (Ok(_), Err(e)) => return Err(e.into()),
        (Err(e), Ok(())) => return Err(e),
        (Err(e), Err(teardown)) => {
            tracing::error!(error = %teardown, "teardown failed");
            return Err(e);
        }
    };

    if interrupted.load(Ordering::SeqCst) {
        tracing::info!("teardown completed after interrupt");
    }
    let code = exit_code(status);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn mount_and_run(
    device: &mut BlockDevice,
    partition: Option<&str>,
    command: &[String],
) -> anyhow::Result<ExitStatus> {
    let (program, rest) = command.split_first().context("no command given")?;
    let mountpoints = device.mount(partition)?.to_vec();
    let joined = join_mountpoints(&mountpoints)?;

    tracing::info!(
        program = %program,
        mountpoints = mountpoints.len(),
        "running command against mounted image"
    );
    let status = std::process::Command::new(program)
        .args(rest)
        .env(ENV_MOUNTPOINTS, joined)
        .status()
        .with_context(|| format!("failed to start {program}"))?;
    tracing::info!(%status, "command finished");
    Ok(status)
}

fn join_mountpoints(mountpoints: &[PathBuf]) -> anyhow::Result<OsString> {
    std::env::join_paths(mountpoints.iter().map(PathBuf::as_path).map(Path::as_os_str))
        .context("mountpoint path cannot be passed through the environment")
}

/// Maps a child status to a shell-style exit code.
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| status.signal().map_or(1, |signal| 128 + signal))
}
