//! `imgmount locks`: list NBD device leases.

use chrono::Utc;
use clap::Args;
use imgmount_common::config::ImgmountConfig;
use imgmount_core::lock::{DirLockStore, LockStore};

use crate::output::format_duration;

/// Arguments for the `locks` command.
#[derive(Args, Debug)]
pub struct LocksArgs {
    /// Print leases as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `locks` command.
///
/// # Errors
///
/// Returns an error if the lease directory cannot be read.
pub fn execute(args: LocksArgs, config: &ImgmountConfig) -> anyhow::Result<()> {
    let store = DirLockStore::new(config.lock_dir.clone());
    let mut leases = store.list()?;
    leases.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));

    if args.json {
        println!("{}", serde_json::to_string_pretty(&leases)?);
        return Ok(());
    }

    if leases.is_empty() {
        println!("No leases held in {}.", store.location());
        return Ok(());
    }

    let now = Utc::now();
    println!(
        "{:<40} {:<8} {:<26} {:<10}",
        "LOCK", "PID", "ACQUIRED", "REMAINING"
    );
    for lease in &leases {
        println!(
            "{:<40} {:<8} {:<26} {:<10}",
            lease.name.as_str(),
            lease.pid,
            lease.acquired_at.to_rfc3339(),
            format_duration((lease.expires_at - now).num_seconds())
        );
    }
    Ok(())
}
