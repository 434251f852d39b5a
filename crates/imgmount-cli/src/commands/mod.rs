//! CLI command definitions and dispatch.

pub mod check;
pub mod inspect;
pub mod locks;
pub mod run;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use imgmount_common::config::ImgmountConfig;

/// imgmount: read-only mounts for forensic disk images.
#[derive(Parser, Debug)]
#[command(name = "imgmount", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// JSON configuration file.
    #[arg(long, global = true, env = "IMGMOUNT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory new mountpoints are created under.
    #[arg(long, global = true)]
    pub mount_root: Option<PathBuf>,

    /// Shared directory holding NBD device leases.
    #[arg(long, global = true)]
    pub lock_dir: Option<PathBuf>,

    /// Host identity used in NBD lease names.
    #[arg(long, global = true)]
    pub hostname: Option<String>,

    /// Number of NBD devices (/dev/nbd0..N-1) available on this host.
    #[arg(long, global = true)]
    pub nbd_devices: Option<u32>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl GlobalArgs {
    /// Resolves the effective configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file or an environment
    /// variable is invalid.
    pub fn load_config(&self) -> anyhow::Result<ImgmountConfig> {
        self.resolve_config(|key| std::env::var(key).ok())
    }

    /// Layers defaults, the configuration file, the environment resolved
    /// through `lookup`, and finally command-line flags.
    fn resolve_config<F>(&self, lookup: F) -> anyhow::Result<ImgmountConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &self.config {
            Some(path) => ImgmountConfig::load(path)?,
            None => ImgmountConfig::default(),
        };
        config.apply_env(lookup)?;

        if let Some(root) = &self.mount_root {
            config.mount_root.clone_from(root);
        }
        if let Some(dir) = &self.lock_dir {
            config.lock_dir.clone_from(dir);
        }
        if let Some(host) = &self.hostname {
            config.host_override = Some(host.clone());
        }
        if let Some(count) = self.nbd_devices {
            config.max_nbd_devices = count;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Verify the host has every tool needed to attach and mount images.
    Check(check::CheckArgs),
    /// Attach an image, print its partitions, and detach it again.
    Inspect(inspect::InspectArgs),
    /// Mount an image read-only, run a command, and tear everything down.
    Run(run::RunArgs),
    /// List NBD device leases currently recorded in the lock directory.
    Locks(locks::LocksArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.global.load_config()?;
    match cli.command {
        Command::Check(args) => check::execute(args, &config),
        Command::Inspect(args) => inspect::execute(args, config),
        Command::Run(args) => run::execute(args, config),
        Command::Locks(args) => locks::execute(args, &config),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn flags_override_environment() {
        let vars = env(&[
            ("IMGMOUNT_NBD_DEVICES", "4"),
            ("IMGMOUNT_MOUNT_ROOT", "/srv/env"),
        ]);
        let args = GlobalArgs {
            mount_root: Some(PathBuf::from("/srv/flag")),
            ..GlobalArgs::default()
        };
        let config = args.resolve_config(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.mount_root, PathBuf::from("/srv/flag"));
        assert_eq!(config.max_nbd_devices, 4);
    }

    #[test]
    fn environment_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imgmount.json");
        std::fs::write(&path, r#"{"max_nbd_devices": 8, "mount_root": "/srv/file"}"#).unwrap();
        let vars = env(&[("IMGMOUNT_NBD_DEVICES", "2")]);
        let args = GlobalArgs {
            config: Some(path),
            ..GlobalArgs::default()
        };
        let config = args.resolve_config(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.max_nbd_devices, 2);
        assert_eq!(config.mount_root, PathBuf::from("/srv/file"));
    }

    #[test]
    fn zero_pool_flag_is_rejected() {
        let args = GlobalArgs {
            nbd_devices: Some(0),
            ..GlobalArgs::default()
        };
        assert!(args.resolve_config(|_| None).is_err());
    }

    #[test]
    fn run_requires_a_command() {
        assert!(Cli::try_parse_from(["imgmount", "run", "disk.dd"]).is_err());
        let cli = Cli::try_parse_from(["imgmount", "run", "disk.dd", "--", "ls", "-l"]).unwrap();
        match cli.command {
            Command::Run(args) => assert_eq!(args.command, ["ls", "-l"]),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
