//! `imgmount check`: verify the host tools are installed.

use clap::Args;
use imgmount_common::config::ImgmountConfig;
use imgmount_core::command::Tools;
use imgmount_core::tools::{ensure_available, tool_status};

/// Arguments for the `check` command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Only report missing tools.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Executes the `check` command.
///
/// Prints one line per required tool and fails if any is missing.
///
/// # Errors
///
/// Returns an error naming every missing tool.
pub fn execute(args: CheckArgs, config: &ImgmountConfig) -> anyhow::Result<()> {
    let tools = Tools::system(config.privilege_tool.clone());

    println!("{:<12} {:<8}", "TOOL", "STATUS");
    for status in tool_status(&tools) {
        if args.quiet && status.found {
            continue;
        }
        let label = if status.found { "found" } else { "missing" };
        println!("{:<12} {:<8}", status.name, label);
    }

    ensure_available(&tools)?;
    tracing::info!("all required tools are available");
    Ok(())
}
