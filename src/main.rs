//! finch-disk: user-data disk reconciler for Finch.
//!
//! Run `finch-disk ensure` before starting the Finch VM. It creates the Lima
//! registry disk if needed, links it to the persistent disk under
//! `~/.finch/.disks/`, converts the disk to raw for the vz backend and clears
//! stale locks. `finch-disk status` prints what it would see, as JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use finch_disk::disk::{OsFs, SystemRunner};
use finch_disk::{Config, FinchPaths, UserDataDiskManager, logging};

/// Finch user-data disk reconciler
#[derive(Parser, Debug)]
#[command(name = "finch-disk", version, about = "Finch user-data disk reconciler")]
struct Args {
    /// Config file (default: ~/.finch/finch-disk.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Home directory holding the persistent disk (default: $HOME)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Finch installation root containing lima/ (overrides the config file)
    #[arg(long)]
    install_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Reconcile the user-data disk so the VM can start
    Ensure,
    /// Print the observed disk state as JSON without changing anything
    Status,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let home = args
        .home
        .or_else(FinchPaths::home_from_env)
        .context("HOME is not set; pass --home")?;
    let _log_guard = logging::init(&FinchPaths::log_dir(&home))
        .context("failed to initialise logging")?;

    let config_path = args
        .config
        .unwrap_or_else(|| FinchPaths::default_config_file(&home));
    let mut config = Config::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(root) = args.install_root {
        config.install_root = root;
    }

    let paths = FinchPaths::new(config.install_root.clone(), home);
    let manager = UserDataDiskManager::new(OsFs, SystemRunner, paths, &config);

    match args.command {
        Cmd::Ensure => {
            manager
                .ensure_user_data_disk()
                .context("failed to ensure user data disk")?;
            info!(
                disk = %config.disk_name,
                vm_type = %config.vm_type,
                path = %manager.paths().user_data_disk_path().display(),
                "user data disk ready"
            );
        }
        Cmd::Status => {
            let status = manager.status().context("failed to read disk status")?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
