pub mod device;
pub mod profile;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use device::handle_devices;
use profile::handle_profiles;

use crate::config::Config;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub cmd: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the tablet driver (default)
    Run,
    /// List the supported tablet models
    Profiles,
    /// List attached Hanvon devices
    Devices,
}

/// Run the given one-shot command. Returns false if the driver itself should
/// be started instead.
pub fn main_cli(cmd: Option<Commands>, config: &Config) -> Result<bool, Box<dyn Error + Send + Sync>> {
    let Some(cmd) = cmd else {
        return Ok(false);
    };

    match cmd {
        Commands::Run => return Ok(false),
        Commands::Profiles => handle_profiles(),
        Commands::Devices => handle_devices(config.vendor_id)?,
    }

    Ok(true)
}
