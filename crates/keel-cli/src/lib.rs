//! keel CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// keel - Kubernetes cluster provisioning with kubespray
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the inventory rendered from a hosts file
    Inventory(commands::inventory::InventoryArgs),

    /// Print the extra-vars resolved for a Kubernetes version
    Vars(commands::vars::VarsArgs),

    /// Plan and run a playbook against a hosts file
    Deploy(commands::deploy::DeployArgs),

    /// Print the version band a Kubernetes version falls in
    VersionBand(commands::version_band::VersionBandArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Inventory(args) => commands::inventory::run(args),
            Commands::Vars(args) => commands::vars::run(args),
            Commands::Deploy(args) => commands::deploy::run(args).await,
            Commands::VersionBand(args) => commands::version_band::run(args),
        }
    }
}
