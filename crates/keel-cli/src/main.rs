//! keel CLI
//!
//! Plans and runs kubespray deployments from a hosts file.

use clap::Parser;

use keel_cli::{Cli, Result};
use keel_common::telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry(TelemetryConfig {
        service_name: "keel-cli".to_string(),
        json: false,
        ..Default::default()
    })?;

    let cli = Cli::parse();
    cli.run().await
}
