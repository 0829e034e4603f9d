//! Deploy command

use std::path::PathBuf;

use clap::Args;
use keel_kubespray::{AnsibleExecutor, DeployAction, KubeVersion, PlaybookRunner, ProviderType};
use tracing::info;

use super::{load_config, load_hosts, planner};
use crate::Result;

#[derive(Args, Debug)]
pub struct DeployArgs {
    /// create, run, scale or remove-node
    pub action: DeployAction,

    /// JSON hosts file
    #[arg(long)]
    pub hosts: PathBuf,

    /// Hostnames added (scale) or removed (remove-node)
    #[arg(long, value_delimiter = ',')]
    pub targets: Vec<String>,

    /// Kubernetes version, e.g. v1.22.9
    #[arg(long)]
    pub kube_version: String,

    /// Infrastructure provider
    #[arg(long, default_value = "onecloud")]
    pub provider: ProviderType,

    /// JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Run ansible with -vvv
    #[arg(long)]
    pub debug: bool,
}

pub async fn run(args: DeployArgs) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    let version = KubeVersion::parse(&args.kube_version)?;
    let hosts = load_hosts(&args.hosts)?;

    let run = planner(&config, &version, args.provider)?
        .with_debug(args.debug)
        .plan(args.action, hosts, &args.targets)?;
    info!(
        action = %args.action,
        playbook = %run.playbook(),
        hosts = run.inventory().len(),
        "starting deploy"
    );

    let output = AnsibleExecutor::from_config(&config).run(run).await?;
    print!("{}", output.output);
    info!(elapsed_secs = output.elapsed.as_secs(), "deploy finished");
    Ok(())
}
