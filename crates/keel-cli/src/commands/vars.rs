//! Vars command

use std::path::PathBuf;

use clap::Args;
use keel_common::KeelConfig;
use keel_kubespray::{create_hook, KubeVersion, ProviderType, VarsResolver};

use super::load_config;
use crate::Result;

#[derive(Args, Debug)]
pub struct VarsArgs {
    /// Kubernetes version, e.g. v1.22.9
    #[arg(long)]
    pub kube_version: String,

    /// Infrastructure provider
    #[arg(long, default_value = "onecloud")]
    pub provider: ProviderType,

    /// Offline image registry, overrides the configuration
    #[arg(long)]
    pub offline_registry: Option<String>,

    /// Offline file mirror, overrides the configuration
    #[arg(long)]
    pub offline_nginx: Option<String>,

    /// JSON configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run(args: VarsArgs) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    println!("{}", resolve(config, &args)?);
    Ok(())
}

fn resolve(mut config: KeelConfig, args: &VarsArgs) -> Result<String> {
    if let Some(registry) = &args.offline_registry {
        config.offline_registry_url = Some(registry.clone());
    }
    if let Some(nginx) = &args.offline_nginx {
        config.offline_nginx_url = Some(nginx.clone());
    }

    let version = KubeVersion::parse(&args.kube_version)?;
    let hook = create_hook(args.provider);
    hook.ensure_supported(&version)?;
    let vars = VarsResolver::new(&config).resolve(&version, None, hook.as_ref());
    Ok(vars.to_json_pretty()?)
}
