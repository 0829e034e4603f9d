//! Inventory command

use std::path::PathBuf;

use clap::Args;
use keel_kubespray::{Inventory, KubeVersion};

use super::{load_hosts, DEFAULT_KUBE_VERSION};
use crate::Result;

#[derive(Args, Debug)]
pub struct InventoryArgs {
    /// JSON hosts file
    #[arg(long)]
    pub hosts: PathBuf,

    /// Kubernetes version; selects the inventory group names
    #[arg(long, default_value = DEFAULT_KUBE_VERSION)]
    pub kube_version: String,
}

pub fn run(args: InventoryArgs) -> Result<()> {
    print!("{}", render(&args)?);
    Ok(())
}

fn render(args: &InventoryArgs) -> Result<String> {
    let version = KubeVersion::parse(&args.kube_version)?;
    let hosts = load_hosts(&args.hosts)?;
    let inventory = Inventory::new(hosts, version.band().pins().group_naming)?;
    Ok(inventory.render()?)
}
