//! Version band command

use clap::Args;
use keel_kubespray::KubeVersion;

use crate::Result;

#[derive(Args, Debug)]
pub struct VersionBandArgs {
    /// Kubernetes version, e.g. v1.22.9
    pub version: String,
}

pub fn run(args: VersionBandArgs) -> Result<()> {
    println!("{}", describe(&args.version)?);
    Ok(())
}

fn describe(version: &str) -> Result<String> {
    let version = KubeVersion::parse(version)?;
    let band = version.band();
    Ok(format!("{band} ({})", band.pins().playbook_set))
}
