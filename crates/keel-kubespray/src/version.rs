//! Kubernetes versions and the compatibility band they fall into

use std::fmt;
use std::str::FromStr;

use semver::Version;

use crate::inventory::GroupNaming;
use crate::{Error, Result};

/// A parsed Kubernetes release version such as `v1.22.9`
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KubeVersion(Version);

impl KubeVersion {
    /// Parse `vX.Y.Z` or `X.Y.Z`
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::version(input, "version is empty"));
        }
        let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
        Version::parse(bare)
            .map(Self)
            .map_err(|e| Error::version(input, e.to_string()))
    }

    /// Underlying semantic version
    pub fn semver(&self) -> &Version {
        &self.0
    }

    /// Band this version resolves to
    pub fn band(&self) -> VersionBand {
        VersionBand::for_version(self)
    }
}

impl fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for KubeVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Lower bound of [`VersionBand::Stable`]
pub const STABLE_THRESHOLD: Version = Version::new(1, 19, 0);
/// Lower bound of [`VersionBand::Containerd`]
pub const CONTAINERD_THRESHOLD: Version = Version::new(1, 22, 0);

/// Pinned combination of component versions for a range of Kubernetes releases
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VersionBand {
    /// Below v1.19.0
    Legacy,
    /// v1.19.0 up to v1.22.0
    Stable,
    /// v1.22.0 and newer; switches the runtime to containerd
    Containerd,
}

/// Component versions pinned by a band
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BandPins {
    /// CNI plugins release
    pub cni_version: &'static str,
    /// Calico release
    pub calico_version: &'static str,
    /// Playbook set directory under the ansible root
    pub playbook_set: &'static str,
    /// ingress-nginx controller image tag
    pub ingress_nginx_tag: &'static str,
    /// etcd release
    pub etcd_version: &'static str,
    /// `docker` or `containerd`
    pub container_manager: &'static str,
    /// Docker engine and CLI version
    pub docker_version: &'static str,
    /// containerd release
    pub containerd_version: &'static str,
    /// Inventory group spelling the playbook set expects
    pub group_naming: GroupNaming,
}

impl VersionBand {
    /// Select the band by semantic comparison against the thresholds
    pub fn for_version(version: &KubeVersion) -> Self {
        let v = version.semver();
        if *v >= CONTAINERD_THRESHOLD {
            VersionBand::Containerd
        } else if *v >= STABLE_THRESHOLD {
            VersionBand::Stable
        } else {
            VersionBand::Legacy
        }
    }

    /// Component pins for this band
    pub fn pins(self) -> BandPins {
        match self {
            VersionBand::Legacy => BandPins {
                cni_version: "v0.8.6",
                calico_version: "v3.16.5",
                playbook_set: "kubespray",
                ingress_nginx_tag: "v0.41.2",
                etcd_version: "v3.4.13",
                container_manager: "docker",
                docker_version: "19.03",
                containerd_version: "1.4.9",
                group_naming: GroupNaming::Legacy,
            },
            VersionBand::Stable => BandPins {
                cni_version: "v0.9.1",
                calico_version: "v3.19.2",
                playbook_set: "kubespray_2_17_0",
                ingress_nginx_tag: "v1.0.0",
                etcd_version: "v3.4.13",
                container_manager: "docker",
                docker_version: "19.03",
                containerd_version: "1.4.9",
                group_naming: GroupNaming::Modern,
            },
            VersionBand::Containerd => BandPins {
                cni_version: "v1.0.1",
                calico_version: "v3.22.3",
                playbook_set: "kubespray_2_19_0",
                ingress_nginx_tag: "v1.2.1",
                etcd_version: "v3.5.3",
                container_manager: "containerd",
                docker_version: "20.10",
                containerd_version: "1.6.4",
                group_naming: GroupNaming::Modern,
            },
        }
    }
}

impl fmt::Display for VersionBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionBand::Legacy => write!(f, "legacy"),
            VersionBand::Stable => write!(f, "stable"),
            VersionBand::Containerd => write!(f, "containerd"),
        }
    }
}
