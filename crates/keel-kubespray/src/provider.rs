//! Per-infrastructure overrides applied to resolved variables

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::vars::KubesprayVars;
use crate::version::KubeVersion;
use crate::{Error, Result};

/// Infrastructure the cluster machines run on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    /// Virtual machines on a onecloud region
    Onecloud,
    /// onecloud KVM hosts
    OnecloudKvm,
    /// Alibaba Cloud
    Aliyun,
    /// Amazon Web Services
    Aws,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::Onecloud => write!(f, "onecloud"),
            ProviderType::OnecloudKvm => write!(f, "onecloud-kvm"),
            ProviderType::Aliyun => write!(f, "aliyun"),
            ProviderType::Aws => write!(f, "aws"),
        }
    }
}

impl FromStr for ProviderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "onecloud" => Ok(ProviderType::Onecloud),
            "onecloud-kvm" | "onecloud_kvm" => Ok(ProviderType::OnecloudKvm),
            "aliyun" => Ok(ProviderType::Aliyun),
            "aws" => Ok(ProviderType::Aws),
            _ => Err(Error::validation(format!(
                "invalid provider type: {s}, expected one of: onecloud, onecloud-kvm, aliyun, aws"
            ))),
        }
    }
}

/// Provider-specific adjustment of the variable set
pub trait VarsHook: Send + Sync {
    /// Provider this hook belongs to
    fn provider(&self) -> ProviderType;

    /// Kubernetes versions this provider can deploy
    fn supported_versions(&self) -> &'static [&'static str];

    /// Whether offline mirrors may be used with this provider
    fn supports_offline(&self) -> bool;

    /// Mutate the resolved variables in place
    fn apply(&self, vars: &mut KubesprayVars);

    /// Inventory hostname of a machine
    ///
    /// `region_id` is the provider's external region id, e.g.
    /// `aws/ap-southeast-1`.
    fn hostname(&self, name: &str, _private_ip: Option<&str>, _region_id: Option<&str>) -> Result<String> {
        Ok(name.to_string())
    }

    /// Fail unless this provider deploys `version`
    fn ensure_supported(&self, version: &KubeVersion) -> Result<()> {
        let wanted = version.to_string();
        if self.supported_versions().contains(&wanted.as_str()) {
            return Ok(());
        }
        Err(Error::validation(format!(
            "kubernetes {wanted} is not supported on {}, expected one of: {}",
            self.provider(),
            self.supported_versions().join(", ")
        )))
    }
}

const BASE_VERSIONS: &[&str] = &["v1.17.0", "v1.20.0", "v1.22.9"];
const AWS_VERSIONS: &[&str] = &["v1.22.9"];

/// Hook that leaves the defaults untouched
#[derive(Clone, Debug)]
pub struct BaseHook {
    provider: ProviderType,
    offline: bool,
}

impl BaseHook {
    /// Create a base hook for `provider`
    pub fn new(provider: ProviderType, offline: bool) -> Self {
        Self { provider, offline }
    }
}

impl VarsHook for BaseHook {
    fn provider(&self) -> ProviderType {
        self.provider
    }

    fn supported_versions(&self) -> &'static [&'static str] {
        BASE_VERSIONS
    }

    fn supports_offline(&self) -> bool {
        self.offline
    }

    fn apply(&self, _vars: &mut KubesprayVars) {}
}

/// Preferred kubelet address order on AWS; instance DNS names don't always resolve
pub const AWS_KUBELET_ADDRESS_TYPES: &str = "InternalIP,InternalDNS,Hostname,ExternalDNS,ExternalIP";

/// Hook for AWS: upstream images and binaries, containerd, external cloud provider
#[derive(Clone, Debug, Default)]
pub struct AwsHook;

impl VarsHook for AwsHook {
    fn provider(&self) -> ProviderType {
        ProviderType::Aws
    }

    fn supported_versions(&self) -> &'static [&'static str] {
        AWS_VERSIONS
    }

    fn supports_offline(&self) -> bool {
        false
    }

    fn apply(&self, vars: &mut KubesprayVars) {
        vars.kube_image_repo = "k8s.gcr.io".to_string();
        vars.nodelocaldns_image_repo.clear();
        vars.dnsautoscaler_image_repo.clear();
        vars.nginx_image_repo.clear();
        vars.coredns_image_is_namespaced = true;

        vars.kubelet_download_url.clear();
        vars.kubectl_download_url.clear();
        vars.kubeadm_download_url.clear();
        vars.etcd_download_url = None;
        vars.containerd_download_url = None;
        vars.cni_download_url.clear();
        vars.calicoctl_download_url.clear();
        vars.calico_crds_download_url.clear();
        vars.crictl_download_url.clear();

        vars.container_manager = "containerd".to_string();
        vars.containerd_version.clear();
        vars.etcd_deployment_type = Some("host".to_string());
        vars.docker_version = "20.10".to_string();
        vars.docker_cli_version = "20.10".to_string();
        vars.kube_network_plugin = Some("cni".to_string());
        vars.ingress_nginx_controller_image_repo.clear();
        vars.ingress_nginx_enabled = false;

        vars.kubelet_preferred_address_types = Some(AWS_KUBELET_ADDRESS_TYPES.to_string());
        vars.cloud_provider = Some("external".to_string());
        vars.kube_kubeadm_controller_extra_args = Some(BTreeMap::from([(
            "cloud-provider".to_string(),
            "external".to_string(),
        )]));
    }

    /// EC2 private DNS name, which the external cloud provider expects as node name
    ///
    /// `ip-10-1-22-51.ap-southeast-1.compute.internal`, or
    /// `ip-10-1-22-51.ec2.internal` in us-east-1.
    fn hostname(&self, name: &str, private_ip: Option<&str>, region_id: Option<&str>) -> Result<String> {
        let ip = private_ip
            .ok_or_else(|| Error::validation_for_host(name, "aws machine has no private ip"))?;
        let region = match region_id.and_then(|id| id.split_once('/')) {
            Some((_, region)) if !region.is_empty() && !region.contains('/') => region,
            _ => {
                return Err(Error::validation_for_host(
                    name,
                    format!("invalid cloudregion external id {:?}", region_id.unwrap_or_default()),
                ))
            }
        };
        let dashed = ip.replace('.', "-");
        if region == "us-east-1" {
            Ok(format!("ip-{dashed}.ec2.internal"))
        } else {
            Ok(format!("ip-{dashed}.{region}.compute.internal"))
        }
    }
}

/// Create the variables hook for a provider
pub fn create_hook(provider: ProviderType) -> Box<dyn VarsHook> {
    match provider {
        ProviderType::Onecloud | ProviderType::OnecloudKvm => {
            Box::new(BaseHook::new(provider, true))
        }
        ProviderType::Aliyun => Box::new(BaseHook::new(provider, false)),
        ProviderType::Aws => Box::new(AwsHook),
    }
}
