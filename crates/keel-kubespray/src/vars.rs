//! Extra-vars handed to the playbook set
//!
//! Field names are the kubespray variable names; the struct serializes
//! straight into the `--extra-vars @file.json` document.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::Result;

/// Registry settings carried by a cluster
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraConfig {
    /// Registry mirrors configured on every docker daemon
    pub docker_registry_mirrors: Vec<String>,
    /// Registries docker may reach over plain HTTP
    pub docker_insecure_registries: Vec<String>,
}

/// A string that serializes normally but never prints in `Debug`
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    /// Wrap a value
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Borrow the value
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// True when no value is set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "\"\"")
        } else {
            write!(f, "[REDACTED]")
        }
    }
}

/// Full kubespray variable set for one run
///
/// Empty strings are left out of the serialized document so the playbook
/// set falls back to its own defaults. The gpg key is the exception: an
/// empty key disables the check.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubesprayVars {
    /// Fetch artifacts once on the first master and push them to peers
    pub download_run_once: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kube_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kube_image_repo: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_repo: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub download_file_url: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub docker_rh_repo_base_url: String,
    pub docker_rh_repo_gpgkey: String,
    pub docker_registry_mirrors: Vec<String>,
    pub docker_insecure_registries: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub docker_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub docker_cli_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub docker_user: String,
    #[serde(skip_serializing_if = "Secret::is_empty")]
    pub docker_password: Secret,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub docker_host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub container_manager: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub containerd_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etcd_deployment_type: Option<String>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub cni_version: String,
    pub enable_nodelocaldns: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub nodelocaldns_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub nodelocaldns_image_repo: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dnsautoscaler_image_repo: String,
    pub coredns_image_is_namespaced: bool,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub kubelet_download_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kubectl_download_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kubeadm_download_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cni_download_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub crictl_download_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etcd_download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containerd_download_url: Option<String>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub etcd_image_repo: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub etcd_version: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub calico_version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub calicoctl_download_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub calico_crds_download_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub calico_node_image_repo: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub calico_cni_image_repo: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub calico_policy_image_repo: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub calico_typha_image_repo: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub calico_flexvol_image_repo: String,

    /// Extra SANs for the API server certificate
    pub supplementary_addresses_in_ssl_keys: Vec<String>,

    /// Playbook set directory, e.g. `kubespray_2_19_0`
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kubespray_version: String,
    pub auto_renew_certificates: bool,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub nginx_image_repo: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub nginx_image_tag: String,
    pub ingress_nginx_enabled: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ingress_nginx_controller_image_repo: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ingress_nginx_controller_image_tag: String,
    pub ingress_nginx_configmap: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kube_network_plugin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubelet_preferred_address_types: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kube_kubeadm_controller_extra_args: Option<BTreeMap<String, String>>,

    // Set per operation by the planner
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_assert_errors: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etcd_retries: Option<u32>,
    /// Comma-joined names of the nodes being removed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_nodes_confirmation: Option<String>,
    /// False when removing nodes that are already offline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_nodes: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_confirmation: Option<bool>,
}

impl KubesprayVars {
    /// Pretty JSON for the extra-vars file
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_operation_fields_are_omitted() {
        let json = serde_json::to_value(KubesprayVars::default()).expect("serialize");
        for key in [
            "ignore_assert_errors",
            "etcd_retries",
            "node",
            "delete_nodes_confirmation",
            "reset_nodes",
            "cloud_provider",
            "etcd_deployment_type",
        ] {
            assert!(json.get(key).is_none(), "{key} should be omitted");
        }
        assert_eq!(json["download_run_once"], false);
    }

    #[test]
    fn docker_password_serializes_but_never_debug_prints() {
        let vars = KubesprayVars {
            docker_password: Secret::new("hunter2"),
            ..Default::default()
        };
        let json = vars.to_json_pretty().expect("serialize");
        assert!(json.contains("\"docker_password\": \"hunter2\""));
        assert!(!format!("{vars:?}").contains("hunter2"));
    }

    #[test]
    fn empty_strings_defer_to_playbook_defaults_except_gpgkey() {
        let vars = KubesprayVars {
            kubelet_download_url: String::new(),
            kube_image_repo: "k8s.gcr.io".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&vars).expect("serialize");
        assert!(json.get("kubelet_download_url").is_none());
        assert!(json.get("docker_password").is_none());
        assert_eq!(json["kube_image_repo"], "k8s.gcr.io");
        assert_eq!(json["docker_rh_repo_gpgkey"], "");
    }

    #[test]
    fn remove_fields_serialize_when_set() {
        let vars = KubesprayVars {
            node: Some("node2,node3".into()),
            delete_nodes_confirmation: Some("yes".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&vars).expect("serialize");
        assert_eq!(json["node"], "node2,node3");
        assert_eq!(json["delete_nodes_confirmation"], "yes");
    }
}
