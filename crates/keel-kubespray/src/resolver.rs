//! Variable resolution for a target Kubernetes version
//!
//! Layers are applied in a fixed order: provider-agnostic defaults, the
//! version band's pins, the provider hook, then the offline mirror rewrite.

use std::collections::BTreeMap;

use keel_common::KeelConfig;
use tracing::debug;

use crate::provider::VarsHook;
use crate::vars::{ExtraConfig, KubesprayVars, Secret};
use crate::version::{KubeVersion, VersionBand};

const DEFAULT_KUBE_IMAGE_REPO: &str = "registry.aliyuncs.com/google_containers";
const DOCKER_RH_REPO_BASE_URL: &str = "https://mirrors.aliyun.com/docker-ce/linux/centos/{{ ansible_distribution_major_version }}/$basearch/stable";
const DOCKER_RH_REPO_GPGKEY: &str = "https://mirrors.aliyun.com/docker-ce/linux/centos/gpg";
const INGRESS_SSL_PROTOCOLS: &str = "TLSv1.2 TLSv1.3";
const INGRESS_SSL_CIPHERS: &str = "ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305";

const KUBE_RELEASE_PATH: &str = "/kubernetes-release/release";
const CALICOCTL_PATH: &str =
    "/calicoctl/releases/download/{{ calico_version }}/calicoctl-linux-{{ image_arch }}";
const CALICO_CRDS_PATH: &str = "/calico/archive/{{ calico_version }}.tar.gz";
const CRICTL_PATH: &str = "/cri-tools/releases/download/{{ crictl_version }}/crictl-{{ crictl_version }}-{{ ansible_system | lower }}-{{ image_arch }}.tar.gz";
const CNI_PATH: &str = "/plugins/releases/download/{{ cni_version }}/cni-plugins-linux-{{ image_arch }}-{{ cni_version }}.tgz";
const ETCD_PATH: &str = "/etcd-io/etcd/releases/download/{{ etcd_version }}/etcd-{{ etcd_version }}-linux-{{ image_arch }}.tar.gz";
const CONTAINERD_PATH: &str = "/containerd/containerd/releases/download/v{{ containerd_version }}/containerd-{{ containerd_version }}-linux-{{ image_arch }}.tar.gz";

fn kube_binary_urls(base: &str) -> [String; 3] {
    [
        format!("{base}{KUBE_RELEASE_PATH}/{{{{ kube_version }}}}/bin/linux/{{{{ image_arch }}}}/kubelet"),
        format!("{base}{KUBE_RELEASE_PATH}/{{{{ kube_version }}}}/bin/linux/{{{{ image_arch }}}}/kubectl"),
        format!("{base}{KUBE_RELEASE_PATH}/{{{{ kubeadm_version }}}}/bin/linux/{{{{ image_arch }}}}/kubeadm"),
    ]
}

/// Provider-agnostic defaults for `version`
pub fn default_vars(
    config: &KeelConfig,
    version: &KubeVersion,
    extra: Option<&ExtraConfig>,
) -> KubesprayVars {
    let base = "{{ download_file_url }}";
    let [kubelet, kubectl, kubeadm] = kube_binary_urls(base);
    let extra = extra.cloned().unwrap_or_default();

    KubesprayVars {
        download_run_once: config.download_run_once,
        kube_version: version.to_string(),
        kube_image_repo: DEFAULT_KUBE_IMAGE_REPO.to_string(),
        image_repo: config.image_repo.clone(),
        download_file_url: config.download_file_url.clone(),

        docker_rh_repo_base_url: DOCKER_RH_REPO_BASE_URL.to_string(),
        docker_rh_repo_gpgkey: DOCKER_RH_REPO_GPGKEY.to_string(),
        docker_registry_mirrors: extra.docker_registry_mirrors,
        docker_insecure_registries: extra.docker_insecure_registries,
        docker_user: config.docker_user.clone(),
        docker_password: Secret::new(config.docker_password.as_str()),
        docker_host: config.docker_host.clone(),

        enable_nodelocaldns: true,
        nodelocaldns_version: "1.16.0".to_string(),
        nodelocaldns_image_repo: "{{ image_repo }}/k8s-dns-node-cache".to_string(),
        dnsautoscaler_image_repo: "{{ image_repo }}/cluster-proportional-autoscaler-{{ image_arch  }}"
            .to_string(),
        coredns_image_is_namespaced: false,

        kubelet_download_url: kubelet,
        kubectl_download_url: kubectl,
        kubeadm_download_url: kubeadm,
        cni_download_url: format!("{base}{CNI_PATH}"),
        crictl_download_url: format!("{base}{CRICTL_PATH}"),

        etcd_image_repo: "{{ image_repo }}/etcd".to_string(),
        calicoctl_download_url: format!("{base}{CALICOCTL_PATH}"),
        calico_crds_download_url: format!("{base}{CALICO_CRDS_PATH}"),
        calico_node_image_repo: "{{ image_repo }}/calico-node".to_string(),
        calico_cni_image_repo: "{{ image_repo }}/calico-cni".to_string(),
        calico_policy_image_repo: "{{ image_repo }}/calico-kube-controllers".to_string(),
        calico_typha_image_repo: "{{ image_repo }}/calico-typha".to_string(),
        calico_flexvol_image_repo: "{{ image_repo }}/calico-pod2daemon-flexvol".to_string(),

        auto_renew_certificates: true,
        nginx_image_repo: "{{ image_repo }}/nginx".to_string(),
        nginx_image_tag: "1.19".to_string(),
        ingress_nginx_enabled: true,
        ingress_nginx_controller_image_repo: "{{ kube_image_repo }}/nginx-ingress-controller"
            .to_string(),
        ingress_nginx_configmap: BTreeMap::from([
            ("ssl-protocols".to_string(), INGRESS_SSL_PROTOCOLS.to_string()),
            ("ssl-ciphers".to_string(), INGRESS_SSL_CIPHERS.to_string()),
        ]),
        ..Default::default()
    }
}

/// Apply the component pins of `band`
pub fn apply_band(vars: &mut KubesprayVars, band: VersionBand) {
    let pins = band.pins();
    vars.cni_version = pins.cni_version.to_string();
    vars.calico_version = pins.calico_version.to_string();
    vars.kubespray_version = pins.playbook_set.to_string();
    vars.ingress_nginx_controller_image_tag = pins.ingress_nginx_tag.to_string();
    vars.etcd_version = pins.etcd_version.to_string();
    vars.container_manager = pins.container_manager.to_string();
    vars.docker_version = pins.docker_version.to_string();
    vars.docker_cli_version = pins.docker_version.to_string();
    vars.containerd_version = pins.containerd_version.to_string();

    if band == VersionBand::Containerd {
        vars.etcd_deployment_type = Some("host".to_string());
        rewrite_mirrored_urls(vars, "{{ download_file_url }}");
    }
}

/// Point every binary download at `<base>/<upstream host>/...`
fn rewrite_mirrored_urls(vars: &mut KubesprayVars, base: &str) {
    let [kubelet, kubectl, kubeadm] = kube_binary_urls(&format!("{base}/storage.googleapis.com"));
    vars.kubelet_download_url = kubelet;
    vars.kubectl_download_url = kubectl;
    vars.kubeadm_download_url = kubeadm;

    let calico = format!("{base}/github.com/projectcalico");
    vars.calicoctl_download_url = format!("{calico}{CALICOCTL_PATH}");
    vars.calico_crds_download_url = format!("{calico}{CALICO_CRDS_PATH}");
    vars.crictl_download_url = format!("{base}/github.com/kubernetes-sigs{CRICTL_PATH}");
    vars.cni_download_url = format!("{base}/github.com/containernetworking{CNI_PATH}");
    vars.etcd_download_url = Some(format!("{base}/github.com{ETCD_PATH}"));
    vars.containerd_download_url = Some(format!("{base}/github.com{CONTAINERD_PATH}"));
}

/// Rewrite images and binaries to offline mirrors
///
/// `registry` replaces every image repository; `nginx` serves binaries
/// under `/files` and docker-ce rpms under `/rpms`.
pub fn apply_offline(
    vars: &mut KubesprayVars,
    band: VersionBand,
    registry: Option<&str>,
    nginx: Option<&str>,
) {
    if let Some(registry) = registry.filter(|r| !r.is_empty()) {
        vars.docker_insecure_registries.push(registry.to_string());
        let repo = format!("{}/yunionio", registry.trim_end_matches('/'));
        vars.kube_image_repo = repo.clone();
        vars.image_repo = repo;
    }

    if let Some(nginx) = nginx.filter(|n| !n.is_empty()) {
        let nginx = nginx.trim_end_matches('/');
        let etcd = vars.etcd_download_url.take();
        let containerd = vars.containerd_download_url.take();
        rewrite_mirrored_urls(vars, &format!("{nginx}/files"));
        if band != VersionBand::Containerd {
            vars.etcd_download_url = etcd;
            vars.containerd_download_url = containerd;
        }
        vars.docker_rh_repo_base_url = format!("{nginx}/rpms/");
        vars.docker_rh_repo_gpgkey = String::new();
    }
}

/// Computes the variable set for a run
#[derive(Debug, Clone)]
pub struct VarsResolver<'a> {
    config: &'a KeelConfig,
}

impl<'a> VarsResolver<'a> {
    /// Resolve against a global configuration
    pub fn new(config: &'a KeelConfig) -> Self {
        Self { config }
    }

    /// True when offline mirrors are configured and the provider allows them
    pub fn offline_enabled(&self, hook: &dyn VarsHook) -> bool {
        hook.supports_offline() && self.config.has_offline_endpoints()
    }

    /// Resolve the full variable set
    pub fn resolve(
        &self,
        version: &KubeVersion,
        extra: Option<&ExtraConfig>,
        hook: &dyn VarsHook,
    ) -> KubesprayVars {
        let band = version.band();
        let mut vars = default_vars(self.config, version, extra);
        apply_band(&mut vars, band);
        hook.apply(&mut vars);

        let offline = self.offline_enabled(hook);
        if offline {
            apply_offline(
                &mut vars,
                band,
                self.config.offline_registry_url.as_deref(),
                self.config.offline_nginx_url.as_deref(),
            );
        }

        debug!(
            version = %version,
            band = %band,
            provider = %hook.provider(),
            offline,
            playbook_set = %vars.kubespray_version,
            "resolved kubespray vars"
        );
        vars
    }
}
