//! Collaborators backed by the cluster's own API server

use async_trait::async_trait;
use tracing::debug;

use keel_common::kube_utils::{apply_manifest, client_from_kubeconfig, server_version};

use crate::domain::{ClusterProbe, ManifestApplier};
use crate::Result;

/// Probes the API server with a client built from the kubeconfig
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeClusterProbe;

#[async_trait]
impl ClusterProbe for KubeClusterProbe {
    async fn server_version(&self, kubeconfig: &str) -> Result<String> {
        let client = client_from_kubeconfig(kubeconfig).await?;
        Ok(server_version(&client).await?)
    }
}

/// Server-side applies manifests in kind priority order
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeManifestApplier;

#[async_trait]
impl ManifestApplier for KubeManifestApplier {
    async fn apply(&self, kubeconfig: &str, manifest: &str) -> Result<usize> {
        let client = client_from_kubeconfig(kubeconfig).await?;
        let applied = apply_manifest(&client, manifest).await?;
        debug!(documents = applied, "manifest applied");
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn garbage_kubeconfig_is_an_error_not_a_panic() {
        let err = KubeClusterProbe
            .server_version("not: [a kubeconfig")
            .await
            .unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn applier_rejects_garbage_kubeconfig() {
        assert!(KubeManifestApplier
            .apply("{}", "kind: Namespace")
            .await
            .is_err());
    }
}
