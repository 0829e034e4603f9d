//! Kubernetes client helpers for provisioned clusters
//!
//! Clusters built by keel are reached through the kubeconfig recorded at
//! provisioning time, never through the ambient `KUBECONFIG`.

use std::time::Duration;

use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::Discovery;
use kube::{Client, Config};
use serde_json::Value;
use tracing::{debug, trace};

use crate::Error;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "keel";

/// Default connect timeout for clients of freshly provisioned clusters
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read timeout for clients of freshly provisioned clusters
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Build a client from kubeconfig YAML content
pub async fn client_from_kubeconfig(kubeconfig: &str) -> Result<Client, Error> {
    let kubeconfig = Kubeconfig::from_yaml(kubeconfig).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to parse kubeconfig: {e}"))
    })?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "create_client",
                format!("failed to load kubeconfig: {e}"),
            )
        })?;
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {e}"))
    })
}

/// Ask the API server for its version string (e.g. "v1.22.9")
pub async fn server_version(client: &Client) -> Result<String, Error> {
    let info = client.apiserver_version().await?;
    Ok(info.git_version)
}

/// Split apiVersion into (group, version); core resources have an empty group
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Get priority for a Kubernetes resource kind (lower = apply first)
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "StorageClass" | "PriorityClass" => 6,
        "Service" => 7,
        "Deployment" | "DaemonSet" | "StatefulSet" => 8,
        _ => 10,
    }
}

/// Parse a multi-document manifest and order documents for apply
pub fn ordered_documents(manifest: &str) -> Result<Vec<Value>, Error> {
    let mut docs = crate::yaml::parse_yaml_multi(manifest)
        .map_err(|e| Error::serialization_for_kind("manifest", format!("invalid YAML: {e}")))?;
    docs.sort_by_key(|doc| kind_priority(doc.get("kind").and_then(Value::as_str).unwrap_or("")));
    Ok(docs)
}

/// Server-side apply every document in `manifest`
///
/// Discovery is re-run after CRDs are applied so custom resources in the
/// same manifest resolve.
pub async fn apply_manifest(client: &Client, manifest: &str) -> Result<usize, Error> {
    let docs = ordered_documents(manifest)?;
    if docs.is_empty() {
        return Ok(0);
    }

    let mut discovery = run_discovery(client).await?;
    let mut crds_applied = false;

    for doc in &docs {
        let kind = doc.get("kind").and_then(Value::as_str).unwrap_or_default();
        if crds_applied && kind != "CustomResourceDefinition" {
            discovery = run_discovery(client).await?;
            crds_applied = false;
        }
        apply_document(client, &discovery, doc).await?;
        if kind == "CustomResourceDefinition" {
            crds_applied = true;
        }
    }

    debug!(count = docs.len(), "applied manifest documents");
    Ok(docs.len())
}

async fn run_discovery(client: &Client) -> Result<Discovery, Error> {
    Discovery::new(client.clone())
        .run()
        .await
        .map_err(|e| Error::internal_with_context("api-discovery", e.to_string()))
}

async fn apply_document(client: &Client, discovery: &Discovery, obj: &Value) -> Result<(), Error> {
    let kind = obj
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::internal_with_context("apply_manifest", "missing kind"))?;
    let api_version = obj
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::internal_with_context("apply_manifest", "missing apiVersion"))?;
    let name = obj
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::internal_with_context("apply_manifest", "missing metadata.name"))?;
    let namespace = obj.pointer("/metadata/namespace").and_then(Value::as_str);

    let (group, version) = parse_api_version(api_version);
    let gvk = kube::api::GroupVersionKind {
        group,
        version,
        kind: kind.to_string(),
    };

    let Some((api_resource, _)) = discovery.resolve_gvk(&gvk) else {
        return Err(Error::internal_with_context(
            "apply_manifest",
            format!("unknown resource type: {api_version}/{kind}"),
        ));
    };

    let params = PatchParams::apply(FIELD_MANAGER).force();
    let api: Api<DynamicObject> = match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &api_resource),
        None => Api::all_with(client.clone(), &api_resource),
    };

    api.patch(name, &params, &Patch::Apply(obj))
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "apply_manifest",
                format!("failed to apply {kind}/{name}: {e}"),
            )
        })?;

    trace!(kind = %kind, name = %name, namespace = ?namespace, "applied manifest");
    Ok(())
}
