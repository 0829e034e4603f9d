//! CLI commands

use std::path::{Path, PathBuf};

use keel_common::KeelConfig;
use keel_kubespray::{create_hook, Host, HostSpec, KubeVersion, Planner, ProviderType, VarsResolver};
use tracing::debug;

use crate::{Error, Result};

pub mod deploy;
pub mod inventory;
pub mod vars;
pub mod version_band;

/// Version assumed when a command does not name one
pub const DEFAULT_KUBE_VERSION: &str = "v1.22.9";

/// Read a JSON array of host descriptions
pub fn load_hosts(path: &Path) -> Result<Vec<Host>> {
    let data = std::fs::read_to_string(path)?;
    let specs: Vec<HostSpec> = serde_json::from_str(&data)?;
    if specs.is_empty() {
        return Err(Error::validation(format!("{} lists no hosts", path.display())));
    }
    debug!(path = %path.display(), hosts = specs.len(), "loaded hosts file");
    specs
        .into_iter()
        .map(|spec| spec.into_host().map_err(Error::from))
        .collect()
}

/// Load configuration from `path` (or `KEEL_CONFIG`) and the environment
pub fn load_config(path: Option<&PathBuf>) -> Result<KeelConfig> {
    Ok(KeelConfig::load(path.map(PathBuf::as_path))?)
}

/// Planner for `version` with variables resolved for `provider`
///
/// Fails when the provider does not deploy `version`.
pub fn planner(config: &KeelConfig, version: &KubeVersion, provider: ProviderType) -> Result<Planner> {
    let hook = create_hook(provider);
    hook.ensure_supported(version)?;
    let vars = VarsResolver::new(config).resolve(version, None, hook.as_ref());
    Ok(Planner::new(&config.ansible_root, version.band(), vars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn hosts_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write hosts");
        file
    }

    #[test]
    fn hosts_file_with_roles_loads() {
        let file = hosts_file(
            r#"[{"hostname": "master-0", "address": "10.0.0.10", "user": "root",
                 "password": "pw", "roles": ["master", "etcd"]}]"#,
        );
        let hosts = load_hosts(file.path()).expect("hosts should load");
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].hostname(), "master-0");
    }

    #[test]
    fn empty_hosts_file_is_rejected() {
        let file = hosts_file("[]");
        let err = load_hosts(file.path()).unwrap_err();
        assert!(err.to_string().contains("lists no hosts"));
    }

    #[test]
    fn planner_accepts_a_listed_version() {
        let version = KubeVersion::parse("v1.17.0").expect("version");
        assert!(planner(&KeelConfig::default(), &version, ProviderType::Onecloud).is_ok());
    }

    #[test]
    fn planner_rejects_a_version_the_provider_lacks() {
        let version = KubeVersion::parse("v1.20.0").expect("version");
        let err = planner(&KeelConfig::default(), &version, ProviderType::Aws).unwrap_err();
        assert!(err.to_string().contains("is not supported on aws"));
    }

    #[test]
    fn unknown_role_is_rejected() {
        let file = hosts_file(
            r#"[{"hostname": "n", "address": "a", "user": "u", "roles": ["gpu"]}]"#,
        );
        assert!(load_hosts(file.path()).is_err());
    }
}
