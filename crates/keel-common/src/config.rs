//! Global keel configuration.
//!
//! Resolution chain (later wins):
//! 1. Built-in defaults
//! 2. Optional JSON file (`--config` / `KEEL_CONFIG`)
//! 3. `KEEL_*` environment variables
//!
//! The resolved value is passed explicitly to the resolver and executor;
//! nothing reads it from process-global state.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{Error, Result};

/// Environment variable naming an optional JSON config file
pub const CONFIG_FILE_ENV: &str = "KEEL_CONFIG";

/// Default mirror for binaries fetched by the playbooks
pub const DEFAULT_DOWNLOAD_FILE_URL: &str = "https://iso.yunion.cn";

/// Default registry namespace for component images
pub const DEFAULT_IMAGE_REPO: &str = "registry.cn-beijing.aliyuncs.com/yunionio";

/// Directory holding one subdirectory per playbook-set version
pub const DEFAULT_ANSIBLE_ROOT: &str = "/opt/yunion/ansible";

/// Name of the playbook runner binary
pub const DEFAULT_ANSIBLE_PLAYBOOK_BIN: &str = "ansible-playbook";

/// Global keel configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    /// Base URL for binary downloads (`{{ download_file_url }}` in templates)
    pub download_file_url: String,
    /// Base image repository (`{{ image_repo }}` in templates)
    pub image_repo: String,
    /// Registry login user
    pub docker_user: String,
    /// Registry login password
    pub docker_password: Zeroizing<String>,
    /// Registry host the credentials apply to
    pub docker_host: String,
    /// Registry serving images for offline installs
    pub offline_registry_url: Option<String>,
    /// Static file server serving binaries and rpms for offline installs
    pub offline_nginx_url: Option<String>,
    /// Root directory of the installed playbook sets
    pub ansible_root: PathBuf,
    /// Playbook runner binary
    pub ansible_playbook_bin: String,
    /// Kill a playbook run after this many seconds
    pub playbook_timeout_secs: Option<u64>,
    /// Fetch artifacts once on a delegate node and fan them out
    pub download_run_once: bool,
}

impl Default for KeelConfig {
    fn default() -> Self {
        Self {
            download_file_url: DEFAULT_DOWNLOAD_FILE_URL.to_string(),
            image_repo: DEFAULT_IMAGE_REPO.to_string(),
            docker_user: String::new(),
            docker_password: Zeroizing::new(String::new()),
            docker_host: String::new(),
            offline_registry_url: None,
            offline_nginx_url: None,
            ansible_root: PathBuf::from(DEFAULT_ANSIBLE_ROOT),
            ansible_playbook_bin: DEFAULT_ANSIBLE_PLAYBOOK_BIN.to_string(),
            playbook_timeout_secs: None,
            download_run_once: true,
        }
    }
}

impl fmt::Debug for KeelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeelConfig")
            .field("download_file_url", &self.download_file_url)
            .field("image_repo", &self.image_repo)
            .field("docker_user", &self.docker_user)
            .field("docker_password", &"<redacted>")
            .field("docker_host", &self.docker_host)
            .field("offline_registry_url", &self.offline_registry_url)
            .field("offline_nginx_url", &self.offline_nginx_url)
            .field("ansible_root", &self.ansible_root)
            .field("ansible_playbook_bin", &self.ansible_playbook_bin)
            .field("playbook_timeout_secs", &self.playbook_timeout_secs)
            .field("download_run_once", &self.download_run_once)
            .finish()
    }
}

impl KeelConfig {
    /// Load defaults, then `path` (or `KEEL_CONFIG`), then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("read {}", path.display()), e))?;
        serde_json::from_str(&data).map_err(|e| {
            Error::config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply `KEEL_*` overrides using `lookup` to read variables
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = non_empty("KEEL_DOWNLOAD_FILE_URL") {
            self.download_file_url = v;
        }
        if let Some(v) = non_empty("KEEL_IMAGE_REPO") {
            self.image_repo = v;
        }
        if let Some(v) = non_empty("KEEL_DOCKER_USER") {
            self.docker_user = v;
        }
        if let Some(v) = non_empty("KEEL_DOCKER_PASSWORD") {
            self.docker_password = Zeroizing::new(v);
        }
        if let Some(v) = non_empty("KEEL_DOCKER_HOST") {
            self.docker_host = v;
        }
        if let Some(v) = non_empty("KEEL_OFFLINE_REGISTRY_URL") {
            self.offline_registry_url = Some(v);
        }
        if let Some(v) = non_empty("KEEL_OFFLINE_NGINX_URL") {
            self.offline_nginx_url = Some(v);
        }
        if let Some(v) = non_empty("KEEL_ANSIBLE_ROOT") {
            self.ansible_root = PathBuf::from(v);
        }
        if let Some(v) = non_empty("KEEL_ANSIBLE_PLAYBOOK_BIN") {
            self.ansible_playbook_bin = v;
        }
        if let Some(v) = non_empty("KEEL_PLAYBOOK_TIMEOUT_SECS") {
            let secs = v.parse::<u64>().map_err(|e| {
                Error::config_for_key("KEEL_PLAYBOOK_TIMEOUT_SECS", format!("{v:?}: {e}"))
            })?;
            self.playbook_timeout_secs = Some(secs);
        }
        if let Some(v) = non_empty("KEEL_DOWNLOAD_RUN_ONCE") {
            self.download_run_once = parse_bool(&v).ok_or_else(|| {
                Error::config_for_key("KEEL_DOWNLOAD_RUN_ONCE", format!("not a boolean: {v:?}"))
            })?;
        }
        Ok(())
    }

    /// Reject configurations the executor cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.ansible_root.as_os_str().is_empty() {
            return Err(Error::config_for_key("ansible_root", "must not be empty"));
        }
        if self.ansible_playbook_bin.is_empty() {
            return Err(Error::config_for_key(
                "ansible_playbook_bin",
                "must not be empty",
            ));
        }
        if self.playbook_timeout_secs == Some(0) {
            return Err(Error::config_for_key(
                "playbook_timeout_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// True when either offline endpoint is configured
    pub fn has_offline_endpoints(&self) -> bool {
        self.offline_registry_url.as_deref().is_some_and(|u| !u.is_empty())
            || self.offline_nginx_url.as_deref().is_some_and(|u| !u.is_empty())
    }

    /// Playbook timeout as a duration
    pub fn playbook_timeout(&self) -> Option<Duration> {
        self.playbook_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
