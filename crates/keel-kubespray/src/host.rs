//! Inventory hosts and their roles
//!
//! A [`Host`] is one SSH-reachable machine taking part in a run. It owns the
//! temporary file holding its private key (if any) and removes it when
//! cleared or dropped.

use std::collections::BTreeSet;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tracing::debug;
use zeroize::Zeroizing;

use crate::{Error, Result};

/// Role a host plays in the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Control plane (API server, scheduler, controller manager)
    Master,
    /// Member of the etcd cluster
    Etcd,
    /// Runs workloads
    Worker,
    /// Calico BGP route reflector
    NetworkRouteReflector,
}

impl Role {
    /// Every role, in inventory group order
    pub const ALL: [Role; 4] = [
        Role::Master,
        Role::Etcd,
        Role::Worker,
        Role::NetworkRouteReflector,
    ];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Etcd => write!(f, "etcd"),
            Role::Worker => write!(f, "worker"),
            Role::NetworkRouteReflector => write!(f, "network-route-reflector"),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "master" | "control-plane" | "kube-master" => Ok(Role::Master),
            "etcd" => Ok(Role::Etcd),
            "worker" | "node" | "kube-node" => Ok(Role::Worker),
            "network-route-reflector" | "calico-rr" => Ok(Role::NetworkRouteReflector),
            _ => Err(Error::validation(format!(
                "invalid role: {s}, expected one of: master, etcd, worker, network-route-reflector"
            ))),
        }
    }
}

/// Private key material plus the temp file it was written to
struct PrivateKey {
    material: Zeroizing<String>,
    file: TempPath,
}

/// One machine in an inventory
pub struct Host {
    hostname: String,
    address: String,
    user: String,
    password: Option<Zeroizing<String>>,
    ip: Option<String>,
    access_ip: Option<String>,
    roles: BTreeSet<Role>,
    private_key: Option<PrivateKey>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("hostname", &self.hostname)
            .field("address", &self.address)
            .field("user", &self.user)
            .field("has_password", &self.password.is_some())
            .field("ip", &self.ip)
            .field("access_ip", &self.access_ip)
            .field("roles", &self.roles)
            .field("private_key_file", &self.private_key_file())
            .finish()
    }
}

impl Host {
    /// Create a host; fails when no role is given
    pub fn new(
        hostname: impl Into<String>,
        address: impl Into<String>,
        user: impl Into<String>,
        password: Option<String>,
        roles: impl IntoIterator<Item = Role>,
    ) -> Result<Self> {
        let hostname = hostname.into();
        let roles: BTreeSet<Role> = roles.into_iter().collect();
        if roles.is_empty() {
            return Err(Error::validation_for_host(&hostname, "role not provided"));
        }
        Ok(Self {
            hostname,
            address: address.into(),
            user: user.into(),
            password: password.filter(|p| !p.is_empty()).map(Zeroizing::new),
            ip: None,
            access_ip: None,
            roles,
            private_key: None,
        })
    }

    /// Set the internal IP kubespray binds services to
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into()).filter(|s| !s.is_empty());
        self
    }

    /// Set the address other nodes use to reach this host
    pub fn with_access_ip(mut self, access_ip: impl Into<String>) -> Self {
        self.access_ip = Some(access_ip.into()).filter(|s| !s.is_empty());
        self
    }

    /// Hostname, unique within an inventory
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// SSH address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Login user
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Access IP override, if set
    pub fn access_ip(&self) -> Option<&str> {
        self.access_ip.as_deref()
    }

    /// Role set
    pub fn roles(&self) -> &BTreeSet<Role> {
        &self.roles
    }

    /// True if the host carries `role`
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// etcd member name, present only for etcd hosts
    pub fn etcd_member_name(&self) -> Option<&str> {
        self.has_role(Role::Etcd).then_some(self.hostname.as_str())
    }

    /// True while a password is set
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Private key content, if attached
    pub fn private_key(&self) -> Option<&str> {
        self.private_key.as_ref().map(|k| k.material.as_str())
    }

    /// Path of the key file handed to the runner
    pub fn private_key_file(&self) -> Option<&Path> {
        self.private_key.as_ref().map(|k| k.file.as_ref())
    }

    /// Attach private key material, replacing any previous key
    ///
    /// The key is validated, written to a uniquely named 0600 temp file and
    /// the password is discarded.
    pub fn set_private_key(&mut self, material: &[u8]) -> Result<()> {
        let text = std::str::from_utf8(material).map_err(|_| Error::InvalidPrivateKey {
            host: self.hostname.clone(),
            reason: "key is not valid UTF-8".to_string(),
        })?;
        validate_private_key(text).map_err(|reason| Error::InvalidPrivateKey {
            host: self.hostname.clone(),
            reason,
        })?;

        let mut file = tempfile::Builder::new()
            .prefix(&format!("keel-key-{}-", self.address))
            .tempfile()
            .map_err(|e| Error::io("create private key file", e))?;
        file.write_all(material)
            .and_then(|_| file.flush())
            .map_err(|e| Error::io("write private key file", e))?;

        let file = file.into_temp_path();
        debug!(host = %self.hostname, path = %file.display(), "wrote private key file");

        self.private_key = Some(PrivateKey {
            material: Zeroizing::new(text.to_string()),
            file,
        });
        self.password = None;
        Ok(())
    }

    /// Remove the key file and forget the key
    ///
    /// Calling this twice, or after the file vanished, is not an error.
    pub fn clear(&mut self) -> Result<()> {
        let Some(key) = self.private_key.take() else {
            return Ok(());
        };
        let path = key.file.to_path_buf();
        match key.file.close() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(
                format!("remove private key file {}", path.display()),
                e,
            )),
        }
    }

    /// Render the host as one tab-separated inventory line
    pub fn to_inventory_line(&self) -> Result<String> {
        if self.hostname.is_empty() {
            return Err(Error::validation("hostname is empty"));
        }
        if self.address.is_empty() {
            return Err(Error::validation_for_host(&self.hostname, "host is empty"));
        }
        if self.user.is_empty() {
            return Err(Error::validation_for_host(&self.hostname, "user is empty"));
        }

        let mut fields = vec![
            self.hostname.clone(),
            format!("ansible_host={}", self.address),
            format!("ansible_ssh_user={}", self.user),
        ];
        match (&self.private_key, &self.password) {
            (Some(key), _) => {
                fields.push(format!("ansible_ssh_private_key_file={}", key.file.display()))
            }
            (None, Some(password)) => fields.push(format!("ansible_ssh_pass={}", password.as_str())),
            (None, None) => {}
        }
        if let Some(ip) = &self.ip {
            fields.push(format!("ip={ip}"));
        }
        if let Some(access_ip) = &self.access_ip {
            fields.push(format!("access_ip={access_ip}"));
        }
        if let Some(name) = self.etcd_member_name() {
            fields.push(format!("etcd_member_name={name}"));
        }
        Ok(fields.join("\t"))
    }
}

const OPENSSH_MAGIC: &[u8] = b"openssh-key-v1\0";
const PEM_LABELS: [&str; 4] = [
    "OPENSSH PRIVATE KEY",
    "RSA PRIVATE KEY",
    "EC PRIVATE KEY",
    "PRIVATE KEY",
];

/// Check that `text` is one unencrypted PEM private key
fn validate_private_key(text: &str) -> std::result::Result<(), String> {
    let text = text.trim();
    let label = PEM_LABELS
        .iter()
        .find(|label| text.starts_with(&format!("-----BEGIN {label}-----")))
        .ok_or_else(|| "missing PEM private key header".to_string())?;

    let footer = format!("-----END {label}-----");
    if !text.ends_with(&footer) {
        return Err(format!("missing {footer}"));
    }

    let header = format!("-----BEGIN {label}-----");
    let body = &text[header.len()..text.len() - footer.len()];
    if body.contains("Proc-Type:") || body.contains("DEK-Info:") {
        return Err("encrypted keys are not supported".to_string());
    }

    let encoded: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    let der = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| format!("invalid base64 body: {e}"))?;

    if *label == "OPENSSH PRIVATE KEY" {
        let rest = der
            .strip_prefix(OPENSSH_MAGIC)
            .ok_or_else(|| "bad openssh key magic".to_string())?;
        match openssh_string(rest) {
            Some(b"none") => Ok(()),
            Some(_) => Err("encrypted keys are not supported".to_string()),
            None => Err("truncated openssh key".to_string()),
        }
    } else if der.first() == Some(&0x30) {
        Ok(())
    } else {
        Err("key body is not a DER sequence".to_string())
    }
}

/// Read one length-prefixed string from an openssh key blob
fn openssh_string(buf: &[u8]) -> Option<&[u8]> {
    let len_bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    buf.get(4..4 + len)
}

/// Serialized host description, as read from hosts files
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostSpec {
    /// Inventory hostname
    pub hostname: String,
    /// SSH address
    pub address: String,
    /// Login user
    pub user: String,
    /// Login password
    #[serde(default)]
    pub password: Option<String>,
    /// Path to a private key to attach
    #[serde(default)]
    pub private_key_file: Option<PathBuf>,
    /// Internal IP override
    #[serde(default)]
    pub ip: Option<String>,
    /// Access IP override
    #[serde(default)]
    pub access_ip: Option<String>,
    /// Role names
    pub roles: Vec<String>,
}

impl HostSpec {
    /// Build a [`Host`], reading and attaching the private key if one is named
    pub fn into_host(self) -> Result<Host> {
        let roles = self
            .roles
            .iter()
            .map(|r| r.parse())
            .collect::<Result<Vec<Role>>>()?;
        let mut host = Host::new(self.hostname, self.address, self.user, self.password, roles)?;
        if let Some(ip) = self.ip {
            host = host.with_ip(ip);
        }
        if let Some(access_ip) = self.access_ip {
            host = host.with_access_ip(access_ip);
        }
        if let Some(path) = self.private_key_file {
            let material = std::fs::read(&path)
                .map_err(|e| Error::io(format!("read {}", path.display()), e))?;
            host.set_private_key(&material)?;
        }
        Ok(host)
    }
}
