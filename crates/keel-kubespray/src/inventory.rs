//! Ansible inventory rendering
//!
//! An [`Inventory`] is the host list for one run. It renders to the INI-style
//! grouped text that `ansible-playbook -i` consumes:
//!
//! ```text
//! [all]
//! node1	ansible_host=192.168.2.1	ansible_ssh_user=root	etcd_member_name=node1
//!
//! [kube-master]
//! node1
//!
//! ...
//!
//! [k8s-cluster:children]
//! kube-master
//! kube-control-plane
//! kube-node
//! calico-rr
//! ```

use std::collections::HashSet;
use std::fmt::Write;

use crate::host::{Host, Role};
use crate::{Error, Result};

/// Spelling of inventory group names
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GroupNaming {
    /// `kube-master`, `k8s-cluster`; understood by older playbook sets
    #[default]
    Legacy,
    /// `kube_master`, `k8s_cluster`; required by newer playbook sets
    Modern,
}

impl GroupNaming {
    fn spell(self, group: &str) -> String {
        match self {
            GroupNaming::Legacy => group.to_string(),
            GroupNaming::Modern => group.replace('-', "_"),
        }
    }
}

/// Inventory groups in render order, with the role that populates each
const GROUPS: [(&str, Role); 5] = [
    ("kube-master", Role::Master),
    ("kube-control-plane", Role::Master),
    ("etcd", Role::Etcd),
    ("kube-node", Role::Worker),
    ("calico-rr", Role::NetworkRouteReflector),
];

const CLUSTER_CHILDREN: [&str; 4] = ["kube-master", "kube-control-plane", "kube-node", "calico-rr"];

/// Hosts for one playbook run
#[derive(Debug)]
pub struct Inventory {
    hosts: Vec<Host>,
    naming: GroupNaming,
}

impl Inventory {
    /// Build an inventory; hostnames must be unique
    pub fn new(hosts: Vec<Host>, naming: GroupNaming) -> Result<Self> {
        let mut seen = HashSet::new();
        for host in &hosts {
            if !seen.insert(host.hostname()) {
                return Err(Error::validation_for_host(
                    host.hostname(),
                    "duplicate hostname in inventory",
                ));
            }
        }
        Ok(Self { hosts, naming })
    }

    /// Hosts in insertion order
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// Mutable access, used when clearing key files after a run
    pub fn hosts_mut(&mut self) -> &mut [Host] {
        &mut self.hosts
    }

    /// Group naming in effect
    pub fn naming(&self) -> GroupNaming {
        self.naming
    }

    /// Number of hosts
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// True when there are no hosts
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// True if a host with `hostname` is present
    pub fn contains(&self, hostname: &str) -> bool {
        self.hosts.iter().any(|h| h.hostname() == hostname)
    }

    /// Look up a host by name
    pub fn get(&self, hostname: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.hostname() == hostname)
    }

    /// Hosts carrying `role`, in insertion order
    pub fn hosts_with_role(&self, role: Role) -> impl Iterator<Item = &Host> {
        self.hosts.iter().filter(move |h| h.has_role(role))
    }

    /// Primary group name for `role` under this inventory's naming
    ///
    /// Masters resolve to `kube-master` for legacy playbook sets and to
    /// `kube_control_plane` for modern ones.
    pub fn group_name(&self, role: Role) -> String {
        let group = match (role, self.naming) {
            (Role::Master, GroupNaming::Legacy) => "kube-master",
            (Role::Master, GroupNaming::Modern) => "kube-control-plane",
            (Role::Etcd, _) => "etcd",
            (Role::Worker, _) => "kube-node",
            (Role::NetworkRouteReflector, _) => "calico-rr",
        };
        self.naming.spell(group)
    }

    /// Access addresses of masters, for the API server certificate SANs
    pub fn supplementary_addresses(&self) -> Vec<String> {
        self.hosts_with_role(Role::Master)
            .map(|h| h.access_ip().unwrap_or(h.address()).to_string())
            .collect()
    }

    /// Render the inventory file content
    pub fn render(&self) -> Result<String> {
        if self.hosts.is_empty() {
            return Err(Error::validation("hosts is empty"));
        }
        if self.hosts_with_role(Role::Etcd).next().is_none() {
            return Err(Error::validation("etcd nodes is empty"));
        }

        let mut out = String::from("[all]\n");
        for host in &self.hosts {
            if host.roles().is_empty() {
                return Err(Error::validation_for_host(
                    host.hostname(),
                    format!("host {} no roles", host.hostname()),
                ));
            }
            out.push_str(&host.to_inventory_line()?);
            out.push('\n');
        }
        out.push('\n');

        for (group, role) in GROUPS {
            let _ = writeln!(out, "[{}]", self.naming.spell(group));
            for host in self.hosts_with_role(role) {
                out.push_str(host.hostname());
                out.push('\n');
            }
            out.push('\n');
        }

        let _ = write!(out, "[{}]", self.naming.spell("k8s-cluster:children"));
        for child in CLUSTER_CHILDREN {
            out.push('\n');
            out.push_str(&self.naming.spell(child));
        }
        Ok(out)
    }

    /// Consume the inventory, returning its hosts
    pub fn into_hosts(self) -> Vec<Host> {
        self.hosts
    }
}
