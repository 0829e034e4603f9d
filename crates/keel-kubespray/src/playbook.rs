//! Playbooks and the playbook set they live in

use std::fmt;
use std::path::{Path, PathBuf};

/// Name of the ansible configuration file at the root of a playbook set
pub const ANSIBLE_CONFIG_FILE: &str = "ansible.cfg";

/// Entry-point playbooks of a kubespray playbook set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Playbook {
    /// Full cluster reconciliation
    Cluster,
    /// Join new worker nodes
    Scale,
    /// Drain and remove nodes
    RemoveNode,
    /// Rolling upgrade
    UpgradeCluster,
}

impl Playbook {
    /// File name inside the playbook set
    pub fn file_name(self) -> &'static str {
        match self {
            Playbook::Cluster => "cluster.yml",
            Playbook::Scale => "scale.yml",
            Playbook::RemoveNode => "remove-node.yml",
            Playbook::UpgradeCluster => "upgrade-cluster.yml",
        }
    }
}

impl fmt::Display for Playbook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// One versioned kubespray checkout under the ansible root
///
/// Carries the `ANSIBLE_CONFIG` location explicitly so concurrent runs
/// against different playbook sets never share process state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaybookSet {
    root: PathBuf,
    version: String,
}

impl PlaybookSet {
    /// `<root>/<version>`, e.g. `/opt/yunion/ansible/kubespray_2_19_0`
    pub fn new(root: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            version: version.into(),
        }
    }

    /// Ansible root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Playbook set directory name
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Directory holding the playbooks
    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.version)
    }

    /// Path to `playbook`
    pub fn playbook_path(&self, playbook: Playbook) -> PathBuf {
        self.dir().join(playbook.file_name())
    }

    /// Value for the child's `ANSIBLE_CONFIG`
    pub fn config_path(&self) -> PathBuf {
        self.dir().join(ANSIBLE_CONFIG_FILE)
    }
}
