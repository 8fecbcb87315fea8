//! Cluster-side view of the world
//!
//! Small owned projections of Kubernetes and Rook objects. The Kubernetes adapter
//! builds them from API objects; tests build them directly.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default rook data directory on hosts
pub const DEFAULT_DATA_DIR_HOST_PATH: &str = "/var/lib/rook";

/// Taints which mark a node as unusable
pub const UNAVAILABLE_NODE_TAINTS: [&str; 4] = [
    "node.kubernetes.io/unreachable",
    "node.kubernetes.io/unschedulable",
    "node.kubernetes.io/not-ready",
    "node.kubernetes.io/out-of-service",
];

/// Kubernetes node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Taint keys
    #[serde(default)]
    pub taints: Vec<String>,
}

impl ClusterNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_taint(mut self, key: &str) -> Self {
        self.taints.push(key.to_string());
        self
    }

    /// Availability and, for unavailable nodes, the reason
    pub fn availability(&self) -> (bool, Option<String>) {
        match self
            .taints
            .iter()
            .find(|taint| UNAVAILABLE_NODE_TAINTS.contains(&taint.as_str()))
        {
            Some(taint) => (
                false,
                Some(format!(
                    "node '{}' has '{}' taint, assuming node is not available",
                    self.name, taint
                )),
            ),
            None => (true, None),
        }
    }

    /// Whether the disk daemon is scheduled here
    pub fn has_disk_daemon(&self, selector: &LabelSelector) -> bool {
        !self.labels.is_empty() && selector.matches(&self.labels)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

/// Equality-based label selector (`k=v`, `k==v`, `k!=v`, `k`, `!k`, comma-joined)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
    raw: String,
}

/// Error for malformed label selectors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid label selector '{selector}': {reason}")]
pub struct LabelSelectorError {
    selector: String,
    reason: String,
}

impl LabelSelector {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|req| match req {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        })
    }
}

impl FromStr for LabelSelector {
    type Err = LabelSelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: &str| LabelSelectorError {
            selector: s.to_string(),
            reason: reason.to_string(),
        };
        let mut requirements = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let req = if let Some((k, v)) = part.split_once("!=") {
                Requirement::NotEquals(k.trim().to_string(), v.trim().to_string())
            } else if let Some((k, v)) = part.split_once("==") {
                Requirement::Equals(k.trim().to_string(), v.trim().to_string())
            } else if let Some((k, v)) = part.split_once('=') {
                Requirement::Equals(k.trim().to_string(), v.trim().to_string())
            } else if let Some(k) = part.strip_prefix('!') {
                Requirement::NotExists(k.trim().to_string())
            } else {
                Requirement::Exists(part.to_string())
            };
            let key = match &req {
                Requirement::Equals(k, _)
                | Requirement::NotEquals(k, _)
                | Requirement::Exists(k)
                | Requirement::NotExists(k) => k,
            };
            if !crate::utils::validation::validate_label_key(key) {
                return Err(fail("bad label key"));
            }
            requirements.push(req);
        }
        if requirements.is_empty() {
            return Err(fail("empty selector"));
        }
        Ok(Self {
            requirements,
            raw: s.to_string(),
        })
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Deployment replica counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    pub replicas: i32,
    pub ready_replicas: i32,
    pub available_replicas: i32,
}

impl DeploymentState {
    pub fn is_stopped(&self) -> bool {
        self.replicas == 0 && self.ready_replicas == 0 && self.available_replicas == 0
    }
}

/// Batch job counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub active: i32,
    pub succeeded: i32,
    pub failed: i32,
    /// A `Failed` condition is set to true
    pub failed_condition: bool,
}

impl JobState {
    pub fn has_failed(&self) -> bool {
        self.failed > 0 || self.failed_condition
    }
}

/// Device entry of a storage node spec
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDeviceSpec {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "fullpath", default)]
    pub full_path: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// Node entry of the CephCluster storage spec
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageNodeSpec {
    pub name: String,
    #[serde(default)]
    pub devices: Vec<StorageDeviceSpec>,
    #[serde(default)]
    pub device_filter: String,
    #[serde(default)]
    pub device_path_filter: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

/// The parts of a Rook CephCluster this controller relies on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CephClusterInfo {
    pub name: String,
    pub namespace: String,
    pub generation: i64,
    pub resource_version: String,
    pub external: bool,
    pub fsid: Option<String>,
    /// Ceph image currently running, used for cleanup jobs
    pub image: Option<String>,
    pub data_dir_host_path: String,
    pub storage_nodes: Vec<StorageNodeSpec>,
}

impl CephClusterInfo {
    pub fn fsid(&self) -> &str {
        self.fsid.as_deref().unwrap_or_default()
    }

    pub fn data_dir(&self) -> &str {
        if self.data_dir_host_path.is_empty() {
            DEFAULT_DATA_DIR_HOST_PATH
        } else {
            &self.data_dir_host_path
        }
    }

    /// On-host state directory of an OSD
    pub fn osd_host_directory(&self, fsid: &str, uuid: &str) -> String {
        format!("{}/{}/{}_{}", self.data_dir(), self.namespace, fsid, uuid)
    }
}

/// Short daemon state as reported by the health analysis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl DaemonStatus {
    pub fn is_skipped(&self) -> bool {
        self.status == "skipped"
    }
}

/// OSD spec analysis from the deployment health object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsdSpecAnalysis {
    #[serde(default)]
    pub ceph_cluster_spec_generation: Option<i64>,
    #[serde(default)]
    pub spec_analysis: BTreeMap<String, DaemonStatus>,
}

/// The parts of a CephDeploymentHealth object this controller relies on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentHealth {
    /// Name, which is also the CephCluster name
    pub name: String,
    /// Health report carries a CephCluster status
    pub has_cluster_status: bool,
    pub osd_analysis: Option<OsdSpecAnalysis>,
}

/// Host path volume of a cleanup job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostPathVolume {
    pub name: String,
    pub path: String,
    /// Require the path to be an existing directory
    pub directory: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    pub read_only: bool,
}

/// One wipe step of a cleanup job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupContainer {
    pub name: String,
    pub device: String,
    pub script: String,
}

/// Rendered device cleanup job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupJob {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    /// Host the pod is pinned to
    pub host: String,
    pub image: String,
    pub active_deadline_secs: i64,
    pub volumes: Vec<HostPathVolume>,
    pub mounts: Vec<VolumeMount>,
    pub containers: Vec<CleanupContainer>,
}
