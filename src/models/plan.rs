//! Removal plan models
//!
//! The plan is produced during validation and then carried through processing,
//! where the executor fills in per-OSD, per-device and per-host results.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use super::task::STRAY_HOST;

/// Key of an OSD inside a host plan.
///
/// Crush members are keyed by their numeric id. OSDs found on disk which do not
/// match the crush entry for their id (or have no crush entry at all) are strays,
/// encoded as `{id}.{uuid}.__stray` or `{id}.__stray` when the uuid is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DaemonKey {
    Member(u32),
    Stray { id: u32, uuid: Option<String> },
}

impl DaemonKey {
    pub fn stray(id: u32, uuid: &str) -> Self {
        let uuid = if uuid.is_empty() {
            None
        } else {
            Some(uuid.to_string())
        };
        DaemonKey::Stray { id, uuid }
    }

    /// Numeric OSD id, used for every cluster command
    pub fn id(&self) -> u32 {
        match self {
            DaemonKey::Member(id) | DaemonKey::Stray { id, .. } => *id,
        }
    }

    pub fn is_stray(&self) -> bool {
        matches!(self, DaemonKey::Stray { .. })
    }

    /// Name of the rook OSD deployment backing this daemon
    pub fn deployment_name(&self) -> String {
        format!("rook-ceph-osd-{}", self.id())
    }
}

impl fmt::Display for DaemonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonKey::Member(id) => write!(f, "{}", id),
            DaemonKey::Stray { id, uuid: Some(uuid) } => write!(f, "{}.{}.{}", id, uuid, STRAY_HOST),
            DaemonKey::Stray { id, uuid: None } => write!(f, "{}.{}", id, STRAY_HOST),
        }
    }
}

/// Error for malformed daemon keys
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid osd key '{0}'")]
pub struct ParseDaemonKeyError(String);

impl FromStr for DaemonKey {
    type Err = ParseDaemonKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseDaemonKeyError(s.to_string());
        match s.strip_suffix(STRAY_HOST).and_then(|rest| rest.strip_suffix('.')) {
            Some(rest) => {
                let (id, uuid) = match rest.split_once('.') {
                    Some((id, uuid)) => (id, Some(uuid.to_string())),
                    None => (rest, None),
                };
                let id = id.parse().map_err(|_| invalid())?;
                if uuid.as_deref() == Some("") {
                    return Err(invalid());
                }
                Ok(DaemonKey::Stray { id, uuid })
            }
            None => s.parse().map(DaemonKey::Member).map_err(|_| invalid()),
        }
    }
}

impl Serialize for DaemonKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DaemonKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Role of an OSD partition on a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionRole {
    #[serde(rename = "block")]
    Block,
    #[serde(rename = "db")]
    Db,
    #[default]
    #[serde(rename = "", other)]
    Unknown,
}

impl PartitionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionRole::Block => "block",
            PartitionRole::Db => "db",
            PartitionRole::Unknown => "",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "block" => PartitionRole::Block,
            "db" => PartitionRole::Db,
            _ => PartitionRole::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        *self == PartitionRole::Unknown
    }
}

impl fmt::Display for PartitionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-device facts for one OSD
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rotational: bool,
    /// Stable device path, by-path symlink when known
    #[serde(rename = "devicePath", default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(rename = "deviceID", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "osdPartition", default, skip_serializing_if = "String::is_empty")]
    pub partition: String,
    #[serde(
        rename = "osdPartitionType",
        default,
        skip_serializing_if = "PartitionRole::is_unknown"
    )]
    pub role: PartitionRole,
    /// Whole-device wipe allowed
    #[serde(rename = "deviceCleanup", default, skip_serializing_if = "std::ops::Not::not")]
    pub zap: bool,
    /// Device is reachable on a live host
    #[serde(rename = "deviceAlive", default, skip_serializing_if = "std::ops::Not::not")]
    pub alive: bool,
}

/// Status of a single removal step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemovePhase {
    Pending,
    #[serde(rename = "Rebalancing")]
    WaitingRebalance,
    #[serde(rename = "Removing")]
    InProgress,
    #[serde(rename = "RemovingStray")]
    Stray,
    Completed,
    #[serde(rename = "Removed")]
    Finished,
    Failed,
    Skipped,
}

impl RemovePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovePhase::Pending => "Pending",
            RemovePhase::WaitingRebalance => "Rebalancing",
            RemovePhase::InProgress => "Removing",
            RemovePhase::Stray => "RemovingStray",
            RemovePhase::Completed => "Completed",
            RemovePhase::Finished => "Removed",
            RemovePhase::Failed => "Failed",
            RemovePhase::Skipped => "Skipped",
        }
    }
}

impl fmt::Display for RemovePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one removal step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveStatus {
    pub status: RemovePhase,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RemoveStatus {
    pub fn new(status: RemovePhase) -> Self {
        Self {
            status,
            name: String::new(),
            error: String::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Self::new(RemovePhase::Failed)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn started_now(mut self) -> Self {
        self.started_at = Some(Utc::now());
        self
    }

    pub fn is(&self, phase: RemovePhase) -> bool {
        self.status == phase
    }
}

/// Per-OSD removal progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalResult {
    #[serde(rename = "osdRemoveStatus")]
    pub osd: RemoveStatus,
    #[serde(rename = "deploymentRemoveStatus", default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<RemoveStatus>,
    #[serde(rename = "deviceCleanUpJob", default, skip_serializing_if = "Option::is_none")]
    pub cleanup_job: Option<RemoveStatus>,
}

impl RemovalResult {
    pub fn new(osd_phase: RemovePhase) -> Self {
        Self {
            osd: RemoveStatus::new(osd_phase),
            deployment: None,
            cleanup_job: None,
        }
    }

    /// Cleanup job finished or will never run
    pub fn cleanup_settled(&self) -> bool {
        self.cleanup_job
            .as_ref()
            .map(|job| job.is(RemovePhase::Completed) || job.is(RemovePhase::Skipped))
            .unwrap_or(false)
    }
}

/// Everything needed to remove one OSD
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonPlan {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(rename = "clusterFSID", default, skip_serializing_if = "String::is_empty")]
    pub cluster_fsid: String,
    #[serde(rename = "hostDirectory", default, skip_serializing_if = "String::is_empty")]
    pub host_directory: String,
    #[serde(rename = "inCrushMap", default)]
    pub in_crush_map: bool,
    #[serde(rename = "deviceMapping", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub device_mapping: BTreeMap<String, DeviceInfo>,
    #[serde(rename = "skipDevicesCleanup", default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_device_cleanup_job: bool,
    #[serde(rename = "removeStatus", default, skip_serializing_if = "Option::is_none")]
    pub remove_status: Option<RemovalResult>,
}

impl DaemonPlan {
    /// Plan for a crush member with a known uuid
    pub fn member(
        uuid: &str,
        fsid: &str,
        host_directory: String,
        device_mapping: BTreeMap<String, DeviceInfo>,
    ) -> Self {
        Self {
            uuid: uuid.to_string(),
            cluster_fsid: fsid.to_string(),
            host_directory,
            in_crush_map: true,
            device_mapping,
            ..Default::default()
        }
    }

    pub fn osd_phase(&self) -> Option<RemovePhase> {
        self.remove_status.as_ref().map(|r| r.osd.status)
    }
}

/// Everything to remove on one host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPlan {
    #[serde(rename = "completeCleanup", default, skip_serializing_if = "std::ops::Not::not")]
    pub complete_cleanup: bool,
    #[serde(rename = "dropFromCrush", default, skip_serializing_if = "std::ops::Not::not")]
    pub drop_from_crush: bool,
    #[serde(rename = "osdMapping", default)]
    pub osd_mapping: BTreeMap<DaemonKey, DaemonPlan>,
    #[serde(rename = "nodeIsDown", default, skip_serializing_if = "std::ops::Not::not")]
    pub node_is_down: bool,
    #[serde(rename = "volumeInfoMissed", default, skip_serializing_if = "std::ops::Not::not")]
    pub volumes_info_missed: bool,
    #[serde(rename = "hostRemoveStatus", default, skip_serializing_if = "Option::is_none")]
    pub host_remove_status: Option<RemoveStatus>,
}

impl HostPlan {
    pub fn removes_host(&self) -> bool {
        self.complete_cleanup || self.drop_from_crush
    }
}

/// Removal plan plus accumulated issues and warnings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveInfo {
    #[serde(default)]
    pub cleanup_map: BTreeMap<String, HostPlan>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RemoveInfo {
    pub fn with_issue(issue: impl Into<String>) -> Self {
        Self {
            issues: vec![issue.into()],
            ..Default::default()
        }
    }

    /// Sort issues and warnings for stable output
    pub fn sort_messages(&mut self) {
        self.issues.sort();
        self.warnings.sort();
    }
}
