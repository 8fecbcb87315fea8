//! OSD removal task models
//!
//! A removal task is a user-facing request (spec) plus the controller-owned
//! status. The JSON shape follows the `CephOsdRemoveTask` resource so tasks can be
//! exchanged with existing tooling unchanged.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::RemoveInfo;

/// Pseudo-host holding OSDs that cannot be tied to any known host
pub const STRAY_HOST: &str = "__stray";

/// Removal request for a single device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCleanupSpec {
    pub device: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_device_cleanup: bool,
}

/// Removal request for a single OSD id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsdCleanupSpec {
    pub id: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_device_cleanup: bool,
}

/// Per-host cleanup directive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCleanupSpec {
    /// Remove every OSD on the host, wipe its devices and drop the host from crush
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub complete_cleanup: bool,
    /// Remove every OSD on the host and the host itself from crush only
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub drop_from_crush: bool,
    /// Wipe partitions which belong to no OSD known to the cluster
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cleanup_stray_partitions: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanup_by_device: Vec<DeviceCleanupSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanup_by_osd: Vec<OsdCleanupSpec>,
}

impl NodeCleanupSpec {
    /// Whether the directive removes the whole host from crush
    pub fn removes_host(&self) -> bool {
        self.complete_cleanup || self.drop_from_crush
    }
}

/// Task spec, written by the user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Hosts to process; empty means discovery mode
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nodes: BTreeMap<String, NodeCleanupSpec>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub approve: bool,
    /// Operator acknowledgement of a failed task
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub resolved: bool,
}

/// Task lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskPhase {
    Pending,
    Validating,
    ApproveWaiting,
    WaitingOperator,
    Processing,
    Completed,
    CompletedWithWarnings,
    Failed,
    ValidationFailed,
    Aborted,
}

impl TaskPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPhase::Pending => "Pending",
            TaskPhase::Validating => "Validating",
            TaskPhase::ApproveWaiting => "ApproveWaiting",
            TaskPhase::WaitingOperator => "WaitingOperator",
            TaskPhase::Processing => "Processing",
            TaskPhase::Completed => "Completed",
            TaskPhase::CompletedWithWarnings => "CompletedWithWarnings",
            TaskPhase::Failed => "Failed",
            TaskPhase::ValidationFailed => "ValidationFailed",
            TaskPhase::Aborted => "Aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(TaskPhase::Pending),
            "Validating" => Some(TaskPhase::Validating),
            "ApproveWaiting" => Some(TaskPhase::ApproveWaiting),
            "WaitingOperator" => Some(TaskPhase::WaitingOperator),
            "Processing" => Some(TaskPhase::Processing),
            "Completed" => Some(TaskPhase::Completed),
            "CompletedWithWarnings" => Some(TaskPhase::CompletedWithWarnings),
            "Failed" => Some(TaskPhase::Failed),
            "ValidationFailed" => Some(TaskPhase::ValidationFailed),
            "Aborted" => Some(TaskPhase::Aborted),
            _ => None,
        }
    }

    /// Terminal phases are never reconciled again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskPhase::Completed
                | TaskPhase::CompletedWithWarnings
                | TaskPhase::Failed
                | TaskPhase::ValidationFailed
                | TaskPhase::Aborted
        )
    }
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of the CephCluster object version a condition was recorded against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterVersion {
    #[serde(rename = "cephClusterResourceVersion")]
    pub resource_version: String,
    #[serde(rename = "cephClusterGeneration")]
    pub generation: i64,
}

/// Phase history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCondition {
    pub timestamp: DateTime<Utc>,
    pub phase: TaskPhase,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nodes: BTreeMap<String, NodeCleanupSpec>,
    #[serde(
        rename = "cephClusterVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cluster_version: Option<ClusterVersion>,
}

/// Task status, owned by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub phase: TaskPhase,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase_info: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_info: Option<RemoveInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<TaskCondition>,
}

impl TaskStatus {
    /// Fresh status for a newly seen task
    pub fn initial(spec: &TaskSpec) -> Self {
        Self {
            phase: TaskPhase::Pending,
            phase_info: "initializing".to_string(),
            remove_info: None,
            messages: vec!["initiated".to_string()],
            conditions: vec![TaskCondition {
                timestamp: Utc::now(),
                phase: TaskPhase::Pending,
                nodes: spec.nodes.clone(),
                cluster_version: None,
            }],
        }
    }

    /// Copy of this status moved to `Aborted` with the given reason.
    ///
    /// The removal plan is kept so the operator can see how far processing got.
    pub fn aborted(&self, reason: &str) -> Self {
        let mut status = self.clone();
        status.phase = TaskPhase::Aborted;
        status.phase_info = reason.to_string();
        status.messages.push(reason.to_string());
        status.conditions.push(TaskCondition {
            timestamp: Utc::now(),
            phase: TaskPhase::Aborted,
            nodes: BTreeMap::new(),
            cluster_version: None,
        });
        status
    }

    pub fn is_active(&self) -> bool {
        !self.phase.is_terminal()
    }
}

/// A persisted removal task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalTask {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub spec: TaskSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

impl RemovalTask {
    /// Tasks without status are not initialized yet and count as active
    pub fn is_active(&self) -> bool {
        self.status.as_ref().map(TaskStatus::is_active).unwrap_or(true)
    }

    pub fn phase(&self) -> Option<TaskPhase> {
        self.status.as_ref().map(|s| s.phase)
    }
}

/// Request body for task creation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateTaskRequest {
    pub name: String,
    #[serde(default)]
    pub spec: TaskSpec,
}

/// Request body for replacing the nodes section of a task
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateNodesRequest {
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeCleanupSpec>,
}
