//! Disk daemon report models
//!
//! The disk daemon runs on every storage node and reports which block devices and
//! partitions hold OSD data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Report preparation state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskDaemonState {
    #[default]
    Ok,
    Failed,
    Preparing,
    Skipped,
}

/// Top-level disk daemon response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskDaemonReport {
    #[serde(default)]
    pub state: DiskDaemonState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub osds_report: Option<OsdsReport>,
}

/// OSD-related part of a report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsdsReport {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// OSD id (as found on disk) to every on-disk instance with that id
    #[serde(default)]
    pub osds: BTreeMap<String, Vec<OsdDaemonInfo>>,
}

/// One OSD instance found on a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsdDaemonInfo {
    #[serde(rename = "osd_uuid", default, skip_serializing_if = "String::is_empty")]
    pub osd_uuid: String,
    #[serde(rename = "osd_fsid", default, skip_serializing_if = "String::is_empty")]
    pub cluster_fsid: String,
    #[serde(rename = "osd_device", default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<OsdDevice>,
    #[serde(rename = "osd_partitions", default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<OsdPartition>,
}

impl OsdDaemonInfo {
    /// Partition entry a device is related to
    pub fn partition_of(&self, device: &OsdDevice) -> Option<&OsdPartition> {
        self.partitions
            .iter()
            .find(|part| part.partition == device.partition)
    }
}

/// Physical device backing an OSD partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsdDevice {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_id: String,
    #[serde(rename = "device_pathes", default, skip_serializing_if = "Vec::is_empty")]
    pub symlinks: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rotational: bool,
    /// Related OSD partition
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub partition: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parted_by: String,
}

/// OSD partition (LV or physical partition)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsdPartition {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub partition: String,
    #[serde(rename = "partition_symlinks", default, skip_serializing_if = "Vec::is_empty")]
    pub symlinks: Vec<String>,
    /// block, db, wal
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub part_type: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exists: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub lvm: bool,
}
