//! Ceph CLI JSON output models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One entry of `ceph osd metadata -f json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsdMetadata {
    pub id: u32,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub devices: String,
    /// Comma-separated `name=path` pairs
    #[serde(default)]
    pub device_paths: String,
    /// Comma-separated `name=id` pairs
    #[serde(default)]
    pub device_ids: String,
    #[serde(default)]
    pub bluestore_bdev_devices: String,
    #[serde(default)]
    pub bluestore_bdev_type: String,
    #[serde(default)]
    pub bluestore_bdev_partition_path: String,
    /// "1" when a dedicated db device is used
    #[serde(default)]
    pub bluefs_dedicated_db: String,
    #[serde(default)]
    pub bluefs_db_devices: String,
    #[serde(default)]
    pub bluefs_db_type: String,
    #[serde(default)]
    pub bluefs_db_partition_path: String,
}

/// One entry of `ceph osd info -f json`, or the whole output of `ceph osd info {id}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsdInfo {
    pub osd: u32,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub up: u8,
    #[serde(rename = "in", default)]
    pub is_in: u8,
}

impl OsdInfo {
    pub fn is_up(&self) -> bool {
        self.up == 1
    }

    pub fn is_in(&self) -> bool {
        self.is_in == 1
    }
}

/// Node of `ceph osd tree -f json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsdTreeNode {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub children: Vec<i64>,
}

/// Output of `ceph osd tree -f json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsdTree {
    #[serde(default)]
    pub nodes: Vec<OsdTreeNode>,
}

impl OsdTree {
    /// Host name to OSD ids placed under it
    pub fn hosts(&self) -> BTreeMap<String, Vec<u32>> {
        self.nodes
            .iter()
            .filter(|node| node.node_type == "host")
            .map(|node| {
                let osds = node
                    .children
                    .iter()
                    .filter_map(|id| u32::try_from(*id).ok())
                    .collect();
                (node.name.clone(), osds)
            })
            .collect()
    }
}

/// Output of `ceph pg ls-by-osd {id} --format json`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PgsByOsd {
    #[serde(default)]
    pub pg_stats: Option<Vec<serde_json::Value>>,
}

impl PgsByOsd {
    pub fn has_pgs(&self) -> bool {
        self.pg_stats.as_ref().map(|pgs| !pgs.is_empty()).unwrap_or(false)
    }
}
