//! Device correlation helpers
//!
//! Ties together the three views of an OSD's devices: ceph osd metadata, the disk
//! daemon report and the CephCluster storage spec.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use tracing::warn;

use crate::models::{
    DaemonKey, DaemonPlan, DeviceInfo, OsdDaemonInfo, OsdMetadata, PartitionRole, StorageNodeSpec,
};

/// Prefix of logical volumes created by rook
pub const ROOK_LV_MARKER: &str = "osd-";

/// Devices that must never be wiped as a whole
pub type LockedDevices = BTreeSet<String>;

/// Prepend `/dev/` unless already present
pub fn dev_path(name: &str) -> String {
    if name.starts_with("/dev/") {
        name.to_string()
    } else {
        format!("/dev/{}", name)
    }
}

/// Whether a device or partition identifier belongs to an on-disk OSD instance
pub fn check_disks_or_partition(info: &OsdDaemonInfo, look_for: &str) -> bool {
    let prepended = dev_path(look_for);
    info.devices
        .iter()
        .any(|dev| dev.name == prepended || dev.symlinks.iter().any(|s| s == look_for))
        || info
            .partitions
            .iter()
            .any(|part| part.partition == look_for || part.symlinks.iter().any(|s| s == look_for))
}

/// Whether a partition path points to an LV created by rook
pub fn is_lvm_rook_made(partition: &str) -> bool {
    partition
        .rsplit('/')
        .next()
        .map(|last| last.starts_with(ROOK_LV_MARKER))
        .unwrap_or(false)
}

/// Device facts derived from `ceph osd metadata`.
///
/// Metadata only knows block and db devices. Devices built this way are never
/// alive since nothing on the host confirmed them.
pub fn devices_from_metadata(meta: &OsdMetadata) -> BTreeMap<String, DeviceInfo> {
    let first = |list: &str| dev_path(list.split(',').next().unwrap_or_default());

    let mut devices = BTreeMap::new();
    devices.insert(
        first(&meta.bluestore_bdev_devices),
        DeviceInfo {
            rotational: meta.bluestore_bdev_type == "hdd",
            role: PartitionRole::Block,
            partition: meta.bluestore_bdev_partition_path.clone(),
            ..Default::default()
        },
    );
    if meta.bluefs_dedicated_db == "1" {
        devices.insert(
            first(&meta.bluefs_db_devices),
            DeviceInfo {
                rotational: meta.bluefs_db_type == "hdd",
                role: PartitionRole::Db,
                partition: meta.bluefs_db_partition_path.clone(),
                ..Default::default()
            },
        );
    }

    // pairs look like "vdd=/dev/disk/by-path/pci-0000:00:0d.0" and "vdd=95ac6e89-2f7e-4427-9"
    let pairs = |raw: &str| -> Vec<(String, String)> {
        raw.split(',')
            .filter_map(|pair| {
                let mut split = pair.split('=');
                match (split.next(), split.next(), split.next()) {
                    (Some(name), Some(value), None) => Some((dev_path(name), value.to_string())),
                    _ => None,
                }
            })
            .collect()
    };
    for (name, path) in pairs(&meta.device_paths) {
        if let Some(info) = devices.get_mut(&name) {
            info.path = path;
        }
    }
    for (name, id) in pairs(&meta.device_ids) {
        if let Some(info) = devices.get_mut(&name) {
            info.id = id;
        }
    }
    devices
}

/// Device facts from a disk daemon report entry, keyed by device name
pub fn devices_from_daemon_info(info: &OsdDaemonInfo) -> BTreeMap<String, DeviceInfo> {
    info.devices
        .iter()
        .map(|dev| {
            let mut path = dev.name.clone();
            for symlink in &dev.symlinks {
                if symlink.starts_with("/dev/disk/by-path/") {
                    path = symlink.clone();
                    break;
                }
                // lvm pv uuid links are not stable device paths
                if symlink.starts_with("/dev/disk/by-id/lvm") {
                    continue;
                }
                path = symlink.clone();
            }
            let role = info
                .partition_of(dev)
                .map(|part| PartitionRole::parse(&part.part_type))
                .unwrap_or_default();
            let device = DeviceInfo {
                id: dev.device_id.clone(),
                rotational: dev.rotational,
                path,
                partition: dev.partition.clone(),
                role,
                zap: false,
                alive: true,
            };
            (dev.name.clone(), device)
        })
        .collect()
}

/// Devices a storage spec node claims
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsedDevices {
    pub device_filter: String,
    pub device_path_filter: String,
    /// Device or partition path to the role it is used for
    pub devices: BTreeMap<String, String>,
}

impl UsedDevices {
    pub fn from_spec(node: &StorageNodeSpec) -> Self {
        let mut used = UsedDevices::default();
        if let Some(dev) = node.config.get("metadataDevice") {
            used.devices.insert(dev_path(dev), "db".to_string());
        }
        if node.devices.is_empty() {
            used.device_filter = node.device_filter.clone();
            used.device_path_filter = node.device_path_filter.clone();
            return used;
        }
        for device in &node.devices {
            if !device.name.is_empty() {
                used.devices.insert(dev_path(&device.name), "block".to_string());
            } else if !device.full_path.is_empty() {
                used.devices.insert(device.full_path.clone(), "block".to_string());
            }
            match device.config.get("metadataDevice") {
                Some(meta) if !meta.is_empty() => {
                    used.devices.insert(dev_path(meta), "db".to_string());
                }
                _ => {}
            }
        }
        used
    }
}

/// Spec entry matching an on-disk OSD
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecMatch {
    /// Device, partition or filter which matched
    pub found: String,
    pub role: PartitionRole,
}

/// Find the spec entry an on-disk OSD instance is covered by.
///
/// With `look_for` set only the device or partition it names is considered.
/// When the OSD has a block partition and the node uses a filter, the block side
/// is matched against the filter and only db is checked explicitly.
pub fn in_spec(info: &OsdDaemonInfo, used: &UsedDevices, look_for: &str) -> Option<SpecMatch> {
    let mut dev_mapping: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut part_mapping: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let wanted = dev_path(look_for);
    for dev in &info.devices {
        let Some(part) = info.partition_of(dev) else {
            continue;
        };
        let mut dev_names = vec![dev.name.clone(), dev_path(&dev.name)];
        dev_names.extend(dev.symlinks.iter().cloned());
        let mut part_names = vec![part.partition.clone()];
        part_names.extend(part.symlinks.iter().cloned());
        if look_for.is_empty() || dev_names.contains(&wanted) || part_names.contains(&wanted) {
            dev_mapping.insert(part.part_type.clone(), dev_names);
            part_mapping.insert(part.part_type.clone(), part_names);
        }
    }

    let mut roles = vec!["block", "db"];
    if let Some(dev_names) = dev_mapping.get("block") {
        let (filter, strip_dev) = if !used.device_filter.is_empty() {
            (used.device_filter.as_str(), true)
        } else {
            (used.device_path_filter.as_str(), false)
        };
        if !filter.is_empty() {
            match Regex::new(filter) {
                Ok(re) => {
                    let dev_hit = dev_names.iter().any(|name| {
                        let name = if strip_dev {
                            name.strip_prefix("/dev/").unwrap_or(name)
                        } else {
                            name.as_str()
                        };
                        re.is_match(name)
                    });
                    let part_hit = part_mapping
                        .get("block")
                        .map(|parts| parts.iter().any(|p| re.is_match(p)))
                        .unwrap_or(false);
                    if dev_hit || part_hit {
                        return Some(SpecMatch {
                            found: filter.to_string(),
                            role: PartitionRole::Block,
                        });
                    }
                }
                Err(e) => {
                    // an unreadable filter may still cover the device, keep it locked
                    warn!("invalid device filter '{}' in spec: {}", filter, e);
                    return Some(SpecMatch {
                        found: filter.to_string(),
                        role: PartitionRole::Block,
                    });
                }
            }
            roles = vec!["db"];
        }
    }

    for role in roles {
        let mut found = None;
        if let Some(names) = dev_mapping.get(role) {
            found = names.iter().find(|name| used.devices.contains_key(*name)).cloned();
        }
        if let Some(parts) = part_mapping.get(role) {
            if let Some(part) = parts
                .iter()
                .find(|part| used.devices.get(*part).map(String::as_str) == Some(role))
            {
                found = Some(part.clone());
            }
        }
        if let Some(found) = found {
            return Some(SpecMatch {
                found,
                role: PartitionRole::parse(role),
            });
        }
    }
    None
}

/// Lock the devices of an on-disk OSD matched against the spec.
///
/// A block match protects every device of the OSD, a db match only the db
/// device.
pub fn lock_matched_devices(info: &OsdDaemonInfo, matched: &SpecMatch, locked: &mut LockedDevices) {
    for dev in &info.devices {
        if matched.role == PartitionRole::Block {
            locked.insert(dev.name.clone());
            continue;
        }
        if info
            .partition_of(dev)
            .map(|part| PartitionRole::parse(&part.part_type) == matched.role)
            .unwrap_or(false)
        {
            locked.insert(dev.name.clone());
            break;
        }
    }
}

/// Decide whole-device wipes for a host plan.
///
/// A device is wiped only when it is alive, not locked and its partition was
/// created by rook (or manual LVMs may be removed).
pub fn check_device_zapping(
    host: &str,
    osd_mapping: &mut BTreeMap<DaemonKey, DaemonPlan>,
    locked: &LockedDevices,
    allow_manual_lvm: bool,
) -> Vec<String> {
    let mut warnings = Vec::new();
    for (osd, plan) in osd_mapping.iter_mut() {
        if plan.skip_device_cleanup_job {
            continue;
        }
        for (device, info) in plan.device_mapping.iter_mut() {
            if !info.alive {
                continue;
            }
            let allow_drop = is_lvm_rook_made(&info.partition) || allow_manual_lvm;
            if !allow_drop {
                warnings.push(format!(
                    "[node '{}'] found osd {} partition '{}' for osd '{}', which is created not by rook, skipping disk/partition zap",
                    host, info.role, info.partition, osd
                ));
            }
            info.zap = !locked.contains(device) && allow_drop;
        }
    }
    warnings
}
