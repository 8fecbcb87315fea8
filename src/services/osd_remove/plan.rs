//! Removal plan builder
//!
//! Correlates the crush map, `ceph osd metadata`, k8s nodes and disk daemon
//! reports into a [`RemoveInfo`]. With nodes given in the task spec each of them
//! is verified against its cleanup directive; without nodes every known host is
//! checked for OSDs which may be removed automatically.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use super::devices::{
    check_device_zapping, check_disks_or_partition, devices_from_daemon_info,
    devices_from_metadata, in_spec, lock_matched_devices, LockedDevices, UsedDevices,
};
use crate::models::{
    CephClusterInfo, ClusterNode, DaemonKey, DaemonPlan, DeviceInfo, HostPlan, LabelSelector,
    NodeCleanupSpec, OsdDaemonInfo, OsdInfo, OsdMetadata, OsdSpecAnalysis, OsdsReport,
    PartitionRole, RemoveInfo, STRAY_HOST,
};
use crate::services::disk_daemon::DiskInventory;

/// Cluster state the plan is built from
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    /// Crush host name to its OSD ids
    pub crush_hosts: BTreeMap<String, Vec<u32>>,
    pub metadata: Vec<OsdMetadata>,
    pub osds: Vec<OsdInfo>,
    pub nodes: Vec<ClusterNode>,
}

/// What is known about a host from crush, the storage spec and k8s
#[derive(Debug, Clone, Default)]
struct HostIndex {
    in_spec: bool,
    spec_idx: usize,
    in_crush: bool,
    crush_osds: Vec<u32>,
    labeled: bool,
    available: bool,
}

type OsdMapping = BTreeMap<DaemonKey, DaemonPlan>;

/// Builds a removal plan for one task
pub struct PlanBuilder<'a> {
    cluster: &'a CephClusterInfo,
    analysis: &'a OsdSpecAnalysis,
    disks: &'a dyn DiskInventory,
    placement: &'a LabelSelector,
    allow_manual_lvm: bool,
    metadata: BTreeMap<u32, OsdMetadata>,
    uuids: BTreeMap<u32, String>,
    /// OSDs without host in metadata; false once found on some host
    strays: BTreeMap<u32, bool>,
    result: RemoveInfo,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(
        cluster: &'a CephClusterInfo,
        analysis: &'a OsdSpecAnalysis,
        disks: &'a dyn DiskInventory,
        placement: &'a LabelSelector,
        allow_manual_lvm: bool,
    ) -> Self {
        Self {
            cluster,
            analysis,
            disks,
            placement,
            allow_manual_lvm,
            metadata: BTreeMap::new(),
            uuids: BTreeMap::new(),
            strays: BTreeMap::new(),
            result: RemoveInfo::default(),
        }
    }

    /// Build the plan for the requested nodes, or discover one when none given
    pub async fn build(
        mut self,
        requested: &BTreeMap<String, NodeCleanupSpec>,
        snapshot: ClusterSnapshot,
    ) -> RemoveInfo {
        for meta in snapshot.metadata {
            if meta.hostname.is_empty() {
                self.strays.insert(meta.id, true);
            }
            self.metadata.insert(meta.id, meta);
        }
        self.uuids = snapshot
            .osds
            .into_iter()
            .map(|osd| (osd.osd, osd.uuid))
            .collect();

        let hosts = self.index_hosts(requested, &snapshot.crush_hosts, &snapshot.nodes);
        if requested.is_empty() {
            debug!("no nodes in task spec, discovering osds to remove");
            self.discover(&hosts).await;
        } else {
            self.verify(requested, &hosts).await;
        }
        self.result.sort_messages();
        self.result
    }

    fn index_hosts(
        &self,
        requested: &BTreeMap<String, NodeCleanupSpec>,
        crush_hosts: &BTreeMap<String, Vec<u32>>,
        nodes: &[ClusterNode],
    ) -> BTreeMap<String, HostIndex> {
        let pick = |host: &str| !host.is_empty() && (requested.is_empty() || requested.contains_key(host));

        let mut hosts: BTreeMap<String, HostIndex> = BTreeMap::new();
        for (host, osds) in crush_hosts.iter().filter(|(host, _)| pick(host.as_str())) {
            hosts.insert(
                host.clone(),
                HostIndex {
                    in_crush: true,
                    crush_osds: osds.clone(),
                    ..Default::default()
                },
            );
        }
        for (idx, node) in self.cluster.storage_nodes.iter().enumerate() {
            if pick(node.name.as_str()) {
                let entry = hosts.entry(node.name.clone()).or_default();
                entry.in_spec = true;
                entry.spec_idx = idx;
            }
        }
        // k8s last, only known hosts or hosts which run the disk daemon
        for node in nodes.iter().filter(|node| pick(node.name.as_str())) {
            let labeled = node.has_disk_daemon(self.placement);
            if !labeled && !hosts.contains_key(&node.name) {
                continue;
            }
            let (available, reason) = node.availability();
            if let Some(reason) = reason {
                warn!("{}", reason);
            }
            let entry = hosts.entry(node.name.clone()).or_default();
            entry.labeled = labeled;
            entry.available = available;
        }
        hosts
    }

    fn fsid(&self) -> &str {
        self.cluster.fsid()
    }

    fn uuid(&self, osd: u32) -> &str {
        self.uuids.get(&osd).map(String::as_str).unwrap_or_default()
    }

    fn meta_devices(&self, osd: u32) -> BTreeMap<String, DeviceInfo> {
        self.metadata
            .get(&osd)
            .map(devices_from_metadata)
            .unwrap_or_default()
    }

    /// Plan entry for a crush member using cluster-side ids
    fn member(&self, osd: u32, devices: BTreeMap<String, DeviceInfo>) -> DaemonPlan {
        let uuid = self.uuid(osd);
        DaemonPlan::member(
            uuid,
            self.fsid(),
            self.cluster.osd_host_directory(self.fsid(), uuid),
            devices,
        )
    }

    /// Plan entry for an on-disk instance using the ids it reports
    fn instance(&self, info: &OsdDaemonInfo, in_crush: bool, devices: BTreeMap<String, DeviceInfo>) -> DaemonPlan {
        let host_directory = if !info.cluster_fsid.is_empty() && !info.osd_uuid.is_empty() {
            self.cluster
                .osd_host_directory(&info.cluster_fsid, &info.osd_uuid)
        } else {
            String::new()
        };
        DaemonPlan {
            uuid: info.osd_uuid.clone(),
            cluster_fsid: info.cluster_fsid.clone(),
            host_directory,
            in_crush_map: in_crush,
            device_mapping: devices,
            ..Default::default()
        }
    }

    /// Whether an on-disk instance is the crush member known for this host.
    ///
    /// Legacy OSDs on physical partitions may report neither uuid nor fsid, those
    /// are matched by their db partition.
    fn from_crush(&self, known: &BTreeSet<u32>, osd: u32, info: &OsdDaemonInfo) -> bool {
        if !known.contains(&osd) {
            return false;
        }
        if !info.osd_uuid.is_empty() && !info.cluster_fsid.is_empty() {
            return info.osd_uuid == self.uuid(osd) && info.cluster_fsid == self.fsid();
        }
        self.meta_devices(osd)
            .values()
            .filter(|dev| dev.role == PartitionRole::Db)
            .any(|dev| {
                info.partitions
                    .iter()
                    .any(|part| part.partition == dev.partition && part.part_type == "db")
            })
    }

    /// Fill missing ids of an instance which belongs to the cluster
    fn adopt_ids(&self, osd: u32, info: &mut OsdDaemonInfo) {
        if info.cluster_fsid.is_empty() {
            info.cluster_fsid = self.fsid().to_string();
        }
        if info.osd_uuid.is_empty() {
            info.osd_uuid = self.uuid(osd).to_string();
        }
    }

    fn stray_warning(host: &str, osd: u32, info: &OsdDaemonInfo) -> String {
        format!(
            "[node '{}'] found partition with stray osd uuid '{}', id '{}', will be cleaned up",
            host, info.osd_uuid, osd
        )
    }

    /// Plan from osd metadata only, for hosts without a disk daemon report
    fn fill_from_meta(
        &self,
        host: &str,
        node_in_spec: bool,
        available: bool,
        ids: &[u32],
    ) -> (OsdMapping, Vec<String>) {
        let mut warnings = vec![if available {
            format!(
                "[node '{}'] node is available, but has no disk daemon running, device cleanup jobs will be skipped",
                host
            )
        } else if node_in_spec {
            format!(
                "[node '{}'] node is not available, but present in spec, device cleanup jobs will be skipped",
                host
            )
        } else {
            format!(
                "[node '{}'] node is not available, device cleanup jobs will be skipped",
                host
            )
        }];

        let mut mapping = OsdMapping::new();
        for &osd in ids {
            match self.metadata.get(&osd) {
                Some(meta) => {
                    let mut devices = devices_from_metadata(meta);
                    devices.values_mut().for_each(|dev| dev.alive = false);
                    mapping.insert(DaemonKey::Member(osd), self.member(osd, devices));
                }
                None => warnings.push(format!("[node '{}'] node has no osd id '{}', skipping", host, osd)),
            }
        }
        (mapping, warnings)
    }

    /// Spec analysis gate for hosts present in the storage spec
    fn analysis_passed(&mut self, host: &str) -> bool {
        match self.analysis.spec_analysis.get(host) {
            Some(state) if !state.issues.is_empty() => {
                self.result.issues.push(format!(
                    "[node '{}'] spec analyse status has failed, resolve it first",
                    host
                ));
                false
            }
            Some(state) if state.is_skipped() => {
                self.result.warnings.push(format!(
                    "[node '{}'] spec analyse status skipped, skipping lcm actions",
                    host
                ));
                false
            }
            Some(_) => true,
            None => {
                self.result
                    .issues
                    .push(format!("[node '{}'] spec analyse status is not available yet", host));
                false
            }
        }
    }

    async fn node_report(&mut self, host: &str) -> Option<OsdsReport> {
        match self.disks.osd_report(host).await {
            Err(e) => {
                self.result
                    .issues
                    .push(format!("[node '{}'] failed to get node osds report: {:#}", host, e));
                None
            }
            Ok(report) if !report.issues.is_empty() => {
                self.result.issues.extend(
                    report
                        .issues
                        .iter()
                        .map(|issue| format!("[node '{}'] {}", host, issue)),
                );
                None
            }
            Ok(report) => {
                if report.osds_report.is_none() {
                    self.result.issues.push(format!(
                        "[node '{}'] node osds report is not available, check daemon logs on related node",
                        host
                    ));
                }
                report.osds_report
            }
        }
    }

    fn used_devices(&self, index: &HostIndex) -> UsedDevices {
        if !index.in_spec {
            return UsedDevices::default();
        }
        self.cluster
            .storage_nodes
            .get(index.spec_idx)
            .map(UsedDevices::from_spec)
            .unwrap_or_default()
    }

    async fn verify(
        &mut self,
        requested: &BTreeMap<String, NodeCleanupSpec>,
        hosts: &BTreeMap<String, HostIndex>,
    ) {
        for (host, spec) in requested.iter().filter(|(host, _)| host.as_str() != STRAY_HOST) {
            let index = hosts.get(host).cloned().unwrap_or_default();
            self.verify_host(host, spec, &index).await;
        }

        let Some(stray_spec) = requested.get(STRAY_HOST) else {
            return;
        };
        if stray_spec.cleanup_by_osd.is_empty() {
            self.result.warnings.push(format!(
                "[{}] stray which are present in crush map is possible to remove only be osd id",
                STRAY_HOST
            ));
            return;
        }
        let mut mapping = OsdMapping::new();
        for osd in &stray_spec.cleanup_by_osd {
            match self.strays.get(&osd.id) {
                Some(true) => {
                    mapping.insert(
                        DaemonKey::Member(osd.id),
                        DaemonPlan {
                            uuid: self.uuid(osd.id).to_string(),
                            cluster_fsid: self.fsid().to_string(),
                            in_crush_map: true,
                            ..Default::default()
                        },
                    );
                }
                Some(false) => {}
                None => self.result.warnings.push(format!(
                    "[{}] stray osd with id '{}' is not found in crush map",
                    STRAY_HOST, osd.id
                )),
            }
        }
        if !mapping.is_empty() {
            self.result.cleanup_map.insert(
                STRAY_HOST.to_string(),
                HostPlan {
                    osd_mapping: mapping,
                    ..Default::default()
                },
            );
        }
    }

    async fn verify_host(&mut self, host: &str, spec: &NodeCleanupSpec, index: &HostIndex) {
        if index.in_spec && index.labeled && index.available && !self.analysis_passed(host) {
            return;
        }
        // stray mode is checked first so that no other mode picks strays by accident
        if spec.cleanup_stray_partitions {
            if !index.available {
                self.result.warnings.push(format!(
                    "[node '{}'] node is not available, cleanup stray paritions is not possible, skipping",
                    host
                ));
                return;
            }
            if !index.labeled {
                self.result.warnings.push(format!(
                    "[node '{}'] node is available, but has no disk daemon running, cleanup stray paritions is not possible, use by id or complete remove, skipping",
                    host
                ));
                return;
            }
        }
        if !index.in_crush && !spec.cleanup_stray_partitions {
            self.result.warnings.push(format!(
                "[node '{}'] node is not present in Ceph cluster crush map, skipping",
                host
            ));
            return;
        }
        if index.in_spec && spec.removes_host() {
            self.result.warnings.push(format!(
                "[node '{}'] node is present in spec, complete host remove from crush map is not possible, skipping",
                host
            ));
            return;
        }

        let mut plan = HostPlan {
            complete_cleanup: spec.complete_cleanup,
            drop_from_crush: spec.drop_from_crush,
            node_is_down: !index.available,
            ..Default::default()
        };

        if plan.node_is_down || !index.labeled {
            self.verify_host_from_meta(host, spec, index, plan);
            return;
        }

        let Some(report) = self.node_report(host).await else {
            return;
        };
        let used = self.used_devices(index);
        let known: BTreeSet<u32> = if index.in_crush {
            index.crush_osds.iter().copied().collect()
        } else {
            BTreeSet::new()
        };
        let report_osds = parse_report_osds(host, &report);
        let mut locked = LockedDevices::new();
        let mut mapping = OsdMapping::new();

        if spec.removes_host() || spec.cleanup_stray_partitions {
            if !spec.cleanup_stray_partitions {
                for &osd in &known {
                    mapping.insert(DaemonKey::Member(osd), self.member(osd, self.meta_devices(osd)));
                }
            }
            for &(osd, infos) in &report_osds {
                for info in infos {
                    let osd_in_crush = self.from_crush(&known, osd, info);
                    if spec.cleanup_stray_partitions && osd_in_crush {
                        if index.in_spec && in_spec(info, &used, "").is_some() {
                            locked.extend(info.devices.iter().map(|dev| dev.name.clone()));
                        }
                        continue;
                    }
                    let (key, in_crush, info) = self.verified_instance(host, osd, info, osd_in_crush);
                    let devices = devices_from_daemon_info(&info);
                    match mapping.entry(key) {
                        Entry::Occupied(mut entry) => entry.get_mut().device_mapping.extend(devices),
                        Entry::Vacant(entry) => {
                            entry.insert(self.instance(&info, in_crush, devices));
                        }
                    }
                }
            }
        } else if !spec.cleanup_by_osd.is_empty() {
            let requested_ids: BTreeSet<u32> = spec.cleanup_by_osd.iter().map(|osd| osd.id).collect();
            for osd_spec in &spec.cleanup_by_osd {
                if !known.contains(&osd_spec.id) {
                    self.result.warnings.push(format!(
                        "[node '{}'] osd with id '{}' is not found on a node, skipping",
                        host, osd_spec.id
                    ));
                    continue;
                }
                let mut remove_allowed = true;
                let mut devices = self.meta_devices(osd_spec.id);
                for &(osd, infos) in &report_osds {
                    for info in infos {
                        if osd != osd_spec.id {
                            // even stray partitions are protected when their id is not requested
                            if !requested_ids.contains(&osd) {
                                locked.extend(info.devices.iter().map(|dev| dev.name.clone()));
                            }
                            continue;
                        }
                        if !self.from_crush(&known, osd, info) {
                            locked.extend(info.devices.iter().map(|dev| dev.name.clone()));
                            continue;
                        }
                        if index.in_spec {
                            if let Some(matched) = in_spec(info, &used, "") {
                                lock_matched_devices(info, &matched, &mut locked);
                                if matched.role == PartitionRole::Block {
                                    remove_allowed = false;
                                    self.result.warnings.push(format!(
                                        "[node '{}'] osd with id '{}' is associated with block device '{}', which is present in spec, can't cleanup, skipping",
                                        host, osd_spec.id, matched.found
                                    ));
                                    continue;
                                }
                                self.result.warnings.push(format!(
                                    "[node '{}'] osd with id '{}' is associated with metadata device '{}', which is present in spec, disk zap will be skipped",
                                    host, osd_spec.id, matched.found
                                ));
                            }
                        }
                        devices.extend(devices_from_daemon_info(info));
                    }
                }
                if remove_allowed {
                    if osd_spec.skip_device_cleanup {
                        self.result.warnings.push(format!(
                            "[node '{}'] osd with id '{}' has 'skip device clean up' flag set in spec. Related deployment should be removed manually as well",
                            host, osd_spec.id
                        ));
                    }
                    let mut member = self.member(osd_spec.id, devices);
                    member.skip_device_cleanup_job = osd_spec.skip_device_cleanup;
                    mapping.insert(DaemonKey::Member(osd_spec.id), member);
                }
            }
        } else if !spec.cleanup_by_device.is_empty() {
            let mut denied: Vec<String> = Vec::new();
            'devices: for dev_spec in &spec.cleanup_by_device {
                let wanted = dev_spec.device.as_str();
                let mut found = false;
                for &(osd, infos) in &report_osds {
                    for info in infos {
                        if !check_disks_or_partition(info, wanted) {
                            if in_spec(info, &used, "").is_some() {
                                locked.extend(info.devices.iter().map(|dev| dev.name.clone()));
                            }
                            continue;
                        }
                        if index.in_spec {
                            if let Some(matched) = in_spec(info, &used, wanted) {
                                for dev in &info.devices {
                                    locked.insert(dev.name.clone());
                                    denied.push(dev.name.clone());
                                }
                                self.result.warnings.push(format!(
                                    "[node '{}'] device '{}' is marked for clean up, but present in spec as '{}'",
                                    host, wanted, matched.found
                                ));
                                continue 'devices;
                            }
                        }
                        found = true;
                        let osd_in_crush = self.from_crush(&known, osd, info);
                        let (key, in_crush, info) = self.verified_instance(host, osd, info, osd_in_crush);
                        let mut devices = devices_from_daemon_info(&info);
                        if osd_in_crush {
                            for (dev, meta) in self.meta_devices(osd) {
                                devices.entry(dev).or_insert(meta);
                            }
                            if dev_spec.skip_device_cleanup {
                                self.result.warnings.push(format!(
                                    "[node '{}'] device '{}' has set 'skip device clean up' flag set in spec. Related osd deployment (osd id '{}') should be removed manually as well",
                                    host, wanted, osd
                                ));
                            }
                        }
                        match mapping.entry(key) {
                            Entry::Occupied(mut entry) => entry.get_mut().device_mapping.extend(devices),
                            Entry::Vacant(entry) => {
                                let mut plan = self.instance(&info, in_crush, devices);
                                plan.skip_device_cleanup_job = dev_spec.skip_device_cleanup;
                                entry.insert(plan);
                            }
                        }
                    }
                }
                if !found {
                    self.result.warnings.push(format!(
                        "[node '{}'] device '{}' is not found on a node or has no osd partitions to cleanup, skipping",
                        host, wanted
                    ));
                }
            }
            mapping.retain(|_, plan| !denied.iter().any(|dev| plan.device_mapping.contains_key(dev)));
        }

        if !mapping.is_empty() || spec.removes_host() {
            if !spec.drop_from_crush {
                let warnings = check_device_zapping(host, &mut mapping, &locked, self.allow_manual_lvm);
                self.result.warnings.extend(warnings);
            }
            self.result.warnings.extend(report_warnings(
                host,
                plan.removes_host(),
                &mapping,
                &report.warnings,
            ));
            plan.osd_mapping = mapping;
            self.result.cleanup_map.insert(host.to_string(), plan);
        }
    }

    /// Host is down or runs no disk daemon, plan from osd metadata
    fn verify_host_from_meta(
        &mut self,
        host: &str,
        spec: &NodeCleanupSpec,
        index: &HostIndex,
        mut plan: HostPlan,
    ) {
        let skip = if index.available && index.in_spec {
            Some("node is available, but present in spec, has no disk daemon running, skipping")
        } else if index.available && !spec.cleanup_by_device.is_empty() {
            Some("node is available, but has no disk daemon running, cleanup by device is not possible, use by id or complete remove, skipping")
        } else if !index.available && !spec.cleanup_by_device.is_empty() {
            Some("node is not available, cleanup by device is not possible, skipping")
        } else {
            None
        };
        if let Some(reason) = skip {
            self.result.warnings.push(format!("[node '{}'] {}", host, reason));
            return;
        }

        let (mapping, warnings) = if spec.removes_host() {
            self.fill_from_meta(host, false, index.available, &index.crush_osds)
        } else {
            let ids: Vec<u32> = spec.cleanup_by_osd.iter().map(|osd| osd.id).collect();
            self.fill_from_meta(host, index.in_spec, index.available, &ids)
        };
        if !mapping.is_empty() || spec.removes_host() {
            plan.osd_mapping = mapping;
            plan.volumes_info_missed = index.available;
            self.result.cleanup_map.insert(host.to_string(), plan);
        }
        self.result.warnings.extend(warnings);
    }

    /// Key and crush state of an on-disk instance for an explicitly requested host.
    ///
    /// Instances not matching the host's crush member are strays. When the stray
    /// turns out to be the instance of an OSD without host in crush, that OSD is
    /// handled here and not from the stray pool.
    fn verified_instance(
        &mut self,
        host: &str,
        osd: u32,
        info: &OsdDaemonInfo,
        osd_in_crush: bool,
    ) -> (DaemonKey, bool, OsdDaemonInfo) {
        let mut info = info.clone();
        let stray_in_crush = self.strays.get(&osd) == Some(&true) && info.osd_uuid == self.uuid(osd);
        if stray_in_crush || osd_in_crush {
            self.adopt_ids(osd, &mut info);
        }
        if osd_in_crush {
            return (DaemonKey::Member(osd), true, info);
        }
        self.result.warnings.push(Self::stray_warning(host, osd, &info));
        if stray_in_crush || info.osd_uuid == self.uuid(osd) {
            self.strays.insert(osd, false);
        }
        (DaemonKey::stray(osd, &info.osd_uuid), stray_in_crush, info)
    }

    async fn discover(&mut self, hosts: &BTreeMap<String, HostIndex>) {
        for (host, index) in hosts {
            let mut plan = HostPlan {
                complete_cleanup: !index.in_spec,
                node_is_down: !index.available,
                ..Default::default()
            };

            if index.available && index.labeled {
                match self.discover_host(host, index).await {
                    Some(mapping) => plan.osd_mapping = mapping,
                    None => continue,
                }
            } else if index.in_spec {
                // operator has to drop the node from spec first
                let warning = if index.available {
                    format!(
                        "[node '{}'] node is available and present in spec, but has no disk daemon running, unable to run auto cleanup, skipping",
                        host
                    )
                } else {
                    format!(
                        "[node '{}'] node is present in spec, but is not available, unable to auto detect osds to remove, please specify manually",
                        host
                    )
                };
                self.result.warnings.push(warning);
                continue;
            } else if index.in_crush {
                plan.volumes_info_missed = index.available;
                let (mapping, warnings) =
                    self.fill_from_meta(host, index.in_spec, index.available, &index.crush_osds);
                plan.osd_mapping = mapping;
                self.result.warnings.extend(warnings);
            }

            if !plan.osd_mapping.is_empty() || (index.in_crush && plan.complete_cleanup) {
                self.result.cleanup_map.insert(host.clone(), plan);
            }
        }

        // remaining strays have neither host nor partitions, only crush entries and deployments
        let mut mapping = OsdMapping::new();
        for &osd in self.strays.keys() {
            mapping.insert(
                DaemonKey::Member(osd),
                DaemonPlan {
                    uuid: self.uuid(osd).to_string(),
                    cluster_fsid: self.fsid().to_string(),
                    in_crush_map: true,
                    ..Default::default()
                },
            );
        }
        if !mapping.is_empty() {
            self.result.warnings.push(
                "[stray] detected stray osds, but impossible to determine related host/device (probably disk(s) removed or host(s) down), device cleanup jobs will be skipped"
                    .to_string(),
            );
            self.result.cleanup_map.insert(
                STRAY_HOST.to_string(),
                HostPlan {
                    osd_mapping: mapping,
                    ..Default::default()
                },
            );
        }
    }

    /// Discover removable OSDs on a live host with a disk daemon.
    ///
    /// Returns `None` when the host is skipped.
    async fn discover_host(&mut self, host: &str, index: &HostIndex) -> Option<OsdMapping> {
        if index.in_spec && !self.analysis_passed(host) {
            return None;
        }
        let used = self.used_devices(index);
        let mut locked = LockedDevices::new();
        let report = self.node_report(host).await?;

        let mut known: BTreeSet<u32> = index.crush_osds.iter().copied().collect();
        let mut mapping = OsdMapping::new();
        for (osd, infos) in parse_report_osds(host, &report) {
            let mut meta_devices = BTreeMap::new();
            let mut expected: Vec<String> = Vec::new();
            if index.in_crush && known.contains(&osd) {
                meta_devices = self.meta_devices(osd);
                expected = meta_devices.keys().cloned().collect();
            }
            // denied only when the block device is still in spec
            let mut allow_remove = !meta_devices.is_empty();

            for info in infos {
                let from_crush = self.from_crush(&known, osd, info);
                if from_crush && index.in_spec {
                    if let Some(matched) = in_spec(info, &used, "") {
                        lock_matched_devices(info, &matched, &mut locked);
                        if matched.role == PartitionRole::Block {
                            allow_remove = false;
                        }
                    }
                    if allow_remove {
                        meta_devices.extend(devices_from_daemon_info(info));
                    }
                    continue;
                }

                let mut info = info.clone();
                let stray_in_crush =
                    self.strays.get(&osd) == Some(&true) && info.osd_uuid == self.uuid(osd);
                if stray_in_crush || from_crush {
                    self.adopt_ids(osd, &mut info);
                }
                let key = if stray_in_crush || !from_crush {
                    self.result.warnings.push(Self::stray_warning(host, osd, &info));
                    self.strays.remove(&osd);
                    DaemonKey::stray(osd, &info.osd_uuid)
                } else {
                    DaemonKey::Member(osd)
                };

                let devices = devices_from_daemon_info(&info);
                match mapping.entry(key) {
                    Entry::Occupied(mut entry) => entry.get_mut().device_mapping.extend(devices),
                    Entry::Vacant(entry) => {
                        let devices = if from_crush {
                            meta_devices.extend(devices);
                            meta_devices.clone()
                        } else {
                            devices
                        };
                        entry.insert(self.instance(&info, stray_in_crush || from_crush, devices));
                    }
                }
            }

            if index.in_spec && allow_remove {
                mapping.insert(DaemonKey::Member(osd), self.member(osd, meta_devices.clone()));
            }
            // lost devices of a removable osd are still taken from metadata
            if index.in_crush && !expected.is_empty() {
                if !allow_remove {
                    known.remove(&osd);
                    continue;
                }
                if let Some(plan) = mapping.get_mut(&DaemonKey::Member(osd)) {
                    for dev in &expected {
                        if let Some(meta) = meta_devices.get(dev) {
                            plan.device_mapping
                                .entry(dev.clone())
                                .or_insert_with(|| meta.clone());
                        }
                    }
                    known.remove(&osd);
                }
            }
        }

        // crush members with nothing left on the host, disks are gone
        for osd in known {
            mapping.insert(DaemonKey::Member(osd), self.member(osd, self.meta_devices(osd)));
        }

        let warnings = check_device_zapping(host, &mut mapping, &locked, self.allow_manual_lvm);
        self.result.warnings.extend(warnings);
        if !mapping.is_empty() {
            // hosts outside the spec are removed completely
            self.result.warnings.extend(report_warnings(
                host,
                !index.in_spec,
                &mapping,
                &report.warnings,
            ));
        }
        Some(mapping)
    }
}

/// Report entries keyed by numeric osd id
fn parse_report_osds<'r>(host: &str, report: &'r OsdsReport) -> Vec<(u32, &'r Vec<OsdDaemonInfo>)> {
    report
        .osds
        .iter()
        .filter_map(|(osd, infos)| match osd.parse::<u32>() {
            Ok(id) => Some((id, infos)),
            Err(_) => {
                warn!("[node '{}'] skipping report entry with non-numeric osd id '{}'", host, osd);
                None
            }
        })
        .collect()
}

/// Disk daemon warnings relevant for a host plan, prefixed with the node.
///
/// Full host removal keeps every warning, otherwise only those naming a planned
/// osd in the daemon's `osd '<id>'` format.
pub fn report_warnings(
    host: &str,
    removes_host: bool,
    mapping: &BTreeMap<DaemonKey, DaemonPlan>,
    warnings: &[String],
) -> Vec<String> {
    if removes_host {
        return warnings
            .iter()
            .map(|warning| format!("[node '{}'] {}", host, warning))
            .collect();
    }
    let mut relevant = Vec::new();
    for key in mapping.keys() {
        let marker = format!("osd '{}'", key.id());
        relevant.extend(
            warnings
                .iter()
                .filter(|warning| warning.contains(&marker))
                .map(|warning| format!("[node '{}'] {}", host, warning)),
        );
    }
    relevant
}
