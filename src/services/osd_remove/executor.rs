//! Removal executor
//!
//! Advances every OSD of an approved plan one step per reconcile pass:
//! `Pending -> Rebalancing -> Removing -> Removed`, then the device cleanup job
//! and the deployment delete. Hosts are dropped from crush once all their OSDs
//! are done.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::{format_timeout, TaskRun};
use crate::models::{
    DaemonKey, DaemonPlan, DeviceInfo, HostPlan, OsdInfo, PgsByOsd, RemovalResult, RemoveInfo,
    RemovePhase, RemoveStatus, STRAY_HOST,
};
use crate::services::ceph_cli::run_json;

type Slot = (String, DaemonKey);

/// OSD locations grouped by the phase they are processed in
#[derive(Debug, Default)]
struct Buckets {
    pending: Vec<Slot>,
    rebalancing: Vec<Slot>,
    in_progress: Vec<Slot>,
    stray: Vec<Slot>,
    finished: Vec<Slot>,
    failed: Vec<Slot>,
}

impl Buckets {
    fn push(&mut self, phase: RemovePhase, slot: Slot) {
        match phase {
            RemovePhase::Pending => self.pending.push(slot),
            RemovePhase::WaitingRebalance => self.rebalancing.push(slot),
            RemovePhase::InProgress => self.in_progress.push(slot),
            RemovePhase::Stray => self.stray.push(slot),
            // skipped strays still need their job and deployment handled
            RemovePhase::Finished | RemovePhase::Skipped => self.finished.push(slot),
            RemovePhase::Failed => self.failed.push(slot),
            RemovePhase::Completed => {}
        }
    }
}

fn result_mut<'i>(info: &'i mut RemoveInfo, (host, key): &Slot) -> Option<&'i mut RemovalResult> {
    info.cleanup_map
        .get_mut(host)
        .and_then(|plan| plan.osd_mapping.get_mut(key))
        .and_then(|osd| osd.remove_status.as_mut())
}

fn mark_finished(status: &mut RemoveStatus) {
    status.status = RemovePhase::Finished;
    status.finished_at = Some(Utc::now());
}

fn mark_failed(status: &mut RemoveStatus, err: &anyhow::Error) {
    error!("{:#}", err);
    status.status = RemovePhase::Failed;
    status.error = format!("{:#}", err);
}

fn skip_job_reason(plan: &HostPlan, osd: &DaemonPlan) -> &'static str {
    if plan.node_is_down {
        ", because node is down"
    } else if plan.volumes_info_missed {
        ", because volume info from node is not available"
    } else if plan.drop_from_crush {
        ", because set remove from crush only mode (dropFromCrush flag set)"
    } else if osd.skip_device_cleanup_job {
        ", because set skip cleanup job flag in spec"
    } else {
        ", nothing to cleanup"
    }
}

/// Whether a job should be skipped for a removed OSD
fn skips_cleanup_job(plan: &HostPlan, osd: &DaemonPlan, job: Option<&RemoveStatus>) -> bool {
    let unusable = plan.node_is_down
        || plan.volumes_info_missed
        || plan.drop_from_crush
        || osd.device_mapping.is_empty();
    (job.is_none() && unusable) || osd.skip_device_cleanup_job
}

/// Device set for an OSD's cleanup job.
///
/// Returns `true` first when another job on the host is still running. Devices
/// shared with OSDs whose own cleanup is not settled are not zapped.
pub fn job_devices(
    key: &DaemonKey,
    host_mapping: &BTreeMap<DaemonKey, DaemonPlan>,
) -> (bool, BTreeMap<String, DeviceInfo>) {
    let mut devices = host_mapping
        .get(key)
        .map(|plan| plan.device_mapping.clone())
        .unwrap_or_default();
    for (other_key, other) in host_mapping {
        if other_key == key {
            continue;
        }
        let other_job = other
            .remove_status
            .as_ref()
            .and_then(|result| result.cleanup_job.as_ref());
        if other_job.map(|job| job.is(RemovePhase::InProgress)).unwrap_or(false) {
            return (true, devices);
        }
        for device in other.device_mapping.keys() {
            let info = match devices.get_mut(device) {
                Some(info) if info.zap => info,
                _ => continue,
            };
            let reason = if other.skip_device_cleanup_job {
                "which is not going to be clean up"
            } else {
                match other_job.map(|job| job.status) {
                    Some(RemovePhase::Completed) | Some(RemovePhase::Skipped) => continue,
                    Some(RemovePhase::Failed) => "which has failed cleanup job",
                    _ => "which is not cleaned up yet",
                }
            };
            info!(
                "disabling disk '{}' zapping for osd '{}', since disk is used for osd '{}' on the same host, {}",
                device, key, other_key, reason
            );
            info.zap = false;
        }
    }
    (false, devices)
}

impl<'a> TaskRun<'a> {
    /// Run one executor pass over the plan.
    ///
    /// Returns whether every OSD reached a final state, plus the updated plan.
    pub async fn process_removal(&mut self, current: &RemoveInfo) -> (bool, RemoveInfo) {
        let mut info = current.clone();
        let mut buckets = Buckets::default();
        let mut hosts_to_remove = Vec::new();

        for (host, plan) in info.cleanup_map.iter_mut() {
            let mut not_completed = plan.osd_mapping.len();
            for (key, osd) in plan.osd_mapping.iter_mut() {
                let slot = (host.clone(), key.clone());
                match &osd.remove_status {
                    None => {
                        let phase = if key.is_stray() || host == STRAY_HOST {
                            // strays need no rebalance, only crush/keyring cleanup
                            if osd.in_crush_map {
                                RemovePhase::InProgress
                            } else {
                                RemovePhase::Stray
                            }
                        } else {
                            RemovePhase::Pending
                        };
                        osd.remove_status = Some(RemovalResult::new(phase));
                        buckets.push(phase, slot);
                    }
                    Some(result) => {
                        let phase = result.osd.status;
                        if matches!(phase, RemovePhase::Finished | RemovePhase::Skipped) {
                            not_completed -= 1;
                        }
                        buckets.push(phase, slot);
                    }
                }
            }
            if plan.removes_host() && not_completed == 0 && plan.host_remove_status.is_none() {
                hosts_to_remove.push(host.clone());
            }
        }

        if !hosts_to_remove.is_empty() {
            self.requeue_now = true;
            for host in hosts_to_remove {
                let status = self.remove_host_from_crush(&host).await;
                if status.is(RemovePhase::Failed) {
                    info.warnings.push(format!(
                        "[node '{}'] failed to remove node from crush map: {}",
                        host, status.error
                    ));
                }
                if let Some(plan) = info.cleanup_map.get_mut(&host) {
                    plan.host_remove_status = Some(status);
                }
            }
            return (false, info);
        }

        self.requeue_now = true;
        // a failed removal stops new ones from starting
        if !buckets.failed.is_empty() && !buckets.pending.is_empty() {
            for slot in buckets.pending.drain(..) {
                if let Some(result) = result_mut(&mut info, &slot) {
                    result.osd.started_at = None;
                }
            }
        }
        let mut issues = Vec::new();
        for (host, key) in &buckets.failed {
            error!("detected fail during osd '{}' remove", key);
            issues.push(format!("[node '{}'] failed to remove osd '{}'", host, key));
        }

        let mut not_completed = 0usize;
        for slot in &buckets.finished {
            let (host, key) = slot;
            let (plan, osd) = match info.cleanup_map.get(host) {
                Some(plan) => match plan.osd_mapping.get(key) {
                    Some(osd) => (plan.clone(), osd.clone()),
                    None => continue,
                },
                None => continue,
            };
            let job = osd
                .remove_status
                .as_ref()
                .and_then(|result| result.cleanup_job.clone());
            match job.as_ref().map(|job| job.status) {
                None | Some(RemovePhase::InProgress) | Some(RemovePhase::Pending) => {
                    let status = if skips_cleanup_job(&plan, &osd, job.as_ref()) {
                        info!(
                            "skipping device cleanup job for node '{}'{}",
                            host,
                            skip_job_reason(&plan, &osd)
                        );
                        RemoveStatus::new(RemovePhase::Skipped)
                    } else {
                        self.handle_job_run(host, key, &plan.osd_mapping).await
                    };
                    let settled = status.is(RemovePhase::Completed) || status.is(RemovePhase::Skipped);
                    if let Some(result) = result_mut(&mut info, slot) {
                        result.cleanup_job = Some(status);
                    }
                    if !settled {
                        not_completed += 1;
                        // nothing else moves, wait for the job
                        if buckets.rebalancing.is_empty() && buckets.pending.is_empty() {
                            self.requeue_now = false;
                        }
                        continue;
                    }
                }
                Some(RemovePhase::Failed) => {
                    let name = job.as_ref().map(|job| job.name.as_str()).unwrap_or_default();
                    issues.push(format!(
                        "[node '{}'] disk cleanup job '{}' has failed, clean up disk/partitions manually",
                        host, name
                    ));
                    issues.push(format!(
                        "[node '{}'] deployment '{}' is not removed, because job '{}' is failed",
                        host,
                        key.deployment_name(),
                        name
                    ));
                    continue;
                }
                Some(RemovePhase::Completed) | Some(RemovePhase::Skipped) => {}
                Some(other) => {
                    let name = job.as_ref().map(|job| job.name.as_str()).unwrap_or_default();
                    let msg = format!(
                        "unexpected remove status '{}' for device cleanup job '{}', deployment remove for osd '{}' on node '{}' skipped",
                        other, name, key, host
                    );
                    error!("{}", msg);
                    info.warnings.push(msg);
                    continue;
                }
            }

            let removed = osd
                .remove_status
                .as_ref()
                .map(|result| result.osd.is(RemovePhase::Finished))
                .unwrap_or(false);
            let deployment = match result_mut(&mut info, slot) {
                Some(result) => result.deployment.clone(),
                None => continue,
            };
            match deployment {
                None => {
                    let status = if removed && !osd.skip_device_cleanup_job {
                        not_completed += 1;
                        self.remove_deployment(key).await
                    } else {
                        RemoveStatus::new(RemovePhase::Skipped)
                    };
                    if let Some(result) = result_mut(&mut info, slot) {
                        result.deployment = Some(status);
                    }
                }
                Some(status) if status.is(RemovePhase::Failed) => {
                    issues.push(format!(
                        "[node '{}'] failed to remove deployment '{}'",
                        host,
                        key.deployment_name()
                    ));
                }
                Some(_) => {}
            }
        }
        issues.sort();
        info.issues = issues;

        // one osd leaves crush per pass, the rest stay queued
        let mut leaving = buckets
            .stray
            .iter()
            .map(|slot| (slot, true))
            .chain(buckets.in_progress.iter().map(|slot| (slot, false)));
        if let Some((slot, stray)) = leaving.next() {
            not_completed += 1;
            if let Some(current) = result_mut(&mut info, slot).map(|result| result.osd.clone()) {
                let status = if stray {
                    self.remove_stray(&slot.1, current).await
                } else {
                    self.remove_from_crush(&slot.1, current).await
                };
                if let Some(result) = result_mut(&mut info, slot) {
                    result.osd = status;
                }
            }
        }
        let queued = leaving.count();
        not_completed += queued;

        for slot in &buckets.rebalancing {
            not_completed += 1;
            if let Some(current) = result_mut(&mut info, slot).map(|result| result.osd.clone()) {
                let status = self.check_rebalance(&slot.1, current).await;
                if !status.is(RemovePhase::InProgress) {
                    self.requeue_now = false;
                }
                if let Some(result) = result_mut(&mut info, slot) {
                    result.osd = status;
                }
            }
        }
        if !buckets.rebalancing.is_empty() || queued > 0 {
            return (false, info);
        }

        let mut waiting: Vec<&Slot> = Vec::new();
        for slot in &buckets.pending {
            not_completed += 1;
            let current = match result_mut(&mut info, slot) {
                Some(result) => result.osd.clone(),
                None => continue,
            };
            let status = self.try_to_move_out(&slot.1, &current).await;
            let still_pending = status.is(RemovePhase::Pending);
            if let Some(result) = result_mut(&mut info, slot) {
                result.osd = status;
            }
            if still_pending {
                waiting.push(slot);
                continue;
            }
            // the waiting set changed, restart its budget
            for other in waiting.drain(..) {
                if let Some(result) = result_mut(&mut info, other) {
                    result.osd.started_at = None;
                }
            }
            break;
        }

        if not_completed == 0 {
            return (true, info);
        }
        self.requeue_now = self.requeue_now && waiting.is_empty();
        (false, info)
    }

    async fn ceph(&self, command: &str) -> Result<String> {
        let ceph = self.backends.ceph.as_ref();
        self.settings.retry.run(move || ceph.run(command)).await
    }

    async fn scale_down(&self, key: &DaemonKey) -> Result<()> {
        let api = self.backends.cluster.as_ref();
        let namespace = self.cluster.namespace.as_str();
        let name = key.deployment_name();
        let name = name.as_str();
        self.settings
            .retry
            .run(move || async move {
                // a missing deployment is as good as a stopped one
                api.scale_deployment(namespace, name, 0).await.map(|_| ())
            })
            .await
    }

    /// Remaining rebalance budget for a wait started at `started`
    fn wait_left(&self, started: DateTime<Utc>) -> Option<Duration> {
        let elapsed = (Utc::now() - started).to_std().unwrap_or_default();
        self.settings
            .rebalance_timeout
            .checked_sub(elapsed)
            .filter(|left| !left.is_zero())
    }

    async fn remove_host_from_crush(&self, host: &str) -> RemoveStatus {
        info!("removing host '{}' from crush map", host);
        let mut status = RemoveStatus::new(RemovePhase::InProgress).started_now();
        match self.ceph(&format!("ceph osd crush remove {}", host)).await {
            Ok(_) => mark_finished(&mut status),
            Err(e) => mark_failed(&mut status, &e),
        }
        status
    }

    async fn remove_deployment(&self, key: &DaemonKey) -> RemoveStatus {
        let name = key.deployment_name();
        let mut status = RemoveStatus::new(RemovePhase::InProgress)
            .with_name(name.clone())
            .started_now();
        info!("removing osd deployment '{}'", name);
        let api = self.backends.cluster.as_ref();
        let namespace = self.cluster.namespace.as_str();
        let deployment = name.as_str();
        let result = self
            .settings
            .retry
            .run(move || async move { api.delete_deployment(namespace, deployment).await })
            .await;
        match result {
            Ok(_) => mark_finished(&mut status),
            Err(e) => mark_failed(&mut status, &e),
        }
        status
    }

    async fn osd_id_in_use(&self, id: u32) -> Result<bool> {
        let output = self.ceph("ceph osd ls").await?;
        let id = id.to_string();
        Ok(output.lines().any(|line| line.trim() == id))
    }

    async fn drop_stray_entries(&self, key: &DaemonKey) -> Result<()> {
        info!("scaling down deployment for stray osd '{}' if present", key.id());
        self.scale_down(key).await?;
        info!("dropping stray osd '{}' auth keyring", key.id());
        self.ceph(&format!("ceph auth del osd.{}", key.id())).await?;
        Ok(())
    }

    /// Clean up a stray which is not in crush, unless its id was reused
    async fn remove_stray(&self, key: &DaemonKey, mut status: RemoveStatus) -> RemoveStatus {
        info!("trying to cleanup stray osd '{}'", key);
        match self.osd_id_in_use(key.id()).await {
            Ok(true) => {
                info!(
                    "found osd with different uuid and same id '{}' in crush map, deployment and keyring cleanup skipped",
                    key.id()
                );
                status.status = RemovePhase::Skipped;
            }
            Ok(false) => {
                status.started_at = Some(Utc::now());
                match self.drop_stray_entries(key).await {
                    Ok(()) => mark_finished(&mut status),
                    Err(e) => mark_failed(&mut status, &e),
                }
            }
            Err(e) => mark_failed(&mut status, &e),
        }
        status
    }

    async fn purge_osd(&self, key: &DaemonKey) -> Result<()> {
        let id = key.id();
        info!("trying to scale down deployment for osd '{}'", id);
        self.scale_down(key).await?;
        info!("removing osd '{}' from crush map", id);
        self.ceph(&format!("ceph osd purge {} --force --yes-i-really-mean-it", id))
            .await?;
        info!("dropping osd '{}' auth keyring", id);
        self.ceph(&format!("ceph auth del osd.{}", id)).await?;
        Ok(())
    }

    async fn remove_from_crush(&self, key: &DaemonKey, mut status: RemoveStatus) -> RemoveStatus {
        match self.purge_osd(key).await {
            Ok(()) => mark_finished(&mut status),
            Err(e) => mark_failed(&mut status, &e),
        }
        status
    }

    async fn check_rebalance(&self, key: &DaemonKey, mut status: RemoveStatus) -> RemoveStatus {
        let id = key.id();
        info!("checking rebalance completed for osd '{}'", id);
        let ceph = self.backends.ceph.as_ref();
        let command = format!("ceph pg ls-by-osd {} --format json", id);
        let command = command.as_str();
        let pgs = self
            .settings
            .retry
            .run(move || run_json::<PgsByOsd>(ceph, command))
            .await;
        match pgs {
            Err(e) => mark_failed(&mut status, &e),
            Ok(pgs) if pgs.has_pgs() => {
                let started = match status.started_at {
                    Some(started) => started,
                    None => {
                        error!("missing startedAt timestamp for osd '{}', expected rebalance start time", id);
                        return status;
                    }
                };
                if let Some(left) = self.wait_left(started) {
                    info!(
                        "rebalance is not finished for osd '{}', waiting within next {}",
                        id,
                        format_timeout(left)
                    );
                    return status;
                }
                let msg = format!(
                    "timeout ({}) reached for waiting pg rebalance",
                    format_timeout(self.settings.rebalance_timeout)
                );
                error!("{} for osd '{}', aborting", msg, id);
                status.status = RemovePhase::Failed;
                status.error = msg;
            }
            Ok(_) => {
                info!("rebalance finished for osd '{}'", id);
                status.status = RemovePhase::InProgress;
            }
        }
        status
    }

    /// Take a pending osd out of data placement
    async fn try_to_move_out(&self, key: &DaemonKey, current: &RemoveStatus) -> RemoveStatus {
        let id = key.id();
        let ceph = self.backends.ceph.as_ref();
        let command = format!("ceph osd info {} --format json", id);
        let command = command.as_str();
        let osd = match self
            .settings
            .retry
            .run(move || run_json::<OsdInfo>(ceph, command))
            .await
        {
            Ok(osd) => osd,
            Err(e) => {
                error!("{:#}", e);
                return RemoveStatus::failed(format!("{:#}", e));
            }
        };

        let mut status = RemoveStatus::new(RemovePhase::InProgress);
        if osd.is_in() {
            info!("trying to out osd '{}'", id);
            if osd.is_up() {
                status.status = RemovePhase::WaitingRebalance;
                // checked once, the wait budget handles retries
                if let Err(e) = ceph.run(&format!("ceph osd ok-to-stop {}", id)).await {
                    error!("{:#}", e);
                    let left = match current.started_at {
                        Some(started) => self.wait_left(started),
                        None => Some(self.settings.rebalance_timeout).filter(|t| !t.is_zero()),
                    };
                    if let Some(left) = left {
                        warn!(
                            "can't stop osd '{}', retrying within next {}",
                            id,
                            format_timeout(left)
                        );
                        let mut pending = RemoveStatus::new(RemovePhase::Pending);
                        pending.started_at = current.started_at.or_else(|| Some(Utc::now()));
                        return pending;
                    }
                    let msg = format!(
                        "timeout ({}) reached for waiting ok-to-stop on osd '{}'",
                        format_timeout(self.settings.rebalance_timeout),
                        id
                    );
                    error!("{}, aborting", msg);
                    return RemoveStatus::failed(msg);
                }
            }
            if let Err(e) = self.ceph(&format!("ceph osd crush reweight osd.{} 0.0", id)).await {
                error!("{:#}", e);
                return RemoveStatus::failed(format!("{:#}", e));
            }
        } else if osd.is_up() {
            info!("osd '{}' is already not in", id);
            status.status = RemovePhase::WaitingRebalance;
        } else {
            info!("osd '{}' is already not in and not up", id);
        }
        status.started_at = Some(Utc::now());
        status
    }

    /// Start, defer or poll the device cleanup job of a removed osd
    async fn handle_job_run(
        &self,
        host: &str,
        key: &DaemonKey,
        host_mapping: &BTreeMap<DaemonKey, DaemonPlan>,
    ) -> RemoveStatus {
        let current = host_mapping
            .get(key)
            .and_then(|plan| plan.remove_status.as_ref())
            .and_then(|result| result.cleanup_job.clone());
        match current {
            Some(status) if !status.is(RemovePhase::Pending) => self.check_job(status).await,
            _ => self.start_job(host, key, host_mapping).await,
        }
    }

    async fn start_job(
        &self,
        host: &str,
        key: &DaemonKey,
        host_mapping: &BTreeMap<DaemonKey, DaemonPlan>,
    ) -> RemoveStatus {
        let (parallel, devices) = job_devices(key, host_mapping);
        if parallel {
            info!(
                "delaying disk cleanup job for node '{}' for devices associated with osd '{}': detected running job on the same host",
                host, key
            );
            return RemoveStatus::new(RemovePhase::Pending);
        }
        if devices.is_empty() {
            info!(
                "skipping disk cleanup job for node '{}': no available devices for clean up",
                host
            );
            return RemoveStatus::new(RemovePhase::Skipped);
        }
        info!(
            "running cleanup job for devices related to osd '{}' on node '{}'",
            key, host
        );
        let host_directory = host_mapping
            .get(key)
            .map(|plan| plan.host_directory.as_str())
            .unwrap_or_default();
        let (name, result) = self.run_cleanup_job(host, key, host_directory, &devices).await;
        match result {
            Ok(()) => RemoveStatus::new(RemovePhase::InProgress)
                .with_name(name)
                .started_now(),
            Err(e) => RemoveStatus::failed(format!("failed to run job: {:#}", e)).with_name(name),
        }
    }

    async fn check_job(&self, mut status: RemoveStatus) -> RemoveStatus {
        info!("checking device cleanup job '{}'", status.name);
        let api = self.backends.cluster.as_ref();
        let namespace = self.settings.namespace.as_str();
        let name = status.name.clone();
        let job_name = name.as_str();
        let job = self
            .settings
            .retry
            .run(move || async move {
                api.get_job(namespace, job_name)
                    .await?
                    .ok_or_else(|| anyhow!("job '{}' is not found", job_name))
            })
            .await;
        match job {
            Err(e) => {
                error!("{:#}", e);
                status.status = RemovePhase::Failed;
                status.error = format!("failed to get job info: {:#}", e);
            }
            Ok(job) if job.active > 0 => {
                info!("device cleanup job '{}' is still running", name);
            }
            Ok(job) if job.has_failed() => {
                error!("device cleanup job '{}' has failed", name);
                status.status = RemovePhase::Failed;
                status.error = "job failed, check logs".to_string();
            }
            Ok(job) if job.succeeded > 0 => {
                info!("device cleanup job '{}' has been completed", name);
                status.status = RemovePhase::Completed;
                status.finished_at = Some(Utc::now());
            }
            Ok(_) => {
                warn!("device cleanup job '{}' is pending", name);
            }
        }
        status
    }
}
