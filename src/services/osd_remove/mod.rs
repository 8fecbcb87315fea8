//! OSD removal task processing
//!
//! A reconcile pass of one task is a [`TaskRun`]. It validates the request into a
//! removal plan ([`plan`]), waits for approval and for the rook operator to stop
//! ([`phase`]), then drives every OSD in the plan through removal ([`executor`]),
//! wiping devices with per-OSD cleanup jobs ([`cleanup_job`]).

pub mod cleanup_job;
pub mod devices;
pub mod executor;
pub mod phase;
pub mod plan;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::models::{CephClusterInfo, LabelSelector, OsdSpecAnalysis, RemovalTask};
use crate::services::ceph_cli::CephCli;
use crate::services::cluster_api::ClusterApi;
use crate::services::disk_daemon::DiskInventory;
use crate::services::retry::RetryPolicy;

/// External systems a task talks to
#[derive(Clone)]
pub struct Backends {
    pub ceph: Arc<dyn CephCli>,
    pub disks: Arc<dyn DiskInventory>,
    pub cluster: Arc<dyn ClusterApi>,
}

/// Task processing parameters
#[derive(Debug, Clone)]
pub struct TaskSettings {
    /// Namespace of tasks, health objects and cleanup jobs
    pub namespace: String,
    pub rook_namespace: String,
    pub operator_deployment: String,
    pub placement: LabelSelector,
    pub rebalance_timeout: Duration,
    pub allow_manual_lvm: bool,
    pub retry: RetryPolicy,
    pub job_deadline_secs: i64,
    pub requeue_interval: Duration,
}

impl TaskSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let placement = config
            .cluster
            .disk_daemon_placement_label
            .parse()
            .context("Invalid disk daemon placement label")?;
        Ok(Self {
            namespace: config.cluster.namespace.clone(),
            rook_namespace: config.cluster.rook_namespace.clone(),
            operator_deployment: config.cluster.operator_deployment.clone(),
            placement,
            rebalance_timeout: Duration::from_secs(config.task.osd_pg_rebalance_timeout_min * 60),
            allow_manual_lvm: config.task.allow_remove_manually_created_lvm,
            retry: RetryPolicy::new(
                config.task.retry_attempts,
                Duration::from_secs(config.task.retry_interval_secs),
            ),
            job_deadline_secs: config.task.cleanup_job_deadline_secs,
            requeue_interval: Duration::from_secs(config.task.requeue_interval_secs),
        })
    }
}

/// State of a single reconcile pass over one task
pub struct TaskRun<'a> {
    pub backends: &'a Backends,
    pub settings: &'a TaskSettings,
    pub task: &'a RemovalTask,
    pub cluster: &'a CephClusterInfo,
    pub analysis: &'a OsdSpecAnalysis,
    /// Progress was made and the task should be looked at again right away
    pub requeue_now: bool,
}

impl<'a> TaskRun<'a> {
    pub fn new(
        backends: &'a Backends,
        settings: &'a TaskSettings,
        task: &'a RemovalTask,
        cluster: &'a CephClusterInfo,
        analysis: &'a OsdSpecAnalysis,
    ) -> Self {
        Self {
            backends,
            settings,
            task,
            cluster,
            analysis,
            requeue_now: false,
        }
    }
}

/// Render a duration the way operators know it from ceph/k8s tooling, e.g. `30m0s`
pub fn format_timeout(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
