//! In-memory backends for task processing tests

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;

use super::{Backends, TaskRun, TaskSettings};
use crate::models::{
    CephClusterInfo, CleanupJob, ClusterNode, DeploymentHealth, DeploymentState,
    DiskDaemonReport, JobState, OsdSpecAnalysis, RemovalTask, TaskSpec,
};
use crate::services::ceph_cli::CephCli;
use crate::services::cluster_api::ClusterApi;
use crate::services::disk_daemon::DiskInventory;
use crate::services::retry::RetryPolicy;

/// Ceph CLI answering from a command table, unknown commands fail
#[derive(Default)]
pub struct FakeCeph {
    responses: Mutex<BTreeMap<String, Result<String, String>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeCeph {
    pub fn respond(&self, command: &str, output: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), Ok(output.to_string()));
    }

    pub fn fail(&self, command: &str, error: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(command.to_string(), Err(error.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn was_called(&self, command: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == command)
    }
}

#[async_trait]
impl CephCli for FakeCeph {
    async fn run(&self, command: &str) -> Result<String> {
        self.calls.lock().unwrap().push(command.to_string());
        match self.responses.lock().unwrap().get(command) {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(e)) => Err(anyhow!(e.clone())),
            None => Err(anyhow!("unexpected command '{}'", command)),
        }
    }
}

#[derive(Default)]
pub struct FakeDisks {
    reports: Mutex<BTreeMap<String, DiskDaemonReport>>,
}

impl FakeDisks {
    pub fn set_report(&self, host: &str, report: DiskDaemonReport) {
        self.reports.lock().unwrap().insert(host.to_string(), report);
    }
}

#[async_trait]
impl DiskInventory for FakeDisks {
    async fn osd_report(&self, host: &str) -> Result<DiskDaemonReport> {
        self.reports
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .ok_or_else(|| anyhow!("no route to host '{}'", host))
    }
}

#[derive(Default)]
struct ClusterState {
    nodes: Vec<ClusterNode>,
    deployments: BTreeMap<String, DeploymentState>,
    jobs: BTreeMap<String, JobState>,
    created_jobs: Vec<CleanupJob>,
    deleted_jobs: Vec<String>,
    deleted_deployments: Vec<String>,
    scaled: Vec<String>,
    ceph_clusters: BTreeMap<String, CephClusterInfo>,
    health: Vec<DeploymentHealth>,
}

/// Cluster API over plain maps, deployments keyed by `namespace/name`
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn set_nodes(&self, nodes: Vec<ClusterNode>) {
        self.state.lock().unwrap().nodes = nodes;
    }

    pub fn set_deployment(&self, namespace: &str, name: &str, state: DeploymentState) {
        self.state
            .lock()
            .unwrap()
            .deployments
            .insert(format!("{}/{}", namespace, name), state);
    }

    pub fn set_job(&self, name: &str, state: JobState) {
        self.state.lock().unwrap().jobs.insert(name.to_string(), state);
    }

    pub fn set_ceph_cluster(&self, cluster: CephClusterInfo) {
        self.state
            .lock()
            .unwrap()
            .ceph_clusters
            .insert(format!("{}/{}", cluster.namespace, cluster.name), cluster);
    }

    pub fn set_health(&self, health: Vec<DeploymentHealth>) {
        self.state.lock().unwrap().health = health;
    }

    pub fn created_jobs(&self) -> Vec<CleanupJob> {
        self.state.lock().unwrap().created_jobs.clone()
    }

    pub fn deleted_jobs(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_jobs.clone()
    }

    pub fn deleted_deployments(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_deployments.clone()
    }

    pub fn scaled(&self) -> Vec<String> {
        self.state.lock().unwrap().scaled.clone()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        Ok(self.state.lock().unwrap().nodes.clone())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<DeploymentState>> {
        let key = format!("{}/{}", namespace, name);
        Ok(self.state.lock().unwrap().deployments.get(&key).copied())
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<bool> {
        let key = format!("{}/{}", namespace, name);
        let mut state = self.state.lock().unwrap();
        state.scaled.push(key.clone());
        match state.deployments.get_mut(&key) {
            Some(deployment) => {
                deployment.replicas = replicas;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool> {
        let key = format!("{}/{}", namespace, name);
        let mut state = self.state.lock().unwrap();
        state.deleted_deployments.push(key.clone());
        Ok(state.deployments.remove(&key).is_some())
    }

    async fn get_job(&self, _namespace: &str, name: &str) -> Result<Option<JobState>> {
        Ok(self.state.lock().unwrap().jobs.get(name).copied())
    }

    async fn create_job(&self, job: &CleanupJob) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(
            job.name.clone(),
            JobState {
                active: 1,
                ..Default::default()
            },
        );
        state.created_jobs.push(job.clone());
        Ok(())
    }

    async fn delete_job(&self, _namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.jobs.remove(name);
        state.deleted_jobs.push(name.to_string());
        Ok(())
    }

    async fn get_ceph_cluster(&self, namespace: &str, name: &str) -> Result<Option<CephClusterInfo>> {
        let key = format!("{}/{}", namespace, name);
        Ok(self.state.lock().unwrap().ceph_clusters.get(&key).cloned())
    }

    async fn list_deployment_health(&self, _namespace: &str) -> Result<Vec<DeploymentHealth>> {
        Ok(self.state.lock().unwrap().health.clone())
    }
}

pub fn test_settings() -> TaskSettings {
    TaskSettings {
        namespace: "ceph-lcm-mirantis".into(),
        rook_namespace: "rook-ceph".into(),
        operator_deployment: "rook-ceph-operator".into(),
        placement: "pelagia-disk-daemon=true".parse().unwrap(),
        rebalance_timeout: Duration::from_secs(30 * 60),
        allow_manual_lvm: false,
        retry: RetryPolicy::once(),
        job_deadline_secs: 3600,
        requeue_interval: Duration::from_secs(60),
    }
}

pub fn test_cluster() -> CephClusterInfo {
    CephClusterInfo {
        name: "cephcluster".into(),
        namespace: "rook-ceph".into(),
        generation: 3,
        resource_version: "1000".into(),
        fsid: Some("fsid-1".into()),
        image: Some("quay.io/ceph/ceph:v19.2.1".into()),
        ..Default::default()
    }
}

pub fn test_task(spec: TaskSpec) -> RemovalTask {
    RemovalTask {
        name: "remove-task".into(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        spec,
        status: None,
    }
}

/// Fakes plus everything a [`TaskRun`] borrows
pub struct Harness {
    pub ceph: Arc<FakeCeph>,
    pub disks: Arc<FakeDisks>,
    pub cluster: Arc<FakeCluster>,
    pub backends: Backends,
    pub settings: TaskSettings,
    pub task: RemovalTask,
    pub cluster_info: CephClusterInfo,
    pub analysis: OsdSpecAnalysis,
}

impl Harness {
    pub fn new() -> Self {
        let ceph = Arc::new(FakeCeph::default());
        let disks = Arc::new(FakeDisks::default());
        let cluster = Arc::new(FakeCluster::default());
        let backends = Backends {
            ceph: ceph.clone(),
            disks: disks.clone(),
            cluster: cluster.clone(),
        };
        Self {
            ceph,
            disks,
            cluster,
            backends,
            settings: test_settings(),
            task: test_task(TaskSpec::default()),
            cluster_info: test_cluster(),
            analysis: OsdSpecAnalysis {
                ceph_cluster_spec_generation: Some(3),
                ..Default::default()
            },
        }
    }

    pub fn run(&self) -> TaskRun<'_> {
        TaskRun::new(
            &self.backends,
            &self.settings,
            &self.task,
            &self.cluster_info,
            &self.analysis,
        )
    }
}
