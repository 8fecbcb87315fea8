//! Mock services for testing
//!
//! Provides in-memory implementations of the ceph CLI, disk daemon and
//! Kubernetes API for isolated testing without a cluster.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use osd_remove_controller::models::{
    CephClusterInfo, CleanupJob, ClusterNode, DeploymentHealth, DeploymentState,
    DiskDaemonReport, JobState,
};
use osd_remove_controller::services::{Backends, CephCli, ClusterApi, DiskInventory};

/// Types of errors the mocks can simulate
#[derive(Debug, Clone)]
pub enum MockError {
    /// Connection refused
    ConnectionRefused,
    /// Timeout
    Timeout,
    /// Internal server error
    InternalError(String),
}

impl MockError {
    fn into_error(self) -> anyhow::Error {
        match self {
            MockError::ConnectionRefused => anyhow!("connection refused"),
            MockError::Timeout => anyhow!("request timed out"),
            MockError::InternalError(msg) => anyhow!(msg),
        }
    }
}

fn check_error(mode: &RwLock<Option<MockError>>) -> Result<()> {
    match mode.read().unwrap().clone() {
        Some(error) => Err(error.into_error()),
        None => Ok(()),
    }
}

/// Ceph CLI answering from a command table
#[derive(Default)]
pub struct FakeCephCli {
    responses: Arc<RwLock<HashMap<String, String>>>,
    calls: Arc<RwLock<Vec<String>>>,
    /// Simulate errors when set
    pub error_mode: Arc<RwLock<Option<MockError>>>,
}

impl FakeCephCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, command: &str, output: &str) {
        self.responses
            .write()
            .unwrap()
            .insert(command.to_string(), output.to_string());
    }

    pub fn set_error_mode(&self, error: MockError) {
        *self.error_mode.write().unwrap() = Some(error);
    }

    pub fn clear_error_mode(&self) {
        *self.error_mode.write().unwrap() = None;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    pub fn was_called(&self, command: &str) -> bool {
        self.calls.read().unwrap().iter().any(|c| c == command)
    }
}

#[async_trait]
impl CephCli for FakeCephCli {
    async fn run(&self, command: &str) -> Result<String> {
        self.calls.write().unwrap().push(command.to_string());
        check_error(&self.error_mode)?;
        self.responses
            .read()
            .unwrap()
            .get(command)
            .cloned()
            .ok_or_else(|| anyhow!("unexpected command '{}'", command))
    }
}

/// Disk inventory serving prepared reports per host
#[derive(Default)]
pub struct FakeDiskInventory {
    reports: Arc<RwLock<HashMap<String, DiskDaemonReport>>>,
    pub error_mode: Arc<RwLock<Option<MockError>>>,
}

impl FakeDiskInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_report(&self, host: &str, report: DiskDaemonReport) {
        self.reports
            .write()
            .unwrap()
            .insert(host.to_string(), report);
    }
}

#[async_trait]
impl DiskInventory for FakeDiskInventory {
    async fn osd_report(&self, host: &str) -> Result<DiskDaemonReport> {
        check_error(&self.error_mode)?;
        self.reports
            .read()
            .unwrap()
            .get(host)
            .cloned()
            .ok_or_else(|| anyhow!("no route to host '{}'", host))
    }
}

#[derive(Default)]
struct ClusterStore {
    nodes: Vec<ClusterNode>,
    deployments: HashMap<String, DeploymentState>,
    jobs: HashMap<String, JobState>,
    created_jobs: Vec<CleanupJob>,
    ceph_clusters: HashMap<String, CephClusterInfo>,
    health: Vec<DeploymentHealth>,
}

/// Kubernetes API over an in-memory store
///
/// Jobs complete as soon as they are created unless `hold_jobs` is set.
#[derive(Default)]
pub struct FakeClusterApi {
    store: Arc<RwLock<ClusterStore>>,
    pub hold_jobs: Arc<RwLock<bool>>,
    pub error_mode: Arc<RwLock<Option<MockError>>>,
}

impl FakeClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_nodes(&self, nodes: Vec<ClusterNode>) {
        self.store.write().unwrap().nodes = nodes;
    }

    pub fn set_deployment(&self, namespace: &str, name: &str, state: DeploymentState) {
        self.store
            .write()
            .unwrap()
            .deployments
            .insert(format!("{}/{}", namespace, name), state);
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<DeploymentState> {
        self.store
            .read()
            .unwrap()
            .deployments
            .get(&format!("{}/{}", namespace, name))
            .copied()
    }

    pub fn set_ceph_cluster(&self, cluster: CephClusterInfo) {
        self.store
            .write()
            .unwrap()
            .ceph_clusters
            .insert(format!("{}/{}", cluster.namespace, cluster.name), cluster);
    }

    pub fn set_health(&self, health: Vec<DeploymentHealth>) {
        self.store.write().unwrap().health = health;
    }

    pub fn created_jobs(&self) -> Vec<CleanupJob> {
        self.store.read().unwrap().created_jobs.clone()
    }

    pub fn set_error_mode(&self, error: MockError) {
        *self.error_mode.write().unwrap() = Some(error);
    }

    pub fn clear_error_mode(&self) {
        *self.error_mode.write().unwrap() = None;
    }
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        check_error(&self.error_mode)?;
        Ok(self.store.read().unwrap().nodes.clone())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<DeploymentState>> {
        check_error(&self.error_mode)?;
        Ok(self.deployment(namespace, name))
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<bool> {
        check_error(&self.error_mode)?;
        let mut store = self.store.write().unwrap();
        match store.deployments.get_mut(&format!("{}/{}", namespace, name)) {
            Some(deployment) => {
                deployment.replicas = replicas;
                deployment.ready_replicas = replicas;
                deployment.available_replicas = replicas;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool> {
        check_error(&self.error_mode)?;
        let mut store = self.store.write().unwrap();
        Ok(store
            .deployments
            .remove(&format!("{}/{}", namespace, name))
            .is_some())
    }

    async fn get_job(&self, _namespace: &str, name: &str) -> Result<Option<JobState>> {
        check_error(&self.error_mode)?;
        Ok(self.store.read().unwrap().jobs.get(name).copied())
    }

    async fn create_job(&self, job: &CleanupJob) -> Result<()> {
        check_error(&self.error_mode)?;
        let state = if *self.hold_jobs.read().unwrap() {
            JobState {
                active: 1,
                ..Default::default()
            }
        } else {
            JobState {
                succeeded: 1,
                ..Default::default()
            }
        };
        let mut store = self.store.write().unwrap();
        store.jobs.insert(job.name.clone(), state);
        store.created_jobs.push(job.clone());
        Ok(())
    }

    async fn delete_job(&self, _namespace: &str, name: &str) -> Result<()> {
        check_error(&self.error_mode)?;
        self.store.write().unwrap().jobs.remove(name);
        Ok(())
    }

    async fn get_ceph_cluster(&self, namespace: &str, name: &str) -> Result<Option<CephClusterInfo>> {
        check_error(&self.error_mode)?;
        Ok(self
            .store
            .read()
            .unwrap()
            .ceph_clusters
            .get(&format!("{}/{}", namespace, name))
            .cloned())
    }

    async fn list_deployment_health(&self, _namespace: &str) -> Result<Vec<DeploymentHealth>> {
        check_error(&self.error_mode)?;
        Ok(self.store.read().unwrap().health.clone())
    }
}

/// The three mocks plus the [`Backends`] bundle built from them
pub struct MockBackends {
    pub ceph: Arc<FakeCephCli>,
    pub disks: Arc<FakeDiskInventory>,
    pub cluster: Arc<FakeClusterApi>,
}

impl MockBackends {
    pub fn new() -> Self {
        Self {
            ceph: Arc::new(FakeCephCli::new()),
            disks: Arc::new(FakeDiskInventory::new()),
            cluster: Arc::new(FakeClusterApi::new()),
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            ceph: self.ceph.clone(),
            disks: self.disks.clone(),
            cluster: self.cluster.clone(),
        }
    }
}

impl Default for MockBackends {
    fn default() -> Self {
        Self::new()
    }
}
