//! Background reconciler for removal tasks
//!
//! Every cycle loads the stored tasks and reconciles the active ones in creation
//! order. Only the oldest active task is processed, younger ones wait for it.
//! The loop sleeps for the shortest delay any task asked for, or until a task is
//! created or changed through the API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::db::TaskRepository;
use crate::models::{RemovalTask, TaskStatus};
use crate::services::osd_remove::{Backends, TaskRun, TaskSettings};

/// Floor for "requeue right away" so a busy task cannot spin the loop
const REQUEUE_NOW_DELAY: Duration = Duration::from_secs(1);

/// What to do with a task after a reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing left to do until the task changes
    Done,
    RequeueNow,
    RequeueAfter(Duration),
}

impl ReconcileOutcome {
    fn delay(self) -> Option<Duration> {
        match self {
            ReconcileOutcome::Done => None,
            ReconcileOutcome::RequeueNow => Some(REQUEUE_NOW_DELAY),
            ReconcileOutcome::RequeueAfter(d) => Some(d),
        }
    }
}

/// Drives removal tasks stored in the repository
pub struct Reconciler {
    repo: TaskRepository,
    backends: Backends,
    settings: TaskSettings,
}

impl Reconciler {
    pub fn new(repo: TaskRepository, backends: Backends, settings: TaskSettings) -> Self {
        Self {
            repo,
            backends,
            settings,
        }
    }

    pub fn settings(&self) -> &TaskSettings {
        &self.settings
    }

    fn requeue_after(&self) -> ReconcileOutcome {
        ReconcileOutcome::RequeueAfter(self.settings.requeue_interval)
    }

    /// Reconcile every active task once and return the delay before the next cycle
    pub async fn run_reconcile_cycle(&self) -> Result<Duration> {
        let tasks = self.repo.list().await?;
        let mut next: Option<Duration> = None;

        for task in tasks.iter().filter(|t| t.is_active()) {
            let outcome = match self
                .reconcile(task)
                .instrument(info_span!("reconcile", task = %task.name))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("reconcile of task '{}' failed: {:#}", task.name, e);
                    self.requeue_after()
                }
            };
            debug!("task '{}' reconciled: {:?}", task.name, outcome);
            if let Some(delay) = outcome.delay() {
                next = Some(next.map_or(delay, |n| n.min(delay)));
            }
        }

        Ok(next.unwrap_or(self.settings.requeue_interval))
    }

    /// Reconcile a single task
    ///
    /// Cluster lookups which fail are logged and retried later. Only task store
    /// failures are returned as errors.
    pub async fn reconcile(&self, task: &RemovalTask) -> Result<ReconcileOutcome> {
        info!("reconcile started");
        let Some(stored_status) = &task.status else {
            info!("initiating with 'Pending' phase");
            self.persist(&task.name, &TaskStatus::initial(&task.spec)).await?;
            return Ok(ReconcileOutcome::RequeueNow);
        };
        let mut status = stored_status.clone();
        status.phase_info.clear();

        let health = match self
            .backends
            .cluster
            .list_deployment_health(&self.settings.namespace)
            .await
        {
            Ok(health) => health,
            Err(e) => {
                error!("failed to list CephDeploymentHealth objects: {:#}", e);
                return Ok(self.requeue_after());
            }
        };
        // a single health object per namespace is expected
        let health = match health.as_slice() {
            [health] => health,
            [] => {
                info!("stale, no related CephDeploymentHealth resource found in namespace, removing");
                self.repo.delete(&task.name).await?;
                return Ok(ReconcileOutcome::Done);
            }
            _ => {
                if status.is_active() {
                    let reason = "multiple CephDeploymentHealth objects found in namespace";
                    error!("aborting, {}", reason);
                    self.persist(&task.name, &status.aborted(reason)).await?;
                }
                return Ok(ReconcileOutcome::Done);
            }
        };

        let cluster = match self
            .backends
            .cluster
            .get_ceph_cluster(&self.settings.rook_namespace, &health.name)
            .await
        {
            Ok(Some(cluster)) => cluster,
            Ok(None) => {
                error!(
                    "CephCluster '{}/{}' is not found",
                    self.settings.rook_namespace, health.name
                );
                return Ok(self.requeue_after());
            }
            Err(e) => {
                error!("failed to get CephCluster: {:#}", e);
                return Ok(self.requeue_after());
            }
        };
        if cluster.external {
            let reason = "detected external CephCluster configuration";
            info!("aborting, {}", reason);
            self.persist(&task.name, &status.aborted(reason)).await?;
            return Ok(ReconcileOutcome::Done);
        }
        if cluster.fsid.as_deref().unwrap_or_default().is_empty() {
            return self
                .postpone(&task.name, status, "CephCluster is not deployed yet, no fsid provided")
                .await;
        }
        if !health.has_cluster_status {
            return self
                .postpone(
                    &task.name,
                    status,
                    "related CephDeploymentHealth has no CephCluster status yet",
                )
                .await;
        }
        let analysis = match &health.osd_analysis {
            Some(analysis) if analysis.ceph_cluster_spec_generation.is_some() => analysis,
            _ => {
                return self
                    .postpone(
                        &task.name,
                        status,
                        "related CephDeploymentHealth has no CephCluster osd storage analysis yet",
                    )
                    .await;
            }
        };

        let tasks = self.repo.list().await?;
        let oldest = tasks.iter().find(|t| t.is_active()).map(|t| t.name.as_str());
        if oldest != Some(task.name.as_str()) {
            info!(
                "paused, found older not completed task '{}'",
                oldest.unwrap_or_default()
            );
            return self
                .postpone(&task.name, status, "waiting for older CephOsdRemoveTask completion")
                .await;
        }

        let mut current = task.clone();
        current.status = Some(status.clone());
        let mut run = TaskRun::new(&self.backends, &self.settings, &current, &cluster, analysis);
        let new_status = run.handle_task().await;

        if new_status != status {
            self.persist(&task.name, &new_status).await?;
            if !new_status.is_active() {
                info!("finished processing");
                return Ok(ReconcileOutcome::Done);
            }
        }
        if run.requeue_now {
            return Ok(ReconcileOutcome::RequeueNow);
        }
        info!("processing is not finished yet");
        Ok(self.requeue_after())
    }

    /// Record why the task cannot move forward right now
    async fn postpone(
        &self,
        name: &str,
        mut status: TaskStatus,
        reason: &str,
    ) -> Result<ReconcileOutcome> {
        warn!("{}", reason);
        status.phase_info = reason.to_string();
        self.persist(name, &status).await?;
        Ok(self.requeue_after())
    }

    async fn persist(&self, name: &str, status: &TaskStatus) -> Result<()> {
        let updated = self
            .repo
            .update_status(name, status)
            .await
            .with_context(|| {
                format!(
                    "failed to update task '{}' status with '{}' phase",
                    name,
                    status.phase.as_str()
                )
            })?;
        if !updated {
            warn!("task '{}' disappeared before its status was updated", name);
        }
        Ok(())
    }
}

/// Scheduler state for the reconcile loop
#[derive(Clone)]
pub struct ReconcilerSchedulerState {
    /// Whether the scheduler is running
    running: Arc<RwLock<bool>>,
    /// Wakes the loop before its delay runs out
    wake: Arc<Notify>,
    reconciler: Arc<Reconciler>,
}

impl ReconcilerSchedulerState {
    pub fn new(reconciler: Arc<Reconciler>, wake: Arc<Notify>) -> Self {
        Self::with_running(reconciler, wake, false)
    }

    fn with_running(reconciler: Arc<Reconciler>, wake: Arc<Notify>, running: bool) -> Self {
        Self {
            running: Arc::new(RwLock::new(running)),
            wake,
            reconciler,
        }
    }

    /// Check if the scheduler is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Stop the scheduler
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        drop(running);
        self.wake.notify_one();
        info!("Reconciler stop requested");
    }
}

/// Start the background reconcile loop
///
/// `wake` is shared with the task API, which notifies it on every task change.
pub fn start_reconciler(reconciler: Arc<Reconciler>, wake: Arc<Notify>) -> ReconcilerSchedulerState {
    // marked running before the spawn so an early stop() is not overwritten
    let state = ReconcilerSchedulerState::with_running(reconciler, wake, true);

    tokio::spawn(reconcile_loop(state.clone()));

    info!("Reconciler started");
    state
}

async fn reconcile_loop(state: ReconcilerSchedulerState) {
    let interval = state.reconciler.settings().requeue_interval;
    info!("Reconcile loop started (requeue interval: {}s)", interval.as_secs());

    loop {
        if !state.is_running().await {
            info!("Reconciler stopped");
            break;
        }

        let delay = match state.reconciler.run_reconcile_cycle().await {
            Ok(delay) => delay,
            Err(e) => {
                error!("Reconcile cycle failed: {:#}", e);
                interval
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = state.wake.notified() => {
                debug!("Reconciler woken up by task change");
            }
        }
    }
}
