//! Task phase state machine
//!
//! `Pending -> Validating -> ApproveWaiting -> WaitingOperator -> Processing`
//! and one of the terminal phases. Each reconcile pass moves a task at most one
//! phase forward and returns the status to persist.

use tracing::{error, info};

use super::plan::{ClusterSnapshot, PlanBuilder};
use super::TaskRun;
use crate::models::{
    ClusterVersion, OsdInfo, OsdMetadata, OsdTree, RemoveInfo, TaskCondition, TaskPhase,
    TaskStatus,
};
use crate::services::ceph_cli::run_json;

impl<'a> TaskRun<'a> {
    /// Advance the task by one phase step
    pub async fn handle_task(&mut self) -> TaskStatus {
        let status = match &self.task.status {
            Some(status) => status.clone(),
            None => return TaskStatus::initial(&self.task.spec),
        };
        if status.conditions.is_empty() {
            let reason = "status conditions section unexpectedly missed, task should be re-created";
            error!("{}", reason);
            return status.aborted(reason);
        }

        match status.phase {
            TaskPhase::Pending => {
                self.requeue_now = true;
                info!("ready to validation");
                self.move_phase(&status, TaskPhase::Validating, "validation", None)
            }
            TaskPhase::Validating => {
                let validated = self.analysis.ceph_cluster_spec_generation;
                if validated != Some(self.cluster.generation) {
                    info!(
                        "related CephDeploymentHealth has not validated yet latest CephCluster spec (validated: {:?}, current: {})",
                        validated, self.cluster.generation
                    );
                    return status;
                }
                let result = self.validate_task().await;
                if !result.issues.is_empty() {
                    error!("validation failed, found next issues: {}", result.issues.join(","));
                    return self.move_phase(&status, TaskPhase::ValidationFailed, "validation failed", Some(result));
                }
                if result.cleanup_map.is_empty() {
                    let msg = "validation completed, nothing to remove";
                    info!("{}", msg);
                    return self.move_phase(&status, TaskPhase::Completed, msg, Some(result));
                }
                if self.task.spec.approve {
                    self.requeue_now = true;
                    let msg = "validation completed, approve pre-set";
                    info!("{}", msg);
                    return self.move_phase(&status, TaskPhase::WaitingOperator, msg, Some(result));
                }
                let msg = "validation completed, waiting approve";
                info!("{}", msg);
                self.move_phase(&status, TaskPhase::ApproveWaiting, msg, Some(result))
            }
            TaskPhase::ApproveWaiting => {
                if self.task.spec.approve {
                    info!("approve received");
                    self.requeue_now = true;
                    let remove_info = status.remove_info.clone();
                    return self.move_phase(
                        &status,
                        TaskPhase::WaitingOperator,
                        "approve received, wait rook-operator stop",
                        remove_info,
                    );
                }
                let reasons = self.spec_changes(&status);
                if !reasons.is_empty() {
                    info!("revalidation required due to {}", reasons.join(", "));
                    self.requeue_now = true;
                    return self.move_phase(&status, TaskPhase::Validating, "revalidation triggered", None);
                }
                info!("waiting for approve");
                status
            }
            TaskPhase::WaitingOperator => {
                let reasons = self.spec_changes(&status);
                if !reasons.is_empty() {
                    error!("aborting, {}", reasons.join(","));
                    return self.move_phase(
                        &status,
                        TaskPhase::Aborted,
                        "detected inappropriate spec changes after receiving approval",
                        None,
                    );
                }
                if self.operator_stopped().await {
                    info!("rook-operator is stopped");
                    self.requeue_now = true;
                    let remove_info = status.remove_info.clone();
                    return self.move_phase(&status, TaskPhase::Processing, "processing", remove_info);
                }
                info!("waiting for rook-operator to stop before task processing");
                status
            }
            TaskPhase::Processing => {
                let (finished, result) = self.process_task(&status).await;
                if !finished {
                    let mut next = status;
                    next.remove_info = Some(result);
                    return next;
                }
                if result.issues.is_empty() {
                    let phase = if result.warnings.is_empty() {
                        TaskPhase::Completed
                    } else {
                        TaskPhase::CompletedWithWarnings
                    };
                    return self.move_phase(&status, phase, "osd remove completed", Some(result));
                }
                error!("processing failed with next issues: {}", result.issues.join(","));
                self.move_phase(&status, TaskPhase::Failed, "osd remove failed", Some(result))
            }
            _ => status,
        }
    }

    /// Copy of `status` moved to `phase`, with a history entry
    pub fn move_phase(
        &self,
        status: &TaskStatus,
        phase: TaskPhase,
        reason: &str,
        remove_info: Option<RemoveInfo>,
    ) -> TaskStatus {
        let mut next = status.clone();
        next.phase = phase;
        next.phase_info = reason.to_string();
        next.messages.push(format!(
            "cephosdremovetask moved to '{}' phase: {}",
            phase, reason
        ));
        next.remove_info = remove_info;
        next.conditions.push(TaskCondition {
            timestamp: chrono::Utc::now(),
            phase,
            nodes: self.task.spec.nodes.clone(),
            cluster_version: Some(ClusterVersion {
                resource_version: self.cluster.resource_version.clone(),
                generation: self.cluster.generation,
            }),
        });
        next
    }

    /// Reasons the plan recorded with the last phase move is outdated
    fn spec_changes(&self, status: &TaskStatus) -> Vec<&'static str> {
        let mut reasons = Vec::new();
        let latest = match status.conditions.last() {
            Some(latest) => latest,
            None => return reasons,
        };
        let generation = latest.cluster_version.as_ref().map(|v| v.generation);
        if generation != Some(self.cluster.generation) {
            reasons.push("CephCluster has a new generation version");
        }
        if latest.nodes != self.task.spec.nodes {
            reasons.push("task has changed nodes section");
        }
        reasons
    }

    /// Lookup failures count as a running operator
    async fn operator_stopped(&self) -> bool {
        match self
            .backends
            .cluster
            .get_deployment(&self.settings.rook_namespace, &self.settings.operator_deployment)
            .await
        {
            Ok(Some(deployment)) => deployment.is_stopped(),
            Ok(None) => {
                error!(
                    "rook-operator deployment '{}/{}' is not found",
                    self.settings.rook_namespace, self.settings.operator_deployment
                );
                false
            }
            Err(e) => {
                error!("failed to check rook-operator deployment: {:#}", e);
                false
            }
        }
    }

    async fn collect_snapshot(&self) -> Result<ClusterSnapshot, String> {
        let ceph = self.backends.ceph.as_ref();
        let tree: OsdTree = run_json(ceph, "ceph osd tree -f json")
            .await
            .map_err(|e| format!("failed to get ceph cluster nodes list: {:#}", e))?;
        let metadata: Vec<OsdMetadata> = run_json(ceph, "ceph osd metadata -f json")
            .await
            .map_err(|e| format!("failed to get ceph osd metadata info: {:#}", e))?;
        let nodes = self
            .backends
            .cluster
            .list_nodes()
            .await
            .map_err(|e| format!("failed to get k8s nodes list: {:#}", e))?;
        let osds: Vec<OsdInfo> = run_json(ceph, "ceph osd info -f json")
            .await
            .map_err(|e| format!("failed to get osds info: {:#}", e))?;
        Ok(ClusterSnapshot {
            crush_hosts: tree.hosts(),
            metadata,
            osds,
            nodes,
        })
    }

    /// Build the removal plan for the task spec
    pub async fn validate_task(&self) -> RemoveInfo {
        let snapshot = match self.collect_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(issue) => {
                error!("{}", issue);
                return RemoveInfo::with_issue(issue);
            }
        };
        if self.task.spec.nodes.is_empty() {
            info!("starting validation for possible hosts/osds to remove, no provided hosts in spec");
        } else {
            info!("starting validation for provided hosts in spec");
        }
        let result = PlanBuilder::new(
            self.cluster,
            self.analysis,
            self.backends.disks.as_ref(),
            &self.settings.placement,
            self.settings.allow_manual_lvm,
        )
        .build(&self.task.spec.nodes, snapshot)
        .await;
        if !result.issues.is_empty() {
            error!("found issues during validation");
        } else if result.cleanup_map.is_empty() {
            info!("validated, nothing to remove");
        }
        result
    }

    async fn process_task(&mut self, status: &TaskStatus) -> (bool, RemoveInfo) {
        match &status.remove_info {
            Some(current) => {
                info!("processing osd remove task");
                self.process_removal(current).await
            }
            None => {
                error!("unexpectedly empty status, aborting");
                (true, RemoveInfo::with_issue("empty remove info, aborting"))
            }
        }
    }
}
