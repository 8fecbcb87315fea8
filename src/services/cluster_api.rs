//! Kubernetes API access
//!
//! [`ClusterApi`] is the narrow surface the removal workflow needs: nodes, rook
//! deployments, cleanup jobs and the two custom resources describing the Ceph
//! cluster. [`KubeClusterApi`] implements it on top of `kube`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, EnvVar, HostPathVolumeSource, Node, PodSecurityContext, PodSpec,
    PodTemplateSpec, SecurityContext, Volume, VolumeMount as PodVolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch,
    PatchParams, PostParams, PropagationPolicy,
};
use kube::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::models::{
    CephClusterInfo, CleanupJob, ClusterNode, DeploymentHealth, DeploymentState, JobState,
    OsdSpecAnalysis, StorageNodeSpec,
};

/// Cluster API operations used by the removal workflow
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>>;

    /// `None` when the deployment does not exist
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<DeploymentState>>;

    /// Returns `false` when the deployment does not exist
    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<bool>;

    /// Returns `false` when the deployment does not exist
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool>;

    /// `None` when the job does not exist
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<JobState>>;

    async fn create_job(&self, job: &CleanupJob) -> Result<()>;

    /// Delete a job and its pods right away
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_ceph_cluster(&self, namespace: &str, name: &str) -> Result<Option<CephClusterInfo>>;

    async fn list_deployment_health(&self, namespace: &str) -> Result<Vec<DeploymentHealth>>;
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

/// `ClusterApi` backed by a live Kubernetes client
pub struct KubeClusterApi {
    client: Client,
    ceph_cluster: ApiResource,
    deployment_health: ApiResource,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            ceph_cluster: ApiResource::from_gvk(&GroupVersionKind::gvk(
                "ceph.rook.io",
                "v1",
                "CephCluster",
            )),
            deployment_health: ApiResource::from_gvk(&GroupVersionKind::gvk(
                "lcm.mirantis.com",
                "v1alpha1",
                "CephDeploymentHealth",
            )),
        }
    }

    /// Client from in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .context("Failed to list nodes")?;
        Ok(nodes.items.into_iter().map(node_from_k8s).collect())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<DeploymentState>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get deployment '{}/{}'", namespace, name))?;
        Ok(deployment.map(|d| {
            let status = d.status.unwrap_or_default();
            DeploymentState {
                replicas: status.replicas.unwrap_or_default(),
                ready_replicas: status.ready_replicas.unwrap_or_default(),
                available_replicas: status.available_replicas.unwrap_or_default(),
            }
        }))
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<bool> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({"spec": {"replicas": replicas}});
        match api
            .patch_scale(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to scale deployment '{}/{}'", namespace, name)),
        }
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<bool> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e)
                .with_context(|| format!("failed to delete osd deployment '{}'", name)),
        }
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<JobState>> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let job = api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get job '{}/{}'", namespace, name))?;
        Ok(job.map(|job| {
            let status = job.status.unwrap_or_default();
            let failed_condition = status
                .conditions
                .unwrap_or_default()
                .iter()
                .any(|c| c.type_ == "Failed" && c.status == "True");
            JobState {
                active: status.active.unwrap_or_default(),
                succeeded: status.succeeded.unwrap_or_default(),
                failed: status.failed.unwrap_or_default(),
                failed_condition,
            }
        }))
    }

    async fn create_job(&self, job: &CleanupJob) -> Result<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), &job.namespace);
        api.create(&PostParams::default(), &job_to_k8s(job))
            .await
            .with_context(|| format!("Failed to create job '{}/{}'", job.namespace, job.name))?;
        debug!("created job '{}/{}'", job.namespace, job.name);
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            grace_period_seconds: Some(0),
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..Default::default()
        };
        api.delete(name, &params)
            .await
            .with_context(|| format!("Failed to delete job '{}/{}'", namespace, name))?;
        Ok(())
    }

    async fn get_ceph_cluster(&self, namespace: &str, name: &str) -> Result<Option<CephClusterInfo>> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.ceph_cluster);
        let cluster = api
            .get_opt(name)
            .await
            .with_context(|| format!("Failed to get CephCluster '{}/{}'", namespace, name))?;
        cluster.map(ceph_cluster_from_dynamic).transpose()
    }

    async fn list_deployment_health(&self, namespace: &str) -> Result<Vec<DeploymentHealth>> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.deployment_health);
        let list = api
            .list(&ListParams::default())
            .await
            .with_context(|| format!("Failed to list CephDeploymentHealth in '{}'", namespace))?;
        list.items
            .into_iter()
            .map(deployment_health_from_dynamic)
            .collect()
    }
}

fn node_from_k8s(node: Node) -> ClusterNode {
    let taints = node
        .spec
        .and_then(|spec| spec.taints)
        .unwrap_or_default()
        .into_iter()
        .map(|taint| taint.key)
        .collect();
    ClusterNode {
        name: node.metadata.name.unwrap_or_default(),
        labels: node.metadata.labels.unwrap_or_default(),
        taints,
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn ceph_cluster_from_dynamic(obj: DynamicObject) -> Result<CephClusterInfo> {
    let name = obj.metadata.name.clone().unwrap_or_default();
    let storage_nodes: Vec<StorageNodeSpec> = match obj.data.pointer("/spec/storage/nodes") {
        Some(nodes) => serde_json::from_value(nodes.clone())
            .with_context(|| format!("Failed to parse CephCluster '{}' storage nodes", name))?,
        None => Vec::new(),
    };
    Ok(CephClusterInfo {
        namespace: obj.metadata.namespace.clone().unwrap_or_default(),
        generation: obj.metadata.generation.unwrap_or_default(),
        resource_version: obj.metadata.resource_version.clone().unwrap_or_default(),
        external: obj
            .data
            .pointer("/spec/external/enable")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        fsid: str_at(&obj.data, "/status/ceph/fsid").map(str::to_string),
        image: str_at(&obj.data, "/status/version/image").map(str::to_string),
        data_dir_host_path: str_at(&obj.data, "/spec/dataDirHostPath")
            .unwrap_or_default()
            .to_string(),
        storage_nodes,
        name,
    })
}

fn deployment_health_from_dynamic(obj: DynamicObject) -> Result<DeploymentHealth> {
    let name = obj.metadata.name.clone().unwrap_or_default();
    let osd_analysis: Option<OsdSpecAnalysis> =
        match obj.data.pointer("/status/healthReport/osdAnalysis") {
            Some(Value::Null) | None => None,
            Some(value) => Some(serde_json::from_value(value.clone()).with_context(|| {
                format!("Failed to parse CephDeploymentHealth '{}' osd analysis", name)
            })?),
        };
    let has_cluster_status = obj
        .data
        .pointer("/status/healthReport/rookCephObjects/cephCluster")
        .map(|v| !v.is_null())
        .unwrap_or(false);
    Ok(DeploymentHealth {
        name,
        has_cluster_status,
        osd_analysis,
    })
}

fn job_to_k8s(job: &CleanupJob) -> Job {
    let volumes = job
        .volumes
        .iter()
        .map(|v| Volume {
            name: v.name.clone(),
            host_path: Some(HostPathVolumeSource {
                path: v.path.clone(),
                type_: v.directory.then(|| "Directory".to_string()),
            }),
            ..Default::default()
        })
        .collect();
    let mounts: Vec<PodVolumeMount> = job
        .mounts
        .iter()
        .map(|m| PodVolumeMount {
            name: m.name.clone(),
            mount_path: m.mount_path.clone(),
            read_only: m.read_only.then_some(true),
            ..Default::default()
        })
        .collect();
    let containers = job
        .containers
        .iter()
        .map(|c| Container {
            name: c.name.clone(),
            image: Some(job.image.clone()),
            command: Some(vec!["/bin/bash".into(), "-c".into(), c.script.clone()]),
            env: Some(vec![
                EnvVar {
                    name: "DEVICE_NAME".into(),
                    value: Some(c.device.clone()),
                    ..Default::default()
                },
                EnvVar {
                    name: "DM_DISABLE_UDEV".into(),
                    value: Some("1".into()),
                    ..Default::default()
                },
            ]),
            security_context: Some(SecurityContext {
                privileged: Some(true),
                capabilities: Some(Capabilities {
                    drop: Some(vec!["NET_RAW".into()]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            volume_mounts: Some(mounts.clone()),
            ..Default::default()
        })
        .collect();

    Job {
        metadata: ObjectMeta {
            name: Some(job.name.clone()),
            namespace: Some(job.namespace.clone()),
            labels: Some(job.labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds: Some(job.active_deadline_secs),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: job.labels.get("app").map(|app| {
                        BTreeMap::from([("app".to_string(), app.clone())])
                    }),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    security_context: Some(PodSecurityContext {
                        run_as_user: Some(0),
                        ..Default::default()
                    }),
                    node_selector: Some(BTreeMap::from([(
                        "kubernetes.io/hostname".to_string(),
                        job.host.clone(),
                    )])),
                    restart_policy: Some("Never".into()),
                    volumes: Some(volumes),
                    containers,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
