//! Test fixtures for common test data
//!
//! A small cluster: one CephCluster `cephcluster` in `rook-ceph` with host
//! `node-1` carrying osd 20 on `/dev/vdc`. The node has no disk daemon label,
//! so removal plans are built from ceph metadata alone.

use std::collections::BTreeMap;

use osd_remove_controller::models::{
    CephClusterInfo, ClusterNode, DeploymentHealth, DeploymentState, NodeCleanupSpec,
    OsdSpecAnalysis, TaskSpec,
};
use osd_remove_controller::services::{RetryPolicy, TaskSettings};

use super::mocks::MockBackends;

pub const ROOK_NAMESPACE: &str = "rook-ceph";
pub const TASK_NAMESPACE: &str = "ceph-lcm-mirantis";
pub const OPERATOR: &str = "rook-ceph-operator";

pub fn settings() -> TaskSettings {
    TaskSettings {
        namespace: TASK_NAMESPACE.to_string(),
        rook_namespace: ROOK_NAMESPACE.to_string(),
        operator_deployment: OPERATOR.to_string(),
        placement: "pelagia-disk-daemon=true".parse().unwrap(),
        rebalance_timeout: std::time::Duration::from_secs(30 * 60),
        allow_manual_lvm: false,
        retry: RetryPolicy::once(),
        job_deadline_secs: 3600,
        requeue_interval: std::time::Duration::from_secs(60),
    }
}

pub fn ceph_cluster() -> CephClusterInfo {
    CephClusterInfo {
        name: "cephcluster".to_string(),
        namespace: ROOK_NAMESPACE.to_string(),
        generation: 3,
        resource_version: "1000".to_string(),
        fsid: Some("fsid-1".to_string()),
        image: Some("quay.io/ceph/ceph:v19.2.1".to_string()),
        ..Default::default()
    }
}

pub fn deployment_health() -> DeploymentHealth {
    DeploymentHealth {
        name: "cephcluster".to_string(),
        has_cluster_status: true,
        osd_analysis: Some(OsdSpecAnalysis {
            ceph_cluster_spec_generation: Some(3),
            ..Default::default()
        }),
    }
}

/// Spec wiping every osd of `node-1`
pub fn complete_cleanup_spec(approve: bool) -> TaskSpec {
    TaskSpec {
        nodes: BTreeMap::from([(
            "node-1".to_string(),
            NodeCleanupSpec {
                complete_cleanup: true,
                ..Default::default()
            },
        )]),
        approve,
        ..Default::default()
    }
}

fn running(replicas: i32) -> DeploymentState {
    DeploymentState {
        replicas,
        ready_replicas: replicas,
        available_replicas: replicas,
    }
}

/// Populate the mocks with the single-host cluster
pub fn single_host_cluster(mocks: &MockBackends) {
    let cluster = &mocks.cluster;
    cluster.set_ceph_cluster(ceph_cluster());
    cluster.set_health(vec![deployment_health()]);
    cluster.set_nodes(vec![ClusterNode::new("node-1")]);
    cluster.set_deployment(ROOK_NAMESPACE, OPERATOR, running(0));
    cluster.set_deployment(ROOK_NAMESPACE, "rook-ceph-osd-20", running(1));

    let ceph = &mocks.ceph;
    ceph.respond(
        "ceph osd tree -f json",
        r#"{"nodes": [{"id": -3, "name": "node-1", "type": "host", "children": [20]}]}"#,
    );
    ceph.respond(
        "ceph osd metadata -f json",
        r#"[{"id": 20, "hostname": "node-1", "bluestore_bdev_devices": "vdc", "bluestore_bdev_partition_path": "/dev/ceph-20/osd-block-uuid-20"}]"#,
    );
    ceph.respond(
        "ceph osd info -f json",
        r#"[{"osd": 20, "uuid": "uuid-20", "up": 1, "in": 1}]"#,
    );
    ceph.respond(
        "ceph osd info 20 --format json",
        r#"{"osd": 20, "uuid": "uuid-20", "up": 1, "in": 1}"#,
    );
    ceph.respond("ceph osd ok-to-stop 20", "");
    ceph.respond("ceph osd crush reweight osd.20 0.0", "");
    ceph.respond("ceph pg ls-by-osd 20 --format json", r#"{"pg_stats": []}"#);
    ceph.respond("ceph osd purge 20 --force --yes-i-really-mean-it", "purged osd.20");
    ceph.respond("ceph auth del osd.20", "");
    ceph.respond("ceph osd crush remove node-1", "removed item id -3 name 'node-1'");
}
