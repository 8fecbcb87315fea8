//! Business logic services

pub mod ceph_cli;
pub mod cluster_api;
pub mod disk_daemon;
pub mod osd_remove;
pub mod reconciler;
pub mod retry;

pub use ceph_cli::{CephCli, ToolboxCli};
pub use cluster_api::{ClusterApi, KubeClusterApi};
pub use disk_daemon::{DiskDaemonClient, DiskInventory};
pub use osd_remove::{Backends, TaskRun, TaskSettings};
pub use reconciler::{start_reconciler, ReconcileOutcome, Reconciler, ReconcilerSchedulerState};
pub use retry::RetryPolicy;
