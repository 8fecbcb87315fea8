//! Data models

mod ceph;
mod cluster;
mod disk_report;
mod plan;
mod task;

pub use ceph::*;
pub use cluster::*;
pub use disk_report::*;
pub use plan::*;
pub use task::*;
