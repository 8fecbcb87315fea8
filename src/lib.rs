//! OSD removal controller library
//!
//! This crate drives removal of Ceph OSDs from a rook-managed cluster: it
//! validates removal requests, waits for approval and removes OSDs one by one,
//! wiping their devices with cleanup jobs.

use std::sync::Arc;

use tokio::sync::Notify;

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use db::DbPool;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Database connection pool
    pub db: DbPool,
    /// Wakes the reconciler after a task change
    pub reconcile_wake: Arc<Notify>,
}
