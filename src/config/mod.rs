//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::LabelSelector;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Where the controller and rook live
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub ceph_cli: CephCliConfig,
    #[serde(default)]
    pub disk_daemon: DiskDaemonConfig,
    /// Removal task processing knobs
    #[serde(default)]
    pub task: TaskConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8088
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_database_url() -> String {
    "sqlite://./data/osdremove.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default = "default_log_target")]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Log file name prefix (default: "osd-remove-controller")
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    /// Enable daily log rotation
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Log to console (stdout/stderr) - default for development
    #[default]
    Console,
    /// Log to file with optional rotation
    File,
    /// Log to both console and file
    Both,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_log_target() -> LogTarget {
    LogTarget::Console
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/osd-remove-controller")
}

fn default_log_prefix() -> String {
    "osd-remove-controller".to_string()
}

fn default_log_rotation() -> bool {
    true
}

/// Cluster placement configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Namespace of removal tasks, health objects and cleanup jobs
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_rook_namespace")]
    pub rook_namespace: String,
    #[serde(default = "default_operator_deployment")]
    pub operator_deployment: String,
    /// Label selector of nodes running the disk daemon
    #[serde(default = "default_placement_label")]
    pub disk_daemon_placement_label: String,
}

fn default_namespace() -> String {
    "ceph-lcm-mirantis".to_string()
}

fn default_rook_namespace() -> String {
    "rook-ceph".to_string()
}

fn default_operator_deployment() -> String {
    "rook-ceph-operator".to_string()
}

fn default_placement_label() -> String {
    "pelagia-disk-daemon=true".to_string()
}

/// Ceph toolbox CLI configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CephCliConfig {
    /// Argv prepended to every `ceph ...` command
    #[serde(default = "default_command_prefix")]
    pub command_prefix: Vec<String>,
    #[serde(default = "default_cli_timeout")]
    pub timeout_secs: u64,
}

fn default_command_prefix() -> Vec<String> {
    ["kubectl", "exec", "-n", "rook-ceph", "deploy/rook-ceph-tools", "--"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_cli_timeout() -> u64 {
    120
}

/// Disk daemon client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiskDaemonConfig {
    #[serde(default = "default_disk_daemon_scheme")]
    pub scheme: String,
    #[serde(default = "default_disk_daemon_port")]
    pub port: u16,
    #[serde(default = "default_disk_daemon_timeout")]
    pub timeout_secs: u64,
}

fn default_disk_daemon_scheme() -> String {
    "http".to_string()
}

fn default_disk_daemon_port() -> u16 {
    9999
}

fn default_disk_daemon_timeout() -> u64 {
    60
}

/// Removal task processing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    /// How long an OSD may stay out waiting for placement groups to move away
    #[serde(default = "default_rebalance_timeout_min")]
    pub osd_pg_rebalance_timeout_min: u64,
    /// Allow wiping LVM volumes that were not created by ceph-volume
    #[serde(default)]
    pub allow_remove_manually_created_lvm: bool,
    /// Extra log level for the removal subsystem
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default = "default_requeue_interval")]
    pub requeue_interval_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_job_deadline")]
    pub cleanup_job_deadline_secs: i64,
}

fn default_rebalance_timeout_min() -> u64 {
    30
}

fn default_requeue_interval() -> u64 {
    60
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_interval() -> u64 {
    30
}

fn default_job_deadline() -> i64 {
    3600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: default_log_target(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            rook_namespace: default_rook_namespace(),
            operator_deployment: default_operator_deployment(),
            disk_daemon_placement_label: default_placement_label(),
        }
    }
}

impl Default for CephCliConfig {
    fn default() -> Self {
        Self {
            command_prefix: default_command_prefix(),
            timeout_secs: default_cli_timeout(),
        }
    }
}

impl Default for DiskDaemonConfig {
    fn default() -> Self {
        Self {
            scheme: default_disk_daemon_scheme(),
            port: default_disk_daemon_port(),
            timeout_secs: default_disk_daemon_timeout(),
        }
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            osd_pg_rebalance_timeout_min: default_rebalance_timeout_min(),
            allow_remove_manually_created_lvm: false,
            log_level: None,
            requeue_interval_secs: default_requeue_interval(),
            retry_attempts: default_retry_attempts(),
            retry_interval_secs: default_retry_interval(),
            cleanup_job_deadline_secs: default_job_deadline(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            cluster: ClusterConfig::default(),
            ceph_cli: CephCliConfig::default(),
            disk_daemon: DiskDaemonConfig::default(),
            task: TaskConfig::default(),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables
    pub fn load() -> Result<Self> {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("OSDRM_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(ref path) if path.exists() => {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                Self::from_file(path)?
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file not found: {:?}, using defaults", path);
                AppConfig::default()
            }
            None => {
                eprintln!("[CONFIG] No config file found, using defaults");
                AppConfig::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_norway::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/osd-remove-controller/config.yaml"),
            dirs::config_dir()
                .map(|p| p.join("osd-remove-controller/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(host) = std::env::var("OSDRM_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("OSDRM_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        // Database overrides
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("OSDRM_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }

        // Cluster overrides
        if let Ok(namespace) = std::env::var("ROOK_NAMESPACE") {
            self.cluster.rook_namespace = namespace;
        }
        if let Ok(namespace) = std::env::var("OSDRM_NAMESPACE") {
            self.cluster.namespace = namespace;
        }
        if let Ok(label) = std::env::var("DISK_DAEMON_PLACEMENT_LABEL") {
            self.cluster.disk_daemon_placement_label = label;
        }
        if let Ok(port) = std::env::var("DISK_DAEMON_PORT") {
            if let Ok(p) = port.parse() {
                self.disk_daemon.port = p;
            }
        }

        // Task overrides
        if let Ok(timeout) = std::env::var("TASK_OSD_PG_REBALANCE_TIMEOUT_MIN") {
            if let Ok(t) = timeout.parse() {
                self.task.osd_pg_rebalance_timeout_min = t;
            }
        }
        if let Ok(allow) = std::env::var("TASK_ALLOW_REMOVE_MANUALLY_CREATED_LVMS") {
            self.task.allow_remove_manually_created_lvm = parse_bool(&allow);
        }
        if let Ok(level) = std::env::var("TASK_LOG_LEVEL") {
            self.task.log_level = Some(level);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        self.cluster
            .disk_daemon_placement_label
            .parse::<LabelSelector>()
            .with_context(|| {
                format!(
                    "Invalid disk daemon placement label: '{}'",
                    self.cluster.disk_daemon_placement_label
                )
            })?;

        if self.task.retry_attempts == 0 {
            anyhow::bail!("Task retry attempts must be at least 1");
        }

        if self.task.requeue_interval_secs == 0 {
            anyhow::bail!("Task requeue interval cannot be 0");
        }

        Ok(())
    }

    /// Create a default configuration file
    pub fn create_default_config(path: &PathBuf) -> Result<()> {
        let config = AppConfig::default();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let yaml = serde_norway::to_string(&config)?;
        std::fs::write(path, yaml)?;

        Ok(())
    }
}
