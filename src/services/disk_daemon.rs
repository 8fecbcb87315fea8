//! Disk daemon client
//!
//! Each storage node runs a disk daemon which answers `GET /osdReport` with the
//! OSD partitions it found on local devices.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::DiskDaemonConfig;
use crate::models::{DiskDaemonReport, DiskDaemonState};
use crate::services::retry::RetryPolicy;

/// Source of per-node OSD disk reports
#[async_trait]
pub trait DiskInventory: Send + Sync {
    async fn osd_report(&self, host: &str) -> Result<DiskDaemonReport>;
}

/// HTTP client for the disk daemon
pub struct DiskDaemonClient {
    client: Client,
    scheme: String,
    port: u16,
    retry: RetryPolicy,
}

impl DiskDaemonClient {
    pub fn new(config: &DiskDaemonConfig, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            scheme: config.scheme.clone(),
            port: config.port,
            retry,
        })
    }

    fn report_url(&self, host: &str) -> String {
        format!("{}://{}:{}/osdReport", self.scheme, host, self.port)
    }

    async fn fetch(&self, url: &str) -> Result<DiskDaemonReport> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to query disk daemon at {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to fetch osd report: {} - {}", status, body.trim());
        }

        let body = response
            .text()
            .await
            .context("Failed to read disk daemon response")?;
        let report: Option<DiskDaemonReport> =
            serde_json::from_str(&body).context("Failed to parse disk daemon response")?;
        let report = report.unwrap_or_default();

        if report.state == DiskDaemonState::Preparing {
            anyhow::bail!("node report is not prepared yet");
        }
        Ok(report)
    }
}

#[async_trait]
impl DiskInventory for DiskDaemonClient {
    async fn osd_report(&self, host: &str) -> Result<DiskDaemonReport> {
        let url = self.report_url(host);
        debug!("[node '{}'] requesting osd report from {}", host, url);
        self.retry.run(|| self.fetch(&url)).await
    }
}
