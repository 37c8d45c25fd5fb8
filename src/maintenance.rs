//! Out-of-band vacuum/analyze requests.
//!
//! After a full truncate the table needs vacuuming, which cannot run inside
//! the load transaction. The request is handed to a job queue's admin
//! endpoint and processed by a separate worker.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::error::{LoaderError, Result};

#[async_trait]
pub trait MaintenanceQueue: Send + Sync {
    /// Queues a vacuum + analyze of one table.
    async fn enqueue_analyze(&self, namespace: &str, table: &str) -> Result<()>;
}

/// JSON body naming the table to analyze: `{"analyze": "<ns>.\"<table>\""}`.
pub fn analyze_payload(namespace: &str, table: &str) -> String {
    serde_json::json!({ "analyze": format!("{}.\"{}\"", namespace, table) }).to_string()
}

/// Submits jobs through the queue's HTTP admin interface.
#[derive(Debug, Clone)]
pub struct GearmanAdminQueue {
    client: reqwest::Client,
    admin_url: String,
    worker: String,
}

impl GearmanAdminQueue {
    pub fn new(admin_url: impl Into<String>, worker: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LoaderError::Maintenance(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            admin_url: admin_url.into().trim_end_matches('/').to_string(),
            worker: worker.into(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.admin_url, self.worker)
    }
}

#[async_trait]
impl MaintenanceQueue for GearmanAdminQueue {
    #[instrument(skip(self), err)]
    async fn enqueue_analyze(&self, namespace: &str, table: &str) -> Result<()> {
        let payload = analyze_payload(namespace, table);
        info!("Submitting job to {}: {}", self.endpoint(), payload);

        let response = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "text/plain")
            .body(payload)
            .send()
            .await
            .map_err(|e| LoaderError::Maintenance(format!("Error submitting job: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LoaderError::Maintenance(format!(
                "Error submitting job: status {} {}",
                status, body
            )));
        }
        Ok(())
    }
}
