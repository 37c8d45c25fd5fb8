//! Loads the YAML table config that accompanies a snapshot.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{LoaderError, Result};
use crate::input_file::InputFile;
use crate::schema::{table_from_config, TableSchema};

#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Desired schema for the file's table, validated against its namespace.
    async fn load(&self, file: &InputFile) -> Result<TableSchema>;
}

/// Rewrites `s3://<bucket>/<key>` into the bucket's virtual-hosted HTTPS URL.
pub fn s3_https_url(location: &str, region: &str) -> Option<String> {
    let rest = location.strip_prefix("s3://")?;
    let (bucket, key) = rest.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some(format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key))
}

/// Reads configs from local paths, `file://` URLs, HTTP(S) URLs and
/// object-storage URLs.
#[derive(Debug, Clone)]
pub struct RemoteSchemaSource {
    client: reqwest::Client,
}

impl RemoteSchemaSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LoaderError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn fetch(&self, location: &str, region: &str) -> Result<String> {
        if let Some(url) = s3_https_url(location, region) {
            return self.fetch_http(&url).await;
        }
        if location.starts_with("http://") || location.starts_with("https://") {
            return self.fetch_http(location).await;
        }
        let path = location.strip_prefix("file://").unwrap_or(location);
        read_local(Path::new(path)).await
    }

    async fn fetch_http(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LoaderError::Config(format!("error opening conf file {}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoaderError::Config(format!(
                "error opening conf file {}: status {}",
                url, status
            )));
        }
        response
            .text()
            .await
            .map_err(|e| LoaderError::Config(format!("error reading conf file {}: {}", url, e)))
    }
}

async fn read_local(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        LoaderError::Config(format!("error opening conf file {}: {}", path.display(), e))
    })
}

#[async_trait]
impl SchemaSource for RemoteSchemaSource {
    async fn load(&self, file: &InputFile) -> Result<TableSchema> {
        info!("Parsing file: {}", file.config_location);
        let yaml = self.fetch(&file.config_location, &file.bucket.region).await?;
        table_from_config(&yaml, &file.namespace, &file.table).map_err(|e| match e {
            LoaderError::Yaml(err) => LoaderError::Config(format!(
                "could not parse file {}, err: {}",
                file.config_location, err
            )),
            other => other,
        })
    }
}
