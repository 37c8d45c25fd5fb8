//! Replaces whole tables from full snapshot dumps.
//!
//! Run with: cargo run --bin refresh_snapshots -- --bucket dumps --tables schools,districts

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use s3_to_warehouse::config::{EnvSettings, SnapshotArgs, SnapshotConfig};
use s3_to_warehouse::maintenance::GearmanAdminQueue;
use s3_to_warehouse::observability::{self, job_finished, job_payload};
use s3_to_warehouse::refresh::swap::SwapLoader;
use s3_to_warehouse::shutdown::cancel_on_shutdown;
use s3_to_warehouse::warehouse::PgWarehouse;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init();

    let args = SnapshotArgs::parse();
    let payload = job_payload(&args.schema);

    let result = run(args).await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    job_finished(&payload, result.is_ok());
    result
}

async fn run(args: SnapshotArgs) -> Result<()> {
    let config = SnapshotConfig::build(args, EnvSettings::from_env()?)?;
    let cancel = cancel_on_shutdown();

    let warehouse = Arc::new(PgWarehouse::connect(&config.warehouse).await?);
    let mut loader = SwapLoader::new(
        warehouse.clone(),
        &config.namespace,
        Some(config.delimiter),
        config.use_credentials,
        true,
    );
    if let Some(settings) = &config.maintenance {
        loader = loader.with_maintenance(Arc::new(GearmanAdminQueue::new(
            &settings.admin_url,
            &settings.worker,
        )?));
    }
    let loader = Arc::new(loader);

    info!(
        "refreshing {} tables in {} from s3://{}/{}",
        config.tables.len(),
        config.namespace,
        config.bucket.name,
        config.prefix
    );
    let report = loader
        .refresh_snapshots(
            &config.bucket,
            &config.prefix,
            config.tables.clone(),
            config.concurrency,
            &cancel,
        )
        .await;

    warehouse.close().await;
    let refreshed = report.into_result()?;
    info!("refreshed {} tables", refreshed.len());
    Ok(())
}
