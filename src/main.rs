use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use s3_to_warehouse::bulk_load::CopySource;
use s3_to_warehouse::config::{Args, EnvSettings, MaintenanceSettings, RunConfig, Strategy};
use s3_to_warehouse::maintenance::{GearmanAdminQueue, MaintenanceQueue};
use s3_to_warehouse::observability::{self, job_finished, job_payload};
use s3_to_warehouse::refresh::swap::SwapLoader;
use s3_to_warehouse::refresh::{MaintenanceStatus, RefreshAction, RefreshCoordinator};
use s3_to_warehouse::schema_source::RemoteSchemaSource;
use s3_to_warehouse::shutdown::cancel_on_shutdown;
use s3_to_warehouse::warehouse::PgWarehouse;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init();

    let args = Args::parse();
    let payload = job_payload(&args.schema);

    let result = run(args).await;
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    job_finished(&payload, result.is_ok());
    result
}

fn maintenance_queue(
    settings: Option<&MaintenanceSettings>,
) -> Result<Option<Arc<dyn MaintenanceQueue>>> {
    let Some(settings) = settings else {
        return Ok(None);
    };
    let queue: Arc<dyn MaintenanceQueue> =
        Arc::new(GearmanAdminQueue::new(&settings.admin_url, &settings.worker)?);
    Ok(Some(queue))
}

async fn run(args: Args) -> Result<()> {
    let env = EnvSettings::from_env()?;
    let config = RunConfig::build(args, env)?;
    let cancel = cancel_on_shutdown();

    let warehouse = Arc::new(PgWarehouse::connect(&config.warehouse).await?);
    let maintenance = maintenance_queue(config.maintenance.as_ref())?;

    let outcome = match config.strategy {
        Strategy::Incremental => {
            let schemas = Arc::new(RemoteSchemaSource::new()?);
            let mut coordinator =
                RefreshCoordinator::new(warehouse.clone(), schemas, config.refresh.clone());
            if let Some(queue) = maintenance {
                coordinator = coordinator.with_maintenance(queue);
            }
            let coordinator = Arc::new(coordinator);

            let report = coordinator
                .refresh_all(config.input_files(), config.concurrency, &cancel)
                .await;
            for outcome in report.results.iter().filter_map(|(_, r)| r.as_ref().ok()) {
                match &outcome.action {
                    RefreshAction::Skipped { latest } => {
                        info!("{}: skipped, warehouse already has {}", outcome.table, latest)
                    }
                    RefreshAction::Created => info!("{}: created and loaded", outcome.table),
                    RefreshAction::Updated { added_columns } if added_columns.is_empty() => {
                        info!("{}: loaded", outcome.table)
                    }
                    RefreshAction::Updated { added_columns } => info!(
                        "{}: loaded, added columns {}",
                        outcome.table,
                        added_columns.join(", ")
                    ),
                }
                if let MaintenanceStatus::Failed(reason) = &outcome.maintenance {
                    warn!("{}: vacuum was not queued: {}", outcome.table, reason);
                }
            }
            report.into_result().map(|_| ())
        }
        Strategy::Swap => {
            let mut loader = SwapLoader::new(
                warehouse.clone(),
                &config.namespace,
                config.refresh.delimiter,
                config.refresh.use_credentials,
                config.refresh.gzip,
            );
            if let Some(queue) = maintenance {
                loader = loader.with_maintenance(queue);
            }
            let loader = Arc::new(loader);

            let items = config
                .input_files()
                .iter()
                .map(|file| (file.table.clone(), (file.table.clone(), CopySource::from(file))))
                .collect();
            loader
                .refresh_sources(items, config.concurrency, &cancel)
                .await
                .into_result()
                .map(|_| ())
        }
    };

    warehouse.close().await;
    outcome?;
    info!("done with full run");
    Ok(())
}
