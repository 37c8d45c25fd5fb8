//! Temp-table swap refresh for sources that only ever ship full snapshots.
//!
//! The snapshot is loaded into a temporary copy of the live table, then swapped
//! in with `DELETE` + `INSERT ... SELECT` inside the same transaction, so
//! readers see either the old rows or the new ones.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    execute_in_transaction, request_maintenance, run_batch, BatchReport, MaintenanceStatus,
    Statement,
};
use crate::bulk_load::{copy_sql, truncate_sql, CopySource, TableRef};
use crate::error::{LoaderError, RefreshStep, Result};
use crate::input_file::Bucket;
use crate::maintenance::MaintenanceQueue;
use crate::warehouse::{catalog, qualified_name, quote_ident, Warehouse};

/// Name for the temporary copy of `table`, unique per refresh.
pub fn temp_table_name(table: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("tmp_{}_{}", table, &suffix[..8])
}

/// Statements of one swap, in order.
pub fn swap_plan(
    namespace: &str,
    table: &str,
    temp_table: &str,
    source: &CopySource,
    delimiter: Option<char>,
    use_credentials: bool,
    gzip: bool,
) -> Vec<Statement> {
    let target = qualified_name(namespace, table);
    let temp = quote_ident(temp_table);
    vec![
        Statement::new(
            RefreshStep::Create,
            format!("CREATE TEMP TABLE {} (LIKE {})", temp, target),
        ),
        Statement::new(
            RefreshStep::Copy,
            copy_sql(
                &TableRef::unqualified(temp_table),
                source,
                delimiter,
                use_credentials,
                gzip,
            ),
        ),
        Statement::new(RefreshStep::Truncate, truncate_sql(namespace, table)),
        Statement::new(
            RefreshStep::Swap,
            format!("INSERT INTO {} SELECT * FROM {}", target, temp),
        ),
        Statement::new(RefreshStep::Swap, format!("DROP TABLE {}", temp)),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutcome {
    pub table: String,
    pub maintenance: MaintenanceStatus,
}

/// Replaces whole tables from full snapshots.
pub struct SwapLoader {
    warehouse: Arc<dyn Warehouse>,
    maintenance: Option<Arc<dyn MaintenanceQueue>>,
    namespace: String,
    delimiter: Option<char>,
    use_credentials: bool,
    gzip: bool,
}

impl SwapLoader {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        namespace: impl Into<String>,
        delimiter: Option<char>,
        use_credentials: bool,
        gzip: bool,
    ) -> Self {
        Self {
            warehouse,
            maintenance: None,
            namespace: namespace.into(),
            delimiter,
            use_credentials,
            gzip,
        }
    }

    pub fn with_maintenance(mut self, queue: Arc<dyn MaintenanceQueue>) -> Self {
        self.maintenance = Some(queue);
        self
    }

    /// Swaps `source` into `table`. The table must already exist.
    #[instrument(skip(self, source, cancel), fields(namespace = %self.namespace))]
    pub async fn refresh_table(
        &self,
        table: &str,
        source: &CopySource,
        cancel: &CancellationToken,
    ) -> Result<SwapOutcome> {
        let exists = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LoaderError::Cancelled(table.to_string())),
            exists = catalog::table_exists(self.warehouse.as_ref(), &self.namespace, table) => exists?,
        };
        if !exists {
            return Err(LoaderError::Config(format!(
                "{}.{} does not exist, the swap refresh only replaces existing tables",
                self.namespace, table
            )));
        }

        let temp = temp_table_name(table);
        let statements = swap_plan(
            &self.namespace,
            table,
            &temp,
            source,
            self.delimiter,
            self.use_credentials,
            self.gzip,
        );
        execute_in_transaction(self.warehouse.as_ref(), table, &statements, cancel).await?;
        info!("refreshed {}.{} from {}", self.namespace, table, source.location);

        let maintenance =
            request_maintenance(self.maintenance.as_deref(), &self.namespace, table).await;
        Ok(SwapOutcome {
            table: table.to_string(),
            maintenance,
        })
    }

    /// Refreshes each table from `s3://<bucket>/<prefix><table>.txt.gz`.
    pub async fn refresh_snapshots(
        self: &Arc<Self>,
        bucket: &Bucket,
        prefix: &str,
        tables: Vec<String>,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> BatchReport<SwapOutcome> {
        let items = tables
            .into_iter()
            .map(|table| {
                let source = CopySource::snapshot(bucket, prefix, &table);
                (table.clone(), (table, source))
            })
            .collect();
        self.refresh_sources(items, concurrency, cancel).await
    }

    /// Refreshes every `(table, source)` pair concurrently.
    pub async fn refresh_sources(
        self: &Arc<Self>,
        items: Vec<(String, (String, CopySource))>,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> BatchReport<SwapOutcome> {
        let loader = Arc::clone(self);
        run_batch(items, concurrency, cancel, move |(table, source): (String, CopySource), token| {
            let loader = Arc::clone(&loader);
            async move { loader.refresh_table(&table, &source, &token).await }
        })
        .await
    }
}
