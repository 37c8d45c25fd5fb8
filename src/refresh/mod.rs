//! Per-table refresh
//!
//! A refresh moves through
//! `Start -> CheckStaleness -> (Skipped | Proceed) -> (Create | Update) -> Load -> Commit`.
//! Everything that can be decided without touching the warehouse (staleness,
//! key validation, schema drift) is decided while building a [`RefreshPlan`],
//! so a bad config never opens a transaction. The plan's statements then run
//! in one transaction; the first failure rolls back all of them.

pub mod batch;
pub mod swap;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::bulk_load::{copy_sql, truncate_in_range_sql, truncate_sql, CopySource, TableRef};
use crate::ddl::{alter_table_sql, create_table_sql};
use crate::error::{LoaderError, RefreshStep, Result};
use crate::input_file::InputFile;
use crate::maintenance::MaintenanceQueue;
use crate::schema::compare::{compare, ComparisonMode};
use crate::schema::{LiveTable, TableSchema};
use crate::schema_source::SchemaSource;
use crate::staleness::{is_stale, load_window, Granularity, LoadWindow};
use crate::warehouse::{catalog, Warehouse};

pub use batch::{run_batch, BatchReport};

/// Run-wide refresh policy, shared read-only by every table.
#[derive(Debug, Clone)]
pub struct RefreshOptions {
    /// Delete every row before loading (dimension tables)
    pub truncate: bool,
    /// Load even when the warehouse already has this period
    pub force: bool,
    pub granularity: Granularity,
    pub timezone: Tz,
    /// Explicit window, required for `stream`
    pub stream_window: Option<LoadWindow>,
    /// `None` loads JSON, otherwise a delimited payload
    pub delimiter: Option<char>,
    /// Whether manifest entries are gzipped; data files go by their suffix
    pub gzip: bool,
    pub use_credentials: bool,
    /// Namespaces whose columns are matched by name instead of position
    pub unordered_namespaces: Vec<String>,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            truncate: false,
            force: false,
            granularity: Granularity::Day,
            timezone: Tz::UTC,
            stream_window: None,
            delimiter: None,
            gzip: true,
            use_credentials: true,
            unordered_namespaces: vec!["mongo".to_string()],
        }
    }
}

/// One statement of a plan and the step it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub step: RefreshStep,
    pub sql: String,
}

impl Statement {
    pub fn new(step: RefreshStep, sql: impl Into<String>) -> Self {
        Self {
            step,
            sql: sql.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanKind {
    Create,
    Update { added_columns: Vec<String> },
}

/// Ordered statements for one table, run in a single transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPlan {
    pub table: String,
    pub kind: PlanKind,
    pub statements: Vec<Statement>,
    /// Whether the plan wipes the table, which calls for a vacuum afterwards
    pub full_truncate: bool,
}

/// Staleness verdict for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Skip { latest: DateTime<Utc> },
    Proceed { forced: bool },
}

/// Applies the staleness gate and the `force` override.
pub fn check_staleness(
    file: &InputFile,
    live: Option<&LiveTable>,
    options: &RefreshOptions,
) -> Decision {
    let latest = live.and_then(|t| t.max_data_date);
    if !is_stale(file.data_date, latest, options.granularity, options.timezone) {
        return Decision::Proceed { forced: false };
    }
    match (options.force, latest) {
        (false, Some(latest)) => Decision::Skip { latest },
        _ => Decision::Proceed { forced: true },
    }
}

/// Builds the statements that bring `live` in line with `input` and load
/// `file` into it.
pub fn plan_refresh(
    input: &TableSchema,
    live: Option<&LiveTable>,
    file: &InputFile,
    options: &RefreshOptions,
) -> Result<RefreshPlan> {
    input.validate()?;
    let namespace = input.namespace();
    let target = TableRef::new(namespace, &input.name);
    let copy = Statement::new(
        RefreshStep::Copy,
        copy_sql(
            &target,
            &CopySource::from(file),
            options.delimiter,
            options.use_credentials,
            file.is_compressed(options.gzip),
        ),
    );

    let Some(live) = live else {
        return Ok(RefreshPlan {
            table: input.name.clone(),
            kind: PlanKind::Create,
            statements: vec![
                Statement::new(RefreshStep::Create, create_table_sql(input)?),
                copy,
            ],
            full_truncate: false,
        });
    };

    let mode = ComparisonMode::for_namespace(namespace, &options.unordered_namespaces);
    let additions = compare(input, &live.schema, mode).into_result(&input.name)?;
    let alters = alter_table_sql(input, &additions)?;
    let window = load_window(
        file.data_date,
        options.granularity,
        options.timezone,
        options.stream_window,
    )?;

    let mut statements = Vec::with_capacity(alters.len() + 3);
    if options.truncate {
        statements.push(Statement::new(
            RefreshStep::Truncate,
            truncate_sql(namespace, &input.name),
        ));
    }
    statements.push(Statement::new(
        RefreshStep::TruncateRange,
        truncate_in_range_sql(namespace, &input.name, input.data_date_column(), &window),
    ));
    statements.extend(alters.into_iter().map(|sql| Statement::new(RefreshStep::Alter, sql)));
    statements.push(copy);

    Ok(RefreshPlan {
        table: input.name.clone(),
        kind: PlanKind::Update {
            added_columns: additions.into_iter().map(|a| a.column.name).collect(),
        },
        statements,
        full_truncate: options.truncate,
    })
}

/// Runs `statements` in one transaction. Any failure rolls the whole
/// transaction back and names the step that failed.
///
/// Cancelling `cancel` while a statement runs aborts it on the server and
/// rolls back; the commit itself is never interrupted.
pub async fn execute_in_transaction(
    warehouse: &dyn Warehouse,
    table: &str,
    statements: &[Statement],
    cancel: &CancellationToken,
) -> Result<()> {
    let statement_error = |step: RefreshStep, err: LoaderError| LoaderError::Statement {
        table: table.to_string(),
        step,
        message: err.to_string(),
    };

    if cancel.is_cancelled() {
        return Err(LoaderError::Cancelled(table.to_string()));
    }
    let mut tx = warehouse
        .begin()
        .await
        .map_err(|e| statement_error(RefreshStep::Begin, e))?;

    for statement in statements {
        let executed = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tx.execute(&statement.sql) => Some(result),
        };

        match executed {
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                warn!("{} on {} failed, rolling back", statement.step, table);
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("rollback of {} failed: {}", table, rollback_err);
                }
                return Err(statement_error(statement.step, err));
            }
            None => {
                warn!("{} on {} cancelled, rolling back", statement.step, table);
                if let Err(cancel_err) = tx.cancel().await {
                    warn!("could not cancel {} of {}: {}", statement.step, table, cancel_err);
                }
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("rollback of {} failed: {}", table, rollback_err);
                }
                return Err(LoaderError::Cancelled(table.to_string()));
            }
        }
    }

    tx.commit()
        .await
        .map_err(|e| statement_error(RefreshStep::Commit, e))
}

/// What a refresh did to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshAction {
    Skipped { latest: DateTime<Utc> },
    Created,
    Updated { added_columns: Vec<String> },
}

/// Fate of the post-load vacuum request. Failures here never undo the load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaintenanceStatus {
    NotNeeded,
    Enqueued,
    Unconfigured,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub table: String,
    pub action: RefreshAction,
    pub maintenance: MaintenanceStatus,
}

/// Enqueues a vacuum when configured, turning any failure into a status.
pub(crate) async fn request_maintenance(
    queue: Option<&dyn MaintenanceQueue>,
    namespace: &str,
    table: &str,
) -> MaintenanceStatus {
    let Some(queue) = queue else {
        warn!("no maintenance queue configured, {}.{} needs a vacuum", namespace, table);
        return MaintenanceStatus::Unconfigured;
    };
    match queue.enqueue_analyze(namespace, table).await {
        Ok(()) => MaintenanceStatus::Enqueued,
        Err(e) => {
            warn!("failed to enqueue vacuum for {}.{}: {}", namespace, table, e);
            MaintenanceStatus::Failed(e.to_string())
        }
    }
}

/// Drives the incremental refresh of single tables and of batches.
pub struct RefreshCoordinator {
    warehouse: Arc<dyn Warehouse>,
    schemas: Arc<dyn SchemaSource>,
    maintenance: Option<Arc<dyn MaintenanceQueue>>,
    options: RefreshOptions,
}

impl RefreshCoordinator {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        schemas: Arc<dyn SchemaSource>,
        options: RefreshOptions,
    ) -> Self {
        Self {
            warehouse,
            schemas,
            maintenance: None,
            options,
        }
    }

    pub fn with_maintenance(mut self, queue: Arc<dyn MaintenanceQueue>) -> Self {
        self.maintenance = Some(queue);
        self
    }

    /// Refreshes one table. Cancelling before the transaction opens stops at
    /// once; cancelling during it aborts the running statement and rolls back.
    #[instrument(skip_all, fields(namespace = %file.namespace, table = %file.table))]
    pub async fn refresh_table(
        &self,
        file: &InputFile,
        cancel: &CancellationToken,
    ) -> Result<RefreshOutcome> {
        info!("attempting to run on schema: {} table: {}", file.namespace, file.table);
        let (input, live) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LoaderError::Cancelled(file.table.clone())),
            loaded = self.load(file) => loaded?,
        };

        match check_staleness(file, live.as_ref(), &self.options) {
            Decision::Skip { latest } => {
                info!("Recent data already exists in db: {}", latest);
                return Ok(RefreshOutcome {
                    table: input.name,
                    action: RefreshAction::Skipped { latest },
                    maintenance: MaintenanceStatus::NotNeeded,
                });
            }
            Decision::Proceed { forced: true } => {
                info!("Forcing update of table: {}", input.name);
            }
            Decision::Proceed { forced: false } => {}
        }

        let plan = plan_refresh(&input, live.as_ref(), file, &self.options)?;
        execute_in_transaction(self.warehouse.as_ref(), &plan.table, &plan.statements, cancel)
            .await?;
        info!("done with table: {}.{}", input.namespace(), plan.table);

        let maintenance = if plan.full_truncate {
            request_maintenance(self.maintenance.as_deref(), input.namespace(), &plan.table).await
        } else {
            MaintenanceStatus::NotNeeded
        };

        let action = match plan.kind {
            PlanKind::Create => RefreshAction::Created,
            PlanKind::Update { added_columns } => RefreshAction::Updated { added_columns },
        };
        Ok(RefreshOutcome {
            table: plan.table,
            action,
            maintenance,
        })
    }

    /// Input schema from config plus the live table, if any.
    async fn load(&self, file: &InputFile) -> Result<(TableSchema, Option<LiveTable>)> {
        let input = self.schemas.load(file).await?;
        let live = catalog::table_metadata(
            self.warehouse.as_ref(),
            input.namespace(),
            &input.name,
            input.data_date_column(),
        )
        .await?;
        Ok((input, live))
    }

    /// Refreshes every file concurrently, at most `concurrency` at a time.
    /// One table failing never stops the others.
    pub async fn refresh_all(
        self: &Arc<Self>,
        files: Vec<InputFile>,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> BatchReport<RefreshOutcome> {
        let items = files
            .into_iter()
            .map(|file| (file.table.clone(), file))
            .collect();
        let coordinator = Arc::clone(self);
        run_batch(items, concurrency, cancel, move |file: InputFile, token| {
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.refresh_table(&file, &token).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input_file::{Bucket, Credentials};
    use crate::schema::Column;
    use chrono::TimeZone;

    fn file(date: DateTime<Utc>) -> InputFile {
        InputFile::new(
            Bucket {
                name: "b".into(),
                region: "us-east-1".into(),
                credentials: Credentials::Role("arn".into()),
            },
            "analytics",
            "events",
            "json.gz",
            None,
            date,
        )
    }

    fn input() -> TableSchema {
        TableSchema::new(
            "analytics",
            "events",
            vec![
                Column {
                    name: "id".into(),
                    col_type: "text".into(),
                    dist_key: true,
                    ..Default::default()
                },
                Column {
                    name: "ts".into(),
                    col_type: "timestamp".into(),
                    sort_ordinal: 1,
                    ..Default::default()
                },
            ],
        )
        .with_data_date_column("ts")
    }

    fn live(max: Option<DateTime<Utc>>) -> LiveTable {
        let columns = vec![
            Column {
                ordinal: 1,
                name: "id".into(),
                col_type: "character varying(256)".into(),
                dist_key: true,
                ..Default::default()
            },
            Column {
                ordinal: 2,
                name: "ts".into(),
                col_type: "timestamp without time zone".into(),
                sort_ordinal: 1,
                ..Default::default()
            },
        ];
        LiveTable {
            schema: TableSchema::new("analytics", "events", columns).with_data_date_column("ts"),
            max_data_date: max,
        }
    }

    fn date(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2017, 8, d, h, 0, 0).unwrap()
    }

    fn steps(plan: &RefreshPlan) -> Vec<RefreshStep> {
        plan.statements.iter().map(|s| s.step).collect()
    }

    #[test]
    fn test_new_table_plan_creates_then_copies() {
        let plan = plan_refresh(&input(), None, &file(date(15, 0)), &RefreshOptions::default()).unwrap();
        assert_eq!(plan.kind, PlanKind::Create);
        assert_eq!(steps(&plan), vec![RefreshStep::Create, RefreshStep::Copy]);
        assert!(plan.statements[0].sql.starts_with("CREATE TABLE \"analytics\".\"events\""));
        assert!(!plan.full_truncate);
    }

    #[test]
    fn test_copy_follows_file_suffix_for_compression() {
        let mut plain = file(date(15, 0));
        plain.suffix = "json".into();
        let plan = plan_refresh(&input(), None, &plain, &RefreshOptions::default()).unwrap();
        assert!(!plan.statements[1].sql.contains("GZIP"));

        let plan = plan_refresh(&input(), None, &file(date(15, 0)), &RefreshOptions {
            gzip: false,
            ..Default::default()
        })
        .unwrap();
        assert!(plan.statements[1].sql.contains(" WITH GZIP "));
    }

    #[test]
    fn test_new_table_ignores_truncate_flag() {
        let options = RefreshOptions {
            truncate: true,
            ..Default::default()
        };
        let plan = plan_refresh(&input(), None, &file(date(15, 0)), &options).unwrap();
        assert_eq!(steps(&plan), vec![RefreshStep::Create, RefreshStep::Copy]);
    }

    #[test]
    fn test_existing_table_plan_order() {
        let mut wider = input();
        wider.columns.push(Column::new("extra", "int"));
        let options = RefreshOptions {
            truncate: true,
            ..Default::default()
        };
        let plan = plan_refresh(&wider, Some(&live(None)), &file(date(15, 14)), &options).unwrap();

        assert_eq!(
            steps(&plan),
            vec![
                RefreshStep::Truncate,
                RefreshStep::TruncateRange,
                RefreshStep::Alter,
                RefreshStep::Copy
            ]
        );
        assert_eq!(plan.statements[0].sql, "DELETE FROM \"analytics\".\"events\"");
        assert_eq!(
            plan.statements[1].sql,
            "DELETE FROM \"analytics\".\"events\" WHERE \"ts\" >= '2017-08-15 00:00:00' AND \"ts\" < '2017-08-16 00:00:00'"
        );
        assert_eq!(
            plan.statements[2].sql,
            "ALTER TABLE \"analytics\".\"events\" ADD COLUMN extra integer"
        );
        assert_eq!(
            plan.kind,
            PlanKind::Update {
                added_columns: vec!["extra".to_string()]
            }
        );
        assert!(plan.full_truncate);
    }

    #[test]
    fn test_drift_fails_planning() {
        let mut changed = input();
        changed.columns[0].not_null = true;
        let err = plan_refresh(&changed, Some(&live(None)), &file(date(15, 0)), &RefreshOptions::default())
            .unwrap_err();
        assert!(matches!(err, LoaderError::SchemaDrift { .. }));
    }

    #[test]
    fn test_stream_plan_requires_window() {
        let options = RefreshOptions {
            granularity: Granularity::Stream,
            ..Default::default()
        };
        assert!(plan_refresh(&input(), Some(&live(None)), &file(date(15, 0)), &options).is_err());

        let options = RefreshOptions {
            granularity: Granularity::Stream,
            stream_window: Some(
                LoadWindow::parse_stream("2017-08-15T10:00:00", "2017-08-15T10:15:00").unwrap(),
            ),
            ..Default::default()
        };
        let plan = plan_refresh(&input(), Some(&live(None)), &file(date(15, 0)), &options).unwrap();
        assert!(plan.statements[0].sql.contains("'2017-08-15 10:00:00'"));
        assert!(plan.statements[0].sql.contains("'2017-08-15 10:15:00'"));
    }

    #[test]
    fn test_staleness_decisions() {
        let options = RefreshOptions::default();
        let stale_live = live(Some(date(16, 1)));
        assert_eq!(
            check_staleness(&file(date(15, 0)), Some(&stale_live), &options),
            Decision::Skip { latest: date(16, 1) }
        );
        assert_eq!(
            check_staleness(&file(date(16, 0)), Some(&stale_live), &options),
            Decision::Proceed { forced: false }
        );
        assert_eq!(
            check_staleness(&file(date(15, 0)), None, &options),
            Decision::Proceed { forced: false }
        );

        let forced = RefreshOptions {
            force: true,
            ..Default::default()
        };
        assert_eq!(
            check_staleness(&file(date(15, 0)), Some(&stale_live), &forced),
            Decision::Proceed { forced: true }
        );
    }
}
