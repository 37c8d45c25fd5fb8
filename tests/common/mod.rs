//! Shared fixtures: an in-memory warehouse that records every statement, a
//! recording maintenance queue, and table configs written to disk.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use s3_to_warehouse::error::{LoaderError, Result};
use s3_to_warehouse::input_file::{Bucket, Credentials, InputFile};
use s3_to_warehouse::maintenance::MaintenanceQueue;
use s3_to_warehouse::schema::{table_config_to_yaml, Column, TableConfig, TableSchema};
use s3_to_warehouse::warehouse::{Row, SqlValue, Warehouse, WarehouseTx};

#[derive(Debug, Clone)]
pub struct FakeTable {
    pub columns: Vec<Column>,
    pub max_data_date: Option<NaiveDateTime>,
}

#[derive(Debug, Default)]
pub struct State {
    pub tables: HashMap<(String, String), FakeTable>,
    /// Statements of committed transactions, in commit order
    pub committed: Vec<String>,
    /// Statements of each transaction that was rolled back or dropped
    pub rolled_back: Vec<Vec<String>>,
    pub queries: Vec<String>,
    pub begins: usize,
    /// Server-side cancel requests sent for open transactions
    pub cancels: usize,
    /// Statements containing any of these fail
    pub fail_on: Vec<String>,
    /// Statements containing this never complete
    pub hang_on: Option<String>,
}

/// In-memory warehouse. Catalog queries are answered from `tables`;
/// statements are only recorded.
#[derive(Clone, Default)]
pub struct FakeWarehouse {
    pub state: Arc<Mutex<State>>,
}

impl FakeWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(
        self,
        namespace: &str,
        table: &str,
        columns: Vec<Column>,
        max_data_date: Option<NaiveDateTime>,
    ) -> Self {
        self.state.lock().unwrap().tables.insert(
            (namespace.to_string(), table.to_string()),
            FakeTable {
                columns,
                max_data_date,
            },
        );
        self
    }

    pub fn fail_on(self, fragment: &str) -> Self {
        self.state.lock().unwrap().fail_on.push(fragment.to_string());
        self
    }

    pub fn hang_on(self, fragment: &str) -> Self {
        self.state.lock().unwrap().hang_on = Some(fragment.to_string());
        self
    }

    pub fn committed(&self) -> Vec<String> {
        self.state.lock().unwrap().committed.clone()
    }

    pub fn rolled_back(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().rolled_back.clone()
    }

    pub fn begins(&self) -> usize {
        self.state.lock().unwrap().begins
    }

    pub fn cancels(&self) -> usize {
        self.state.lock().unwrap().cancels
    }

    fn answer(&self, sql: &str) -> Vec<Row> {
        let mut state = self.state.lock().unwrap();
        state.queries.push(sql.to_string());

        for ((namespace, table), fake) in &state.tables {
            if sql.contains("information_schema.tables")
                && sql.contains(&format!("table_schema = '{}'", namespace))
                && sql.contains(&format!("table_name = '{}'", table))
            {
                return vec![vec![SqlValue::Text(table.clone())]];
            }
            if sql.contains("FROM pg_attribute")
                && sql.contains(&format!("n.nspname = '{}'", namespace))
                && sql.contains(&format!("c.relname = '{}'", table))
            {
                return fake.columns.iter().enumerate().map(|(i, c)| catalog_row(i, c)).collect();
            }
            if sql.contains("DESC LIMIT 1")
                && sql.contains(&format!("FROM \"{}\".\"{}\"", namespace, table))
            {
                return fake
                    .max_data_date
                    .map(|ts| vec![vec![SqlValue::Timestamp(ts)]])
                    .unwrap_or_default();
            }
        }
        Vec::new()
    }
}

fn catalog_row(idx: usize, column: &Column) -> Row {
    vec![
        SqlValue::Int(idx as i64 + 1),
        SqlValue::Text(column.name.clone()),
        SqlValue::Text(column.col_type.clone()),
        SqlValue::Text(column.default_value.clone()),
        SqlValue::Bool(column.not_null),
        SqlValue::Bool(column.primary_key),
        SqlValue::Bool(column.dist_key),
        SqlValue::Int(i64::from(column.sort_ordinal)),
    ]
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.committed.push(sql.to_string());
        Ok(0)
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        Ok(self.answer(sql))
    }

    async fn begin(&self) -> Result<Box<dyn WarehouseTx>> {
        self.state.lock().unwrap().begins += 1;
        Ok(Box::new(FakeTx {
            warehouse: self.clone(),
            statements: Vec::new(),
            finished: false,
        }))
    }
}

pub struct FakeTx {
    warehouse: FakeWarehouse,
    statements: Vec<String>,
    finished: bool,
}

#[async_trait]
impl WarehouseTx for FakeTx {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.statements.push(sql.to_string());
        let (fails, hangs) = {
            let state = self.warehouse.state.lock().unwrap();
            (
                state.fail_on.iter().any(|f| sql.contains(f.as_str())),
                state.hang_on.as_deref().is_some_and(|h| sql.contains(h)),
            )
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        if fails {
            return Err(LoaderError::Database(format!("injected failure: {}", sql)));
        }
        Ok(1)
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        Ok(self.warehouse.answer(sql))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.finished = true;
        let statements = std::mem::take(&mut this.statements);
        this.warehouse.state.lock().unwrap().committed.extend(statements);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.finished = true;
        let statements = std::mem::take(&mut this.statements);
        this.warehouse.state.lock().unwrap().rolled_back.push(statements);
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        self.warehouse.state.lock().unwrap().cancels += 1;
        Ok(())
    }
}

impl Drop for FakeTx {
    fn drop(&mut self) {
        if !self.finished {
            let statements = std::mem::take(&mut self.statements);
            if let Ok(mut state) = self.warehouse.state.lock() {
                state.rolled_back.push(statements);
            }
        }
    }
}

/// Maintenance queue that records requests and optionally refuses them.
#[derive(Clone, Default)]
pub struct RecordingQueue {
    pub requests: Arc<Mutex<Vec<(String, String)>>>,
    pub fail: bool,
}

impl RecordingQueue {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl MaintenanceQueue for RecordingQueue {
    async fn enqueue_analyze(&self, namespace: &str, table: &str) -> Result<()> {
        self.requests
            .lock()
            .unwrap()
            .push((namespace.to_string(), table.to_string()));
        if self.fail {
            return Err(LoaderError::Maintenance("queue unavailable".into()));
        }
        Ok(())
    }
}

pub fn bucket() -> Bucket {
    Bucket {
        name: "metrics".into(),
        region: "us-east-1".into(),
        credentials: Credentials::Role("arn:aws:iam::1:role/loader".into()),
    }
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
}

/// Config columns for an `events` style table.
pub fn config_columns() -> Vec<Column> {
    vec![
        Column {
            ordinal: 1,
            name: "id".into(),
            col_type: "text".into(),
            primary_key: true,
            dist_key: true,
            ..Default::default()
        },
        Column {
            ordinal: 2,
            name: "_data_timestamp".into(),
            col_type: "timestamp".into(),
            not_null: true,
            sort_ordinal: 1,
            ..Default::default()
        },
        Column {
            ordinal: 3,
            name: "value".into(),
            col_type: "float".into(),
            ..Default::default()
        },
    ]
}

/// The same columns as the catalog reports them.
pub fn live_columns() -> Vec<Column> {
    config_columns()
        .into_iter()
        .map(|mut c| {
            c.col_type = s3_to_warehouse::schema::types::physical_type(&c.col_type)
                .unwrap()
                .to_string();
            c
        })
        .collect()
}

pub fn table_schema(namespace: &str, table: &str, columns: Vec<Column>) -> TableSchema {
    TableSchema::new(namespace, table, columns).with_data_date_column("_data_timestamp")
}

/// Writes a YAML table config holding `tables` and returns its path.
pub fn write_config(dir: &Path, tables: &[TableSchema]) -> PathBuf {
    let mut config = TableConfig::new();
    for table in tables {
        config.insert(table.name.clone(), table.clone());
    }
    let path = dir.join("config.yml");
    std::fs::write(&path, table_config_to_yaml(&config).unwrap()).unwrap();
    path
}

pub fn input_file(namespace: &str, table: &str, config: &Path, date: DateTime<Utc>) -> InputFile {
    InputFile::new(
        bucket(),
        namespace,
        table,
        "json.gz",
        config.to_str(),
        date,
    )
}
