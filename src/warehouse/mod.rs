//! Warehouse capability interface
//!
//! The refresh pipeline only needs three things from the warehouse: run a
//! statement, run a query, and open a scoped transaction. Both the sqlx-backed
//! client and the in-memory test double implement these traits.

pub mod catalog;
pub mod postgres;

use std::fmt;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

use crate::error::{LoaderError, Result};

pub use postgres::{PgWarehouse, PoolSettings};

/// A single value read back from the warehouse.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Zone-less timestamp, as stored in `timestamp without time zone` columns
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Date(NaiveDate),
}

impl SqlValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Reads any time-like value as a UTC instant. Zone-less timestamps are
    /// taken to be UTC; dates are taken at midnight.
    pub fn as_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            SqlValue::Timestamp(ts) => Some(ts.and_utc()),
            SqlValue::TimestampTz(ts) => Some(*ts),
            SqlValue::Date(d) => d.and_hms_opt(0, 0, 0).map(|ts| ts.and_utc()),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bool(b) => write!(f, "{}", b),
            SqlValue::Int(i) => write!(f, "{}", i),
            SqlValue::Float(v) => write!(f, "{}", v),
            SqlValue::Text(s) => f.write_str(s),
            SqlValue::Timestamp(ts) => write!(f, "{}", ts),
            SqlValue::TimestampTz(ts) => write!(f, "{}", ts),
            SqlValue::Date(d) => write!(f, "{}", d),
        }
    }
}

pub type Row = Vec<SqlValue>;

/// Connection-level capability: statements outside a transaction, catalog
/// queries and transaction acquisition.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Runs a statement and returns the number of affected rows.
    async fn execute(&self, sql: &str) -> Result<u64>;

    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    async fn begin(&self) -> Result<Box<dyn WarehouseTx>>;
}

/// An open transaction. Dropping it without `commit` rolls it back.
#[async_trait]
pub trait WarehouseTx: Send {
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Asks the server, over another connection, to abort the statement this
    /// transaction is running. The transaction stays open until rolled back.
    async fn cancel(&self) -> Result<()>;
}

/// Double-quotes an identifier, escaping embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Single-quotes a string literal, escaping embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `"<namespace>"."<table>"`
pub fn qualified_name(namespace: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(namespace), quote_ident(table))
}

fn credentials_regex() -> &'static Regex {
    static CREDENTIALS: OnceLock<Regex> = OnceLock::new();
    CREDENTIALS.get_or_init(|| {
        Regex::new(r"CREDENTIALS\s+'[^']*'").expect("credentials regex is valid")
    })
}

/// Replaces the secret part of any COPY credentials clause, for logging.
pub fn redact_credentials(sql: &str) -> String {
    credentials_regex()
        .replace_all(sql, "CREDENTIALS '<redacted>'")
        .into_owned()
}

/// Reads a single-column, at-most-one-row result.
pub fn single_value(rows: Vec<Row>) -> Result<Option<SqlValue>> {
    let mut rows = rows.into_iter();
    let Some(row) = rows.next() else {
        return Ok(None);
    };
    if rows.next().is_some() {
        return Err(LoaderError::Database(
            "expected at most one row, got several".to_string(),
        ));
    }
    Ok(row.into_iter().next())
}
