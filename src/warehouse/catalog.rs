//! Live-table introspection from the warehouse catalog.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use super::{qualified_name, quote_ident, quote_literal, single_value, Row, SqlValue, Warehouse};
use crate::error::{LoaderError, Result};
use crate::schema::{Column, LiveTable, TableSchema};

fn exists_query(namespace: &str, table: &str) -> String {
    format!(
        "SELECT table_name FROM information_schema.tables WHERE table_schema = {} AND table_name = {}",
        quote_literal(namespace),
        quote_literal(table)
    )
}

// one row per (column, constraint); rows for the same column are merged
fn columns_query(namespace: &str, table: &str) -> String {
    format!(
        "SELECT
  f.attnum::int AS ordinal,
  f.attname::text AS name,
  pg_catalog.format_type(f.atttypid, f.atttypmod)::text AS col_type,
  CASE WHEN f.atthasdef = 't' THEN d.adsrc::text ELSE '' END AS default_val,
  f.attnotnull AS not_null,
  p.contype IS NOT NULL AND p.contype = 'p' AS primary_key,
  f.attisdistkey AS dist_key,
  f.attsortkeyord::int AS sort_ord
FROM pg_attribute f
  JOIN pg_class c ON c.oid = f.attrelid
  LEFT JOIN pg_attrdef d ON d.adrelid = c.oid AND d.adnum = f.attnum
  LEFT JOIN pg_namespace n ON n.oid = c.relnamespace
  LEFT JOIN pg_constraint p ON p.conrelid = c.oid AND f.attnum = ANY (p.conkey)
WHERE c.relkind = 'r'::char
  AND n.nspname = {}
  AND c.relname = {}
  AND f.attnum > 0
  AND NOT f.attisdropped
ORDER BY f.attnum",
        quote_literal(namespace),
        quote_literal(table)
    )
}

/// `SELECT "<col>" FROM "<ns>"."<table>" ORDER BY "<col>" DESC LIMIT 1`
pub fn last_data_date_query(namespace: &str, table: &str, data_date_column: &str) -> String {
    let column = quote_ident(data_date_column);
    format!(
        "SELECT {} FROM {} ORDER BY {} DESC LIMIT 1",
        column,
        qualified_name(namespace, table),
        column
    )
}

fn field<'a>(row: &'a Row, idx: usize, name: &str) -> Result<&'a SqlValue> {
    row.get(idx).ok_or_else(|| {
        LoaderError::Database(format!("issue scanning column, missing field {}", name))
    })
}

fn int_field(row: &Row, idx: usize, name: &str) -> Result<i32> {
    match field(row, idx, name)? {
        SqlValue::Null => Ok(0),
        value => value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| {
                LoaderError::Database(format!("issue scanning column, bad {}: {}", name, value))
            }),
    }
}

fn bool_field(row: &Row, idx: usize, name: &str) -> Result<bool> {
    match field(row, idx, name)? {
        SqlValue::Null => Ok(false),
        value => value.as_bool().ok_or_else(|| {
            LoaderError::Database(format!("issue scanning column, bad {}: {}", name, value))
        }),
    }
}

fn text_field(row: &Row, idx: usize, name: &str) -> Result<String> {
    match field(row, idx, name)? {
        SqlValue::Null => Ok(String::new()),
        SqlValue::Text(s) => Ok(s.clone()),
        value => Err(LoaderError::Database(format!(
            "issue scanning column, bad {}: {}",
            name, value
        ))),
    }
}

/// Turns one row of the column query into a `Column`.
pub fn column_from_row(row: &Row) -> Result<Column> {
    Ok(Column {
        ordinal: int_field(row, 0, "ordinal")?,
        name: text_field(row, 1, "name")?,
        col_type: text_field(row, 2, "col_type")?,
        default_value: text_field(row, 3, "default_val")?,
        not_null: bool_field(row, 4, "not_null")?,
        primary_key: bool_field(row, 5, "primary_key")?,
        dist_key: bool_field(row, 6, "dist_key")?,
        sort_ordinal: int_field(row, 7, "sort_ord")?,
    })
}

/// Builds the column list from catalog rows, folding duplicate rows produced
/// by columns that take part in several constraints.
pub fn columns_from_rows(rows: &[Row]) -> Result<Vec<Column>> {
    let mut columns: Vec<Column> = Vec::with_capacity(rows.len());
    for row in rows {
        let column = column_from_row(row)?;
        match columns.last_mut() {
            Some(last) if last.ordinal == column.ordinal => {
                last.primary_key |= column.primary_key;
            }
            _ => columns.push(column),
        }
    }
    Ok(columns)
}

pub async fn table_exists(warehouse: &dyn Warehouse, namespace: &str, table: &str) -> Result<bool> {
    let rows = warehouse
        .query(&exists_query(namespace, table))
        .await
        .map_err(|e| {
            LoaderError::Database(format!("issue just checking if the table exists: {}", e))
        })?;
    Ok(!rows.is_empty())
}

pub async fn last_data_date(
    warehouse: &dyn Warehouse,
    namespace: &str,
    table: &str,
    data_date_column: &str,
) -> Result<Option<DateTime<Utc>>> {
    let query = last_data_date_query(namespace, table, data_date_column);
    let rows = warehouse
        .query(&query)
        .await
        .map_err(|e| LoaderError::Database(format!("issue running query: {}, err: {}", query, e)))?;

    match single_value(rows)? {
        None | Some(SqlValue::Null) => Ok(None),
        Some(value) => value.as_utc().map(Some).ok_or_else(|| {
            LoaderError::Database(format!(
                "data date column {} holds a non-time value: {}",
                data_date_column, value
            ))
        }),
    }
}

/// Reads the live table, or `None` when it does not exist.
///
/// An existing but empty table comes back with `max_data_date = None`.
#[instrument(skip(warehouse), err)]
pub async fn table_metadata(
    warehouse: &dyn Warehouse,
    namespace: &str,
    table: &str,
    data_date_column: &str,
) -> Result<Option<LiveTable>> {
    if !table_exists(warehouse, namespace, table).await? {
        debug!("{}.{} does not exist", namespace, table);
        return Ok(None);
    }

    let rows = warehouse
        .query(&columns_query(namespace, table))
        .await
        .map_err(|e| LoaderError::Database(format!("issue running column query: {}", e)))?;
    let columns = columns_from_rows(&rows)?;

    let max_data_date = last_data_date(warehouse, namespace, table, data_date_column).await?;

    let schema = TableSchema::new(namespace, table, columns).with_data_date_column(data_date_column);
    Ok(Some(LiveTable {
        schema,
        max_data_date,
    }))
}
