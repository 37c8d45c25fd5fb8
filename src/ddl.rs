//! CREATE / ALTER statements for destination tables.

use crate::error::{LoaderError, Result};
use crate::schema::compare::AddColumn;
use crate::schema::types::physical_type;
use crate::schema::{Column, TableSchema};
use crate::warehouse::qualified_name;

/// Column clause: `name type [DEFAULT x] [NOT NULL] [SORTKEY] [PRIMARY KEY] [DISTKEY]`.
pub fn column_sql(table: &str, column: &Column) -> Result<String> {
    let physical = physical_type(&column.col_type).ok_or_else(|| LoaderError::InvalidDefinition {
        table: table.to_string(),
        reason: format!(
            "column {} has unknown type '{}'",
            column.name, column.col_type
        ),
    })?;

    let mut parts = vec![column.name.clone(), physical.to_string()];
    if !column.default_value.is_empty() {
        parts.push(format!("DEFAULT {}", column.default_value));
    }
    if column.not_null {
        parts.push("NOT NULL".to_string());
    }
    if column.is_sort_key() {
        parts.push("SORTKEY".to_string());
    }
    if column.primary_key {
        parts.push("PRIMARY KEY".to_string());
    }
    if column.dist_key {
        parts.push("DISTKEY".to_string());
    }
    Ok(parts.join(" "))
}

/// `CREATE TABLE "<ns>"."<table>" (<col-clauses>)`
///
/// Nothing is emitted unless the table declares a sort key and a
/// distribution key.
pub fn create_table_sql(schema: &TableSchema) -> Result<String> {
    schema.validate()?;

    let clauses = schema
        .columns
        .iter()
        .map(|c| column_sql(&schema.name, c))
        .collect::<Result<Vec<_>>>()?;

    let has_sort_key = schema.columns.iter().any(Column::is_sort_key);
    let has_dist_key = schema.columns.iter().any(|c| c.dist_key);
    if !has_sort_key || !has_dist_key {
        let missing = match (has_sort_key, has_dist_key) {
            (false, false) => "a SORTKEY and a DISTKEY",
            (false, true) => "a SORTKEY",
            _ => "a DISTKEY",
        };
        return Err(LoaderError::InvalidDefinition {
            table: schema.name.clone(),
            reason: format!("table must declare {}", missing),
        });
    }

    Ok(format!(
        "CREATE TABLE {} ({})",
        qualified_name(schema.namespace(), &schema.name),
        clauses.join(",")
    ))
}

/// One `ALTER TABLE ... ADD COLUMN` per added column; the warehouse does not
/// accept several columns in one statement.
pub fn alter_table_sql(schema: &TableSchema, additions: &[AddColumn]) -> Result<Vec<String>> {
    let table = qualified_name(schema.namespace(), &schema.name);
    additions
        .iter()
        .map(|op| {
            column_sql(&schema.name, &op.column)
                .map(|clause| format!("ALTER TABLE {} ADD COLUMN {}", table, clause))
        })
        .collect()
}
