//! Schema comparison between an input table definition and the live table.
//!
//! The comparison only ever proposes additive changes. Retyping or dropping an
//! existing column is reported as a mismatch and the refresh fails.

use std::fmt;

use crate::error::{LoaderError, Result};
use crate::schema::types::{physical_type, physical_types_match};
use crate::schema::{Column, TableSchema};

/// How input columns are paired with live columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonMode {
    /// Pair by position; new columns may only be appended.
    Ordered,
    /// Pair by name; used for document-derived namespaces where column order
    /// is not stable between snapshots.
    Unordered,
}

impl ComparisonMode {
    pub fn for_namespace(namespace: &str, unordered_namespaces: &[String]) -> Self {
        if unordered_namespaces.iter().any(|ns| ns == namespace) {
            ComparisonMode::Unordered
        } else {
            ComparisonMode::Ordered
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnProperty {
    Type,
    DefaultValue,
    NotNull,
    PrimaryKey,
    DistKey,
    SortOrdinal,
}

impl fmt::Display for ColumnProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnProperty::Type => "Type",
            ColumnProperty::DefaultValue => "DefaultVal",
            ColumnProperty::NotNull => "NotNull",
            ColumnProperty::PrimaryKey => "PrimaryKey",
            ColumnProperty::DistKey => "DistKey",
            ColumnProperty::SortOrdinal => "SortOrdinal",
        };
        f.write_str(name)
    }
}

/// A single discrepancy between input and live schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaMismatch {
    Property {
        column: String,
        property: ColumnProperty,
        input: String,
        target: String,
    },
    UnknownType {
        column: String,
        logical_type: String,
    },
    TargetHasMoreColumns {
        input: usize,
        target: usize,
    },
}

impl fmt::Display for SchemaMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaMismatch::Property {
                column,
                property,
                input,
                target,
            } => write!(
                f,
                "mismatched column: {} property: {}, input: {}, target: {}",
                column, property, input, target
            ),
            SchemaMismatch::UnknownType {
                column,
                logical_type,
            } => write!(f, "column {} has unknown type '{}'", column, logical_type),
            SchemaMismatch::TargetHasMoreColumns { input, target } => write!(
                f,
                "target has more columns than input: input {}, target {}",
                input, target
            ),
        }
    }
}

/// An `ADD COLUMN` the live table needs before the load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddColumn {
    pub column: Column,
}

/// Result of comparing two schemas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDiff {
    pub additions: Vec<AddColumn>,
    pub mismatches: Vec<SchemaMismatch>,
}

impl SchemaDiff {
    pub fn is_unchanged(&self) -> bool {
        self.additions.is_empty() && self.mismatches.is_empty()
    }

    /// Additive operations, or every mismatch as one error.
    pub fn into_result(self, table: &str) -> Result<Vec<AddColumn>> {
        if self.mismatches.is_empty() {
            Ok(self.additions)
        } else {
            Err(LoaderError::SchemaDrift {
                table: table.to_string(),
                mismatches: self.mismatches,
            })
        }
    }
}

/// Compares the desired `input` schema against the live `target` schema.
///
/// Mismatches are accumulated, so a single call reports every discrepancy.
/// Live columns the input does not mention are left alone in unordered mode.
pub fn compare(input: &TableSchema, target: &TableSchema, mode: ComparisonMode) -> SchemaDiff {
    let mut diff = SchemaDiff::default();

    match mode {
        ComparisonMode::Ordered => {
            if target.columns.len() > input.columns.len() {
                diff.mismatches.push(SchemaMismatch::TargetHasMoreColumns {
                    input: input.columns.len(),
                    target: target.columns.len(),
                });
            }
            for (position, in_col) in input.columns.iter().enumerate() {
                match target.columns.get(position) {
                    Some(target_col) => compare_column(in_col, target_col, &mut diff.mismatches),
                    None => push_addition(in_col, &mut diff),
                }
            }
        }
        ComparisonMode::Unordered => {
            for in_col in &input.columns {
                // unquoted DDL folds names to lower case in the catalog
                let found = target
                    .columns
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(&in_col.name));
                match found {
                    Some(target_col) => compare_column(in_col, target_col, &mut diff.mismatches),
                    None => push_addition(in_col, &mut diff),
                }
            }
        }
    }

    diff
}

fn push_addition(column: &Column, diff: &mut SchemaDiff) {
    if physical_type(&column.col_type).is_none() {
        diff.mismatches.push(SchemaMismatch::UnknownType {
            column: column.name.clone(),
            logical_type: column.col_type.clone(),
        });
        return;
    }
    diff.additions.push(AddColumn {
        column: column.clone(),
    });
}

fn mismatch(
    column: &Column,
    property: ColumnProperty,
    input: impl ToString,
    target: impl ToString,
) -> SchemaMismatch {
    SchemaMismatch::Property {
        column: column.name.clone(),
        property,
        input: input.to_string(),
        target: target.to_string(),
    }
}

fn compare_column(input: &Column, target: &Column, out: &mut Vec<SchemaMismatch>) {
    match physical_type(&input.col_type) {
        None => out.push(SchemaMismatch::UnknownType {
            column: input.name.clone(),
            logical_type: input.col_type.clone(),
        }),
        Some(physical) if !physical_types_match(physical, &target.col_type) => {
            out.push(mismatch(input, ColumnProperty::Type, physical, &target.col_type));
        }
        Some(_) => {}
    }

    if input.default_value != target.default_value {
        out.push(mismatch(
            input,
            ColumnProperty::DefaultValue,
            &input.default_value,
            &target.default_value,
        ));
    }
    if input.not_null != target.not_null {
        out.push(mismatch(input, ColumnProperty::NotNull, input.not_null, target.not_null));
    }
    if input.primary_key != target.primary_key {
        out.push(mismatch(
            input,
            ColumnProperty::PrimaryKey,
            input.primary_key,
            target.primary_key,
        ));
    }

    // Tuning properties are only checked when the input asserts them.
    if input.dist_key && !target.dist_key {
        out.push(mismatch(input, ColumnProperty::DistKey, input.dist_key, target.dist_key));
    }
    if input.sort_ordinal != 0 && input.sort_ordinal != target.sort_ordinal {
        out.push(mismatch(
            input,
            ColumnProperty::SortOrdinal,
            input.sort_ordinal,
            target.sort_ordinal,
        ));
    }
}
