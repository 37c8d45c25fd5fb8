use std::fmt;

use itertools::Itertools;
use thiserror::Error;

use crate::schema::compare::SchemaMismatch;

/// Step of a single table refresh, used to say where a statement failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStep {
    Begin,
    Truncate,
    TruncateRange,
    Create,
    Alter,
    Copy,
    Swap,
    Commit,
}

impl fmt::Display for RefreshStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefreshStep::Begin => "begin transaction",
            RefreshStep::Truncate => "truncate table",
            RefreshStep::TruncateRange => "truncate data for data refresh",
            RefreshStep::Create => "create table",
            RefreshStep::Alter => "update table",
            RefreshStep::Copy => "copy",
            RefreshStep::Swap => "swap temp table",
            RefreshStep::Commit => "commit transaction",
        };
        f.write_str(name)
    }
}

/// One failed table in a batch.
#[derive(Debug)]
pub struct TableFailure {
    pub table: String,
    pub error: LoaderError,
}

impl fmt::Display for TableFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.table, self.error)
    }
}

/// Coarse error classes. Only `Transient` failures are worth re-running as is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    SchemaDrift,
    Transient,
    Cancelled,
    Batch,
}

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid table definition for {table}: {reason}")]
    InvalidDefinition { table: String, reason: String },

    #[error("Schema drift on {table}: {}", join_mismatches(.mismatches))]
    SchemaDrift {
        table: String,
        mismatches: Vec<SchemaMismatch>,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("err running {step} on {table}: {message}")]
    Statement {
        table: String,
        step: RefreshStep,
        message: String,
    },

    #[error("Maintenance queue error: {0}")]
    Maintenance(String),

    #[error("Refresh of {0} was cancelled")]
    Cancelled(String),

    #[error("error loading tables: {}", join_failures(.0))]
    Batch(Vec<TableFailure>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl LoaderError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LoaderError::Config(_)
            | LoaderError::InvalidDefinition { .. }
            | LoaderError::Yaml(_)
            | LoaderError::Json(_) => ErrorCategory::Configuration,
            LoaderError::SchemaDrift { .. } => ErrorCategory::SchemaDrift,
            LoaderError::Database(_)
            | LoaderError::Statement { .. }
            | LoaderError::Maintenance(_)
            | LoaderError::Io(_) => ErrorCategory::Transient,
            LoaderError::Cancelled(_) => ErrorCategory::Cancelled,
            LoaderError::Batch(_) => ErrorCategory::Batch,
        }
    }
}

impl From<sqlx::Error> for LoaderError {
    fn from(err: sqlx::Error) -> Self {
        LoaderError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for LoaderError {
    fn from(err: reqwest::Error) -> Self {
        LoaderError::Maintenance(err.to_string())
    }
}

fn join_mismatches(mismatches: &[SchemaMismatch]) -> String {
    mismatches.iter().join("; ")
}

fn join_failures(failures: &[TableFailure]) -> String {
    failures.iter().join("; ")
}

pub type Result<T> = std::result::Result<T, LoaderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories_follow_taxonomy() {
        assert_eq!(
            LoaderError::Config("no date".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            LoaderError::Statement {
                table: "t".into(),
                step: RefreshStep::Copy,
                message: "boom".into(),
            }
            .category(),
            ErrorCategory::Transient
        );
        assert_eq!(
            LoaderError::SchemaDrift {
                table: "t".into(),
                mismatches: vec![],
            }
            .category(),
            ErrorCategory::SchemaDrift
        );
    }

    #[test]
    fn test_batch_error_lists_every_table() {
        let err = LoaderError::Batch(vec![
            TableFailure {
                table: "a".into(),
                error: LoaderError::Database("down".into()),
            },
            TableFailure {
                table: "b".into(),
                error: LoaderError::Cancelled("b".into()),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("a: Database error: down"));
        assert!(text.contains("b: Refresh of b was cancelled"));
    }
}
