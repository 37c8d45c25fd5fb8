//! COPY statements and the deletes that bound which rows a load replaces.

use crate::input_file::{Bucket, Credentials, InputFile};
use crate::staleness::LoadWindow;
use crate::warehouse::{qualified_name, quote_ident, quote_literal};

/// Format used for the range bounds in a windowed delete.
pub const WINDOW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Target of a COPY. Temp tables live outside any namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub namespace: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn unqualified(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn to_sql(&self) -> String {
        match &self.namespace {
            Some(namespace) => qualified_name(namespace, &self.name),
            None => quote_ident(&self.name),
        }
    }
}

/// Where a COPY reads from and how it authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySource {
    pub location: String,
    pub region: String,
    pub credentials: Credentials,
    pub json_paths: String,
    pub manifest: bool,
}

impl From<&InputFile> for CopySource {
    fn from(file: &InputFile) -> Self {
        Self {
            location: file.data_location(),
            region: file.bucket.region.clone(),
            credentials: file.bucket.credentials.clone(),
            json_paths: file.json_paths.clone(),
            manifest: file.is_manifest(),
        }
    }
}

impl CopySource {
    /// Full-snapshot dump of one table at `s3://<bucket>/<prefix><table>.txt.gz`.
    pub fn snapshot(bucket: &Bucket, prefix: &str, table: &str) -> Self {
        Self {
            location: format!("s3://{}/{}{}.txt.gz", bucket.name, prefix, table),
            region: bucket.region.clone(),
            credentials: bucket.credentials.clone(),
            json_paths: "auto".to_string(),
            manifest: false,
        }
    }
}

/// Builds the COPY for `source` into `target`.
///
/// No delimiter means a JSON payload. A manifest source loads every file the
/// manifest lists, whatever their format.
pub fn copy_sql(
    target: &TableRef,
    source: &CopySource,
    delimiter: Option<char>,
    use_credentials: bool,
    gzip: bool,
) -> String {
    let mut parts = vec![
        format!("COPY {} FROM {} WITH", target.to_sql(), quote_literal(&source.location)),
    ];
    if gzip {
        parts.push("GZIP".to_string());
    }
    match delimiter {
        None => parts.push(format!("JSON {}", quote_literal(&source.json_paths))),
        Some(d) => parts.push(format!("DELIMITER AS {}", quote_literal(&d.to_string()))),
    }
    if source.manifest {
        parts.push("MANIFEST".to_string());
    }
    parts.push(format!("REGION {}", quote_literal(&source.region)));
    parts.push("TIMEFORMAT 'auto'".to_string());
    if delimiter.is_some() {
        parts.push("ACCEPTINVCHARS EMPTYASNULL DATEFORMAT 'auto'".to_string());
    }
    parts.push("TRUNCATECOLUMNS TRIMBLANKS BLANKSASNULL ACCEPTANYDATE".to_string());
    parts.push("STATUPDATE ON COMPUPDATE ON".to_string());
    if use_credentials {
        parts.push(source.credentials.copy_clause());
    }
    parts.join(" ")
}

/// Deletes every row. A DELETE rather than TRUNCATE so it stays inside the
/// enclosing transaction.
pub fn truncate_sql(namespace: &str, table: &str) -> String {
    format!("DELETE FROM {}", qualified_name(namespace, table))
}

/// Deletes the rows whose data-date falls in `[start, end)`.
pub fn truncate_in_range_sql(
    namespace: &str,
    table: &str,
    data_date_column: &str,
    window: &LoadWindow,
) -> String {
    let column = quote_ident(data_date_column);
    format!(
        "DELETE FROM {} WHERE {} >= '{}' AND {} < '{}'",
        qualified_name(namespace, table),
        column,
        window.start.format(WINDOW_TIME_FORMAT),
        column,
        window.end.format(WINDOW_TIME_FORMAT)
    )
}
