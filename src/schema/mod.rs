//! Table definitions
//!
//! One `TableSchema` shape serves three readers: the YAML table config written
//! next to each snapshot, the live table read back from the warehouse catalog,
//! and the DDL writer. Column types hold logical names (`int`, `text`, ...) when
//! they come from config and physical names (`integer`, `character varying(256)`)
//! when they come from the catalog.

pub mod compare;
pub mod types;

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LoaderError, Result};

/// A single column of a table definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    #[serde(default)]
    pub ordinal: i32,

    #[serde(rename = "dest")]
    pub name: String,

    #[serde(rename = "type")]
    pub col_type: String,

    /// Default-value expression, empty when the column has none
    #[serde(rename = "defaultval", default)]
    pub default_value: String,

    #[serde(rename = "notnull", default)]
    pub not_null: bool,

    #[serde(rename = "primarykey", default)]
    pub primary_key: bool,

    #[serde(rename = "distkey", default)]
    pub dist_key: bool,

    /// 0 = not part of the sort key, 1 = leading sort column
    #[serde(rename = "sortord", default)]
    pub sort_ordinal: i32,
}

impl Column {
    pub fn new(name: impl Into<String>, col_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            col_type: col_type.into(),
            ..Default::default()
        }
    }

    pub fn is_sort_key(&self) -> bool {
        self.sort_ordinal == 1
    }
}

/// Metadata the warehouse itself does not track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    /// Column holding the logical time each row represents
    #[serde(rename = "datadatecolumn", default)]
    pub data_date_column: String,

    /// Namespace (warehouse schema) owning the table
    #[serde(rename = "schema", default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(rename = "dest")]
    pub name: String,

    #[serde(default)]
    pub columns: Vec<Column>,

    #[serde(default)]
    pub meta: TableMeta,
}

impl TableSchema {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            meta: TableMeta {
                data_date_column: String::new(),
                namespace: namespace.into(),
            },
        }
    }

    pub fn with_data_date_column(mut self, column: impl Into<String>) -> Self {
        self.meta.data_date_column = column.into();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.meta.namespace
    }

    pub fn data_date_column(&self) -> &str {
        &self.meta.data_date_column
    }

    /// Checks the invariants every usable schema must hold.
    pub fn validate(&self) -> Result<()> {
        if self.meta.data_date_column.is_empty() {
            return Err(LoaderError::Config(format!(
                "Data Date Column must be set for table {}",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(LoaderError::InvalidDefinition {
                    table: self.name.clone(),
                    reason: format!("duplicate column {}", column.name),
                });
            }
        }

        let leading_sort = self.columns.iter().filter(|c| c.is_sort_key()).count();
        if leading_sort > 1 {
            return Err(LoaderError::InvalidDefinition {
                table: self.name.clone(),
                reason: format!("{} columns have sort ordinal 1, only one may", leading_sort),
            });
        }

        Ok(())
    }
}

/// The live destination table, as read from the warehouse.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveTable {
    pub schema: TableSchema,

    /// Latest value of the data-date column; `None` when the table is empty
    pub max_data_date: Option<DateTime<Utc>>,
}

/// Parsed YAML table config: table name -> definition.
pub type TableConfig = BTreeMap<String, TableSchema>;

pub fn parse_table_config(yaml: &str) -> Result<TableConfig> {
    Ok(serde_yaml::from_str(yaml)?)
}

pub fn table_config_to_yaml(config: &TableConfig) -> Result<String> {
    Ok(serde_yaml::to_string(config)?)
}

/// Picks one table out of a YAML config and checks it belongs to `namespace`.
pub fn table_from_config(yaml: &str, namespace: &str, table: &str) -> Result<TableSchema> {
    let mut config = parse_table_config(yaml)?;

    let schema = config.remove(table).ok_or_else(|| {
        LoaderError::Config(format!("can't find table {} in conf", table))
    })?;

    if schema.meta.namespace != namespace {
        return Err(LoaderError::Config(format!(
            "mismatched schema, conf: {}, file: {}",
            schema.meta.namespace, namespace
        )));
    }

    schema.validate()?;
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TableSchema {
        TableSchema::new(
            "mongo",
            "districts",
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
                    name: "name".into(),
                    col_type: "longtext".into(),
                    default_value: "'unknown'".into(),
                    ..Default::default()
                },
            ],
        )
        .with_data_date_column("_data_timestamp")
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = TableConfig::new();
        config.insert("districts".to_string(), sample());

        let yaml = table_config_to_yaml(&config).unwrap();
        let parsed = parse_table_config(&yaml).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn test_parses_config_file_shape() {
        let yaml = r#"
districts:
  dest: districts
  columns:
    - ordinal: 1
      dest: id
      type: text
      primarykey: true
      distkey: true
    - ordinal: 2
      dest: _data_timestamp
      type: timestamp
      notnull: true
      sortord: 1
  meta:
    datadatecolumn: _data_timestamp
    schema: mongo
"#;
        let table = table_from_config(yaml, "mongo", "districts").unwrap();
        assert_eq!(table.name, "districts");
        assert_eq!(table.columns.len(), 2);
        assert!(table.columns[0].dist_key);
        assert_eq!(table.columns[1].sort_ordinal, 1);
        assert_eq!(table.data_date_column(), "_data_timestamp");
    }

    #[test]
    fn test_table_from_config_rejects_bad_configs() {
        let mut config = TableConfig::new();
        config.insert("districts".to_string(), sample());
        let yaml = table_config_to_yaml(&config).unwrap();

        let err = table_from_config(&yaml, "mongo", "schools").unwrap_err();
        assert!(err.to_string().contains("can't find table"));

        let err = table_from_config(&yaml, "other", "districts").unwrap_err();
        assert!(err.to_string().contains("mismatched schema"));

        let mut no_date = sample();
        no_date.meta.data_date_column.clear();
        config.insert("districts".to_string(), no_date);
        let yaml = table_config_to_yaml(&config).unwrap();
        let err = table_from_config(&yaml, "mongo", "districts").unwrap_err();
        assert!(err.to_string().contains("Data Date Column must be set"));
    }

    #[test]
    fn test_validate_rejects_two_leading_sort_columns() {
        let mut table = sample();
        table.columns[0].sort_ordinal = 1;
        assert!(matches!(
            table.validate(),
            Err(LoaderError::InvalidDefinition { .. })
        ));
    }
}
