//! Input snapshot descriptor
//!
//! Snapshots live at `s3://<bucket>/<namespace>_<table>_<RFC3339 date>.<suffix>`
//! with their table config next to them at
//! `s3://<bucket>/config_<namespace>_<table>_<RFC3339 date>.yml`, unless a
//! config location is supplied explicitly.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;

use crate::error::{LoaderError, Result};

/// How the warehouse authenticates against object storage during COPY.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Role(String),
    KeyPair {
        access_key_id: String,
        secret_access_key: String,
    },
}

impl Credentials {
    pub fn copy_clause(&self) -> String {
        match self {
            Credentials::Role(arn) => format!("CREDENTIALS 'aws_iam_role={}'", arn),
            Credentials::KeyPair {
                access_key_id,
                secret_access_key,
            } => format!(
                "CREDENTIALS 'aws_access_key_id={};aws_secret_access_key={}'",
                access_key_id, secret_access_key
            ),
        }
    }
}

// secrets stay out of logs and panics
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Role(_) => f.write_str("Credentials::Role(<redacted>)"),
            Credentials::KeyPair { .. } => f.write_str("Credentials::KeyPair(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    pub region: String,
    pub credentials: Credentials,
}

/// What the data location points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Data,
    CompressedData,
    /// A manifest listing the files to load together
    Manifest,
}

/// Everything needed to COPY one snapshot. Built once per run and not
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub bucket: Bucket,
    pub namespace: String,
    pub table: String,
    /// JSONPaths file, or `auto`
    pub json_paths: String,
    pub suffix: String,
    pub data_date: DateTime<Utc>,
    pub config_location: String,
}

fn rfc3339(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn object_key_regex() -> &'static Regex {
    static KEY_REGEX: OnceLock<Regex> = OnceLock::new();
    KEY_REGEX.get_or_init(|| {
        Regex::new(r"^(?P<prefix>.+)_(?P<date>[^_.]+)\.(?P<suffix>.+)$")
            .expect("object key regex is valid")
    })
}

impl InputFile {
    pub fn new(
        bucket: Bucket,
        namespace: impl Into<String>,
        table: impl Into<String>,
        suffix: impl Into<String>,
        supplied_config: Option<&str>,
        data_date: DateTime<Utc>,
    ) -> Self {
        let namespace = namespace.into();
        let table = table.into();
        let config_location = match supplied_config {
            Some(location) if !location.is_empty() => location.to_string(),
            _ => Self::default_config_location(&bucket.name, &namespace, &table, &data_date),
        };
        Self {
            bucket,
            namespace,
            table,
            json_paths: "auto".to_string(),
            suffix: suffix.into(),
            data_date,
            config_location,
        }
    }

    /// Builds the descriptor from an object key such as
    /// `mongo_districts_2015-11-10T23:00:00Z.json.gz`.
    pub fn from_object_key(
        bucket: Bucket,
        namespace: &str,
        key: &str,
        supplied_config: Option<&str>,
    ) -> Result<Self> {
        let captures = object_key_regex().captures(key).ok_or_else(|| {
            LoaderError::Config(format!("issue parsing date from file name: {}", key))
        })?;

        let suffix = &captures["suffix"];
        if suffix == "yml" || suffix.ends_with(".yml") {
            return Err(LoaderError::Config(format!(
                "{} is a config file, not a data file",
                key
            )));
        }

        let prefix = &captures["prefix"];
        let table = prefix
            .strip_prefix(namespace)
            .and_then(|rest| rest.strip_prefix('_'))
            .filter(|table| !table.is_empty())
            .ok_or_else(|| {
                LoaderError::Config(format!(
                    "file name {} does not belong to schema {}",
                    key, namespace
                ))
            })?;

        let data_date = DateTime::parse_from_rfc3339(&captures["date"])
            .map_err(|e| LoaderError::Config(format!("issue parsing date from {}: {}", key, e)))?
            .with_timezone(&Utc);

        Ok(Self::new(bucket, namespace, table, suffix, supplied_config, data_date))
    }

    pub fn default_config_location(
        bucket: &str,
        namespace: &str,
        table: &str,
        data_date: &DateTime<Utc>,
    ) -> String {
        format!(
            "s3://{}/config_{}_{}_{}.yml",
            bucket,
            namespace,
            table,
            rfc3339(data_date)
        )
    }

    /// Location the COPY reads from: a data file or a manifest.
    pub fn data_location(&self) -> String {
        format!(
            "s3://{}/{}_{}_{}.{}",
            self.bucket.name,
            self.namespace,
            self.table,
            rfc3339(&self.data_date),
            self.suffix
        )
    }

    pub fn format(&self) -> PayloadFormat {
        if self.suffix == "manifest" || self.suffix.ends_with(".manifest") {
            PayloadFormat::Manifest
        } else if self.suffix.ends_with("gz") {
            PayloadFormat::CompressedData
        } else {
            PayloadFormat::Data
        }
    }

    pub fn is_manifest(&self) -> bool {
        self.format() == PayloadFormat::Manifest
    }

    /// Whether COPY should gunzip the payload. A data file's suffix decides;
    /// a manifest says nothing about its entries, so `default` applies.
    pub fn is_compressed(&self, default: bool) -> bool {
        match self.format() {
            PayloadFormat::CompressedData => true,
            PayloadFormat::Data => false,
            PayloadFormat::Manifest => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bucket() -> Bucket {
        Bucket {
            name: "b".into(),
            region: "r".into(),
            credentials: Credentials::Role("arn:aws:iam::1:role/r".into()),
        }
    }

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 11, 10, 23, 0, 0).unwrap()
    }

    #[test]
    fn test_generated_locations() {
        let file = InputFile::new(bucket(), "s", "t", "json.gz", None, date());
        assert_eq!(file.data_location(), "s3://b/s_t_2015-11-10T23:00:00Z.json.gz");
        assert_eq!(file.config_location, "s3://b/config_s_t_2015-11-10T23:00:00Z.yml");
        assert_eq!(file.json_paths, "auto");
        assert_eq!(file.format(), PayloadFormat::CompressedData);
    }

    #[test]
    fn test_suffix_decides_compression() {
        let gz = InputFile::new(bucket(), "s", "t", "json.gz", None, date());
        assert!(gz.is_compressed(false));

        let plain = InputFile::new(bucket(), "s", "t", "json", None, date());
        assert!(!plain.is_compressed(true));

        let manifest = InputFile::new(bucket(), "s", "t", "manifest", None, date());
        assert!(manifest.is_compressed(true));
        assert!(!manifest.is_compressed(false));
    }

    #[test]
    fn test_supplied_config_wins() {
        let file = InputFile::new(bucket(), "s", "t", "json", Some("foo"), date());
        assert_eq!(file.config_location, "foo");
        assert_eq!(file.format(), PayloadFormat::Data);

        let file = InputFile::new(bucket(), "s", "t", "json", Some(""), date());
        assert_eq!(file.config_location, "s3://b/config_s_t_2015-11-10T23:00:00Z.yml");
    }

    #[test]
    fn test_manifest_suffix() {
        let file = InputFile::new(bucket(), "s", "t", "manifest", None, date());
        assert!(file.is_manifest());
        assert_eq!(file.data_location(), "s3://b/s_t_2015-11-10T23:00:00Z.manifest");
    }

    #[test]
    fn test_from_object_key() {
        let file = InputFile::from_object_key(
            bucket(),
            "mongo",
            "mongo_district_users_2015-11-10T23:00:00Z.json.gz",
            None,
        )
        .unwrap();
        assert_eq!(file.table, "district_users");
        assert_eq!(file.suffix, "json.gz");
        assert_eq!(file.data_date, date());
        assert_eq!(
            file.data_location(),
            "s3://b/mongo_district_users_2015-11-10T23:00:00Z.json.gz"
        );
    }

    #[test]
    fn test_from_object_key_rejects_bad_keys() {
        assert!(InputFile::from_object_key(bucket(), "mongo", "garbage", None).is_err());
        assert!(InputFile::from_object_key(
            bucket(),
            "mongo",
            "mongo_t_2015-11-10T23:00:00Z.yml",
            None
        )
        .is_err());
        assert!(InputFile::from_object_key(
            bucket(),
            "mongo",
            "other_t_2015-11-10T23:00:00Z.json",
            None
        )
        .is_err());
        assert!(InputFile::from_object_key(bucket(), "mongo", "mongo_t_notadate.json", None).is_err());
    }

    #[test]
    fn test_credentials_are_redacted_in_debug() {
        let creds = Credentials::KeyPair {
            access_key_id: "AKIA".into(),
            secret_access_key: "shh".into(),
        };
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("shh"));
        assert_eq!(
            creds.copy_clause(),
            "CREDENTIALS 'aws_access_key_id=AKIA;aws_secret_access_key=shh'"
        );
    }
}
