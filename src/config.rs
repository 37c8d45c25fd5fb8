//! Run configuration
//!
//! Flags and environment are read once at start-up and validated into an
//! immutable [`RunConfig`]. Nothing downstream reads the environment.

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::{Parser, ValueEnum};

use crate::error::{LoaderError, Result};
use crate::input_file::{Bucket, Credentials, InputFile};
use crate::refresh::RefreshOptions;
use crate::staleness::{Granularity, LoadWindow};
use crate::warehouse::PoolSettings;

/// How tables are refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Range delete, additive alters and COPY in one transaction
    Incremental,
    /// Load a temp table and swap its rows in
    Swap,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "s3-to-warehouse")]
#[command(about = "Loads dated snapshots from S3 into the warehouse, creating or evolving tables as needed")]
pub struct Args {
    /// Namespace (warehouse schema) of the tables
    #[arg(long, default_value = "mongo")]
    pub schema: String,

    /// Comma separated tables to load
    #[arg(long, value_delimiter = ',', required = true)]
    pub tables: Vec<String>,

    /// Bucket holding the snapshots
    #[arg(long, default_value = "metrics")]
    pub bucket: String,

    /// Delete every row before loading (dimension tables)
    #[arg(long)]
    pub truncate: bool,

    /// Load even when the warehouse already has data for the period
    #[arg(long)]
    pub force: bool,

    /// Snapshot date, RFC3339
    #[arg(long)]
    pub date: String,

    /// Table config location, overriding the one next to the snapshot
    #[arg(long)]
    pub config: Option<String>,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub gzip: bool,

    /// Field delimiter; empty loads JSON
    #[arg(long, default_value = "")]
    pub delimiter: String,

    /// hour, day or stream
    #[arg(long, default_value = "day")]
    pub granularity: String,

    /// Start of the load window for stream granularity (YYYY-MM-DDTHH:MM:SS)
    #[arg(long)]
    pub stream_start: Option<String>,

    /// End of the load window for stream granularity (YYYY-MM-DDTHH:MM:SS)
    #[arg(long)]
    pub stream_end: Option<String>,

    /// Zone the warehouse's zone-less timestamps are in
    #[arg(long, default_value = "UTC")]
    pub timezone: String,

    /// Data file suffix, e.g. json.gz or manifest
    #[arg(long, default_value = "json.gz")]
    pub suffix: String,

    /// Bucket region
    #[arg(long, default_value = "us-east-1")]
    pub region: String,

    #[arg(long, value_enum, default_value_t = Strategy::Incremental)]
    pub strategy: Strategy,

    /// Tables refreshed at the same time
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Leave the credentials clause out of COPY
    #[arg(long)]
    pub no_credentials: bool,
}

/// Where to send vacuum requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceSettings {
    pub admin_url: String,
    pub worker: String,
}

/// Values taken from the environment.
#[derive(Clone)]
pub struct EnvSettings {
    pub warehouse: PoolSettings,
    pub credentials: Credentials,
    pub maintenance: Option<MaintenanceSettings>,
    pub unordered_namespaces: Vec<String>,
}

impl EnvSettings {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| LoaderError::Config(format!("{} must be set", key)))
        };

        let port = match get("REDSHIFT_PORT") {
            Some(port) => port
                .parse::<u16>()
                .map_err(|e| LoaderError::Config(format!("bad REDSHIFT_PORT '{}': {}", port, e)))?,
            None => 5439,
        };

        let warehouse = PoolSettings {
            host: get("REDSHIFT_HOST").unwrap_or_else(|| "localhost".to_string()),
            port,
            database: required("REDSHIFT_DB")?,
            user: required("REDSHIFT_USER")?,
            password: required("REDSHIFT_PASSWORD")?,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(60),
        };

        let credentials = match (
            get("REDSHIFT_ROLE_ARN"),
            get("AWS_ACCESS_KEY_ID"),
            get("AWS_SECRET_ACCESS_KEY"),
        ) {
            (Some(arn), _, _) => Credentials::Role(arn),
            (None, Some(access_key_id), Some(secret_access_key)) => Credentials::KeyPair {
                access_key_id,
                secret_access_key,
            },
            _ => {
                return Err(LoaderError::Config(
                    "REDSHIFT_ROLE_ARN must be set".to_string(),
                ))
            }
        };

        let maintenance = match (get("GEARMAN_ADMIN_URL"), get("VACUUM_WORKER")) {
            (Some(admin_url), Some(worker)) => Some(MaintenanceSettings { admin_url, worker }),
            _ => None,
        };

        let unordered_namespaces = get("UNORDERED_SCHEMAS")
            .map(|v| split_list(&v))
            .unwrap_or_else(|| vec!["mongo".to_string()]);

        Ok(Self {
            warehouse,
            credentials,
            maintenance,
            unordered_namespaces,
        })
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parses the delimiter flag. Empty means JSON; `\t` and `tab` mean a tab.
pub fn parse_delimiter(value: &str) -> Result<Option<char>> {
    match value {
        "" => Ok(None),
        "\\t" | "tab" => Ok(Some('\t')),
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Some(c)),
                _ => Err(LoaderError::Config(format!(
                    "delimiter must be a single character, got '{}'",
                    other
                ))),
            }
        }
    }
}

pub fn parse_timezone(value: &str) -> Result<Tz> {
    value
        .parse::<Tz>()
        .map_err(|e| LoaderError::Config(format!("unable to load timezone '{}': {}", value, e)))
}

pub fn parse_data_date(value: &str) -> Result<DateTime<Utc>> {
    if value.is_empty() {
        return Err(LoaderError::Config("No date provided".to_string()));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| LoaderError::Config(format!("issue parsing date: {}: {}", value, e)))
}

/// Everything one run needs, validated.
#[derive(Clone)]
pub struct RunConfig {
    pub namespace: String,
    pub tables: Vec<String>,
    pub bucket: Bucket,
    pub data_date: DateTime<Utc>,
    pub config_location: Option<String>,
    pub suffix: String,
    pub strategy: Strategy,
    pub concurrency: usize,
    pub refresh: RefreshOptions,
    pub warehouse: PoolSettings,
    pub maintenance: Option<MaintenanceSettings>,
}

impl RunConfig {
    pub fn build(args: Args, env: EnvSettings) -> Result<Self> {
        let tables: Vec<String> = args
            .tables
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        if tables.is_empty() {
            return Err(LoaderError::Config("no tables given".to_string()));
        }
        if args.concurrency == 0 {
            return Err(LoaderError::Config("concurrency must be at least 1".to_string()));
        }

        let data_date = parse_data_date(&args.date)?;
        let granularity: Granularity = args.granularity.parse()?;
        let timezone = parse_timezone(&args.timezone)?;
        let delimiter = parse_delimiter(&args.delimiter)?;

        let stream_window = match (&args.stream_start, &args.stream_end) {
            (Some(start), Some(end)) => Some(LoadWindow::parse_stream(start, end)?),
            (None, None) => None,
            _ => {
                return Err(LoaderError::Config(
                    "stream start and end must be given together".to_string(),
                ))
            }
        };
        if granularity == Granularity::Stream && stream_window.is_none() {
            return Err(LoaderError::Config(
                "stream granularity requires --stream-start and --stream-end".to_string(),
            ));
        }

        let mut warehouse = env.warehouse;
        warehouse.max_connections = u32::try_from(args.concurrency)
            .unwrap_or(u32::MAX)
            .saturating_add(1);

        Ok(Self {
            namespace: args.schema,
            tables,
            bucket: Bucket {
                name: args.bucket,
                region: args.region,
                credentials: env.credentials,
            },
            data_date,
            config_location: args.config.filter(|c| !c.is_empty()),
            suffix: args.suffix,
            strategy: args.strategy,
            concurrency: args.concurrency,
            refresh: RefreshOptions {
                truncate: args.truncate,
                force: args.force,
                granularity,
                timezone,
                stream_window,
                delimiter,
                gzip: args.gzip,
                use_credentials: !args.no_credentials,
                unordered_namespaces: env.unordered_namespaces,
            },
            warehouse,
            maintenance: env.maintenance,
        })
    }

    /// One descriptor per requested table.
    pub fn input_files(&self) -> Vec<InputFile> {
        self.tables
            .iter()
            .map(|table| {
                InputFile::new(
                    self.bucket.clone(),
                    &self.namespace,
                    table,
                    &self.suffix,
                    self.config_location.as_deref(),
                    self.data_date,
                )
            })
            .collect()
    }
}

/// Flags of the full-snapshot loader.
#[derive(Parser, Debug, Clone)]
#[command(name = "refresh_snapshots")]
#[command(about = "Replaces whole tables from full snapshot dumps in S3")]
pub struct SnapshotArgs {
    /// Namespace of the tables to replace
    #[arg(long, default_value = "public")]
    pub schema: String,

    /// Comma separated tables to replace
    #[arg(long, value_delimiter = ',', required = true)]
    pub tables: Vec<String>,

    #[arg(long)]
    pub bucket: String,

    /// Key prefix of the dumps; each table reads `<prefix><table>.txt.gz`
    #[arg(long, default_value = "")]
    pub prefix: String,

    #[arg(long, default_value = "|")]
    pub delimiter: String,

    #[arg(long, default_value = "us-east-1")]
    pub region: String,

    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    #[arg(long)]
    pub no_credentials: bool,
}

#[derive(Clone)]
pub struct SnapshotConfig {
    pub namespace: String,
    pub tables: Vec<String>,
    pub bucket: Bucket,
    pub prefix: String,
    pub delimiter: char,
    pub use_credentials: bool,
    pub concurrency: usize,
    pub warehouse: PoolSettings,
    pub maintenance: Option<MaintenanceSettings>,
}

impl SnapshotConfig {
    pub fn build(args: SnapshotArgs, env: EnvSettings) -> Result<Self> {
        let tables: Vec<String> = args
            .tables
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        if tables.is_empty() {
            return Err(LoaderError::Config("no tables given".to_string()));
        }
        let delimiter = parse_delimiter(&args.delimiter)?.ok_or_else(|| {
            LoaderError::Config("snapshot dumps need a delimiter".to_string())
        })?;

        let mut warehouse = env.warehouse;
        warehouse.max_connections = u32::try_from(args.concurrency.max(1))
            .unwrap_or(u32::MAX)
            .saturating_add(1);

        Ok(Self {
            namespace: args.schema,
            tables,
            bucket: Bucket {
                name: args.bucket,
                region: args.region,
                credentials: env.credentials,
            },
            prefix: args.prefix,
            delimiter,
            use_credentials: !args.no_credentials,
            concurrency: args.concurrency.max(1),
            warehouse,
            maintenance: env.maintenance,
        })
    }
}
