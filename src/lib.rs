//! Loads dated snapshots from object storage into a columnar warehouse.
//!
//! Each table is refreshed independently: the live table is read back from
//! the catalog, the snapshot is checked for staleness, the table is created or
//! extended, and the data is copied in, all inside one transaction.

pub mod bulk_load;
pub mod config;
pub mod ddl;
pub mod error;
pub mod input_file;
pub mod maintenance;
pub mod observability;
pub mod refresh;
pub mod schema;
pub mod schema_source;
pub mod shutdown;
pub mod staleness;
pub mod warehouse;

pub use error::{LoaderError, Result};
pub use input_file::{Bucket, Credentials, InputFile};
pub use refresh::{
    BatchReport, MaintenanceStatus, RefreshAction, RefreshCoordinator, RefreshOptions,
    RefreshOutcome,
};
pub use schema::{Column, LiveTable, TableSchema};
pub use warehouse::{SqlValue, Warehouse, WarehouseTx};
