mod config;
mod conform;
mod connect;
mod discover;
mod error;
mod query;
mod replication;
pub mod runtime;
mod typemap;
mod value;

pub use config::Config;
pub use conform::conform;
pub use connect::{Connector, DateStyle};
pub use discover::{build_catalog_entry, discover, ColumnDescriptor, TableDescriptor};
pub use error::{Error, Result};
pub use query::QueryStream;
pub use replication::{consume, log_based_schema, LogBasedStream, WalMessage, LSN_KEY, SLOT_NAME};
pub use typemap::{map_type, SqlType};
pub use value::{format_lsn, parse_lsn, PgInterval, PgValue};
