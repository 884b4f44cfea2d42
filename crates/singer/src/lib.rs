mod catalog;
mod message;
mod schema;
mod state;

pub use catalog::{
    Catalog, CatalogEntry, Inclusion, MetadataEntry, MetadataSpec, ReplicationMethod,
};
pub use message::{Emitter, Message};
pub use schema::{Format, Fragment, JsonType, StreamSchema};
pub use state::{Bookmark, State};

/// An emitted row: property name to conformed JSON value, in schema order.
pub type Record = indexmap::IndexMap<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not detect replication key for stream '{0}'")]
    MissingReplicationKey(String),
}
