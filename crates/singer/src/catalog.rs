//! Catalog entries and the standard stream metadata that rides along with
//! them. One entry describes one discoverable stream; the runtime (or the
//! user, editing the catalog file) flips selection and replication settings
//! through the metadata entries.

use crate::schema::StreamSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMethod {
    FullTable,
    Incremental,
    LogBased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Inclusion {
    Automatic,
    Available,
    Unsupported,
}

/// One metadata record, addressed by its breadcrumb: the empty breadcrumb
/// is the stream itself, `["properties", <name>]` addresses a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub breadcrumb: Vec<String>,
    pub metadata: MetadataSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MetadataSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inclusion: Option<Inclusion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_by_default: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_method: Option<ReplicationMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_key_properties: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_replication_keys: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_view: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub tap_stream_id: String,
    pub stream: String,
    pub table_name: String,
    pub schema: StreamSchema,
    #[serde(default)]
    pub key_properties: Option<Vec<String>>,
    #[serde(default)]
    pub is_view: bool,
    pub replication_method: ReplicationMethod,
    #[serde(default)]
    pub replication_key: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
}

impl CatalogEntry {
    /// Build the standard metadata block: one root entry describing the
    /// stream, one entry per property with its inclusion.
    pub fn standard_metadata(
        schema_name: &str,
        schema: &StreamSchema,
        replication_method: ReplicationMethod,
        key_properties: Option<&[String]>,
        is_view: bool,
    ) -> Vec<MetadataEntry> {
        let mut entries = vec![MetadataEntry {
            breadcrumb: vec![],
            metadata: MetadataSpec {
                inclusion: Some(Inclusion::Available),
                selected_by_default: Some(false),
                replication_method: Some(replication_method),
                schema_name: Some(schema_name.to_string()),
                table_key_properties: Some(key_properties.unwrap_or(&[]).to_vec()),
                is_view: Some(is_view),
                ..Default::default()
            },
        }];
        for name in schema.properties.keys() {
            let automatic = key_properties
                .map(|keys| keys.iter().any(|k| k == name))
                .unwrap_or(false);
            entries.push(MetadataEntry {
                breadcrumb: vec!["properties".to_string(), name.clone()],
                metadata: MetadataSpec {
                    inclusion: Some(if automatic {
                        Inclusion::Automatic
                    } else {
                        Inclusion::Available
                    }),
                    ..Default::default()
                },
            });
        }
        entries
    }

    pub fn root_metadata(&self) -> Option<&MetadataSpec> {
        self.metadata
            .iter()
            .find(|entry| entry.breadcrumb.is_empty())
            .map(|entry| &entry.metadata)
    }

    pub fn is_selected(&self) -> bool {
        match self.root_metadata() {
            Some(spec) => spec
                .selected
                .or(spec.selected_by_default)
                .unwrap_or(false),
            None => false,
        }
    }

    /// The catalog file may upgrade the replication method through the root
    /// metadata; that override wins over the discovered entry field.
    pub fn effective_replication_method(&self) -> ReplicationMethod {
        self.root_metadata()
            .and_then(|spec| spec.replication_method)
            .unwrap_or(self.replication_method)
    }

    pub fn effective_replication_key(&self) -> Option<&str> {
        self.root_metadata()
            .and_then(|spec| spec.replication_key.as_deref())
            .or(self.replication_key.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<CatalogEntry>,
}
