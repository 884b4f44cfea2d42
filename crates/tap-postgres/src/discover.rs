//! Catalog discovery: enumerate schemas, tables and columns, detect key
//! candidates, and assemble one catalog entry per stream.

use crate::connect::Connector;
use crate::error::Result;
use crate::typemap::{map_type, SqlType};
use singer::{CatalogEntry, ReplicationMethod, StreamSchema};
use tokio_postgres::Client;

/// One column as inspected from the live catalog. Immutable for the
/// duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

/// Everything discovery learns about one table or view.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    pub schema: String,
    pub name: String,
    pub is_view: bool,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: Vec<String>,
    /// Unique index column lists; an entry is `None` where the index term
    /// is an expression rather than a plain column.
    pub unique_indexes: Vec<Vec<Option<String>>>,
}

const LIST_SCHEMAS: &str = "\
SELECT nspname FROM pg_catalog.pg_namespace \
WHERE nspname NOT IN ('pg_catalog', 'information_schema') \
  AND nspname NOT LIKE 'pg_toast%' \
  AND nspname NOT LIKE 'pg_temp%' \
ORDER BY nspname";

const LIST_RELATIONS: &str = "\
SELECT c.relname, c.relkind::text \
FROM pg_catalog.pg_class c \
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
WHERE n.nspname = $1 AND c.relkind IN ('r', 'p', 'v', 'm') \
ORDER BY c.relname";

// information_schema columns are domains; the casts expose base types the
// driver can decode.
const LIST_COLUMNS: &str = "\
SELECT column_name::text, data_type::text, udt_name::text, \
       (is_nullable = 'YES')::bool, character_maximum_length::int4 \
FROM information_schema.columns \
WHERE table_schema = $1 AND table_name = $2 \
ORDER BY ordinal_position";

const LIST_PRIMARY_KEY: &str = "\
SELECT a.attname \
FROM pg_constraint c \
JOIN pg_class t ON t.oid = c.conrelid \
JOIN pg_namespace n ON n.oid = t.relnamespace \
JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = ANY(c.conkey) \
WHERE c.contype = 'p' AND n.nspname = $1 AND t.relname = $2 \
ORDER BY array_position(c.conkey, a.attnum)";

const LIST_UNIQUE_INDEXES: &str = "\
SELECT i.relname, array_agg(a.attname ORDER BY k.ord) \
FROM pg_index ix \
JOIN pg_class t ON t.oid = ix.indrelid \
JOIN pg_class i ON i.oid = ix.indexrelid \
JOIN pg_namespace n ON n.oid = t.relnamespace \
CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) \
LEFT JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
WHERE n.nspname = $1 AND t.relname = $2 AND ix.indisunique AND NOT ix.indisprimary \
GROUP BY i.relname \
ORDER BY i.relname";

/// Inspect the database once and produce a catalog entry per table or view.
pub async fn discover(connector: &Connector) -> Result<Vec<CatalogEntry>> {
    let client = connector.connect().await?;
    let config = connector.config();

    let schemas: Vec<String> = if config.filter_schemas.is_empty() {
        client
            .query(LIST_SCHEMAS, &[])
            .await?
            .into_iter()
            .map(|row| row.get(0))
            .collect()
    } else {
        config.filter_schemas.clone()
    };

    let mut entries = Vec::new();
    for schema in &schemas {
        for row in client.query(LIST_RELATIONS, &[&schema]).await? {
            let table: String = row.get(0);
            let relkind: String = row.get(1);
            let is_view = matches!(relkind.as_str(), "v" | "m");
            let descriptor = inspect_table(&client, schema, &table, is_view).await?;
            entries.push(build_catalog_entry(&descriptor, config.dates_as_string));
        }
    }
    tracing::info!(
        schemas = schemas.len(),
        streams = entries.len(),
        "discovery complete"
    );
    Ok(entries)
}

async fn inspect_table(
    client: &Client,
    schema: &str,
    table: &str,
    is_view: bool,
) -> Result<TableDescriptor> {
    let mut columns = Vec::new();
    for row in client.query(LIST_COLUMNS, &[&schema, &table]).await? {
        let name: String = row.get(0);
        let data_type: String = row.get(1);
        let udt_name: String = row.get(2);
        let nullable: bool = row.get(3);
        let length: Option<i32> = row.get(4);
        let length = length.and_then(|l| u32::try_from(l).ok());

        let sql_type = if data_type == "ARRAY" {
            let element = udt_name.strip_prefix('_').unwrap_or(&udt_name);
            SqlType::array_of(SqlType::named(element))
        } else {
            SqlType::with_length(&data_type, length)
        };
        columns.push(ColumnDescriptor {
            name,
            sql_type,
            nullable,
        });
    }

    let primary_key = client
        .query(LIST_PRIMARY_KEY, &[&schema, &table])
        .await?
        .into_iter()
        .map(|row| row.get(0))
        .collect();

    let unique_indexes = client
        .query(LIST_UNIQUE_INDEXES, &[&schema, &table])
        .await?
        .into_iter()
        .map(|row| row.get(1))
        .collect();

    Ok(TableDescriptor {
        schema: schema.to_string(),
        name: table.to_string(),
        is_view,
        columns,
        primary_key,
        unique_indexes,
    })
}

/// Assemble the catalog entry for one inspected table. Key properties are
/// the first of: declared primary key, then any unique index's columns.
pub fn build_catalog_entry(table: &TableDescriptor, dates_as_string: bool) -> CatalogEntry {
    let mut possible_pks: Vec<Vec<String>> = Vec::new();
    if !table.primary_key.is_empty() {
        possible_pks.push(table.primary_key.clone());
    }
    for index in &table.unique_indexes {
        // Expression terms reflect as null column names; such an index
        // cannot serve as a key.
        if index.iter().all(|col| col.is_some()) {
            possible_pks.push(index.iter().flatten().cloned().collect());
        }
    }
    let key_properties = possible_pks.into_iter().next();
    let keys: &[String] = key_properties.as_deref().unwrap_or(&[]);

    let mut properties = indexmap::IndexMap::new();
    let mut required = Vec::new();
    for column in &table.columns {
        let mut fragment = map_type(&column.sql_type, dates_as_string);
        if column.nullable {
            fragment.add_null();
        }
        if keys.contains(&column.name) {
            required.push(column.name.clone());
        }
        properties.insert(column.name.clone(), fragment);
    }
    let schema = StreamSchema::new(properties, required);

    let stream_id = format!("{}-{}", table.schema, table.name);
    let metadata = CatalogEntry::standard_metadata(
        &table.schema,
        &schema,
        ReplicationMethod::FullTable,
        key_properties.as_deref(),
        table.is_view,
    );
    CatalogEntry {
        tap_stream_id: stream_id.clone(),
        stream: stream_id,
        table_name: table.name.clone(),
        schema,
        key_properties,
        is_view: table.is_view,
        replication_method: ReplicationMethod::FullTable,
        replication_key: None,
        database: None,
        row_count: None,
        metadata,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn widget_table() -> TableDescriptor {
        TableDescriptor {
            schema: "s".to_string(),
            name: "t".to_string(),
            is_view: false,
            columns: vec![
                ColumnDescriptor {
                    name: "id".to_string(),
                    sql_type: SqlType::named("integer"),
                    nullable: false,
                },
                ColumnDescriptor {
                    name: "u".to_string(),
                    sql_type: SqlType::with_length("text", None),
                    nullable: true,
                },
                ColumnDescriptor {
                    name: "data".to_string(),
                    sql_type: SqlType::named("jsonb"),
                    nullable: true,
                },
            ],
            primary_key: vec!["id".to_string()],
            unique_indexes: vec![vec![Some("u".to_string())]],
        }
    }

    #[test]
    fn pk_wins_over_unique_index() {
        let entry = build_catalog_entry(&widget_table(), false);
        assert_eq!(entry.tap_stream_id, "s-t");
        assert_eq!(entry.key_properties, Some(vec!["id".to_string()]));
        assert_eq!(entry.replication_method, ReplicationMethod::FullTable);
        assert_eq!(entry.replication_key, None);
        assert_eq!(entry.schema.required, vec!["id".to_string()]);
        assert_eq!(
            serde_json::to_value(&entry.schema.properties["data"]).unwrap(),
            json!({"type": ["string", "number", "integer", "array", "object", "boolean", "null"]})
        );
    }

    #[test]
    fn unique_index_backfills_missing_pk() {
        let mut table = widget_table();
        table.primary_key.clear();
        let entry = build_catalog_entry(&table, false);
        assert_eq!(entry.key_properties, Some(vec!["u".to_string()]));
    }

    #[test]
    fn expression_indexes_are_skipped() {
        let mut table = widget_table();
        table.primary_key.clear();
        table.unique_indexes = vec![
            vec![Some("lower".to_string()), None],
            vec![Some("u".to_string())],
        ];
        let entry = build_catalog_entry(&table, false);
        assert_eq!(entry.key_properties, Some(vec!["u".to_string()]));
    }

    #[test]
    fn keyless_table_has_no_required() {
        let mut table = widget_table();
        table.primary_key.clear();
        table.unique_indexes.clear();
        let entry = build_catalog_entry(&table, false);
        assert_eq!(entry.key_properties, None);
        assert!(entry.schema.required.is_empty());
    }

    #[test]
    fn nullable_columns_pick_up_null() {
        let entry = build_catalog_entry(&widget_table(), false);
        assert_eq!(
            serde_json::to_value(&entry.schema.properties["id"]).unwrap(),
            json!({"type": "integer"})
        );
        assert_eq!(
            serde_json::to_value(&entry.schema.properties["u"]).unwrap(),
            json!({"type": ["string", "null"]})
        );
    }
}
