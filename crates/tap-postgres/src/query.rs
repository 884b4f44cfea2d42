//! Incremental query planning and the snapshot/incremental record stream.

use crate::conform::conform;
use crate::connect::Connector;
use crate::error::{Error, Result};
use crate::value::{decode_cell, is_natively_decoded};
use futures::{Stream, TryStreamExt};
use itertools::Itertools;
use singer::{CatalogEntry, Record, ReplicationMethod, State};
use std::sync::Arc;
use tokio_postgres::types::ToSql;

pub type PostProcess = Arc<dyn Fn(Record) -> Option<Record> + Send + Sync>;

/// An ordered, bounded, resumable scan of one table.
pub struct QueryStream {
    connector: Connector,
    entry: CatalogEntry,
    bookmark: Option<serde_json::Value>,
    /// Overflow-detection threshold of the enclosing runtime: when set, the
    /// query is capped at threshold+1 rows so the caller can observe that
    /// more rows were available than it is willing to process.
    pub abort_at_record_count: Option<u64>,
    post_process: Option<PostProcess>,
}

impl QueryStream {
    pub fn new(connector: Connector, entry: CatalogEntry, state: &State) -> Self {
        let bookmark = state.bookmark_value(&entry.tap_stream_id).cloned();
        Self {
            connector,
            entry,
            bookmark,
            abort_at_record_count: None,
            post_process: None,
        }
    }

    pub fn with_post_process(mut self, hook: PostProcess) -> Self {
        self.post_process = Some(hook);
        self
    }

    /// Only incremental scans promise replication-key order to the bookmark
    /// advancer.
    pub fn is_sorted(&self) -> bool {
        self.entry.effective_replication_method() == ReplicationMethod::Incremental
    }

    /// Execute the scan and yield rows lazily, in scan order.
    pub async fn records(
        self,
        context: Option<&serde_json::Value>,
    ) -> Result<impl Stream<Item = Result<Record>>> {
        if context.is_some() {
            return Err(Error::UnsupportedPartitioning(
                self.entry.tap_stream_id.clone(),
            ));
        }
        let Self {
            connector,
            entry,
            bookmark,
            abort_at_record_count,
            post_process,
        } = self;

        let columns: Vec<String> = entry.schema.properties.keys().cloned().collect();
        let plan = QueryPlan {
            table: qualified_name(&entry),
            columns: columns.iter().map(|c| (c.clone(), false)).collect(),
            replication_key: entry.effective_replication_key().map(str::to_string),
            bookmark,
            abort_at_record_count,
            max_record_count: connector.config().max_record_count,
        };

        let client = connector.connect().await?;
        // Prepare once to learn result types; columns the decoder does not
        // understand natively are re-projected as ::text.
        let mut plan = plan;
        let statement = client.prepare(&plan.render()).await?;
        for (column, (_, cast)) in statement.columns().iter().zip(plan.columns.iter_mut()) {
            *cast = !is_natively_decoded(column.type_());
        }
        let statement = client.prepare(&plan.render()).await?;

        let date_style = connector.date_style();
        let schema = entry.schema.clone();
        let params: [&(dyn ToSql + Sync); 0] = [];
        let rows = client.query_raw(&statement, params).await?;

        Ok(rows.map_err(Error::from).try_filter_map(move |row| {
            let _owned = &client;
            let result = (|| -> Result<Option<Record>> {
                let mut record = Record::new();
                for (idx, name) in columns.iter().enumerate() {
                    let value = decode_cell(&row, idx, date_style)?;
                    let conformed = match schema.properties.get(name) {
                        Some(fragment) => conform(value, fragment),
                        None => conform(value, &singer::Fragment::json_union()),
                    };
                    record.insert(name.clone(), conformed);
                }
                Ok(match &post_process {
                    Some(hook) => hook(record),
                    None => Some(record),
                })
            })();
            futures::future::ready(result)
        }))
    }
}

/// The pieces of one SELECT, renderable to SQL text.
struct QueryPlan {
    table: (String, String),
    /// Projection in schema order; the flag requests a `::text` cast.
    columns: Vec<(String, bool)>,
    replication_key: Option<String>,
    bookmark: Option<serde_json::Value>,
    abort_at_record_count: Option<u64>,
    max_record_count: Option<u64>,
}

impl QueryPlan {
    fn render(&self) -> String {
        let projection = self
            .columns
            .iter()
            .map(|(name, cast)| {
                if *cast {
                    format!("{}::text", quote_ident(name))
                } else {
                    quote_ident(name)
                }
            })
            .join(", ");
        let mut sql = format!(
            "SELECT {} FROM {}.{}",
            projection,
            quote_ident(&self.table.0),
            quote_ident(&self.table.1)
        );

        if let Some(key) = &self.replication_key {
            // The bookmark is the last-emitted value; the bound is
            // inclusive so recovery does not skip ties.
            if let Some(start) = &self.bookmark {
                sql.push_str(&format!(" WHERE {} >= {}", quote_ident(key), sql_literal(start)));
            }
            // NULLS FIRST visits null replication keys on the very first
            // pass, before any lower bound can exclude them.
            sql.push_str(&format!(" ORDER BY {} ASC NULLS FIRST", quote_ident(key)));
        }

        let limit = match (
            self.abort_at_record_count.map(|n| n + 1),
            self.max_record_count,
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }
}

pub(crate) fn qualified_name(entry: &CatalogEntry) -> (String, String) {
    let schema = entry
        .root_metadata()
        .and_then(|spec| spec.schema_name.clone())
        .unwrap_or_else(|| {
            entry
                .tap_stream_id
                .split_once('-')
                .map(|(schema, _)| schema.to_string())
                .unwrap_or_default()
        });
    (schema, entry.table_name.clone())
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a bookmark scalar as a SQL literal. The column's SQL type is not
/// known here, so the value is inlined as an untyped literal the server
/// coerces, rather than bound as a typed parameter.
fn sql_literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::Bool(true) => "TRUE".to_string(),
        serde_json::Value::Bool(false) => "FALSE".to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}
