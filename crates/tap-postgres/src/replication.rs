//! Log-based extraction: consume wal2json v2 messages from the replication
//! slot and translate each change into an upsert/delete record.
//!
//! The reader drives the logical-decoding SQL interface on a dedicated
//! connection: `pg_logical_slot_peek_changes` fetches a batch without
//! consuming it, and the slot is advanced only after a batch has been fully
//! yielded downstream. A crash between peek and advance therefore
//! redelivers, never loses (the surrounding sink upserts by key). The slot
//! itself is a persistent server-side entity, assumed pre-created.

use crate::connect::Connector;
use crate::error::{Error, Result};
use crate::query::qualified_name;
use crate::value::{format_lsn, parse_lsn};
use futures::Stream;
use serde::Deserialize;
use singer::{CatalogEntry, Fragment, Record, State, StreamSchema};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio_postgres::Client;

/// Name of the replication slot every log-based stream reads from. Only one
/// active reader per slot is permitted by the server.
pub const SLOT_NAME: &str = "tappostgres";

/// The virtual replication-key column of log-based streams.
pub const LSN_KEY: &str = "_sdc_lsn";

const DELETED_AT_KEY: &str = "_sdc_deleted_at";

/// The stream ends after this long without a new WAL message.
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// How long to wait between polls while the WAL is quiet.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on changes fetched per peek.
const PEEK_BATCH: i32 = 500;

const PEEK_CHANGES: &str = "\
SELECT lsn::text, data \
FROM pg_logical_slot_peek_changes($1, NULL, $2, VARIADIC $3)";

const CONFIRMED_FLUSH: &str = "\
SELECT confirmed_flush_lsn::text \
FROM pg_replication_slots WHERE slot_name = $1";

// The LSN parameter binds as text; the chained cast routes it through the
// I/O conversion to pg_lsn.
const ADVANCE_SLOT: &str = "SELECT pg_replication_slot_advance($1, $2::text::pg_lsn)";

/// One decoded WAL message: the payload text and the WAL offset it starts
/// at.
#[derive(Debug, Clone, PartialEq)]
pub struct WalMessage {
    pub data_start: u64,
    pub payload: String,
}

#[derive(Deserialize)]
struct Wal2JsonMessage {
    action: String,
    #[serde(default)]
    columns: Option<Vec<Wal2JsonColumn>>,
    #[serde(default)]
    identity: Option<Vec<Wal2JsonColumn>>,
}

#[derive(Deserialize)]
struct Wal2JsonColumn {
    name: String,
    value: serde_json::Value,
}

/// Translate one WAL message into a change record. `None` means "nothing to
/// emit": transaction boundaries, truncates, and unparseable payloads all
/// collapse to the same skip sentinel.
pub fn consume(message: &WalMessage) -> Result<Option<Record>> {
    let payload: Wal2JsonMessage = match serde_json::from_str(&message.payload) {
        Ok(payload) => payload,
        Err(_) => {
            tracing::warn!(
                payload = %message.payload,
                "WAL message payload could not be converted to JSON"
            );
            return Ok(None);
        }
    };

    let mut row = Record::new();
    match payload.action.as_str() {
        "I" | "U" => {
            for column in payload.columns.unwrap_or_default() {
                row.insert(column.name, column.value);
            }
            row.insert(DELETED_AT_KEY.to_string(), serde_json::Value::Null);
            row.insert(LSN_KEY.to_string(), message.data_start.into());
        }
        "D" => {
            // Only the replica-identity columns travel with a delete.
            for column in payload.identity.unwrap_or_default() {
                row.insert(column.name, column.value);
            }
            let deleted_at = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
            row.insert(DELETED_AT_KEY.to_string(), deleted_at.into());
            row.insert(LSN_KEY.to_string(), message.data_start.into());
        }
        "T" => {
            tracing::debug!(payload = %message.payload, "skipping truncate message");
            return Ok(None);
        }
        "B" | "C" => {
            tracing::debug!(
                payload = %message.payload,
                "skipping transaction boundary message"
            );
            return Ok(None);
        }
        other => {
            return Err(Error::UnknownWalAction {
                action: other.to_string(),
                payload: message.payload.clone(),
            });
        }
    }
    Ok(Some(row))
}

/// The schema a log-based stream advertises: every column may be absent on
/// deletes, so every property is nullable, `required` is dropped, and the
/// two system columns ride along.
pub fn log_based_schema(schema: &StreamSchema) -> StreamSchema {
    let mut out = schema.clone();
    out.required.clear();
    for fragment in out.properties.values_mut() {
        fragment.add_null();
    }
    let mut deleted_at = Fragment::string();
    deleted_at.add_null();
    out.properties.insert(DELETED_AT_KEY.to_string(), deleted_at);
    let mut lsn = Fragment::integer();
    lsn.add_null();
    out.properties.insert(LSN_KEY.to_string(), lsn);
    out
}

/// Buffered reader over the slot's change stream.
struct SlotReader {
    client: Client,
    /// wal2json `add-tables` filter, `schema.table`.
    table: String,
    /// Highest LSN handed to the caller; everything at or below it has been
    /// yielded and may be acknowledged.
    delivered: u64,
    /// Slot position we have advanced to.
    acked: u64,
    pending: VecDeque<WalMessage>,
    /// Monotonic idle clock, reset whenever a message arrives.
    last_message_at: Instant,
}

impl SlotReader {
    async fn open(connector: &Connector, table: String, start_lsn: u64) -> Result<Self> {
        let client = connector.connect_replication().await?;
        let mut reader = SlotReader {
            client,
            table,
            delivered: start_lsn,
            acked: 0,
            pending: VecDeque::new(),
            last_message_at: Instant::now(),
        };
        // Flush logs from the previous sync. The bookmark LSN was emitted
        // by that run, so acknowledging through it cannot lose data.
        reader.send_feedback(start_lsn).await?;
        Ok(reader)
    }

    /// Advance the slot to `flush_lsn`, never backwards.
    async fn send_feedback(&mut self, flush_lsn: u64) -> Result<()> {
        let confirmed = self.confirmed_flush_lsn().await?;
        if flush_lsn > confirmed {
            self.client
                .execute(ADVANCE_SLOT, &[&SLOT_NAME, &format_lsn(flush_lsn)])
                .await?;
            tracing::debug!(lsn = %format_lsn(flush_lsn), "acknowledged slot progress");
        }
        self.acked = flush_lsn.max(confirmed);
        Ok(())
    }

    async fn confirmed_flush_lsn(&self) -> Result<u64> {
        let row = self
            .client
            .query_opt(CONFIRMED_FLUSH, &[&SLOT_NAME])
            .await?
            .ok_or_else(|| Error::MissingSlot(SLOT_NAME.to_string()))?;
        let text: Option<String> = row.get(0);
        Ok(match text {
            Some(text) => parse_lsn(&text)?,
            None => 0,
        })
    }

    /// Next buffered message, refilling from the server when the buffer is
    /// empty. Returns `None` when the WAL is currently quiet.
    async fn read_message(&mut self) -> Result<Option<WalMessage>> {
        if self.pending.is_empty() {
            // The previous batch has been fully yielded; acknowledge it
            // before peeking the next one.
            if self.delivered > self.acked {
                let delivered = self.delivered;
                self.send_feedback(delivered).await?;
            }
            let options: Vec<String> = vec![
                "format-version".to_string(),
                "2".to_string(),
                "include-transaction".to_string(),
                "false".to_string(),
                "add-tables".to_string(),
                self.table.clone(),
            ];
            let rows = self
                .client
                .query(PEEK_CHANGES, &[&SLOT_NAME, &PEEK_BATCH, &options])
                .await?;
            for row in rows {
                let lsn: String = row.get(0);
                let lsn = parse_lsn(&lsn)?;
                if lsn <= self.delivered {
                    continue;
                }
                self.pending.push_back(WalMessage {
                    data_start: lsn,
                    payload: row.get(1),
                });
            }
        }
        Ok(self.pending.pop_front().map(|message| {
            self.delivered = self.delivered.max(message.data_start);
            self.last_message_at = Instant::now();
            message
        }))
    }
}

/// The log-based stream over one table.
pub struct LogBasedStream {
    connector: Connector,
    entry: CatalogEntry,
    start_lsn: u64,
}

impl LogBasedStream {
    pub fn new(connector: Connector, entry: CatalogEntry, state: &State) -> Self {
        let start_lsn = state
            .bookmark_value(&entry.tap_stream_id)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Self {
            connector,
            entry,
            start_lsn,
        }
    }

    pub fn replication_key(&self) -> &'static str {
        LSN_KEY
    }

    /// WAL delivery is per-table commit order, not LSN order; the bookmark
    /// advancer must track the maximum observed LSN.
    pub fn is_sorted(&self) -> bool {
        false
    }

    pub fn schema(&self) -> StreamSchema {
        log_based_schema(&self.entry.schema)
    }

    /// Consume the slot until the WAL stays quiet for one status interval.
    pub async fn records(
        self,
        context: Option<&serde_json::Value>,
    ) -> Result<impl Stream<Item = Result<Record>>> {
        if context.is_some() {
            return Err(Error::UnsupportedPartitioning(
                self.entry.tap_stream_id.clone(),
            ));
        }
        let (schema, table) = qualified_name(&self.entry);
        let table = format!("{schema}.{table}");
        tracing::info!(
            table = %table,
            start_lsn = %format_lsn(self.start_lsn),
            "starting log-based replication"
        );
        let reader = SlotReader::open(&self.connector, table, self.start_lsn).await?;

        Ok(futures::stream::try_unfold(reader, |mut reader| async move {
            loop {
                if let Some(message) = reader.read_message().await? {
                    match consume(&message)? {
                        Some(row) => return Ok(Some((row, reader))),
                        None => continue,
                    }
                }
                let idle = reader.last_message_at.elapsed();
                if idle >= STATUS_INTERVAL {
                    tracing::info!("WAL idle, ending replication run");
                    return Ok(None);
                }
                tokio::time::sleep((STATUS_INTERVAL - idle).min(POLL_INTERVAL)).await;
            }
        }))
    }
}
