//! The thin Singer runtime around the streams: select streams from the
//! catalog, emit SCHEMA / RECORD / STATE, and advance bookmarks.

use crate::connect::Connector;
use crate::query::QueryStream;
use crate::replication::{LogBasedStream, LSN_KEY};
use anyhow::Context;
use futures::TryStreamExt;
use singer::{Catalog, CatalogEntry, Emitter, Message, ReplicationMethod, State, StreamSchema};
use std::io;

/// Records between incremental STATE flushes.
const STATE_INTERVAL: usize = 1000;

/// Run every selected stream to exhaustion. A failing stream aborts only
/// itself; the remaining streams still run, and the final state reflects
/// whatever progress was made.
pub async fn sync<W: io::Write>(
    connector: &Connector,
    catalog: &Catalog,
    mut state: State,
    emitter: &mut Emitter<W>,
) -> anyhow::Result<State> {
    for entry in &catalog.streams {
        if !entry.is_selected() {
            tracing::debug!(stream = %entry.tap_stream_id, "stream not selected, skipping");
            continue;
        }
        if let Err(err) = sync_stream(connector, entry, &mut state, emitter).await {
            tracing::error!(
                stream = %entry.tap_stream_id,
                error = %err,
                "stream failed; continuing with remaining streams"
            );
        }
    }
    emitter.emit(&Message::State {
        value: state.clone(),
    })?;
    Ok(state)
}

async fn sync_stream<W: io::Write>(
    connector: &Connector,
    entry: &CatalogEntry,
    state: &mut State,
    emitter: &mut Emitter<W>,
) -> anyhow::Result<()> {
    match entry.effective_replication_method() {
        ReplicationMethod::LogBased => {
            let stream = LogBasedStream::new(connector.clone(), entry.clone(), state);
            let schema = stream.schema();
            let sorted = stream.is_sorted();
            emit_schema(emitter, entry, schema, Some(LSN_KEY))?;
            let records = stream
                .records(None)
                .await
                .context("starting log-based stream")?;
            drain(records, entry, Some(LSN_KEY), sorted, state, emitter).await
        }
        ReplicationMethod::FullTable | ReplicationMethod::Incremental => {
            let stream = QueryStream::new(connector.clone(), entry.clone(), state);
            let sorted = stream.is_sorted();
            let replication_key = entry.effective_replication_key().map(str::to_string);
            emit_schema(emitter, entry, entry.schema.clone(), replication_key.as_deref())?;
            let records = stream.records(None).await.context("starting table scan")?;
            drain(
                records,
                entry,
                replication_key.as_deref(),
                sorted,
                state,
                emitter,
            )
            .await
        }
    }
}

fn emit_schema<W: io::Write>(
    emitter: &mut Emitter<W>,
    entry: &CatalogEntry,
    schema: StreamSchema,
    replication_key: Option<&str>,
) -> anyhow::Result<()> {
    emitter.emit(&Message::Schema {
        stream: entry.tap_stream_id.clone(),
        schema,
        key_properties: entry.key_properties.clone().unwrap_or_default(),
        bookmark_properties: replication_key.map(|key| vec![key.to_string()]),
    })?;
    Ok(())
}

async fn drain<W: io::Write>(
    records: impl futures::Stream<Item = crate::Result<singer::Record>>,
    entry: &CatalogEntry,
    replication_key: Option<&str>,
    sorted: bool,
    state: &mut State,
    emitter: &mut Emitter<W>,
) -> anyhow::Result<()> {
    futures::pin_mut!(records);
    let mut count = 0usize;
    while let Some(record) = records.try_next().await? {
        emitter.emit(&Message::Record {
            stream: entry.tap_stream_id.clone(),
            record: record.clone(),
        })?;
        if replication_key.is_some() {
            state.advance(&entry.tap_stream_id, replication_key, &record, sorted)?;
        }
        count += 1;
        if count % STATE_INTERVAL == 0 {
            emitter.emit(&Message::State {
                value: state.clone(),
            })?;
        }
    }
    // Checkpoint the stream's tail progress before moving on to the next
    // stream.
    emitter.emit(&Message::State {
        value: state.clone(),
    })?;
    tracing::info!(stream = %entry.tap_stream_id, records = count, "stream complete");
    Ok(())
}
