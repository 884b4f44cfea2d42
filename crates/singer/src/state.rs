//! Per-stream bookmarks and their advancement rules.
//!
//! Sorted streams may simply overwrite the bookmark with the latest value;
//! unsorted streams (log-based replication delivers per-table commit order,
//! not LSN order) must track the maximum observed value instead.

use crate::{Error, Record};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_key_value: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub bookmarks: indexmap::IndexMap<String, Bookmark>,
}

impl State {
    pub fn bookmark_value(&self, stream_id: &str) -> Option<&Value> {
        self.bookmarks
            .get(stream_id)
            .and_then(|b| b.replication_key_value.as_ref())
    }

    /// Fold one emitted record into the stream's bookmark. Advancement
    /// without a configured replication key is a programmer error.
    pub fn advance(
        &mut self,
        stream_id: &str,
        replication_key: Option<&str>,
        record: &Record,
        is_sorted: bool,
    ) -> Result<(), Error> {
        let key =
            replication_key.ok_or_else(|| Error::MissingReplicationKey(stream_id.to_string()))?;
        let Some(latest) = record.get(key).filter(|v| !v.is_null()) else {
            return Ok(());
        };

        let bookmark = self.bookmarks.entry(stream_id.to_string()).or_default();
        bookmark.replication_key = Some(key.to_string());

        let supersedes = match (&bookmark.replication_key_value, is_sorted) {
            (None, _) | (Some(_), true) => true,
            (Some(current), false) => compare(latest, current) == Ordering::Greater,
        };
        if supersedes {
            bookmark.replication_key_value = Some(latest.clone());
        }
        Ok(())
    }
}

/// Ordering of two bookmark scalars. Integers (LSNs) compare numerically,
/// strings (ISO timestamps) lexicographically; anything incomparable is
/// treated as not-greater so a bogus value never regresses the bookmark.
fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(Ordering::Less),
        },
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => Ordering::Less,
    }
}
