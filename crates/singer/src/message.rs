//! The three Singer message kinds, one JSON object per line on the wire.

use crate::{Record, State, StreamSchema};
use serde::{Deserialize, Serialize};
use std::io;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "SCHEMA")]
    Schema {
        stream: String,
        schema: StreamSchema,
        key_properties: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        bookmark_properties: Option<Vec<String>>,
    },
    #[serde(rename = "RECORD")]
    Record { stream: String, record: Record },
    #[serde(rename = "STATE")]
    State { value: State },
}

/// Writes messages as newline-delimited JSON. The runtime applies
/// backpressure simply by pulling records from the stream at its own rate.
pub struct Emitter<W: io::Write> {
    out: W,
}

impl<W: io::Write> Emitter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn emit(&mut self, message: &Message) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, message)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}
