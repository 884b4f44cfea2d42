pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("stream '{0}' does not support partitioning")]
    UnsupportedPartitioning(String),
    #[error("WAL message with unknown action '{action}' could not be processed: {payload}")]
    UnknownWalAction { action: String, payload: String },
    #[error("invalid LSN '{0}'")]
    InvalidLsn(String),
    #[error("replication slot '{0}' does not exist")]
    MissingSlot(String),
    #[error(transparent)]
    State(#[from] singer::Error),
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
