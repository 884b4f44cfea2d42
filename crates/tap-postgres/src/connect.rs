//! Connection lifecycle. Each stream owns the connection it opens and the
//! connection's driver task ends when the client side is dropped.

use crate::config::Config;
use crate::error::Result;
use std::sync::Arc;
use tokio_postgres::{Client, NoTls};

/// How temporal columns are decoded. Decided once when the connector is
/// built, standing in for the OID-level cast registration the tap performs
/// against the driver; it lives exactly as long as the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateStyle {
    Native,
    /// OIDs 1082/1114/1184 and array variants 1182/1115/1188 are rendered
    /// as their text form, preserving `infinity` / `-infinity`.
    Text,
}

#[derive(Clone)]
pub struct Connector {
    config: Arc<Config>,
    date_style: DateStyle,
}

impl Connector {
    pub fn new(config: Config) -> Self {
        let date_style = if config.dates_as_string {
            DateStyle::Text
        } else {
            DateStyle::Native
        };
        Self {
            config: Arc::new(config),
            date_style,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn date_style(&self) -> DateStyle {
        self.date_style
    }

    /// Open a connection for discovery or query streaming.
    pub async fn connect(&self) -> Result<Client> {
        spawn_connection(&self.config.connection_string()).await
    }

    /// Open the dedicated connection used by the log-based stream. It never
    /// goes through any shared pool: slot handling must not interleave with
    /// unrelated queries.
    pub async fn connect_replication(&self) -> Result<Client> {
        spawn_connection(&self.config.replication_connection_string()).await
    }
}

async fn spawn_connection(conninfo: &str) -> Result<Client> {
    let (client, connection) = tokio_postgres::connect(conninfo, NoTls).await?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            tracing::error!(error = %err, "postgres connection error");
        }
    });
    Ok(client)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn date_style_follows_config() {
        let base = Config {
            host: "h".to_string(),
            port: 5432,
            user: "u".to_string(),
            password: "p".to_string(),
            database: "d".to_string(),
            dates_as_string: false,
            filter_schemas: vec![],
            max_record_count: None,
            application_name: "tap_postgres".to_string(),
        };
        assert_eq!(Connector::new(base.clone()).date_style(), DateStyle::Native);
        let textual = Config {
            dates_as_string: true,
            ..base
        };
        assert_eq!(Connector::new(textual).date_style(), DateStyle::Text);
    }
}
