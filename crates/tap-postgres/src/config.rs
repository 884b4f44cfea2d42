//! Tap settings. Parsed once from the `--config` JSON file; streams receive
//! an immutable `Arc` snapshot at construction and never observe later
//! mutation.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Database server host.
    pub host: String,
    /// Database server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// User to authenticate as.
    pub user: String,
    /// Password for the user.
    pub password: String,
    /// Database to extract from.
    pub database: String,
    /// Read date, timestamp and timestamptz columns (and their array
    /// variants) as their textual form instead of parsing them. Values such
    /// as `infinity` have no native representation and survive only as
    /// strings. Also maps date-like column types to plain string schemas.
    #[serde(default)]
    pub dates_as_string: bool,
    /// Restrict discovery to these schemas; empty means all non-system
    /// schemas.
    #[serde(default)]
    pub filter_schemas: Vec<String>,
    /// Cap on the number of records a single query-mode stream run may
    /// fetch.
    #[serde(default)]
    pub max_record_count: Option<u64>,
    /// Wire-level client identifier for replication connections.
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

fn default_port() -> u16 {
    5432
}

fn default_application_name() -> String {
    "tap_postgres".to_string()
}

impl Config {
    /// The libpq-style conninfo string understood by the driver.
    pub fn connection_string(&self) -> String {
        format!(
            "dbname={} user={} password={} host={} port={}",
            self.database, self.user, self.password, self.host, self.port
        )
    }

    /// Conninfo for the dedicated replication connection, which identifies
    /// itself with `application_name`.
    pub fn replication_connection_string(&self) -> String {
        format!(
            "{} application_name={}",
            self.connection_string(),
            self.application_name
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn minimal() -> Config {
        serde_json::from_value(serde_json::json!({
            "host": "db.example.com",
            "user": "melty",
            "password": "s3cr3t",
            "database": "warehouse",
        }))
        .unwrap()
    }

    #[test]
    fn defaults() {
        let config = minimal();
        assert_eq!(config.port, 5432);
        assert!(!config.dates_as_string);
        assert!(config.filter_schemas.is_empty());
        assert_eq!(config.max_record_count, None);
        assert_eq!(config.application_name, "tap_postgres");
    }

    #[test]
    fn connection_strings() {
        let config = minimal();
        assert_eq!(
            config.connection_string(),
            "dbname=warehouse user=melty password=s3cr3t host=db.example.com port=5432"
        );
        assert!(config
            .replication_connection_string()
            .ends_with("application_name=tap_postgres"));
    }

    #[test]
    fn settings_schema_lists_every_key() {
        let schema = serde_json::to_value(schemars::schema_for!(Config)).unwrap();
        let properties = schema["properties"].as_object().unwrap();
        for key in [
            "host",
            "port",
            "user",
            "password",
            "database",
            "dates_as_string",
            "filter_schemas",
            "max_record_count",
            "application_name",
        ] {
            assert!(properties.contains_key(key), "missing {key}");
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<Config, _> = serde_json::from_value(serde_json::json!({
            "host": "h", "user": "u", "password": "p", "database": "d",
            "max_records": 5,
        }));
        assert!(result.is_err());
    }
}
