//! Connection parameters in libpq `key=value` form.

use crate::error::{Error, Result};
use log::LevelFilter;
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::collections::BTreeMap;
use std::time::Duration;

/// Database used when the parameters do not name one.
pub const MAINTENANCE_DATABASE: &str = "postgres";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// libpq-style connection parameters.
///
/// Unset parameters fall back to the usual `PG*` environment variables.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    params: BTreeMap<String, String>,
}

impl ConnectionConfig {
    pub fn new(params: BTreeMap<String, String>) -> Self {
        Self { params }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Maintenance database the cluster-wide statements run in.
    pub fn database(&self) -> &str {
        self.get("dbname").unwrap_or(MAINTENANCE_DATABASE)
    }

    /// Bound on each connection attempt (`connect_timeout`, seconds).
    pub fn connect_timeout(&self) -> Result<Duration> {
        match self.get("connect_timeout") {
            None => Ok(DEFAULT_CONNECT_TIMEOUT),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| Error::InvalidParameter {
                    key: "connect_timeout".to_string(),
                    message: e.to_string(),
                }),
        }
    }

    /// Rendered DSN for log messages, with `password` left out.
    pub fn dsn(&self) -> String {
        self.dsn_for(self.database())
    }

    /// Rendered DSN for one database, with `password` left out.
    pub fn dsn_for(&self, database: &str) -> String {
        let mut parts: Vec<String> = self
            .params
            .iter()
            .filter(|(k, _)| k.as_str() != "password" && k.as_str() != "dbname")
            .map(|(k, v)| format!("{k}={}", dsn_value(v)))
            .collect();
        parts.push(format!("dbname={}", dsn_value(database)));
        parts.join(" ")
    }

    /// Driver options for one database.
    pub fn connect_options(&self, database: &str) -> Result<PgConnectOptions> {
        let mut options = PgConnectOptions::new()
            .database(database)
            .log_statements(LevelFilter::Trace);

        for (key, value) in &self.params {
            options = match key.as_str() {
                "host" | "hostaddr" => options.host(value),
                "port" => options.port(value.trim().parse().map_err(|e| invalid(key, e))?),
                "user" => options.username(value),
                "password" => options.password(value),
                "sslmode" => options.ssl_mode(value.parse::<PgSslMode>().map_err(|e| invalid(key, e))?),
                "sslrootcert" => options.ssl_root_cert(value.as_str()),
                "sslcert" => options.ssl_client_cert(value.as_str()),
                "sslkey" => options.ssl_client_key(value.as_str()),
                "application_name" => options.application_name(value),
                "dbname" | "connect_timeout" => options,
                other => {
                    log::warn!("Ignoring unsupported connection parameter {other}");
                    options
                }
            };
        }
        Ok(options)
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("dsn", &self.dsn())
            .field(
                "password",
                &self.params.get("password").map(|_| "***REDACTED***"),
            )
            .finish()
    }
}

fn invalid(key: &str, error: impl std::fmt::Display) -> Error {
    Error::InvalidParameter {
        key: key.to_string(),
        message: error.to_string(),
    }
}

fn dsn_value(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> ConnectionConfig {
        ConnectionConfig::new(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_dsn_omits_password() {
        let cfg = config(&[("host", "db1"), ("user", "admin"), ("password", "s3cret")]);
        let dsn = cfg.dsn();
        assert_eq!(dsn, "host=db1 user=admin dbname=postgres");
        assert!(!format!("{cfg:?}").contains("s3cret"));
    }

    #[test]
    fn test_database_defaults_to_maintenance() {
        assert_eq!(config(&[]).database(), "postgres");
        assert_eq!(config(&[("dbname", "admin")]).database(), "admin");
    }

    #[test]
    fn test_dsn_quotes_values_with_spaces() {
        let cfg = config(&[("application_name", "pg fga")]);
        assert_eq!(cfg.dsn_for("foo"), "application_name='pg fga' dbname=foo");
    }

    #[test]
    fn test_connect_timeout() {
        assert_eq!(
            config(&[("connect_timeout", "3")]).connect_timeout().unwrap(),
            Duration::from_secs(3)
        );
        assert_eq!(config(&[]).connect_timeout().unwrap(), DEFAULT_CONNECT_TIMEOUT);
        assert!(config(&[("connect_timeout", "soon")]).connect_timeout().is_err());
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let err = config(&[("port", "fifty")]).connect_options("postgres").unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { key, .. } if key == "port"));
    }
}
