//! Configuration type definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Provider name resolved through the adapter registry (e.g. "postgresql", "mssql").
    pub provider: String,

    /// Backend connection settings.
    pub connection: ConnectionConfig,

    /// Connection pool settings.
    #[serde(default)]
    pub pool: PoolConfig,

    /// REST surface behavior.
    #[serde(default)]
    pub rest: RestConfig,

    /// Change poller settings.
    #[serde(default)]
    pub changes: ChangesConfig,
}

impl Config {
    /// Fill in defaults that depend on the provider (port, default schema).
    pub fn with_provider_defaults(mut self) -> Self {
        let provider = self.provider.to_lowercase();
        let is_mssql = matches!(provider.as_str(), "mssql" | "tsql" | "sqlserver" | "sql_server");
        let is_mysql = matches!(provider.as_str(), "mysql" | "mariadb");

        if self.connection.port.is_none() {
            self.connection.port = Some(match (is_mssql, is_mysql) {
                (true, _) => 1433,
                (_, true) => 3306,
                _ => 5432,
            });
        }
        if self.rest.default_schema.is_none() {
            // MySQL schemas are databases
            self.rest.default_schema = Some(match (is_mssql, is_mysql) {
                (true, _) => "dbo".to_string(),
                (_, true) => self.connection.database.clone(),
                _ => "public".to_string(),
            });
        }
        self
    }

    /// The schema used when a request does not name one.
    pub fn default_schema(&self) -> &str {
        self.rest.default_schema.as_deref().unwrap_or("public")
    }
}

/// Backend connection settings. Opaque to the query compiler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database host.
    pub host: String,

    /// Database port. Defaults to 5432 (PostgreSQL), 1433 (SQL Server) or 3306 (MySQL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password. Never serialized back out.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Encrypt the connection.
    #[serde(default)]
    pub tls: bool,

    /// Free-form dialect-specific options (e.g. `ssl_mode`, `trust_server_cert`).
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl ConnectionConfig {
    /// Port with the provider default applied by the caller.
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }

    /// Look up a dialect-specific option.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Interpret a dialect-specific option as a boolean flag.
    pub fn option_flag(&self, key: &str) -> bool {
        matches!(
            self.option(key).map(str::to_lowercase).as_deref(),
            Some("true" | "yes" | "1" | "on")
        )
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum concurrent connections (default: 10).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

/// REST surface behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    /// Schema used for unqualified table names. Defaults per provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_schema: Option<String>,

    /// Upper bound on rows returned by one SELECT (default: 1000).
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    /// Wrap bulk inserts in one transaction (default: false).
    #[serde(default)]
    pub atomic_bulk_insert: bool,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            default_schema: None,
            max_rows: default_max_rows(),
            atomic_bulk_insert: false,
        }
    }
}

/// Change poller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesConfig {
    /// Delay between polls in milliseconds (default: 1000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum rows fetched per poll (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ChangesConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_max_connections() -> usize {
    10
}

fn default_max_rows() -> usize {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    100
}
