//! Configuration validation.

use super::Config;
use crate::error::{RestError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.provider.trim().is_empty() {
        return Err(RestError::Config("provider is required".into()));
    }

    if config.connection.host.is_empty() {
        return Err(RestError::Config("connection.host is required".into()));
    }
    if config.connection.database.is_empty() {
        return Err(RestError::Config("connection.database is required".into()));
    }
    if config.connection.user.is_empty() {
        return Err(RestError::Config("connection.user is required".into()));
    }
    if let Some(0) = config.connection.port {
        return Err(RestError::Config("connection.port must be non-zero".into()));
    }

    if config.pool.max_connections == 0 {
        return Err(RestError::Config(
            "pool.max_connections must be at least 1".into(),
        ));
    }
    if config.rest.max_rows == 0 {
        return Err(RestError::Config("rest.max_rows must be at least 1".into()));
    }
    if config.changes.poll_interval_ms == 0 {
        return Err(RestError::Config(
            "changes.poll_interval_ms must be at least 1".into(),
        ));
    }
    if config.changes.batch_size == 0 {
        return Err(RestError::Config(
            "changes.batch_size must be at least 1".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChangesConfig, ConnectionConfig, PoolConfig, RestConfig};

    fn valid_config() -> Config {
        Config {
            provider: "postgresql".to_string(),
            connection: ConnectionConfig {
                host: "localhost".to_string(),
                port: Some(5432),
                database: "app".to_string(),
                user: "app".to_string(),
                password: "secret".to_string(),
                tls: false,
                options: Default::default(),
            },
            pool: PoolConfig::default(),
            rest: RestConfig::default(),
            changes: ChangesConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_host() {
        let mut config = valid_config();
        config.connection.host = String::new();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("connection.host"));
    }

    #[test]
    fn test_missing_user() {
        let mut config = valid_config();
        config.connection.user = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_max_rows() {
        let mut config = valid_config();
        config.rest.max_rows = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("max_rows"));
    }

    #[test]
    fn test_zero_pool_size() {
        let mut config = valid_config();
        config.pool.max_connections = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_poll_interval() {
        let mut config = valid_config();
        config.changes.poll_interval_ms = 0;
        assert!(validate(&config).is_err());
    }
}
