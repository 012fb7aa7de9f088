//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        let config = config.with_provider_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_applies_postgres_defaults() {
        let yaml = r#"
provider: postgresql
connection:
  host: localhost
  database: app
  user: app
  password: secret
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.connection.port, Some(5432));
        assert_eq!(config.default_schema(), "public");
        assert_eq!(config.rest.max_rows, 1000);
        assert_eq!(config.pool.max_connections, 10);
        assert!(!config.rest.atomic_bulk_insert);
    }

    #[test]
    fn test_from_yaml_applies_mssql_defaults() {
        let yaml = r#"
provider: mssql
connection:
  host: sql.internal
  database: app
  user: sa
  password: secret
  tls: true
  options:
    trust_server_cert: "true"
rest:
  max_rows: 250
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.connection.port, Some(1433));
        assert_eq!(config.default_schema(), "dbo");
        assert_eq!(config.rest.max_rows, 250);
        assert!(config.connection.option_flag("trust_server_cert"));
    }

    #[test]
    fn test_from_yaml_applies_mysql_defaults() {
        let yaml = r#"
provider: mysql
connection:
  host: db
  database: shop
  user: app
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.connection.port, Some(3306));
        assert_eq!(config.default_schema(), "shop");
    }

    #[test]
    fn test_explicit_values_are_kept() {
        let yaml = r#"
provider: postgresql
connection:
  host: db
  port: 6543
  database: app
  user: app
rest:
  default_schema: api
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.connection.port, Some(6543));
        assert_eq!(config.default_schema(), "api");
    }

    #[test]
    fn test_from_yaml_rejects_malformed() {
        assert!(Config::from_yaml("provider: [").is_err());
    }
}
