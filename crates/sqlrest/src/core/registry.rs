//! Adapter registry for explicit dependency injection.
//!
//! The [`AdapterRegistry`] maps provider names to adapter factories. It is
//! built once at startup and handed to whatever needs to construct
//! adapters; there is no process-global instance.
//!
//! Registration takes `&mut self`, so it has to finish before the registry
//! is shared. Lookups take `&self`.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::{RestError, Result};

use super::traits::Adapter;

/// Builds an unconnected adapter from configuration.
pub type AdapterFactory = Arc<dyn Fn(&Config) -> Result<Arc<dyn Adapter>> + Send + Sync>;

/// Registry of adapter factories keyed by provider name.
///
/// # Example
///
/// ```rust,ignore
/// let registry = AdapterRegistry::with_builtins();
/// let adapter = registry.create("postgresql", &config).await?;
/// ```
#[derive(Default)]
pub struct AdapterRegistry {
    /// Factories by canonical provider name.
    factories: HashMap<String, AdapterFactory>,

    /// Alternative spellings mapped to canonical names.
    aliases: HashMap<String, String>,
}

impl AdapterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the PostgreSQL and SQL Server adapters.
    ///
    /// Aliases:
    /// - "postgres", "pg" → "postgresql"
    /// - "tsql", "sqlserver", "sql_server" → "mssql"
    pub fn with_builtins() -> Self {
        use crate::drivers::{MssqlAdapter, PostgresAdapter};

        let mut registry = Self::new();

        registry.register("postgresql", |config: &Config| {
            Ok(Arc::new(PostgresAdapter::new(config)?) as Arc<dyn Adapter>)
        });
        registry.register_alias("postgres", "postgresql");
        registry.register_alias("pg", "postgresql");

        registry.register("mssql", |config: &Config| {
            Ok(Arc::new(MssqlAdapter::new(config)?) as Arc<dyn Adapter>)
        });
        registry.register_alias("tsql", "mssql");
        registry.register_alias("sqlserver", "mssql");
        registry.register_alias("sql_server", "mssql");

        registry
    }

    /// Register a factory under a provider name (case-insensitive).
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Config) -> Result<Arc<dyn Adapter>> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.into().to_lowercase(), Arc::new(factory));
    }

    /// Register an alternative spelling for a provider.
    pub fn register_alias(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        self.aliases
            .insert(alias.into().to_lowercase(), target.into().to_lowercase());
    }

    /// Resolve an alias to the canonical provider name.
    pub fn resolve(&self, name: &str) -> String {
        let name = name.to_lowercase();
        self.aliases.get(&name).cloned().unwrap_or(name)
    }

    /// Check if a provider (or alias) is registered.
    pub fn has(&self, name: &str) -> bool {
        self.factories.contains_key(&self.resolve(name))
    }

    /// Canonical provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get a factory, failing with the list of known providers.
    pub fn require(&self, name: &str) -> Result<AdapterFactory> {
        self.factories
            .get(&self.resolve(name))
            .cloned()
            .ok_or_else(|| RestError::UnknownProvider {
                name: name.to_string(),
                known: self.names(),
            })
    }

    /// Instantiate an adapter without connecting it.
    pub fn build(&self, name: &str, config: &Config) -> Result<Arc<dyn Adapter>> {
        let factory = self.require(name)?;
        factory(config)
    }

    /// Instantiate and connect an adapter.
    pub async fn create(&self, name: &str, config: &Config) -> Result<Arc<dyn Adapter>> {
        let adapter = self.build(name, config)?;
        adapter.connect().await?;
        info!(
            "Created {} adapter for {}/{}",
            adapter.name(),
            config.connection.host,
            config.connection.database
        );
        Ok(adapter)
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("providers", &self.names())
            .field("aliases", &self.aliases)
            .finish()
    }
}
