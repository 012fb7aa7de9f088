//! PostgreSQL adapter.
//!
//! Uses deadpool-postgres for connection pooling and rustls for TLS.

use std::sync::OnceLock;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio::sync::RwLock;
use tokio_postgres::types::ToSql;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::config::{Config, ConnectionConfig};
use crate::core::schema::{Capabilities, SchemaInfo, SecurityPolicy, TableInfo};
use crate::core::traits::{
    transaction, Adapter, Dialect, QueryResult, TransactionContext,
};
use crate::core::value::SqlValue;
use crate::drivers::common::TlsBuilder;
use crate::error::{RestError, Result};

use super::dialect::PostgresDialect;
use super::params::{bind_params, decode_row, fields_of};
use super::{ddl, introspect};

/// PostgreSQL adapter.
pub struct PostgresAdapter {
    connection: ConnectionConfig,
    max_connections: usize,
    tls: TlsBuilder,
    dialect: PostgresDialect,
    pool: RwLock<Option<Pool>>,
    extensions: OnceLock<Vec<String>>,
}

impl PostgresAdapter {
    /// Create an unconnected adapter. Fails only on invalid TLS settings.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            connection: config.connection.clone(),
            max_connections: config.pool.max_connections,
            tls: TlsBuilder::for_connection(&config.connection)?,
            dialect: PostgresDialect::new(),
            pool: RwLock::new(None),
            extensions: OnceLock::new(),
        })
    }

    fn build_pool(&self) -> Result<Pool> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&self.connection.host);
        pg_config.port(self.connection.port_or(5432));
        pg_config.dbname(&self.connection.database);
        pg_config.user(&self.connection.user);
        pg_config.password(&self.connection.password);
        pg_config.application_name("sqlrest");

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let pool = match self.tls.postgres_connector()? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(self.max_connections)
                    .build()
                    .map_err(|e| RestError::pool(e, "creating PostgreSQL pool"))?
            }
            Some(tls_connector) => {
                let mgr = Manager::from_config(pg_config, tls_connector, mgr_config);
                Pool::builder(mgr)
                    .max_size(self.max_connections)
                    .build()
                    .map_err(|e| RestError::pool(e, "creating PostgreSQL pool"))?
            }
        };

        Ok(pool)
    }

    /// The live pool, or `NotConnected`.
    async fn pool(&self) -> Result<Pool> {
        self.pool.read().await.clone().ok_or(RestError::NotConnected)
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool()
            .await?
            .get()
            .await
            .map_err(|e| RestError::pool(e, format!("getting PostgreSQL connection for {}", context)))
    }

    /// Run the probe query on a fresh connection and read installed extensions.
    async fn probe(pool: &Pool) -> Result<Vec<String>> {
        let client = pool
            .get()
            .await
            .map_err(|e| RestError::pool(e, "connection probe"))?;
        client.simple_query("SELECT 1").await?;
        Self::load_extensions(&client).await
    }

    async fn load_extensions(client: &Object) -> Result<Vec<String>> {
        let rows = client
            .query("SELECT extname::text FROM pg_catalog.pg_extension ORDER BY extname", &[])
            .await?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }
}

/// Prepare, bind and run one statement on a client.
///
/// Statements without result columns report affected rows.
async fn run_statement(
    client: &tokio_postgres::Client,
    sql: &str,
    params: &[SqlValue],
) -> Result<QueryResult> {
    let stmt = client.prepare(sql).await?;
    let bound = bind_params(stmt.params(), params)?;
    let refs: Vec<&(dyn ToSql + Sync)> = bound
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect();

    if stmt.columns().is_empty() {
        let affected = client.execute(&stmt, &refs).await?;
        return Ok(QueryResult::affected(affected));
    }

    let rows = client.query(&stmt, &refs).await?;
    let decoded = rows.iter().map(decode_row).collect::<Result<Vec<_>>>()?;
    Ok(QueryResult::from_rows(decoded, fields_of(stmt.columns())))
}

/// Transaction bound to one pooled connection.
struct PostgresTransaction {
    client: Option<Object>,
}

impl PostgresTransaction {
    fn client(&self) -> Result<&Object> {
        self.client.as_ref().ok_or(RestError::NotConnected)
    }

    async fn finish(mut self: Box<Self>, statement: &str) -> Result<()> {
        let client = self.client.take().ok_or(RestError::NotConnected)?;
        client.batch_execute(statement).await?;
        Ok(())
    }
}

#[async_trait]
impl TransactionContext for PostgresTransaction {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        run_statement(self.client()?, sql, params).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        // Never hand an open transaction back to the pool
        if let Some(client) = self.client.take() {
            warn!("PostgreSQL transaction dropped without commit or rollback; discarding connection");
            let _ = Object::take(client);
        }
    }
}

#[async_trait]
impl Adapter for PostgresAdapter {
    fn name(&self) -> &str {
        "postgresql"
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_row_security: true,
            native_replication: true,
            native_json: true,
            pub_sub: true,
            full_text_search: true,
            max_connections: self.max_connections,
            supported_extensions: self.extensions.get().cloned().unwrap_or_default(),
        }
    }

    async fn connect(&self) -> Result<()> {
        let pool = self.build_pool()?;

        let target = format!(
            "{}:{}/{}",
            self.connection.host,
            self.connection.port_or(5432),
            self.connection.database
        );
        let extensions = Self::probe(&pool)
            .await
            .map_err(|e| e.during_connect(&target))?;
        debug!("PostgreSQL extensions: {:?}", extensions);
        let _ = self.extensions.set(extensions);

        *self.pool.write().await = Some(pool);

        info!(
            "Connected to PostgreSQL: {}:{}/{} (pool_size={}, ssl_mode={})",
            self.connection.host,
            self.connection.port_or(5432),
            self.connection.database,
            self.max_connections,
            self.tls.mode()
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close();
            info!("Disconnected from PostgreSQL: {}", self.connection.host);
        }
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let client = self.client("query").await?;
        debug!("postgresql: {} ({} params)", sql, params.len());
        run_statement(&client, sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn TransactionContext>> {
        let client = self.client("transaction").await?;
        client.batch_execute("BEGIN").await?;
        Ok(Box::new(PostgresTransaction {
            client: Some(client),
        }))
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        introspect::list_tables(&self.pool().await?, schema).await
    }

    async fn get_table(&self, name: &str, schema: &str) -> Result<Option<TableInfo>> {
        introspect::load_table(&self.pool().await?, schema, name).await
    }

    async fn get_schema(&self, schema: &str) -> Result<SchemaInfo> {
        introspect::load_schema(&self.pool().await?, schema).await
    }

    async fn create_table(&self, table: &TableInfo) -> Result<()> {
        let statements = ddl::create_table(table)?;
        let count = statements.len();

        transaction(self, move |tx| {
            Box::pin(async move {
                for sql in &statements {
                    tx.query(sql, &[]).await?;
                }
                Ok(())
            })
        })
        .await?;

        info!("Created table {} ({} statements)", table.full_name(), count);
        Ok(())
    }

    async fn drop_table(&self, schema: &str, name: &str) -> Result<()> {
        self.query(&ddl::drop_table(schema, name)?, &[]).await?;
        info!("Dropped table {}.{}", schema, name);
        Ok(())
    }

    async fn apply_security_policy(&self, policy: &SecurityPolicy) -> Result<()> {
        let create = ddl::create_policy(policy)?;

        self.query(&ddl::enable_row_security(&policy.schema, &policy.table)?, &[])
            .await?;

        let params = [
            SqlValue::from(policy.schema.as_str()),
            SqlValue::from(policy.table.as_str()),
            SqlValue::from(policy.name.as_str()),
        ];
        if self.query_one(ddl::POLICY_EXISTS, &params).await?.is_some() {
            debug!("Policy {} already exists on {}.{}", policy.name, policy.schema, policy.table);
            return Ok(());
        }

        self.query(&create, &[]).await?;
        info!("Applied policy {} on {}.{}", policy.name, policy.schema, policy.table);
        Ok(())
    }

    async fn remove_security_policy(&self, schema: &str, table: &str, name: &str) -> Result<()> {
        self.query(&ddl::drop_policy(schema, table, name)?, &[]).await?;
        info!("Removed policy {} from {}.{}", name, schema, table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::from_yaml(
            "provider: postgresql\nconnection:\n  host: localhost\n  database: app\n  user: app\n",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_query_before_connect_is_rejected() {
        let adapter = PostgresAdapter::new(&config()).unwrap();
        let err = adapter.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, RestError::NotConnected));
        assert!(adapter.begin().await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let adapter = PostgresAdapter::new(&config()).unwrap();
        assert!(adapter.disconnect().await.is_ok());
        assert!(adapter.disconnect().await.is_ok());
    }

    #[test]
    fn test_capabilities() {
        let adapter = PostgresAdapter::new(&config()).unwrap();
        let caps = adapter.capabilities();
        assert!(caps.native_row_security);
        assert_eq!(caps.max_connections, 10);
        assert!(caps.supported_extensions.is_empty());
        assert_eq!(adapter.dialect().name(), "postgresql");
    }

    #[test]
    fn test_invalid_ssl_mode_fails_construction() {
        let mut config = config();
        config
            .connection
            .options
            .insert("ssl_mode".into(), "sometimes".into());
        assert!(PostgresAdapter::new(&config).is_err());
    }
}
