//! SQL Server adapter.
//!
//! Uses Tiberius with bb8 connection pooling. Compiled statements carry
//! `@paramN` placeholders and are rewritten for Tiberius before execution.

use async_trait::async_trait;
use bb8::PooledConnection;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{Config, ConnectionConfig};
use crate::core::schema::{Capabilities, SchemaInfo, SecurityPolicy, TableInfo};
use crate::core::traits::{transaction, Adapter, Dialect, QueryResult, TransactionContext};
use crate::core::value::SqlValue;
use crate::drivers::common::TlsBuilder;
use crate::error::{RestError, Result};

use super::connection::{checkout_error, MssqlClient, MssqlPool, TiberiusConnectionManager};
use super::dialect::MssqlDialect;
use super::params::{build_query, decode_row, fields_of};
use super::{ddl, introspect};

/// SQL Server adapter.
pub struct MssqlAdapter {
    connection: ConnectionConfig,
    max_connections: usize,
    tls: TlsBuilder,
    dialect: MssqlDialect,
    pool: RwLock<Option<MssqlPool>>,
}

impl MssqlAdapter {
    /// Create an unconnected adapter. Fails only on invalid TLS settings.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            connection: config.connection.clone(),
            max_connections: config.pool.max_connections,
            tls: TlsBuilder::for_connection(&config.connection)?,
            dialect: MssqlDialect::new(),
            pool: RwLock::new(None),
        })
    }

    /// The live pool, or `NotConnected`.
    async fn pool(&self) -> Result<MssqlPool> {
        self.pool.read().await.clone().ok_or(RestError::NotConnected)
    }

    async fn client(&self, context: &str) -> Result<PooledConnection<'static, TiberiusConnectionManager>> {
        self.pool()
            .await?
            .get_owned()
            .await
            .map_err(|e| checkout_error(e, context))
    }

    /// Run statements one by one, each as its own batch.
    async fn run_all(&self, statements: &[String]) -> Result<()> {
        for sql in statements {
            self.query(sql, &[]).await?;
        }
        Ok(())
    }
}

/// Whether a statement produces a result set.
///
/// Plain DML reports affected rows instead; DML with an OUTPUT clause
/// returns the affected rows themselves.
fn returns_rows(sql: &str) -> bool {
    let upper = sql.trim_start().to_uppercase();
    upper.starts_with("SELECT")
        || upper.starts_with("WITH")
        || upper.contains(" OUTPUT INSERTED.")
        || upper.contains(" OUTPUT DELETED.")
}

/// Bind and run one statement on a client.
async fn run_statement(client: &mut MssqlClient, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
    let query = build_query(sql, params)?;

    if !returns_rows(sql) {
        let result = query.execute(client).await?;
        return Ok(QueryResult::affected(result.total()));
    }

    let mut stream = query.query(client).await?;
    let fields = stream
        .columns()
        .await?
        .map(fields_of)
        .unwrap_or_default();
    let rows = stream.into_first_result().await?;
    let decoded = rows.into_iter().map(decode_row).collect::<Result<Vec<_>>>()?;
    Ok(QueryResult::from_rows(decoded, fields))
}

/// Run a statement outside sp_executesql, so BEGIN/COMMIT keep their scope.
async fn probe(pool: &MssqlPool) -> Result<()> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| checkout_error(e, "connection probe"))?;
    run_batch(&mut conn, "SELECT 1").await
}

async fn run_batch(client: &mut MssqlClient, sql: &str) -> Result<()> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}

/// Transaction bound to one pooled connection.
///
/// A connection dropped with the transaction still open goes back to the
/// pool and is rolled back by the checkout probe before reuse.
struct MssqlTransaction {
    client: Option<PooledConnection<'static, TiberiusConnectionManager>>,
}

impl MssqlTransaction {
    async fn finish(mut self: Box<Self>, statement: &str) -> Result<()> {
        let mut client = self.client.take().ok_or(RestError::NotConnected)?;
        run_batch(&mut client, statement).await
    }
}

#[async_trait]
impl TransactionContext for MssqlTransaction {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let client = self.client.as_mut().ok_or(RestError::NotConnected)?;
        run_statement(client, sql, params).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.finish("COMMIT TRANSACTION").await
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK TRANSACTION").await
    }
}

impl Drop for MssqlTransaction {
    fn drop(&mut self) {
        if self.client.is_some() {
            warn!("SQL Server transaction dropped without commit or rollback; it will be rolled back on next checkout");
        }
    }
}

#[async_trait]
impl Adapter for MssqlAdapter {
    fn name(&self) -> &str {
        "mssql"
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_row_security: false,
            native_replication: false,
            native_json: false,
            pub_sub: false,
            full_text_search: true,
            max_connections: self.max_connections,
            supported_extensions: Vec::new(),
        }
    }

    async fn connect(&self) -> Result<()> {
        let target = format!(
            "{}:{}/{}",
            self.connection.host,
            self.connection.port_or(1433),
            self.connection.database
        );
        let manager = TiberiusConnectionManager::new(self.connection.clone(), self.tls);
        let pool = manager.into_pool(self.max_connections as u32).await?;

        probe(&pool).await.map_err(|e| e.during_connect(&target))?;

        *self.pool.write().await = Some(pool);

        info!(
            "Connected to SQL Server: {}:{}/{} (pool_size={}, ssl_mode={})",
            self.connection.host,
            self.connection.port_or(1433),
            self.connection.database,
            self.max_connections,
            self.tls.mode()
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        // bb8 closes idle connections once the last pool handle is dropped
        if self.pool.write().await.take().is_some() {
            info!("Disconnected from SQL Server: {}", self.connection.host);
        }
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        let mut client = self.client("query").await?;
        debug!("tsql: {} ({} params)", sql, params.len());
        run_statement(&mut client, sql, params).await
    }

    async fn begin(&self) -> Result<Box<dyn TransactionContext>> {
        let mut client = self.client("transaction").await?;
        run_batch(&mut client, "BEGIN TRANSACTION").await?;
        Ok(Box::new(MssqlTransaction {
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
        let table = self
            .get_table(&policy.table, &policy.schema)
            .await?
            .ok_or_else(|| {
                RestError::NotFound(format!("Table {}.{}", policy.schema, policy.table))
            })?;
        let statements = ddl::create_policy(policy, &table)?;

        let params = [
            SqlValue::from(policy.name.as_str()),
            SqlValue::from(policy.schema.as_str()),
        ];
        if self.query_one(ddl::POLICY_EXISTS, &params).await?.is_some() {
            debug!("Security policy {}.{} already exists", policy.schema, policy.name);
            return Ok(());
        }

        // CREATE FUNCTION and CREATE SECURITY POLICY must each start a batch
        self.run_all(&statements.functions).await?;
        if let Err(e) = self.query(&statements.policy, &[]).await {
            warn!(
                "Security policy {}.{} failed after its predicate functions were created: {}",
                policy.schema, policy.name, e
            );
            return Err(e);
        }

        info!(
            "Applied security policy {}.{} on {}",
            policy.schema,
            policy.name,
            table.full_name()
        );
        Ok(())
    }

    async fn remove_security_policy(&self, schema: &str, table: &str, name: &str) -> Result<()> {
        self.run_all(&ddl::drop_policy(schema, name)?).await?;
        info!("Removed security policy {}.{} from {}", schema, name, table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::from_yaml(
            "provider: mssql\nconnection:\n  host: localhost\n  database: app\n  user: sa\n",
        )
        .unwrap()
    }

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows("SELECT * FROM [t]"));
        assert!(returns_rows("  with cte AS (SELECT 1 AS x) SELECT x FROM cte"));
        assert!(returns_rows(
            "INSERT INTO [t] ([a]) OUTPUT INSERTED.* VALUES (@param0)"
        ));
        assert!(returns_rows("DELETE FROM [t] OUTPUT DELETED.* WHERE [id] = @param0"));
        assert!(!returns_rows("UPDATE [t] SET [a] = @param0 WHERE [b] = @param1"));
        assert!(!returns_rows("DROP TABLE IF EXISTS [dbo].[t]"));
    }

    #[tokio::test]
    async fn test_query_before_connect_is_rejected() {
        let adapter = MssqlAdapter::new(&config()).unwrap();
        let err = adapter.query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, RestError::NotConnected));
        assert!(adapter.list_tables("dbo").await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let adapter = MssqlAdapter::new(&config()).unwrap();
        assert!(adapter.disconnect().await.is_ok());
        assert!(adapter.disconnect().await.is_ok());
    }

    #[test]
    fn test_capabilities() {
        let adapter = MssqlAdapter::new(&config()).unwrap();
        let caps = adapter.capabilities();
        assert!(!caps.native_row_security);
        assert_eq!(caps.max_connections, 10);
        assert_eq!(adapter.dialect().name(), "tsql");
        assert_eq!(adapter.name(), "mssql");
    }
}
