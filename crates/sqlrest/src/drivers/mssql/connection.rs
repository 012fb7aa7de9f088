//! bb8 connection manager for Tiberius.

use std::time::Duration;

use async_trait::async_trait;
use bb8::Pool;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

use crate::config::ConnectionConfig;
use crate::drivers::common::TlsBuilder;
use crate::error::{RestError, Result};

/// Largest TDS packet SQL Server accepts.
const TDS_MAX_PACKET_SIZE: u32 = 32767;

const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Checkout probe. Rolls back a transaction left open by a dropped
/// [`super::adapter::MssqlAdapter`] transaction before the connection is reused.
const CHECKOUT_PROBE: &str = "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION; SELECT 1";

pub type MssqlClient = Client<Compat<TcpStream>>;
pub type MssqlPool = Pool<TiberiusConnectionManager>;

/// Opens Tiberius clients over keepalive-enabled TCP sockets.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    connection: ConnectionConfig,
    tls: TlsBuilder,
}

impl TiberiusConnectionManager {
    pub fn new(connection: ConnectionConfig, tls: TlsBuilder) -> Self {
        Self { connection, tls }
    }

    fn tiberius_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.connection.host);
        config.port(self.connection.port_or(1433));
        config.database(&self.connection.database);
        config.application_name("sqlrest");
        config.authentication(AuthMethod::sql_server(
            &self.connection.user,
            &self.connection.password,
        ));

        self.tls.apply_to_tiberius(&mut config);
        config.packet_size(TDS_MAX_PACKET_SIZE);
        config
    }

    /// Build the pool, opening the first idle connection.
    pub async fn into_pool(self, max_size: u32) -> Result<MssqlPool> {
        let context = format!(
            "{}:{}/{}",
            self.connection.host,
            self.connection.port_or(1433),
            self.connection.database
        );
        Pool::builder()
            .max_size(max_size)
            .min_idle(Some(1))
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .max_lifetime(Some(POOL_MAX_LIFETIME))
            .test_on_check_out(true)
            .build(self)
            .await
            .map_err(|e| RestError::Connection(format!("{}: {}", context, e)))
    }
}

fn io_error(e: std::io::Error, context: &str) -> tiberius::error::Error {
    tiberius::error::Error::Io {
        kind: e.kind(),
        message: format!("{}: {}", context, e),
    }
}

/// Enable TCP keepalives on a connected stream.
fn with_keepalive(tcp: TcpStream) -> std::io::Result<TcpStream> {
    let std_tcp = tcp.into_std()?;
    let socket = socket2::Socket::from(std_tcp);

    let keepalive = socket2::TcpKeepalive::new()
        .with_time(TCP_KEEPALIVE_INTERVAL)
        .with_interval(TCP_KEEPALIVE_INTERVAL);
    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        warn!("Could not enable TCP keepalive for SQL Server: {}", e);
    }

    let std_tcp: std::net::TcpStream = socket.into();
    std_tcp.set_nonblocking(true)?;
    TcpStream::from_std(std_tcp)
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = MssqlClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.tiberius_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| io_error(e, "connecting to SQL Server"))?;
        tcp.set_nodelay(true).ok();

        let tcp = with_keepalive(tcp).map_err(|e| io_error(e, "configuring socket"))?;
        debug!("Opened SQL Server connection to {}", config.get_addr());
        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query(CHECKOUT_PROBE).await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Map a bb8 checkout failure.
pub fn checkout_error(e: bb8::RunError<tiberius::error::Error>, context: &str) -> RestError {
    match e {
        bb8::RunError::User(e) => RestError::Connection(format!("{}: {}", context, e)),
        bb8::RunError::TimedOut => RestError::pool("timed out waiting for a connection", context),
    }
}

/// Check out a connection for `context`.
pub async fn checkout<'a>(
    pool: &'a MssqlPool,
    context: &str,
) -> Result<bb8::PooledConnection<'a, TiberiusConnectionManager>> {
    pool.get().await.map_err(|e| checkout_error(e, context))
}
