//! sqlrest CLI - compile, inspect and query databases through the REST layer.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use sqlrest::filter::coerce;
use sqlrest::{
    parse_query, Adapter, AdapterRegistry, ChangePoller, Config, DialectImpl, Method,
    QueryCompiler, RestError, RestRequest, RestService, Row, TableRef,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "sqlrest")]
#[command(about = "Database-agnostic REST queries for PostgreSQL and SQL Server")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a request to SQL without connecting
    Compile {
        /// Dialect: postgresql, tsql or mysql
        #[arg(long)]
        dialect: String,

        /// Table name, optionally schema-qualified
        #[arg(long)]
        table: String,

        /// Statement to compile
        #[arg(long, value_enum, default_value = "select")]
        operation: Operation,

        /// Query parameter as key=value (repeatable), e.g. age=gte.18
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Column value for insert/update as key=value (repeatable)
        #[arg(long = "set", value_parser = parse_key_val)]
        values: Vec<(String, String)>,

        /// Row ceiling applied to SELECT
        #[arg(long, default_value = "1000")]
        max_rows: usize,
    },

    /// Print canonical schema or table metadata as JSON
    Introspect {
        /// Schema to inspect [default: provider default]
        #[arg(long)]
        schema: Option<String>,

        /// Only this table
        #[arg(long)]
        table: Option<String>,
    },

    /// Test the database connection
    HealthCheck,

    /// Run a GET against a table and print the response envelope
    Query {
        /// Table name, optionally schema-qualified
        #[arg(long)]
        table: String,

        /// Primary key value (comma-separated for composite keys)
        #[arg(long)]
        id: Option<String>,

        /// Query parameter as key=value (repeatable)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },

    /// Stream new rows of a table as JSON lines until interrupted
    Watch {
        /// Table name, optionally schema-qualified
        #[arg(long)]
        table: String,

        /// Monotonic column that orders changes
        #[arg(long)]
        cursor_column: String,

        /// Start after this cursor value instead of the current maximum
        #[arg(long, conflicts_with = "from_beginning")]
        after: Option<String>,

        /// Emit rows already in the table first
        #[arg(long)]
        from_beginning: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Operation {
    Select,
    Count,
    Insert,
    Update,
    Delete,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), RestError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| RestError::Config(e.to_string()))?;

    // Compile works offline and needs no configuration
    if let Commands::Compile {
        dialect,
        table,
        operation,
        params,
        values,
        max_rows,
    } = &cli.command
    {
        return compile(dialect, table, *operation, params, values, *max_rows, cli.output_json);
    }

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let registry = AdapterRegistry::with_builtins();
    let adapter = registry.create(&config.provider, &config).await?;

    let result = match cli.command {
        Commands::Compile { .. } => Ok(()), // Handled above
        Commands::Introspect { schema, table } => {
            let schema = schema.unwrap_or_else(|| config.default_schema().to_string());
            introspect(adapter.as_ref(), &schema, table.as_deref()).await
        }
        Commands::HealthCheck => health_check(adapter.as_ref(), &config, cli.output_json).await,
        Commands::Query { table, id, params } => {
            let service = RestService::new(adapter.clone(), &config);
            let mut request = RestRequest::new(Method::Get, table);
            request.id = id;
            request.query = params;
            query(&service, request).await
        }
        Commands::Watch {
            table,
            cursor_column,
            after,
            from_beginning,
        } => {
            let mut poller = ChangePoller::new(
                adapter.clone(),
                TableRef::parse(&table),
                cursor_column,
                &config.changes,
            );
            if let Some(after) = after {
                poller = poller.starting_after(coerce(&after));
            } else if from_beginning {
                poller = poller.from_beginning();
            }
            watch(poller).await
        }
    };

    adapter.disconnect().await?;
    result
}

fn compile(
    dialect: &str,
    table: &str,
    operation: Operation,
    params: &[(String, String)],
    values: &[(String, String)],
    max_rows: usize,
    output_json: bool,
) -> Result<(), RestError> {
    let dialect = DialectImpl::from_name(dialect)?;
    let compiler = QueryCompiler::new(&dialect, max_rows);
    let table = TableRef::parse(table);
    let query = parse_query(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    let row: Row = values
        .iter()
        .map(|(k, v)| (k.clone(), coerce(v)))
        .collect();

    let compiled = match operation {
        Operation::Select => compiler.select(&table, &query)?,
        Operation::Count => compiler.count(&table, &query.filters)?,
        Operation::Insert => compiler.insert(&table, &row)?,
        Operation::Update => compiler.update(&table, &row, &query.filters)?,
        Operation::Delete => compiler.delete(&table, &query.filters)?,
    };

    if output_json {
        println!("{}", serde_json::to_string_pretty(&compiled)?);
    } else {
        println!("{}", compiled.sql);
        println!("params: {}", serde_json::to_string(&compiled.params)?);
    }
    Ok(())
}

async fn query(service: &RestService, request: RestRequest) -> Result<(), RestError> {
    let response = service.dispatch(request).await?;
    println!("{}", serde_json::to_string_pretty(&response.body)?);
    Ok(())
}

async fn introspect(adapter: &dyn Adapter, schema: &str, table: Option<&str>) -> Result<(), RestError> {
    let json = match table {
        Some(name) => {
            let info = adapter
                .get_table(name, schema)
                .await?
                .ok_or_else(|| RestError::NotFound(format!("Table {}.{}", schema, name)))?;
            serde_json::to_string_pretty(&info)?
        }
        None => serde_json::to_string_pretty(&adapter.get_schema(schema).await?)?,
    };
    println!("{}", json);
    Ok(())
}

async fn health_check(adapter: &dyn Adapter, config: &Config, output_json: bool) -> Result<(), RestError> {
    let start = Instant::now();
    adapter.query("SELECT 1", &[]).await?;
    let latency_ms = start.elapsed().as_millis() as u64;

    if output_json {
        let result = serde_json::json!({
            "provider": adapter.name(),
            "dialect": adapter.dialect().name(),
            "host": config.connection.host,
            "database": config.connection.database,
            "healthy": true,
            "latency_ms": latency_ms,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Health Check Results:");
        println!(
            "  {} ({}/{}): OK ({}ms)",
            adapter.name(),
            config.connection.host,
            config.connection.database,
            latency_ms
        );
    }
    Ok(())
}

async fn watch(poller: ChangePoller) -> Result<(), RestError> {
    let cancel = setup_signal_handler();
    let (tx, mut rx) = mpsc::channel(16);
    let handle = poller.spawn(tx, cancel);

    // The channel closes when the poller stops
    while let Some(batch) = rx.recv().await {
        println!("{}", serde_json::to_string(&batch)?);
    }

    handle
        .await
        .map_err(|e| RestError::Backend(format!("change poller task failed: {}", e)))?
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid key=value: no `=` found in `{}`", s))?;
    if key.is_empty() {
        return Err(format!("invalid key=value: empty key in `{}`", s));
    }
    Ok((key.to_string(), value.to_string()))
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries command output; logs go to stderr
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("Unknown log format '{}' (expected text or json)", other)),
    }

    Ok(())
}

/// Cancel on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived SIGINT. Stopping...");
            token_int.cancel();
        }
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
            sigterm.recv().await;
            eprintln!("\nReceived SIGTERM. Stopping...");
            token_term.cancel();
        }
    });

    cancel_token
}

/// Cancel on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping...");
            token.cancel();
        }
    });

    cancel_token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("age=gte.18").unwrap(),
            ("age".to_string(), "gte.18".to_string())
        );
        assert_eq!(
            parse_key_val("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_cli_parses_compile() {
        let cli = Cli::try_parse_from([
            "sqlrest", "compile", "--dialect", "tsql", "--table", "users", "--param", "id=eq.1",
        ])
        .unwrap();
        match cli.command {
            Commands::Compile { params, .. } => {
                assert_eq!(params, vec![("id".to_string(), "eq.1".to_string())])
            }
            _ => panic!("expected compile"),
        }
    }
}
