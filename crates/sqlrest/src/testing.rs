//! In-memory adapter that records every backend call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::schema::{Capabilities, SchemaInfo, SecurityPolicy, TableInfo};
use crate::core::traits::{Adapter, Dialect, QueryResult, TransactionContext};
use crate::core::value::SqlValue;
use crate::drivers::DialectImpl;
use crate::error::{RestError, Result};

type Responder = Arc<dyn Fn(&str, &[SqlValue]) -> Result<QueryResult> + Send + Sync>;

/// One call the adapter saw: SQL text (or an operation tag) and parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

fn empty_result(_sql: &str, _params: &[SqlValue]) -> Result<QueryResult> {
    Ok(QueryResult::default())
}

pub struct RecordingAdapter {
    dialect: DialectImpl,
    tables: HashMap<String, TableInfo>,
    responder: Responder,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl RecordingAdapter {
    /// Adapter for `dialect` that answers every query with an empty result.
    pub fn new(dialect: &str) -> Self {
        Self {
            dialect: DialectImpl::from_name(dialect).expect("known dialect"),
            tables: HashMap::new(),
            responder: Arc::new(empty_result),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_table(mut self, table: TableInfo) -> Self {
        self.tables
            .insert(format!("{}.{}", table.schema, table.name), table);
        self
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&str, &[SqlValue]) -> Result<QueryResult> + Send + Sync + 'static,
    {
        self.responder = Arc::new(responder);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.sql).collect()
    }

    fn record(&self, sql: &str, params: &[SqlValue]) {
        self.calls.lock().unwrap().push(Call {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }
}

struct RecordingTransaction {
    calls: Arc<Mutex<Vec<Call>>>,
    responder: Responder,
}

impl RecordingTransaction {
    fn record(&self, sql: &str, params: &[SqlValue]) {
        self.calls.lock().unwrap().push(Call {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }
}

#[async_trait]
impl TransactionContext for RecordingTransaction {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        self.record(sql, params);
        (self.responder)(sql, params)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.record("COMMIT", &[]);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.record("ROLLBACK", &[]);
        Ok(())
    }
}

#[async_trait]
impl Adapter for RecordingAdapter {
    fn name(&self) -> &str {
        "recording"
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        self.record(sql, params);
        (self.responder)(sql, params)
    }

    async fn begin(&self) -> Result<Box<dyn TransactionContext>> {
        self.record("BEGIN", &[]);
        Ok(Box::new(RecordingTransaction {
            calls: Arc::clone(&self.calls),
            responder: Arc::clone(&self.responder),
        }))
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        self.record(&format!("list_tables {}", schema), &[]);
        let mut names: Vec<String> = self
            .tables
            .values()
            .filter(|t| t.schema == schema)
            .map(|t| t.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn get_table(&self, name: &str, schema: &str) -> Result<Option<TableInfo>> {
        self.record(&format!("get_table {}.{}", schema, name), &[]);
        Ok(self.tables.get(&format!("{}.{}", schema, name)).cloned())
    }

    async fn get_schema(&self, schema: &str) -> Result<SchemaInfo> {
        self.record(&format!("get_schema {}", schema), &[]);
        Ok(SchemaInfo::default())
    }

    async fn create_table(&self, _table: &TableInfo) -> Result<()> {
        Err(RestError::Backend("not supported by the recording adapter".into()))
    }

    async fn drop_table(&self, _schema: &str, _name: &str) -> Result<()> {
        Err(RestError::Backend("not supported by the recording adapter".into()))
    }

    async fn apply_security_policy(&self, _policy: &SecurityPolicy) -> Result<()> {
        Err(RestError::Backend("not supported by the recording adapter".into()))
    }

    async fn remove_security_policy(&self, _schema: &str, _table: &str, _name: &str) -> Result<()> {
        Err(RestError::Backend("not supported by the recording adapter".into()))
    }
}
