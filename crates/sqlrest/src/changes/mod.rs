//! Polling change feed.
//!
//! A [`ChangePoller`] reads a table in cursor order (`cursor_column > last`)
//! and sends each non-empty page as a [`ChangeBatch`]. The cursor only moves
//! once the receiver has accepted the batch, so a batch is never skipped.
//!
//! Only inserts (or updates that bump the cursor column) are visible; there
//! is no delete detection.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compiler::{QueryCompiler, TableRef};
use crate::config::ChangesConfig;
use crate::core::traits::Adapter;
use crate::core::value::{Row, SqlValue};
use crate::error::{RestError, Result};
use crate::filter::{Filter, FilterQuery, Operator, OrderBy};

/// Rows read past the previous cursor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeBatch {
    pub table: String,
    pub rows: Vec<Row>,

    /// Cursor value of the last row in the batch.
    pub cursor: SqlValue,
}

/// Cursor-based poller over one table.
pub struct ChangePoller {
    adapter: Arc<dyn Adapter>,
    table: TableRef,
    cursor_column: String,
    interval: Duration,
    batch_size: usize,
    cursor: Option<SqlValue>,
    start_from_current: bool,
}

impl ChangePoller {
    /// Poll `table` ordered by `cursor_column`.
    ///
    /// Unless [`starting_after`](Self::starting_after) is given, the first
    /// run starts at the column's current maximum, so only rows written
    /// after startup are reported.
    pub fn new(
        adapter: Arc<dyn Adapter>,
        table: TableRef,
        cursor_column: impl Into<String>,
        config: &ChangesConfig,
    ) -> Self {
        Self {
            adapter,
            table,
            cursor_column: cursor_column.into(),
            interval: Duration::from_millis(config.poll_interval_ms),
            batch_size: config.batch_size.max(1),
            cursor: None,
            start_from_current: true,
        }
    }

    /// Report rows whose cursor is greater than `value`.
    pub fn starting_after(mut self, value: SqlValue) -> Self {
        self.cursor = Some(value);
        self.start_from_current = false;
        self
    }

    /// Report every row already in the table, then new ones.
    pub fn from_beginning(mut self) -> Self {
        self.cursor = None;
        self.start_from_current = false;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn cursor(&self) -> Option<&SqlValue> {
        self.cursor.as_ref()
    }

    /// Current `MAX(cursor_column)`; `None` for an empty table.
    async fn current_max(&self) -> Result<Option<SqlValue>> {
        let compiler = QueryCompiler::new(self.adapter.dialect(), 1);
        let query = compiler.max(&self.table, &self.cursor_column)?;
        let row = self.adapter.query_one(&query.sql, &query.params).await?;
        Ok(row
            .and_then(|r| r.values().next().cloned())
            .filter(|v| !v.is_null()))
    }

    /// Fetch the next page after the cursor without advancing it.
    pub async fn poll_once(&self) -> Result<Option<ChangeBatch>> {
        let compiler = QueryCompiler::new(self.adapter.dialect(), self.batch_size);
        let query = FilterQuery {
            filters: self
                .cursor
                .iter()
                .map(|c| Filter::new(&self.cursor_column, Operator::Gt, c.clone()))
                .collect(),
            order: vec![OrderBy::asc(&self.cursor_column)],
            limit: Some(self.batch_size),
            ..Default::default()
        };
        let select = compiler.select(&self.table, &query)?;
        let result = self.adapter.query(&select.sql, &select.params).await?;

        if result.rows.is_empty() {
            return Ok(None);
        }

        let cursor = result
            .rows
            .iter()
            .rev()
            .find_map(|row| row.get(&self.cursor_column).filter(|v| !v.is_null()))
            .cloned()
            .ok_or_else(|| {
                RestError::Validation(format!(
                    "Cursor column '{}' is missing or NULL in every row of {}",
                    self.cursor_column, self.table
                ))
            })?;

        Ok(Some(ChangeBatch {
            table: self.table.to_string(),
            rows: result.rows,
            cursor,
        }))
    }

    /// Run on a background task.
    pub fn spawn(
        self,
        tx: mpsc::Sender<ChangeBatch>,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run(tx, cancel))
    }

    /// Poll until cancelled or until the receiver is dropped.
    ///
    /// Query failures are logged and retried on the next tick; only a
    /// failure to read the starting cursor ends the loop with an error.
    pub async fn run(mut self, tx: mpsc::Sender<ChangeBatch>, cancel: CancellationToken) -> Result<()> {
        if self.start_from_current && self.cursor.is_none() {
            self.cursor = self.current_max().await?;
        }

        info!(
            "Watching {} by {} every {:?} (cursor: {})",
            self.table,
            self.cursor_column,
            self.interval,
            self.cursor
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "start".to_string())
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let full_page = match self.poll_once().await {
                Ok(Some(batch)) => {
                    let count = batch.rows.len();
                    let cursor = batch.cursor.clone();

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        sent = tx.send(batch) => {
                            if sent.is_err() {
                                debug!("{}: change receiver dropped, stopping", self.table);
                                break;
                            }
                        }
                    }

                    debug!("{}: delivered {} rows, cursor now {}", self.table, count, cursor);
                    self.cursor = Some(cursor);
                    count >= self.batch_size
                }
                Ok(None) => false,
                Err(e) => {
                    warn!("{}: change poll failed: {}", self.table, e);
                    false
                }
            };

            // a full page means more rows may be waiting
            if full_page {
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Stopped watching {}", self.table);
        Ok(())
    }
}
