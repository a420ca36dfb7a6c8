use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::row::{FieldValues, Row, RowId, RowPage, TableId, ViewId};
use crate::window::IndexRange;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("request cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected status: {status} body={body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("row not found")]
    NotFound,
}

impl ServiceError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ServiceError::Cancelled)
    }
}

/// Remote row storage consumed by a grid view.
#[async_trait]
pub trait RowService: Send + Sync {
    /// Fetches `limit` rows of a view starting at `offset`. Implementations
    /// should stop early and return [`ServiceError::Cancelled`] once `cancel`
    /// fires.
    async fn fetch_rows(
        &self,
        view: ViewId,
        offset: usize,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<RowPage, ServiceError>;

    async fn create_row(&self, table: TableId, values: &FieldValues) -> Result<Row, ServiceError>;

    async fn update_row(
        &self,
        table: TableId,
        row: RowId,
        values: &FieldValues,
    ) -> Result<Row, ServiceError>;

    async fn delete_row(&self, table: TableId, row: RowId) -> Result<(), ServiceError>;

    /// Returns partial rows holding only the given fields.
    async fn filter_rows(
        &self,
        view: ViewId,
        rows: &[RowId],
        field_ids: &[u64],
    ) -> Result<Vec<Row>, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceOp {
    Fetch,
    Create,
    Update,
    Delete,
    Filter,
}

#[derive(Default)]
struct TableState {
    rows: Vec<Row>,
    next_id: u64,
}

/// In-memory row service for tests, demos and early wiring. Every view maps
/// onto the same single table.
#[derive(Default)]
pub struct InMemoryRowService {
    table: Mutex<TableState>,
    latency: Duration,
    fetches: Mutex<Vec<IndexRange>>,
    failures: Mutex<HashSet<ServiceOp>>,
}

impl InMemoryRowService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `count` rows with ids `1..=count` and a text value in `field_1`.
    pub fn with_rows(count: usize) -> Self {
        let service = Self::new();
        {
            let mut table = service.table.lock();
            for index in 0..count {
                let id = index as u64 + 1;
                let mut values = FieldValues::new();
                values.insert("field_1".into(), json!(format!("row {id}")));
                table.rows.push(Self::stored_row(id, values));
            }
            table.next_id = count as u64;
        }
        service
    }

    /// Makes the next created row get id `next_id`.
    pub fn with_next_id(self, next_id: u64) -> Self {
        self.table.lock().next_id = next_id.saturating_sub(1);
        self
    }

    /// Delays every call by `latency`; fetches can be cancelled while waiting.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes the next call of `op` fail.
    pub fn fail_next(&self, op: ServiceOp) {
        self.failures.lock().insert(op);
    }

    /// Ranges requested through `fetch_rows`, in call order.
    pub fn fetch_log(&self) -> Vec<IndexRange> {
        self.fetches.lock().clone()
    }

    pub fn clear_fetch_log(&self) {
        self.fetches.lock().clear();
    }

    pub fn rows(&self) -> Vec<Row> {
        self.table.lock().rows.clone()
    }

    pub fn row_count(&self) -> usize {
        self.table.lock().rows.len()
    }

    /// Removes a row behind the client's back.
    pub fn remove_remote(&self, id: RowId) -> bool {
        let mut table = self.table.lock();
        let before = table.rows.len();
        table.rows.retain(|row| row.id != id);
        before != table.rows.len()
    }

    fn stored_row(id: u64, values: FieldValues) -> Row {
        let mut row = Row::new(RowId(id), values);
        row.order = Some(format!("{id}.00000000000000000000"));
        row
    }

    fn injected(&self, op: ServiceOp) -> Result<(), ServiceError> {
        if self.failures.lock().remove(&op) {
            return Err(ServiceError::Status {
                status: 500,
                body: format!("injected {op:?} failure"),
            });
        }
        Ok(())
    }

    async fn delay(&self, cancel: Option<&CancellationToken>) -> Result<(), ServiceError> {
        if self.latency.is_zero() {
            return Ok(());
        }
        match cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(ServiceError::Cancelled),
                _ = tokio::time::sleep(self.latency) => Ok(()),
            },
            None => {
                tokio::time::sleep(self.latency).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RowService for InMemoryRowService {
    async fn fetch_rows(
        &self,
        _view: ViewId,
        offset: usize,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<RowPage, ServiceError> {
        self.fetches.lock().push(IndexRange::with_len(offset, limit));
        self.delay(Some(cancel)).await?;
        self.injected(ServiceOp::Fetch)?;
        let table = self.table.lock();
        let count = table.rows.len();
        let start = offset.min(count);
        let end = offset.saturating_add(limit).min(count);
        Ok(RowPage {
            offset,
            limit,
            count,
            rows: table.rows[start..end].to_vec(),
        })
    }

    async fn create_row(&self, _table: TableId, values: &FieldValues) -> Result<Row, ServiceError> {
        self.delay(None).await?;
        self.injected(ServiceOp::Create)?;
        let mut table = self.table.lock();
        table.next_id += 1;
        let row = Self::stored_row(table.next_id, values.clone());
        table.rows.push(row.clone());
        Ok(row)
    }

    async fn update_row(
        &self,
        _table: TableId,
        id: RowId,
        values: &FieldValues,
    ) -> Result<Row, ServiceError> {
        self.delay(None).await?;
        self.injected(ServiceOp::Update)?;
        let mut table = self.table.lock();
        let row = table
            .rows
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or(ServiceError::NotFound)?;
        for (name, value) in values {
            row.values.insert(name.clone(), value.clone());
        }
        Ok(row.clone())
    }

    async fn delete_row(&self, _table: TableId, id: RowId) -> Result<(), ServiceError> {
        self.delay(None).await?;
        self.injected(ServiceOp::Delete)?;
        if self.remove_remote(id) {
            Ok(())
        } else {
            Err(ServiceError::NotFound)
        }
    }

    async fn filter_rows(
        &self,
        _view: ViewId,
        ids: &[RowId],
        field_ids: &[u64],
    ) -> Result<Vec<Row>, ServiceError> {
        self.delay(None).await?;
        self.injected(ServiceOp::Filter)?;
        let names: Vec<String> = field_ids.iter().map(|id| format!("field_{id}")).collect();
        let table = self.table.lock();
        Ok(table
            .rows
            .iter()
            .filter(|row| ids.contains(&row.id))
            .map(|row| {
                let values = names
                    .iter()
                    .filter_map(|name| row.values.get(name).map(|v| (name.clone(), v.clone())))
                    .collect();
                Row::new(row.id, values)
            })
            .collect())
    }
}
