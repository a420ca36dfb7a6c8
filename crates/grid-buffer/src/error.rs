use thiserror::Error;

use crate::row::{RowId, RowKey};
use crate::service::ServiceError;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("no grid view is loaded")]
    NoView,
    #[error("invalid grid configuration: {0}")]
    InvalidConfig(String),
    #[error("fetching {limit} rows at offset {offset} failed: {source}")]
    Fetch {
        offset: usize,
        limit: usize,
        #[source]
        source: ServiceError,
    },
    #[error("creating row failed: {0}")]
    Create(#[source] ServiceError),
    #[error("updating row {row_id} failed: {source}")]
    Update {
        row_id: RowId,
        #[source]
        source: ServiceError,
    },
    #[error("deleting row {row_id} failed: {source}")]
    Delete {
        row_id: RowId,
        #[source]
        source: ServiceError,
    },
    #[error("refreshing field values failed: {0}")]
    Refresh(#[source] ServiceError),
    #[error("row {0:?} is not held by the buffer")]
    RowNotFound(RowKey),
    #[error("row {0:?} has not been saved yet")]
    UnsavedRow(RowKey),
}

pub type GridResult<T> = Result<T, GridError>;
