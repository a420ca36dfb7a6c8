//! HTTP client for the remote row service.
//!
//! [`RowClient`] implements [`grid_buffer::RowService`] against the REST
//! endpoints of the database API, so a [`grid_buffer::GridView`] can page
//! through a server-side grid view.

use async_trait::async_trait;
use grid_buffer::{FieldValues, Row, RowId, RowPage, RowService, ServiceError, TableId, ViewId};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

#[derive(Clone)]
pub struct RowClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Error)]
pub enum RowClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus { status: StatusCode, body: String },
}

impl From<RowClientError> for ServiceError {
    fn from(err: RowClientError) -> Self {
        match err {
            RowClientError::Http(err) if err.is_decode() => ServiceError::Decode(err.to_string()),
            RowClientError::Http(err) => ServiceError::Transport(err.to_string()),
            RowClientError::UnexpectedStatus { status, .. } if status == StatusCode::NOT_FOUND => {
                ServiceError::NotFound
            }
            RowClientError::UnexpectedStatus { status, body } => ServiceError::Status {
                status: status.as_u16(),
                body,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    count: usize,
    results: Vec<Row>,
}

#[derive(Debug, Serialize)]
struct FilterRequest<'a> {
    row_ids: &'a [RowId],
    field_ids: &'a [u64],
}

impl RowClient {
    /// `base_url` is the API root, e.g. `http://localhost:8000/api`.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self::with_http(Client::new(), base_url, token)
    }

    pub fn with_http(http: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Token {token}")),
            None => request,
        }
    }

    async fn send_json<T>(&self, request: RequestBuilder) -> Result<T, RowClientError>
    where
        T: DeserializeOwned,
    {
        let res = self.authorize(request).send().await?;
        if res.status().is_success() {
            Ok(res.json::<T>().await?)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(RowClientError::UnexpectedStatus { status, body })
        }
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<(), RowClientError> {
        let res = self.authorize(request).send().await?;
        if res.status().is_success() {
            Ok(())
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(RowClientError::UnexpectedStatus { status, body })
        }
    }

    pub async fn list_rows(
        &self,
        view: ViewId,
        offset: usize,
        limit: usize,
    ) -> Result<RowPage, RowClientError> {
        let url = self.url(&format!("database/views/grid/{}/", view.0));
        trace!(target = "row_client", %url, offset, limit, "listing rows");
        let page: PageResponse = self
            .send_json(self.http.get(url).query(&[("limit", limit), ("offset", offset)]))
            .await?;
        Ok(RowPage {
            offset,
            limit,
            count: page.count,
            rows: page.results,
        })
    }

    pub async fn insert_row(
        &self,
        table: TableId,
        values: &FieldValues,
    ) -> Result<Row, RowClientError> {
        let url = self.url(&format!("database/rows/table/{}/", table.0));
        debug!(target = "row_client", %url, "creating row");
        self.send_json(self.http.post(url).json(values)).await
    }

    pub async fn patch_row(
        &self,
        table: TableId,
        row: RowId,
        values: &FieldValues,
    ) -> Result<Row, RowClientError> {
        let url = self.url(&format!("database/rows/table/{}/{}/", table.0, row));
        debug!(target = "row_client", %url, "updating row");
        self.send_json(self.http.patch(url).json(values)).await
    }

    pub async fn remove_row(&self, table: TableId, row: RowId) -> Result<(), RowClientError> {
        let url = self.url(&format!("database/rows/table/{}/{}/", table.0, row));
        debug!(target = "row_client", %url, "deleting row");
        self.send_empty(self.http.delete(url)).await
    }

    pub async fn filter_fields(
        &self,
        view: ViewId,
        rows: &[RowId],
        field_ids: &[u64],
    ) -> Result<Vec<Row>, RowClientError> {
        let url = self.url(&format!("database/views/grid/{}/", view.0));
        let body = FilterRequest {
            row_ids: rows,
            field_ids,
        };
        self.send_json(self.http.post(url).json(&body)).await
    }
}

#[async_trait]
impl RowService for RowClient {
    async fn fetch_rows(
        &self,
        view: ViewId,
        offset: usize,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<RowPage, ServiceError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                trace!(target = "row_client", offset, limit, "fetch cancelled");
                Err(ServiceError::Cancelled)
            }
            result = self.list_rows(view, offset, limit) => result.map_err(ServiceError::from),
        }
    }

    async fn create_row(&self, table: TableId, values: &FieldValues) -> Result<Row, ServiceError> {
        Ok(self.insert_row(table, values).await?)
    }

    async fn update_row(
        &self,
        table: TableId,
        row: RowId,
        values: &FieldValues,
    ) -> Result<Row, ServiceError> {
        Ok(self.patch_row(table, row, values).await?)
    }

    async fn delete_row(&self, table: TableId, row: RowId) -> Result<(), ServiceError> {
        Ok(self.remove_row(table, row).await?)
    }

    async fn filter_rows(
        &self,
        view: ViewId,
        rows: &[RowId],
        field_ids: &[u64],
    ) -> Result<Vec<Row>, ServiceError> {
        Ok(self.filter_fields(view, rows, field_ids).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_drops_trailing_slash() {
        let client = RowClient::new("http://localhost:8000/api/", None);
        assert_eq!(client.base_url(), "http://localhost:8000/api");
        assert_eq!(
            client.url("database/views/grid/3/"),
            "http://localhost:8000/api/database/views/grid/3/"
        );
    }

    #[test]
    fn not_found_maps_to_service_not_found() {
        let err = RowClientError::UnexpectedStatus {
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        };
        assert_eq!(ServiceError::from(err), ServiceError::NotFound);

        let err = RowClientError::UnexpectedStatus {
            status: StatusCode::BAD_REQUEST,
            body: "ERROR_REQUEST_BODY_VALIDATION".into(),
        };
        assert_eq!(
            ServiceError::from(err),
            ServiceError::Status {
                status: 400,
                body: "ERROR_REQUEST_BODY_VALIDATION".into()
            }
        );
    }
}
