//! Optimistic row mutations.
//!
//! Each operation changes the buffer before the service call and reconciles
//! it afterwards. Mutations are never cancelled: their outcome is applied even
//! if the user scrolled away in the meantime. Rows are addressed by
//! [`RowKey`], so a result that arrives after its row left the buffer is
//! dropped.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{GridError, GridResult};
use crate::grid::{GridSource, GridView};
use crate::row::{values_with_defaults, Field, FieldValues, Row, RowId, RowKey};
use crate::window::Viewport;

impl GridView {
    fn loaded_source(&self) -> GridResult<GridSource> {
        self.source().ok_or(GridError::NoView)
    }

    /// Appends a placeholder row built from the fields' empty values and
    /// `overrides`, then persists it.
    ///
    /// If the service rejects the row the placeholder stays in the buffer,
    /// unsaved and flagged as failed, and the error is returned.
    pub async fn create_row(&self, fields: &[Field], overrides: FieldValues) -> GridResult<RowKey> {
        let values = values_with_defaults(fields, overrides);
        let (source, key) = {
            let mut state = self.inner.state.lock();
            let source = state.source.ok_or(GridError::NoView)?;
            let key = state.store.push_placeholder(Row::placeholder(values.clone()));
            state.store.refresh_visible(&self.inner.config, None);
            (source, key)
        };
        debug!(target = "grid::mutation", key = key.get(), "creating row");

        match self.inner.service.create_row(source.table_id, &values).await {
            Ok(saved) => {
                let id = saved.id;
                if !self.inner.state.lock().store.finalize_row(key, &saved) {
                    debug!(
                        target = "grid::mutation",
                        row_id = %id,
                        "created row is no longer buffered"
                    );
                }
                Ok(key)
            }
            Err(err) => {
                warn!(target = "grid::mutation", error = %err, "create rejected");
                self.inner.state.lock().store.mark_create_failed(key);
                Err(GridError::Create(err))
            }
        }
    }

    /// Sets a cell immediately and persists it, restoring the previous value
    /// if the service rejects the change.
    pub async fn update_cell(&self, key: RowKey, field: &str, value: Value) -> GridResult<()> {
        let (source, row_id, previous) = {
            let mut state = self.inner.state.lock();
            let source = state.source.ok_or(GridError::NoView)?;
            let row_id = saved_id(state.store.row(key), key)?;
            let previous = state
                .store
                .set_cell_value(key, field, value.clone())
                .flatten();
            (source, row_id, previous)
        };

        let mut values = FieldValues::new();
        values.insert(field.to_string(), value);
        match self
            .inner
            .service
            .update_row(source.table_id, row_id, &values)
            .await
        {
            Ok(saved) => {
                self.inner.state.lock().store.update_rows(&[saved]);
                Ok(())
            }
            Err(err) => {
                warn!(
                    target = "grid::mutation",
                    row_id = %row_id,
                    field,
                    error = %err,
                    "update rejected, reverting"
                );
                self.inner
                    .state
                    .lock()
                    .store
                    .restore_cell(key, field, previous);
                Err(GridError::Update {
                    row_id,
                    source: err,
                })
            }
        }
    }

    /// Deletes a persisted row. On success the window is recomputed for
    /// `scroll_top` since removing a row shifts everything below it.
    pub async fn delete_row(&self, key: RowKey, scroll_top: f64) -> GridResult<()> {
        let (source, row_id) = {
            let mut state = self.inner.state.lock();
            let source = state.source.ok_or(GridError::NoView)?;
            let row_id = saved_id(state.store.row(key), key)?;
            state.store.set_row_loading(key, true);
            (source, row_id)
        };
        debug!(target = "grid::mutation", row_id = %row_id, "deleting row");

        if let Err(err) = self
            .inner
            .service
            .delete_row(source.table_id, row_id)
            .await
        {
            warn!(target = "grid::mutation", row_id = %row_id, error = %err, "delete rejected");
            self.inner.state.lock().store.set_row_loading(key, false);
            return Err(GridError::Delete {
                row_id,
                source: err,
            });
        }

        let viewport = {
            let mut state = self.inner.state.lock();
            state.store.delete_row(row_id);
            let viewport = Viewport::new(scroll_top, state.store.viewport().height);
            state.store.refresh_visible(&self.inner.config, Some(viewport));
            viewport
        };
        self.spawn_fetch(viewport);
        Ok(())
    }

    /// Gives every buffered row a value for a newly created field.
    pub fn add_field(&self, field: &Field, value: Option<Value>) {
        let value = value.unwrap_or_else(|| field.kind.empty_value());
        self.inner
            .state
            .lock()
            .store
            .add_field(&field.name(), value);
    }

    pub fn set_row_hover(&self, key: RowKey, hover: bool) -> bool {
        self.inner.state.lock().store.set_row_hover(key, hover)
    }

    /// Reloads one field for every buffered row, e.g. after its formula
    /// changed. Returns how many rows were updated.
    pub async fn refresh_field_values(&self, field: &Field) -> GridResult<usize> {
        let source = self.loaded_source()?;
        let ids: Vec<RowId> = {
            let state = self.inner.state.lock();
            state
                .store
                .rows()
                .iter()
                .map(|row| row.id)
                .filter(|id| !id.is_unsaved())
                .collect()
        };
        if ids.is_empty() {
            return Ok(0);
        }
        let rows = self
            .inner
            .service
            .filter_rows(source.view_id, &ids, &[field.id])
            .await
            .map_err(GridError::Refresh)?;
        Ok(self.update_rows(&rows))
    }
}

fn saved_id(row: Option<&Row>, key: RowKey) -> GridResult<RowId> {
    let row = row.ok_or(GridError::RowNotFound(key))?;
    if row.id.is_unsaved() {
        return Err(GridError::UnsavedRow(key));
    }
    Ok(row.id)
}
