use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use axum::{Json, Router};
use grid_buffer::{
    FieldValues, GridConfig, GridSource, GridView, RowId, RowService, ServiceError, TableId,
    ViewId, Viewport,
};
use row_client::RowClient;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const TOKEN: &str = "secret-token";
const SLOW_VIEW: u64 = 99;

#[derive(Clone, Default)]
struct FakeRows {
    rows: Arc<Mutex<Vec<Map<String, Value>>>>,
    next_id: Arc<Mutex<u64>>,
    auth: Arc<Mutex<Vec<Option<String>>>>,
}

impl FakeRows {
    fn seeded(count: u64) -> Self {
        let fake = Self::default();
        {
            let mut rows = fake.rows.lock().unwrap();
            for id in 1..=count {
                rows.push(stored_row(id, Map::new()));
            }
        }
        *fake.next_id.lock().unwrap() = count;
        fake
    }

    fn record_auth(&self, headers: &HeaderMap) {
        let value = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        self.auth.lock().unwrap().push(value);
    }
}

fn stored_row(id: u64, values: Map<String, Value>) -> Map<String, Value> {
    let mut row = Map::new();
    row.insert("id".into(), json!(id));
    row.insert("order".into(), json!(format!("{id}.00000000000000000000")));
    row.insert("field_1".into(), json!(format!("row {id}")));
    row.extend(values);
    row
}

#[derive(Deserialize)]
struct PageQuery {
    limit: usize,
    offset: usize,
}

#[derive(Deserialize)]
struct FilterBody {
    row_ids: Vec<u64>,
    field_ids: Vec<u64>,
}

async fn list_rows(
    State(fake): State<FakeRows>,
    Path(view): Path<u64>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
) -> Json<Value> {
    fake.record_auth(&headers);
    if view == SLOW_VIEW {
        sleep(Duration::from_secs(30)).await;
    }
    let rows = fake.rows.lock().unwrap();
    let start = query.offset.min(rows.len());
    let end = (query.offset + query.limit).min(rows.len());
    Json(json!({ "count": rows.len(), "results": &rows[start..end] }))
}

async fn filter_rows(
    State(fake): State<FakeRows>,
    Path(_view): Path<u64>,
    Json(body): Json<FilterBody>,
) -> Json<Value> {
    let names: Vec<String> = body.field_ids.iter().map(|id| format!("field_{id}")).collect();
    let rows = fake.rows.lock().unwrap();
    let partial: Vec<Value> = rows
        .iter()
        .filter(|row| {
            row.get("id")
                .and_then(Value::as_u64)
                .is_some_and(|id| body.row_ids.contains(&id))
        })
        .map(|row| {
            let mut out = Map::new();
            out.insert("id".into(), row["id"].clone());
            for name in &names {
                if let Some(value) = row.get(name) {
                    out.insert(name.clone(), value.clone());
                }
            }
            Value::Object(out)
        })
        .collect();
    Json(Value::Array(partial))
}

async fn create_row(
    State(fake): State<FakeRows>,
    Path(_table): Path<u64>,
    headers: HeaderMap,
    Json(values): Json<Map<String, Value>>,
) -> Json<Value> {
    fake.record_auth(&headers);
    let id = {
        let mut next = fake.next_id.lock().unwrap();
        *next += 1;
        *next
    };
    let row = stored_row(id, values);
    fake.rows.lock().unwrap().push(row.clone());
    Json(Value::Object(row))
}

async fn update_row(
    State(fake): State<FakeRows>,
    Path((_table, id)): Path<(u64, u64)>,
    Json(values): Json<Map<String, Value>>,
) -> Response {
    let mut rows = fake.rows.lock().unwrap();
    match rows.iter_mut().find(|row| row["id"] == json!(id)) {
        Some(row) => {
            row.extend(values);
            Json(Value::Object(row.clone())).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "ERROR_ROW_DOES_NOT_EXIST" })),
        )
            .into_response(),
    }
}

async fn delete_row(
    State(fake): State<FakeRows>,
    Path((_table, id)): Path<(u64, u64)>,
) -> StatusCode {
    let mut rows = fake.rows.lock().unwrap();
    let before = rows.len();
    rows.retain(|row| row["id"] != json!(id));
    if rows.len() == before {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn spawn_server(fake: FakeRows) -> String {
    let router = Router::new()
        .route(
            "/api/database/views/grid/:view/",
            get(list_rows).post(filter_rows),
        )
        .route("/api/database/rows/table/:table/", axum::routing::post(create_row))
        .route(
            "/api/database/rows/table/:table/:row/",
            patch(update_row).delete(delete_row),
        )
        .with_state(fake);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}/api/")
}

async fn client_for(fake: &FakeRows) -> RowClient {
    let base = spawn_server(fake.clone()).await;
    RowClient::new(base, Some(TOKEN.to_string()))
}

#[tokio::test]
async fn fetches_page_with_count_and_token() {
    let fake = FakeRows::seeded(50);
    let client = client_for(&fake).await;

    let page = client
        .fetch_rows(ViewId(1), 40, 20, &CancellationToken::new())
        .await
        .expect("page");
    assert_eq!(page.count, 50);
    assert_eq!(page.offset, 40);
    assert_eq!(page.rows.len(), 10);
    assert_eq!(page.rows[0].id, RowId(41));
    assert_eq!(page.rows[0].order.as_deref(), Some("41.00000000000000000000"));
    assert_eq!(page.rows[0].value("field_1"), Some(&json!("row 41")));

    let auth = fake.auth.lock().unwrap().clone();
    assert_eq!(auth, vec![Some(format!("Token {TOKEN}"))]);
}

#[tokio::test]
async fn anonymous_client_sends_no_authorization() {
    let fake = FakeRows::seeded(1);
    let base = spawn_server(fake.clone()).await;
    let client = RowClient::new(base, None);
    client
        .fetch_rows(ViewId(1), 0, 10, &CancellationToken::new())
        .await
        .expect("page");
    assert_eq!(fake.auth.lock().unwrap().clone(), vec![None]);
}

#[tokio::test]
async fn create_update_delete_round_trip() {
    let fake = FakeRows::seeded(3);
    let client = client_for(&fake).await;

    let mut values = FieldValues::new();
    values.insert("field_2".into(), json!(true));
    let created = client.create_row(TableId(5), &values).await.expect("create");
    assert_eq!(created.id, RowId(4));
    assert_eq!(created.value("field_2"), Some(&json!(true)));

    let mut patch = FieldValues::new();
    patch.insert("field_1".into(), json!("renamed"));
    let updated = client
        .update_row(TableId(5), RowId(4), &patch)
        .await
        .expect("update");
    assert_eq!(updated.value("field_1"), Some(&json!("renamed")));
    assert_eq!(updated.value("field_2"), Some(&json!(true)));

    client
        .delete_row(TableId(5), RowId(4))
        .await
        .expect("delete");
    assert_eq!(fake.rows.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn missing_row_maps_to_not_found() {
    let fake = FakeRows::seeded(1);
    let client = client_for(&fake).await;
    let err = client
        .delete_row(TableId(1), RowId(77))
        .await
        .unwrap_err();
    assert_eq!(err, ServiceError::NotFound);

    let err = client
        .update_row(TableId(1), RowId(77), &FieldValues::new())
        .await
        .unwrap_err();
    assert_eq!(err, ServiceError::NotFound);
}

#[tokio::test]
async fn filter_returns_partial_rows() {
    let fake = FakeRows::seeded(5);
    let client = client_for(&fake).await;
    let rows = client
        .filter_rows(ViewId(1), &[RowId(2), RowId(4)], &[1])
        .await
        .expect("filter");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].id, RowId(4));
    assert_eq!(rows[1].value("field_1"), Some(&json!("row 4")));
    assert!(rows[1].order.is_none());
}

#[tokio::test]
async fn cancelled_fetch_returns_promptly() {
    let fake = FakeRows::seeded(5);
    let client = client_for(&fake).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = timeout(
        Duration::from_secs(5),
        client.fetch_rows(ViewId(SLOW_VIEW), 0, 10, &cancel),
    )
    .await
    .expect("cancellation should stop the request");
    assert_eq!(result.unwrap_err(), ServiceError::Cancelled);
}

#[tokio::test]
async fn grid_view_pages_over_http() {
    let fake = FakeRows::seeded(1000);
    let client = client_for(&fake).await;
    let view = GridView::new(GridConfig::default(), Arc::new(client)).expect("config");

    view.load(GridSource::new(ViewId(1), TableId(1)), 660.0)
        .await
        .expect("load");
    assert_eq!(view.window().buffer_limit, 80);

    let viewport = Viewport::new(501.0 * 33.0 - 330.0, 660.0);
    view.fetch_by_scroll_top(viewport).await.expect("scroll");
    view.visible_by_scroll_top(Some(viewport));
    let window = view.window();
    assert_eq!((window.buffer_start, window.buffer_limit), (440, 120));
    assert_eq!(view.visible_rows()[0].id, RowId(485));
}
