use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use content_sync::remote::RestClient;
use content_sync::{
    ContentSyncStore, Destination, ImageRef, Origin, Package, RowService, ServiceConfig, SyncError,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

const ANON_KEY: &str = "test-anon";

/// Minimal stand-in for the hosted service: REST rows, object storage and
/// the realtime socket.
#[derive(Clone)]
struct MockService {
    tables: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    requests: Arc<Mutex<Vec<String>>>,
    inserted: Arc<Mutex<Vec<Value>>>,
    uploads: Arc<Mutex<Vec<(String, String)>>>,
    joined: Arc<Mutex<Vec<String>>>,
    left: Arc<Mutex<Vec<String>>>,
    next_id: Arc<AtomicU64>,
    push: broadcast::Sender<String>,
}

impl MockService {
    fn new() -> Self {
        let tables = ["packages", "blogs", "destinations", "live_tickets"]
            .into_iter()
            .map(|t| (t.to_string(), Vec::new()))
            .collect();
        Self {
            tables: Arc::new(Mutex::new(tables)),
            requests: Arc::default(),
            inserted: Arc::default(),
            uploads: Arc::default(),
            joined: Arc::default(),
            left: Arc::default(),
            next_id: Arc::new(AtomicU64::new(100)),
            push: broadcast::channel(16).0,
        }
    }

    fn seed(&self, table: &str, rows: Vec<Value>) {
        self.tables.lock().unwrap().insert(table.to_string(), rows);
    }

    fn record(&self, line: String) {
        self.requests.lock().unwrap().push(line);
    }
}

fn same_id(row: &Value, id: &str) -> bool {
    match &row["id"] {
        Value::String(s) => s == id,
        Value::Number(n) => n.to_string() == id,
        _ => false,
    }
}

fn id_filter(params: &HashMap<String, String>) -> String {
    params
        .get("id")
        .and_then(|f| f.strip_prefix("eq."))
        .unwrap_or_default()
        .to_string()
}

fn missing_table(table: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": format!("relation \"public.{table}\" does not exist") })),
    )
        .into_response()
}

async fn select_rows(
    State(mock): State<MockService>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let apikey = headers.get("apikey").and_then(|v| v.to_str().ok()).unwrap_or("");
    mock.record(format!(
        "GET {table} select={} order={} apikey={apikey}",
        params.get("select").map(String::as_str).unwrap_or(""),
        params.get("order").map(String::as_str).unwrap_or(""),
    ));

    match mock.tables.lock().unwrap().get(&table) {
        Some(rows) => Json(rows.clone()).into_response(),
        None => missing_table(&table),
    }
}

async fn insert_row(
    State(mock): State<MockService>,
    Path(table): Path<String>,
    Json(mut row): Json<Value>,
) -> Response {
    mock.record(format!("POST {table}"));
    mock.inserted.lock().unwrap().push(row.clone());

    let mut tables = mock.tables.lock().unwrap();
    let Some(rows) = tables.get_mut(&table) else {
        return missing_table(&table);
    };
    row["id"] = json!(mock.next_id.fetch_add(1, Ordering::SeqCst));
    rows.insert(0, row.clone());
    (StatusCode::CREATED, Json(vec![row])).into_response()
}

async fn update_row(
    State(mock): State<MockService>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Json(row): Json<Value>,
) -> Response {
    let id = id_filter(&params);
    mock.record(format!("PATCH {table} id={id}"));

    let mut tables = mock.tables.lock().unwrap();
    let Some(rows) = tables.get_mut(&table) else {
        return missing_table(&table);
    };
    let updated: Vec<Value> = rows
        .iter_mut()
        .filter(|r| same_id(r, &id))
        .map(|stored| {
            if let (Some(target), Some(fields)) = (stored.as_object_mut(), row.as_object()) {
                for (key, value) in fields {
                    target.insert(key.clone(), value.clone());
                }
            }
            stored.clone()
        })
        .collect();
    Json(updated).into_response()
}

async fn delete_row(
    State(mock): State<MockService>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let id = id_filter(&params);
    mock.record(format!("DELETE {table} id={id}"));

    match mock.tables.lock().unwrap().get_mut(&table) {
        Some(rows) => {
            rows.retain(|r| !same_id(r, &id));
            StatusCode::NO_CONTENT.into_response()
        }
        None => missing_table(&table),
    }
}

async fn upload_object(
    State(mock): State<MockService>,
    Path((bucket, path)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "empty body").into_response();
    }
    mock.uploads.lock().unwrap().push((format!("{bucket}/{path}"), content_type));
    Json(json!({ "Key": format!("{bucket}/{path}") })).into_response()
}

async fn realtime(State(mock): State<MockService>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, mock))
}

async fn serve_socket(mut socket: WebSocket, mock: MockService) {
    let mut pushed = mock.push.subscribe();
    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(msg)) = incoming else { break };
                let WsMessage::Text(text) = msg else { continue };
                let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else { continue };
                let topic = frame["topic"].as_str().unwrap_or_default().to_string();

                match frame["event"].as_str() {
                    Some("phx_join") => {
                        mock.joined.lock().unwrap().push(topic.clone());
                        let reply = json!({
                            "topic": topic,
                            "event": "phx_reply",
                            "payload": { "status": "ok", "response": {} },
                            "ref": frame["ref"],
                        });
                        if socket.send(WsMessage::Text(reply.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Some("phx_leave") => mock.left.lock().unwrap().push(topic),
                    _ => {}
                }
            }
            Ok(text) = pushed.recv() => {
                if socket.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn spawn_service(mock: MockService) -> SocketAddr {
    let app = Router::new()
        .route(
            "/rest/v1/{table}",
            get(select_rows).post(insert_row).patch(update_row).delete(delete_row),
        )
        .route("/storage/v1/object/{bucket}/{*path}", post(upload_object))
        .route("/realtime/v1/websocket", get(realtime))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

fn config_for(addr: SocketAddr) -> ServiceConfig {
    ServiceConfig {
        url: format!("http://{addr}"),
        anon_key: ANON_KEY.to_string(),
        ..Default::default()
    }
}

async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let waited = timeout(Duration::from_secs(3), async {
        while !condition() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

fn inline_png() -> String {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(40, 40, image::Rgb([200, 120, 30])));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rest_load_and_write_through() {
    let mock = MockService::new();
    mock.seed(
        "packages",
        vec![json!({
            "id": 1,
            "destination": "Queen Elizabeth NP",
            "price": 640,
            "duration": "2 Days",
            "description": "Tree-climbing lions",
            "image": "https://cdn.test/qenp.jpg",
            "rating": 4.6,
            "itinerary": null,
            "is_starred": false,
            "created_at": "2024-05-01T10:00:00Z"
        })],
    );
    let addr = spawn_service(mock.clone()).await;
    let store = ContentSyncStore::connect(&config_for(addr)).unwrap();

    assert!(store.load().await);
    let packages = store.packages();
    assert_eq!(packages.len(), 1);
    assert_eq!(packages[0].id, "1");
    assert_eq!(packages[0].price, 640.0);
    assert_eq!(store.live_tickets().len(), 5, "empty ticket table shows the seed set");
    assert!(mock
        .requests
        .lock()
        .unwrap()
        .contains(&format!("GET packages select=* order=created_at.desc apikey={ANON_KEY}")));

    // add with an inline image: upload first, then insert the hosted URL
    let saved = store
        .add(Package {
            id: String::new(),
            destination: "Sipi Falls".to_string(),
            price: 320.0,
            duration: "1 Day".to_string(),
            description: "Coffee tour".to_string(),
            image: ImageRef::from(inline_png()),
            rating: 4.4,
            itinerary: None,
            is_starred: false,
        })
        .await
        .unwrap();

    let uploads = mock.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    let (object, content_type) = &uploads[0];
    assert!(object.starts_with("images/packages/"));
    assert!(object.ends_with(".jpg"));
    assert_eq!(content_type, "image/jpeg");
    assert_eq!(
        saved.image.as_str(),
        format!("http://{addr}/storage/v1/object/public/{object}")
    );

    let inserted = mock.inserted.lock().unwrap()[0].clone();
    assert!(inserted.get("id").is_none());
    assert_eq!(inserted["image"], saved.image.as_str());
    assert_eq!(store.packages()[0].id, saved.id);

    // update keeps the hosted image as-is
    let mut changed = saved.clone();
    changed.price = 350.0;
    let updated = store.update(changed).await.unwrap();
    assert_eq!(updated.price, 350.0);
    assert_eq!(mock.uploads.lock().unwrap().len(), 1);
    assert!(mock
        .requests
        .lock()
        .unwrap()
        .contains(&format!("PATCH packages id={}", saved.id)));

    store.delete::<Package>(&saved.id).await.unwrap();
    let ids: Vec<String> = store.packages().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, ["1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn service_errors_surface_status() {
    let mock = MockService::new();
    let addr = spawn_service(mock).await;
    let client = RestClient::new(&config_for(addr)).unwrap();

    let err = client.select_all("bookings").await.unwrap_err();
    match err {
        SyncError::Service { status, message } => {
            assert_eq!(status, 404);
            assert!(message.contains("bookings"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // PATCH matching no row comes back empty
    let err = client.update("blogs", "42", json!({ "title": "x" })).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn realtime_changes_reach_store() {
    let mock = MockService::new();
    mock.seed(
        "destinations",
        vec![json!({ "id": 1, "region": "Kampala", "image": "", "details": "Capital" })],
    );
    let addr = spawn_service(mock.clone()).await;
    let store = ContentSyncStore::connect(&config_for(addr)).unwrap();
    let mut events = store.subscribe_events();

    store.start().await;
    wait_for("four channel joins", || mock.joined.lock().unwrap().len() == 4).await;
    assert!(mock
        .joined
        .lock()
        .unwrap()
        .contains(&"realtime:destinations-changes".to_string()));

    let frame = json!({
        "topic": "realtime:destinations-changes",
        "event": "postgres_changes",
        "payload": {
            "data": {
                "type": "INSERT",
                "schema": "public",
                "table": "destinations",
                "record": { "id": 2, "region": "Fort Portal", "image": "", "details": "Crater lakes" },
                "old_record": null
            },
            "ids": [2]
        },
        "ref": null
    });
    mock.push.send(frame.to_string()).unwrap();

    let event = timeout(Duration::from_secs(3), async {
        loop {
            let event = events.recv().await.unwrap();
            if event.origin == Origin::Notification {
                break event;
            }
        }
    })
    .await
    .expect("notification not applied");
    assert_eq!(event.id.as_deref(), Some("2"));

    let regions: Vec<String> = store.destinations().into_iter().map(|d| d.region).collect();
    assert_eq!(regions, ["Fort Portal", "Kampala"]);

    let delete = json!({
        "topic": "realtime:destinations-changes",
        "event": "postgres_changes",
        "payload": { "data": { "type": "DELETE", "record": null, "old_record": { "id": 1 } } },
        "ref": null
    });
    mock.push.send(delete.to_string()).unwrap();
    wait_for("delete applied", || store.get::<Destination>("1").is_none()).await;

    store.teardown().await;
    wait_for("four channel leaves", || mock.left.lock().unwrap().len() == 4).await;
}
