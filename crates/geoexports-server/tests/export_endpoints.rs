use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use geoexports_core::{ColumnInfo, ColumnType, ExportDefinition, Licence, Row, UserRecord};
use geoexports_db_memory::{InMemoryDatasets, InMemoryMetadataStore};
use geoexports_notifications::{ExportNotification, NotificationError, NotificationSender};
use geoexports_server::{AppConfig, AppState, build_app};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<ExportNotification>>,
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, notification: &ExportNotification) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

impl RecordingSender {
    async fn wait_for(&self, count: usize) -> Vec<ExportNotification> {
        for _ in 0..100 {
            let sent = self.sent.lock().unwrap().clone();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.sent.lock().unwrap().clone()
    }
}

struct TestServer {
    base: String,
    sender: Arc<RecordingSender>,
    shutdown: tokio::sync::oneshot::Sender<()>,
    handle: JoinHandle<()>,
    _exports_dir: tempfile::TempDir,
}

fn row(value: Value) -> Row {
    value.as_object().cloned().expect("object row")
}

fn stores() -> (Arc<InMemoryMetadataStore>, Arc<InMemoryDatasets>) {
    let metadata = Arc::new(InMemoryMetadataStore::new());
    metadata
        .insert_export(
            ExportDefinition::new(5, "Observations", "gn_exports", "v_obs")
                .with_geometry("geom", 4326)
                .with_public(true)
                .with_licence(Licence {
                    name: "ODbL".into(),
                    url: "https://opendatacommons.org/licenses/odbl/".into(),
                }),
        )
        .unwrap();
    metadata
        .insert_export(ExportDefinition::new(6, "Sensitive", "gn_exports", "v_obs"))
        .unwrap();
    metadata
        .insert_export(ExportDefinition::new(7, "Dropped", "gn_exports", "v_missing").with_public(true))
        .unwrap();
    metadata.insert_user(UserRecord::new(1).with_email("ana@example.org"));
    metadata.insert_user(UserRecord::new(2));

    let datasets = Arc::new(InMemoryDatasets::new());
    datasets.insert_relation(
        "gn_exports",
        "v_obs",
        vec![
            ColumnInfo::new("name", ColumnType::Text),
            ColumnInfo::new("count", ColumnType::Integer),
            ColumnInfo::new("date_obs", ColumnType::Date),
            ColumnInfo::new("geom", ColumnType::Geometry),
        ],
        vec![
            row(json!({"name": "Smith", "count": 3, "date_obs": "2024-05-01", "geom": {"type": "Point", "coordinates": [2.35, 48.85]}})),
            row(json!({"name": "BLACKSMITH", "count": 12, "date_obs": "2024-06-10", "geom": {"type": "Point", "coordinates": [4.83, 45.76]}})),
            row(json!({"name": "Smythe", "count": 25, "date_obs": "2024-07-21", "geom": {"type": "Point", "coordinates": [5.37, 43.29]}})),
        ],
    );
    (metadata, datasets)
}

async fn start_server() -> TestServer {
    let exports_dir = tempfile::tempdir().expect("tmp dir");
    let mut config = AppConfig::default();
    config.exports.exports_dir = exports_dir.path().to_path_buf();
    config.exports.public_url = "https://data.example.org/exports".into();
    config.swagger.api_endpoint = "https://data.example.org/api/exports".into();

    let (metadata, datasets) = stores();
    let sender = Arc::new(RecordingSender::default());
    let app = build_app(AppState::new(config, metadata, datasets, sender.clone()));

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base: format!("http://{addr}"),
        sender,
        shutdown: tx,
        handle,
        _exports_dir: exports_dir,
    }
}

impl TestServer {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

#[tokio::test]
async fn health_and_identity() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/healthz", server.base)).send().await.unwrap();
    assert!(resp.status().is_success());
    assert!(resp.headers().contains_key("x-request-id"));

    let resp = client.get(format!("{}/", server.base)).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["api_error"], "unauthorized");

    let resp = client
        .get(format!("{}/", server.base))
        .header("x-id-role", "not-a-number")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    server.stop().await;
}

#[tokio::test]
async fn list_exports_for_identity() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/", server.base))
        .header("x-id-role", "1")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    let ids: Vec<i64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![5, 7]);
    assert_eq!(body[0]["licence"]["name"], "ODbL");

    server.stop().await;
}

#[tokio::test]
async fn read_export_pages_and_filters() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    let get = |query: &str| {
        client
            .get(format!("{}/api/5?{query}", server.base))
            .header("x-id-role", "1")
            .send()
    };

    let body: Value = get("").await.unwrap().json().await.unwrap();
    assert_eq!(body["total"], 3);
    assert_eq!(body["total_filtered"], 3);
    assert_eq!(body["page"], 0);
    assert_eq!(body["limit"], 1000);
    assert_eq!(body["items"][0]["geom"]["crs"]["properties"]["name"], "EPSG:4326");

    let body: Value = get("filter_n_up_count=10").await.unwrap().json().await.unwrap();
    assert_eq!(body["total"], 3);
    assert_eq!(body["total_filtered"], 2);

    let body: Value = get("ilikename=smith").await.unwrap().json().await.unwrap();
    let names: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Smith", "BLACKSMITH"]);

    let body: Value = get("limit=1&offset=1&orderby=count&order=desc")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["page"], 1);
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["items"][0]["name"], "BLACKSMITH");

    let body: Value = get("unknown_column=1").await.unwrap().json().await.unwrap();
    assert_eq!(body["total_filtered"], 3);

    let resp = get("filter_d_up_date_obs=yesterday").await.unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["api_error"], "invalid_filter");
    assert_eq!(body["errors"][0]["param"], "filter_d_up_date_obs");

    server.stop().await;
}

#[tokio::test]
async fn read_export_errors() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    let get = |path: &str| {
        client
            .get(format!("{}{path}", server.base))
            .header("x-id-role", "1")
            .send()
    };

    let resp = get("/api/6").await.unwrap();
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Not Allowed");

    let resp = get("/api/999").await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["api_error"], "not_found");

    let resp = get("/api/7").await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["api_error"], "empty_dataset");

    server.stop().await;
}

#[tokio::test]
async fn export_job_is_accepted_and_notifies_once() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/5/csv?filter_n_up_count=10", server.base))
        .header("x-id-role", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body,
        json!({
            "api_success": "in_progress",
            "message": "The Process is in progress ! You will receive an email shortly",
        })
    );

    let sent = server.sender.wait_for(1).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "ana@example.org");
    match &sent[0].outcome {
        geoexports_notifications::ExportOutcome::Succeeded { location, row_count } => {
            assert!(location.starts_with("https://data.example.org/exports/"));
            assert_eq!(*row_count, 2);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn export_job_override_email() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/5/geojson", server.base))
        .header("x-id-role", "2")
        .json(&json!({"email": "field-team@example.org"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let sent = server.sender.wait_for(1).await;
    assert_eq!(sent[0].recipient, "field-team@example.org");

    server.stop().await;
}

#[tokio::test]
async fn export_job_rejections() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    let post = |path: &str, role: &str| {
        client
            .post(format!("{}{path}", server.base))
            .header("x-id-role", role)
            .send()
    };

    let cases = [
        ("/999/csv", "1", 404, "invalid_export"),
        ("/0/csv", "1", 404, "invalid_export"),
        ("/5/xlsx", "1", 404, "invalid_export"),
        ("/6/csv", "1", 403, "forbidden"),
        ("/5/csv", "42", 404, "no_user"),
        ("/5/csv", "2", 500, "no_email"),
        ("/5/csv?filter_n_lo_count=many", "1", 400, "invalid_filter"),
    ];
    for (path, role, status, code) in cases {
        let resp = post(path, role).await.unwrap();
        assert_eq!(resp.status(), status, "{path} as {role}");
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["api_error"], code, "{path} as {role}");
    }

    let resp = client
        .post(format!("{}/5/csv", server.base))
        .header("x-id-role", "1")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Nothing was accepted, so nothing is ever sent.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(server.sender.sent.lock().unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn swagger_documents() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let doc: Value = client
        .get(format!("{}/swagger-resources/5", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(doc["swagger"], "2.0");
    assert_eq!(doc["host"], "data.example.org");
    assert_eq!(doc["basePath"], "/api/exports");
    let names: Vec<&str> = doc["paths"]["/api/5"]["get"]["parameters"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"ilikename"));
    assert!(names.contains(&"filter_d_eq_date_obs"));
    assert!(names.contains(&"limit"));

    let resp = client
        .get(format!("{}/swagger-ressources/999", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let root: Value = client
        .get(format!("{}/swagger-resources/", server.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(root["paths"]["/api/5"].is_object());

    server.stop().await;
}
