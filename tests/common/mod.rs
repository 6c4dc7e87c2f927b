#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use solstate::config::{AppConfig, QueryRef, StorageBackend};
use solstate::state::AppState;
use solstate::storage::object_store::ObjectStore;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub const ADMIN_PASSWORD: &str = "admin-secret";
pub const INTERNAL_PASSWORD: &str = "internal-secret";
pub const STATUS_KEY: &str = "status-key";

/// Stand-in for the analytics API. Query 1 answers with transaction volume
/// rows, every other query with generic chart rows.
#[derive(Default)]
pub struct Upstream {
    pub hits: AtomicUsize,
    pub fail: AtomicBool,
    pub last_body: Mutex<Option<Value>>,
    pub last_api_key: Mutex<Option<String>>,
}

impl Upstream {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

async fn query_results(
    State(upstream): State<Arc<Upstream>>,
    Path(id): Path<String>,
    axum::extract::RawQuery(query): axum::extract::RawQuery,
    body: Bytes,
) -> Response {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    if upstream.fail.load(Ordering::SeqCst) {
        return (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
    }
    *upstream.last_api_key.lock().unwrap() = query
        .as_deref()
        .and_then(|q| q.strip_prefix("api_key="))
        .map(String::from);
    if !body.is_empty() {
        *upstream.last_body.lock().unwrap() = serde_json::from_slice(&body).ok();
    }

    let rows = match id.as_str() {
        "1" => json!([
            {"block_date": "2024-01-02", "total_txns": "300", "vote_txns": 200, "non_vote_txns": 100},
            {"block_date": "2024-01-01", "total_txns": 150, "vote_txns": 100, "non_vote_txns": 50},
        ]),
        _ => json!([
            {"date": "2024-03-01", "tps": 3000, "fees": 3, "ignored": true},
            {"date": "2024-01-01", "tps": 1000, "fees": 1},
            {"date": "2024-02-01", "tps": 2000, "fees": 2},
        ]),
    };
    Json(json!({ "query_result": { "data": { "rows": rows } } })).into_response()
}

pub async fn spawn_upstream() -> (SocketAddr, Arc<Upstream>) {
    let upstream = Arc::new(Upstream::default());
    let app = Router::new()
        .route(
            "/api/queries/{id}/results",
            get(query_results).post(query_results),
        )
        .route("/api/queries/{id}/results.json", get(query_results))
        .with_state(upstream.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, upstream)
}

pub struct TestApp {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    pub upstream: Arc<Upstream>,
    pub upstream_addr: SocketAddr,
    pub client: reqwest::Client,
    pub dir: tempfile::TempDir,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// A results endpoint on the fake analytics API.
    pub fn query_url(&self, id: u64) -> String {
        format!("http://{}/api/queries/{id}/results", self.upstream_addr)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    pub async fn admin_post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(ADMIN_PASSWORD)
            .json(body)
            .send()
            .await
            .unwrap()
    }

    pub async fn admin_put(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .put(self.url(path))
            .bearer_auth(ADMIN_PASSWORD)
            .json(body)
            .send()
            .await
            .unwrap()
    }

    pub async fn admin_delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(self.url(path))
            .bearer_auth(ADMIN_PASSWORD)
            .send()
            .await
            .unwrap()
    }

    pub async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .unwrap()
    }

    pub fn object_path(&self, key: &str) -> std::path::PathBuf {
        self.dir.path().join("objects").join(key)
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Start the API on a random port with file-backed object storage, a fresh
/// SQLite database and the fake analytics API. `customize` runs on the
/// config before anything is built.
pub async fn spawn_app_with(customize: impl FnOnce(&mut AppConfig)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let (upstream_addr, upstream) = spawn_upstream().await;

    let mut config = AppConfig::default();
    config.storage.backend = StorageBackend::Fs;
    config.storage.local_dir = dir.path().join("objects");
    config.database.path = dir.path().join("solstate.db");
    config.temp.dir = dir.path().join("temp");
    config.topledger.base_url = format!("http://{upstream_addr}");
    config.topledger.api_key = "default-key".to_string();
    config.topledger.timeout_secs = 5;
    config
        .topledger
        .queries
        .insert("daily_transactions".into(), QueryRef { id: 1, api_key: None });
    config.auth.admin_password = ADMIN_PASSWORD.to_string();
    config.auth.internal_password = INTERNAL_PASSWORD.to_string();
    config.auth.status_api_key = STATUS_KEY.to_string();
    config.auto_update.command = "sh".to_string();
    config.auto_update.args = vec!["-c".to_string(), "echo updated".to_string()];
    config.auto_update.initial_delay_secs = 3600;
    config.analytics.ga_tracking_id = Some("G-TEST".to_string());
    customize(&mut config);

    std::fs::create_dir_all(&config.storage.local_dir).unwrap();
    let pool = solstate::storage::sqlite::create_pool(&config.database).unwrap();
    solstate::storage::sqlite::init_pool(&pool).await.unwrap();
    let store = ObjectStore::from_config(&config.storage).unwrap();

    let state = Arc::new(AppState::new(config, store, pool).unwrap());
    let app = solstate::routes::build_router(state.clone(), None);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        addr,
        state,
        upstream,
        upstream_addr,
        client: reqwest::Client::new(),
        dir,
    }
}
