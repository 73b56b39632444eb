//! HTTP API against a live server on an ephemeral port

mod common;

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use common::{at, Seed, EVENT_SLUG};
use shiftboard::client::{
    BackoffConfig, ClientConfig, ConnectionState, QueryKey, RecordingCache, SubscriptionManager,
};
use shiftboard::config::Config;
use shiftboard::realtime::LocalRelay;
use shiftboard::server::ShiftboardServer;
use shiftboard::storage::{InMemoryStore, Store};

struct TestServer {
    base: String,
    seed: Seed,
    http: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let seed = Seed::new();
        let store: Arc<dyn Store> =
            Arc::new(InMemoryStore::from_fixture(seed.fixture()).await.unwrap());

        let mut config = Config::default();
        config.server.enable_request_logging = false;
        config.server.keep_alive_secs = 1;

        let server = Arc::new(
            ShiftboardServer::with_relay(config, store, Arc::new(LocalRelay::default()))
                .await
                .unwrap(),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            base,
            seed,
            http: reqwest::Client::new(),
            shutdown: Some(tx),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn post(&self, path: &str, user: Option<&shiftboard::models::User>, body: Value) -> (StatusCode, Value) {
        let mut request = self.http.post(self.url(path)).json(&body);
        if let Some(user) = user {
            request = request.header("X-User-Id", user.id.to_string());
        }
        let response = request.send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str, user: Option<&shiftboard::models::User>) -> (StatusCode, Value) {
        let mut request = self.http.get(self.url(path));
        if let Some(user) = user {
            request = request.header("X-User-Id", user.id.to_string());
        }
        let response = request.send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    fn shift_body(&self, user: &shiftboard::models::User, start: u32, end: u32) -> Value {
        json!({
            "team_id": self.seed.bar.id,
            "assignee_id": user.id,
            "start": at(start, 0),
            "end": at(end, 0),
        })
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(15), self.handle)
            .await
            .expect("server did not shut down")
            .unwrap();
    }
}

fn shifts_path() -> String {
    format!("/api/events/{EVENT_SLUG}/shifts")
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start().await;

    let (status, body) = server.get("/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["dispatcher_running"], true);

    server.stop().await;
}

#[tokio::test]
async fn test_caller_identity() {
    let server = TestServer::start().await;
    let body = server.shift_body(&server.seed.alice, 10, 11);

    let (status, err) = server.post(&shifts_path(), None, body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["success"], false);

    let stranger = shiftboard::models::User {
        id: uuid::Uuid::new_v4(),
        name: "Mallory".into(),
        role: shiftboard::models::Role::SuperAdmin,
        is_active: true,
    };
    let (status, _) = server.post(&shifts_path(), Some(&stranger), body).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    server.stop().await;
}

#[tokio::test]
async fn test_shift_lifecycle_status_codes() {
    let server = TestServer::start().await;
    let seed = server.seed.clone();

    let (status, created) = server
        .post(&shifts_path(), Some(&seed.alice), server.shift_body(&seed.alice, 18, 19))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["data"]["shift"]["team_name"], "Bar");
    assert_eq!(created["data"]["shift"]["assignee_name"], "Alice");
    assert_eq!(created["data"]["warnings"], json!([]));
    let shift_id = created["data"]["shift"]["id"].as_str().unwrap().to_string();

    // Fully staffed
    let (status, err) = server
        .post(&shifts_path(), Some(&seed.bob), server.shift_body(&seed.bob, 18, 19))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "team fully staffed for this period");
    assert_eq!(err["code"], "conflict");

    // Inverted window
    let (status, _) = server
        .post(&shifts_path(), Some(&seed.bob), server.shift_body(&seed.bob, 12, 11))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Read-only
    let (status, _) = server
        .post(&shifts_path(), Some(&seed.reed), server.shift_body(&seed.reed, 10, 11))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Unknown event
    let (status, _) = server
        .post(
            "/api/events/nope/shifts",
            Some(&seed.alice),
            server.shift_body(&seed.alice, 10, 11),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Update and delete
    let response = server
        .http
        .put(server.url(&format!("{}/{shift_id}", shifts_path())))
        .header("X-User-Id", seed.alice.id.to_string())
        .json(&json!({ "end": at(19, 30) }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .http
        .delete(server.url(&format!("{}/{shift_id}", shifts_path())))
        .header("X-User-Id", seed.bob.id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = server
        .http
        .delete(server.url(&format!("{}/{shift_id}", shifts_path())))
        .header("X-User-Id", seed.alice.id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    server.stop().await;
}

#[tokio::test]
async fn test_lock_and_coverage_endpoints() {
    let server = TestServer::start().await;
    let seed = server.seed.clone();

    let (status, _) = server
        .post(&format!("/api/events/{EVENT_SLUG}/lock"), Some(&seed.alice), json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, event) = server
        .post(&format!("/api/events/{EVENT_SLUG}/lock"), Some(&seed.erin), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event["data"]["is_locked"], true);

    let (status, err) = server
        .post(&shifts_path(), Some(&seed.alice), server.shift_body(&seed.alice, 10, 11))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["error"], "event is locked");

    let (status, event) = server
        .post(&format!("/api/events/{EVENT_SLUG}/unlock"), Some(&seed.root), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event["data"]["is_locked"], false);

    let coverage_path = format!("/api/events/{EVENT_SLUG}/teams/{}/coverage", seed.bar.id);
    let response = server
        .http
        .put(server.url(&coverage_path))
        .header("X-User-Id", seed.erin.id.to_string())
        .json(&json!({
            "windows": [{ "start": at(10, 0), "end": at(12, 0), "required": 2 }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, _) = server.get(&coverage_path, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, summary) = server.get(&coverage_path, Some(&seed.reed)).await;
    assert_eq!(status, StatusCode::OK);
    let rows = summary["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["requirement"]["required"], 2);
    assert_eq!(rows[0]["level"], "understaffed");

    server.stop().await;
}

#[tokio::test]
async fn test_notification_inbox() {
    let server = TestServer::start().await;
    let seed = server.seed.clone();

    server
        .post(&shifts_path(), Some(&seed.alice), server.shift_body(&seed.alice, 10, 11))
        .await;
    server
        .post(&shifts_path(), Some(&seed.root), server.shift_body(&seed.root, 10, 11))
        .await;

    // Fan-out runs in the background
    let mut inbox = Value::Null;
    for _ in 0..50 {
        let (_, body) = server.get("/api/notifications", Some(&seed.alice)).await;
        if body["data"].as_array().is_some_and(|a| !a.is_empty()) {
            inbox = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let notifications = inbox["data"].as_array().expect("no notification arrived");
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0]["is_read"], false);
    let id = notifications[0]["id"].as_str().unwrap().to_string();

    // Someone else's notification cannot be marked read
    let (status, _) = server
        .post(&format!("/api/notifications/{id}/read"), Some(&seed.bob), json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, read) = server
        .post(&format!("/api/notifications/{id}/read"), Some(&seed.alice), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["data"]["is_read"], true);

    server.stop().await;
}

#[tokio::test]
async fn test_realtime_unknown_event() {
    let server = TestServer::start().await;
    let (status, _) = server.get("/api/realtime?event=nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    server.stop().await;
}

#[tokio::test]
async fn test_subscription_manager_end_to_end() {
    let server = TestServer::start().await;
    let seed = server.seed.clone();

    let cache = Arc::new(RecordingCache::new());
    let config = ClientConfig::new(server.base.clone())
        .for_event(EVENT_SLUG)
        .with_backoff(BackoffConfig::with_delays(10, 50, 3));
    let mut manager = SubscriptionManager::new(config, cache.clone()).unwrap();
    let mut state = manager.state();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let client = tokio::spawn(async move {
        manager
            .run_until(async {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == ConnectionState::Open),
    )
    .await
    .expect("stream never opened")
    .unwrap();

    server
        .post(&shifts_path(), Some(&seed.alice), server.shift_body(&seed.alice, 10, 11))
        .await;

    let grid = QueryKey::Grid {
        slug: EVENT_SLUG.to_string(),
    };
    let mut seen = false;
    for _ in 0..50 {
        if cache.invalidated().contains(&grid) {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(seen, "grid never invalidated: {:?}", cache.invalidated());
    assert!(cache.invalidated().contains(&QueryKey::UnreadNotifications));

    let _ = stop_tx.send(());
    client.await.unwrap().unwrap();
    assert_eq!(*state.borrow(), ConnectionState::Closed);

    server.stop().await;
}

#[tokio::test]
async fn test_metrics_endpoint() {
    shiftboard::metrics::init_metrics().unwrap();
    let server = TestServer::start().await;

    server.get("/api/health", None).await;

    let text = server
        .http
        .get(server.url("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("shiftboard_api_requests_total"));

    server.stop().await;
}
