//! HTTP API tests against the in-process router.

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use parley_harness::SimEnv;
use parley_proto::{PresenceStatus, ServerFrame};
use parley_server::{
    AppState, ChannelConnection, DeliveryConfig, DeliveryCore, DeliveryHandle, MemoryStorage,
    OutboundQueue, Storage, router,
};
use serde_json::{Value, json};
use tower::ServiceExt;

/// Cheapest cost bcrypt accepts.
const TEST_COST: u32 = 4;

const PASSWORD: &str = "hunter22";

struct TestApp {
    router: Router,
    storage: MemoryStorage,
    delivery: DeliveryHandle<ChannelConnection>,
}

impl TestApp {
    fn new() -> Self {
        let env = SimEnv::new();
        let storage = MemoryStorage::new();
        let core = DeliveryCore::new(env.clone(), storage.clone(), DeliveryConfig::default());
        let (delivery, _worker) = DeliveryHandle::spawn(core, 64).unwrap();

        let state = AppState {
            storage: storage.clone(),
            env,
            delivery: delivery.clone(),
            outbound_capacity: 16,
            password_cost: TEST_COST,
        };

        Self { router: router(state), storage, delivery }
    }

    async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = body.map_or_else(Body::empty, |json| Body::from(json.to_string()));
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };

        (status, value)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    async fn register(&self, username: &str) -> u64 {
        let (status, body) = self.post("/api/register", json!({ "username": username, "password": PASSWORD })).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["user"]["id"].as_u64().unwrap()
    }

    /// Live connection for `user_id`, registered straight with the worker.
    async fn connect(&self, user_id: u64, connection_id: u64) -> OutboundQueue {
        let (connection, queue) = ChannelConnection::new(connection_id, 16);
        self.delivery.register(user_id, connection).await.unwrap();
        queue
    }
}

async fn next_frame(queue: &mut OutboundQueue) -> Option<ServerFrame> {
    let frame = tokio::time::timeout(std::time::Duration::from_secs(2), queue.next())
        .await
        .expect("timed out waiting for frame")?;
    Some(ServerFrame::decode(&frame).unwrap())
}

#[tokio::test]
async fn health_returns_ok() {
    let app = TestApp::new();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn register_validates_and_rejects_duplicates() {
    let app = TestApp::new();

    let (status, body) =
        app.post("/api/register", json!({ "username": "  alice ", "password": PASSWORD })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["status"], "offline");
    assert_eq!(body["user"]["id"], 1);

    let (status, _) =
        app.post("/api/register", json!({ "username": "alice", "password": PASSWORD })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) =
        app.post("/api/register", json!({ "username": " ab ", "password": PASSWORD })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "username must be at least 3 characters");

    let (status, body) =
        app.post("/api/register", json!({ "username": "bobby", "password": "12345" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "password must be at least 6 characters");
}

#[tokio::test]
async fn password_is_hashed_and_never_returned() {
    let app = TestApp::new();

    let (_, body) =
        app.post("/api/register", json!({ "username": "alice", "password": PASSWORD })).await;

    let user = body["user"].as_object().unwrap();
    assert!(user.keys().all(|k| !k.contains("password")), "{body}");

    let hash = app.storage.load_password_hash(1).unwrap().unwrap();
    assert_ne!(hash, PASSWORD);
    assert!(bcrypt::verify(PASSWORD, &hash).unwrap());
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let app = TestApp::new();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/register")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "invalid JSON body");
}

#[tokio::test]
async fn login_broadcasts_presence() {
    let app = TestApp::new();
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;
    let mut bob_queue = app.connect(bob, 900).await;

    let (status, body) =
        app.post("/api/login", json!({ "username": "unknown", "password": PASSWORD })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid credentials");

    let (status, body) =
        app.post("/api/login", json!({ "username": "   ", "password": PASSWORD })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "username and password required");

    let (status, body) =
        app.post("/api/login", json!({ "username": "alice", "password": PASSWORD })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["id"], alice);
    assert_eq!(body["user"]["status"], "online");
    assert!(body["user"]["last_seen"].is_string());

    assert_eq!(next_frame(&mut bob_queue).await, Some(ServerFrame::status(alice, PresenceStatus::Online)));
    assert_eq!(app.storage.load_user(alice).unwrap().unwrap().status, PresenceStatus::Online);
}

#[tokio::test]
async fn logout_closes_connection_and_notifies_others() {
    let app = TestApp::new();
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;
    let mut alice_queue = app.connect(alice, 100).await;
    let mut bob_queue = app.connect(bob, 200).await;

    let (status, body) = app.post("/api/logout", json!({ "user_id": alice })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "logged out successfully, status set to offline");

    assert_eq!(next_frame(&mut bob_queue).await, Some(ServerFrame::status(alice, PresenceStatus::Offline)));
    assert_eq!(next_frame(&mut alice_queue).await, None);

    let (status, _) = app.request(Method::POST, &format!("/api/logout?user_id={bob}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next_frame(&mut bob_queue).await, None);
}

#[tokio::test]
async fn logout_requires_user_id() {
    let app = TestApp::new();

    let (status, body) = app.request(Method::POST, "/api/logout", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "user_id is required in the JSON body or query parameter for logout");

    let (status, _) = app.post("/api/logout", json!({ "user_id": 0 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn users_are_listed_by_username() {
    let app = TestApp::new();
    for name in ["carol", "alice", "bob"] {
        app.register(name).await;
    }

    let (status, body) = app.get("/api/users").await;

    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = body["users"].as_array().unwrap().iter().map(|u| u["username"].clone()).collect();
    assert_eq!(names, vec!["alice", "bob", "carol"]);
}

#[tokio::test]
async fn direct_conversations_are_deduplicated() {
    let app = TestApp::new();
    let a = app.register("alice").await;
    let b = app.register("bob").await;

    let (status, body) = app
        .post("/api/conversations", json!({ "participant_ids": [a, b], "name": "ignored" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["conversation"]["id"].clone();
    assert_eq!(body["conversation"]["name"], Value::Null);

    let (status, body) = app.post("/api/conversations", json!({ "participant_ids": [b, a] })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conversation"]["id"], id);
    assert_eq!(body["message"], "Conversation already exists");
}

#[tokio::test]
async fn conversation_validation() {
    let app = TestApp::new();
    let a = app.register("alice").await;

    let (status, body) = app.post("/api/conversations", json!({ "participant_ids": [a, a] })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "at least 2 participants required");

    let (status, body) = app.post("/api/conversations", json!({ "participant_ids": [a, 77] })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "user 77 not found");
}

#[tokio::test]
async fn groups_keep_name_and_list_per_user() {
    let app = TestApp::new();
    let a = app.register("alice").await;
    let b = app.register("bob").await;
    let c = app.register("carol").await;

    let (status, body) = app
        .post(
            "/api/conversations",
            json!({ "participant_ids": [a, b, c], "name": "team", "is_group": true }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["conversation"]["name"], "team");
    assert_eq!(body["conversation"]["participant_ids"], json!([a, b, c]));

    app.post("/api/conversations", json!({ "participant_ids": [a, b] })).await;

    let (_, body) = app.get(&format!("/api/conversations?user_id={c}")).await;
    assert_eq!(body["conversations"].as_array().unwrap().len(), 1);
    let (_, body) = app.get(&format!("/api/conversations?user_id={a}")).await;
    assert_eq!(body["conversations"].as_array().unwrap().len(), 2);

    let (status, body) = app.get("/api/conversations").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "user_id required");
}

#[tokio::test]
async fn send_message_persists_and_fans_out() {
    let app = TestApp::new();
    let a = app.register("alice").await;
    let b = app.register("bob").await;
    let (_, body) = app.post("/api/conversations", json!({ "participant_ids": [a, b] })).await;
    let conv = body["conversation"]["id"].as_u64().unwrap();
    let mut bob_queue = app.connect(b, 200).await;

    let (status, body) = app
        .post(
            "/api/messages",
            json!({ "conversation_id": conv, "sender_id": a, "content": "hello", "message_type": "text" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"]["id"], 1);
    assert_eq!(body["message"]["recipient_ids"], json!([a, b]));

    match next_frame(&mut bob_queue).await {
        Some(ServerFrame::Message(broadcast)) => {
            assert_eq!(broadcast.id, 1);
            assert_eq!(broadcast.content, "hello");
        },
        other => panic!("expected message frame, got {other:?}"),
    }

    let rows = app.storage.load_delivery_statuses(1).unwrap();
    assert_eq!(rows.len(), 2);

    app.post("/api/messages", json!({ "conversation_id": conv, "sender_id": b, "content": "hi back" }))
        .await;

    let (status, body) = app.get(&format!("/api/messages?conversation_id={conv}")).await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<_> =
        body["messages"].as_array().unwrap().iter().map(|m| m["content"].clone()).collect();
    assert_eq!(contents, vec!["hello", "hi back"]);
}

#[tokio::test]
async fn send_message_errors() {
    let app = TestApp::new();
    let a = app.register("alice").await;
    let b = app.register("bob").await;
    let c = app.register("carol").await;
    let (_, body) = app.post("/api/conversations", json!({ "participant_ids": [a, b] })).await;
    let conv = body["conversation"]["id"].as_u64().unwrap();

    let (status, _) = app
        .post("/api/messages", json!({ "conversation_id": 99, "sender_id": a, "content": "x" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post("/api/messages", json!({ "conversation_id": conv, "sender_id": c, "content": "x" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.get("/api/messages?conversation_id=99").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.get("/api/messages").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "conversation_id required");

    assert_eq!(app.storage.message_count(), 0);
}

#[tokio::test]
async fn login_rejects_wrong_or_missing_password() {
    let app = TestApp::new();
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;
    let mut bob_queue = app.connect(bob, 900).await;

    let (status, body) =
        app.post("/api/login", json!({ "username": "alice", "password": "wrong-password" })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid credentials");

    let (status, body) = app.post("/api/login", json!({ "username": "alice" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "username and password required");

    // Rejected logins neither change presence nor notify anyone.
    assert_eq!(app.storage.load_user(alice).unwrap().unwrap().status, PresenceStatus::Offline);
    let quiet = tokio::time::timeout(std::time::Duration::from_millis(100), bob_queue.next()).await;
    assert!(quiet.is_err());
}
