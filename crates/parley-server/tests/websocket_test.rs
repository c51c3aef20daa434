//! End-to-end WebSocket tests against a bound server.

use std::{net::SocketAddr, time::Duration};

use futures_util::{SinkExt, StreamExt};
use parley_harness::SimEnv;
use parley_proto::{PresenceStatus, ServerFrame};
use parley_server::{
    Environment, MemoryStorage, Server, ServerRuntimeConfig, Storage, storage::NewConversation,
};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PASSWORD: &str = "hunter22";

/// Users 1 and 2 share direct conversation 1; user 3 is an outsider.
async fn start() -> (SocketAddr, MemoryStorage) {
    let env = SimEnv::new();
    let storage = MemoryStorage::new();
    let password_hash = bcrypt::hash(PASSWORD, 4).unwrap();
    for name in ["alice", "bob", "carol"] {
        storage.create_user(name, &password_hash, env.now()).unwrap();
    }
    storage
        .create_conversation(&NewConversation {
            name: None,
            is_group: false,
            participant_ids: vec![1, 2],
            created_at: env.now(),
        })
        .unwrap();

    let config =
        ServerRuntimeConfig { bind_address: "127.0.0.1:0".to_string(), ..Default::default() };
    let server = Server::bind_with_env(config, storage.clone(), env).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    (addr, storage)
}

async fn connect(addr: SocketAddr, user_id: u64) -> Client {
    let (mut client, _) = connect_async(format!("ws://{addr}/ws?user_id={user_id}")).await.unwrap();

    assert_eq!(next_frame(&mut client).await, Some(ServerFrame::connected()));
    // Registration with the worker completes after the acknowledgment.
    tokio::time::sleep(Duration::from_millis(200)).await;

    client
}

/// Next server frame, or `None` once the server closed the connection.
async fn next_frame(client: &mut Client) -> Option<ServerFrame> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for frame");

        match message {
            Some(Ok(Message::Text(text))) => return Some(ServerFrame::decode(text.as_str()).unwrap()),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {},
            Some(Ok(Message::Close(_)) | Err(_)) | None => return None,
            Some(Ok(other)) => panic!("unexpected message {other:?}"),
        }
    }
}

#[tokio::test]
async fn connect_is_acknowledged() {
    let (addr, _) = start().await;

    let mut client = connect(addr, 1).await;
    client.close(None).await.unwrap();
}

#[tokio::test]
async fn message_reaches_every_participant() {
    let (addr, storage) = start().await;
    let mut alice = connect(addr, 1).await;
    let mut bob = connect(addr, 2).await;
    let mut carol = connect(addr, 3).await;

    alice
        .send(Message::text(r#"{"conversation_id": 1, "content": "hello bob"}"#))
        .await
        .unwrap();

    for client in [&mut alice, &mut bob] {
        match next_frame(client).await {
            Some(ServerFrame::Message(broadcast)) => {
                assert_eq!(broadcast.sender_id, 1);
                assert_eq!(broadcast.content, "hello bob");
                assert_eq!(broadcast.recipient_ids, vec![1, 2]);
            },
            other => panic!("expected message frame, got {other:?}"),
        }
    }

    let none = tokio::time::timeout(Duration::from_millis(200), carol.next()).await;
    assert!(none.is_err(), "outsider must not receive the message");

    assert_eq!(storage.message_count(), 1);
    assert_eq!(storage.load_delivery_statuses(1).unwrap().len(), 2);
}

#[tokio::test]
async fn spoofed_sender_drops_connection() {
    let (addr, storage) = start().await;
    let mut alice = connect(addr, 1).await;

    alice
        .send(Message::text(r#"{"conversation_id": 1, "sender_id": 2, "content": "not me"}"#))
        .await
        .unwrap();

    assert_eq!(next_frame(&mut alice).await, None);
    assert_eq!(storage.message_count(), 0);
}

#[tokio::test]
async fn malformed_frame_drops_connection() {
    let (addr, _) = start().await;
    let mut alice = connect(addr, 1).await;

    alice.send(Message::text("not json")).await.unwrap();

    assert_eq!(next_frame(&mut alice).await, None);
}

#[tokio::test]
async fn reconnect_closes_previous_connection() {
    let (addr, _) = start().await;
    let mut first = connect(addr, 1).await;
    let mut second = connect(addr, 1).await;
    let mut bob = connect(addr, 2).await;

    assert_eq!(next_frame(&mut first).await, None);

    bob.send(Message::text(r#"{"conversation_id": 1, "content": "still there?"}"#))
        .await
        .unwrap();

    assert!(matches!(next_frame(&mut second).await, Some(ServerFrame::Message(_))));
}

#[tokio::test]
async fn login_presence_reaches_connected_users() {
    let (addr, storage) = start().await;
    let mut bob = connect(addr, 2).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/login"))
        .json(&json!({ "username": "alice", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user"]["id"], 1);
    assert_eq!(body["user"]["status"], "online");

    assert_eq!(next_frame(&mut bob).await, Some(ServerFrame::status(1, PresenceStatus::Online)));
    assert_eq!(storage.load_user(1).unwrap().unwrap().status, PresenceStatus::Online);
}

#[tokio::test]
async fn upgrade_requires_user_id() {
    let (addr, _) = start().await;

    let result = connect_async(format!("ws://{addr}/ws")).await;

    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 400);
        },
        other => panic!("expected HTTP 400, got {:?}", other.map(|_| ())),
    }
}
