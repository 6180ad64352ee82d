use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use parley_cli::{commands, Context, RelayOutcome};
use parley_protocol::{CompletionParams, RELAY_ID_HEADER, RELAY_PATH};
use parley_store::DataDir;
use serde_json::Value;

#[derive(Clone)]
struct Peer {
    received: Arc<Mutex<Vec<(String, Value)>>>,
    status: StatusCode,
}

impl Peer {
    fn take(&self) -> Vec<(String, Value)> {
        std::mem::take(&mut *self.received.lock().unwrap())
    }
}

async fn receive(State(peer): State<Peer>, headers: HeaderMap, body: String) -> StatusCode {
    let id = headers
        .get(RELAY_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let envelope = serde_json::from_str(&body).unwrap();
    peer.received.lock().unwrap().push((id, envelope));
    peer.status
}

/// A stand-in server that records every relayed envelope.
async fn start_peer(status: StatusCode) -> (String, Peer) {
    let peer = Peer {
        received: Arc::new(Mutex::new(Vec::new())),
        status,
    };
    let app = Router::new()
        .route(RELAY_PATH, post(receive))
        .with_state(peer.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), peer)
}

fn open_context() -> (tempfile::TempDir, Context) {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = Context::open(&DataDir::at(tmp.path()), Duration::from_secs(5)).unwrap();
    (tmp, ctx)
}

async fn register(ctx: &Context, address: &str) {
    let store = &ctx.services.store;
    store
        .register_active_session(store.identity(), address)
        .await
        .unwrap();
}

async fn registered_address(ctx: &Context) -> Option<String> {
    let store = &ctx.services.store;
    store
        .lookup_active_session(store.identity())
        .await
        .unwrap()
        .map(|s| s.address)
}

fn kinds(received: &[(String, Value)]) -> Vec<String> {
    received
        .iter()
        .map(|(_, envelope)| envelope["type"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn new_chat_relays_chat_created_then_message_created() {
    let (_tmp, ctx) = open_context();
    let (address, peer) = start_peer(StatusCode::OK).await;
    register(&ctx, &address).await;

    let outcome = commands::chat_new(&ctx, "hello".into(), None, CompletionParams::default())
        .await
        .unwrap();

    let received = peer.take();
    assert_eq!(kinds(&received), vec!["chat-created", "message-created"]);
    assert_eq!(received[0].1["payload"]["chat"]["id"], outcome.chat.id);
    assert_eq!(received[1].1["payload"]["message"]["id"], outcome.assistant.id);
    for (header_id, envelope) in &received {
        assert_eq!(envelope["id"], header_id.as_str());
    }
}

#[tokio::test]
async fn continue_chat_relays_optimistic_user_turn_and_completion() {
    let (_tmp, ctx) = open_context();
    let first = commands::chat_new(&ctx, "hello".into(), None, CompletionParams::default())
        .await
        .unwrap();

    let (address, peer) = start_peer(StatusCode::OK).await;
    register(&ctx, &address).await;

    commands::chat_continue(&ctx, first.chat.id, "again".into(), None, CompletionParams::default())
        .await
        .unwrap();

    let received = peer.take();
    assert_eq!(received.len(), 2);
    assert_eq!(kinds(&received), vec!["message-created", "message-created"]);

    let user = &received[0].1["payload"]["message"];
    assert_eq!(user["role"], "user");
    assert_eq!(user["content"], "again");
    assert_eq!(user["id"], 0);
    assert!(user.get("created_at").map_or(true, Value::is_null));

    let assistant = &received[1].1["payload"]["message"];
    assert_eq!(assistant["role"], "assistant");
    assert_ne!(assistant["id"], 0);

    assert_ne!(received[0].0, received[1].0);
    assert!(!received[0].0.is_empty());
}

#[tokio::test]
async fn without_a_registered_server_commands_still_succeed() {
    let (_tmp, ctx) = open_context();
    let (template, created) = commands::template_upsert(&ctx, "greet".into(), "hi".into())
        .await
        .unwrap();
    assert!(created);
    assert_eq!(template.name, "greet");
}

#[tokio::test]
async fn unreachable_server_is_forgotten_and_command_succeeds() {
    let (_tmp, ctx) = open_context();
    // Bind and release a port so nothing is listening on it.
    let address = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    };
    register(&ctx, &address).await;

    let outcome = commands::chat_new(&ctx, "hello".into(), None, CompletionParams::default()).await;

    assert!(outcome.is_ok());
    assert_eq!(registered_address(&ctx).await, None);
}

#[tokio::test]
async fn rejecting_server_is_forgotten() {
    let (_tmp, ctx) = open_context();
    let (address, peer) = start_peer(StatusCode::INTERNAL_SERVER_ERROR).await;
    register(&ctx, &address).await;

    commands::template_upsert(&ctx, "greet".into(), "hi".into())
        .await
        .unwrap();

    assert_eq!(peer.take().len(), 1);
    assert_eq!(registered_address(&ctx).await, None);
}

#[tokio::test]
async fn notify_peer_reports_each_outcome() {
    let (_tmp, ctx) = open_context();
    let identity = ctx.services.store.identity().to_string();
    let body = r#"{"id":"n-1","type":"reload"}"#.to_string();

    assert_eq!(
        ctx.notifier.notify_peer(&identity, "n-1", body.clone()).await,
        RelayOutcome::NoPeer
    );

    let (address, peer) = start_peer(StatusCode::OK).await;
    register(&ctx, &address).await;
    assert_eq!(
        ctx.notifier.notify_peer(&identity, "n-1", body.clone()).await,
        RelayOutcome::Delivered
    );
    let received = peer.take();
    assert_eq!(received[0].0, "n-1");
    assert_eq!(received[0].1, serde_json::json!({"id": "n-1", "type": "reload"}));

    let (address, _peer) = start_peer(StatusCode::SERVICE_UNAVAILABLE).await;
    register(&ctx, &address).await;
    assert_eq!(
        ctx.notifier.notify_peer(&identity, "n-1", body).await,
        RelayOutcome::PeerRemoved
    );
    assert_eq!(registered_address(&ctx).await, None);
}

#[tokio::test]
async fn template_edit_relays_changed_or_created() {
    let (_tmp, ctx) = open_context();
    commands::template_upsert(&ctx, "greet".into(), "hi".into())
        .await
        .unwrap();

    let (address, peer) = start_peer(StatusCode::OK).await;
    register(&ctx, &address).await;

    commands::template_edit(&ctx, "greet".into(), "hello".into(), false, None)
        .await
        .unwrap();
    commands::template_edit(&ctx, "greet".into(), "good day".into(), true, Some("formal".into()))
        .await
        .unwrap();
    commands::template_delete(&ctx, "formal").await.unwrap();

    let received = peer.take();
    assert_eq!(
        kinds(&received),
        vec!["template-changed", "template-created", "template-deleted"]
    );
    assert_eq!(received[1].1["payload"]["template"]["name"], "formal");
}
