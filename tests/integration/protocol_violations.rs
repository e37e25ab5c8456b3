// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]
//! Integration tests for session termination rules.
//!
//! Malformed frames, unknown directions, wrong recipients, and identity
//! changes end the offending session only. Room service failures drop the
//! triggering message but keep the session open.

use std::sync::Arc;
use std::time::Duration;

use chatter_mediator::backend::{Backend, BackendError};
use chatter_mediator::server::{self, MediatorState};
use chatter_proto::message::{BROADCAST, Envelope, Goodbye, Hello, MessageCollection, RoomCommand};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const ROOM: &str = "lobby";

/// Room service that echoes chat to everyone, fails on `/fail`, and never
/// answers `/hang`.
struct FlakyRoom;

fn echo(content: &str) -> MessageCollection {
    MessageCollection::new(vec![Envelope::addressed(
        "player",
        BROADCAST,
        format!(r#"{{"type":"chat","content":"{content}"}}"#),
    )])
}

impl Backend for FlakyRoom {
    async fn hello(&self, _: &Hello) -> Result<MessageCollection, BackendError> {
        Ok(MessageCollection::default())
    }

    async fn goodbye(&self, _: &Goodbye) -> Result<MessageCollection, BackendError> {
        Ok(MessageCollection::default())
    }

    async fn command(&self, command: &RoomCommand) -> Result<MessageCollection, BackendError> {
        if command.content == "/hang" {
            std::future::pending::<()>().await;
        }
        if command.content == "/fail" {
            return Err(BackendError::Status {
                status: 503,
                body: "room is down".to_string(),
            });
        }
        Ok(echo(&command.content))
    }
}

async fn start_mediator(room_id: Option<&str>) -> (Arc<MediatorState<FlakyRoom>>, String) {
    let mut state =
        MediatorState::new(FlakyRoom).with_backend_timeout(Duration::from_millis(200));
    if let Some(room_id) = room_id {
        state = state.with_room_id(room_id);
    }
    let state = Arc::new(state);
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start mediator");
    (state, format!("ws://{addr}/"))
}

async fn connect(url: &str) -> Client {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    assert_eq!(recv(&mut ws).await, r#"ack,{"version":[1]}"#);
    ws
}

async fn send(ws: &mut Client, line: &str) {
    ws.send(Message::text(line.to_string())).await.unwrap();
}

async fn recv(ws: &mut Client) -> String {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("recv timed out")
        .expect("stream ended")
        .expect("websocket error");
    String::from_utf8(msg.into_data().to_vec()).unwrap()
}

async fn assert_closed(ws: &mut Client) {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("connection was not closed")
        {
            None | Some(Err(_) | Ok(Message::Close(_))) => return,
            Some(Ok(_)) => {}
        }
    }
}

/// Connects and identifies as `user_id`.
async fn join(url: &str, user_id: &str) -> Client {
    let mut ws = connect(url).await;
    send(
        &mut ws,
        &format!(r#"roomHello,{ROOM},{{"username":"{user_id}","userId":"{user_id}"}}"#),
    )
    .await;
    ws
}

async fn chat(ws: &mut Client, user_id: &str, content: &str) {
    send(
        ws,
        &format!(r#"room,{ROOM},{{"userId":"{user_id}","content":"{content}"}}"#),
    )
    .await;
}

fn echoed(content: &str) -> String {
    format!(r#"player,*,{{"type":"chat","content":"{content}"}}"#)
}

/// Sends `line` from a fresh identified client and checks that only that
/// client is disconnected.
async fn assert_terminates(line: &str) {
    let (state, url) = start_mediator(Some(ROOM)).await;
    let mut bystander = join(&url, "u1").await;
    let mut offender = join(&url, "u2").await;

    let registry = Arc::clone(state.registry());
    for _ in 0..100 {
        if registry.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    send(&mut offender, line).await;
    assert_closed(&mut offender).await;

    assert!(state.registry().lookup("u2").is_none());
    chat(&mut bystander, "u1", "still here").await;
    assert_eq!(recv(&mut bystander).await, echoed("still here"));
}

#[tokio::test]
async fn wrong_recipient_terminates_session() {
    assert_terminates(r#"room,elsewhere,{"userId":"u2","content":"hi"}"#).await;
}

#[tokio::test]
async fn missing_recipient_terminates_session_when_room_is_set() {
    assert_terminates(r#"room,{"userId":"u2","content":"hi"}"#).await;
}

#[tokio::test]
async fn unknown_direction_terminates_session() {
    assert_terminates(&format!(r#"roomDance,{ROOM},{{"userId":"u2"}}"#)).await;
}

#[tokio::test]
async fn malformed_envelope_terminates_session() {
    assert_terminates("no separator here").await;
}

#[tokio::test]
async fn recipient_without_payload_terminates_session() {
    assert_terminates(&format!("room,{ROOM}")).await;
}

#[tokio::test]
async fn invalid_payload_terminates_session() {
    assert_terminates(&format!("room,{ROOM},not json")).await;
}

#[tokio::test]
async fn identity_change_terminates_session() {
    assert_terminates(&format!(
        r#"roomHello,{ROOM},{{"username":"Mallory","userId":"u3"}}"#
    ))
    .await;
}

#[tokio::test]
async fn hello_without_user_id_terminates_session() {
    let (state, url) = start_mediator(None).await;
    let mut ws = connect(&url).await;

    send(&mut ws, r#"roomHello,{"username":"Nobody"}"#).await;

    assert_closed(&mut ws).await;
    assert!(state.registry().is_empty());
}

#[tokio::test]
async fn any_recipient_accepted_without_room_id() {
    let (_state, url) = start_mediator(None).await;
    let mut ws = connect(&url).await;
    send(&mut ws, r#"roomHello,anywhere,{"userId":"u1"}"#).await;

    send(&mut ws, r#"room,{"userId":"u1","content":"unaddressed"}"#).await;
    assert_eq!(recv(&mut ws).await, echoed("unaddressed"));

    send(&mut ws, r#"room,somewhere,{"userId":"u1","content":"addressed"}"#).await;
    assert_eq!(recv(&mut ws).await, echoed("addressed"));
}

#[tokio::test]
async fn binary_frames_are_decoded_like_text() {
    let (_state, url) = start_mediator(Some(ROOM)).await;
    let mut ws = join(&url, "u1").await;

    let line = format!(r#"room,{ROOM},{{"userId":"u1","content":"bytes"}}"#);
    ws.send(Message::binary(line.into_bytes())).await.unwrap();

    assert_eq!(recv(&mut ws).await, echoed("bytes"));
}

#[tokio::test]
async fn backend_failure_keeps_session_open() {
    let (state, url) = start_mediator(Some(ROOM)).await;
    let mut ws = join(&url, "u1").await;

    chat(&mut ws, "u1", "/fail").await;
    chat(&mut ws, "u1", "delivered").await;

    // The failed call produced nothing; the next one goes through.
    assert_eq!(recv(&mut ws).await, echoed("delivered"));
    assert!(state.registry().lookup("u1").is_some());
}

#[tokio::test]
async fn backend_timeout_keeps_session_open() {
    let (state, url) = start_mediator(Some(ROOM)).await;
    let mut ws = join(&url, "u1").await;

    chat(&mut ws, "u1", "/hang").await;
    chat(&mut ws, "u1", "after").await;

    assert_eq!(recv(&mut ws).await, echoed("after"));
    assert!(state.registry().lookup("u1").is_some());
}
