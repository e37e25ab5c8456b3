//! Mediator server core: shared state, WebSocket handler, per-session read
//! loop, and reply fan-out.
//!
//! Every accepted connection becomes a [`Session`] greeted with an `ack`. Its
//! read loop forwards each client message to the room service and routes the
//! replies through the [`SessionRegistry`]: to one user, or to everyone for
//! recipient `*`. Messages from one client are processed strictly in order;
//! nothing is serialized across clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use chatter_proto::codec::{self, CodecError};
use chatter_proto::message::{Envelope, Inbound, MessageCollection, SUPPORTED_VERSIONS, UserInfo};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::backend::{Backend, BackendError};
use crate::config::{DEFAULT_BACKEND_TIMEOUT, MediatorConfig};
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionError};

/// How long a closed session's writer may keep flushing queued lines.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Reasons a session's read loop terminates abnormally.
///
/// [`MediatorError::Backend`] is the exception: it is logged and the session
/// keeps going.
#[derive(Debug, thiserror::Error)]
pub enum MediatorError {
    /// The frame is not a valid envelope, or its payload does not decode.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The client broke the protocol (wrong recipient, identity change, ...).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A session operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Reading from the WebSocket failed.
    #[error("transport error: {0}")]
    Transport(#[from] axum::Error),

    /// The room service could not produce a reply.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// An outbound message could not be serialized.
    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Whether the read loop keeps going after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Shared mediator state: the session registry, the room service, and the
/// routing scope.
pub struct MediatorState<B> {
    registry: Arc<SessionRegistry>,
    backend: B,
    room_id: Option<String>,
    backend_timeout: Duration,
}

impl<B: Backend> MediatorState<B> {
    /// Creates state with a fresh registry, no room id, and the default
    /// backend deadline.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self::with_registry(backend, Arc::new(SessionRegistry::new()))
    }

    /// Creates state around an existing registry.
    #[must_use]
    pub const fn with_registry(backend: B, registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            backend,
            room_id: None,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
        }
    }

    /// Creates state from the resolved configuration.
    #[must_use]
    pub fn from_config(backend: B, config: &MediatorConfig) -> Self {
        let state = Self::new(backend).with_backend_timeout(config.backend_timeout);
        match &config.room_id {
            Some(room_id) => state.with_room_id(room_id.clone()),
            None => state,
        }
    }

    /// Requires every inbound envelope to be addressed to `room_id`.
    #[must_use]
    pub fn with_room_id(mut self, room_id: impl Into<String>) -> Self {
        let room_id = room_id.into();
        self.room_id = (!room_id.is_empty()).then_some(room_id);
        self
    }

    /// Sets the deadline applied to each room service call.
    #[must_use]
    pub const fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    /// The session registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// The room service.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Closes every registered session.
    ///
    /// Each session's writer sends a close frame to its client.
    pub fn close_all_sessions(&self) {
        for session in self.registry.snapshot_all() {
            tracing::info!(session = %session.id(), identity = ?session.identity(), "closing session");
            session.close();
        }
    }

    /// Rejects envelopes not addressed to this mediator's room.
    fn check_recipient(&self, envelope: &Envelope) -> Result<(), MediatorError> {
        match &self.room_id {
            Some(room_id) if envelope.recipient() != Some(room_id.as_str()) => {
                Err(MediatorError::ProtocolViolation(format!(
                    "recipient {:?} doesn't match room id {room_id:?}",
                    envelope.recipient()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Runs a room service call under the configured deadline.
    async fn call_backend(
        &self,
        call: impl Future<Output = Result<MessageCollection, BackendError>> + Send,
    ) -> Result<MessageCollection, BackendError> {
        match tokio::time::timeout(self.backend_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.backend_timeout)),
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Create the session and send the `ack` greeting.
/// 2. Spawn the writer task draining the session's outbound channel.
/// 3. Run the read loop until the client leaves, misbehaves, or the session
///    is closed from elsewhere.
/// 4. Close the session (unregistering it) and let the writer flush.
pub async fn handle_socket<B: Backend>(socket: WebSocket, state: Arc<MediatorState<B>>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let session = Arc::new(Session::new(tx, Arc::downgrade(&state.registry)));

    // Writer: forwards queued lines to the WebSocket until the session
    // releases its outbound channel.
    let writer_session = Arc::clone(&session);
    let write_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = ws_sender.send(frame(line)).await {
                tracing::warn!(session = %writer_session.id(), error = %e, "WebSocket write failed");
                writer_session.close();
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    let result = match greet(&session) {
        Ok(()) => read_loop(&mut ws_receiver, &session, &state).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => tracing::info!(
            session = %session.id(),
            identity = ?session.identity(),
            "client disconnected"
        ),
        Err(e) => tracing::warn!(
            session = %session.id(),
            identity = ?session.identity(),
            error = %e,
            "terminating session"
        ),
    }

    session.close();

    let abort = write_task.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, write_task)
        .await
        .is_err()
    {
        tracing::debug!(session = %session.id(), "writer did not drain in time, aborting");
        abort.abort();
    }
}

/// Queues the `ack` greeting advertising the supported protocol versions.
fn greet(session: &Session) -> Result<(), MediatorError> {
    let ack = Envelope::ack(SUPPORTED_VERSIONS)?;
    tracing::debug!(session = %session.id(), "sending ack");
    session.send(codec::encode(&ack))?;
    Ok(())
}

/// Reads frames until the client disconnects, the session closes, or a
/// session-terminating error occurs.
async fn read_loop<B: Backend>(
    receiver: &mut SplitStream<WebSocket>,
    session: &Arc<Session>,
    state: &MediatorState<B>,
) -> Result<(), MediatorError> {
    loop {
        let next = tokio::select! {
            biased;
            () = session.closed() => return Ok(()),
            next = receiver.next() => next,
        };

        let flow = match next {
            None | Some(Ok(Message::Close(_))) => return Ok(()),
            Some(Err(e)) => return Err(MediatorError::Transport(e)),
            Some(Ok(Message::Text(text))) => {
                handle_frame(text.as_str().as_bytes(), session, state).await?
            }
            Some(Ok(Message::Binary(data))) => handle_frame(&data, session, state).await?,
            Some(Ok(_)) => Flow::Continue, // ping/pong are answered by axum
        };

        if flow == Flow::Stop {
            return Ok(());
        }
    }
}

/// Processes one inbound frame: decode, validate, forward, fan out.
async fn handle_frame<B: Backend>(
    data: &[u8],
    session: &Arc<Session>,
    state: &MediatorState<B>,
) -> Result<Flow, MediatorError> {
    let envelope = codec::decode(data)?;
    tracing::debug!(
        session = %session.id(),
        direction = %envelope.direction,
        recipient = ?envelope.recipient(),
        len = envelope.payload.len(),
        "websocket message received"
    );

    state.check_recipient(&envelope)?;
    let inbound = Inbound::from_envelope(&envelope)?;

    let replies = match &inbound {
        Inbound::Hello(hello) => {
            identify(session, &hello.user, &state.registry)?;
            state.call_backend(state.backend.hello(hello)).await
        }
        Inbound::Goodbye(goodbye) => state.call_backend(state.backend.goodbye(goodbye)).await,
        Inbound::Command(command) => state.call_backend(state.backend.command(command)).await,
    };

    match replies {
        Ok(replies) => deliver(&state.registry, replies),
        Err(e) => tracing::warn!(
            session = %session.id(),
            direction = inbound.direction(),
            error = %e,
            "room service call failed, dropping message"
        ),
    }

    if let Inbound::Goodbye(_) = inbound {
        session.close();
        return Ok(Flow::Stop);
    }
    Ok(Flow::Continue)
}

/// Binds the session to the user named in a `roomHello` and registers it.
fn identify(
    session: &Arc<Session>,
    user: &UserInfo,
    registry: &SessionRegistry,
) -> Result<(), MediatorError> {
    if user.user_id.is_empty() {
        return Err(MediatorError::ProtocolViolation(
            "roomHello without userId".to_string(),
        ));
    }

    session
        .set_identity(&user.user_id)
        .map_err(|e| MediatorError::ProtocolViolation(e.to_string()))?;
    registry.register(session)?;

    tracing::info!(
        session = %session.id(),
        identity = %user.user_id,
        username = %user.username,
        "session identified"
    );
    Ok(())
}

/// Routes room service replies to their recipients, in order.
///
/// Recipient `*` reaches every registered session at the time of the
/// message; any other recipient is looked up and the message silently dropped
/// if that user is not connected. A failed send closes only its target.
pub fn deliver(registry: &SessionRegistry, replies: MessageCollection) {
    match replies.len() {
        0 => tracing::debug!("response contains no messages"),
        n => tracing::debug!(count = n, "dispatching response messages"),
    }

    for envelope in replies {
        let line = codec::encode(&envelope);

        if envelope.is_broadcast() {
            let targets = registry.snapshot_all();
            tracing::debug!(
                direction = %envelope.direction,
                targets = targets.len(),
                "broadcasting message"
            );
            for target in targets {
                send_line(&target, line.clone());
            }
        } else if let Some(target) = envelope.recipient().and_then(|r| registry.lookup(r)) {
            tracing::debug!(
                direction = %envelope.direction,
                recipient = ?envelope.recipient(),
                "sending message"
            );
            send_line(&target, line);
        } else {
            tracing::debug!(
                direction = %envelope.direction,
                recipient = ?envelope.recipient(),
                "recipient not connected, dropping message"
            );
        }
    }
}

fn send_line(target: &Session, line: Vec<u8>) {
    if let Err(e) = target.send(line) {
        tracing::warn!(
            session = %target.id(),
            identity = ?target.identity(),
            error = %e,
            "failed to deliver message"
        );
    }
}

/// Wraps an encoded line in a WebSocket frame: text when it is UTF-8.
fn frame(line: Vec<u8>) -> Message {
    match String::from_utf8(line) {
        Ok(text) => Message::Text(text.into()),
        Err(e) => Message::Binary(e.into_bytes().into()),
    }
}

/// Starts the mediator on the given address with a fresh registry and
/// returns the bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server<B: Backend>(
    addr: &str,
    backend: B,
) -> Result<
    (SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(MediatorState::new(backend))).await
}

/// Starts the mediator with a pre-configured [`MediatorState`].
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state<B: Backend>(
    addr: &str,
    state: Arc<MediatorState<B>>,
) -> Result<
    (SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/", axum::routing::get(ws_handler::<B>))
        .fallback(ws_handler::<B>)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        {
            tracing::error!(error = %e, "mediator server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler<B: Backend>(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<MediatorState<B>>>,
) -> impl axum::response::IntoResponse {
    tracing::debug!(remote = %remote, "incoming WebSocket upgrade");
    ws.on_upgrade(move |socket| async move {
        tracing::info!(remote = %remote, "WebSocket connection established");
        handle_socket(socket, state).await;
    })
}
