//! A single live client connection.
//!
//! A [`Session`] owns the outbound half of a WebSocket connection (a channel
//! drained by the connection's writer task), the identity slot filled by the
//! first `roomHello`, and a closed signal every interested task can await.
//!
//! Lifecycle: `Open -> Closing -> Closed`. Closing is idempotent; exactly one
//! caller performs the physical close, which removes the session from the
//! registry before releasing the outbound channel.

use std::fmt;
use std::sync::{OnceLock, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::registry::SessionRegistry;

/// Outbound half of a connection: encoded lines awaiting the writer task.
pub type Outbound = mpsc::UnboundedSender<Vec<u8>>;

/// Errors that can occur on session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session already carries a different identity.
    #[error("identity already set to {current:?}, refusing {requested:?}")]
    IdentityAlreadySet {
        /// Identity the session was first given.
        current: String,
        /// Identity that was rejected.
        requested: String,
    },
    /// The session has no identity yet and cannot be registered.
    #[error("session {0} has no identity")]
    IdentityNotSet(Uuid),
    /// The session is closing or closed.
    #[error("send on closed session {0}")]
    SendAfterClose(Uuid),
    /// The connection's writer is gone; the session has been closed.
    #[error("transport failure on session {0}")]
    Transport(Uuid),
}

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Read loop active, sends permitted.
    Open,
    /// Close in progress.
    Closing,
    /// Connection released and registry entry removed.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

struct Inner {
    state: SessionState,
    outbound: Option<Outbound>,
}

/// One live client connection.
pub struct Session {
    id: Uuid,
    identity: OnceLock<String>,
    inner: Mutex<Inner>,
    closed: watch::Sender<bool>,
    registry: Weak<SessionRegistry>,
}

impl Session {
    /// Creates an open session writing into `outbound`.
    ///
    /// The session removes itself from `registry` when it closes. Holding the
    /// registry weakly keeps registered sessions from keeping it alive.
    #[must_use]
    pub fn new(outbound: Outbound, registry: Weak<SessionRegistry>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: Uuid::now_v7(),
            identity: OnceLock::new(),
            inner: Mutex::new(Inner {
                state: SessionState::Open,
                outbound: Some(outbound),
            }),
            closed,
            registry,
        }
    }

    /// Connection-unique id, independent of the identity.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The identity set by [`set_identity`](Self::set_identity), if any.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.get().map(String::as_str)
    }

    /// Sets the session identity.
    ///
    /// The first identity wins. Setting the same value again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::IdentityAlreadySet`] if a different identity
    /// was set before.
    pub fn set_identity(&self, identity: &str) -> Result<(), SessionError> {
        let current = self.identity.get_or_init(|| identity.to_string());
        if current == identity {
            Ok(())
        } else {
            Err(SessionError::IdentityAlreadySet {
                current: current.clone(),
                requested: identity.to_string(),
            })
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Returns `true` once the session has left the `Open` state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() != SessionState::Open
    }

    /// Queues an encoded line for the connection's writer.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SendAfterClose`] if the session is not open, or
    /// [`SessionError::Transport`] if the writer has gone away, in which case
    /// the session is closed before returning.
    pub fn send(&self, line: Vec<u8>) -> Result<(), SessionError> {
        let result = {
            let inner = self.inner.lock();
            match (&inner.state, &inner.outbound) {
                (SessionState::Open, Some(outbound)) => outbound.send(line),
                _ => return Err(SessionError::SendAfterClose(self.id)),
            }
        };

        if result.is_err() {
            self.close();
            return Err(SessionError::Transport(self.id));
        }
        Ok(())
    }

    /// Closes the session.
    ///
    /// Returns `true` if this call performed the close, `false` if the
    /// session was already closing or closed.
    pub fn close(&self) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Open {
                return false;
            }
            inner.state = SessionState::Closing;
        }

        // Registry entry goes first: no reply may be routed to a half-closed
        // session.
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self);
        }

        {
            let mut inner = self.inner.lock();
            inner.outbound = None;
            inner.state = SessionState::Closed;
        }
        self.closed.send_replace(true);

        tracing::debug!(session = %self.id, identity = ?self.identity(), "session closed");
        true
    }

    /// Resolves once the session is closed.
    ///
    /// Returns immediately if it already is.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // Errors only if the sender is dropped, which cannot happen while
        // `self` is borrowed.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity", &self.identity())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
