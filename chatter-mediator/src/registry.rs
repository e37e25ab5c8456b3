//! Session registry for the mediator.
//!
//! Maps client identities to their live [`Session`]s so room service replies
//! can be routed to one user or broadcast to all of them. Only sessions that
//! have completed a `roomHello` are registered.
//!
//! Entries are ephemeral: lost on restart, same as the sessions themselves.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::session::{Session, SessionError};

/// In-memory directory of identified sessions.
///
/// Thread-safe via [`RwLock`]. The lock is held only for map access, never
/// while sending to or closing a session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session under its identity.
    ///
    /// If another session was registered under the same identity it is
    /// evicted: replaced in the map, then closed. Returns the evicted session.
    /// Registering a session that is already the current entry is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::IdentityNotSet`] if the session has no
    /// identity yet, or [`SessionError::SendAfterClose`] if it is already
    /// closing or closed; the current entry is left untouched.
    pub fn register(&self, session: &Arc<Session>) -> Result<Option<Arc<Session>>, SessionError> {
        let identity = session
            .identity()
            .ok_or_else(|| SessionError::IdentityNotSet(session.id()))?;

        let previous = {
            let mut sessions = self.sessions.write();
            // `close` marks the session before unregistering, so a session
            // seen open here is removed again by its own close.
            if session.is_closed() {
                return Err(SessionError::SendAfterClose(session.id()));
            }
            sessions.insert(identity.to_string(), Arc::clone(session))
        };

        match previous {
            Some(old) if old.id() != session.id() => {
                tracing::info!(
                    identity = %identity,
                    old_session = %old.id(),
                    new_session = %session.id(),
                    "replacing existing session for identity"
                );
                // `old` no longer owns the entry, so its close leaves the new
                // one in place.
                old.close();
                Ok(Some(old))
            }
            _ => Ok(None),
        }
    }

    /// Removes a session from the registry.
    ///
    /// Only removes the entry if it belongs to this very session, so a
    /// session evicted by a newer one cannot remove its replacement. Returns
    /// `true` if an entry was removed.
    pub fn unregister(&self, session: &Session) -> bool {
        let Some(identity) = session.identity() else {
            return false;
        };

        let mut sessions = self.sessions.write();
        if sessions
            .get(identity)
            .is_some_and(|current| current.id() == session.id())
        {
            sessions.remove(identity);
            drop(sessions);
            tracing::debug!(identity = %identity, session = %session.id(), "session unregistered");
            true
        } else {
            false
        }
    }

    /// Returns the session registered under `identity`, if any.
    #[must_use]
    pub fn lookup(&self, identity: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(identity).cloned()
    }

    /// Returns a point-in-time copy of all registered sessions, ordered by
    /// identity.
    #[must_use]
    pub fn snapshot_all(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns `true` if no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
