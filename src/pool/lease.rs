use std::fmt;
use std::sync::Arc;

use crate::errors::{BridgeError, Result};
use crate::remote::{CallError, Payload, RemoteSession};

use super::connection_pool::{ConnectionPool, EntryId, spawn_close};

// -----------------------------------------------------------------------------
// ----- PooledSession ---------------------------------------------------------

/// A session lent out by [`ConnectionPool`]. Held by exactly one caller; goes
/// back to the pool on [`release`](Self::release) or drop.
///
/// A call whose future was dropped before it finished may leave a response
/// unread on the session. Such a lease is discarded instead of returned.
pub struct PooledSession {
    pool: Arc<ConnectionPool>,
    id: EntryId,
    principal: String,
    session: Option<Box<dyn RemoteSession>>,
    interrupted: bool,
}

impl PooledSession {
    pub(super) fn new(
        pool: Arc<ConnectionPool>,
        id: EntryId,
        principal: &str,
        session: Box<dyn RemoteSession>,
    ) -> Self {
        Self {
            pool,
            id,
            principal: principal.to_string(),
            session: Some(session),
            interrupted: false,
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn is_alive(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_alive())
    }

    /// True once a call on this lease was abandoned mid-flight.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// Issues one remote call on the leased session.
    ///
    /// Transport failures and remote errors are both reported as errors; a
    /// successful payload is returned as-is, application error markers
    /// included.
    pub async fn call(&mut self, operation: &str, request: Payload) -> Result<Payload> {
        let Some(session) = self.session.as_mut() else {
            return Err(BridgeError::PoolClosed);
        };

        // Stays set if this future is dropped before the call returns.
        let interrupted = std::mem::replace(&mut self.interrupted, true);
        let result = session.call(operation, request).await;
        self.interrupted = interrupted;

        result.map_err(|e| match e {
            CallError::Transport(reason) => BridgeError::TransportFailure(reason),
            CallError::Remote(message) => BridgeError::Remote {
                operation: operation.to_string(),
                message,
            },
        })
    }

    /// Marks the entry idle again. The underlying session stays open.
    pub fn release(self) {
        drop(self);
    }

    /// Closes the session and removes it from the pool.
    pub async fn discard(mut self) {
        if let Some(mut session) = self.session.take() {
            self.pool.forget(self.id);
            session.close().await;
        }
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        if self.interrupted {
            self.pool.forget(self.id);
            spawn_close(session);
        } else {
            self.pool.check_in(self.id, session);
        }
    }
}

impl fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("entry", &self.id)
            .field("principal", &self.principal)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
