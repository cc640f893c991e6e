use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::errors::{BridgeError, Result};
use crate::remote::{ConnectError, Credentials, RemoteSession, SessionConnector};

use super::lease::PooledSession;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const DEFAULT_CAPACITY: usize = 8;
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

// -----------------------------------------------------------------------------
// ----- PoolSettings ----------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub capacity: usize,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub live: usize,
    pub idle: usize,
    pub busy: usize,
    pub connecting: usize,
    pub waiters: usize,
}

// -----------------------------------------------------------------------------
// ----- ConnectionPool --------------------------------------------------------

pub(super) type EntryId = u64;

/// Bounded set of live backend sessions shared by concurrent callers.
///
/// All bookkeeping lives behind one mutex. A caller that finds the pool full
/// of busy sessions waits on `released`, which is signalled one waiter at a
/// time, always while the state lock is held.
pub struct ConnectionPool {
    connector: Arc<dyn SessionConnector>,
    settings: PoolSettings,
    state: Mutex<PoolState>,
    released: Notify,
}

struct PoolState {
    // Most recently used first. Reserved-but-connecting slots are counted in
    // `connecting` and have no entry yet.
    entries: LruCache<EntryId, PoolEntry>,
    connecting: usize,
    waiters: usize,
    next_id: EntryId,
    rejected: HashMap<String, [u8; 16]>,
    closed: bool,
}

struct PoolEntry {
    principal: String,
    // `None` while lent out.
    session: Option<Box<dyn RemoteSession>>,
}

impl PoolEntry {
    fn is_idle(&self) -> bool {
        self.session.is_some()
    }
}

enum Plan {
    Reuse(EntryId, Box<dyn RemoteSession>),
    Create { evicted: Option<Box<dyn RemoteSession>> },
    Wait,
}

// -----------------------------------------------------------------------------
// ----- ConnectionPool: Static ------------------------------------------------

impl ConnectionPool {
    pub fn new(connector: Arc<dyn SessionConnector>, settings: PoolSettings) -> Arc<Self> {
        let settings = PoolSettings {
            capacity: settings.capacity.max(1),
            ..settings
        };

        Arc::new(Self {
            connector,
            settings,
            state: Mutex::new(PoolState {
                entries: LruCache::unbounded(),
                connecting: 0,
                waiters: 0,
                next_id: 1,
                rejected: HashMap::new(),
                closed: false,
            }),
            released: Notify::new(),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectionPool: Public ------------------------------------------------

impl ConnectionPool {
    pub fn settings(&self) -> PoolSettings {
        self.settings
    }

    /// Lends a session for `principal`, waiting at most the configured
    /// acquire timeout.
    pub async fn acquire(
        self: &Arc<Self>,
        principal: &str,
        credentials: &Credentials,
    ) -> Result<PooledSession> {
        self.acquire_within(principal, credentials, self.settings.acquire_timeout)
            .await
    }

    /// Like [`acquire`](Self::acquire) with an explicit bound on the wait.
    /// Dropping the returned future cancels the acquisition cleanly.
    pub async fn acquire_within(
        self: &Arc<Self>,
        principal: &str,
        credentials: &Credentials,
        wait: Duration,
    ) -> Result<PooledSession> {
        let deadline = Instant::now() + wait;

        loop {
            let mut notified = Box::pin(self.released.notified());
            // Register interest before inspecting state so a release that
            // lands between the check and the await is not lost.
            notified.as_mut().enable();

            // Whatever the plan claimed is guarded before the first await so a
            // cancelled acquisition hands it back.
            let (plan, dead) = self.plan(principal, credentials)?;

            match plan {
                Plan::Reuse(id, session) => {
                    // Only waiters may hold a registration; a dropped one
                    // passes any wakeup it already took to the next waiter.
                    drop(notified);
                    let lease = PooledSession::new(self.clone(), id, principal, session);
                    close_all_sessions(dead).await;

                    debug!(principal, entry = id, "reusing idle backend session");
                    return Ok(lease);
                }

                Plan::Create { evicted } => {
                    let reservation = Reservation::new(self);
                    drop(notified);
                    close_all_sessions(dead).await;

                    if let Some(mut session) = evicted {
                        info!(
                            principal,
                            evicted = session.principal(),
                            "evicting least recently used idle session"
                        );
                        session.close().await;
                    }
                    return self.establish(reservation, principal, credentials).await;
                }

                Plan::Wait => {
                    let _slot = WaiterSlot(&self.state);
                    close_all_sessions(dead).await;
                    debug!(principal, "pool saturated; waiting for a release");

                    if timeout_at(deadline, notified).await.is_err() {
                        warn!(principal, waited = ?wait, "connection pool exhausted");
                        return Err(BridgeError::PoolExhausted { waited: wait });
                    }
                }
            }
        }
    }

    /// Closes every session, busy or idle, and refuses further acquisitions.
    /// Busy sessions are closed as their leases come back.
    pub async fn close_all(&self) {
        let sessions = {
            let mut state = self.state.lock();
            state.closed = true;

            let mut sessions = Vec::with_capacity(state.entries.len());
            while let Some((_, entry)) = state.entries.pop_lru() {
                sessions.extend(entry.session);
            }

            self.released.notify_waiters();
            sessions
        };

        info!(count = sessions.len(), "closing pooled backend sessions");
        close_all_sessions(sessions).await;
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let idle = state.entries.iter().filter(|(_, e)| e.is_idle()).count();
        let live = state.entries.len();

        PoolStats {
            capacity: self.settings.capacity,
            live,
            idle,
            busy: live - idle,
            connecting: state.connecting,
            waiters: state.waiters,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectionPool: Crate -------------------------------------------------

impl ConnectionPool {
    /// Returns a lent session to its entry and wakes one waiter.
    pub(super) fn check_in(&self, id: EntryId, session: Box<dyn RemoteSession>) {
        let mut state = self.state.lock();

        if state.closed || !state.entries.contains(&id) {
            drop(state);
            debug!(entry = id, "closing session returned to a closed pool");
            spawn_close(session);
            return;
        }

        if let Some(entry) = state.entries.peek_mut(&id) {
            entry.session = Some(session);
        }

        if state.waiters > 0 {
            self.released.notify_one();
        }
    }

    /// Drops the entry of a session that must not be lent again, freeing its
    /// slot for one waiter.
    pub(super) fn forget(&self, id: EntryId) {
        let mut state = self.state.lock();

        if let Some(entry) = state.entries.pop(&id) {
            debug!(principal = %entry.principal, entry = id, "discarding interrupted session");
        }

        if state.waiters > 0 {
            self.released.notify_one();
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectionPool: Private -----------------------------------------------

impl ConnectionPool {
    fn plan(
        &self,
        principal: &str,
        credentials: &Credentials,
    ) -> Result<(Plan, Vec<Box<dyn RemoteSession>>)> {
        let mut state = self.state.lock();

        if state.closed {
            return Err(BridgeError::PoolClosed);
        }

        if state.rejected.get(principal) == Some(&credentials.fingerprint(principal)) {
            return Err(BridgeError::AuthenticationFailure {
                principal: principal.to_string(),
                reason: "credentials were previously rejected".to_string(),
            });
        }

        let dead = discard_dead(&mut state);

        let reusable = state
            .entries
            .iter()
            .find(|(_, e)| e.is_idle() && e.principal == principal)
            .map(|(id, _)| *id);

        if let Some(id) = reusable {
            // `get_mut` promotes the entry to most recently used.
            if let Some(session) = state.entries.get_mut(&id).and_then(|e| e.session.take()) {
                return Ok((Plan::Reuse(id, session), dead));
            }
        }

        if state.entries.len() + state.connecting < self.settings.capacity {
            state.connecting += 1;
            return Ok((Plan::Create { evicted: None }, dead));
        }

        let victim = state
            .entries
            .iter()
            .rev()
            .find(|(_, e)| e.is_idle())
            .map(|(id, _)| *id);

        if let Some(id) = victim {
            let evicted = state.entries.pop(&id).and_then(|e| e.session);
            state.connecting += 1;
            return Ok((Plan::Create { evicted }, dead));
        }

        state.waiters += 1;
        Ok((Plan::Wait, dead))
    }

    async fn establish(
        self: &Arc<Self>,
        reservation: Reservation<'_>,
        principal: &str,
        credentials: &Credentials,
    ) -> Result<PooledSession> {
        match self.connector.connect(principal, credentials).await {
            Ok(mut session) => {
                let id = {
                    let mut state = self.state.lock();
                    reservation.fulfil(&mut state);

                    if state.closed {
                        None
                    } else {
                        let id = state.next_id;
                        state.next_id += 1;
                        state.entries.push(
                            id,
                            PoolEntry {
                                principal: principal.to_string(),
                                session: None,
                            },
                        );
                        state.rejected.remove(principal);
                        Some(id)
                    }
                };

                let Some(id) = id else {
                    session.close().await;
                    return Err(BridgeError::PoolClosed);
                };

                info!(principal, entry = id, "established backend session");
                Ok(PooledSession::new(self.clone(), id, principal, session))
            }

            Err(ConnectError::Authentication(reason)) => {
                self.state
                    .lock()
                    .rejected
                    .insert(principal.to_string(), credentials.fingerprint(principal));
                drop(reservation);

                warn!(principal, %reason, "backend rejected credentials");
                Err(BridgeError::AuthenticationFailure {
                    principal: principal.to_string(),
                    reason,
                })
            }

            Err(ConnectError::Transport(reason)) => {
                drop(reservation);

                warn!(principal, %reason, "could not reach backend");
                Err(BridgeError::TransportFailure(reason))
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Reservation -------------------------------------------------

// A slot counted in `connecting`. Dropping it unfulfilled gives the slot back
// and lets a waiter claim it.
struct Reservation<'a> {
    pool: &'a ConnectionPool,
    pending: bool,
}

impl<'a> Reservation<'a> {
    fn new(pool: &'a ConnectionPool) -> Self {
        Self {
            pool,
            pending: true,
        }
    }

    fn fulfil(mut self, state: &mut PoolState) {
        state.connecting -= 1;
        self.pending = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }

        let mut state = self.pool.state.lock();
        state.connecting -= 1;
        if state.waiters > 0 {
            self.pool.released.notify_one();
        }
    }
}

struct WaiterSlot<'a>(&'a Mutex<PoolState>);

impl Drop for WaiterSlot<'_> {
    fn drop(&mut self) {
        self.0.lock().waiters -= 1;
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn discard_dead(state: &mut PoolState) -> Vec<Box<dyn RemoteSession>> {
    let dead: Vec<EntryId> = state
        .entries
        .iter()
        .filter(|(_, e)| e.session.as_ref().is_some_and(|s| !s.is_alive()))
        .map(|(id, _)| *id)
        .collect();

    let mut sessions = Vec::with_capacity(dead.len());
    for id in dead {
        if let Some(entry) = state.entries.pop(&id) {
            debug!(principal = %entry.principal, entry = id, "discarding dead session");
            sessions.extend(entry.session);
        }
    }
    sessions
}

async fn close_all_sessions(sessions: Vec<Box<dyn RemoteSession>>) {
    for mut session in sessions {
        session.close().await;
    }
}

pub(super) fn spawn_close(mut session: Box<dyn RemoteSession>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { session.close().await });
        }
        Err(_) => warn!(
            principal = session.principal(),
            "no runtime available; dropping session without closing it"
        ),
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
