#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::SecretString;
use serde_json::json;
use tokio::time::sleep;

use busbridge::errors::{BridgeError, Result};
use busbridge::intake::{Dispatcher, InboundDocument, MemoryOutcomeStore, OutcomeRecord, OutcomeStore};
use busbridge::pool::{ConnectionPool, PoolSettings};
use busbridge::remote::{CallError, ConnectError, Credentials, Payload, RemoteSession, SessionConnector};
use busbridge::routing::Target;
use busbridge::session::{PrincipalRecord, StaticPrincipals};

// -----------------------------------------------------------------------------
// ----- FakeConnector ---------------------------------------------------------

/// Scripted in-memory backend. Clones share state, so a test keeps one handle
/// for assertions and hands another to the pool.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Backend>,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub session: usize,
    pub principal: String,
    pub operation: String,
    pub request: Payload,
}

#[derive(Default)]
struct Backend {
    next_session: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    calls: Mutex<Vec<Call>>,
    scripts: Mutex<HashMap<String, VecDeque<std::result::Result<Payload, CallError>>>>,
    delays: Mutex<HashMap<String, Duration>>,
    rejected_passwords: Mutex<HashSet<String>>,
    transport_failures: Mutex<usize>,
    connect_delay: Mutex<Duration>,
    alive: Mutex<Vec<Arc<AtomicBool>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(&self, capacity: usize, acquire_timeout: Duration) -> Arc<ConnectionPool> {
        ConnectionPool::new(
            Arc::new(self.clone()),
            PoolSettings {
                capacity,
                acquire_timeout,
            },
        )
    }

    // ----- scripting -----

    pub fn respond(&self, operation: &str, payload: Payload) {
        self.script(operation, Ok(payload));
    }

    pub fn fail(&self, operation: &str, error: CallError) {
        self.script(operation, Err(error));
    }

    fn script(&self, operation: &str, result: std::result::Result<Payload, CallError>) {
        self.state
            .scripts
            .lock()
            .entry(operation.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn delay(&self, operation: &str, delay: Duration) {
        self.state.delays.lock().insert(operation.to_string(), delay);
    }

    pub fn reject_password(&self, password: &str) {
        self.state.rejected_passwords.lock().insert(password.to_string());
    }

    pub fn fail_next_connects(&self, n: usize) {
        *self.state.transport_failures.lock() = n;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = delay;
    }

    /// Marks every session opened so far as dead.
    pub fn kill_sessions(&self) {
        for flag in self.state.alive.lock().iter() {
            flag.store(false, Ordering::SeqCst);
        }
    }

    // ----- inspection -----

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().clone()
    }

    pub fn operations(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.operation).collect()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    pub fn last_request(&self, operation: &str) -> Option<Payload> {
        self.calls()
            .into_iter()
            .rev()
            .find(|c| c.operation == operation)
            .map(|c| c.request)
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(
        &self,
        principal: &str,
        credentials: &Credentials,
    ) -> std::result::Result<Box<dyn RemoteSession>, ConnectError> {
        let delay = *self.state.connect_delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);

        if self
            .state
            .rejected_passwords
            .lock()
            .contains(credentials.password_exposed())
        {
            return Err(ConnectError::Authentication("bad password".to_string()));
        }

        {
            let mut failures = self.state.transport_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(ConnectError::Transport("connection refused".to_string()));
            }
        }

        let id = self.state.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let alive = Arc::new(AtomicBool::new(true));
        self.state.alive.lock().push(alive.clone());

        Ok(Box::new(FakeSession {
            id,
            principal: principal.to_string(),
            alive,
            state: self.state.clone(),
        }))
    }
}

// -----------------------------------------------------------------------------
// ----- FakeSession -----------------------------------------------------------

pub struct FakeSession {
    id: usize,
    principal: String,
    alive: Arc<AtomicBool>,
    state: Arc<Backend>,
}

impl std::fmt::Debug for FakeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeSession")
            .field("id", &self.id)
            .field("principal", &self.principal)
            .finish()
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    fn principal(&self) -> &str {
        &self.principal
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn call(
        &mut self,
        operation: &str,
        request: Payload,
    ) -> std::result::Result<Payload, CallError> {
        if !self.is_alive() {
            return Err(CallError::Transport("session is dead".to_string()));
        }

        self.state.calls.lock().push(Call {
            session: self.id,
            principal: self.principal.clone(),
            operation: operation.to_string(),
            request,
        });

        let delay = self.state.delays.lock().get(operation).copied();
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        let scripted = self
            .state
            .scripts
            .lock()
            .get_mut(operation)
            .and_then(VecDeque::pop_front);

        match scripted {
            Some(result) => result,
            None if operation == "Logon" => Ok(json!({ "session_token": format!("tok-{}", self.id) })),
            None => Ok(json!({ "session_id": self.id })),
        }
    }

    async fn close(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// -----------------------------------------------------------------------------
// ----- RecordingBus ----------------------------------------------------------

/// Bus dispatcher that records each delivery as it completes.
#[derive(Default)]
pub struct RecordingBus {
    delivered: Mutex<Vec<(String, Target)>>,
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl RecordingBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_address(&self, address: &str) {
        self.failing.lock().insert(address.to_string());
    }

    pub fn delay_document(&self, document_id: &str, delay: Duration) {
        self.delays.lock().insert(document_id.to_string(), delay);
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().iter().map(|(id, _)| id.clone()).collect()
    }
}

#[async_trait]
impl Dispatcher for RecordingBus {
    async fn dispatch(&self, target: &Target, document: &InboundDocument) -> Result<()> {
        let delay = self.delays.lock().get(&document.id).copied();
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        if self.failing.lock().contains(&target.address) {
            return Err(BridgeError::TransportFailure(format!(
                "{} unavailable",
                target.address
            )));
        }

        self.delivered
            .lock()
            .push((document.id.clone(), target.clone()));
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- FlakyStore ------------------------------------------------------------

/// Memory store whose reads and writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryOutcomeStore,
    pub fail_appends: AtomicBool,
    pub fail_reads: AtomicBool,
}

#[async_trait]
impl OutcomeStore for FlakyStore {
    async fn append_batch(&self, tid: &str, outcomes: &[OutcomeRecord]) -> io::Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(io::Error::other("disk full"));
        }
        self.inner.append_batch(tid, outcomes).await
    }

    async fn has_committed(&self, tid: &str) -> io::Result<bool> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::other("store offline"));
        }
        self.inner.has_committed(tid).await
    }
}

// -----------------------------------------------------------------------------
// ----- Helpers ---------------------------------------------------------------

pub fn principals() -> StaticPrincipals {
    StaticPrincipals::new([PrincipalRecord {
        external_user: "jdoe@corp".into(),
        principal: "RFC_JDOE".into(),
        password: SecretString::new("s3cret".into()),
    }])
}

pub fn creds(password: &str) -> Credentials {
    Credentials::new(password)
}

pub fn doc(id: &str, category: &str, subtype: &str, recipient: &str) -> InboundDocument {
    InboundDocument::new(id, category, subtype, recipient, format!("<{id}/>"))
}
