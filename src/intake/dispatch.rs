use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use tracing::{debug, warn};

use crate::errors::{BridgeError, Result};
use crate::pool::ConnectionPool;
use crate::remote::{Credentials, Payload, application_error};
use crate::routing::Target;

use super::document::InboundDocument;

// -----------------------------------------------------------------------------
// ----- Dispatcher ------------------------------------------------------------

/// Delivers one inbound document to its resolved target.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, target: &Target, document: &InboundDocument) -> Result<()>;
}

// -----------------------------------------------------------------------------
// ----- RetryPolicy -----------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before retry number `attempt` (zero based), plus up
    /// to 50% random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .backoff
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let spread = (base.as_millis() / 2) as u64;
        let jitter = rand::rng().random_range(0..=spread);
        base + Duration::from_millis(jitter)
    }
}

// -----------------------------------------------------------------------------
// ----- BackendDispatcher -----------------------------------------------------

/// Dispatches documents addressed to `backend:<function>` through a pooled
/// session owned by a fixed service principal.
pub struct BackendDispatcher {
    pool: Arc<ConnectionPool>,
    principal: String,
    credentials: Credentials,
    retry: RetryPolicy,
}

impl BackendDispatcher {
    pub fn new(
        pool: Arc<ConnectionPool>,
        principal: impl Into<String>,
        credentials: Credentials,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            principal: principal.into(),
            credentials,
            retry,
        }
    }

    async fn attempt(
        &self,
        function: &str,
        target: &Target,
        document: &InboundDocument,
    ) -> Result<()> {
        let mut session = self.pool.acquire(&self.principal, &self.credentials).await?;
        let response = session.call(function, request_for(target, document)).await;
        session.release();

        if let Some(message) = application_error(&response?) {
            return Err(BridgeError::Remote {
                operation: function.to_string(),
                message,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Dispatcher for BackendDispatcher {
    async fn dispatch(&self, target: &Target, document: &InboundDocument) -> Result<()> {
        let Some(function) = target.backend_destination() else {
            return Err(BridgeError::Validation { field: "address" });
        };

        let mut attempt = 0;
        loop {
            match self.attempt(function, target, document).await {
                Err(e) if e.is_retryable() && attempt < self.retry.retries => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        document = %document.id,
                        function,
                        error = %e,
                        ?delay,
                        "backend dispatch failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- DispatchRouter --------------------------------------------------------

/// Sends backend-addressed targets to the backend dispatcher and everything
/// else to the bus.
pub struct DispatchRouter {
    bus: Arc<dyn Dispatcher>,
    backend: Option<Arc<dyn Dispatcher>>,
}

impl DispatchRouter {
    pub fn new(bus: Arc<dyn Dispatcher>) -> Self {
        Self { bus, backend: None }
    }

    pub fn with_backend(mut self, backend: Arc<dyn Dispatcher>) -> Self {
        self.backend = Some(backend);
        self
    }
}

#[async_trait]
impl Dispatcher for DispatchRouter {
    async fn dispatch(&self, target: &Target, document: &InboundDocument) -> Result<()> {
        if target.backend_destination().is_none() {
            return self.bus.dispatch(target, document).await;
        }

        match &self.backend {
            Some(backend) => backend.dispatch(target, document).await,
            None => {
                debug!(document = %document.id, %target, "no backend dispatcher configured");
                Err(BridgeError::Remote {
                    operation: target.operation.clone(),
                    message: "backend dispatch is not configured".to_string(),
                })
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn request_for(target: &Target, document: &InboundDocument) -> Payload {
    json!({
        "operation": target.operation,
        "namespace": target.namespace,
        "document_id": document.id,
        "category": document.category,
        "subtype": document.subtype,
        "recipient": document.recipient,
        "payload": String::from_utf8_lossy(&document.payload),
    })
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
