use std::fmt::Debug;

use async_trait::async_trait;
use thiserror::Error;

use super::{Credentials, Payload};

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

/// Why a session could not be established.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("backend unreachable: {0}")]
    Transport(String),
}

/// Why a call on an established session failed.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("remote error: {0}")]
    Remote(String),
}

// -----------------------------------------------------------------------------
// ----- RemoteSession ---------------------------------------------------------

/// One live conversation with the backend, bound to a single principal.
#[async_trait]
pub trait RemoteSession: Send + Sync + Debug {
    fn principal(&self) -> &str;

    /// Cheap, non-blocking health flag maintained by the session itself.
    fn is_alive(&self) -> bool;

    async fn call(&mut self, operation: &str, request: Payload) -> Result<Payload, CallError>;

    async fn close(&mut self);
}

// -----------------------------------------------------------------------------
// ----- SessionConnector ------------------------------------------------------

#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        principal: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteSession>, ConnectError>;
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
