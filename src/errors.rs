use std::time::Duration;

use thiserror::Error;

// -----------------------------------------------------------------------------
// ----- BridgeError -----------------------------------------------------------

/// Every failure the bridge surfaces to a caller.
///
/// Per-document routing and dispatch failures are normally recovered inside
/// the intake pipeline and recorded as `ERROR` outcomes; the variants for them
/// exist so dispatchers can describe what went wrong.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("authentication failed for principal '{principal}': {reason}")]
    AuthenticationFailure { principal: String, reason: String },

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("connection pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("invalid request: missing or empty field '{field}'")]
    Validation { field: &'static str },

    #[error("no route for category '{category}' subtype '{subtype}' recipient '{recipient}'")]
    RoutingNotFound {
        category: String,
        subtype: String,
        recipient: String,
    },

    #[error("commit failed for tid '{tid}': {source}")]
    CommitFailed {
        tid: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote call '{operation}' reported an error: {message}")]
    Remote { operation: String, message: String },

    #[error("unknown transaction '{tid}'")]
    UnknownTransaction { tid: String },

    #[error("transaction '{tid}' is already being processed")]
    TransactionInFlight { tid: String },
}

impl BridgeError {
    /// Whether the caller may retry the same request after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::TransportFailure(_) | BridgeError::PoolExhausted { .. }
        )
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
