use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::{BridgeError, Result};
use crate::pool::PooledSession;
use crate::remote::{Payload, application_error};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const LOGON: &str = "Logon";
pub const LOGOFF: &str = "Logoff";

const SESSION_TOKEN: &str = "session_token";

// -----------------------------------------------------------------------------
// ----- Conversation ----------------------------------------------------------

/// A logged-on backend session on behalf of one external user.
///
/// Once logon succeeded, logoff happens exactly once: explicitly through
/// [`logoff`](Self::logoff), or from `Drop` on a background task when the
/// owner goes away early. Either way it gets `grace` to finish, and the
/// pooled session is released afterwards.
#[derive(Debug)]
pub struct Conversation {
    lease: Option<PooledSession>,
    token: String,
    grace: Duration,
}

impl Conversation {
    /// Logs `external_user` on over `lease`. On failure the lease is released
    /// and nothing needs logging off.
    pub async fn login(
        mut lease: PooledSession,
        external_user: &str,
        grace: Duration,
    ) -> Result<Self> {
        let response = lease.call(LOGON, json!({ "user": external_user })).await?;

        if let Some(reason) = application_error(&response) {
            return Err(BridgeError::AuthenticationFailure {
                principal: external_user.to_string(),
                reason,
            });
        }

        let token = response
            .get(SESSION_TOKEN)
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::Remote {
                operation: LOGON.to_string(),
                message: "response carries no session token".to_string(),
            })?
            .to_string();

        debug!(external_user, principal = lease.principal(), "logged on");

        Ok(Self {
            lease: Some(lease),
            token,
            grace,
        })
    }

    /// One business call within the session. A response carrying an
    /// application error marker is turned into [`BridgeError::Remote`].
    pub async fn call(&mut self, operation: &str, mut request: Payload) -> Result<Payload> {
        let lease = self.lease.as_mut().ok_or(BridgeError::PoolClosed)?;

        if let Some(fields) = request.as_object_mut() {
            fields.insert(SESSION_TOKEN.to_string(), Value::String(self.token.clone()));
        }

        let response = lease.call(operation, request).await?;

        match application_error(&response) {
            Some(message) => Err(BridgeError::Remote {
                operation: operation.to_string(),
                message,
            }),
            None => Ok(response),
        }
    }

    /// Logs off and releases the session. The logoff runs on its own task,
    /// so cancelling the caller does not cut it short.
    pub async fn logoff(mut self) -> Result<()> {
        let Some(lease) = self.lease.take() else {
            return Ok(());
        };
        let token = std::mem::take(&mut self.token);

        match tokio::spawn(logoff_within(lease, token, self.grace)).await {
            Ok(result) => result,
            Err(e) => Err(BridgeError::TransportFailure(format!("logoff task failed: {e}"))),
        }
    }
}

impl Drop for Conversation {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        let token = std::mem::take(&mut self.token);
        let grace = self.grace;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = logoff_within(lease, token, grace).await {
                        warn!(error = %e, "logoff after abandoned operation failed");
                    }
                });
            }
            Err(_) => warn!("no runtime available; releasing session without logoff"),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

async fn logoff_within(mut lease: PooledSession, token: String, grace: Duration) -> Result<()> {
    let request = json!({ SESSION_TOKEN: token });

    let result = match timeout(grace, lease.call(LOGOFF, request)).await {
        Ok(Ok(response)) => match application_error(&response) {
            Some(message) => Err(BridgeError::Remote {
                operation: LOGOFF.to_string(),
                message,
            }),
            None => Ok(()),
        },
        Ok(Err(e)) => Err(e),
        Err(_) => Err(BridgeError::TransportFailure(format!(
            "logoff did not finish within {grace:?}"
        ))),
    };

    if lease.is_interrupted() {
        warn!(principal = lease.principal(), "discarding session after an abandoned call");
        lease.discard().await;
    } else {
        lease.release();
    }
    result
}
