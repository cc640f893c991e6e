use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use smallvec::SmallVec;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::errors::{BridgeError, Result};
use crate::pool::ConnectionPool;
use crate::remote::Payload;

use super::conversation::Conversation;
use super::operation::{Operation, OperationKind, OperationRequest};
use super::principal::PrincipalResolver;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const RUN_JOB: &str = "RunBatchJob";
pub const COPY_JOB: &str = "CopyBatchJob";
pub const GET_STATUS: &str = "GetBatchJobStatus";
pub const GET_LOGS: &str = "GetBatchJobLogs";

pub const DEFAULT_LOGOFF_GRACE: Duration = Duration::from_secs(5);

// -----------------------------------------------------------------------------
// ----- Settings & Response ---------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub logoff_grace: Duration,
    pub operation_timeout: Option<Duration>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            logoff_grace: DEFAULT_LOGOFF_GRACE,
            operation_timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Failed(String),
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub call: &'static str,
    pub outcome: StepOutcome,
}

pub type Steps = SmallVec<[StepRecord; 4]>;

#[derive(Debug, Clone)]
pub struct OperationResponse {
    pub operation: OperationKind,
    /// Result of the last business call.
    pub result: Payload,
    pub steps: Steps,
}

// -----------------------------------------------------------------------------
// ----- SessionOrchestrator ---------------------------------------------------

pub struct SessionOrchestrator {
    pool: Arc<ConnectionPool>,
    principals: Arc<dyn PrincipalResolver>,
    settings: OrchestratorSettings,
}

impl SessionOrchestrator {
    pub fn new(
        pool: Arc<ConnectionPool>,
        principals: Arc<dyn PrincipalResolver>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            pool,
            principals,
            settings,
        }
    }

    /// Runs `operation_name` as logon, its business calls and logoff on one
    /// pooled session.
    ///
    /// Invalid requests fail before any session is taken. A failed logon is
    /// returned as-is with no logoff. After a successful logon, logoff always
    /// runs; its own failure is logged and never replaces the business result.
    pub async fn execute(
        &self,
        operation_name: &str,
        request: OperationRequest,
    ) -> Result<OperationResponse> {
        let operation = Operation::parse(operation_name, &request)?;
        let kind = operation.kind();

        let (principal, credentials) = self.principals.resolve(&request.external_user)?;
        let lease = self.pool.acquire(&principal, &credentials).await?;
        let mut conversation =
            Conversation::login(lease, &request.external_user, self.settings.logoff_grace).await?;

        let mut steps = Steps::new();
        let outcome = match self.settings.operation_timeout {
            Some(limit) => timeout(limit, run(&operation, &mut conversation, &mut steps))
                .await
                .unwrap_or_else(|_| {
                    Err(BridgeError::TransportFailure(format!(
                        "{kind} did not finish within {limit:?}"
                    )))
                }),
            None => run(&operation, &mut conversation, &mut steps).await,
        };

        if let Err(e) = conversation.logoff().await {
            warn!(operation = %kind, error = %e, "logoff failed");
        }

        match outcome {
            Ok(result) => {
                info!(operation = %kind, user = %request.external_user, "operation completed");
                Ok(OperationResponse {
                    operation: kind,
                    result,
                    steps,
                })
            }
            Err(e) => {
                debug!(operation = %kind, error = %e, ?steps, "operation failed");
                Err(e)
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Business Calls ----------------------------------------------

async fn run(
    operation: &Operation,
    conversation: &mut Conversation,
    steps: &mut Steps,
) -> Result<Payload> {
    match operation {
        Operation::RunJob { job, parameters } => {
            step(conversation, steps, RUN_JOB, run_request(job, parameters)).await
        }

        Operation::CopyThenRunJob {
            job,
            new_name,
            parameters,
        } => {
            let copy = json!({ "job": job, "new_name": new_name });
            let copied = match step(conversation, steps, COPY_JOB, copy).await {
                Ok(copied) => copied,
                Err(e) => {
                    steps.push(StepRecord {
                        call: RUN_JOB,
                        outcome: StepOutcome::Skipped,
                    });
                    return Err(e);
                }
            };

            let Some(copied_job) = job_id(&copied) else {
                steps.push(StepRecord {
                    call: RUN_JOB,
                    outcome: StepOutcome::Skipped,
                });
                return Err(BridgeError::Remote {
                    operation: COPY_JOB.to_string(),
                    message: "response carries no job_id".to_string(),
                });
            };

            step(conversation, steps, RUN_JOB, run_request(&copied_job, parameters)).await
        }

        Operation::GetStatus { run_id } => {
            step(conversation, steps, GET_STATUS, json!({ "run_id": run_id })).await
        }

        Operation::GetLogs { run_id } => {
            step(conversation, steps, GET_LOGS, json!({ "run_id": run_id })).await
        }
    }
}

async fn step(
    conversation: &mut Conversation,
    steps: &mut Steps,
    call: &'static str,
    request: Payload,
) -> Result<Payload> {
    let result = conversation.call(call, request).await;

    steps.push(StepRecord {
        call,
        outcome: match &result {
            Ok(_) => StepOutcome::Succeeded,
            Err(e) => StepOutcome::Failed(e.to_string()),
        },
    });

    result
}

fn run_request(job: &str, parameters: &Option<Payload>) -> Payload {
    let mut request = json!({ "job": job });
    if let (Some(fields), Some(parameters)) = (request.as_object_mut(), parameters) {
        fields.insert("parameters".to_string(), parameters.clone());
    }
    request
}

fn job_id(response: &Payload) -> Option<String> {
    match response.get("job_id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_accepts_strings_and_numbers() {
        assert_eq!(job_id(&json!({ "job_id": "J-2" })), Some("J-2".to_string()));
        assert_eq!(job_id(&json!({ "job_id": 42 })), Some("42".to_string()));
        assert_eq!(job_id(&json!({ "job_id": "" })), None);
        assert_eq!(job_id(&json!({ "status": "ok" })), None);
    }

    #[test]
    fn run_request_threads_parameters() {
        let params = Some(json!({ "region": "EU" }));
        assert_eq!(
            run_request("J-2", &params),
            json!({ "job": "J-2", "parameters": { "region": "EU" } })
        );
        assert_eq!(run_request("J-2", &None), json!({ "job": "J-2" }));
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
