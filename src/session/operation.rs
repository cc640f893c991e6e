use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::{BridgeError, Result};
use crate::remote::Payload;

// -----------------------------------------------------------------------------
// ----- OperationRequest ------------------------------------------------------

/// High-level request as received from the bus: who asks, and loose fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationRequest {
    #[serde(default)]
    pub external_user: String,

    #[serde(default, flatten)]
    pub fields: Map<String, Value>,
}

impl OperationRequest {
    pub fn new(external_user: impl Into<String>) -> Self {
        Self {
            external_user: external_user.into(),
            fields: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    fn required(&self, field: &'static str) -> Result<String> {
        match self.fields.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(BridgeError::Validation { field }),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- OperationKind ---------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    RunJob,
    CopyThenRunJob,
    GetStatus,
    GetLogs,
}

impl OperationKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "run_job" => Some(OperationKind::RunJob),
            "copy_then_run_job" => Some(OperationKind::CopyThenRunJob),
            "get_status" => Some(OperationKind::GetStatus),
            "get_logs" => Some(OperationKind::GetLogs),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::RunJob => "run_job",
            OperationKind::CopyThenRunJob => "copy_then_run_job",
            OperationKind::GetStatus => "get_status",
            OperationKind::GetLogs => "get_logs",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// ----- Operation -------------------------------------------------------------

/// A validated high-level operation, carrying exactly what its remote calls
/// need.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    RunJob {
        job: String,
        parameters: Option<Payload>,
    },
    CopyThenRunJob {
        job: String,
        new_name: String,
        parameters: Option<Payload>,
    },
    GetStatus {
        run_id: String,
    },
    GetLogs {
        run_id: String,
    },
}

impl Operation {
    /// Checks `request` against what `name` requires. Fails on the first
    /// missing field.
    pub fn parse(name: &str, request: &OperationRequest) -> Result<Self> {
        let kind =
            OperationKind::from_name(name).ok_or(BridgeError::Validation { field: "operation" })?;

        if request.external_user.trim().is_empty() {
            return Err(BridgeError::Validation {
                field: "external_user",
            });
        }

        let parameters = request.fields.get("parameters").cloned();

        Ok(match kind {
            OperationKind::RunJob => Operation::RunJob {
                job: request.required("job")?,
                parameters,
            },
            OperationKind::CopyThenRunJob => Operation::CopyThenRunJob {
                job: request.required("job")?,
                new_name: request.required("new_name")?,
                parameters,
            },
            OperationKind::GetStatus => Operation::GetStatus {
                run_id: request.required("run_id")?,
            },
            OperationKind::GetLogs => Operation::GetLogs {
                run_id: request.required("run_id")?,
            },
        })
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::RunJob { .. } => OperationKind::RunJob,
            Operation::CopyThenRunJob { .. } => OperationKind::CopyThenRunJob,
            Operation::GetStatus { .. } => OperationKind::GetStatus,
            Operation::GetLogs { .. } => OperationKind::GetLogs,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
