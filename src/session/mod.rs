//! Login → business call(s) → logoff over one pooled backend session.

pub mod conversation;
pub mod operation;
pub mod orchestrator;
pub mod principal;

pub use operation::{Operation, OperationKind, OperationRequest};
pub use orchestrator::{
    OperationResponse, OrchestratorSettings, SessionOrchestrator, StepOutcome, StepRecord, Steps,
};
pub use principal::{PrincipalRecord, PrincipalResolver, StaticPrincipals};
