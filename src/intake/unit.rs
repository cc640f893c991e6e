use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::routing::Target;

use super::store::OutcomeRecord;

// -----------------------------------------------------------------------------
// ----- Phase -----------------------------------------------------------------

/// Lifecycle of a [`TransactionUnit`].
///
/// `Received → Staged → Committed | RolledBack → Confirmed`. Units are dropped
/// from the pipeline once they reach `RolledBack` or `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Received,
    Staged,
    Committed,
    RolledBack,
    Confirmed,
}

// -----------------------------------------------------------------------------
// ----- PendingOutcome --------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeStatus {
    Dispatched,
    Error,
}

/// Dispatch result of one inbound document, owned by its unit until commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOutcome {
    pub document_id: String,
    pub target: Option<Target>,
    pub status: OutcomeStatus,
    pub error: Option<String>,
    pub payload: Bytes,
}

impl PendingOutcome {
    pub fn dispatched(document_id: &str, target: Target, payload: Bytes) -> Self {
        Self {
            document_id: document_id.to_string(),
            target: Some(target),
            status: OutcomeStatus::Dispatched,
            error: None,
            payload,
        }
    }

    pub fn failed(
        document_id: &str,
        target: Option<Target>,
        error: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            document_id: document_id.to_string(),
            target,
            status: OutcomeStatus::Error,
            error: Some(error.into()),
            payload,
        }
    }

    pub fn record(&self) -> OutcomeRecord {
        OutcomeRecord {
            document_id: self.document_id.clone(),
            target: self.target.clone(),
            status: self.status,
            error: self.error.clone(),
            payload_digest: format!("{:x}", md5::compute(&self.payload)),
            payload_len: self.payload.len(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- TransactionUnit -------------------------------------------------------

#[derive(Debug)]
pub struct TransactionUnit {
    tid: String,
    phase: Phase,
    outcomes: Vec<PendingOutcome>,
}

impl TransactionUnit {
    pub(crate) fn received(tid: &str) -> Self {
        Self {
            tid: tid.to_string(),
            phase: Phase::Received,
            outcomes: Vec::new(),
        }
    }

    pub fn tid(&self) -> &str {
        &self.tid
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn outcomes(&self) -> &[PendingOutcome] {
        &self.outcomes
    }

    pub(crate) fn stage(&mut self, outcomes: Vec<PendingOutcome>) {
        self.outcomes = outcomes;
        self.phase = Phase::Staged;
    }

    pub(crate) fn mark_committed(&mut self) {
        self.phase = Phase::Committed;
    }

    pub(crate) fn records(&self) -> Vec<OutcomeRecord> {
        self.outcomes.iter().map(PendingOutcome::record).collect()
    }

    /// Drops the staged documents, keeping only the phase.
    pub(crate) fn finish(&mut self, phase: Phase) {
        self.phase = phase;
        self.outcomes.clear();
        self.outcomes.shrink_to_fit();
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------
