use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::errors::{BridgeError, Result};
use crate::routing::{RoutingTable, RoutingTableHandle};

use super::dispatch::Dispatcher;
use super::document::InboundDocument;
use super::store::OutcomeStore;
use super::unit::{OutcomeStatus, PendingOutcome, Phase, TransactionUnit};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const DEFAULT_DISPATCH_CONCURRENCY: usize = 4;

// -----------------------------------------------------------------------------
// ----- IntakeSettings --------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct IntakeSettings {
    pub dispatch_concurrency: usize,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            dispatch_concurrency: DEFAULT_DISPATCH_CONCURRENCY,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- IntakePipeline --------------------------------------------------------

/// Two-phase-commit participant for inbound document batches.
///
/// Each active `tid` owns one [`TransactionUnit`]. Units for different tids
/// never share state, so batches may be staged concurrently.
pub struct IntakePipeline {
    routes: RoutingTableHandle,
    dispatcher: Arc<dyn Dispatcher>,
    store: Arc<dyn OutcomeStore>,
    settings: IntakeSettings,
    units: Mutex<HashMap<String, TransactionUnit>>,
}

// -----------------------------------------------------------------------------
// ----- IntakePipeline: Static ------------------------------------------------

impl IntakePipeline {
    pub fn new(
        routes: RoutingTableHandle,
        dispatcher: Arc<dyn Dispatcher>,
        store: Arc<dyn OutcomeStore>,
        settings: IntakeSettings,
    ) -> Self {
        Self {
            routes,
            dispatcher,
            store,
            settings: IntakeSettings {
                dispatch_concurrency: settings.dispatch_concurrency.max(1),
            },
            units: Mutex::new(HashMap::new()),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- IntakePipeline: Coordinator API ---------------------------------------

impl IntakePipeline {
    /// True when `tid` has neither been committed nor is being processed.
    ///
    /// A store failure answers `false`: suppressing a delivery is preferred
    /// over processing it twice.
    pub async fn is_unseen(&self, tid: &str) -> bool {
        if self.units.lock().contains_key(tid) {
            debug!(tid, "tid is already in flight");
            return false;
        }

        match self.store.has_committed(tid).await {
            Ok(committed) => !committed,
            Err(e) => {
                error!(tid, error = %e, "cannot read outcome store; treating tid as seen");
                false
            }
        }
    }

    /// Routes and dispatches every document of the batch, in arrival order,
    /// and stages one outcome per document.
    ///
    /// Per-document failures are recorded, never raised. The only error is
    /// [`BridgeError::TransactionInFlight`] when another unit with the same
    /// `tid` is still active.
    pub async fn stage(
        &self,
        tid: &str,
        documents: Vec<InboundDocument>,
    ) -> Result<Vec<PendingOutcome>> {
        let claim = self.claim(tid)?;
        let routes = self.routes.snapshot();

        let outcomes: Vec<PendingOutcome> = stream::iter(documents)
            .map(|document| self.stage_one(&routes, document))
            .buffered(self.settings.dispatch_concurrency)
            .collect()
            .await;

        let failed = outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Error)
            .count();
        info!(tid, documents = outcomes.len(), failed, "staged batch");

        claim.stage(outcomes.clone());
        Ok(outcomes)
    }

    /// Makes the staged outcomes durable as one batch.
    ///
    /// Committing an already committed unit is a no-op. A store failure is
    /// returned as [`BridgeError::CommitFailed`] and the unit stays staged.
    pub async fn commit(&self, tid: &str) -> Result<()> {
        let records = {
            let units = self.units.lock();
            let unit = units
                .get(tid)
                .ok_or_else(|| BridgeError::UnknownTransaction { tid: tid.to_string() })?;

            match unit.phase() {
                Phase::Staged => unit.records(),
                Phase::Committed | Phase::Confirmed => {
                    debug!(tid, "commit repeated for committed unit");
                    return Ok(());
                }
                Phase::Received => {
                    return Err(BridgeError::TransactionInFlight { tid: tid.to_string() });
                }
                Phase::RolledBack => {
                    return Err(BridgeError::UnknownTransaction { tid: tid.to_string() });
                }
            }
        };

        if let Err(source) = self.store.append_batch(tid, &records).await {
            error!(tid, error = %source, "commit failed");
            return Err(BridgeError::CommitFailed {
                tid: tid.to_string(),
                source,
            });
        }

        if let Some(unit) = self.units.lock().get_mut(tid) {
            unit.mark_committed();
        }

        info!(tid, outcomes = records.len(), "committed batch");
        Ok(())
    }

    /// Discards staged outcomes. Never fails. A unit that is still being
    /// staged, or already committed, is left alone.
    pub fn rollback(&self, tid: &str) {
        let mut units = self.units.lock();

        match units.get(tid).map(TransactionUnit::phase) {
            None => debug!(tid, "rollback for unknown tid"),
            Some(Phase::Committed) => {
                warn!(tid, "rollback after commit ignored; outcomes are already durable");
            }
            Some(Phase::Received) => {
                warn!(tid, "rollback while staging is in progress ignored");
            }
            Some(_) => {
                if let Some(mut unit) = units.remove(tid) {
                    unit.finish(Phase::RolledBack);
                }
                info!(tid, "rolled back batch");
            }
        }
    }

    /// Releases the unit's documents after a successful commit. Repeated or
    /// unknown confirmations are no-ops.
    pub fn confirm(&self, tid: &str) {
        let mut units = self.units.lock();

        match units.get(tid).map(TransactionUnit::phase) {
            Some(Phase::Committed) => {
                if let Some(mut unit) = units.remove(tid) {
                    unit.finish(Phase::Confirmed);
                }
                debug!(tid, "confirmed batch");
            }
            Some(phase) => warn!(tid, ?phase, "confirm before commit ignored"),
            None => debug!(tid, "confirm for released tid"),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- IntakePipeline: Inspection --------------------------------------------

impl IntakePipeline {
    pub fn phase(&self, tid: &str) -> Option<Phase> {
        self.units.lock().get(tid).map(TransactionUnit::phase)
    }

    pub fn active_units(&self) -> usize {
        self.units.lock().len()
    }
}

// -----------------------------------------------------------------------------
// ----- IntakePipeline: Private -----------------------------------------------

impl IntakePipeline {
    fn claim(&self, tid: &str) -> Result<Claim<'_>> {
        let mut units = self.units.lock();
        if units.contains_key(tid) {
            warn!(tid, "duplicate delivery while tid is in flight");
            return Err(BridgeError::TransactionInFlight { tid: tid.to_string() });
        }

        units.insert(tid.to_string(), TransactionUnit::received(tid));
        Ok(Claim {
            pipeline: self,
            tid: tid.to_string(),
            staged: false,
        })
    }

    async fn stage_one(&self, routes: &RoutingTable, document: InboundDocument) -> PendingOutcome {
        let Some(target) = routes
            .resolve(&document.category, &document.subtype, &document.recipient)
            .cloned()
        else {
            let error = BridgeError::RoutingNotFound {
                category: document.category.clone(),
                subtype: document.subtype.clone(),
                recipient: document.recipient.clone(),
            };
            warn!(document = %document.id, %error, "document not routed");
            return PendingOutcome::failed(&document.id, None, error.to_string(), document.payload);
        };

        match self.dispatcher.dispatch(&target, &document).await {
            Ok(()) => PendingOutcome::dispatched(&document.id, target, document.payload),
            Err(e) => {
                warn!(document = %document.id, %target, error = %e, "dispatch failed");
                PendingOutcome::failed(&document.id, Some(target), e.to_string(), document.payload)
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Claim -------------------------------------------------------

// Holds a freshly received unit. If staging is abandoned the tid is released
// so the coordinator can redeliver it.
struct Claim<'a> {
    pipeline: &'a IntakePipeline,
    tid: String,
    staged: bool,
}

impl Claim<'_> {
    fn stage(mut self, outcomes: Vec<PendingOutcome>) {
        if let Some(unit) = self.pipeline.units.lock().get_mut(&self.tid) {
            unit.stage(outcomes);
        }
        self.staged = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.staged {
            debug!(tid = %self.tid, "abandoned staging");
            self.pipeline.units.lock().remove(&self.tid);
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
