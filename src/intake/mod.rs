//! Transactional intake of inbound document batches.
//!
//! A transaction coordinator drives each batch through
//! `is_unseen → stage → commit | rollback → confirm`. Staged outcomes only
//! become durable on commit, and a committed `tid` is never processed twice.

pub mod dispatch;
pub mod document;
pub mod pipeline;
pub mod store;
pub mod unit;

pub use dispatch::{BackendDispatcher, DispatchRouter, Dispatcher, RetryPolicy};
pub use document::InboundDocument;
pub use pipeline::{IntakePipeline, IntakeSettings};
pub use store::{JournalOutcomeStore, MemoryOutcomeStore, OutcomeRecord, OutcomeStore};
pub use unit::{OutcomeStatus, PendingOutcome, Phase, TransactionUnit};
