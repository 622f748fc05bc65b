//! Point ledger core
//!
//! Components, leaves first:
//!
//! * [`BatchStore`] owns point batches: creation, FIFO consumption and expiration.
//! * [`IdempotencyRegistry`] deduplicates transfer request submissions.
//! * [`TransferWorkflow`] drives transfer requests through their state machine.
//! * [`ConsistencyGuard`] runs every mutation in one atomic unit and audits the ledger.
//! * [`ExpirationSweeper`] expires batches and stale requests in bounded pages.

use std::sync::Arc;

use crate::ports::{clock::Clock, database::LedgerStore, log::LogSink};

mod batch_store;
mod error;
mod guard;
mod idempotency;
mod sweeper;
mod workflow;

pub use batch_store::{BatchStore, Redemption};
pub use error::{Error, ErrorKind};
pub use guard::{ConsistencyGuard, LedgerAudit, RetryPolicy, Total};
pub use idempotency::{Claim, IdempotencyRegistry, Registration};
pub use sweeper::{ExpirationSweeper, SweepReport};
pub use workflow::{Approval, TransferWorkflow};

/// All ledger components, wired to the same ports
#[derive(Clone)]
pub struct Ledger {
    pub guard: ConsistencyGuard,
    pub batches: BatchStore,
    pub transfers: TransferWorkflow,
    pub sweeper: ExpirationSweeper,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        log: Arc<dyn LogSink>,
        retry: RetryPolicy,
    ) -> Self {
        let guard = ConsistencyGuard::new(store, retry, log.clone());
        let batches = BatchStore::new(guard.clone(), clock.clone(), log.clone());
        let registry = IdempotencyRegistry::new(log.clone());
        let transfers = TransferWorkflow::new(
            guard.clone(),
            batches.clone(),
            registry,
            clock.clone(),
            log.clone(),
        );
        let sweeper = ExpirationSweeper::new(
            guard.clone(),
            batches.clone(),
            transfers.clone(),
            clock,
            log,
        );

        Self {
            guard,
            batches,
            transfers,
            sweeper,
        }
    }
}
