use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    BatchStatus, ConsumptionEntry, PointBatch, Points, TransferRequest, TransferStatus,
};

/// Entry point into the ledger storage
///
/// Every read and write goes through a [`LedgerTx`]. Nothing written through a transaction is
/// visible to other transactions before [`LedgerTx::commit`].
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, Error>;
}

/// One atomic unit of work against the ledger storage
///
/// Rows read with `for_update` stay exclusively locked until the transaction ends. Dropping a
/// transaction without committing it rolls it back.
#[async_trait::async_trait]
pub trait LedgerTx: Send {
    async fn insert_batch(&mut self, batch: &PointBatch) -> Result<(), Error>;
    async fn select_batch(&mut self, batch_id: Uuid) -> Result<Option<PointBatch>, Error>;
    async fn select_batches_for_user(
        &mut self,
        user_id: Uuid,
        for_update: bool,
    ) -> Result<Vec<PointBatch>, Error>;
    async fn update_batch_remaining(
        &mut self,
        batch_id: Uuid,
        remaining_amount: Points,
        status: BatchStatus,
    ) -> Result<(), Error>;
    /// Active batches expiring strictly before `before` that still hold points
    async fn select_expired_batches(
        &mut self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PointBatch>, Error>;
    async fn mark_batch_expired(
        &mut self,
        batch_id: Uuid,
        forfeited_amount: Points,
    ) -> Result<(), Error>;
    async fn select_all_batches(&mut self) -> Result<Vec<PointBatch>, Error>;

    /// Insert a new transfer request
    ///
    /// This fails with [`Error::DuplicateIdempotencyKey`] if the sender already used the same
    /// idempotency key.
    async fn insert_transfer_request(&mut self, request: &TransferRequest) -> Result<(), Error>;
    async fn select_request(
        &mut self,
        request_id: Uuid,
        for_update: bool,
    ) -> Result<Option<TransferRequest>, Error>;
    async fn select_request_by_key(
        &mut self,
        from_user_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<TransferRequest>, Error>;
    /// Move a request to `new` only if its status is still `expected`
    ///
    /// Returns `false` when the status did not match, in which case nothing is written.
    async fn compare_and_set_request_status(
        &mut self,
        request_id: Uuid,
        expected: TransferStatus,
        new: TransferStatus,
        decided_at: DateTime<Utc>,
    ) -> Result<bool, Error>;
    async fn select_pending_past_expiry(
        &mut self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferRequest>, Error>;

    async fn insert_consumption(&mut self, entries: &[ConsumptionEntry]) -> Result<(), Error>;
    async fn select_consumptions(&mut self) -> Result<Vec<ConsumptionEntry>, Error>;

    async fn commit(self: Box<Self>) -> Result<(), Error>;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The sender already submitted a request with this idempotency key
    ///
    /// This is the uniqueness constraint on (sender, idempotency key). Concurrent first-time
    /// submissions racing on the same key see exactly one winner, the others get this error.
    #[error("idempotency key {idempotency_key:?} already used by {from_user_id}")]
    DuplicateIdempotencyKey {
        from_user_id: Uuid,
        idempotency_key: String,
    },

    #[error("batch {0} does not exist")]
    BatchNotFound(Uuid),

    #[error("transfer request {0} does not exist")]
    RequestNotFound(Uuid),

    /// The transaction was aborted by the storage engine
    ///
    /// This covers deadlocks and serialization failures. Retrying the whole logical operation is
    /// safe.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    /// Storage fault that is not a ledger outcome
    ///
    /// A lost connection or a malformed row ends up here. Unlike
    /// [`TransactionAborted`](Error::TransactionAborted), retrying is not assumed to help.
    #[error("adapter error: {0:?}")]
    Adapter(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransactionAborted(_))
    }
}
