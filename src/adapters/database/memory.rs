use crate::{
    domain::{
        BatchStatus, ConsumptionEntry, PointBatch, Points, TransferRequest, TransferStatus,
    },
    ports::database::{Error, LedgerStore, LedgerTx},
};
use chrono::{DateTime, Utc};
use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// In-memory ledger storage
///
/// Transactions are serialized by a single lock, which is held from [`LedgerStore::begin`] until
/// the transaction is committed or dropped. Each transaction stages its writes on its own handle
/// to the tables, which replaces the shared one on commit. A table is only copied the first time
/// a transaction writes to it, so reads never copy anything.
#[derive(Clone, Debug, Default)]
pub struct MemoryDatabase {
    tables: Arc<Mutex<Tables>>,
    failing_commits: Arc<AtomicUsize>,
}

#[derive(Clone, Debug, Default)]
struct Tables {
    batches: Arc<HashMap<Uuid, PointBatch>>,
    requests: Arc<HashMap<Uuid, TransferRequest>>,
    /// Unique index on (sender, idempotency key)
    request_keys: Arc<HashMap<(Uuid, String), Uuid>>,
    consumptions: Arc<Vec<ConsumptionEntry>>,
}

impl MemoryDatabase {
    /// Make the next `count` commits fail with [`Error::TransactionAborted`]
    ///
    /// This simulates deadlocks or serialization failures from a real storage engine.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    async fn open(&self) -> MemoryTransaction {
        let guard = self.tables.clone().lock_owned().await;
        let staged = guard.clone();
        MemoryTransaction {
            guard,
            staged,
            failing_commits: self.failing_commits.clone(),
        }
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, Error> {
        Ok(Box::new(self.open().await))
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    staged: Tables,
    failing_commits: Arc<AtomicUsize>,
}

impl MemoryTransaction {
    fn batch_mut(&mut self, batch_id: Uuid) -> Result<&mut PointBatch, Error> {
        if !self.staged.batches.contains_key(&batch_id) {
            return Err(Error::BatchNotFound(batch_id));
        }
        Arc::make_mut(&mut self.staged.batches)
            .get_mut(&batch_id)
            .ok_or(Error::BatchNotFound(batch_id))
    }
}

#[async_trait::async_trait]
impl LedgerTx for MemoryTransaction {
    async fn insert_batch(&mut self, batch: &PointBatch) -> Result<(), Error> {
        Arc::make_mut(&mut self.staged.batches).insert(batch.batch_id, batch.clone());
        Ok(())
    }

    async fn select_batch(&mut self, batch_id: Uuid) -> Result<Option<PointBatch>, Error> {
        Ok(self.staged.batches.get(&batch_id).cloned())
    }

    async fn select_batches_for_user(
        &mut self,
        user_id: Uuid,
        _for_update: bool,
    ) -> Result<Vec<PointBatch>, Error> {
        Ok(self
            .staged
            .batches
            .values()
            .filter(|batch| batch.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_batch_remaining(
        &mut self,
        batch_id: Uuid,
        remaining_amount: Points,
        status: BatchStatus,
    ) -> Result<(), Error> {
        let batch = self.batch_mut(batch_id)?;
        batch.remaining_amount = remaining_amount;
        batch.status = status;
        Ok(())
    }

    async fn select_expired_batches(
        &mut self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PointBatch>, Error> {
        let mut batches: Vec<PointBatch> = self
            .staged
            .batches
            .values()
            .filter(|batch| {
                batch.is_active() && batch.remaining_amount > 0 && batch.is_past_expiry(before)
            })
            .cloned()
            .collect();
        batches.sort_by_key(|batch| (batch.expires_at, batch.batch_id));
        batches.truncate(limit);
        Ok(batches)
    }

    async fn mark_batch_expired(
        &mut self,
        batch_id: Uuid,
        forfeited_amount: Points,
    ) -> Result<(), Error> {
        let batch = self.batch_mut(batch_id)?;
        batch.forfeited_amount = forfeited_amount;
        batch.remaining_amount = 0;
        batch.status = BatchStatus::Expired;
        Ok(())
    }

    async fn select_all_batches(&mut self) -> Result<Vec<PointBatch>, Error> {
        Ok(self.staged.batches.values().cloned().collect())
    }

    async fn insert_transfer_request(&mut self, request: &TransferRequest) -> Result<(), Error> {
        let key = (request.from_user_id, request.idempotency_key.clone());
        match Arc::make_mut(&mut self.staged.request_keys).entry(key) {
            // Unique constraint violation
            Entry::Occupied(_) => Err(Error::DuplicateIdempotencyKey {
                from_user_id: request.from_user_id,
                idempotency_key: request.idempotency_key.clone(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(request.request_id);
                Arc::make_mut(&mut self.staged.requests)
                    .insert(request.request_id, request.clone());
                Ok(())
            }
        }
    }

    async fn select_request(
        &mut self,
        request_id: Uuid,
        _for_update: bool,
    ) -> Result<Option<TransferRequest>, Error> {
        Ok(self.staged.requests.get(&request_id).cloned())
    }

    async fn select_request_by_key(
        &mut self,
        from_user_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<TransferRequest>, Error> {
        let request = self
            .staged
            .request_keys
            .get(&(from_user_id, idempotency_key.to_string()))
            .and_then(|request_id| self.staged.requests.get(request_id))
            .cloned();
        Ok(request)
    }

    async fn compare_and_set_request_status(
        &mut self,
        request_id: Uuid,
        expected: TransferStatus,
        new: TransferStatus,
        decided_at: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let current = self
            .staged
            .requests
            .get(&request_id)
            .ok_or(Error::RequestNotFound(request_id))?;
        if current.status != expected {
            return Ok(false);
        }
        let request = Arc::make_mut(&mut self.staged.requests)
            .get_mut(&request_id)
            .ok_or(Error::RequestNotFound(request_id))?;
        request.status = new;
        request.decided_at = Some(decided_at);
        Ok(true)
    }

    async fn select_pending_past_expiry(
        &mut self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TransferRequest>, Error> {
        let mut requests: Vec<TransferRequest> = self
            .staged
            .requests
            .values()
            .filter(|request| {
                request.status == TransferStatus::Pending && request.is_past_expiry(now)
            })
            .cloned()
            .collect();
        requests.sort_by_key(|request| (request.expires_at, request.request_id));
        requests.truncate(limit);
        Ok(requests)
    }

    async fn insert_consumption(&mut self, entries: &[ConsumptionEntry]) -> Result<(), Error> {
        if !entries.is_empty() {
            Arc::make_mut(&mut self.staged.consumptions).extend_from_slice(entries);
        }
        Ok(())
    }

    async fn select_consumptions(&mut self) -> Result<Vec<ConsumptionEntry>, Error> {
        Ok(self.staged.consumptions.to_vec())
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        let failing = self
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok();
        if failing {
            return Err(Error::TransactionAborted(
                "simulated serialization failure".to_string(),
            ));
        }

        let MemoryTransaction {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }
}
