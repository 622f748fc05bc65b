use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{
    idempotency::{Claim, IdempotencyRegistry, Registration},
    BatchStore, ConsistencyGuard, Error,
};
use crate::{
    domain::{
        inherited_expiry, BatchOrigin, ConsumptionEntry, ConsumptionOperation,
        ConsumptionRecord, PayloadFingerprint, PointBatch, Points, TransferRequest,
        TransferStatus,
    },
    fields,
    ports::{
        clock::Clock,
        database::LedgerTx,
        log::{Level, LogSink},
    },
};

/// State machine of transfer requests
///
/// ```text
/// Pending ─┬─> Approved
///          ├─> Rejected
///          ├─> Cancelled
///          └─> Expired
/// ```
///
/// Requests leave `Pending` exactly once, through a compare-and-set on the expected status.
/// Points only move on approval.
#[derive(Clone)]
pub struct TransferWorkflow {
    guard: ConsistencyGuard,
    batches: BatchStore,
    registry: IdempotencyRegistry,
    clock: Arc<dyn Clock>,
    log: Arc<dyn LogSink>,
}

/// Result of an approved transfer request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Approval {
    pub request: TransferRequest,
    /// Points taken from the sender's batches
    pub debits: Vec<ConsumptionRecord>,
    /// Batch minted for the receiver
    pub credit: PointBatch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Decision {
    Reject,
    Cancel,
}

impl Decision {
    fn status(&self) -> TransferStatus {
        match self {
            Decision::Reject => TransferStatus::Rejected,
            Decision::Cancel => TransferStatus::Cancelled,
        }
    }

    fn action(&self) -> &'static str {
        match self {
            Decision::Reject => "reject",
            Decision::Cancel => "cancel",
        }
    }

    /// Only the receiver rejects, only the sender cancels
    fn allowed_actor(&self, request: &TransferRequest) -> Uuid {
        match self {
            Decision::Reject => request.to_user_id,
            Decision::Cancel => request.from_user_id,
        }
    }
}

impl TransferWorkflow {
    pub fn new(
        guard: ConsistencyGuard,
        batches: BatchStore,
        registry: IdempotencyRegistry,
        clock: Arc<dyn Clock>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            guard,
            batches,
            registry,
            clock,
            log,
        }
    }

    /// Submit a new transfer request
    ///
    /// Submitting the same key with the same payload returns the stored request, whatever its
    /// current status. The balance check is advisory: no points are reserved until approval.
    pub async fn create(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
        amount: Points,
        idempotency_key: &str,
        ttl: Duration,
    ) -> Result<TransferRequest, Error> {
        if from_user_id == to_user_id {
            return Err(Error::SelfTransfer(from_user_id));
        }
        if amount == 0 {
            return Err(Error::InvalidAmount);
        }
        if ttl <= Duration::zero() || self.clock.now().checked_add_signed(ttl).is_none() {
            return Err(Error::InvalidTtl);
        }
        if idempotency_key.is_empty() {
            return Err(Error::InvalidIdempotencyKey);
        }

        self.guard
            .retrying("create_transfer_request", move || {
                self.try_create(from_user_id, to_user_id, amount, idempotency_key, ttl)
            })
            .await
    }

    async fn try_create(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
        amount: Points,
        idempotency_key: &str,
        ttl: Duration,
    ) -> Result<TransferRequest, Error> {
        let fingerprint = PayloadFingerprint::new(to_user_id, amount);
        let mut tx = self.guard.begin().await?;

        if let Registration::Replay(existing) = self
            .registry
            .register(tx.as_mut(), from_user_id, idempotency_key, &fingerprint)
            .await?
        {
            return Ok(existing);
        }

        let available = self.batches.balance(tx.as_mut(), from_user_id).await?;
        if available < amount {
            return Err(Error::InsufficientBalance {
                user_id: from_user_id,
                available,
                requested: amount,
            });
        }

        let request = TransferRequest::new(
            from_user_id,
            to_user_id,
            amount,
            idempotency_key.to_string(),
            self.clock.now(),
            ttl,
        )
        .ok_or(Error::InvalidTtl)?;
        match self.registry.claim(tx.as_mut(), &request).await? {
            Claim::Won => {
                tx.commit().await?;
                self.log.log(
                    Level::Info,
                    "transfer request created",
                    fields! {
                        "request_id" => request.request_id,
                        "from_user_id" => from_user_id,
                        "to_user_id" => to_user_id,
                        "amount" => amount,
                        "expires_at" => request.expires_at,
                    },
                );
                Ok(request)
            }
            Claim::Lost => {
                drop(tx);
                let mut tx = self.guard.begin().await?;
                self.registry
                    .resolve_lost_claim(tx.as_mut(), from_user_id, idempotency_key, &fingerprint)
                    .await
            }
        }
    }

    /// Approve a pending request and move the points
    ///
    /// The sender's points are consumed in FIFO order and the receiver gets a new batch that
    /// expires with the earliest of the consumed batches. Nothing is written if the sender no
    /// longer has enough points or if the request was decided concurrently.
    pub async fn approve(&self, request_id: Uuid, actor: Uuid) -> Result<Approval, Error> {
        self.guard
            .retrying("approve_transfer_request", move || {
                self.try_approve(request_id, actor)
            })
            .await
    }

    async fn try_approve(&self, request_id: Uuid, actor: Uuid) -> Result<Approval, Error> {
        let now = self.clock.now();
        let mut tx = self.guard.begin().await?;

        let request = self.load(tx.as_mut(), request_id).await?;
        if actor != request.to_user_id {
            return Err(Error::NotAuthorized {
                request_id,
                actor,
                action: "approve",
            });
        }
        if request.status != TransferStatus::Pending {
            return Err(Error::AlreadyDecided {
                request_id,
                status: request.status,
            });
        }
        if request.is_past_expiry(now) {
            return Err(Error::RequestExpired(request_id));
        }

        let debits = self
            .batches
            .consume_fifo(tx.as_mut(), request.from_user_id, request.amount)
            .await?;
        let credit = self
            .batches
            .create_batch(
                tx.as_mut(),
                request.to_user_id,
                request.amount,
                inherited_expiry(&debits),
                BatchOrigin::Transfer { request_id },
            )
            .await?;
        let entries: Vec<ConsumptionEntry> = debits
            .iter()
            .map(|record| ConsumptionEntry {
                operation: ConsumptionOperation::Transfer { request_id },
                user_id: request.from_user_id,
                record: *record,
                recorded_at: now,
            })
            .collect();
        tx.insert_consumption(&entries).await?;

        let request = self
            .transition(tx.as_mut(), request, TransferStatus::Approved, now)
            .await?;
        tx.commit().await?;

        self.log.log(
            Level::Info,
            "transfer request approved",
            fields! {
                "request_id" => request_id,
                "from_user_id" => request.from_user_id,
                "to_user_id" => request.to_user_id,
                "amount" => request.amount,
                "credit_batch_id" => credit.batch_id,
                "credit_expires_at" => credit.expires_at,
            },
        );

        Ok(Approval {
            request,
            debits,
            credit,
        })
    }

    /// Reject a pending request, only allowed to the receiver
    pub async fn reject(&self, request_id: Uuid, actor: Uuid) -> Result<TransferRequest, Error> {
        self.decide(request_id, actor, Decision::Reject).await
    }

    /// Cancel a pending request, only allowed to the sender
    pub async fn cancel(&self, request_id: Uuid, actor: Uuid) -> Result<TransferRequest, Error> {
        self.decide(request_id, actor, Decision::Cancel).await
    }

    async fn decide(
        &self,
        request_id: Uuid,
        actor: Uuid,
        decision: Decision,
    ) -> Result<TransferRequest, Error> {
        self.guard
            .retrying(decision.action(), move || async move {
                let now = self.clock.now();
                let mut tx = self.guard.begin().await?;

                let request = self.load(tx.as_mut(), request_id).await?;
                if actor != decision.allowed_actor(&request) {
                    return Err(Error::NotAuthorized {
                        request_id,
                        actor,
                        action: decision.action(),
                    });
                }
                let request = self
                    .transition(tx.as_mut(), request, decision.status(), now)
                    .await?;
                tx.commit().await?;

                self.log.log(
                    Level::Info,
                    "transfer request decided",
                    fields! {
                        "request_id" => request_id,
                        "actor" => actor,
                        "status" => request.status.to_string(),
                    },
                );
                Ok(request)
            })
            .await
    }

    /// Expire pending requests whose expiration date is strictly before `now`
    ///
    /// Each page of at most `page_limit` requests is handled in its own transaction. Returns the
    /// number of expired requests.
    pub async fn expire_stale(
        &self,
        now: DateTime<Utc>,
        page_limit: usize,
    ) -> Result<usize, Error> {
        if page_limit == 0 {
            return Err(Error::InvalidPageLimit);
        }

        let mut expired = 0;
        loop {
            let (scanned, page_expired) = self
                .guard
                .retrying("expire_stale_requests", move || {
                    self.expire_stale_page(now, page_limit)
                })
                .await?;
            expired += page_expired;
            if scanned < page_limit {
                break;
            }
        }

        Ok(expired)
    }

    async fn expire_stale_page(
        &self,
        now: DateTime<Utc>,
        page_limit: usize,
    ) -> Result<(usize, usize), Error> {
        let mut tx = self.guard.begin().await?;
        let stale = tx.select_pending_past_expiry(now, page_limit).await?;

        let mut expired = Vec::with_capacity(stale.len());
        for request in &stale {
            if tx
                .compare_and_set_request_status(
                    request.request_id,
                    TransferStatus::Pending,
                    TransferStatus::Expired,
                    now,
                )
                .await?
            {
                expired.push(request.request_id);
            }
        }
        tx.commit().await?;

        for request_id in &expired {
            self.log.log(
                Level::Info,
                "transfer request expired",
                fields! { "request_id" => *request_id },
            );
        }
        Ok((stale.len(), expired.len()))
    }

    /// Read a transfer request
    pub async fn get(&self, request_id: Uuid) -> Result<TransferRequest, Error> {
        let mut tx = self.guard.begin().await?;
        self.load(tx.as_mut(), request_id).await
    }

    async fn load(
        &self,
        tx: &mut dyn LedgerTx,
        request_id: Uuid,
    ) -> Result<TransferRequest, Error> {
        tx.select_request(request_id, true)
            .await?
            .ok_or(Error::RequestNotFound(request_id))
    }

    /// Compare-and-set out of `Pending`
    async fn transition(
        &self,
        tx: &mut dyn LedgerTx,
        mut request: TransferRequest,
        new: TransferStatus,
        now: DateTime<Utc>,
    ) -> Result<TransferRequest, Error> {
        let swapped = tx
            .compare_and_set_request_status(request.request_id, TransferStatus::Pending, new, now)
            .await?;
        if !swapped {
            // Re-read to report the status that won
            let current = self.load(tx, request.request_id).await?;
            return Err(Error::AlreadyDecided {
                request_id: request.request_id,
                status: current.status,
            });
        }

        request.status = new;
        request.decided_at = Some(now);
        Ok(request)
    }
}
