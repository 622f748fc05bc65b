use std::sync::Arc;

use uuid::Uuid;

use super::Error;
use crate::{
    domain::{PayloadFingerprint, TransferRequest},
    fields,
    ports::{
        database::{self, LedgerTx},
        log::{Level, LogSink},
    },
};

/// Deduplicates transfer request submissions by (sender, idempotency key)
///
/// The unique index in the storage is the only arbiter between concurrent submissions: the
/// registry never relies on an earlier lookup to decide who wins.
#[derive(Clone)]
pub struct IdempotencyRegistry {
    log: Arc<dyn LogSink>,
}

/// Outcome of [`IdempotencyRegistry::register`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Registration {
    /// First submission with this key
    New,
    /// Same key, same payload: the stored request is returned as-is
    Replay(TransferRequest),
}

/// Outcome of [`IdempotencyRegistry::claim`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Claim {
    Won,
    /// A concurrent submission inserted the same key first
    Lost,
}

impl IdempotencyRegistry {
    pub fn new(log: Arc<dyn LogSink>) -> Self {
        Self { log }
    }

    /// Look up a previous submission of the same key
    ///
    /// Fails with [`Error::ConflictingIdempotencyKey`] if the key was used for another payload.
    pub async fn register(
        &self,
        tx: &mut dyn LedgerTx,
        from_user_id: Uuid,
        idempotency_key: &str,
        fingerprint: &PayloadFingerprint,
    ) -> Result<Registration, Error> {
        match tx.select_request_by_key(from_user_id, idempotency_key).await? {
            None => Ok(Registration::New),
            Some(existing) if existing.fingerprint == *fingerprint => {
                self.log.log(
                    Level::Info,
                    "transfer request replayed",
                    fields! {
                        "request_id" => existing.request_id,
                        "from_user_id" => from_user_id,
                        "idempotency_key" => idempotency_key,
                    },
                );
                Ok(Registration::Replay(existing))
            }
            Some(existing) => {
                self.log.log(
                    Level::Warn,
                    "idempotency key reused with a different payload",
                    fields! {
                        "request_id" => existing.request_id,
                        "from_user_id" => from_user_id,
                        "idempotency_key" => idempotency_key,
                        "stored" => existing.fingerprint.to_string(),
                        "submitted" => fingerprint.to_string(),
                    },
                );
                Err(Error::ConflictingIdempotencyKey {
                    idempotency_key: idempotency_key.to_string(),
                    existing_request_id: existing.request_id,
                })
            }
        }
    }

    /// Insert the request, relying on the unique index to detect a concurrent winner
    pub async fn claim(
        &self,
        tx: &mut dyn LedgerTx,
        request: &TransferRequest,
    ) -> Result<Claim, Error> {
        match tx.insert_transfer_request(request).await {
            Ok(()) => Ok(Claim::Won),
            Err(database::Error::DuplicateIdempotencyKey { .. }) => Ok(Claim::Lost),
            Err(err) => Err(err.into()),
        }
    }

    /// Read the winner's request after losing a [`claim`](Self::claim)
    ///
    /// Must run in a fresh transaction, since the losing one may be unusable.
    pub async fn resolve_lost_claim(
        &self,
        tx: &mut dyn LedgerTx,
        from_user_id: Uuid,
        idempotency_key: &str,
        fingerprint: &PayloadFingerprint,
    ) -> Result<TransferRequest, Error> {
        match self
            .register(tx, from_user_id, idempotency_key, fingerprint)
            .await?
        {
            Registration::Replay(existing) => Ok(existing),
            // The winner is not visible yet, retrying the whole submission will find it
            Registration::New => Err(Error::Database(database::Error::TransactionAborted(
                format!("idempotency key {idempotency_key:?} claimed by an uncommitted request"),
            ))),
        }
    }
}
