use uuid::Uuid;

use crate::domain::{BatchStatus, Points, TransferStatus};
use crate::ports::database;

/// Error returned by every ledger operation
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("amount must be strictly positive")]
    InvalidAmount,
    #[error("expiration date must be after the issue date")]
    InvalidExpiry,
    #[error("transfer requests need a strictly positive time to live")]
    InvalidTtl,
    #[error("idempotency key must not be empty")]
    InvalidIdempotencyKey,
    #[error("page limit must be strictly positive")]
    InvalidPageLimit,
    #[error("user {0} cannot transfer points to themselves")]
    SelfTransfer(Uuid),
    /// The holder's balance would exceed the largest representable amount
    #[error("balance of {0} would exceed the largest representable amount")]
    BalanceOverflow(Uuid),

    /// The actor is not a party allowed to take this decision
    #[error("user {actor} is not allowed to {action} transfer request {request_id}")]
    NotAuthorized {
        request_id: Uuid,
        actor: Uuid,
        action: &'static str,
    },

    /// The idempotency key was already used by the sender for a different payload
    ///
    /// The stored request is left untouched.
    #[error("idempotency key {idempotency_key:?} already used for request {existing_request_id} with a different payload")]
    ConflictingIdempotencyKey {
        idempotency_key: String,
        existing_request_id: Uuid,
    },
    /// The request already left the pending state
    #[error("transfer request {request_id} was already decided: {status}")]
    AlreadyDecided {
        request_id: Uuid,
        status: TransferStatus,
    },
    /// The request is still pending but its expiration date has passed
    #[error("transfer request {0} has expired")]
    RequestExpired(Uuid),
    #[error("batch {batch_id} is already {status}")]
    AlreadyTerminal {
        batch_id: Uuid,
        status: BatchStatus,
    },

    #[error("insufficient balance for {user_id}: available {available}, requested {requested}")]
    InsufficientBalance {
        user_id: Uuid,
        available: Points,
        requested: Points,
    },

    #[error("transfer request {0} does not exist")]
    RequestNotFound(Uuid),
    #[error("batch {0} does not exist")]
    BatchNotFound(Uuid),

    #[error("database port error: {0:?}")]
    Database(#[from] database::Error),
}

/// How a caller should react to an [`Error`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, never retried
    Validation,
    /// The actor is not allowed to perform the operation
    Forbidden,
    /// Re-read the current state before deciding what to do next
    Conflict,
    /// Terminal for this attempt
    InsufficientBalance,
    NotFound,
    /// Storage failure, transient ones can be retried as a whole
    Storage,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidAmount
            | Error::InvalidExpiry
            | Error::InvalidTtl
            | Error::InvalidIdempotencyKey
            | Error::InvalidPageLimit
            | Error::SelfTransfer(_)
            | Error::BalanceOverflow(_) => ErrorKind::Validation,
            Error::NotAuthorized { .. } => ErrorKind::Forbidden,
            Error::ConflictingIdempotencyKey { .. }
            | Error::AlreadyDecided { .. }
            | Error::RequestExpired(_)
            | Error::AlreadyTerminal { .. } => ErrorKind::Conflict,
            Error::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Error::RequestNotFound(_) | Error::BatchNotFound(_) => ErrorKind::NotFound,
            Error::Database(database::Error::BatchNotFound(_))
            | Error::Database(database::Error::RequestNotFound(_)) => ErrorKind::NotFound,
            Error::Database(database::Error::DuplicateIdempotencyKey { .. }) => {
                ErrorKind::Conflict
            }
            Error::Database(_) => ErrorKind::Storage,
        }
    }

    /// Whether retrying the whole logical operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(err) => err.is_transient(),
            _ => false,
        }
    }
}
