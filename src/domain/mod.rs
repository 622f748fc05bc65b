use chrono::{DateTime, Duration, Utc};
use std::{cmp::Ordering, fmt};
use uuid::Uuid;

/// Amount of points
pub type Points = u64;

/// Lifecycle of a [`PointBatch`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BatchStatus {
    /// The batch still backs part of the user's balance
    Active,
    /// Spending brought the remaining amount down to zero
    Consumed,
    /// The sweeper forfeited whatever was left after the expiration date
    Expired,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::Active)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchStatus::Active => "active",
            BatchStatus::Consumed => "consumed",
            BatchStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Why a batch exists
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchOrigin {
    /// Points granted to the user from outside the ledger
    Grant,
    /// Points credited to the receiver of an approved transfer request
    Transfer { request_id: Uuid },
}

/// A discrete grant of points with its own remaining amount and expiration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointBatch {
    pub batch_id: Uuid,
    pub user_id: Uuid,
    /// Amount of points at creation time, always strictly positive
    pub original_amount: Points,
    /// Amount of points still available to spend
    ///
    /// This never increases after the batch is created.
    pub remaining_amount: Points,
    /// Amount of points lost when the batch expired unused
    pub forfeited_amount: Points,
    pub issued_at: DateTime<Utc>,
    /// Points from this batch cannot be spent after this date
    ///
    /// `None` means the batch never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub status: BatchStatus,
    pub origin: BatchOrigin,
}

impl PointBatch {
    pub fn new(
        user_id: Uuid,
        amount: Points,
        issued_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        origin: BatchOrigin,
    ) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            user_id,
            original_amount: amount,
            remaining_amount: amount,
            forfeited_amount: 0,
            issued_at,
            expires_at,
            status: BatchStatus::Active,
            origin,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BatchStatus::Active
    }

    /// Whether the expiration date is strictly before `now`
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }

    /// Whether FIFO consumption may take points from this batch at `now`
    ///
    /// Batches past their expiration date are excluded even while they wait for the sweeper.
    pub fn is_consumable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.remaining_amount > 0 && !self.is_past_expiry(now)
    }

    /// Points that left this batch through spending or transfers
    pub fn consumed_amount(&self) -> Points {
        self.original_amount - self.remaining_amount - self.forfeited_amount
    }

    /// Take `amount` points out of the batch
    ///
    /// Callers must check that `amount` does not exceed the remaining amount.
    pub(crate) fn debit(&mut self, amount: Points) {
        debug_assert!(amount <= self.remaining_amount);
        self.remaining_amount -= amount;
        if self.remaining_amount == 0 {
            self.status = BatchStatus::Consumed;
        }
    }

    pub(crate) fn forfeit(&mut self) {
        self.forfeited_amount = self.remaining_amount;
        self.remaining_amount = 0;
        self.status = BatchStatus::Expired;
    }
}

/// FIFO ordering between batches
///
/// Soonest expiration first (batches without expiration last), then oldest issue date, then
/// batch ID so the order is total.
pub fn fifo_order(a: &PointBatch, b: &PointBatch) -> Ordering {
    let by_expiry = match (a.expires_at, b.expires_at) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_expiry
        .then_with(|| a.issued_at.cmp(&b.issued_at))
        .then_with(|| a.batch_id.cmp(&b.batch_id))
}

/// Points taken from one batch by a single FIFO consumption
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsumptionRecord {
    pub batch_id: Uuid,
    pub amount_taken: Points,
    /// Expiration date of the batch the points were taken from
    pub source_expires_at: Option<DateTime<Utc>>,
}

/// Eligible points were not enough to cover a consumption
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shortfall {
    pub available: Points,
    pub requested: Points,
}

/// Sum of `amounts`, or `None` if it does not fit in [`Points`]
pub fn checked_total(amounts: impl IntoIterator<Item = Points>) -> Option<Points> {
    amounts
        .into_iter()
        .try_fold(0, |total: Points, amount| total.checked_add(amount))
}

/// Decide which batches cover `amount`, in FIFO order
///
/// This only plans the consumption: nothing is mutated. If the eligible batches do not hold
/// enough points, this returns a [`Shortfall`] instead of a partial plan.
pub fn plan_consumption(
    batches: &[PointBatch],
    amount: Points,
    now: DateTime<Utc>,
) -> Result<Vec<ConsumptionRecord>, Shortfall> {
    let mut eligible: Vec<&PointBatch> = batches
        .iter()
        .filter(|batch| batch.is_consumable_at(now))
        .collect();

    // A saturated total still covers any requested amount
    let available = eligible
        .iter()
        .fold(0, |total: Points, batch| total.saturating_add(batch.remaining_amount));
    if available < amount {
        return Err(Shortfall {
            available,
            requested: amount,
        });
    }

    eligible.sort_by(|a, b| fifo_order(a, b));

    let mut left = amount;
    let mut records = Vec::new();
    for batch in eligible {
        if left == 0 {
            break;
        }
        let taken = left.min(batch.remaining_amount);
        records.push(ConsumptionRecord {
            batch_id: batch.batch_id,
            amount_taken: taken,
            source_expires_at: batch.expires_at,
        });
        left -= taken;
    }

    Ok(records)
}

/// Expiration inherited by points minted from a consumption
///
/// This is the earliest expiration among the source batches. Sources that never expire do not
/// constrain it.
pub fn inherited_expiry(records: &[ConsumptionRecord]) -> Option<DateTime<Utc>> {
    records
        .iter()
        .filter_map(|record| record.source_expires_at)
        .min()
}

/// Lifecycle of a [`TransferRequest`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Expired,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Approved => "approved",
            TransferStatus::Rejected => "rejected",
            TransferStatus::Cancelled => "cancelled",
            TransferStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Canonical form of the payload of a transfer request
///
/// Two submissions with the same idempotency key are the same request only if their
/// fingerprints are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PayloadFingerprint(String);

impl PayloadFingerprint {
    pub fn new(to_user_id: Uuid, amount: Points) -> Self {
        Self(format!("to={to_user_id};amount={amount}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PayloadFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A proposed peer-to-peer point movement awaiting the recipient's decision
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    pub request_id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub amount: Points,
    /// Client-supplied token, unique per sender
    pub idempotency_key: String,
    pub fingerprint: PayloadFingerprint,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set when the request leaves [`TransferStatus::Pending`]
    pub decided_at: Option<DateTime<Utc>>,
}

impl TransferRequest {
    /// A new pending request expiring `ttl` after `created_at`
    ///
    /// Returns `None` when the expiration date falls outside the range of [`DateTime`].
    pub fn new(
        from_user_id: Uuid,
        to_user_id: Uuid,
        amount: Points,
        idempotency_key: String,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Option<Self> {
        let expires_at = created_at.checked_add_signed(ttl)?;
        Some(Self {
            request_id: Uuid::new_v4(),
            from_user_id,
            to_user_id,
            amount,
            idempotency_key,
            fingerprint: PayloadFingerprint::new(to_user_id, amount),
            status: TransferStatus::Pending,
            created_at,
            expires_at,
            decided_at: None,
        })
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// The operation that triggered a consumption
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsumptionOperation {
    /// Approval of a transfer request
    Transfer { request_id: Uuid },
    /// Points spent by the user
    ///
    /// `reason` is free text supplied by the caller, for example the name of the reward.
    Redemption { redemption_id: Uuid, reason: String },
}

/// Audit trail entry for one [`ConsumptionRecord`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumptionEntry {
    pub operation: ConsumptionOperation,
    pub user_id: Uuid,
    pub record: ConsumptionRecord,
    pub recorded_at: DateTime<Utc>,
}
