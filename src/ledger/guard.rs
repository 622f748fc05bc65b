use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use uuid::Uuid;

use super::Error;
use crate::{
    domain::{BatchOrigin, BatchStatus, ConsumptionOperation},
    fields,
    ports::{
        database::{LedgerStore, LedgerTx},
        log::{Level, LogSink},
    },
};

/// Bounded retry of transient storage failures
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled for each following attempt
    pub base_backoff: Duration,
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(20),
        }
    }
}

/// Atomic units of work over the ledger storage
///
/// Every balance-affecting or status-affecting operation opens exactly one transaction through
/// [`ConsistencyGuard::begin`] and commits it at the very end, so a failure at any step leaves no
/// partial effect behind.
#[derive(Clone)]
pub struct ConsistencyGuard {
    store: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
    log: Arc<dyn LogSink>,
}

impl ConsistencyGuard {
    pub fn new(store: Arc<dyn LedgerStore>, retry: RetryPolicy, log: Arc<dyn LogSink>) -> Self {
        Self { store, retry, log }
    }

    pub async fn begin(&self) -> Result<Box<dyn LedgerTx>, Error> {
        Ok(self.store.begin().await?)
    }

    /// Run a whole logical operation, retrying it on transient storage failures
    ///
    /// `op` must open and commit its own transaction on every call.
    pub async fn retrying<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let backoff = self.retry.backoff(attempt);
                    self.log.log(
                        Level::Warn,
                        "transient storage failure, retrying",
                        fields! {
                            "operation" => operation,
                            "attempt" => attempt as u64,
                            "backoff_ms" => backoff.as_millis() as u64,
                            "error" => err.to_string(),
                        },
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                res => return res,
            }
        }
    }

    /// Recompute ledger totals from the batches and the consumption trail
    pub async fn audit(&self) -> Result<LedgerAudit, Error> {
        let mut tx = self.begin().await?;
        let batches = tx.select_all_batches().await?;
        let entries = tx.select_consumptions().await?;

        let mut audit = LedgerAudit::default();
        let mut credited: HashMap<Uuid, Total> = HashMap::new();
        let mut debited: HashMap<Uuid, Total> = HashMap::new();

        for batch in &batches {
            let (original, remaining, forfeited) = (
                Total::from(batch.original_amount),
                Total::from(batch.remaining_amount),
                Total::from(batch.forfeited_amount),
            );
            if remaining + forfeited > original {
                audit.violations.push(format!(
                    "batch {} holds more than it was issued with",
                    batch.batch_id
                ));
                continue;
            }
            let consistent_status = match batch.status {
                BatchStatus::Active => batch.forfeited_amount == 0,
                BatchStatus::Consumed => batch.remaining_amount == 0 && batch.forfeited_amount == 0,
                BatchStatus::Expired => batch.remaining_amount == 0,
            };
            if !consistent_status {
                audit.violations.push(format!(
                    "batch {} amounts do not match status {}",
                    batch.batch_id, batch.status
                ));
            }

            match batch.origin {
                BatchOrigin::Grant => audit.granted += original,
                BatchOrigin::Transfer { request_id } => {
                    audit.transferred += original;
                    *credited.entry(request_id).or_default() += original;
                }
            }
            audit.active_remaining += remaining;
            audit.forfeited += forfeited;
            audit.consumed += original - remaining - forfeited;
        }

        for entry in &entries {
            match &entry.operation {
                ConsumptionOperation::Transfer { request_id } => {
                    *debited.entry(*request_id).or_default() +=
                        Total::from(entry.record.amount_taken);
                }
                ConsumptionOperation::Redemption { .. } => {
                    audit.redeemed += Total::from(entry.record.amount_taken);
                }
            }
        }

        let transfer_debits: Total = debited.values().sum();
        if audit.consumed != transfer_debits + audit.redeemed {
            audit.violations.push(format!(
                "consumed {} points but the trail records {}",
                audit.consumed,
                transfer_debits + audit.redeemed
            ));
        }
        for (request_id, credit) in &credited {
            let debit = debited.get(request_id).copied().unwrap_or_default();
            if *credit != debit {
                audit.violations.push(format!(
                    "transfer {request_id} credited {credit} points but debited {debit}"
                ));
            }
        }
        for request_id in debited.keys().filter(|id| !credited.contains_key(id)) {
            audit
                .violations
                .push(format!("transfer {request_id} debited points without credit"));
        }
        if audit.granted != audit.active_remaining + audit.forfeited + audit.redeemed {
            audit.violations.push(format!(
                "granted {} points but {} are active, {} forfeited and {} redeemed",
                audit.granted, audit.active_remaining, audit.forfeited, audit.redeemed
            ));
        }

        let level = if audit.is_consistent() {
            Level::Info
        } else {
            Level::Error
        };
        self.log.log(
            level,
            "ledger audited",
            fields! {
                "granted" => audit.granted,
                "active_remaining" => audit.active_remaining,
                "forfeited" => audit.forfeited,
                "redeemed" => audit.redeemed,
                "violations" => audit.violations.len(),
            },
        );

        Ok(audit)
    }
}

/// Ledger-wide sum of point amounts
///
/// Every balance fits in [`Points`](crate::domain::Points), but the sum over all users may not.
pub type Total = u128;

/// Totals recomputed over the whole ledger
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerAudit {
    /// Points that entered the ledger through grants
    pub granted: Total,
    /// Points credited to receivers of approved transfers
    pub transferred: Total,
    pub active_remaining: Total,
    pub forfeited: Total,
    /// Points taken out of batches, whatever the reason
    pub consumed: Total,
    /// Points that left the ledger through redemptions
    pub redeemed: Total,
    pub violations: Vec<String>,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapters::database::memory::MemoryDatabase,
        domain::{ConsumptionEntry, ConsumptionRecord, PointBatch, Points},
        ports::{database, log::MockLogSink},
    };
    use chrono::Utc;
    use speculoos::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quiet_log() -> Arc<MockLogSink> {
        let mut log = MockLogSink::new();
        log.expect_log().returning(|_, _, _| ());
        Arc::new(log)
    }

    fn guard(database: &MemoryDatabase, max_attempts: u32) -> ConsistencyGuard {
        ConsistencyGuard::new(
            Arc::new(database.clone()),
            RetryPolicy {
                max_attempts,
                base_backoff: Duration::from_millis(1),
            },
            quiet_log(),
        )
    }

    fn aborted() -> Error {
        Error::Database(database::Error::TransactionAborted("deadlock".into()))
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_backoff: Duration::from_millis(10),
        };

        assert_that!(policy.backoff(1)).is_equal_to(Duration::from_millis(10));
        assert_that!(policy.backoff(3)).is_equal_to(Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_retrying_recovers_from_transient_failures() {
        let guard = guard(&MemoryDatabase::default(), 3);
        let calls = &AtomicU32::new(0);

        let res = guard
            .retrying("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(aborted())
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_that!(res).is_ok().is_equal_to(42);
        assert_that!(calls.load(Ordering::SeqCst)).is_equal_to(3);
    }

    #[tokio::test]
    async fn test_retrying_gives_up_after_max_attempts() {
        let guard = guard(&MemoryDatabase::default(), 2);
        let calls = &AtomicU32::new(0);

        let res: Result<(), Error> = guard
            .retrying("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(aborted())
            })
            .await;

        assert_that!(res).is_err().matches(|err| err.is_transient());
        assert_that!(calls.load(Ordering::SeqCst)).is_equal_to(2);
    }

    #[tokio::test]
    async fn test_retrying_does_not_retry_domain_errors() {
        let guard = guard(&MemoryDatabase::default(), 5);
        let calls = &AtomicU32::new(0);

        let res: Result<(), Error> = guard
            .retrying("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::InvalidAmount)
            })
            .await;

        assert_that!(res)
            .is_err()
            .matches(|err| matches!(err, Error::InvalidAmount));
        assert_that!(calls.load(Ordering::SeqCst)).is_equal_to(1);
    }

    #[tokio::test]
    async fn test_audit_flags_unbacked_credit() -> Result<(), Error> {
        // GIVEN a transfer credit without any matching debit in the trail
        let database = MemoryDatabase::default();
        let request_id = Uuid::new_v4();
        let mut tx = database.begin().await?;
        tx.insert_batch(&PointBatch::new(
            Uuid::new_v4(),
            10,
            Utc::now(),
            None,
            BatchOrigin::Transfer { request_id },
        ))
        .await?;
        tx.commit().await?;

        // WHEN auditing the ledger
        let audit = guard(&database, 1).audit().await?;

        // THEN the audit reports it
        assert_that!(audit.is_consistent()).is_false();
        assert_that!(audit.transferred).is_equal_to(10);

        Ok(())
    }

    #[tokio::test]
    async fn test_audit_of_consistent_ledger() -> Result<(), Error> {
        // GIVEN a 10 point grant with 4 points redeemed
        let database = MemoryDatabase::default();
        let mut batch = PointBatch::new(Uuid::new_v4(), 10, Utc::now(), None, BatchOrigin::Grant);
        batch.debit(4);
        let mut tx = database.begin().await?;
        tx.insert_batch(&batch).await?;
        tx.insert_consumption(&[ConsumptionEntry {
            operation: ConsumptionOperation::Redemption {
                redemption_id: Uuid::new_v4(),
                reason: "gift card".to_string(),
            },
            user_id: batch.user_id,
            record: ConsumptionRecord {
                batch_id: batch.batch_id,
                amount_taken: 4,
                source_expires_at: None,
            },
            recorded_at: Utc::now(),
        }])
        .await?;
        tx.commit().await?;

        // WHEN auditing the ledger
        let audit = guard(&database, 1).audit().await?;

        // THEN every point is accounted for
        assert_that!(audit).is_equal_to(LedgerAudit {
            granted: 10,
            transferred: 0,
            active_remaining: 6,
            forfeited: 0,
            consumed: 4,
            redeemed: 4,
            violations: Vec::new(),
        });

        Ok(())
    }

    #[tokio::test]
    async fn test_audit_totals_beyond_a_single_balance() -> Result<(), Error> {
        // GIVEN two users each holding the largest representable balance
        let database = MemoryDatabase::default();
        let mut tx = database.begin().await?;
        for _ in 0..2 {
            tx.insert_batch(&PointBatch::new(
                Uuid::new_v4(),
                Points::MAX,
                Utc::now(),
                None,
                BatchOrigin::Grant,
            ))
            .await?;
        }
        tx.commit().await?;

        // WHEN auditing the ledger
        let audit = guard(&database, 1).audit().await?;

        // THEN the totals hold both balances
        assert_that!(audit.is_consistent()).is_true();
        assert_that!(audit.granted).is_equal_to(2 * Total::from(Points::MAX));
        assert_that!(audit.active_remaining).is_equal_to(audit.granted);

        Ok(())
    }
}
