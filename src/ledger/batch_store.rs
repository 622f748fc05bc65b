use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{ConsistencyGuard, Error};
use crate::{
    domain::{
        checked_total, fifo_order, plan_consumption, BatchOrigin, ConsumptionEntry,
        ConsumptionOperation, ConsumptionRecord, PointBatch, Points,
    },
    fields,
    ports::{
        clock::Clock,
        database::LedgerTx,
        log::{Level, LogSink},
    },
};

/// Owner of every [`PointBatch`] mutation
///
/// Methods taking a [`LedgerTx`] run inside the caller's transaction. The other methods open and
/// commit their own.
#[derive(Clone)]
pub struct BatchStore {
    guard: ConsistencyGuard,
    clock: Arc<dyn Clock>,
    log: Arc<dyn LogSink>,
}

/// Points spent by a user
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redemption {
    pub redemption_id: Uuid,
    pub user_id: Uuid,
    pub records: Vec<ConsumptionRecord>,
    /// Balance after the redemption
    pub balance: Points,
}

impl BatchStore {
    pub fn new(guard: ConsistencyGuard, clock: Arc<dyn Clock>, log: Arc<dyn LogSink>) -> Self {
        Self { guard, clock, log }
    }

    pub async fn create_batch(
        &self,
        tx: &mut dyn LedgerTx,
        user_id: Uuid,
        amount: Points,
        expires_at: Option<DateTime<Utc>>,
        origin: BatchOrigin,
    ) -> Result<PointBatch, Error> {
        if amount == 0 {
            return Err(Error::InvalidAmount);
        }
        let balance = self.balance(tx, user_id).await?;
        if balance.checked_add(amount).is_none() {
            return Err(Error::BalanceOverflow(user_id));
        }

        let batch = PointBatch::new(user_id, amount, self.clock.now(), expires_at, origin);
        tx.insert_batch(&batch).await?;
        self.log.log(
            Level::Debug,
            "batch created",
            fields! {
                "batch_id" => batch.batch_id,
                "user_id" => user_id,
                "amount" => amount,
                "expires_at" => expires_at,
            },
        );

        Ok(batch)
    }

    /// Debit `amount` points from the user's batches, soonest expiring first
    ///
    /// The user's batches are read for update, so concurrent consumptions for the same user
    /// serialize and each one sees the amounts left by the previous one. Nothing is written if
    /// the eligible batches do not cover `amount`.
    pub async fn consume_fifo(
        &self,
        tx: &mut dyn LedgerTx,
        user_id: Uuid,
        amount: Points,
    ) -> Result<Vec<ConsumptionRecord>, Error> {
        if amount == 0 {
            return Err(Error::InvalidAmount);
        }

        let batches = tx.select_batches_for_user(user_id, true).await?;
        let records = plan_consumption(&batches, amount, self.clock.now()).map_err(|shortfall| {
            Error::InsufficientBalance {
                user_id,
                available: shortfall.available,
                requested: shortfall.requested,
            }
        })?;

        let mut batches: HashMap<Uuid, PointBatch> = batches
            .into_iter()
            .map(|batch| (batch.batch_id, batch))
            .collect();
        for record in &records {
            let batch = batches
                .get_mut(&record.batch_id)
                .ok_or(Error::BatchNotFound(record.batch_id))?;
            batch.debit(record.amount_taken);
            tx.update_batch_remaining(batch.batch_id, batch.remaining_amount, batch.status)
                .await?;
        }

        self.log.log(
            Level::Debug,
            "points consumed",
            fields! {
                "user_id" => user_id,
                "amount" => amount,
                "batches" => records.len(),
            },
        );

        Ok(records)
    }

    pub async fn find_expired_batches(
        &self,
        tx: &mut dyn LedgerTx,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PointBatch>, Error> {
        Ok(tx.select_expired_batches(before, limit).await?)
    }

    /// Forfeit whatever is left in an active batch
    pub async fn mark_expired(
        &self,
        tx: &mut dyn LedgerTx,
        batch_id: Uuid,
    ) -> Result<PointBatch, Error> {
        let mut batch = tx
            .select_batch(batch_id)
            .await?
            .ok_or(Error::BatchNotFound(batch_id))?;
        if !batch.is_active() {
            return Err(Error::AlreadyTerminal {
                batch_id,
                status: batch.status,
            });
        }

        batch.forfeit();
        tx.mark_batch_expired(batch_id, batch.forfeited_amount)
            .await?;
        self.log.log(
            Level::Info,
            "batch expired",
            fields! {
                "batch_id" => batch_id,
                "user_id" => batch.user_id,
                "forfeited" => batch.forfeited_amount,
            },
        );

        Ok(batch)
    }

    /// Active batches with an expiration date, soonest first
    pub async fn find_upcoming_expirations(
        &self,
        tx: &mut dyn LedgerTx,
        user_id: Uuid,
    ) -> Result<Vec<PointBatch>, Error> {
        let mut batches: Vec<PointBatch> = tx
            .select_batches_for_user(user_id, false)
            .await?
            .into_iter()
            .filter(|batch| batch.is_active() && batch.expires_at.is_some())
            .collect();
        batches.sort_by(fifo_order);
        Ok(batches)
    }

    /// Derived balance: sum of the remaining amounts of the user's active batches
    pub async fn balance(&self, tx: &mut dyn LedgerTx, user_id: Uuid) -> Result<Points, Error> {
        let batches = tx.select_batches_for_user(user_id, false).await?;
        checked_total(
            batches
                .iter()
                .filter(|batch| batch.is_active())
                .map(|batch| batch.remaining_amount),
        )
        .ok_or(Error::BalanceOverflow(user_id))
    }

    /// Grant new points to a user
    pub async fn grant(
        &self,
        user_id: Uuid,
        amount: Points,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<PointBatch, Error> {
        if expires_at.is_some_and(|expires_at| expires_at <= self.clock.now()) {
            return Err(Error::InvalidExpiry);
        }

        self.guard
            .retrying("grant_points", move || async move {
                let mut tx = self.guard.begin().await?;
                let batch = self
                    .create_batch(tx.as_mut(), user_id, amount, expires_at, BatchOrigin::Grant)
                    .await?;
                tx.commit().await?;
                Ok(batch)
            })
            .await
    }

    /// Spend points, taking them from the soonest expiring batches first
    pub async fn spend(
        &self,
        user_id: Uuid,
        amount: Points,
        reason: &str,
    ) -> Result<Redemption, Error> {
        self.guard
            .retrying("spend_points", move || self.try_spend(user_id, amount, reason))
            .await
    }

    async fn try_spend(
        &self,
        user_id: Uuid,
        amount: Points,
        reason: &str,
    ) -> Result<Redemption, Error> {
        let redemption_id = Uuid::new_v4();
        let mut tx = self.guard.begin().await?;

        let records = self.consume_fifo(tx.as_mut(), user_id, amount).await?;
        let recorded_at = self.clock.now();
        let entries: Vec<ConsumptionEntry> = records
            .iter()
            .map(|record| ConsumptionEntry {
                operation: ConsumptionOperation::Redemption {
                    redemption_id,
                    reason: reason.to_string(),
                },
                user_id,
                record: *record,
                recorded_at,
            })
            .collect();
        tx.insert_consumption(&entries).await?;
        let balance = self.balance(tx.as_mut(), user_id).await?;
        tx.commit().await?;

        self.log.log(
            Level::Info,
            "points redeemed",
            fields! {
                "redemption_id" => redemption_id,
                "user_id" => user_id,
                "amount" => amount,
                "reason" => reason,
            },
        );

        Ok(Redemption {
            redemption_id,
            user_id,
            records,
            balance,
        })
    }

    pub async fn current_balance(&self, user_id: Uuid) -> Result<Points, Error> {
        let mut tx = self.guard.begin().await?;
        self.balance(tx.as_mut(), user_id).await
    }

    pub async fn upcoming_expirations(&self, user_id: Uuid) -> Result<Vec<PointBatch>, Error> {
        let mut tx = self.guard.begin().await?;
        self.find_upcoming_expirations(tx.as_mut(), user_id).await
    }
}
