use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{sync::watch, time::MissedTickBehavior};

use super::{BatchStore, ConsistencyGuard, Error, Total, TransferWorkflow};
use crate::{
    fields,
    ports::{
        clock::Clock,
        log::{Level, LogSink},
    },
};

/// Periodic expiry of point batches and stale transfer requests
///
/// Work is split in pages, each committed in its own transaction, so locks are only held for one
/// page at a time. Running it again after a partial run only touches rows that are still active
/// or pending.
#[derive(Clone)]
pub struct ExpirationSweeper {
    guard: ConsistencyGuard,
    batches: BatchStore,
    transfers: TransferWorkflow,
    clock: Arc<dyn Clock>,
    log: Arc<dyn LogSink>,
}

/// What a sweep did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub batches_expired: usize,
    /// Summed over every user, so it may exceed a single balance
    pub points_forfeited: Total,
    pub requests_expired: usize,
}

#[derive(Default)]
struct BatchPage {
    scanned: usize,
    expired: usize,
    forfeited: Total,
}

impl ExpirationSweeper {
    pub fn new(
        guard: ConsistencyGuard,
        batches: BatchStore,
        transfers: TransferWorkflow,
        clock: Arc<dyn Clock>,
        log: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            guard,
            batches,
            transfers,
            clock,
            log,
        }
    }

    pub async fn run(&self, now: DateTime<Utc>, page_limit: usize) -> Result<SweepReport, Error> {
        if page_limit == 0 {
            return Err(Error::InvalidPageLimit);
        }

        let mut report = SweepReport::default();
        loop {
            let page = self
                .guard
                .retrying("expire_batches", move || {
                    self.expire_batch_page(now, page_limit)
                })
                .await?;
            report.batches_expired += page.expired;
            report.points_forfeited += page.forfeited;
            if page.scanned < page_limit {
                break;
            }
        }
        report.requests_expired = self.transfers.expire_stale(now, page_limit).await?;

        self.log.log(
            Level::Info,
            "expiration sweep done",
            fields! {
                "now" => now,
                "batches_expired" => report.batches_expired,
                "points_forfeited" => report.points_forfeited,
                "requests_expired" => report.requests_expired,
            },
        );

        Ok(report)
    }

    async fn expire_batch_page(
        &self,
        now: DateTime<Utc>,
        page_limit: usize,
    ) -> Result<BatchPage, Error> {
        let mut tx = self.guard.begin().await?;
        let expired = self
            .batches
            .find_expired_batches(tx.as_mut(), now, page_limit)
            .await?;

        let mut page = BatchPage {
            scanned: expired.len(),
            ..Default::default()
        };
        for batch in expired {
            match self.batches.mark_expired(tx.as_mut(), batch.batch_id).await {
                Ok(batch) => {
                    page.expired += 1;
                    page.forfeited += Total::from(batch.forfeited_amount);
                }
                // Consumed by a concurrent spend since the page was read
                Err(Error::AlreadyTerminal { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        tx.commit().await?;

        Ok(page)
    }

    /// Sweep every `interval` until `shutdown` flips to `true` or its sender is dropped
    ///
    /// A failing sweep is logged and the next tick tries again.
    pub async fn run_every(
        &self,
        interval: Duration,
        page_limit: usize,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = self.clock.now();
                    if let Err(err) = self.run(now, page_limit).await {
                        self.log.log(
                            Level::Error,
                            "expiration sweep failed",
                            fields! {
                                "now" => now,
                                "error" => err.to_string(),
                                "transient" => err.is_transient(),
                            },
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}
