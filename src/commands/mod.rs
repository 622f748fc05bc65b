use std::{future::Future, pin::Pin};

use crate::ledger::Ledger;

pub mod approve_transfer;
pub mod audit_ledger;
pub mod cancel_transfer;
pub mod create_transfer;
pub mod get_balance;
pub mod get_transfer;
pub mod get_upcoming_expirations;
pub mod grant_points;
pub mod reject_transfer;
pub mod run_expiration_sweep;
pub mod spend_points;

pub use crate::ledger::{Error, ErrorKind};

/// Entry point for every ledger operation
///
/// Each operation is a [`tower::Service`] over its own request type. Cloning is cheap: all
/// clones share the same ports.
#[derive(Clone)]
pub struct DomainLogic {
    ledger: Ledger,
}

impl DomainLogic {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }
}

type CommandFuture<T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send>>;


#[cfg(test)]
mod tests {
    use super::{
        approve_transfer::ApproveTransferRequest, audit_ledger::AuditLedgerRequest,
        create_transfer::CreateTransferRequest, get_balance::GetBalanceRequest,
        grant_points::GrantPointsRequest, run_expiration_sweep::RunExpirationSweepRequest,
        spend_points::SpendPointsRequest, testing::*,
    };
    use crate::{adapters::database::memory::MemoryDatabase, ledger::Total};
    use chrono::Duration;
    use speculoos::prelude::*;
    use tower::{BoxError, ServiceExt};
    use uuid::Uuid;

    /// Points only enter through grants and only leave through redemptions and forfeitures
    #[tokio::test]
    async fn test_conservation() -> Result<(), BoxError> {
        // GIVEN three users and a sequence of grants, transfers, spends and expirations
        let database = MemoryDatabase::default();
        let now = t0();
        let domain = logic(&database, now);
        let (alice, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        for (user_id, amount, expires_in) in [
            (alice, 100, Some(Duration::days(2))),
            (alice, 50, None),
            (bob, 80, Some(Duration::days(30))),
            (carol, 10, Some(Duration::hours(1))),
        ] {
            let req = GrantPointsRequest {
                user_id,
                amount,
                expires_at: expires_in.map(|expires_in| now + expires_in),
            };
            domain.clone().oneshot(req).await?;
        }

        let mut approved = Vec::new();
        for (from, to, amount, key) in [
            (alice, bob, 120, "a1"),
            (bob, carol, 60, "b1"),
            (carol, alice, 65, "c1"),
        ] {
            let req = CreateTransferRequest {
                from_user_id: from,
                to_user_id: to,
                amount,
                idempotency_key: key.to_string(),
                ttl: Duration::hours(6),
            };
            let request = domain.clone().oneshot(req).await?;
            let req = ApproveTransferRequest {
                request_id: request.request_id,
                actor: to,
            };
            approved.push(domain.clone().oneshot(req).await?);
        }
        let req = SpendPointsRequest {
            user_id: bob,
            amount: 33,
            reason: "cinema".to_string(),
        };
        domain.clone().oneshot(req).await?;

        // WHEN sweeping three days later
        let later = logic(&database, now + Duration::days(3));
        let req = RunExpirationSweepRequest {
            now: now + Duration::days(3),
            page_limit: 2,
        };
        let report = later.clone().oneshot(req).await?;

        // THEN every granted point is still active, forfeited or redeemed
        let audit = later.clone().oneshot(AuditLedgerRequest).await?;
        assert_that!(audit.violations).is_empty();
        assert_that!(audit.granted).is_equal_to(240);
        assert_that!(audit.redeemed).is_equal_to(33);
        assert_that!(audit.forfeited).is_equal_to(report.points_forfeited);
        assert_that!(audit.transferred).is_equal_to(120 + 60 + 65);
        assert_that!(audit.active_remaining + audit.forfeited + audit.redeemed)
            .is_equal_to(audit.granted);

        // Transfers are zero-sum
        for approval in &approved {
            let debited: u64 = approval
                .debits
                .iter()
                .map(|record| record.amount_taken)
                .sum();
            assert_that!(debited).is_equal_to(approval.credit.original_amount);
        }

        let mut balances: Total = 0;
        for user_id in [alice, bob, carol] {
            let req = GetBalanceRequest { user_id };
            balances += Total::from(later.clone().oneshot(req).await?.balance);
        }
        assert_that!(balances).is_equal_to(audit.active_remaining);

        Ok(())
    }
}
