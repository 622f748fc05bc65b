use std::task::{Context, Poll};

use tower::Service;
use uuid::Uuid;

use super::{CommandFuture, DomainLogic, Error};
use crate::ledger::Approval;

/// Approve a pending transfer request
///
/// Only the recipient of the request may approve it.
pub struct ApproveTransferRequest {
    pub request_id: Uuid,
    pub actor: Uuid,
}

impl Service<ApproveTransferRequest> for DomainLogic {
    type Response = Approval;
    type Error = Error;
    type Future = CommandFuture<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ApproveTransferRequest) -> Self::Future {
        let ledger = self.ledger.clone();
        Box::pin(async move { ledger.transfers.approve(req.request_id, req.actor).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapters::database::memory::MemoryDatabase,
        commands::{
            create_transfer::CreateTransferRequest, get_balance::GetBalanceRequest,
            grant_points::GrantPointsRequest, testing::*, ErrorKind,
        },
        domain::{BatchOrigin, TransferStatus},
    };
    use chrono::Duration;
    use speculoos::prelude::*;
    use tower::{BoxError, ServiceExt};

    #[tokio::test]
    async fn test_approve_moves_points() -> Result<(), BoxError> {
        // GIVEN a pending request of 30 points from a sender with 100
        let now = t0();
        let domain = logic(&MemoryDatabase::default(), now);
        let (from, to) = (Uuid::new_v4(), Uuid::new_v4());
        let req = GrantPointsRequest {
            user_id: from,
            amount: 100,
            expires_at: Some(now + Duration::days(7)),
        };
        domain.clone().oneshot(req).await?;
        let req = CreateTransferRequest {
            from_user_id: from,
            to_user_id: to,
            amount: 30,
            idempotency_key: "k1".to_string(),
            ttl: Duration::hours(1),
        };
        let request = domain.clone().oneshot(req).await?;

        // WHEN the recipient approves it
        let req = ApproveTransferRequest {
            request_id: request.request_id,
            actor: to,
        };
        let approval = domain.clone().oneshot(req).await?;

        // THEN the points moved along with their expiration date
        assert_that!(approval.request.status).is_equal_to(TransferStatus::Approved);
        assert_that!(approval.credit.origin).is_equal_to(BatchOrigin::Transfer {
            request_id: request.request_id,
        });
        assert_that!(approval.credit.expires_at).is_equal_to(Some(now + Duration::days(7)));
        let from_balance = domain
            .clone()
            .oneshot(GetBalanceRequest { user_id: from })
            .await?;
        let to_balance = domain.oneshot(GetBalanceRequest { user_id: to }).await?;
        assert_that!(from_balance.balance).is_equal_to(70);
        assert_that!(to_balance.balance).is_equal_to(30);

        Ok(())
    }

    #[tokio::test]
    async fn test_sender_cannot_approve() -> Result<(), BoxError> {
        let domain = logic(&MemoryDatabase::default(), t0());
        let (from, to) = (Uuid::new_v4(), Uuid::new_v4());
        let req = GrantPointsRequest {
            user_id: from,
            amount: 10,
            expires_at: None,
        };
        domain.clone().oneshot(req).await?;
        let req = CreateTransferRequest {
            from_user_id: from,
            to_user_id: to,
            amount: 10,
            idempotency_key: "k1".to_string(),
            ttl: Duration::hours(1),
        };
        let request = domain.clone().oneshot(req).await?;

        let req = ApproveTransferRequest {
            request_id: request.request_id,
            actor: from,
        };
        let res = domain.oneshot(req).await;

        assert_that!(res)
            .is_err()
            .matches(|err| err.kind() == ErrorKind::Forbidden);

        Ok(())
    }
}
