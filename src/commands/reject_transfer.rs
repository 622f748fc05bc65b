use std::task::{Context, Poll};

use tower::Service;
use uuid::Uuid;

use super::{CommandFuture, DomainLogic, Error};
use crate::domain::TransferRequest;

/// Reject a pending transfer request as its recipient
pub struct RejectTransferRequest {
    pub request_id: Uuid,
    pub actor: Uuid,
}

impl Service<RejectTransferRequest> for DomainLogic {
    type Response = TransferRequest;
    type Error = Error;
    type Future = CommandFuture<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: RejectTransferRequest) -> Self::Future {
        let ledger = self.ledger.clone();
        Box::pin(async move { ledger.transfers.reject(req.request_id, req.actor).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapters::database::memory::MemoryDatabase,
        commands::{
            approve_transfer::ApproveTransferRequest, create_transfer::CreateTransferRequest,
            grant_points::GrantPointsRequest, testing::*, ErrorKind,
        },
        domain::TransferStatus,
    };
    use chrono::Duration;
    use speculoos::prelude::*;
    use tower::{BoxError, ServiceExt};

    #[tokio::test]
    async fn test_rejected_request_cannot_be_approved() -> Result<(), BoxError> {
        // GIVEN a pending request
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

        // WHEN the recipient rejects it
        let req = RejectTransferRequest {
            request_id: request.request_id,
            actor: to,
        };
        let rejected = domain.clone().oneshot(req).await?;

        // THEN it is terminal
        assert_that!(rejected.status).is_equal_to(TransferStatus::Rejected);
        assert_that!(rejected.decided_at).is_some();
        let req = ApproveTransferRequest {
            request_id: request.request_id,
            actor: to,
        };
        let res = domain.oneshot(req).await;
        assert_that!(res).is_err().matches(|err| {
            err.kind() == ErrorKind::Conflict
                && matches!(
                    err,
                    Error::AlreadyDecided {
                        status: TransferStatus::Rejected,
                        ..
                    }
                )
        });

        Ok(())
    }
}
