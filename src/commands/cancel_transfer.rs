use std::task::{Context, Poll};

use tower::Service;
use uuid::Uuid;

use super::{CommandFuture, DomainLogic, Error};
use crate::domain::TransferRequest;

/// Withdraw a pending transfer request as its sender
pub struct CancelTransferRequest {
    pub request_id: Uuid,
    pub actor: Uuid,
}

impl Service<CancelTransferRequest> for DomainLogic {
    type Response = TransferRequest;
    type Error = Error;
    type Future = CommandFuture<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: CancelTransferRequest) -> Self::Future {
        let ledger = self.ledger.clone();
        Box::pin(async move { ledger.transfers.cancel(req.request_id, req.actor).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapters::database::memory::MemoryDatabase,
        commands::{
            create_transfer::CreateTransferRequest, grant_points::GrantPointsRequest, testing::*,
            ErrorKind,
        },
        domain::TransferStatus,
    };
    use chrono::Duration;
    use rstest::*;
    use speculoos::prelude::*;
    use tower::{BoxError, ServiceExt};

    async fn pending(
        domain: &DomainLogic,
        from: Uuid,
        to: Uuid,
    ) -> Result<TransferRequest, BoxError> {
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
        Ok(domain.clone().oneshot(req).await?)
    }

    #[tokio::test]
    async fn test_sender_cancels() -> Result<(), BoxError> {
        let domain = logic(&MemoryDatabase::default(), t0());
        let (from, to) = (Uuid::new_v4(), Uuid::new_v4());
        let request = pending(&domain, from, to).await?;

        let req = CancelTransferRequest {
            request_id: request.request_id,
            actor: from,
        };
        let cancelled = domain.oneshot(req).await?;

        assert_that!(cancelled.status).is_equal_to(TransferStatus::Cancelled);

        Ok(())
    }

    #[rstest]
    #[case::recipient(true)]
    #[case::stranger(false)]
    #[tokio::test]
    async fn test_others_cannot_cancel(#[case] recipient: bool) -> Result<(), BoxError> {
        let domain = logic(&MemoryDatabase::default(), t0());
        let (from, to) = (Uuid::new_v4(), Uuid::new_v4());
        let request = pending(&domain, from, to).await?;

        let req = CancelTransferRequest {
            request_id: request.request_id,
            actor: if recipient { to } else { Uuid::new_v4() },
        };
        let res = domain.oneshot(req).await;

        assert_that!(res)
            .is_err()
            .matches(|err| err.kind() == ErrorKind::Forbidden);

        Ok(())
    }
}
