use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tower::Service;
use uuid::Uuid;

use super::{CommandFuture, DomainLogic, Error};
use crate::domain::{PointBatch, Points};

pub struct GrantPointsRequest {
    pub user_id: Uuid,
    pub amount: Points,
    /// `None` for points that never expire
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct GrantPointsResponse {
    pub batch: PointBatch,
    /// Balance after the grant
    pub balance: Points,
}

impl Service<GrantPointsRequest> for DomainLogic {
    type Response = GrantPointsResponse;
    type Error = Error;
    type Future = CommandFuture<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: GrantPointsRequest) -> Self::Future {
        let ledger = self.ledger.clone();
        Box::pin(async move {
            let batch = ledger
                .batches
                .grant(req.user_id, req.amount, req.expires_at)
                .await?;
            let balance = ledger.batches.current_balance(req.user_id).await?;

            Ok(GrantPointsResponse { batch, balance })
        })
    }
}
