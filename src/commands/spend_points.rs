use std::task::{Context, Poll};

use tower::Service;
use uuid::Uuid;

use super::{CommandFuture, DomainLogic, Error};
use crate::{domain::Points, ledger::Redemption};

pub struct SpendPointsRequest {
    pub user_id: Uuid,
    pub amount: Points,
    /// What the points were spent on, kept in the consumption trail
    pub reason: String,
}

impl Service<SpendPointsRequest> for DomainLogic {
    type Response = Redemption;
    type Error = Error;
    type Future = CommandFuture<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: SpendPointsRequest) -> Self::Future {
        let ledger = self.ledger.clone();
        Box::pin(async move {
            ledger
                .batches
                .spend(req.user_id, req.amount, &req.reason)
                .await
        })
    }
}
