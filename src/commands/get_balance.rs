use std::task::{Context, Poll};

use tower::Service;
use uuid::Uuid;

use super::{CommandFuture, DomainLogic, Error};
use crate::domain::Points;

pub struct GetBalanceRequest {
    pub user_id: Uuid,
}

#[derive(Debug, PartialEq, Eq)]
pub struct GetBalanceResponse {
    pub user_id: Uuid,
    /// Sum of the remaining points of the user's active batches
    pub balance: Points,
}

impl Service<GetBalanceRequest> for DomainLogic {
    type Response = GetBalanceResponse;
    type Error = Error;
    type Future = CommandFuture<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: GetBalanceRequest) -> Self::Future {
        let ledger = self.ledger.clone();
        Box::pin(async move {
            let balance = ledger.batches.current_balance(req.user_id).await?;

            Ok(GetBalanceResponse {
                user_id: req.user_id,
                balance,
            })
        })
    }
}
