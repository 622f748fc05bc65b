use std::task::{Context, Poll};

use tower::Service;
use uuid::Uuid;

use super::{CommandFuture, DomainLogic, Error};
use crate::domain::PointBatch;

/// Advisory listing of the user's expiring batches, soonest first
pub struct GetUpcomingExpirationsRequest {
    pub user_id: Uuid,
}

impl Service<GetUpcomingExpirationsRequest> for DomainLogic {
    type Response = Vec<PointBatch>;
    type Error = Error;
    type Future = CommandFuture<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: GetUpcomingExpirationsRequest) -> Self::Future {
        let ledger = self.ledger.clone();
        Box::pin(async move { ledger.batches.upcoming_expirations(req.user_id).await })
    }
}
