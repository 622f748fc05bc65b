use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use tower::Service;

use super::{CommandFuture, DomainLogic, Error};
use crate::ledger::SweepReport;

/// Run one expiration sweep as of `now`
pub struct RunExpirationSweepRequest {
    pub now: DateTime<Utc>,
    /// Maximum number of rows handled per transaction
    pub page_limit: usize,
}

impl Service<RunExpirationSweepRequest> for DomainLogic {
    type Response = SweepReport;
    type Error = Error;
    type Future = CommandFuture<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: RunExpirationSweepRequest) -> Self::Future {
        let ledger = self.ledger.clone();
        Box::pin(async move { ledger.sweeper.run(req.now, req.page_limit).await })
    }
}
