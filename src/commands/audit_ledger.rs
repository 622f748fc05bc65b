use std::task::{Context, Poll};

use tower::Service;

use super::{CommandFuture, DomainLogic, Error};
use crate::ledger::LedgerAudit;

/// Recompute the ledger totals and check that no point was created or lost
pub struct AuditLedgerRequest;

impl Service<AuditLedgerRequest> for DomainLogic {
    type Response = LedgerAudit;
    type Error = Error;
    type Future = CommandFuture<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: AuditLedgerRequest) -> Self::Future {
        let ledger = self.ledger.clone();
        Box::pin(async move { ledger.guard.audit().await })
    }
}
