use std::task::{Context, Poll};

use tower::Service;
use uuid::Uuid;

use super::{CommandFuture, DomainLogic, Error};
use crate::domain::TransferRequest;

/// Read the current state of a transfer request
///
/// Callers should do this after a conflict error before deciding what to do next.
pub struct GetTransferRequest {
    pub request_id: Uuid,
}

impl Service<GetTransferRequest> for DomainLogic {
    type Response = TransferRequest;
    type Error = Error;
    type Future = CommandFuture<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: GetTransferRequest) -> Self::Future {
        let ledger = self.ledger.clone();
        Box::pin(async move { ledger.transfers.get(req.request_id).await })
    }
}
