use std::task::{Context, Poll};

use chrono::Duration;
use tower::Service;
use uuid::Uuid;

use super::{CommandFuture, DomainLogic, Error};
use crate::domain::{Points, TransferRequest};

pub struct CreateTransferRequest {
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub amount: Points,
    /// Client-chosen key, unique per sender
    pub idempotency_key: String,
    /// How long the request stays pending before the sweeper expires it
    pub ttl: Duration,
}

impl Service<CreateTransferRequest> for DomainLogic {
    type Response = TransferRequest;
    type Error = Error;
    type Future = CommandFuture<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: CreateTransferRequest) -> Self::Future {
        let ledger = self.ledger.clone();
        Box::pin(async move {
            ledger
                .transfers
                .create(
                    req.from_user_id,
                    req.to_user_id,
                    req.amount,
                    &req.idempotency_key,
                    req.ttl,
                )
                .await
        })
    }
}
