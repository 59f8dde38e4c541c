use trellis_protocol::models::Request;
use trellis_protocol::Operation;

use super::Service;
use crate::dispatcher::Dispatcher;

pub const GET_REQUEST: Operation<Request> = Operation::new("platform.shared.GetRequest", &["id"]);

/// Transaction requests; paginated.
pub const GET_REQUESTS: Operation<Vec<Request>> =
    Operation::new("platform.shared.GetRequests", &[]);

/// Cancel a pending transaction request by `id`.
pub const CANCEL_TRANSACTION: Operation<bool> =
    Operation::new("platform.shared.CancelTransaction", &["id"]);

/// Transaction request lookups and cancellation.
#[derive(Clone)]
pub struct RequestService {
    dispatcher: Dispatcher,
}

impl Service for RequestService {
    const NAME: &'static str = "requests";

    fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl RequestService {
    operation_methods!(get_request, get_request_with, Request);

    operation_methods!(get_requests, get_requests_with, Vec<Request>);

    operation_methods!(
        /// Returns `true` when the platform accepted the cancellation.
        cancel_transaction, cancel_transaction_with, bool
    );
}
