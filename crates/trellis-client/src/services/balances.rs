use trellis_protocol::models::Balance;
use trellis_protocol::Operation;

use super::Service;
use crate::dispatcher::Dispatcher;

/// Balances filtered by wallet or asset; paginated.
pub const GET_BALANCES: Operation<Vec<Balance>> =
    Operation::new("platform.shared.GetBalances", &[]);

#[derive(Clone)]
pub struct BalanceService {
    dispatcher: Dispatcher,
}

impl Service for BalanceService {
    const NAME: &'static str = "balances";

    fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl BalanceService {
    operation_methods!(get_balances, get_balances_with, Vec<Balance>);
}
