use trellis_protocol::models::{GasPrices, Platform};
use trellis_protocol::Operation;

use super::Service;
use crate::dispatcher::Dispatcher;

pub const GET_PLATFORM: Operation<Platform> = Operation::new("platform.shared.GetPlatform", &[]);

pub const GET_GAS_PRICES: Operation<GasPrices> =
    Operation::new("platform.shared.GetGasPrices", &[]);

/// Platform metadata and network conditions.
#[derive(Clone)]
pub struct PlatformService {
    dispatcher: Dispatcher,
}

impl Service for PlatformService {
    const NAME: &'static str = "platform";

    fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl PlatformService {
    operation_methods!(get_platform, get_platform_with, Platform);

    operation_methods!(
        /// Current gas price tiers.
        get_gas_prices, get_gas_prices_with, GasPrices
    );
}
