use trellis_protocol::models::Asset;
use trellis_protocol::Operation;

use super::Service;
use crate::dispatcher::Dispatcher;

/// One asset by `id`.
pub const GET_ASSET: Operation<Asset> = Operation::new("platform.shared.GetAsset", &["id"]);

/// Assets matching optional filters; paginated.
pub const GET_ASSETS: Operation<Vec<Asset>> = Operation::new("platform.shared.GetAssets", &[]);

/// Asset lookups.
#[derive(Clone)]
pub struct AssetService {
    dispatcher: Dispatcher,
}

impl Service for AssetService {
    const NAME: &'static str = "assets";

    fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl AssetService {
    operation_methods!(
        /// Fetch a single asset.
        get_asset, get_asset_with, Asset
    );

    operation_methods!(
        /// Fetch a page of assets.
        get_assets, get_assets_with, Vec<Asset>
    );
}
