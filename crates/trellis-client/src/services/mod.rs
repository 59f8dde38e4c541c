//! Service proxies grouping related platform operations.
//!
//! A proxy is a thin typed facade over the [`Dispatcher`]: every operation
//! comes as an awaited method and a `_with` method taking a completion
//! handler. Proxies are created through a [`ServiceRegistry`], an explicit
//! name-to-factory map, and memoised by the middleware.

/// Defines the awaited and completion-handler methods for one operation.
macro_rules! operation_methods {
    ($(#[$meta:meta])* $name:ident, $name_with:ident, $result:ty) => {
        $(#[$meta])*
        pub async fn $name(
            &self,
            request: &trellis_protocol::TypedRequest<$result>,
        ) -> crate::error::Result<trellis_protocol::TypedResponse<$result>> {
            self.dispatcher.send(request).await
        }

        $(#[$meta])*
        ///
        /// Returns at once; `on_complete` runs exactly once on a worker.
        pub fn $name_with<F>(
            &self,
            request: trellis_protocol::TypedRequest<$result>,
            on_complete: F,
        ) -> crate::error::Result<()>
        where
            F: FnOnce(trellis_protocol::TypedResponse<$result>) + Send + 'static,
        {
            self.dispatcher.send_with(request, on_complete)
        }
    };
}

mod assets;
mod balances;
mod platform;
mod projects;
mod requests;

pub use assets::AssetService;
pub use balances::BalanceService;
pub use platform::PlatformService;
pub use projects::ProjectService;
pub use requests::RequestService;

/// Operation descriptors for building requests, by group.
pub mod operations {
    pub use super::assets::{GET_ASSET, GET_ASSETS};
    pub use super::balances::GET_BALANCES;
    pub use super::platform::{GET_GAS_PRICES, GET_PLATFORM};
    pub use super::projects::{APPROVE_MAX_ENJ, GET_PROJECT};
    pub use super::requests::{CANCEL_TRANSACTION, GET_REQUEST, GET_REQUESTS};
}

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatcher::Dispatcher;

/// A named group of operations.
pub trait Service: Send + Sync + 'static {
    /// Registry key, also accepted by `service_for`.
    const NAME: &'static str;

    fn new(dispatcher: Dispatcher) -> Self;
}

type Factory = Box<dyn Fn(Dispatcher) -> Arc<dyn Any + Send + Sync> + Send + Sync>;

/// Map from service name to the factory that builds it.
pub struct ServiceRegistry {
    factories: HashMap<&'static str, Factory>,
}

impl ServiceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry holding the built-in groups.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<AssetService>();
        registry.register::<BalanceService>();
        registry.register::<PlatformService>();
        registry.register::<ProjectService>();
        registry.register::<RequestService>();
        registry
    }

    /// Register `S` under `S::NAME`, replacing any previous factory.
    pub fn register<S: Service>(&mut self) -> &mut Self {
        self.factories.insert(
            S::NAME,
            Box::new(|dispatcher| Arc::new(S::new(dispatcher)) as Arc<dyn Any + Send + Sync>),
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    pub(crate) fn create(
        &self,
        name: &str,
        dispatcher: Dispatcher,
    ) -> Option<Arc<dyn Any + Send + Sync>> {
        self.factories.get(name).map(|factory| factory(dispatcher))
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("ServiceRegistry").field("services", &names).finish()
    }
}
