//! Client middleware for the trellis platform API
//!
//! Two independent paths share one [`Middleware`] instance:
//!
//! 1. **Requests**: a service proxy builds a typed request, the dispatcher
//!    sends it over the request transport and decodes a typed response,
//!    either awaited or handed to a completion handler.
//! 2. **Events**: one persistent connection, owned by a single actor task,
//!    feeds the channel multiplexer which fans events out to listeners.
//!    The connection starts on first subscribe, reconnects with backoff and
//!    re-subscribes every registered channel after each reconnect.
//!
//! Failures on one path never affect the other: a lost event connection does
//! not fail in-flight requests, and a failed request never touches the
//! connection.

pub mod channels;
pub mod config;
mod connection;
mod dispatcher;
mod error;
mod lifecycle;
mod middleware;
mod multiplexer;
pub mod services;
pub mod transport;

pub use channels::{AssetChannel, Channel, PlayerChannel, ProjectChannel, WalletChannel};
pub use config::{ClientConfig, ClientConfigBuilder, HeartbeatConfig, ReconnectConfig};
pub use connection::ConnectionState;
pub use dispatcher::Dispatcher;
pub use error::{ClientError, ConnectionError, Result, TransportError};
pub use middleware::{Middleware, MiddlewareBuilder};
pub use multiplexer::{EventListener, Subscription, SubscriptionId};

// Re-exports from trellis-protocol for convenience
pub use trellis_protocol::{
    models, ChannelEvent, ChannelName, InvalidArgument, Operation, PaginationOptions,
    RequestBuilder, ResponseError, TypedRequest, TypedResponse,
};
pub use trellis_protocol as protocol;
