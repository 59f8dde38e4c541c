//! The middleware facade.
//!
//! One [`Middleware`] owns a dispatcher, the memoised service proxies, the
//! channel multiplexer and (once first needed) the event connection.
//! Cloning it is cheap and every clone refers to the same instance.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::channels::Channel;
use crate::config::ClientConfig;
use crate::connection::{ConnectionHandle, ConnectionState};
use crate::dispatcher::Dispatcher;
use crate::error::{ClientError, Result};
use crate::lifecycle::Lifecycle;
use crate::multiplexer::{EventListener, Multiplexer, Subscription};
use crate::services::{Service, ServiceRegistry};
use crate::transport::{EventTransport, HttpTransport, RequestTransport, WebSocketTransport};

type SharedService = Arc<dyn Any + Send + Sync>;

/// Entry point to the platform API.
///
/// # Example
///
/// ```no_run
/// use trellis_client::services::{operations, AssetService};
/// use trellis_client::{ChannelEvent, ClientConfig, Middleware};
///
/// # async fn example() -> trellis_client::Result<()> {
/// let middleware = Middleware::new(ClientConfig::default())?;
///
/// let assets = middleware.service::<AssetService>()?;
/// let request = operations::GET_ASSET.request().arg("id", "A1").build()?;
/// let response = assets.get_asset(&request).await?;
/// println!("{:?}", response.result());
///
/// let subscription = middleware
///     .subscribe("project:123", |event: &ChannelEvent| -> anyhow::Result<()> {
///         println!("{}", event.payload);
///         Ok(())
///     })
///     .await?;
/// middleware.unsubscribe(&subscription).await?;
/// middleware.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Middleware {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    lifecycle: Arc<Lifecycle>,
    dispatcher: Dispatcher,
    registry: ServiceRegistry,
    services: Mutex<HashMap<String, SharedService>>,
    multiplexer: Arc<Multiplexer>,
    event_transport: Arc<dyn EventTransport>,
    // Held across awaits so that starting and commanding the actor is serialised.
    connection: tokio::sync::Mutex<Option<ConnectionHandle>>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Middleware {
    /// Middleware over the default HTTP and WebSocket transports.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> MiddlewareBuilder {
        MiddlewareBuilder::new(config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Handle to the dispatcher shared by all proxies.
    pub fn dispatcher(&self) -> Result<Dispatcher> {
        self.inner.lifecycle.ensure_open()?;
        Ok(self.inner.dispatcher.clone())
    }

    /// The proxy for `S`, created on first use and shared afterwards.
    pub fn service<S: Service>(&self) -> Result<Arc<S>> {
        self.service_for(S::NAME)?
            .downcast::<S>()
            .map_err(|_| ClientError::ServiceType(S::NAME.to_string()))
    }

    /// The proxy registered under `name`, as an untyped handle.
    pub fn service_for(&self, name: &str) -> Result<SharedService> {
        self.inner.lifecycle.ensure_open()?;
        let mut services = self.inner.services.lock();
        if let Some(service) = services.get(name) {
            return Ok(Arc::clone(service));
        }
        let service = self
            .inner
            .registry
            .create(name, self.inner.dispatcher.clone())
            .ok_or_else(|| ClientError::UnknownService(name.to_string()))?;
        debug!(service = name, "Service proxy created");
        services.insert(name.to_string(), Arc::clone(&service));
        Ok(service)
    }

    /// Start the event connection if it is not running yet.
    pub async fn start(&self) -> Result<()> {
        self.inner.lifecycle.ensure_open()?;
        let mut connection = self.inner.connection.lock().await;
        self.ensure_connection(&mut connection)?;
        Ok(())
    }

    /// Register `listener` for events on `channel`.
    ///
    /// The first subscription on a channel starts the event connection if
    /// needed. The server side is subscribed as soon as the link is up;
    /// events published while it is down are not replayed.
    pub async fn subscribe<C, L>(&self, channel: &C, listener: L) -> Result<Subscription>
    where
        C: Channel + ?Sized,
        L: EventListener,
    {
        self.inner.lifecycle.ensure_open()?;
        let channel = channel.channel()?;

        let mut connection = self.inner.connection.lock().await;
        let handle = self.ensure_connection(&mut connection)?;
        let (subscription, first) = self
            .inner
            .multiplexer
            .register(channel.clone(), Arc::new(listener));
        if first {
            if let Err(e) = handle.subscribe(channel).await {
                self.inner.multiplexer.remove(&subscription);
                return Err(e);
            }
        }
        Ok(subscription)
    }

    /// Remove a subscription. Unknown or already removed ones are ignored.
    ///
    /// No event arriving after this returns reaches the listener.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        self.inner.lifecycle.ensure_open()?;
        let Some(last) = self.inner.multiplexer.remove(subscription) else {
            debug!(subscription = %subscription.id(), "Unknown subscription");
            return Ok(());
        };
        if last {
            let connection = self.inner.connection.lock().await;
            if let Some(handle) = connection.as_ref() {
                handle.unsubscribe(subscription.channel().clone()).await?;
            }
        }
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lifecycle.is_closed()
    }

    /// Close the connection, drop every subscription and invalidate every
    /// proxy. Everything afterwards, including another shutdown, fails with
    /// [`ClientError::Closed`].
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.lifecycle.close()?;
        let handle = self.inner.connection.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
        let listeners = self.inner.multiplexer.listener_count();
        self.inner.multiplexer.clear();
        self.inner.services.lock().clear();
        self.inner.state.send_replace(ConnectionState::Closed);
        info!(dropped_listeners = listeners, "Middleware shut down");
        Ok(())
    }

    fn ensure_connection<'a>(
        &self,
        connection: &'a mut Option<ConnectionHandle>,
    ) -> Result<&'a ConnectionHandle> {
        // A shutdown may have taken the handle while we waited for the lock.
        self.inner.lifecycle.ensure_open()?;
        if connection.is_none() {
            debug!(url = %self.inner.config.event_url, "Starting event connection");
            *connection = Some(ConnectionHandle::spawn(
                Arc::clone(&self.inner.event_transport),
                Arc::clone(&self.inner.multiplexer),
                &self.inner.config,
                Arc::clone(&self.inner.state),
            ));
        }
        connection.as_ref().ok_or(ClientError::Closed)
    }
}

/// Builds a [`Middleware`] with custom transports or extra services.
pub struct MiddlewareBuilder {
    config: ClientConfig,
    request_transport: Option<Arc<dyn RequestTransport>>,
    event_transport: Option<Arc<dyn EventTransport>>,
    registry: ServiceRegistry,
}

impl MiddlewareBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            request_transport: None,
            event_transport: None,
            registry: ServiceRegistry::with_defaults(),
        }
    }

    pub fn request_transport(mut self, transport: impl RequestTransport) -> Self {
        self.request_transport = Some(Arc::new(transport));
        self
    }

    pub fn event_transport(mut self, transport: impl EventTransport) -> Self {
        self.event_transport = Some(Arc::new(transport));
        self
    }

    /// Make `S` available through `service` and `service_for`.
    pub fn register<S: Service>(mut self) -> Self {
        self.registry.register::<S>();
        self
    }

    /// Replace the whole registry, dropping the built-in services.
    pub fn registry(mut self, registry: ServiceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn build(self) -> Result<Middleware> {
        self.config.validate()?;
        let request_transport: Arc<dyn RequestTransport> = match self.request_transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };
        let event_transport: Arc<dyn EventTransport> = match self.event_transport {
            Some(transport) => transport,
            None => Arc::new(WebSocketTransport::new(&self.config)),
        };

        let lifecycle = Arc::new(Lifecycle::default());
        let dispatcher = Dispatcher::new(request_transport, &self.config, Arc::clone(&lifecycle));
        let multiplexer = Arc::new(Multiplexer::new(self.config.listener_queue_capacity));
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Middleware {
            inner: Arc::new(Inner {
                config: self.config,
                lifecycle,
                dispatcher,
                registry: self.registry,
                services: Mutex::new(HashMap::new()),
                multiplexer,
                event_transport,
                connection: tokio::sync::Mutex::new(None),
                state: Arc::new(state),
            }),
        })
    }
}
