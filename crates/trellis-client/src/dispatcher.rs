//! Turns typed requests into transport calls and typed responses.
//!
//! Two execution modes share one decode path:
//!
//! - awaited: [`Dispatcher::send`] / [`Dispatcher::send_timeout`] resolve to
//!   the response, or to `Err` when the call itself did not complete;
//! - completion handler: [`Dispatcher::send_with`] returns immediately and
//!   hands the response to a callback exactly once, on a bounded pool of
//!   blocking workers. Transport failures arrive there as a response with a
//!   single `TRANSPORT_ERROR` entry.
//!
//! Each call is independent; the dispatcher holds no per-call state.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};
use trellis_protocol::{OperationId, ResponseError, TypedRequest, TypedResponse};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::lifecycle::Lifecycle;
use crate::transport::RequestTransport;

/// Cheap to clone; clones share the transport and the worker pool.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn RequestTransport>,
    workers: Arc<Semaphore>,
    default_timeout: Option<Duration>,
    lifecycle: Arc<Lifecycle>,
}

impl Dispatcher {
    pub(crate) fn new(
        transport: Arc<dyn RequestTransport>,
        config: &ClientConfig,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            transport,
            workers: Arc::new(Semaphore::new(config.worker_pool_size)),
            default_timeout: config.request_timeout(),
            lifecycle,
        }
    }

    /// Send and await the response, bounded by the configured default timeout.
    pub async fn send<T: DeserializeOwned>(
        &self,
        request: &TypedRequest<T>,
    ) -> Result<TypedResponse<T>> {
        match self.default_timeout {
            Some(timeout) => self.send_timeout(request, timeout).await,
            None => self.execute(request).await,
        }
    }

    /// Send and await the response for at most `timeout`.
    ///
    /// A reply arriving after the deadline is dropped with the call.
    pub async fn send_timeout<T: DeserializeOwned>(
        &self,
        request: &TypedRequest<T>,
        timeout: Duration,
    ) -> Result<TypedResponse<T>> {
        match tokio::time::timeout(timeout, self.execute(request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(operation = %request.operation(), ?timeout, "Request timed out");
                Err(ClientError::Timeout(timeout))
            }
        }
    }

    /// Send without waiting; `on_complete` receives the response exactly once.
    pub fn send_with<T, F>(&self, request: TypedRequest<T>, on_complete: F) -> Result<()>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(TypedResponse<T>) + Send + 'static,
    {
        self.lifecycle.ensure_open()?;
        let runtime = Handle::try_current().map_err(|e| ClientError::Runtime(e.to_string()))?;

        let transport = Arc::clone(&self.transport);
        let workers = Arc::clone(&self.workers);
        runtime.spawn(async move {
            let operation = request.operation().clone();
            let call = request.to_wire();
            let response = match AssertUnwindSafe(transport.execute(&call))
                .catch_unwind()
                .await
            {
                Ok(Ok(body)) => TypedResponse::decode(&body),
                Ok(Err(e)) => {
                    warn!(operation = %operation, error = %e, "Request failed");
                    TypedResponse::from_error(ResponseError::transport(e.to_string()))
                }
                Err(_) => {
                    error!(operation = %operation, "Transport panicked before replying");
                    TypedResponse::from_error(ResponseError::transport(
                        "transport panicked before replying",
                    ))
                }
            };
            complete(workers, operation, response, on_complete).await;
        });
        Ok(())
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: &TypedRequest<T>,
    ) -> Result<TypedResponse<T>> {
        self.lifecycle.ensure_open()?;
        let call = request.to_wire();
        let body = self.transport.execute(&call).await?;
        let response = TypedResponse::decode(&body);
        if response.has_errors() {
            debug!(
                operation = %call.operation,
                errors = response.errors().len(),
                "Response carries errors"
            );
        }
        Ok(response)
    }
}

/// Run the handler on a blocking worker once a pool slot is free.
async fn complete<T, F>(
    workers: Arc<Semaphore>,
    operation: OperationId,
    response: TypedResponse<T>,
    on_complete: F,
) where
    T: Send + 'static,
    F: FnOnce(TypedResponse<T>) + Send + 'static,
{
    // The pool is never closed, so acquisition only fails if that changes.
    let _permit = workers.acquire_owned().await.ok();
    if let Err(e) = tokio::task::spawn_blocking(move || on_complete(response)).await {
        error!(operation = %operation, error = %e, "Completion handler panicked");
    }
}
