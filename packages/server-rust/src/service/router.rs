//! Operation routing: dispatches `Operation` to domain services by `service_name`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;

use super::domain::{AdminService, GroupsService, ProxiesService, SentinelsService, SlotsService};
use super::operation::{service_names, Operation, OperationError, OperationResponse};
use crate::cluster::Topom;

// ---------------------------------------------------------------------------
// DomainHandler trait alias
// ---------------------------------------------------------------------------

/// A boxed Tower service that handles operations for a single domain.
type BoxedService =
    Box<dyn Service<Operation, Response = OperationResponse, Error = OperationError, Future = BoxedFuture> + Send>;

type BoxedFuture = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

// ---------------------------------------------------------------------------
// OperationRouter
// ---------------------------------------------------------------------------

/// Routes `Operation` values to the correct domain service by `service_name`.
///
/// Each registered domain service is a `tower::Service<Operation>` keyed by
/// its service name (e.g., `"slots"`, `"groups"`). Operations with an
/// unregistered `service_name` return `OperationError::UnknownService`.
pub struct OperationRouter {
    services: HashMap<&'static str, BoxedService>,
}

impl OperationRouter {
    /// Create a new empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    /// Builds a router with every domain service of `topom` registered.
    #[must_use]
    pub fn for_topom(topom: &Arc<Topom>) -> Self {
        let mut router = Self::new();
        router.register(service_names::SLOTS, SlotsService::new(Arc::clone(topom)));
        router.register(service_names::GROUPS, GroupsService::new(Arc::clone(topom)));
        router.register(service_names::SENTINELS, SentinelsService::new(Arc::clone(topom)));
        router.register(service_names::PROXIES, ProxiesService::new(Arc::clone(topom)));
        router.register(service_names::ADMIN, AdminService::new(Arc::clone(topom)));
        router
    }

    /// Register a domain service for the given name.
    pub fn register<S>(&mut self, name: &'static str, service: S)
    where
        S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send + 'static,
        S::Future: Send + 'static,
    {
        self.services.insert(name, Box::new(ServiceWrapper(service)));
    }
}

impl Default for OperationRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Operation> for OperationRouter {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // All registered services must be ready. If any is not ready, return pending.
        for svc in self.services.values_mut() {
            match svc.poll_ready(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let service_name = op.ctx().service_name;
        match self.services.get_mut(service_name) {
            Some(svc) => svc.call(op),
            None => Box::pin(async move {
                Err(OperationError::UnknownService {
                    name: service_name.to_string(),
                })
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceWrapper (type-erased adapter)
// ---------------------------------------------------------------------------

/// Wrapper to type-erase a concrete `Service<Operation>` into a `BoxedService`.
struct ServiceWrapper<S>(S);

impl<S> Service<Operation> for ServiceWrapper<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = BoxedFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        Box::pin(self.0.call(op))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
