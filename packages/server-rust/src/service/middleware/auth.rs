//! Capability-token middleware for operations.
//!
//! Rejects operations whose `ctx.xauth` does not match the cluster's token
//! with `TopomError::Unauthorized`, before any other work is done.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use subtle::ConstantTimeEq;
use tower::{Layer, Service};

use crate::cluster::TopomError;
use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// AuthLayer
// ---------------------------------------------------------------------------

/// Tower layer checking the caller's capability token.
#[derive(Debug, Clone)]
pub struct AuthLayer {
    xauth: Arc<str>,
}

impl AuthLayer {
    #[must_use]
    pub fn new(xauth: &str) -> Self {
        Self {
            xauth: Arc::from(xauth),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            xauth: Arc::clone(&self.xauth),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AuthService<S> {
    inner: S,
    xauth: Arc<str>,
}

impl<S> Service<Operation> for AuthService<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let presented = op.ctx().xauth.as_bytes();
        if !bool::from(self.xauth.as_bytes().ct_eq(presented)) {
            tracing::warn!(op = op.name(), "rejected operation with invalid xauth");
            return Box::pin(async { Err(OperationError::Topom(TopomError::Unauthorized)) });
        }
        Box::pin(self.inner.call(op))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;
    use crate::service::operation::{service_names, OperationContext};

    struct AckService;

    impl Service<Operation> for AckService {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future =
            Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _op: Operation) -> Self::Future {
            Box::pin(async { Ok(OperationResponse::Empty) })
        }
    }

    fn make_op(xauth: &str) -> Operation {
        Operation::ResyncSentinels {
            ctx: OperationContext::new(1, service_names::SENTINELS, xauth, None, 5_000),
        }
    }

    #[tokio::test]
    async fn matching_token_passes() {
        let svc = AuthLayer::new("0123abcd").layer(AckService);
        let resp = svc.oneshot(make_op("0123abcd")).await.unwrap();
        assert!(matches!(resp, OperationResponse::Empty));
    }

    #[tokio::test]
    async fn wrong_or_truncated_token_is_unauthorized() {
        for bad in ["0123abce", "0123abc", ""] {
            let svc = AuthLayer::new("0123abcd").layer(AckService);
            let err = svc.oneshot(make_op(bad)).await.unwrap_err();
            assert!(matches!(err, OperationError::Topom(TopomError::Unauthorized)));
        }
    }
}
