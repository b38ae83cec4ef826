//! Timeout middleware for operations.
//!
//! Rejects operations that exceed their `call_timeout_ms` with `OperationError::Timeout`.
//! A zero budget disables the limit.
//!
//! The operation keeps running after its budget expires; only the caller
//! stops waiting, and must re-read the snapshot before retrying.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};

use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps services with per-operation timeout enforcement.
///
/// The timeout is read from each operation's `ctx.call_timeout_ms` field,
/// allowing different operations to have different timeouts.
#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

/// Service wrapper that enforces per-operation timeouts.
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<Operation> for TimeoutService<S>
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
        let timeout_ms = op.ctx().call_timeout_ms;
        let name = op.name();
        let fut = self.inner.call(op);
        if timeout_ms == 0 {
            return Box::pin(fut);
        }
        // Detached so an expired budget never cancels a half-done operation.
        let task = tokio::spawn(fut);
        Box::pin(async move {
            let duration = Duration::from_millis(timeout_ms);
            match tokio::time::timeout(duration, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(OperationError::Internal(anyhow::anyhow!(join_err))),
                Err(_elapsed) => {
                    tracing::warn!(op = name, timeout_ms, "operation timed out");
                    Err(OperationError::Timeout { timeout_ms })
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use tower::ServiceExt;

    use super::*;
    use crate::service::operation::{service_names, OperationContext};

    /// Service that takes a configurable delay before responding.
    struct SlowService {
        delay_ms: u64,
    }

    impl Service<Operation> for SlowService {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future =
            Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _op: Operation) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(OperationResponse::Empty)
            })
        }
    }

    /// Sets its flag after 100ms.
    struct FlagService(Arc<AtomicBool>);

    impl Service<Operation> for FlagService {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future =
            Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _op: Operation) -> Self::Future {
            let flag = Arc::clone(&self.0);
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(OperationResponse::Empty)
            })
        }
    }

    fn make_op(timeout_ms: u64) -> Operation {
        Operation::ResyncAllGroups {
            ctx: OperationContext::new(1, service_names::GROUPS, "", None, timeout_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completes_within_timeout() {
        let svc = TimeoutLayer.layer(SlowService { delay_ms: 10 });
        let resp = svc.oneshot(make_op(1000)).await.unwrap();
        assert!(matches!(resp, OperationResponse::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn exceeds_timeout_returns_error() {
        let svc = TimeoutLayer.layer(SlowService { delay_ms: 200 });
        let err = svc.oneshot(make_op(50)).await.unwrap_err();
        assert!(matches!(err, OperationError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_operation_keeps_running() {
        let done = Arc::new(AtomicBool::new(false));
        let svc = TimeoutLayer.layer(FlagService(Arc::clone(&done)));
        let err = svc.oneshot(make_op(50)).await.unwrap_err();
        assert!(matches!(err, OperationError::Timeout { .. }));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_waits_for_completion() {
        let svc = TimeoutLayer.layer(SlowService { delay_ms: 60_000 });
        let resp = svc.oneshot(make_op(0)).await.unwrap();
        assert!(matches!(resp, OperationResponse::Empty));
    }
}
