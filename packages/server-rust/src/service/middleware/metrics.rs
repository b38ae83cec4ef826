//! Metrics middleware for operations.
//!
//! Wraps each operation in a `tracing` span and records
//! `topom_operations_total{op, outcome}` and
//! `topom_operation_duration_seconds{op}` through the `metrics` facade.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{Operation, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments operations with spans, counters and timings.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records operation duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Operation> for MetricsService<S>
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
        let op_name = op.name();
        let service_name = op.ctx().service_name;
        let call_id = op.ctx().call_id;
        let expected = op.ctx().expected_version;

        let span = info_span!(
            "operation",
            op = op_name,
            service = service_name,
            call_id = call_id,
            expected_version = expected,
            version = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(op);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(e) => e.kind(),
                };
                let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);
                if let Some(version) = result.as_ref().ok().and_then(OperationResponse::version) {
                    span.record("version", version);
                }

                metrics::counter!("topom_operations_total", "op" => op_name, "outcome" => outcome)
                    .increment(1);
                metrics::histogram!("topom_operation_duration_seconds", "op" => op_name)
                    .record(elapsed.as_secs_f64());

                match &result {
                    Ok(_) => tracing::info!(op = op_name, duration_ms, "operation complete"),
                    Err(e) => tracing::warn!(op = op_name, duration_ms, error = %e, "operation failed"),
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tower::ServiceExt;

    use super::*;
    use crate::cluster::TopomError;
    use crate::service::operation::{service_names, OperationContext};

    /// Completes immediately, failing when asked to resync.
    struct ImmediateService;

    impl Service<Operation> for ImmediateService {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future =
            Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, op: Operation) -> Self::Future {
            let fail = matches!(op, Operation::ResyncAllGroups { .. });
            Box::pin(async move {
                if fail {
                    Err(OperationError::Topom(TopomError::Closed))
                } else {
                    Ok(OperationResponse::Empty)
                }
            })
        }
    }

    fn ctx() -> OperationContext {
        OperationContext::new(42, service_names::GROUPS, "", Some(3), 5_000)
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_response() {
        let svc = MetricsLayer.layer(ImmediateService);
        let resp = svc
            .oneshot(Operation::CreateGroup { ctx: ctx(), gid: 1 })
            .await
            .unwrap();
        assert!(matches!(resp, OperationResponse::Empty));
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_error() {
        let svc = MetricsLayer.layer(ImmediateService);
        let err = svc
            .oneshot(Operation::ResyncAllGroups { ctx: ctx() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "closed");
    }
}
