//! Pipeline composition: combines all middleware layers into a single service stack.

use tower::util::BoxService;
use tower::ServiceBuilder;

use super::auth::AuthLayer;
use super::load_shed::LoadShedLayer;
use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use crate::service::config::TopomConfig;
use crate::service::operation::{Operation, OperationError, OperationResponse};
use crate::service::router::OperationRouter;

/// The fully layered, type-erased mutation pipeline.
pub type OperationPipeline = BoxService<Operation, OperationResponse, OperationError>;

/// Build the operation pipeline by wrapping the `OperationRouter` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- shed mutations beyond the budget; brakes always pass
/// 2. `AuthLayer` -- reject callers without the cluster's capability token
/// 3. `TimeoutLayer` -- bound how long the caller waits for the result
/// 4. `MetricsLayer` -- record timing and outcome (closest to the actual handler)
#[must_use]
pub fn build_operation_pipeline(
    router: OperationRouter,
    config: &TopomConfig,
    xauth: &str,
) -> OperationPipeline {
    BoxService::new(
        ServiceBuilder::new()
            .layer(LoadShedLayer::new(config.max_concurrent_operations))
            .layer(AuthLayer::new(xauth))
            .layer(TimeoutLayer)
            .layer(MetricsLayer)
            .service(router),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
