//! Transport layers of the admin API.
//!
//! Every admin command carries the product `xauth` as a path segment, so the
//! request span logs a redacted path instead of the raw URI.

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::HeaderName;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info_span;

use super::config::NetworkConfig;

const REQUEST_ID: &str = "x-request-id";

/// Wraps `router` in the transport stack, outermost first:
///
/// 1. `SetRequestId` -- UUID v4 `X-Request-Id` unless the caller sent one
/// 2. `Trace` -- one `admin_request` span per request, `xauth` redacted
/// 3. `Compression` -- gzip; the slot table dominates the status feed
/// 4. `CORS` -- configured origins, `GET`/`PUT` only
/// 5. `Timeout` -- 408 after `request_timeout_ms`
/// 6. `PropagateRequestId` -- echoes the request id on the response
///
/// Authorization, load shedding and operation metrics belong to the
/// operation pipeline, not to this stack.
pub fn with_http_layers<S>(router: Router<S>, config: &NetworkConfig, xauth: &str) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let x_request_id = HeaderName::from_static(REQUEST_ID);
    let xauth: Arc<str> = Arc::from(xauth);

    let trace = TraceLayer::new_for_http().make_span_with(move |req: &Request<Body>| {
        let request_id = req
            .headers()
            .get(REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        info_span!(
            "admin_request",
            method = %req.method(),
            path = %redact_path(req.uri().path(), &xauth),
            request_id,
        )
    });

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
            .layer(trace)
            .layer(CompressionLayer::new())
            .layer(build_cors_layer(&config.cors_origins))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                config.request_timeout(),
            ))
            .layer(PropagateRequestIdLayer::new(x_request_id)),
    )
}

/// Replaces every path segment equal to `xauth` with `*`.
fn redact_path(path: &str, xauth: &str) -> String {
    if xauth.is_empty() {
        return path.to_string();
    }
    path.split('/')
        .map(|segment| if segment == xauth { "*" } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

/// `"*"` anywhere in `origins` allows any origin; unparsable entries are skipped.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| o.parse().ok()))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::PUT])
        .allow_headers(Any)
}
