//! Tower middleware layers for the operation pipeline.
//!
//! - [`load_shed`]: Mutation budget with brake bypass
//! - [`auth`]: Capability-token check
//! - [`timeout`]: Per-operation wait budget
//! - [`metrics`]: Operation spans, counters and timings
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod auth;
pub mod load_shed;
pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use auth::AuthLayer;
pub use load_shed::LoadShedLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_operation_pipeline, OperationPipeline};
pub use timeout::TimeoutLayer;
