//! Mutation gateway and background drivers.
//!
//! 1. **Operations** (`operation`): one `Operation` variant per admin mutation
//! 2. **Middleware** (`middleware`): Tower layers (load-shedding, auth, timeout, metrics)
//! 3. **Routing** (`router`): Dispatch to domain services by `service_name`
//! 4. **Domain services** (`domain`): slots, groups, sentinels, proxies, admin
//! 5. **Drivers** (`drivers`, `worker`): slot migration, replication resync, stats polling

pub mod config;
pub mod domain;
pub mod drivers;
pub mod middleware;
pub mod operation;
pub mod router;
pub mod worker;

// Re-export key types for convenient access.
pub use config::TopomConfig;
pub use drivers::{Drivers, Kicker, StepOutcome};
pub use middleware::{build_operation_pipeline, OperationPipeline};
pub use operation::{service_names, Operation, OperationContext, OperationError, OperationResponse};
pub use router::OperationRouter;
pub use worker::{BackgroundRunnable, BackgroundWorker, DriverTask};
