//! HTTP handler definitions of the admin API.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod api;
pub mod health;

pub use api::api_routes;
pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use super::ShutdownController;
use crate::cluster::Topom;
use crate::service::{build_operation_pipeline, Kicker, OperationPipeline, OperationRouter, TopomConfig};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub topom: Arc<Topom>,
    /// Mutation pipeline. The lock only covers readiness and dispatch; the
    /// returned future runs unlocked.
    pub pipeline: Arc<Mutex<OperationPipeline>>,
    /// Wakes the action drivers after slot and group commands.
    pub kicker: Kicker,
    pub shutdown: Arc<ShutdownController>,
    pub operation_timeout_ms: u64,
    call_ids: Arc<AtomicU64>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Builds the state around `topom`, assembling the operation pipeline from `config`.
    #[must_use]
    pub fn new(
        topom: Arc<Topom>,
        config: &TopomConfig,
        kicker: Kicker,
        shutdown: Arc<ShutdownController>,
    ) -> Self {
        let pipeline =
            build_operation_pipeline(OperationRouter::for_topom(&topom), config, topom.xauth());
        Self {
            topom,
            pipeline: Arc::new(Mutex::new(pipeline)),
            kicker,
            shutdown,
            operation_timeout_ms: config.default_operation_timeout_ms,
            call_ids: Arc::new(AtomicU64::new(1)),
            start_time: Instant::now(),
        }
    }

    /// Allocates the id of the next admin call.
    pub fn next_call_id(&self) -> u64 {
        self.call_ids.fetch_add(1, Ordering::Relaxed)
    }
}
