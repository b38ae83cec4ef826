//! Admission control for mutations.
//!
//! At most `max_concurrent_operations` mutations run at once; the rest fail
//! fast with `OperationError::Overloaded` (503). Brake operations (`Close`
//! and the slot-action `disabled`/`interval` settings) are admitted outside
//! the budget so an operator can always quiesce a saturated orchestrator.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{Operation, OperationError, OperationResponse};

/// Operations that stop or slow the orchestrator down.
fn is_brake(op: &Operation) -> bool {
    matches!(
        op,
        Operation::Close { .. }
            | Operation::SetSlotActionDisabled { .. }
            | Operation::SetSlotActionInterval { .. }
    )
}

/// Held by an admitted operation until its future completes.
struct Ticket {
    _permit: Option<OwnedSemaphorePermit>,
}

impl Ticket {
    fn issue(permit: Option<OwnedSemaphorePermit>) -> Self {
        metrics::gauge!("topom_operations_in_flight").increment(1.0);
        Self { _permit: permit }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        metrics::gauge!("topom_operations_in_flight").decrement(1.0);
    }
}

/// Concurrency budget shared by every clone of the pipeline.
#[derive(Debug)]
struct Admission {
    budget: Arc<Semaphore>,
}

impl Admission {
    fn admit(&self, op: &Operation) -> Result<Ticket, OperationError> {
        if is_brake(op) {
            return Ok(Ticket::issue(None));
        }
        match Arc::clone(&self.budget).try_acquire_owned() {
            Ok(permit) => Ok(Ticket::issue(Some(permit))),
            Err(_) => {
                metrics::counter!("topom_operations_shed_total", "operation" => op.name())
                    .increment(1);
                warn!(
                    operation = op.name(),
                    call_id = op.ctx().call_id,
                    "operation shed, too many in flight"
                );
                Err(OperationError::Overloaded)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// LoadShedLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    admission: Arc<Admission>,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            admission: Arc::new(Admission {
                budget: Arc::new(Semaphore::new(max_concurrent as usize)),
            }),
        }
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            admission: Arc::clone(&self.admission),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    admission: Arc<Admission>,
}

impl<S> Service<Operation> for LoadShedService<S>
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
        let ticket = match self.admission.admit(&op) {
            Ok(ticket) => ticket,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let fut = self.inner.call(op);
        Box::pin(async move {
            let _ticket = ticket;
            fut.await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
