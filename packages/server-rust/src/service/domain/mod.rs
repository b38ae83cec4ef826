//! Domain services.
//!
//! One `tower::Service<Operation>` per area of the topology: slots, groups,
//! sentinels, proxies and admin. Each unpacks its operation variants and
//! calls the matching `Topom` method with the caller's expected version.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;

use crate::cluster::Topom;
use crate::service::operation::{service_names, Operation, OperationError, OperationResponse};

type HandlerResult = Result<OperationResponse, OperationError>;

// ---------------------------------------------------------------------------
// Macro for the shared `Service` plumbing
// ---------------------------------------------------------------------------

/// Generate a domain service with the given name, service constant and handler.
macro_rules! domain_service {
    (
        $(#[$meta:meta])*
        $name:ident, $svc_name:expr, $handler:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            topom: Arc<Topom>,
        }

        impl $name {
            #[must_use]
            pub fn new(topom: Arc<Topom>) -> Self {
                Self { topom }
            }
        }

        impl Service<Operation> for $name {
            type Response = OperationResponse;
            type Error = OperationError;
            type Future = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

            fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
                Poll::Ready(Ok(()))
            }

            fn call(&mut self, op: Operation) -> Self::Future {
                if op.ctx().service_name != $svc_name {
                    return Box::pin(async { Err(OperationError::WrongService) });
                }
                let topom = Arc::clone(&self.topom);
                Box::pin(async move { $handler(&topom, op).await })
            }
        }
    };
}

domain_service!(
    /// Slot actions, driver settings and rebalancing.
    SlotsService, service_names::SLOTS, handle_slots
);

domain_service!(
    /// Groups, members, promotion, sync actions and replica-group flags.
    GroupsService, service_names::GROUPS, handle_groups
);

domain_service!(
    /// Sentinel registration and resync.
    SentinelsService, service_names::SENTINELS, handle_sentinels
);

domain_service!(
    /// Proxy registration, removal and reinit.
    ProxiesService, service_names::PROXIES, handle_proxies
);

domain_service!(
    /// Lifecycle commands of the orchestrator itself.
    AdminService, service_names::ADMIN, handle_admin
);

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn handle_slots(topom: &Topom, op: Operation) -> HandlerResult {
    let expected = op.ctx().expected_version;
    let snapshot = match op {
        Operation::CreateSlotAction { sid, target, .. } => {
            topom.create_slot_action(expected, sid, target).await?
        }
        Operation::CreateSlotActionSome { count, from, to, .. } => {
            topom.create_slot_action_some(expected, count, from, to).await?
        }
        Operation::CreateSlotActionRange { begin, end, target, .. } => {
            topom
                .create_slot_action_range(expected, begin, end, target)
                .await?
        }
        Operation::RemoveSlotAction { sid, .. } => topom.remove_slot_action(expected, sid).await?,
        Operation::SetSlotActionDisabled { disabled, .. } => {
            topom.set_slot_action_disabled(expected, disabled).await?
        }
        Operation::SetSlotActionInterval { interval_ms, .. } => {
            topom.set_slot_action_interval(expected, interval_ms).await?
        }
        Operation::Rebalance { confirm, .. } => {
            let plan = topom.rebalance(expected, confirm).await?;
            return Ok(OperationResponse::Rebalance(plan));
        }
        _ => return Err(OperationError::WrongService),
    };
    Ok(OperationResponse::Snapshot(snapshot))
}

async fn handle_groups(topom: &Topom, op: Operation) -> HandlerResult {
    let expected = op.ctx().expected_version;
    let snapshot = match op {
        Operation::CreateGroup { gid, .. } => topom.create_group(expected, gid).await?,
        Operation::RemoveGroup { gid, .. } => topom.remove_group(expected, gid).await?,
        Operation::AddServer {
            gid,
            addr,
            datacenter,
            ..
        } => topom.add_server(expected, gid, &addr, &datacenter).await?,
        Operation::RemoveServer {
            gid,
            addr,
            allow_conflict,
            ..
        } => {
            topom
                .remove_server(expected, gid, &addr, allow_conflict)
                .await?
        }
        Operation::PromoteServer { gid, addr, .. } => {
            topom.promote_server(expected, gid, &addr).await?
        }
        Operation::PromoteCommit { gid, .. } => topom.promote_commit(expected, gid).await?,
        Operation::CreateSyncAction { addr, .. } => topom.create_sync_action(expected, &addr).await?,
        Operation::RemoveSyncAction { addr, .. } => topom.remove_sync_action(expected, &addr).await?,
        Operation::ResyncGroup { gid, .. } => topom.resync_group(expected, gid).await?,
        Operation::ResyncAllGroups { .. } => topom.resync_all_groups(expected).await?,
        Operation::EnableReplicaGroups {
            gid, addr, enabled, ..
        } => {
            topom
                .enable_replica_groups(expected, gid, &addr, enabled)
                .await?
        }
        Operation::EnableReplicaGroupsAll { enabled, .. } => {
            topom.enable_replica_groups_all(expected, enabled).await?
        }
        _ => return Err(OperationError::WrongService),
    };
    Ok(OperationResponse::Snapshot(snapshot))
}

async fn handle_sentinels(topom: &Topom, op: Operation) -> HandlerResult {
    let expected = op.ctx().expected_version;
    let snapshot = match op {
        Operation::AddSentinel { addr, .. } => topom.add_sentinel(expected, &addr).await?,
        Operation::DelSentinel { addr, force, .. } => {
            topom.del_sentinel(expected, &addr, force).await?
        }
        Operation::ResyncSentinels { .. } => topom.resync_sentinels(expected).await?,
        _ => return Err(OperationError::WrongService),
    };
    Ok(OperationResponse::Snapshot(snapshot))
}

async fn handle_proxies(topom: &Topom, op: Operation) -> HandlerResult {
    let expected = op.ctx().expected_version;
    let snapshot = match op {
        Operation::CreateProxy { admin_addr, .. } => {
            topom.create_proxy(expected, &admin_addr).await?
        }
        Operation::RemoveProxy { token, force, .. } => {
            topom.remove_proxy(expected, &token, force).await?
        }
        Operation::ReinitProxy {
            token,
            allow_conflict,
            ..
        } => topom.reinit_proxy(expected, &token, allow_conflict).await?,
        _ => return Err(OperationError::WrongService),
    };
    Ok(OperationResponse::Snapshot(snapshot))
}

async fn handle_admin(topom: &Topom, op: Operation) -> HandlerResult {
    match op {
        Operation::Close { .. } => {
            topom.close();
            tracing::info!("topom closed by admin request");
            Ok(OperationResponse::Snapshot(topom.snapshot()))
        }
        _ => Err(OperationError::WrongService),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
