//! Operation types carried through the mutation pipeline.
//!
//! Every admin mutation becomes one `Operation` variant. The variant names the
//! target and arguments; the shared [`OperationContext`] carries the caller's
//! capability token, the snapshot version it observed, and the time budget.

use std::sync::Arc;

use topom_core::Snapshot;

use crate::cluster::{RebalancePlan, TopomError};

/// Service names used to route operations to domain services.
pub mod service_names {
    pub const SLOTS: &str = "slots";
    pub const GROUPS: &str = "groups";
    pub const SENTINELS: &str = "sentinels";
    pub const PROXIES: &str = "proxies";
    pub const ADMIN: &str = "admin";
}

// ---------------------------------------------------------------------------
// OperationContext
// ---------------------------------------------------------------------------

/// Context carried with every operation through the pipeline.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub call_id: u64,
    pub service_name: &'static str,
    /// Capability token presented by the caller.
    pub xauth: String,
    /// Snapshot version the caller observed; `None` skips the check.
    pub expected_version: Option<u64>,
    pub call_timeout_ms: u64,
}

impl OperationContext {
    #[must_use]
    pub fn new(
        call_id: u64,
        service_name: &'static str,
        xauth: impl Into<String>,
        expected_version: Option<u64>,
        call_timeout_ms: u64,
    ) -> Self {
        Self {
            call_id,
            service_name,
            xauth: xauth.into(),
            expected_version,
            call_timeout_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Typed admin mutations dispatched through the pipeline.
#[derive(Debug)]
pub enum Operation {
    // slots
    CreateSlotAction { ctx: OperationContext, sid: u32, target: u32 },
    CreateSlotActionSome { ctx: OperationContext, count: u32, from: u32, to: u32 },
    CreateSlotActionRange { ctx: OperationContext, begin: u32, end: u32, target: u32 },
    RemoveSlotAction { ctx: OperationContext, sid: u32 },
    SetSlotActionDisabled { ctx: OperationContext, disabled: bool },
    SetSlotActionInterval { ctx: OperationContext, interval_ms: u64 },
    Rebalance { ctx: OperationContext, confirm: bool },

    // groups
    CreateGroup { ctx: OperationContext, gid: u32 },
    RemoveGroup { ctx: OperationContext, gid: u32 },
    AddServer { ctx: OperationContext, gid: u32, addr: String, datacenter: String },
    RemoveServer { ctx: OperationContext, gid: u32, addr: String, allow_conflict: bool },
    PromoteServer { ctx: OperationContext, gid: u32, addr: String },
    PromoteCommit { ctx: OperationContext, gid: u32 },
    CreateSyncAction { ctx: OperationContext, addr: String },
    RemoveSyncAction { ctx: OperationContext, addr: String },
    ResyncGroup { ctx: OperationContext, gid: u32 },
    ResyncAllGroups { ctx: OperationContext },
    EnableReplicaGroups { ctx: OperationContext, gid: u32, addr: String, enabled: bool },
    EnableReplicaGroupsAll { ctx: OperationContext, enabled: bool },

    // sentinels
    AddSentinel { ctx: OperationContext, addr: String },
    DelSentinel { ctx: OperationContext, addr: String, force: bool },
    ResyncSentinels { ctx: OperationContext },

    // proxies
    CreateProxy { ctx: OperationContext, admin_addr: String },
    RemoveProxy { ctx: OperationContext, token: String, force: bool },
    ReinitProxy { ctx: OperationContext, token: String, allow_conflict: bool },

    // admin
    /// Stops accepting mutations; reads keep working.
    Close { ctx: OperationContext },
}

impl Operation {
    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        match self {
            Self::CreateSlotAction { ctx, .. }
            | Self::CreateSlotActionSome { ctx, .. }
            | Self::CreateSlotActionRange { ctx, .. }
            | Self::RemoveSlotAction { ctx, .. }
            | Self::SetSlotActionDisabled { ctx, .. }
            | Self::SetSlotActionInterval { ctx, .. }
            | Self::Rebalance { ctx, .. }
            | Self::CreateGroup { ctx, .. }
            | Self::RemoveGroup { ctx, .. }
            | Self::AddServer { ctx, .. }
            | Self::RemoveServer { ctx, .. }
            | Self::PromoteServer { ctx, .. }
            | Self::PromoteCommit { ctx, .. }
            | Self::CreateSyncAction { ctx, .. }
            | Self::RemoveSyncAction { ctx, .. }
            | Self::ResyncGroup { ctx, .. }
            | Self::ResyncAllGroups { ctx }
            | Self::EnableReplicaGroups { ctx, .. }
            | Self::EnableReplicaGroupsAll { ctx, .. }
            | Self::AddSentinel { ctx, .. }
            | Self::DelSentinel { ctx, .. }
            | Self::ResyncSentinels { ctx }
            | Self::CreateProxy { ctx, .. }
            | Self::RemoveProxy { ctx, .. }
            | Self::ReinitProxy { ctx, .. }
            | Self::Close { ctx } => ctx,
        }
    }

    /// Short name used in logs and metric labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateSlotAction { .. } => "slot_action_create",
            Self::CreateSlotActionSome { .. } => "slot_action_create_some",
            Self::CreateSlotActionRange { .. } => "slot_action_create_range",
            Self::RemoveSlotAction { .. } => "slot_action_remove",
            Self::SetSlotActionDisabled { .. } => "slot_action_disabled",
            Self::SetSlotActionInterval { .. } => "slot_action_interval",
            Self::Rebalance { .. } => "rebalance",
            Self::CreateGroup { .. } => "group_create",
            Self::RemoveGroup { .. } => "group_remove",
            Self::AddServer { .. } => "group_add",
            Self::RemoveServer { .. } => "group_del",
            Self::PromoteServer { .. } => "group_promote",
            Self::PromoteCommit { .. } => "group_promote_commit",
            Self::CreateSyncAction { .. } => "sync_action_create",
            Self::RemoveSyncAction { .. } => "sync_action_remove",
            Self::ResyncGroup { .. } => "group_resync",
            Self::ResyncAllGroups { .. } => "group_resync_all",
            Self::EnableReplicaGroups { .. } => "group_replica_groups",
            Self::EnableReplicaGroupsAll { .. } => "group_replica_groups_all",
            Self::AddSentinel { .. } => "sentinel_add",
            Self::DelSentinel { .. } => "sentinel_del",
            Self::ResyncSentinels { .. } => "sentinel_resync_all",
            Self::CreateProxy { .. } => "proxy_create",
            Self::RemoveProxy { .. } => "proxy_remove",
            Self::ReinitProxy { .. } => "proxy_reinit",
            Self::Close { .. } => "close",
        }
    }
}

// ---------------------------------------------------------------------------
// Responses and errors
// ---------------------------------------------------------------------------

/// Successful response from an operation handler.
#[derive(Debug)]
pub enum OperationResponse {
    /// The snapshot the operation committed (or observed, for no-op commands).
    Snapshot(Arc<Snapshot>),
    /// Rebalance preview or confirmation.
    Rebalance(RebalancePlan),
    Empty,
}

impl OperationResponse {
    /// Snapshot version the caller should carry into its next command.
    #[must_use]
    pub fn version(&self) -> Option<u64> {
        match self {
            Self::Snapshot(s) => Some(s.version),
            Self::Rebalance(plan) => Some(plan.version),
            Self::Empty => None,
        }
    }
}

/// Errors returned by the operation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(transparent)]
    Topom(#[from] TopomError),
    #[error("unknown service: {name}")]
    UnknownService { name: String },
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("wrong service for operation")]
    WrongService,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    /// Machine-readable category for error bodies and metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Topom(e) => e.kind(),
            Self::UnknownService { .. } | Self::WrongService => "routing",
            Self::Timeout { .. } => "timeout",
            Self::Overloaded => "overloaded",
            Self::Internal(_) => "internal",
        }
    }
}
