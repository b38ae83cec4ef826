//! Error taxonomy of topology operations.

/// Errors returned by topology reads, mutations and background drivers.
///
/// Validation and conflict errors are produced before anything changes.
/// External and persistence errors are reported after the committed state has
/// been left well-defined (rolled back, or parked in an intermediate state
/// that a retry resumes from).
#[derive(Debug, thiserror::Error)]
pub enum TopomError {
    /// A precondition failed; nothing was changed.
    #[error("{entity}: {reason}")]
    Validation { entity: String, reason: String },

    /// The caller's snapshot version is stale.
    #[error("snapshot version conflict: expected {expected}, current {current}")]
    Conflict { expected: u64, current: u64 },

    /// A managed server, proxy or sentinel failed or did not answer in time.
    #[error("{target}: {message}")]
    External { target: String, message: String },

    /// The snapshot could not be durably written; the mutation was rolled back.
    #[error("persist snapshot: {0:#}")]
    Persistence(anyhow::Error),

    /// The committed snapshot would break a structural invariant.
    #[error("invariant violated: {0:#}")]
    Invariant(anyhow::Error),

    #[error("invalid xauth")]
    Unauthorized,

    #[error("topom is closed")]
    Closed,

    #[error("{target}: timed out after {timeout_ms}ms")]
    Timeout { target: String, timeout_ms: u64 },
}

/// Convenience alias used throughout the cluster module.
pub type TopomResult<T> = Result<T, TopomError>;

impl TopomError {
    /// Builds a [`TopomError::Validation`] for the named entity.
    pub fn validation(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            entity: entity.into(),
            reason: reason.into(),
        }
    }

    /// Builds a [`TopomError::External`] from any displayable failure.
    pub fn external(target: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::External {
            target: target.into(),
            message: format!("{err:#}"),
        }
    }

    /// Machine-readable category, used in HTTP error bodies and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Conflict { .. } => "conflict",
            Self::External { .. } => "external",
            Self::Persistence(_) => "persistence",
            Self::Invariant(_) => "invariant",
            Self::Unauthorized => "unauthorized",
            Self::Closed => "closed",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// The entity the error is about, when there is one.
    #[must_use]
    pub fn entity(&self) -> Option<&str> {
        match self {
            Self::Validation { entity, .. } => Some(entity),
            Self::External { target, .. } | Self::Timeout { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// Formats a slot entity name, e.g. `slot-[12]`.
pub(crate) fn slot_entity(sid: u32) -> String {
    format!("slot-[{sid}]")
}

/// Formats a group entity name, e.g. `group-[3]`.
pub(crate) fn group_entity(gid: u32) -> String {
    format!("group-[{gid}]")
}

/// Formats a server entity name, e.g. `server-[10.0.0.1:6379]`.
pub(crate) fn server_entity(addr: &str) -> String {
    format!("server-[{addr}]")
}

/// Formats a proxy entity name, e.g. `proxy-[token]`.
pub(crate) fn proxy_entity(token: &str) -> String {
    format!("proxy-[{token}]")
}

/// Formats a sentinel entity name, e.g. `sentinel-[10.0.0.9:26379]`.
pub(crate) fn sentinel_entity(addr: &str) -> String {
    format!("sentinel-[{addr}]")
}
