//! Topom core: topology data model, persisted snapshot format and status wire types.

pub mod group;
pub mod proxy;
pub mod sentinel;
pub mod slot;
pub mod snapshot;
pub mod stats;
pub mod status;

pub use group::{
    is_valid_server_addr, Group, GroupServer, Promoting, PromotingState, ServerAction,
    ServerActionState, MAX_GROUP_ID,
};
pub use proxy::{Proxy, ProxyModel};
pub use sentinel::{
    MismatchKind, MonitoredMaster, RunIdMismatch, SentinelGroupView, SentinelModel, SentinelNode,
    SentinelReport,
};
pub use slot::{Slot, SlotAction, SlotActionState, SlotMapping, DEFAULT_SLOT_COUNT, MAX_SLOT_COUNT};
pub use snapshot::{
    decode_snapshot, encode_snapshot, SlotActionConfig, Snapshot, DEFAULT_ACTION_INTERVAL_MS,
    MAX_ACTION_INTERVAL_MS, SNAPSHOT_FORMAT,
};
pub use stats::{Health, ProxyStats, SentinelStats, SentinelSummary, ServerStats};
pub use status::{
    CommandReply, ErrorBody, GroupSection, HaStatus, ProxySection, SentinelSection,
    SentinelStatus, ServerStatus, SlotActionProgress, SlotActionSection, StatusFeed,
};
