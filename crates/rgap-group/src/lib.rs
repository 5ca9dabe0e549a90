//! Per-group membership engine: TTL-indexed address sets fed by validated
//! announcements, with join/leave subscriptions and a readiness barrier.

pub mod bridge;
pub mod group;

pub use bridge::{GroupBridge, GroupSet};
pub use group::{Entry, Group, IngestOutcome, Unsubscribe};
