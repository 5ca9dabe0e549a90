//! The read-only view of listener state that output plugins consume.
//!
//! Outputs never own a `Group` or `Listener` directly — they hold an
//! `Arc<dyn GroupBridge>` back-reference, so the dependency only ever points
//! one way.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::group::{Entry, Group, Unsubscribe};

#[async_trait::async_trait]
pub trait GroupBridge: Send + Sync {
    /// The configured group ids, in listener configuration order.
    fn groups(&self) -> Vec<u64>;

    /// A point-in-time snapshot of a group's live entries. `None` if `id`
    /// is not a configured group.
    fn list_group(&self, id: u64) -> Option<Vec<Entry>>;

    /// Whether a group has passed its readiness delay. `None` if `id` is
    /// not a configured group.
    fn group_ready(&self, id: u64) -> Option<bool>;

    /// Waits until a group becomes ready (or returns immediately if it
    /// already is). `None` if `id` is not a configured group.
    async fn group_readiness_barrier(&self, id: u64) -> Option<()>;

    fn on_join(&self, id: u64, cb: Box<dyn Fn(IpAddr) + Send + Sync>) -> Option<Unsubscribe>;

    fn on_leave(&self, id: u64, cb: Box<dyn Fn(IpAddr) + Send + Sync>) -> Option<Unsubscribe>;
}

/// The concrete bridge the listener hands to every output plugin: a fixed
/// set of groups, keyed by redundancy id, in configuration order.
pub struct GroupSet {
    order: Vec<u64>,
    by_id: HashMap<u64, Group>,
}

impl GroupSet {
    pub fn new(groups: Vec<Group>) -> Self {
        let order = groups.iter().map(Group::id).collect();
        let by_id = groups.into_iter().map(|g| (g.id(), g)).collect();
        Self { order, by_id }
    }

    pub fn get(&self, id: u64) -> Option<&Group> {
        self.by_id.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }
}

#[async_trait::async_trait]
impl GroupBridge for GroupSet {
    fn groups(&self) -> Vec<u64> {
        self.order.clone()
    }

    fn list_group(&self, id: u64) -> Option<Vec<Entry>> {
        self.by_id.get(&id).map(Group::snapshot)
    }

    fn group_ready(&self, id: u64) -> Option<bool> {
        self.by_id.get(&id).map(Group::ready)
    }

    async fn group_readiness_barrier(&self, id: u64) -> Option<()> {
        let group = self.by_id.get(&id)?.clone();
        group.readiness_barrier().await;
        Some(())
    }

    fn on_join(&self, id: u64, cb: Box<dyn Fn(IpAddr) + Send + Sync>) -> Option<Unsubscribe> {
        Some(self.by_id.get(&id)?.on_join(move |addr| cb(addr)))
    }

    fn on_leave(&self, id: u64, cb: Box<dyn Fn(IpAddr) + Send + Sync>) -> Option<Unsubscribe> {
        Some(self.by_id.get(&id)?.on_leave(move |addr| cb(addr)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgap_core::crypto::Psk;
    use std::time::Duration;

    fn group(id: u64) -> Group {
        Group::new(id, Psk::from_bytes([0u8; 32]), Duration::from_secs(1), Duration::from_secs(1), Duration::ZERO)
    }

    #[test]
    fn groups_preserves_configuration_order() {
        let set = GroupSet::new(vec![group(3), group(1), group(2)]);
        assert_eq!(set.groups(), vec![3, 1, 2]);
    }

    #[test]
    fn unknown_group_id_returns_none() {
        let set = GroupSet::new(vec![group(1)]);
        assert!(set.list_group(99).is_none());
        assert!(set.group_ready(99).is_none());
    }
}
