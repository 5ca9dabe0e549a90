//! Event log output — logs one line per join/leave, for every configured
//! group by default or a configured subset.

use std::sync::{Arc, Mutex};

use serde::Deserialize;

use rgap_group::GroupBridge;

use crate::Output;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventLogSpec {
    #[serde(default)]
    pub only_groups: Option<Vec<u64>>,
}

pub struct EventLog {
    spec: EventLogSpec,
    bridge: Arc<dyn GroupBridge>,
    subs: Mutex<Vec<rgap_group::group::Unsubscribe>>,
}

impl EventLog {
    pub fn new(spec: EventLogSpec, bridge: Arc<dyn GroupBridge>) -> Self {
        Self {
            spec,
            bridge,
            subs: Mutex::new(Vec::new()),
        }
    }

    fn target_groups(&self) -> Vec<u64> {
        self.spec.only_groups.clone().unwrap_or_else(|| self.bridge.groups())
    }
}

#[async_trait::async_trait]
impl Output for EventLog {
    async fn start(&self) -> anyhow::Result<()> {
        let mut subs = Vec::new();
        for id in self.target_groups() {
            let join_id = id;
            if let Some(unsub) = self.bridge.on_join(
                id,
                Box::new(move |addr| {
                    tracing::info!(group = join_id, address = %addr.to_canonical(), "host has joined group");
                }),
            ) {
                subs.push(unsub);
            }

            let leave_id = id;
            if let Some(unsub) = self.bridge.on_leave(
                id,
                Box::new(move |addr| {
                    tracing::info!(group = leave_id, address = %addr.to_canonical(), "host has left group");
                }),
            ) {
                subs.push(unsub);
            }
        }
        *self.subs.lock().unwrap() = subs;
        Ok(())
    }

    async fn stop(&self) {
        let subs = std::mem::take(&mut *self.subs.lock().unwrap());
        for unsub in subs {
            unsub.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgap_core::crypto::{seal, Psk};
    use rgap_core::wire::{AnnouncementData, VERSION};
    use rgap_group::{Group, GroupSet};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    const LOCALHOST_MAPPED: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 10, 0, 0, 1];

    #[tokio::test]
    async fn defaults_to_every_group_when_unconfigured() {
        let psk = Psk::from_bytes([0u8; 32]);
        let group = Group::new(5, psk.clone(), Duration::from_millis(200), Duration::from_secs(5), Duration::ZERO);
        group.start().await;
        let set = Arc::new(GroupSet::new(vec![group.clone()]));

        let output = EventLog::new(EventLogSpec::default(), set);
        output.start().await.unwrap();

        let micros = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_micros() as i64;
        let data = AnnouncementData::new(VERSION, 5, micros, LOCALHOST_MAPPED);
        group.ingest(&seal(data, &psk).unwrap());

        output.stop().await;
        group.stop().await;
    }
}
