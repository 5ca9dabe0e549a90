//! Periodic snapshot logger — dumps every configured group's readiness and
//! current membership on a timer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rgap_group::GroupBridge;

use crate::Output;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSpec {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

pub struct LogSnapshot {
    spec: LogSpec,
    bridge: Arc<dyn GroupBridge>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LogSnapshot {
    pub fn new(spec: LogSpec, bridge: Arc<dyn GroupBridge>) -> Self {
        Self {
            spec,
            bridge,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }
}

fn readiness_label(ready: bool) -> &'static str {
    if ready {
        "READY"
    } else {
        "NOT READY"
    }
}

#[async_trait::async_trait]
impl Output for LogSnapshot {
    async fn start(&self) -> anyhow::Result<()> {
        if self.spec.interval.is_zero() {
            anyhow::bail!("log output interval must be positive");
        }

        let bridge = self.bridge.clone();
        let interval_dur = self.spec.interval;
        let cancel = self.cancel.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_dur);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = interval.tick() => dump(&bridge),
                }
            }
        });

        *self.task.lock().unwrap() = Some(task);
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

fn dump(bridge: &Arc<dyn GroupBridge>) {
    tracing::info!("groups snapshot:");
    for id in bridge.groups() {
        let ready = bridge.group_ready(id).unwrap_or(false);
        tracing::info!(group = id, state = readiness_label(ready), "  group");
        for entry in bridge.list_group(id).unwrap_or_default() {
            tracing::info!(group = id, address = %entry.address, "    entry");
        }
    }
}
