//! Hosts-file output — periodically writes an `/etc/hosts`-style fragment,
//! atomically, for each configured group-to-hostname mapping.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rgap_group::GroupBridge;

use crate::Output;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostMapping {
    pub group: u64,
    pub hostname: String,
    #[serde(default)]
    pub fallback_addresses: Vec<IpAddr>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostsFileSpec {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub filename: PathBuf,
    pub mappings: Vec<HostMapping>,
    #[serde(default)]
    pub prepend_lines: Vec<String>,
    #[serde(default)]
    pub append_lines: Vec<String>,
}

pub struct HostsFile {
    spec: HostsFileSpec,
    bridge: Arc<dyn GroupBridge>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HostsFile {
    pub fn new(spec: HostsFileSpec, bridge: Arc<dyn GroupBridge>) -> Self {
        Self {
            spec,
            bridge,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Output for HostsFile {
    async fn start(&self) -> anyhow::Result<()> {
        if self.spec.interval.is_zero() {
            anyhow::bail!("hostsfile output interval must be positive");
        }

        let spec = self.spec.clone();
        let bridge = self.bridge.clone();
        let cancel = self.cancel.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(spec.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = interval.tick() => {
                        if let Err(e) = dump(&spec, &bridge) {
                            tracing::warn!(error = %e, "hosts file write failed");
                        }
                    }
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

fn dump(spec: &HostsFileSpec, bridge: &Arc<dyn GroupBridge>) -> anyhow::Result<()> {
    let not_ready: Vec<u64> = spec
        .mappings
        .iter()
        .filter(|m| bridge.group_ready(m.group) != Some(true))
        .map(|m| m.group)
        .collect();
    if !not_ready.is_empty() {
        tracing::info!(groups = ?not_ready, "skipping hosts file write, groups not yet ready");
        return Ok(());
    }

    let mut lines = spec.prepend_lines.clone();
    for mapping in &spec.mappings {
        let snapshot = bridge.list_group(mapping.group).unwrap_or_default();
        if snapshot.is_empty() {
            for addr in &mapping.fallback_addresses {
                lines.push(format!("{addr} {}", mapping.hostname));
            }
        } else {
            for entry in &snapshot {
                lines.push(format!("{} {}", entry.address, mapping.hostname));
            }
        }
    }
    lines.extend(spec.append_lines.clone());
    let mut contents = lines.join("\n");
    contents.push('\n');

    let dir = spec.filename.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    use std::io::Write;
    tmp.write_all(contents.as_bytes())?;
    tmp.persist(&spec.filename)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgap_core::crypto::{seal, Psk};
    use rgap_core::wire::{AnnouncementData, VERSION};
    use rgap_group::{Group, GroupSet};
    use std::time::{SystemTime, UNIX_EPOCH};

    const LOCALHOST_MAPPED: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 10, 0, 0, 1];

    #[tokio::test]
    async fn writes_fallback_when_group_empty() {
        let psk = Psk::from_bytes([0u8; 32]);
        let group = Group::new(1, psk, Duration::from_secs(5), Duration::from_secs(5), Duration::ZERO);
        group.start().await;
        group.readiness_barrier().await;
        let set: Arc<dyn GroupBridge> = Arc::new(GroupSet::new(vec![group.clone()]));

        let tmp_dir = tempfile::tempdir().unwrap();
        let filename = tmp_dir.path().join("hosts.fragment");

        let spec = HostsFileSpec {
            interval: Duration::from_millis(50),
            filename: filename.clone(),
            mappings: vec![HostMapping {
                group: 1,
                hostname: "svc.internal".to_string(),
                fallback_addresses: vec!["192.0.2.1".parse().unwrap()],
            }],
            prepend_lines: vec!["# managed".to_string()],
            append_lines: vec![],
        };

        dump(&spec, &set).unwrap();
        let contents = std::fs::read_to_string(&filename).unwrap();
        assert!(contents.contains("# managed"));
        assert!(contents.contains("192.0.2.1 svc.internal"));

        group.stop().await;
    }

    #[tokio::test]
    async fn writes_live_entries_when_group_populated() {
        let psk = Psk::from_bytes([0u8; 32]);
        let group = Group::new(2, psk.clone(), Duration::from_secs(5), Duration::from_secs(5), Duration::ZERO);
        group.start().await;
        group.readiness_barrier().await;

        let micros = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_micros() as i64;
        let data = AnnouncementData::new(VERSION, 2, micros, LOCALHOST_MAPPED);
        group.ingest(&seal(data, &psk).unwrap());

        let set: Arc<dyn GroupBridge> = Arc::new(GroupSet::new(vec![group.clone()]));
        let tmp_dir = tempfile::tempdir().unwrap();
        let filename = tmp_dir.path().join("hosts.fragment");

        let spec = HostsFileSpec {
            interval: Duration::from_millis(50),
            filename: filename.clone(),
            mappings: vec![HostMapping {
                group: 2,
                hostname: "svc.internal".to_string(),
                fallback_addresses: vec![],
            }],
            prepend_lines: vec![],
            append_lines: vec![],
        };

        dump(&spec, &set).unwrap();
        let contents = std::fs::read_to_string(&filename).unwrap();
        assert!(contents.contains("10.0.0.1 svc.internal"));

        group.stop().await;
    }
}
