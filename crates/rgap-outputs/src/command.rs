//! Sync-command output — runs an external command on every group join/leave.
//!
//! Two dispatch modes, mirroring the original implementation:
//!   - default (`no_wait = false`): a single worker drains a depth-1
//!     coalescing queue. A run already in progress absorbs any number of
//!     events that arrive before it finishes; at most one more run is queued.
//!   - `no_wait = true`: every event spawns its own concurrent run.

use std::net::IpAddr;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command as ProcessCommand;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rgap_group::group::Unsubscribe;
use rgap_group::GroupBridge;

use crate::Output;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandSpec {
    pub group: u64,
    pub command: Vec<String>,
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub no_wait: bool,
    #[serde(default, with = "humantime_serde::option")]
    pub wait_delay: Option<Duration>,
}

struct Inner {
    spec: CommandSpec,
    bridge: Arc<dyn GroupBridge>,
    subs: Mutex<Vec<Unsubscribe>>,
    queue_tx: Mutex<Option<mpsc::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    no_wait_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn trigger(self: &Arc<Self>) {
        if self.spec.no_wait {
            let this = self.clone();
            let handle = tokio::spawn(async move {
                run_command(&this.spec, &this.bridge).await;
            });
            self.no_wait_tasks.lock().unwrap().push(handle);
        } else if let Some(tx) = self.queue_tx.lock().unwrap().as_ref() {
            // Non-blocking: if a run is already queued, drop this event —
            // the queued run will observe the up-to-date snapshot anyway.
            let _ = tx.try_send(());
        }
    }
}

pub struct SyncCommand(Arc<Inner>);

impl SyncCommand {
    pub fn new(spec: CommandSpec, bridge: Arc<dyn GroupBridge>) -> Self {
        Self(Arc::new(Inner {
            spec,
            bridge,
            subs: Mutex::new(Vec::new()),
            queue_tx: Mutex::new(None),
            worker: Mutex::new(None),
            no_wait_tasks: Mutex::new(Vec::new()),
        }))
    }
}

#[async_trait::async_trait]
impl Output for SyncCommand {
    async fn start(&self) -> anyhow::Result<()> {
        let inner = &self.0;

        if !inner.spec.no_wait {
            let (tx, mut rx) = mpsc::channel::<()>(1);
            let this = inner.clone();
            let worker = tokio::spawn(async move {
                while rx.recv().await.is_some() {
                    run_command(&this.spec, &this.bridge).await;
                }
            });
            *inner.queue_tx.lock().unwrap() = Some(tx);
            *inner.worker.lock().unwrap() = Some(worker);
        }

        let mut subs = Vec::new();
        let group = inner.spec.group;

        let join_inner = inner.clone();
        if let Some(unsub) = inner
            .bridge
            .on_join(group, Box::new(move |_addr: IpAddr| join_inner.trigger()))
        {
            subs.push(unsub);
        }
        let leave_inner = inner.clone();
        if let Some(unsub) = inner
            .bridge
            .on_leave(group, Box::new(move |_addr: IpAddr| leave_inner.trigger()))
        {
            subs.push(unsub);
        }
        *inner.subs.lock().unwrap() = subs;

        Ok(())
    }

    async fn stop(&self) {
        let inner = &self.0;

        let subs = std::mem::take(&mut *inner.subs.lock().unwrap());
        for unsub in subs {
            unsub.unsubscribe();
        }

        // Dropping the sender ends the worker's recv loop.
        *inner.queue_tx.lock().unwrap() = None;
        let worker = inner.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        let tasks = std::mem::take(&mut *inner.no_wait_tasks.lock().unwrap());
        for task in tasks {
            let _ = task.await;
        }
    }
}

async fn run_command(spec: &CommandSpec, bridge: &Arc<dyn GroupBridge>) {
    let Some((program, args)) = spec.command.split_first() else {
        tracing::warn!("sync command has an empty command line, skipping");
        return;
    };

    let mut cmd = ProcessCommand::new(program);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(error = %e, "failed to spawn sync command");
            return;
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        let snapshot = bridge.list_group(spec.group).unwrap_or_default();
        let mut payload = String::new();
        for entry in &snapshot {
            payload.push_str(&entry.address.to_string());
            payload.push('\n');
        }
        let _ = stdin.write_all(payload.as_bytes()).await;
        drop(stdin);
    }

    let stdout_task = child.stdout.take().map(|out| tokio::spawn(forward_lines("stdout", out)));
    let stderr_task = child.stderr.take().map(|err| tokio::spawn(forward_lines("stderr", err)));

    let wait = child.wait();
    let status = match spec.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("sync command timed out, killing");
                let _ = child.start_kill();
                child.wait().await
            }
        },
        None => wait.await,
    };

    let drain_delay = spec.wait_delay.unwrap_or(Duration::from_secs(5));
    if let Some(task) = stdout_task {
        let _ = tokio::time::timeout(drain_delay, task).await;
    }
    if let Some(task) = stderr_task {
        let _ = tokio::time::timeout(drain_delay, task).await;
    }

    match status {
        Ok(status) => tracing::info!(code = status.code(), "sync command exited"),
        Err(e) => tracing::warn!(error = %e, "sync command wait failed"),
    }
}

async fn forward_lines(stream_name: &'static str, reader: impl tokio::io::AsyncRead + Unpin) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(stream = stream_name, "{line}"),
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(stream = stream_name, error = %e, "error reading command output");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rgap_core::crypto::Psk;
    use rgap_group::{Group, GroupSet};

    #[tokio::test]
    async fn coalesces_bursts_of_events_into_at_most_two_runs() {
        let psk = Psk::from_bytes([0u8; 32]);
        let group = Group::new(9, psk, Duration::from_secs(30), Duration::from_secs(30), Duration::ZERO);
        group.start().await;
        let bridge: Arc<dyn GroupBridge> = Arc::new(GroupSet::new(vec![group.clone()]));

        let counter = tempfile::NamedTempFile::new().unwrap();
        let counter_path = counter.path().to_str().unwrap().to_string();

        let spec = CommandSpec {
            group: 9,
            command: vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                format!("sleep 0.2; echo run >> {counter_path}"),
            ],
            timeout: None,
            no_wait: false,
            wait_delay: Some(Duration::from_millis(50)),
        };

        let output = SyncCommand::new(spec, bridge);
        output.start().await.unwrap();

        for _ in 0..50 {
            output.0.trigger();
        }
        // Give the worker time to pick up the queued run.
        tokio::time::sleep(Duration::from_millis(50)).await;

        output.stop().await;
        group.stop().await;

        let runs = std::fs::read_to_string(&counter_path).unwrap().lines().count();
        assert!(runs <= 2, "expected at most two coalesced runs, got {runs}");
    }
}
