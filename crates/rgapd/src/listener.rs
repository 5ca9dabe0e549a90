//! Listener orchestration: wires UDP sources, redundancy groups, and output
//! plugins together and runs them until terminated.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;

use rgap_core::config::ListenerConfig;
use rgap_core::wire::Announcement;
use rgap_group::{Group, GroupBridge, GroupSet};
use rgap_net::UdpSource;
use rgap_outputs::Output;

pub struct Listener {
    groups: Arc<GroupSet>,
    sources: Vec<UdpSource>,
    outputs: Vec<Box<dyn Output>>,
}

impl Listener {
    pub fn build(config: &ListenerConfig) -> Result<Self> {
        let groups: Vec<Group> = config
            .groups
            .iter()
            .map(|g| Group::new(g.id, g.psk.clone(), g.expire, g.effective_clock_skew(), g.readiness_delay))
            .collect();
        let group_set = Arc::new(GroupSet::new(groups));

        let dispatch_groups = group_set.clone();
        let dispatch: Arc<dyn Fn(&str, Announcement) + Send + Sync> = Arc::new(move |label: &str, announcement: Announcement| {
            let id = announcement.data.redundancy_id();
            match dispatch_groups.get(id) {
                Some(group) => {
                    let outcome = group.ingest(&announcement);
                    tracing::debug!(label, group = id, ?outcome, "ingested announcement");
                }
                None => tracing::debug!(label, group = id, "announcement for unconfigured group"),
            }
        });

        let sources: Vec<UdpSource> = config
            .listen
            .iter()
            .enumerate()
            .map(|(i, spec)| UdpSource::new(format!("listen[{i}]"), spec.clone(), dispatch.clone()))
            .collect();

        let bridge: Arc<dyn GroupBridge> = group_set.clone();
        let outputs = config
            .outputs
            .iter()
            .map(|output_config| rgap_outputs::build(output_config, bridge.clone()).context("building output plugin"))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            groups: group_set,
            sources,
            outputs,
        })
    }

    /// Starts every component in dependency order and blocks until a
    /// shutdown signal arrives, then tears everything down in reverse. A
    /// start failure aborts further starts and stops whatever did start,
    /// in reverse, before returning the error.
    pub async fn run(self) -> Result<()> {
        for group in self.groups.iter() {
            group.start().await;
        }

        let mut started_sources = Vec::new();
        let mut source_err = None;
        for source in &self.sources {
            match source.start().await {
                Ok(()) => started_sources.push(source),
                Err(e) => {
                    source_err = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = source_err {
            for source in started_sources.iter().rev() {
                source.stop().await;
            }
            for group in self.groups.iter() {
                group.stop().await;
            }
            return Err(e).context("starting udp source");
        }

        let mut started_outputs = Vec::new();
        let mut output_err = None;
        for output in &self.outputs {
            match output.start().await {
                Ok(()) => started_outputs.push(output),
                Err(e) => {
                    output_err = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = output_err {
            for output in started_outputs.iter().rev() {
                output.stop().await;
            }
            for source in started_sources.iter().rev() {
                source.stop().await;
            }
            for group in self.groups.iter() {
                group.stop().await;
            }
            return Err(e).context("starting output plugin");
        }

        tracing::info!(
            groups = self.groups.iter().count(),
            sources = self.sources.len(),
            outputs = self.outputs.len(),
            "listener running"
        );

        shutdown_signal().await;
        tracing::info!("shutdown signal received, stopping");

        for output in self.outputs.iter().rev() {
            output.stop().await;
        }
        for source in self.sources.iter().rev() {
            source.stop().await;
        }
        for group in self.groups.iter() {
            group.stop().await;
        }

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
