//! Output plugins: observers of listener group state.
//!
//! Every plugin implements [`Output`] and is built from a `kind` +
//! deferred-decode `spec` by [`build`], mirroring the way the listener
//! dispatches wire chunks to services by schema id.

pub mod command;
pub mod dns;
pub mod eventlog;
pub mod hostsfile;
pub mod log;
pub mod noop;

use std::sync::Arc;

use rgap_core::config::OutputConfig;
use rgap_group::GroupBridge;
use thiserror::Error;

/// Lifecycle contract every output plugin satisfies.
#[async_trait::async_trait]
pub trait Output: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;
    async fn stop(&self);
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("output spec for '{kind:?}' is invalid: {source}")]
    InvalidSpec {
        kind: rgap_core::config::OutputKind,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Build a concrete output plugin from its configuration entry.
pub fn build(config: &OutputConfig, bridge: Arc<dyn GroupBridge>) -> Result<Box<dyn Output>, BuildError> {
    use rgap_core::config::OutputKind::*;

    let spec_err = |e| BuildError::InvalidSpec {
        kind: config.kind,
        source: e,
    };

    Ok(match config.kind {
        Noop => Box::new(noop::Noop::new()),
        Log => {
            let spec: log::LogSpec = serde_yaml::from_value(config.spec.clone()).map_err(spec_err)?;
            Box::new(log::LogSnapshot::new(spec, bridge))
        }
        Eventlog => {
            let spec: eventlog::EventLogSpec = serde_yaml::from_value(config.spec.clone()).map_err(spec_err)?;
            Box::new(eventlog::EventLog::new(spec, bridge))
        }
        Hostsfile => {
            let spec: hostsfile::HostsFileSpec = serde_yaml::from_value(config.spec.clone()).map_err(spec_err)?;
            Box::new(hostsfile::HostsFile::new(spec, bridge))
        }
        Dns => {
            let spec: dns::DnsSpec = serde_yaml::from_value(config.spec.clone()).map_err(spec_err)?;
            Box::new(dns::DnsServer::new(spec, bridge))
        }
        Command => {
            let spec: command::CommandSpec = serde_yaml::from_value(config.spec.clone()).map_err(spec_err)?;
            Box::new(command::SyncCommand::new(spec, bridge))
        }
    })
}
