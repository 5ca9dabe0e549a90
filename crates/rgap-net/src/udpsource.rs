//! UDP announcement source — unicast or multicast, with optional `@iface`
//! interface binding, dispatching decoded 66-byte announcements to a
//! listener-supplied callback.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rgap_core::wire::Announcement;

use crate::iface;

type Dispatch = Arc<dyn Fn(&str, Announcement) + Send + Sync>;

/// Split `host:port` or `host:port@iface-spec` into its two parts.
fn split_spec(spec: &str) -> (&str, Option<&str>) {
    match spec.split_once('@') {
        Some((addr, iface)) => (addr, Some(iface)),
        None => (spec, None),
    }
}

/// A single UDP receive endpoint bound for one listener `listen[]` entry.
pub struct UdpSource {
    label: String,
    spec: String,
    dispatch: Dispatch,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpSource {
    pub fn new(label: impl Into<String>, spec: impl Into<String>, dispatch: Dispatch) -> Self {
        Self {
            label: label.into(),
            spec: spec.into(),
            dispatch,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let (addr_part, iface_part) = split_spec(&self.spec);
        let bind_addr: SocketAddr = addr_part
            .parse()
            .with_context(|| format!("invalid bind address '{addr_part}'"))?;

        let iface_addr = match iface_part {
            Some(spec) => Some(iface::resolve(spec).with_context(|| format!("resolving interface '{spec}'"))?),
            None => None,
        };

        let socket = build_socket(bind_addr, iface_addr.as_ref())?;
        let socket = UdpSocket::from_std(socket).context("converting to tokio UdpSocket")?;

        let dispatch = self.dispatch.clone();
        let label = self.label.clone();
        let cancel = self.cancel.clone();

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!(label, "udp source stopping");
                        return;
                    }
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((len, _from)) => {
                                if len != rgap_core::wire::ANNOUNCEMENT_SIZE {
                                    continue;
                                }
                                match Announcement::unmarshal(&buf[..len]) {
                                    Ok(announcement) => dispatch(&label, announcement),
                                    Err(e) => tracing::debug!(label, error = %e, "failed to decode announcement"),
                                }
                            }
                            Err(e) => {
                                tracing::warn!(label, error = %e, "recv_from failed");
                            }
                        }
                    }
                }
            }
        });

        *self.task.lock().unwrap() = Some(task);
        Ok(())
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

fn build_socket(bind_addr: SocketAddr, iface_addr: Option<&iface::InterfaceAddr>) -> Result<std::net::UdpSocket> {
    let domain = if bind_addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;
    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    if bind_addr.ip().is_multicast() {
        match bind_addr.ip() {
            IpAddr::V4(mcast) => {
                let local = match iface_addr {
                    Some(i) => match i.address {
                        IpAddr::V4(v4) => v4,
                        IpAddr::V6(_) => std::net::Ipv4Addr::UNSPECIFIED,
                    },
                    None => std::net::Ipv4Addr::UNSPECIFIED,
                };
                let any = SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), bind_addr.port());
                socket.bind(&any.into()).context("bind()")?;
                socket.join_multicast_v4(&mcast, &local).context("IP_ADD_MEMBERSHIP")?;
            }
            IpAddr::V6(mcast) => {
                let if_index = iface_addr.map(|i| i.index).unwrap_or(0);
                let any = SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), bind_addr.port());
                socket.set_only_v6(true).context("IPV6_V6ONLY")?;
                socket.bind(&any.into()).context("bind()")?;
                socket
                    .join_multicast_v6(&mcast, if_index)
                    .context("IPV6_JOIN_GROUP")?;
            }
        }
    } else {
        socket.bind(&bind_addr.into()).context("bind()")?;
    }

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_spec_without_iface() {
        assert_eq!(split_spec("0.0.0.0:8271"), ("0.0.0.0:8271", None));
    }

    #[test]
    fn split_spec_with_iface() {
        assert_eq!(split_spec("239.82.71.65:8271@eth0"), ("239.82.71.65:8271", Some("eth0")));
    }
}
