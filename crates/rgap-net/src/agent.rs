//! The announcement agent: periodically (or once) signs and sends an
//! announcement to a set of destinations.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use rgap_core::config::AgentConfig;
use rgap_core::crypto::seal;
use rgap_core::wire::{Announcement, AnnouncementData, VERSION};

use crate::iface;

#[derive(Debug, Error)]
#[error("{} send failures: {}", .0.len(), .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
pub struct SendErrors(pub Vec<SendError>);

#[derive(Debug, Error)]
#[error("send to {destination}: {source}")]
pub struct SendError {
    pub destination: String,
    #[source]
    pub source: std::io::Error,
}

pub struct Agent {
    config: AgentConfig,
    cancel: CancellationToken,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs until cancelled (periodic mode) or until one pass completes
    /// (one-shot mode, `config.one_shot == true`).
    pub async fn run(&self) -> Result<(), SendErrors> {
        if self.config.one_shot {
            return self.tick().await;
        }

        let mut interval = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = interval.tick() => {
                    if let Err(errors) = self.tick().await {
                        tracing::warn!(failures = errors.0.len(), "announcement tick had send failures");
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<(), SendErrors> {
        let announcement = self.build_announcement();
        let bytes = announcement.marshal();

        // One-shot sends run unbounded; periodic sends are capped to the
        // tick interval so a stuck send can't pile up behind the next tick.
        let send_timeout = if self.config.one_shot { None } else { Some(self.config.interval) };

        let mut handles = Vec::new();
        for destination in &self.config.destinations {
            let destination = destination.clone();
            let bytes = bytes;
            handles.push(tokio::spawn(async move { send_one(&destination, &bytes, send_timeout).await }));
        }

        let mut errors = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(join_err) => errors.push(SendError {
                    destination: "<task panicked>".to_string(),
                    source: std::io::Error::other(join_err.to_string()),
                }),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SendErrors(errors))
        }
    }

    fn build_announcement(&self) -> Announcement {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let data = AnnouncementData::new(
            VERSION,
            self.config.group,
            now.as_micros() as i64,
            to_mapped_bytes(self.config.address),
        );
        seal(data, &self.config.psk).expect("32-byte PSK always yields a valid HMAC key")
    }
}

fn to_mapped_bytes(addr: IpAddr) -> [u8; 16] {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

async fn send_one(destination: &str, bytes: &[u8; 66], send_timeout: Option<Duration>) -> Result<(), SendError> {
    let (addr_part, iface_part) = destination.split_once('@').map_or((destination, None), |(a, b)| (a, Some(b)));
    let to_err = |source: std::io::Error| SendError {
        destination: destination.to_string(),
        source,
    };

    let target: SocketAddr = addr_part.parse().map_err(|e: std::net::AddrParseError| {
        to_err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))
    })?;

    let socket = match iface_part {
        Some(spec) => {
            let resolved = iface::resolve(spec)
                .map_err(|e| to_err(std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string())))?;
            bind_socket(SocketAddr::new(resolved.address, 0)).map_err(to_err)?
        }
        None => {
            let unspecified = if target.is_ipv4() {
                SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0)
            } else {
                SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0)
            };
            bind_socket(unspecified).map_err(to_err)?
        }
    };

    let socket = UdpSocket::from_std(socket).map_err(to_err)?;
    match send_timeout {
        Some(timeout) => {
            tokio::time::timeout(timeout, socket.send_to(bytes, target))
                .await
                .map_err(|_| to_err(std::io::Error::new(std::io::ErrorKind::TimedOut, "send timed out")))?
                .map_err(to_err)?;
        }
        None => {
            socket.send_to(bytes, target).await.map_err(to_err)?;
        }
    }
    Ok(())
}

fn bind_socket(local: SocketAddr) -> std::io::Result<std::net::UdpSocket> {
    let domain = if local.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&local.into())?;
    Ok(socket.into())
}
