//! DNS output — serves authoritative A/AAAA answers over TCP and UDP for a
//! configured set of names, backed by live group membership.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use hickory_proto::op::{Header, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use hickory_server::ServerFuture;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tokio::net::{TcpListener, UdpSocket};

use rgap_group::GroupBridge;

use crate::Output;

const TCP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsMapping {
    pub group: u64,
    #[serde(default)]
    pub fallback_addresses: Vec<IpAddr>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsSpec {
    pub bind_address: String,
    pub mappings: HashMap<String, DnsMapping>,
    #[serde(default)]
    pub compress: bool,
}

fn normalize_name(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

#[derive(Clone)]
struct Handler {
    bridge: Arc<dyn GroupBridge>,
    mappings: Arc<HashMap<String, DnsMapping>>,
}

impl Handler {
    /// `None` means SERVFAIL: unmapped name or the mapped group isn't ready.
    /// `Some(records)` may be empty (NOERROR, no data for this family).
    fn build_records(&self, name: &Name, qtype: RecordType) -> Option<Vec<Record>> {
        let key = normalize_name(&name.to_ascii());
        let mapping = self.mappings.get(&key)?;

        if self.bridge.group_ready(mapping.group) != Some(true) {
            return None;
        }

        let family_matches = |addr: &IpAddr| match qtype {
            RecordType::A => addr.is_ipv4(),
            RecordType::AAAA => addr.is_ipv6(),
            _ => false,
        };

        let now = Instant::now();
        let snapshot = self.bridge.list_group(mapping.group).unwrap_or_default();
        let mut answers: Vec<(IpAddr, u32)> = snapshot
            .iter()
            .filter(|entry| family_matches(&entry.address))
            .map(|entry| (entry.address, entry.ttl(now).as_secs().min(u32::MAX as u64) as u32))
            .collect();

        if answers.is_empty() {
            answers = mapping
                .fallback_addresses
                .iter()
                .filter(|addr| family_matches(addr))
                .map(|addr| (*addr, 0))
                .collect();
        }

        let mut records: Vec<Record> = answers
            .into_iter()
            .map(|(addr, ttl)| {
                let rdata = match addr {
                    IpAddr::V4(v4) => RData::A(A(v4)),
                    IpAddr::V6(v6) => RData::AAAA(AAAA(v6)),
                };
                Record::from_rdata(name.clone(), ttl, rdata)
            })
            .collect();

        records.shuffle(&mut rand::thread_rng());
        Some(records)
    }

    async fn respond<R: ResponseHandler>(&self, request: &Request, mut response_handle: R) -> ResponseInfo {
        let mut header = Header::response_from_request(request.header());

        let servfail = || {
            let mut header = header;
            header.set_response_code(ResponseCode::ServFail);
            MessageResponseBuilder::from_message_request(request).build_no_records(header)
        };

        let query = request.query();
        if query.query_class() != DNSClass::IN {
            let response = servfail();
            return response_handle.send_response(response).await.unwrap_or_else(|_| header.into());
        }
        if !matches!(query.query_type(), RecordType::A | RecordType::AAAA) {
            let response = servfail();
            return response_handle.send_response(response).await.unwrap_or_else(|_| header.into());
        }

        let name = Name::from(query.name());
        let records = match self.build_records(&name, query.query_type()) {
            Some(records) => records,
            None => {
                let response = servfail();
                return response_handle.send_response(response).await.unwrap_or_else(|_| header.into());
            }
        };

        header.set_response_code(ResponseCode::NoError);
        header.set_answer_count(records.len() as u16);
        let response = MessageResponseBuilder::from_message_request(request).build(header, records.iter(), &[], &[], &[]);
        response_handle.send_response(response).await.unwrap_or_else(|_| header.into())
    }
}

#[async_trait::async_trait]
impl RequestHandler for Handler {
    async fn handle_request<R: ResponseHandler>(&self, request: &Request, response_handle: R) -> ResponseInfo {
        self.respond(request, response_handle).await
    }
}

pub struct DnsServer {
    spec: DnsSpec,
    bridge: Arc<dyn GroupBridge>,
    tcp_server: Mutex<Option<ServerFuture<Handler>>>,
    udp_server: Mutex<Option<ServerFuture<Handler>>>,
}

impl DnsServer {
    pub fn new(spec: DnsSpec, bridge: Arc<dyn GroupBridge>) -> Self {
        let mappings = spec
            .mappings
            .iter()
            .map(|(name, mapping)| (normalize_name(name), mapping.clone()))
            .collect();
        Self {
            spec: DnsSpec { mappings, ..spec },
            bridge,
            tcp_server: Mutex::new(None),
            udp_server: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Output for DnsServer {
    async fn start(&self) -> anyhow::Result<()> {
        let handler = Handler {
            bridge: self.bridge.clone(),
            mappings: Arc::new(self.spec.mappings.clone()),
        };

        let tcp_listener = TcpListener::bind(&self.spec.bind_address)
            .await
            .with_context(|| format!("dns output: tcp bind to {} failed", self.spec.bind_address))?;

        let udp_socket = match UdpSocket::bind(&self.spec.bind_address).await {
            Ok(socket) => socket,
            Err(e) => {
                drop(tcp_listener);
                return Err(e).with_context(|| format!("dns output: udp bind to {} failed", self.spec.bind_address));
            }
        };

        let mut tcp_server = ServerFuture::new(handler.clone());
        tcp_server.register_listener(tcp_listener, TCP_TIMEOUT);

        let mut udp_server = ServerFuture::new(handler);
        udp_server.register_socket(udp_socket);

        *self.tcp_server.lock().unwrap() = Some(tcp_server);
        *self.udp_server.lock().unwrap() = Some(udp_server);

        tracing::info!(bind_address = %self.spec.bind_address, "started dns output plugin");
        Ok(())
    }

    async fn stop(&self) {
        let udp = self.udp_server.lock().unwrap().take();
        if let Some(mut udp) = udp {
            let _ = udp.shutdown_gracefully().await;
        }
        let tcp = self.tcp_server.lock().unwrap().take();
        if let Some(mut tcp) = tcp {
            let _ = tcp.shutdown_gracefully().await;
        }
        tracing::info!(bind_address = %self.spec.bind_address, "stopped dns output plugin");
    }
}
