//! End-to-end scenarios exercising the wire format, group membership, and
//! output plugins together rather than in isolation.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::UdpSocket;
use tokio::time::timeout;

use rgap_core::config::{OutputConfig, OutputKind};
use rgap_core::crypto::{seal, verify, Psk};
use rgap_core::wire::{Announcement, AnnouncementData, VERSION};
use rgap_group::{Group, GroupBridge, GroupSet};

const LOCALHOST_MAPPED: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff, 192, 0, 2, 7];

fn announce_at(redundancy_id: u64, ts: SystemTime, addr: [u8; 16], psk: &Psk) -> Announcement {
    let micros = ts.duration_since(UNIX_EPOCH).unwrap().as_micros() as i64;
    let data = AnnouncementData::new(VERSION, redundancy_id, micros, addr);
    seal(data, psk).unwrap()
}

/// Scenario 1: round-trip a fixed announcement and verify it under the
/// right and wrong PSK.
#[test]
fn round_trip_fixture_verifies_under_right_psk_only() {
    let psk = Psk::from_bytes([0u8; 32]);
    let announcement = announce_at(42, UNIX_EPOCH, LOCALHOST_MAPPED, &psk);

    let bytes = announcement.marshal();
    let recovered = Announcement::unmarshal(&bytes).unwrap();
    assert_eq!(recovered, announcement);

    assert!(verify(&recovered, &psk).unwrap());

    let mut wrong = [0u8; 32];
    wrong[0] = 1;
    assert!(!verify(&recovered, &Psk::from_bytes(wrong)).unwrap());
}

/// Scenario 2: happy-path ingest through a `Group`. Membership appears,
/// then is reaped after its expiry.
#[tokio::test]
async fn happy_path_ingest_then_reaped_after_expire() {
    let psk = Psk::from_bytes([0u8; 32]);
    let group = Group::new(7, psk.clone(), Duration::from_secs(10), Duration::from_secs(2), Duration::ZERO);
    group.start().await;

    let announcement = announce_at(7, SystemTime::now(), LOCALHOST_MAPPED, &psk);
    group.ingest(&announcement);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(group.snapshot().len(), 1);

    let left = Arc::new(std::sync::Mutex::new(Vec::new()));
    let left_clone = left.clone();
    let _unsub = group.on_leave(move |addr| left_clone.lock().unwrap().push(addr));

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(group.snapshot().is_empty());
    assert_eq!(left.lock().unwrap().len(), 1);

    group.stop().await;
}

/// Scenario 3: a timestamp outside the clock-skew window is rejected and
/// membership never appears.
#[tokio::test]
async fn clock_skew_rejection_keeps_group_empty() {
    let psk = Psk::from_bytes([0u8; 32]);
    let group = Group::new(7, psk.clone(), Duration::from_secs(30), Duration::from_secs(2), Duration::ZERO);
    group.start().await;

    let stale = SystemTime::now() - Duration::from_secs(10);
    group.ingest(&announce_at(7, stale, LOCALHOST_MAPPED, &psk));

    assert!(group.snapshot().is_empty());
    group.stop().await;
}

/// Scenario 4: an announcement signed with the wrong PSK never establishes
/// membership.
#[tokio::test]
async fn wrong_psk_rejection_keeps_group_empty() {
    let real_psk = Psk::from_bytes([0u8; 32]);
    let mut wrong = [0u8; 32];
    wrong[0] = 1;
    let wrong_psk = Psk::from_bytes(wrong);

    let group = Group::new(7, real_psk, Duration::from_secs(30), Duration::from_secs(5), Duration::ZERO);
    group.start().await;

    group.ingest(&announce_at(7, SystemTime::now(), LOCALHOST_MAPPED, &wrong_psk));

    assert!(group.snapshot().is_empty());
    group.stop().await;
}

/// Scenario 5: the DNS output plugin falls back to configured static
/// addresses when a mapped group has no live members, and answers a
/// mismatched-family query with NOERROR and no records.
#[tokio::test]
async fn dns_output_falls_back_when_group_is_empty() {
    use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
    use hickory_proto::rr::{DNSClass, Name, RecordType};
    use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
    use rgap_outputs::dns::{DnsMapping, DnsSpec};
    use rgap_outputs::Output;

    let group = Group::new(7, Psk::from_bytes([0u8; 32]), Duration::from_secs(10), Duration::from_secs(10), Duration::ZERO);
    group.start().await;
    group.readiness_barrier().await;
    let bridge: Arc<dyn GroupBridge> = Arc::new(GroupSet::new(vec![group.clone()]));

    let mut mappings = HashMap::new();
    mappings.insert(
        "svc.".to_string(),
        DnsMapping { group: 7, fallback_addresses: vec!["192.0.2.1".parse().unwrap()] },
    );

    // Bind our own ephemeral port first so we know the address to query
    // before handing it to the server.
    let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let bind_addr = probe.local_addr().unwrap();
    drop(probe);

    let spec = DnsSpec { bind_address: bind_addr.to_string(), mappings, compress: false };
    let server = rgap_outputs::dns::DnsServer::new(spec, bridge);
    server.start().await.unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(bind_addr).await.unwrap();

    let a_response = query(&client, "svc.", RecordType::A).await;
    assert_eq!(a_response.response_code(), ResponseCode::NoError);
    assert_eq!(a_response.answers().len(), 1);
    assert_eq!(a_response.answers()[0].ttl(), 0);

    let aaaa_response = query(&client, "svc.", RecordType::AAAA).await;
    assert_eq!(aaaa_response.response_code(), ResponseCode::NoError);
    assert!(aaaa_response.answers().is_empty());

    server.stop().await;
    group.stop().await;

    async fn query(socket: &UdpSocket, name: &str, qtype: RecordType) -> Message {
        let mut msg = Message::new();
        msg.set_id(0x1234);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.set_recursion_desired(true);

        let mut query = Query::new();
        query.set_name(Name::from_str(name).unwrap());
        query.set_query_type(qtype);
        query.set_query_class(DNSClass::IN);
        msg.add_query(query);

        let bytes = msg.to_bytes().unwrap();
        socket.send(&bytes).await.unwrap();

        let mut buf = vec![0u8; 512];
        let len = timeout(Duration::from_secs(2), socket.recv(&mut buf)).await.unwrap().unwrap();
        Message::from_bytes(&buf[..len]).unwrap()
    }
}

/// Scenario 6: the sync-command output, built through the same
/// config-decoding path the listener uses, coalesces a burst of join
/// events into at most two runs.
#[tokio::test]
async fn sync_command_output_coalesces_event_bursts() {
    use rgap_outputs::Output;

    let group = Group::new(7, Psk::from_bytes([0u8; 32]), Duration::from_secs(60), Duration::from_secs(60), Duration::ZERO);
    group.start().await;
    let bridge: Arc<dyn GroupBridge> = Arc::new(GroupSet::new(vec![group.clone()]));

    let counter = tempfile::NamedTempFile::new().unwrap();
    let counter_path = counter.path().to_str().unwrap().to_string();

    let spec_yaml = serde_yaml::from_str(&format!(
        r#"
command: ["/bin/sh", "-c", "sleep 0.2; echo run >> {counter_path}"]
group: 7
no_wait: false
"#,
    ))
    .unwrap();
    let config = OutputConfig { kind: OutputKind::Command, spec: spec_yaml };
    let output = rgap_outputs::build(&config, bridge).unwrap();

    output.start().await.unwrap();

    for i in 0..50u8 {
        let addr = IpAddr::from([10, 0, 0, i]);
        group.ingest(&announce_at(7, SystemTime::now(), to_mapped(addr), &Psk::from_bytes([0u8; 32])));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    output.stop().await;
    group.stop().await;

    let runs = std::fs::read_to_string(&counter_path).unwrap().lines().count();
    assert!(runs <= 2, "expected at most two coalesced runs, got {runs}");
}

fn to_mapped(addr: IpAddr) -> [u8; 16] {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

/// Scenario 2 continuation: a real `rgap_net::Agent` one-shot send, received
/// by a real `UdpSource` and ingested into a `Group`. No listener plumbing,
/// just the pieces an agent and a listener share.
#[tokio::test]
async fn agent_send_is_received_by_udp_source_and_ingested() {
    use rgap_core::config::AgentConfig;
    use rgap_net::{Agent, UdpSource};

    let psk = Psk::from_bytes([0u8; 32]);
    let group = Group::new(7, psk.clone(), Duration::from_secs(10), Duration::from_secs(5), Duration::ZERO);
    group.start().await;

    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let server_addr: SocketAddr = server.local_addr().unwrap();
    drop(server);

    let dispatch_group = group.clone();
    let dispatch: Arc<dyn Fn(&str, Announcement) + Send + Sync> = Arc::new(move |_label: &str, announcement: Announcement| {
        dispatch_group.ingest(&announcement);
    });
    let source = UdpSource::new("test", server_addr.to_string(), dispatch);
    source.start().await.unwrap();

    let agent = Agent::new(AgentConfig {
        group: 7,
        address: "10.0.0.9".parse().unwrap(),
        psk,
        interval: Duration::ZERO,
        one_shot: true,
        destinations: vec![server_addr.to_string()],
    });
    agent.run().await.unwrap();

    timeout(Duration::from_secs(2), async {
        while group.snapshot().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(group.snapshot().len(), 1);
    source.stop().await;
    group.stop().await;
}
