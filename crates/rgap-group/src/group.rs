//! A single redundancy group's TTL-indexed membership set.
//!
//! Ingest order is fixed: version check, clock-skew check, signature
//! verification, then insert-or-bump. A background reaper evicts expired
//! entries and fires exactly one leave callback per eviction.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use rgap_core::crypto::{self, Psk};
use rgap_core::wire::{Announcement, VERSION};

/// How often the reaper scans for expired entries.
const REAP_INTERVAL: Duration = Duration::from_millis(200);

/// Floor under which a residual TTL is never allowed to fall, so a
/// just-expired sender timestamp still produces an observable join/leave
/// pair instead of being dropped before any reader can see it.
const MIN_RESIDUAL_TTL: Duration = Duration::from_millis(1);

type Callback = Arc<dyn Fn(IpAddr) + Send + Sync>;

/// A live membership entry: an announced address and when it expires.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub address: IpAddr,
    pub expires_at: Instant,
}

impl Entry {
    pub fn ttl(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    Bumped,
    Unchanged,
    DroppedWrongVersion,
    DroppedClockSkew,
    DroppedBadSignature,
}

enum SubKind {
    Join,
    Leave,
}

/// Handle returned by [`Group::on_join`]/[`Group::on_leave`]. Unsubscribing
/// after the group has been dropped or stopped is a harmless no-op.
pub struct Unsubscribe {
    inner: Weak<Inner>,
    id: u64,
    kind: SubKind,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            match self.kind {
                SubKind::Join => inner.join_subs.remove(&self.id),
                SubKind::Leave => inner.leave_subs.remove(&self.id),
            };
        }
    }
}

struct Inner {
    id: u64,
    psk: Psk,
    expire: Duration,
    clock_skew: Duration,
    readiness_delay: Duration,
    entries: DashMap<IpAddr, Instant>,
    join_subs: DashMap<u64, Callback>,
    leave_subs: DashMap<u64, Callback>,
    next_sub_id: AtomicU64,
    ready: AtomicBool,
    readiness_notify: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A single redundancy group. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Group(Arc<Inner>);

impl Group {
    pub fn new(id: u64, psk: Psk, expire: Duration, clock_skew: Duration, readiness_delay: Duration) -> Self {
        let clock_skew = if clock_skew.is_zero() || clock_skew > expire {
            expire
        } else {
            clock_skew
        };
        Self(Arc::new(Inner {
            id,
            psk,
            expire,
            clock_skew,
            readiness_delay,
            entries: DashMap::new(),
            join_subs: DashMap::new(),
            leave_subs: DashMap::new(),
            next_sub_id: AtomicU64::new(0),
            ready: AtomicBool::new(false),
            readiness_notify: Notify::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Start the reaper and readiness timer. Idempotent only if called once;
    /// calling twice spawns duplicate background tasks.
    pub async fn start(&self) {
        let reaper = {
            let inner = self.0.clone();
            tokio::spawn(async move { reap_loop(inner).await })
        };

        let readiness = {
            let inner = self.0.clone();
            let delay = inner.readiness_delay;
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                inner.ready.store(true, Ordering::SeqCst);
                inner.readiness_notify.notify_waiters();
            })
        };

        let mut tasks = self.0.tasks.lock().unwrap();
        tasks.push(reaper);
        tasks.push(readiness);
    }

    pub async fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.0.tasks.lock().unwrap();
            std::mem::take(&mut *tasks)
        };
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Apply the ingest policy to a decoded announcement.
    pub fn ingest(&self, announcement: &Announcement) -> IngestOutcome {
        let data = announcement.data;
        if data.version() != VERSION {
            return IngestOutcome::DroppedWrongVersion;
        }

        let sender_time = UNIX_EPOCH + Duration::from_micros(data.timestamp_micros().max(0) as u64);
        let now_wall = SystemTime::now();
        let skew = now_wall
            .duration_since(sender_time)
            .unwrap_or_else(|e| e.duration());
        if skew > self.0.clock_skew {
            return IngestOutcome::DroppedClockSkew;
        }

        match crypto::verify(announcement, &self.0.psk) {
            Ok(true) => {}
            Ok(false) => return IngestOutcome::DroppedBadSignature,
            Err(e) => {
                tracing::error!(group = self.0.id, error = %e, "signature computation failed");
                return IngestOutcome::DroppedBadSignature;
            }
        }

        let address = address_from_bytes(&data.announced_address);
        let expire_at_wall = sender_time + self.0.expire;
        let residual = expire_at_wall
            .duration_since(now_wall)
            .unwrap_or(Duration::ZERO)
            .max(MIN_RESIDUAL_TTL);
        let expires_at = Instant::now() + residual;

        let mut inserted = false;
        let mut extended = false;
        self.0
            .entries
            .entry(address)
            .and_modify(|existing| {
                if expires_at > *existing {
                    *existing = expires_at;
                    extended = true;
                }
            })
            .or_insert_with(|| {
                inserted = true;
                expires_at
            });

        if inserted {
            notify(&self.0.join_subs, address);
            IngestOutcome::Inserted
        } else if extended {
            IngestOutcome::Bumped
        } else {
            IngestOutcome::Unchanged
        }
    }

    /// Point-in-time snapshot of live entries.
    pub fn snapshot(&self) -> Vec<Entry> {
        let now = Instant::now();
        self.0
            .entries
            .iter()
            .filter(|e| *e.value() > now)
            .map(|e| Entry {
                address: *e.key(),
                expires_at: *e.value(),
            })
            .collect()
    }

    pub fn ready(&self) -> bool {
        self.0.ready.load(Ordering::SeqCst)
    }

    /// Resolves once the group becomes ready. Resolves immediately if it
    /// already is.
    pub async fn readiness_barrier(&self) {
        loop {
            if self.ready() {
                return;
            }
            let notified = self.0.readiness_notify.notified();
            if self.ready() {
                return;
            }
            notified.await;
        }
    }

    pub fn on_join(&self, cb: impl Fn(IpAddr) + Send + Sync + 'static) -> Unsubscribe {
        let id = self.0.next_sub_id.fetch_add(1, Ordering::SeqCst);
        self.0.join_subs.insert(id, Arc::new(cb));
        Unsubscribe {
            inner: Arc::downgrade(&self.0),
            id,
            kind: SubKind::Join,
        }
    }

    pub fn on_leave(&self, cb: impl Fn(IpAddr) + Send + Sync + 'static) -> Unsubscribe {
        let id = self.0.next_sub_id.fetch_add(1, Ordering::SeqCst);
        self.0.leave_subs.insert(id, Arc::new(cb));
        Unsubscribe {
            inner: Arc::downgrade(&self.0),
            id,
            kind: SubKind::Leave,
        }
    }
}

fn notify(subs: &DashMap<u64, Callback>, address: IpAddr) {
    for entry in subs.iter() {
        (entry.value())(address);
    }
}

async fn reap_loop(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    loop {
        interval.tick().await;
        let now = Instant::now();
        let mut expired = Vec::new();
        inner.entries.retain(|addr, expires_at| {
            let alive = *expires_at > now;
            if !alive {
                expired.push(*addr);
            }
            alive
        });
        for addr in expired {
            notify(&inner.leave_subs, addr);
        }
    }
}

fn address_from_bytes(bytes: &[u8; 16]) -> IpAddr {
    let v6 = std::net::Ipv6Addr::from(*bytes);
    match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    }
}
