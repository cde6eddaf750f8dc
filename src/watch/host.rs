//! Tracked hosts and their transport ports
//!
//! The host table is the authoritative model of the LAN: one record per
//! source hardware address ever observed, each holding its transport
//! ports. Liveness of every entity is governed by an [`Activity`].
//! Records are never removed; an absent host simply goes inactive until
//! it is seen again.

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::core::activity::{Activity, Expired};
use crate::core::mac::Mac;
use crate::core::window::Window;

pub const HOST_TTL: Duration = Duration::from_secs(120);
pub const PORT_TTL: Duration = Duration::from_secs(30);
pub const ARP_SCAN_TTL: Duration = Duration::from_secs(5);
pub const ARP_WINDOW: Duration = Duration::from_secs(10);
/// ARP packets per second above which a host counts as scanning.
pub const ARP_SCAN_FREQ: f64 = 20.0;

/// Identifies which liveness timer expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpiryKey {
    Host(Mac),
    ArpScan(Mac),
    Port(Mac, PortKind, u16),
}

/// Channel end every activity reports its expiry on.
pub type ExpirySender = mpsc::Sender<Expired<ExpiryKey>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Tcp,
    Udp,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Tcp => write!(f, "tcp"),
            PortKind::Udp => write!(f, "udp"),
        }
    }
}

/// One TCP or UDP port observed on a host.
#[derive(Debug)]
pub struct Port {
    pub num: u16,
    pub kind: PortKind,
    pub activity: Activity<ExpiryKey>,
}

impl Port {
    /// Create a port whose activity is touched on creation.
    pub fn new(mac: Mac, kind: PortKind, num: u16, now: Instant, expired_tx: ExpirySender) -> Self {
        let activity = Activity::new(PORT_TTL, ExpiryKey::Port(mac, kind, num), expired_tx);
        activity.touch(now);
        Self {
            num,
            kind,
            activity,
        }
    }

    pub fn snapshot(&self, now: Instant) -> PortSnapshot {
        PortSnapshot {
            num: self.num,
            kind: self.kind,
            age: self.activity.age(now),
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.kind)
    }
}

/// One observed endpoint, keyed by hardware address.
#[derive(Debug)]
pub struct Host {
    pub mac: Mac,
    /// Most recently observed non-zero address of each family.
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    /// Most recently DHCP-advertised name.
    pub hostname: Option<String>,
    pub tcp: HashMap<u16, Port>,
    pub udp: HashMap<u16, Port>,
    pub activity: Activity<ExpiryKey>,
    /// Active while the host is mid ARP scan.
    pub arp_scan: Activity<ExpiryKey>,
    /// ARP packets seen over the trailing window.
    pub arp_window: Window,
}

impl Host {
    /// Create a host whose activity is touched on creation.
    pub fn new(mac: Mac, now: Instant, expired_tx: ExpirySender) -> Self {
        let activity = Activity::new(HOST_TTL, ExpiryKey::Host(mac.clone()), expired_tx.clone());
        activity.touch(now);
        let arp_scan = Activity::new(ARP_SCAN_TTL, ExpiryKey::ArpScan(mac.clone()), expired_tx);
        Self {
            mac,
            ipv4: None,
            ipv6: None,
            hostname: None,
            tcp: HashMap::new(),
            udp: HashMap::new(),
            activity,
            arp_scan,
            arp_window: Window::new(ARP_WINDOW),
        }
    }

    pub fn port(&self, kind: PortKind, num: u16) -> Option<&Port> {
        match kind {
            PortKind::Tcp => self.tcp.get(&num),
            PortKind::Udp => self.udp.get(&num),
        }
    }

    /// Currently active TCP port numbers, sorted.
    pub fn active_tcp(&self) -> Vec<u16> {
        Self::active(&self.tcp)
    }

    /// Currently active UDP port numbers, sorted.
    pub fn active_udp(&self) -> Vec<u16> {
        Self::active(&self.udp)
    }

    fn active(ports: &HashMap<u16, Port>) -> Vec<u16> {
        let mut nums: Vec<u16> = ports
            .values()
            .filter(|p| p.activity.is_active())
            .map(|p| p.num)
            .collect();
        nums.sort_unstable();
        nums
    }

    /// Owned copy of the host's current state, safe to hand downstream.
    pub fn snapshot(&self, now: Instant) -> HostSnapshot {
        HostSnapshot {
            mac: self.mac.clone(),
            ipv4: self.ipv4,
            ipv6: self.ipv6,
            hostname: self.hostname.clone(),
            tcp: self.active_tcp(),
            udp: self.active_udp(),
            age: self.activity.age(now),
            up: self.activity.up(now),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            host_parts(self.hostname.as_deref(), &self.mac, self.ipv4)
        )
    }
}

/// Shared `Host(hostname, mac, ip)` rendering, skipping absent parts.
fn host_parts(hostname: Option<&str>, mac: &Mac, ipv4: Option<Ipv4Addr>) -> String {
    let mut parts = Vec::new();
    if let Some(name) = hostname {
        parts.push(name.to_string());
    }
    parts.push(mac.to_string());
    if let Some(ip) = ipv4 {
        parts.push(ip.to_string());
    }
    format!("Host({})", parts.join(", "))
}

/// Immutable copy of a host at one moment, carried inside events.
#[derive(Debug, Clone, Serialize)]
pub struct HostSnapshot {
    pub mac: Mac,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub hostname: Option<String>,
    pub tcp: Vec<u16>,
    pub udp: Vec<u16>,
    /// Time since the host was first seen.
    pub age: Duration,
    /// Time since the current episode began.
    pub up: Duration,
}

impl fmt::Display for HostSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            host_parts(self.hostname.as_deref(), &self.mac, self.ipv4)
        )
    }
}

/// Immutable copy of a port at one moment, carried inside events.
#[derive(Debug, Clone, Serialize)]
pub struct PortSnapshot {
    pub num: u16,
    pub kind: PortKind,
    pub age: Duration,
}

impl fmt::Display for PortSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.kind)
    }
}

/// Hosts keyed by hardware address. Owned by the ingest task; timer
/// callbacks only ever read it through snapshots.
#[derive(Debug, Default)]
pub struct HostTable {
    hosts: HashMap<Mac, Host>,
}

impl HostTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, mac: &Mac) -> Option<&Host> {
        self.hosts.get(mac)
    }

    pub fn get_mut(&mut self, mac: &Mac) -> Option<&mut Host> {
        self.hosts.get_mut(mac)
    }

    pub fn contains(&self, mac: &Mac) -> bool {
        self.hosts.contains_key(mac)
    }

    pub fn insert(&mut self, host: Host) {
        self.hosts.insert(host.mac.clone(), host);
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }
}
