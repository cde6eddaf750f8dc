//! Per-packet observations
//!
//! The decoder reduces each captured frame to a pair of endpoint views:
//! everything the packet reveals about its source and its destination.
//! Views are merged into the host table by the updater; they never
//! reference it.

use std::collections::{BTreeSet, HashMap};
use std::net::{Ipv4Addr, Ipv6Addr};

use tracing::warn;

use super::mac::Mac;

/// Protocol layers the decoder recognizes.
///
/// Layers without a dedicated handler still get counted so consumers can
/// ask "did this packet contain ARP" without re-parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Ethernet,
    Loopback,
    Arp,
    Ipv4,
    Ipv6,
    Tcp,
    Udp,
    Icmpv4,
    Icmpv6,
    Dns,
    Dhcpv4,
    Dhcpv6,
    Payload,
}

/// Facts about a single endpoint observed in one packet.
#[derive(Debug, Clone, Default)]
pub struct View {
    pub mac: Option<Mac>,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub tcp: BTreeSet<u16>,
    pub udp: BTreeSet<u16>,
    pub hostname: Option<String>,
}

impl View {
    /// Record a protocol address whose family is only known by length,
    /// as carried in ARP sender/target fields.
    pub fn note_addr(&mut self, addr: &[u8]) {
        match addr.len() {
            4 => {
                let bytes: [u8; 4] = addr.try_into().expect("length checked");
                self.ipv4 = Some(Ipv4Addr::from(bytes));
            }
            16 => {
                let bytes: [u8; 16] = addr.try_into().expect("length checked");
                self.ipv6 = Some(Ipv6Addr::from(bytes));
            }
            len => warn!("invalid protocol address length {len}"),
        }
    }
}

/// Source and destination views plus the layer census for one packet.
#[derive(Debug, Clone, Default)]
pub struct ViewPair {
    pub src: View,
    pub dst: View,
    pub layers: HashMap<LayerKind, usize>,
}

impl ViewPair {
    /// Count one occurrence of a decoded layer.
    pub fn saw(&mut self, kind: LayerKind) {
        *self.layers.entry(kind).or_insert(0) += 1;
    }

    pub fn count(&self, kind: LayerKind) -> usize {
        self.layers.get(&kind).copied().unwrap_or(0)
    }

    pub fn has(&self, kind: LayerKind) -> bool {
        self.count(kind) > 0
    }
}
