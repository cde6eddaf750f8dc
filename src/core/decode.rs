//! Frame decoding
//!
//! Walks the protocol stack of one captured frame and fills in a
//! [`ViewPair`] layer by layer. Ethernet, IPv4/IPv6 and TCP/UDP come from
//! `etherparse`; ARP and the DHCP options are carved out of the raw bytes
//! since `etherparse` does not model them.
//!
//! Malformed frames yield `None` and a debug log entry; the capture
//! stream keeps going.

use etherparse::SlicedPacket;
use tracing::debug;

use super::mac::Mac;
use super::view::{LayerKind, ViewPair};

/// Link-layer framing of a capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Ethernet II frames.
    Ethernet,
    /// BSD loopback encapsulation: a 4-byte address-family word, then IP.
    Loopback,
}

const ETHERNET_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_ARP: u16 = 0x0806;
const ETHERTYPE_IPV6: u16 = 0x86dd;

const BOOTP_OP_REQUEST: u8 = 1;
const DHCP_MAGIC: [u8; 4] = [0x63, 0x82, 0x53, 0x63];
const DHCP_OPT_HOSTNAME: u8 = 12;
const DHCP_OPT_END: u8 = 255;

const DHCPV6_MSG_SOLICIT: u8 = 1;
const DHCPV6_OPT_CLIENT_FQDN: u16 = 39;

/// Decode one raw frame into the facts it reveals about its endpoints.
pub fn decode(data: &[u8], link: LinkKind) -> Option<ViewPair> {
    let mut vp = ViewPair::default();
    match link {
        LinkKind::Ethernet => decode_ethernet(&mut vp, data)?,
        LinkKind::Loopback => decode_loopback(&mut vp, data)?,
    }
    Some(vp)
}

fn decode_ethernet(vp: &mut ViewPair, data: &[u8]) -> Option<()> {
    if data.len() < ETHERNET_HEADER_LEN {
        debug!("frame too short for ethernet: {} bytes", data.len());
        return None;
    }
    vp.saw(LayerKind::Ethernet);
    let src: [u8; 6] = data[6..12].try_into().ok()?;
    vp.src.mac = Some(Mac::from_bytes(src));

    let ether_type = u16::from_be_bytes([data[12], data[13]]);
    match ether_type {
        ETHERTYPE_ARP => decode_arp(vp, &data[ETHERNET_HEADER_LEN..]),
        ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => {
            let sliced = match SlicedPacket::from_ethernet(data) {
                Ok(sliced) => sliced,
                Err(e) => {
                    debug!("failed to slice frame: {e}");
                    return None;
                }
            };
            decode_net(vp, &sliced);
            decode_transport(vp, &sliced);
            Some(())
        }
        other => {
            debug!("unhandled ether type {other:#06x}");
            Some(())
        }
    }
}

fn decode_loopback(vp: &mut ViewPair, data: &[u8]) -> Option<()> {
    if data.len() < 4 {
        debug!("frame too short for loopback: {} bytes", data.len());
        return None;
    }
    vp.saw(LayerKind::Loopback);
    let sliced = match SlicedPacket::from_ip(&data[4..]) {
        Ok(sliced) => sliced,
        Err(e) => {
            debug!("failed to slice loopback frame: {e}");
            return None;
        }
    };
    decode_net(vp, &sliced);
    decode_transport(vp, &sliced);
    Some(())
}

fn decode_net(vp: &mut ViewPair, sliced: &SlicedPacket<'_>) {
    match &sliced.net {
        Some(etherparse::NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            vp.saw(LayerKind::Ipv4);
            vp.src.ipv4 = Some(header.source_addr());
            vp.dst.ipv4 = Some(header.destination_addr());
        }
        Some(etherparse::NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            vp.saw(LayerKind::Ipv6);
            vp.src.ipv6 = Some(header.source_addr());
            vp.dst.ipv6 = Some(header.destination_addr());
        }
        _ => {}
    }
}

fn decode_transport(vp: &mut ViewPair, sliced: &SlicedPacket<'_>) {
    match &sliced.transport {
        Some(etherparse::TransportSlice::Tcp(tcp)) => {
            vp.saw(LayerKind::Tcp);
            vp.src.tcp.insert(tcp.source_port());
            vp.dst.tcp.insert(tcp.destination_port());
            if !tcp.payload().is_empty() {
                vp.saw(LayerKind::Payload);
            }
        }
        Some(etherparse::TransportSlice::Udp(udp)) => {
            vp.saw(LayerKind::Udp);
            let sport = udp.source_port();
            let dport = udp.destination_port();
            vp.src.udp.insert(sport);
            vp.dst.udp.insert(dport);
            decode_udp_payload(vp, sport, dport, udp.payload());
        }
        Some(etherparse::TransportSlice::Icmpv4(_)) => vp.saw(LayerKind::Icmpv4),
        Some(etherparse::TransportSlice::Icmpv6(_)) => vp.saw(LayerKind::Icmpv6),
        _ => {}
    }
}

/// Classify well-known UDP services carried in the datagram.
fn decode_udp_payload(vp: &mut ViewPair, sport: u16, dport: u16, payload: &[u8]) {
    match (sport, dport) {
        (53, _) | (_, 53) => vp.saw(LayerKind::Dns),
        (67, _) | (68, _) | (_, 67) | (_, 68) => decode_dhcpv4(vp, payload),
        (546, _) | (547, _) | (_, 546) | (_, 547) => decode_dhcpv6(vp, payload),
        _ => {
            if !payload.is_empty() {
                vp.saw(LayerKind::Payload);
            }
        }
    }
}

fn decode_arp(vp: &mut ViewPair, arp: &[u8]) -> Option<()> {
    // htype(2) ptype(2) hlen(1) plen(1) oper(2), then sha/spa/tha/tpa.
    if arp.len() < 8 {
        debug!("frame too short for arp: {} bytes", arp.len());
        return None;
    }
    let hlen = arp[4] as usize;
    let plen = arp[5] as usize;
    if arp.len() < 8 + 2 * (hlen + plen) {
        debug!("truncated arp frame");
        return None;
    }
    vp.saw(LayerKind::Arp);

    let sha = &arp[8..8 + hlen];
    let spa = &arp[8 + hlen..8 + hlen + plen];
    let tha = &arp[8 + hlen + plen..8 + 2 * hlen + plen];
    let tpa = &arp[8 + 2 * hlen + plen..8 + 2 * (hlen + plen)];

    if hlen == 6 {
        let sender: [u8; 6] = sha.try_into().ok()?;
        let target: [u8; 6] = tha.try_into().ok()?;
        vp.src.mac = Some(Mac::from_bytes(sender));
        vp.dst.mac = Some(Mac::from_bytes(target));
    }
    vp.src.note_addr(spa);
    vp.dst.note_addr(tpa);
    Some(())
}

fn decode_dhcpv4(vp: &mut ViewPair, payload: &[u8]) {
    // BOOTP fixed header is 236 bytes, followed by the DHCP magic cookie.
    if payload.len() < 240 || payload[236..240] != DHCP_MAGIC {
        return;
    }
    vp.saw(LayerKind::Dhcpv4);
    if payload[0] != BOOTP_OP_REQUEST {
        return;
    }

    let mut offset = 240;
    while offset + 2 <= payload.len() {
        let opt = payload[offset];
        if opt == DHCP_OPT_END {
            break;
        }
        let len = payload[offset + 1] as usize;
        let end = offset + 2 + len;
        if end > payload.len() {
            break;
        }
        if opt == DHCP_OPT_HOSTNAME && len > 0 {
            if let Ok(name) = std::str::from_utf8(&payload[offset + 2..end]) {
                if !name.is_empty() {
                    vp.src.hostname = Some(name.to_string());
                }
            }
        }
        offset = end;
    }
}

fn decode_dhcpv6(vp: &mut ViewPair, payload: &[u8]) {
    // msg-type(1) transaction-id(3), then (code, len, value) options.
    if payload.len() < 4 {
        return;
    }
    vp.saw(LayerKind::Dhcpv6);
    if payload[0] != DHCPV6_MSG_SOLICIT {
        return;
    }

    let mut offset = 4;
    while offset + 4 <= payload.len() {
        let code = u16::from_be_bytes([payload[offset], payload[offset + 1]]);
        let len = u16::from_be_bytes([payload[offset + 2], payload[offset + 3]]) as usize;
        let end = offset + 4 + len;
        if end > payload.len() {
            break;
        }
        if code == DHCPV6_OPT_CLIENT_FQDN {
            let name = trim_fqdn(&payload[offset + 4..end]);
            if !name.is_empty() {
                vp.src.hostname = Some(name);
            }
        }
        offset = end;
    }
}

/// The client-FQDN option value starts with flag and length octets that
/// read as control characters; strip those and surrounding whitespace.
fn trim_fqdn(raw: &[u8]) -> String {
    let s = String::from_utf8_lossy(raw);
    s.trim_start_matches(char::is_control).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const SRC_MAC: [u8; 6] = [0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa];
    const DST_MAC: [u8; 6] = [0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb];

    fn eth_header(ether_type: u16) -> Vec<u8> {
        let mut pkt = Vec::new();
        pkt.extend_from_slice(&DST_MAC);
        pkt.extend_from_slice(&SRC_MAC);
        pkt.extend_from_slice(&ether_type.to_be_bytes());
        pkt
    }

    fn ipv4_header(src: [u8; 4], dst: [u8; 4], protocol: u8, payload_len: u16) -> Vec<u8> {
        let total = 20 + payload_len;
        let mut hdr = vec![
            0x45, 0x00, // version=4 ihl=5, dscp/ecn
        ];
        hdr.extend_from_slice(&total.to_be_bytes());
        hdr.extend_from_slice(&[
            0x12, 0x34, // identification
            0x40, 0x00, // flags (DF), fragment offset
            0x40, // ttl
            protocol, 0x00, 0x00, // checksum (unchecked)
        ]);
        hdr.extend_from_slice(&src);
        hdr.extend_from_slice(&dst);
        hdr
    }

    fn tcp_header(sport: u16, dport: u16) -> Vec<u8> {
        let mut hdr = Vec::new();
        hdr.extend_from_slice(&sport.to_be_bytes());
        hdr.extend_from_slice(&dport.to_be_bytes());
        hdr.extend_from_slice(&[
            0x00, 0x00, 0x00, 0x01, // seq
            0x00, 0x00, 0x00, 0x00, // ack
            0x50, 0x02, // data offset=5, SYN
            0xff, 0xff, // window
            0x00, 0x00, // checksum
            0x00, 0x00, // urgent pointer
        ]);
        hdr
    }

    fn udp_header(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
        let mut hdr = Vec::new();
        hdr.extend_from_slice(&sport.to_be_bytes());
        hdr.extend_from_slice(&dport.to_be_bytes());
        hdr.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
        hdr.extend_from_slice(&[0x00, 0x00]); // checksum (unchecked)
        hdr.extend_from_slice(payload);
        hdr
    }

    fn tcp_frame(src_ip: [u8; 4], dst_ip: [u8; 4], sport: u16, dport: u16) -> Vec<u8> {
        let mut pkt = eth_header(ETHERTYPE_IPV4);
        pkt.extend(ipv4_header(src_ip, dst_ip, 6, 20));
        pkt.extend(tcp_header(sport, dport));
        pkt
    }

    fn arp_frame(sender: [u8; 6], spa: [u8; 4], target: [u8; 6], tpa: [u8; 4]) -> Vec<u8> {
        let mut pkt = eth_header(ETHERTYPE_ARP);
        pkt.extend_from_slice(&[
            0x00, 0x01, // htype ethernet
            0x08, 0x00, // ptype ipv4
            6, 4, // hlen, plen
            0x00, 0x01, // oper request
        ]);
        pkt.extend_from_slice(&sender);
        pkt.extend_from_slice(&spa);
        pkt.extend_from_slice(&target);
        pkt.extend_from_slice(&tpa);
        pkt
    }

    #[test]
    fn test_decode_tcp_frame() {
        let pkt = tcp_frame([10, 0, 0, 2], [10, 0, 0, 1], 443, 55000);
        let vp = decode(&pkt, LinkKind::Ethernet).unwrap();

        assert_eq!(vp.src.mac.as_ref().unwrap().as_str(), "aa:aa:aa:aa:aa:aa");
        assert_eq!(vp.src.ipv4, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(vp.dst.ipv4, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(vp.src.tcp.contains(&443));
        assert!(vp.dst.tcp.contains(&55000));
        assert!(vp.src.udp.is_empty());
        assert_eq!(vp.count(LayerKind::Ethernet), 1);
        assert_eq!(vp.count(LayerKind::Ipv4), 1);
        assert_eq!(vp.count(LayerKind::Tcp), 1);
    }

    #[test]
    fn test_decode_arp_frame() {
        let pkt = arp_frame(SRC_MAC, [10, 0, 0, 2], DST_MAC, [10, 0, 0, 1]);
        let vp = decode(&pkt, LinkKind::Ethernet).unwrap();

        assert!(vp.has(LayerKind::Arp));
        assert_eq!(vp.src.mac.as_ref().unwrap().as_str(), "aa:aa:aa:aa:aa:aa");
        assert_eq!(vp.dst.mac.as_ref().unwrap().as_str(), "66:77:88:99:aa:bb");
        assert_eq!(vp.src.ipv4, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(vp.dst.ipv4, Some(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn test_decode_dhcpv4_hostname() {
        // BOOTREQUEST carrying option 12 = "printer".
        let mut dhcp = vec![0u8; 236];
        dhcp[0] = BOOTP_OP_REQUEST;
        dhcp.extend_from_slice(&DHCP_MAGIC);
        dhcp.extend_from_slice(&[DHCP_OPT_HOSTNAME, 7]);
        dhcp.extend_from_slice(b"printer");
        dhcp.push(DHCP_OPT_END);

        let mut pkt = eth_header(ETHERTYPE_IPV4);
        pkt.extend(ipv4_header([10, 0, 0, 2], [255, 255, 255, 255], 17, (8 + dhcp.len()) as u16));
        pkt.extend(udp_header(68, 67, &dhcp));

        let vp = decode(&pkt, LinkKind::Ethernet).unwrap();
        assert!(vp.has(LayerKind::Dhcpv4));
        assert_eq!(vp.src.hostname.as_deref(), Some("printer"));
    }

    #[test]
    fn test_decode_dhcpv4_reply_ignored() {
        // BOOTREPLY: options are not examined.
        let mut dhcp = vec![0u8; 236];
        dhcp[0] = 2;
        dhcp.extend_from_slice(&DHCP_MAGIC);
        dhcp.extend_from_slice(&[DHCP_OPT_HOSTNAME, 2]);
        dhcp.extend_from_slice(b"gw");
        dhcp.push(DHCP_OPT_END);

        let mut pkt = eth_header(ETHERTYPE_IPV4);
        pkt.extend(ipv4_header([10, 0, 0, 1], [10, 0, 0, 2], 17, (8 + dhcp.len()) as u16));
        pkt.extend(udp_header(67, 68, &dhcp));

        let vp = decode(&pkt, LinkKind::Ethernet).unwrap();
        assert!(vp.has(LayerKind::Dhcpv4));
        assert!(vp.src.hostname.is_none());
    }

    #[test]
    fn test_decode_dhcpv6_client_fqdn() {
        // Solicit carrying a client-FQDN option; the value's flag and
        // length octets read as control characters and get stripped.
        let mut dhcp = vec![DHCPV6_MSG_SOLICIT, 0x11, 0x22, 0x33];
        dhcp.extend_from_slice(&DHCPV6_OPT_CLIENT_FQDN.to_be_bytes());
        dhcp.extend_from_slice(&8u16.to_be_bytes());
        dhcp.extend_from_slice(b"\x00\x06laptop");

        let mut pkt = eth_header(ETHERTYPE_IPV4);
        pkt.extend(ipv4_header([10, 0, 0, 2], [10, 0, 0, 1], 17, (8 + dhcp.len()) as u16));
        pkt.extend(udp_header(546, 547, &dhcp));

        let vp = decode(&pkt, LinkKind::Ethernet).unwrap();
        assert!(vp.has(LayerKind::Dhcpv6));
        assert_eq!(vp.src.hostname.as_deref(), Some("laptop"));
    }

    #[test]
    fn test_decode_dns_counted() {
        let mut pkt = eth_header(ETHERTYPE_IPV4);
        pkt.extend(ipv4_header([10, 0, 0, 2], [10, 0, 0, 1], 17, 8 + 4));
        pkt.extend(udp_header(40000, 53, &[0, 1, 2, 3]));

        let vp = decode(&pkt, LinkKind::Ethernet).unwrap();
        assert!(vp.has(LayerKind::Dns));
        assert!(vp.src.udp.contains(&40000));
        assert!(vp.dst.udp.contains(&53));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(decode(&[0xaa, 0xbb], LinkKind::Ethernet).is_none());

        // ARP header claiming more address bytes than the frame carries.
        let mut pkt = eth_header(ETHERTYPE_ARP);
        pkt.extend_from_slice(&[0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x01]);
        assert!(decode(&pkt, LinkKind::Ethernet).is_none());
    }

    #[test]
    fn test_trim_fqdn() {
        assert_eq!(trim_fqdn(b"\x00\x04host"), "host");
        assert_eq!(trim_fqdn(b"  host  "), "host");
        assert_eq!(trim_fqdn(b""), "");
    }

    #[test]
    fn test_unknown_ether_type_counts_ethernet_only() {
        let mut pkt = eth_header(0x88cc); // LLDP
        pkt.extend_from_slice(&[0u8; 8]);
        let vp = decode(&pkt, LinkKind::Ethernet).unwrap();
        assert_eq!(vp.count(LayerKind::Ethernet), 1);
        assert!(vp.src.mac.is_some());
        assert_eq!(vp.layers.len(), 1);
    }
}
