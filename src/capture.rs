//! Packet sources
//!
//! Wraps libpcap captures (live interface or replayed file) into a
//! bounded channel of raw frames. Capture reads block, so each source
//! runs on its own OS thread; the channel closing in either direction
//! tears the source down.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use pcap::{Activated, Capture, Device, Linktype};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::decode::LinkKind;

pub const FRAME_CHANNEL_CAPACITY: usize = 256;
const SNAPLEN: i32 = 65536;

/// One captured frame plus its link-layer framing.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub link: LinkKind,
}

/// Open a live capture on the named interface.
pub fn live(iface: &str) -> Result<mpsc::Receiver<RawFrame>> {
    let capture = Capture::from_device(iface)
        .with_context(|| format!("unknown capture interface: {iface}"))?
        .promisc(true)
        .snaplen(SNAPLEN)
        .open()
        .with_context(|| format!("failed to open interface: {iface}"))?;
    info!("capturing on {iface}");
    pump(capture)
}

/// Replay a capture file.
pub fn offline<P: AsRef<Path>>(path: P) -> Result<mpsc::Receiver<RawFrame>> {
    let path = path.as_ref();
    let capture = Capture::from_file(path)
        .with_context(|| format!("failed to open capture file: {}", path.display()))?;
    info!("replaying {}", path.display());
    pump(capture)
}

/// Pick the first interface that is up, not loopback, and not a docker
/// bridge.
pub fn auto_select() -> Result<String> {
    let devices = Device::list().context("failed to list capture devices")?;
    devices
        .into_iter()
        .find(|d| d.flags.is_up() && !d.flags.is_loopback() && !d.name.contains("docker"))
        .map(|d| d.name)
        .ok_or_else(|| anyhow!("no suitable capture interface found"))
}

fn link_kind(linktype: Linktype) -> Result<LinkKind> {
    match linktype {
        Linktype::ETHERNET => Ok(LinkKind::Ethernet),
        Linktype::NULL | Linktype::LOOP => Ok(LinkKind::Loopback),
        other => bail!("unsupported link type: {}", other.get_name().unwrap_or_else(|_| other.0.to_string())),
    }
}

/// Feed frames from the capture into a bounded channel on a dedicated
/// thread. EOF or a dropped receiver ends the thread.
fn pump<T: Activated + Send + 'static>(mut capture: Capture<T>) -> Result<mpsc::Receiver<RawFrame>> {
    let link = link_kind(capture.get_datalink())?;
    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

    std::thread::spawn(move || loop {
        match capture.next_packet() {
            Ok(packet) => {
                let frame = RawFrame {
                    data: packet.data.to_vec(),
                    link,
                };
                if tx.blocking_send(frame).is_err() {
                    break;
                }
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => {
                warn!("capture error: {e}");
                break;
            }
        }
    });

    Ok(rx)
}
