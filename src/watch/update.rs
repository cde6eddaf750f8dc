//! View merging
//!
//! The updater folds each decoded [`ViewPair`] into the host table and
//! emits the lifecycle events the merge produces. Only the source side
//! of a packet is merged: creating hosts from destination addresses
//! produced phantom entries for every broadcast target, so a host must
//! show up as a sender before it exists here.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::view::{LayerKind, ViewPair};
use super::event::{Event, EventBody};
use super::host::{
    ExpirySender, Host, HostSnapshot, HostTable, Port, PortKind, ARP_SCAN_FREQ, HOST_TTL, PORT_TTL,
};

/// Merges views into the host table and emits the resulting events.
pub struct Updater {
    table: Arc<RwLock<HostTable>>,
    events: mpsc::Sender<Event>,
    expired_tx: ExpirySender,
}

impl Updater {
    pub fn new(
        table: Arc<RwLock<HostTable>>,
        events: mpsc::Sender<Event>,
        expired_tx: ExpirySender,
    ) -> Self {
        Self {
            table,
            events,
            expired_tx,
        }
    }

    /// Merge one packet's views. Events are emitted in the order the
    /// transitions occurred; a full event channel blocks here, which is
    /// the pipeline's backpressure boundary.
    pub async fn merge(&self, vp: &ViewPair) -> Result<()> {
        let now = Instant::now();
        let Some(mac) = vp.src.mac.clone() else {
            // Identity is strictly the source hardware address.
            return Ok(());
        };

        let mut out = Vec::new();
        {
            let mut table = self.table.write().await;

            if !table.contains(&mac) {
                let host = Host::new(mac.clone(), now, self.expired_tx.clone());
                table.insert(host);
                let host = table.get(&mac).expect("host was just inserted");
                out.push(EventBody::HostNew {
                    host: host.snapshot(now),
                });
                out.push(EventBody::HostTouch {
                    host: host.snapshot(now),
                });
            } else {
                let host = table.get(&mac).expect("host presence was just checked");
                if let Some(last) = host.activity.last_seen() {
                    let idle = now.saturating_duration_since(last);
                    if idle > HOST_TTL {
                        // The expiry already announced the loss; pair it
                        // with a found before the touch below refreshes
                        // last_seen.
                        out.push(EventBody::HostFound {
                            host: host.snapshot(now),
                            down: idle,
                        });
                    }
                }
                host.activity.touch(now);
                debug!("touch host {host}");
                out.push(EventBody::HostTouch {
                    host: host.snapshot(now),
                });
            }

            let host = table.get_mut(&mac).expect("host exists after merge");

            if let Some(name) = vp.src.hostname.as_deref() {
                if !name.is_empty() {
                    match host.hostname.as_deref() {
                        Some(old) if old != name => {
                            warn!("hostname has changed {old} -> {name}");
                            host.hostname = Some(name.to_string());
                        }
                        Some(_) => {}
                        None => host.hostname = Some(name.to_string()),
                    }
                }
            }

            if vp.has(LayerKind::Arp) {
                host.arp_window.add(now);
            }
            if host.arp_window.freq() >= ARP_SCAN_FREQ {
                let was_scanning = host.arp_scan.touch(now);
                if !was_scanning {
                    out.push(EventBody::HostArpScanStart {
                        host: host.snapshot(now),
                    });
                }
            }

            if let Some(ip) = vp.src.ipv4 {
                if !ip.is_unspecified() {
                    match host.ipv4 {
                        Some(old) if old != ip => {
                            debug!("host {} changed ips {old} -> {ip}", host.mac);
                        }
                        _ => {}
                    }
                    host.ipv4 = Some(ip);
                }
            }
            if let Some(ip) = vp.src.ipv6 {
                if !ip.is_unspecified() {
                    match host.ipv6 {
                        Some(old) if old != ip => {
                            debug!("host {} changed ips {old} -> {ip}", host.mac);
                        }
                        _ => {}
                    }
                    host.ipv6 = Some(ip);
                }
            }

            let host_snap = host.snapshot(now);
            merge_ports(
                host,
                PortKind::Tcp,
                &vp.src.tcp,
                &host_snap,
                now,
                &self.expired_tx,
                &mut out,
            );
            merge_ports(
                host,
                PortKind::Udp,
                &vp.src.udp,
                &host_snap,
                now,
                &self.expired_tx,
                &mut out,
            );
        }

        for body in out {
            self.events.send(Event::now(body)).await?;
        }
        Ok(())
    }
}

fn merge_ports(
    host: &mut Host,
    kind: PortKind,
    nums: &BTreeSet<u16>,
    host_snap: &HostSnapshot,
    now: Instant,
    expired_tx: &ExpirySender,
    out: &mut Vec<EventBody>,
) {
    let mac = host.mac.clone();
    let ports = match kind {
        PortKind::Tcp => &mut host.tcp,
        PortKind::Udp => &mut host.udp,
    };

    for &num in nums {
        if num == 0 {
            continue;
        }
        match ports.get(&num) {
            None => {
                let port = Port::new(mac.clone(), kind, num, now, expired_tx.clone());
                let snap = port.snapshot(now);
                ports.insert(num, port);
                out.push(EventBody::PortNew {
                    host: host_snap.clone(),
                    port: snap,
                });
            }
            Some(port) => {
                if let Some(last) = port.activity.last_seen() {
                    let idle = now.saturating_duration_since(last);
                    if idle > PORT_TTL {
                        // The port is considered alive for a full TTL past
                        // its last sighting.
                        out.push(EventBody::PortFound {
                            host: host_snap.clone(),
                            port: port.snapshot(now),
                            down: idle - PORT_TTL,
                        });
                    }
                }
                port.activity.touch(now);
                debug!("touch port {port} on {}", host_snap.mac);
                if kind == PortKind::Udp {
                    out.push(EventBody::PortTouch {
                        host: host_snap.clone(),
                        port: port.snapshot(now),
                    });
                }
            }
        }
    }
}
