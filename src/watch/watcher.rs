//! Pipeline assembly and event fan-out
//!
//! The watcher wires the pieces together: an ingest task decodes frames
//! and merges them into the host table, a reaper task turns activity
//! expiries into events, and the publish loop delivers every event to
//! every subscriber in registration order.
//!
//! Frames, expiries and events all travel over bounded channels, so slow
//! subscribers push back on ingest and, eventually, on the capture
//! buffer.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::capture::RawFrame;
use crate::core::activity::Expired;
use crate::core::decode::decode;
use super::event::{Event, EventBody};
use super::host::{ExpiryKey, HostTable};
use super::subscriber::{LogSubscriber, Subscriber};
use super::update::Updater;

pub const EVENT_CHANNEL_CAPACITY: usize = 32;
pub const EXPIRY_CHANNEL_CAPACITY: usize = 32;

/// Watches a frame stream and publishes the resulting events to its
/// subscribers.
pub struct Watcher {
    table: Arc<RwLock<HostTable>>,
    subs: Vec<Box<dyn Subscriber>>,
}

impl Watcher {
    /// Create a watcher with the given subscribers; with none, events go
    /// to the built-in logger.
    pub fn new(mut subs: Vec<Box<dyn Subscriber>>) -> Self {
        if subs.is_empty() {
            subs.push(Box::new(LogSubscriber));
        }
        Self {
            table: Arc::new(RwLock::new(HostTable::new())),
            subs,
        }
    }

    pub fn table(&self) -> Arc<RwLock<HostTable>> {
        self.table.clone()
    }

    /// Run until the frame stream ends or `cancel` fires, then drain
    /// outstanding events and return.
    pub async fn run(
        &self,
        mut frames: mpsc::Receiver<RawFrame>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (event_tx, mut event_rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);
        let (expired_tx, expired_rx) = mpsc::channel(EXPIRY_CHANNEL_CAPACITY);

        let updater = Updater::new(self.table.clone(), event_tx.clone(), expired_tx);

        let reaper = tokio::spawn(reap_expiries(
            self.table.clone(),
            expired_rx,
            event_tx,
            cancel.clone(),
        ));

        let ingest_cancel = cancel.clone();
        let ingest = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ingest_cancel.cancelled() => break,
                    frame = frames.recv() => {
                        let Some(frame) = frame else {
                            info!("frame stream ended");
                            break;
                        };
                        let Some(vp) = decode(&frame.data, frame.link) else {
                            continue;
                        };
                        if updater.merge(&vp).await.is_err() {
                            // Event channel closed under us; shut down.
                            break;
                        }
                    }
                }
            }
            // Bring the rest of the pipeline down; this also cancels the
            // reaper so the event channel can close.
            ingest_cancel.cancel();
        });

        while let Some(event) = event_rx.recv().await {
            for sub in &self.subs {
                if let Err(e) = sub.handle(&event).await {
                    error!("subscriber {} failed: {e:#}", sub.name());
                }
            }
        }

        let _ = ingest.await;
        let _ = reaper.await;
        Ok(())
    }
}

/// Turn expiry notices into lost/stop events carrying a fresh snapshot
/// of the entity, looked up by key. Timer tasks never touch the table
/// themselves.
pub async fn reap_expiries(
    table: Arc<RwLock<HostTable>>,
    mut expired_rx: mpsc::Receiver<Expired<ExpiryKey>>,
    events: mpsc::Sender<Event>,
    cancel: CancellationToken,
) {
    loop {
        let notice = tokio::select! {
            _ = cancel.cancelled() => return,
            notice = expired_rx.recv() => match notice {
                Some(notice) => notice,
                None => return,
            },
        };

        let now = Instant::now();
        let body = {
            let table = table.read().await;
            match &notice.key {
                ExpiryKey::Host(mac) => table.get(mac).map(|host| EventBody::HostLost {
                    host: host.snapshot(now),
                    up: notice.up,
                }),
                ExpiryKey::ArpScan(mac) => table.get(mac).map(|host| EventBody::HostArpScanStop {
                    host: host.snapshot(now),
                    up: notice.up,
                }),
                ExpiryKey::Port(mac, kind, num) => table.get(mac).and_then(|host| {
                    host.port(*kind, *num).map(|port| EventBody::PortLost {
                        host: host.snapshot(now),
                        port: port.snapshot(now),
                        up: notice.up,
                    })
                }),
            }
        };

        match body {
            Some(body) => {
                if events.send(Event::now(body)).await.is_err() {
                    return;
                }
            }
            None => debug!("expiry for unknown entity: {:?}", notice.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mac::Mac;
    use crate::watch::event::EventType;
    use crate::watch::host::{Host, Port, PortKind};
    use parking_lot::Mutex;

    struct Recorder {
        seen: Arc<Mutex<Vec<EventType>>>,
    }

    #[async_trait::async_trait]
    impl Subscriber for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn handle(&self, event: &Event) -> Result<()> {
            self.seen.lock().push(event.event_type());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl Subscriber for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn handle(&self, _event: &Event) -> Result<()> {
            anyhow::bail!("boom")
        }
    }

    fn tcp_frame() -> RawFrame {
        // Ethernet + IPv4 + TCP from aa:aa:aa:aa:aa:aa / 10.0.0.2:443.
        let mut data = vec![
            0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, // dst mac
            0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0xaa, // src mac
            0x08, 0x00, // ethertype IPv4
            0x45, 0x00, 0x00, 0x28, // version/ihl, dscp, total length 40
            0x12, 0x34, 0x40, 0x00, // id, flags/frag
            0x40, 0x06, 0x00, 0x00, // ttl, proto TCP, checksum
            10, 0, 0, 2, // src ip
            10, 0, 0, 1, // dst ip
        ];
        data.extend_from_slice(&[
            0x01, 0xbb, // src port 443
            0xd6, 0xd8, // dst port 55000
            0x00, 0x00, 0x00, 0x01, // seq
            0x00, 0x00, 0x00, 0x00, // ack
            0x50, 0x02, 0xff, 0xff, // offset/flags SYN, window
            0x00, 0x00, 0x00, 0x00, // checksum, urgent
        ]);
        RawFrame {
            data,
            link: crate::core::decode::LinkKind::Ethernet,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_in_order_and_survives_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let watcher = Watcher::new(vec![
            Box::new(Failing),
            Box::new(Recorder { seen: seen.clone() }),
        ]);

        let (frame_tx, frame_rx) = mpsc::channel(8);
        frame_tx.send(tcp_frame()).await.unwrap();
        drop(frame_tx); // EOF terminates the pipeline

        watcher
            .run(frame_rx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            *seen.lock(),
            vec![EventType::HostNew, EventType::HostTouch, EventType::PortNew],
            "failing subscriber does not block delivery to the next one"
        );

        let table = watcher.table();
        let table = table.read().await;
        assert_eq!(table.len(), 1);
        let mac: Mac = "aa:aa:aa:aa:aa:aa".parse().unwrap();
        assert!(table.get(&mac).unwrap().tcp.contains_key(&443));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_pipeline() {
        let watcher = Watcher::new(vec![Box::new(NullRecorder)]);
        let (_frame_tx, frame_rx) = mpsc::channel::<RawFrame>(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        watcher.run(frame_rx, cancel).await.unwrap();
    }

    struct NullRecorder;

    #[async_trait::async_trait]
    impl Subscriber for NullRecorder {
        fn name(&self) -> &str {
            "null"
        }

        async fn handle(&self, _event: &Event) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_snapshots_by_key() {
        let table = Arc::new(RwLock::new(HostTable::new()));
        let (expired_tx, expired_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let mac: Mac = "aa:aa:aa:aa:aa:aa".parse().unwrap();
        {
            let mut table = table.write().await;
            let mut host = Host::new(mac.clone(), Instant::now(), expired_tx.clone());
            host.tcp.insert(
                443,
                Port::new(mac.clone(), PortKind::Tcp, 443, Instant::now(), expired_tx.clone()),
            );
            table.insert(host);
        }

        tokio::spawn(reap_expiries(table, expired_rx, event_tx, cancel.clone()));

        // The port TTL (30s) elapses before the host TTL (120s).
        let event = event_rx.recv().await.unwrap();
        assert_eq!(event.event_type(), EventType::PortLost);
        assert_eq!(event.port().unwrap().num, 443);

        let event = event_rx.recv().await.unwrap();
        assert_eq!(event.event_type(), EventType::HostLost);
        assert_eq!(event.host().mac, mac);

        cancel.cancel();
    }
}
