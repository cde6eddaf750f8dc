//! Lifecycle events
//!
//! Every state transition in the host table becomes one [`Event`]:
//! a tagged body carrying an owned snapshot of the host (and port where
//! applicable) taken at emission time, plus the emission timestamp.
//! [`EventInfo`] flattens an event into the record shell templates
//! render against.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use super::host::{HostSnapshot, PortSnapshot};

/// Event kinds as they are spelled in trigger configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Sentinel decoded from the empty string or `"invalid"`.
    Invalid,
    HostTouch,
    HostNew,
    HostLost,
    HostFound,
    HostArpScanStart,
    HostArpScanStop,
    PortTouch,
    PortNew,
    PortLost,
    PortFound,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Invalid => "invalid",
            EventType::HostTouch => "host.touch",
            EventType::HostNew => "host.new",
            EventType::HostLost => "host.lost",
            EventType::HostFound => "host.found",
            EventType::HostArpScanStart => "host.arp_scan.start",
            EventType::HostArpScanStop => "host.arp_scan.stop",
            EventType::PortTouch => "port.touch",
            EventType::PortNew => "port.new",
            EventType::PortLost => "port.lost",
            EventType::PortFound => "port.found",
        }
    }

    pub fn parse(s: &str) -> Option<EventType> {
        match s {
            "" | "invalid" => Some(EventType::Invalid),
            "host.touch" => Some(EventType::HostTouch),
            "host.new" => Some(EventType::HostNew),
            "host.lost" => Some(EventType::HostLost),
            "host.found" => Some(EventType::HostFound),
            "host.arp_scan.start" => Some(EventType::HostArpScanStart),
            "host.arp_scan.stop" => Some(EventType::HostArpScanStop),
            "port.touch" => Some(EventType::PortTouch),
            "port.new" => Some(EventType::PortNew),
            "port.lost" => Some(EventType::PortLost),
            "port.found" => Some(EventType::PortFound),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        EventType::parse(&s).ok_or_else(|| de::Error::custom(format!("unknown event type: {s:?}")))
    }
}

/// Payload of one lifecycle event.
#[derive(Debug, Clone)]
pub enum EventBody {
    HostTouch {
        host: HostSnapshot,
    },
    HostNew {
        host: HostSnapshot,
    },
    HostLost {
        host: HostSnapshot,
        up: Duration,
    },
    HostFound {
        host: HostSnapshot,
        down: Duration,
    },
    HostArpScanStart {
        host: HostSnapshot,
    },
    HostArpScanStop {
        host: HostSnapshot,
        up: Duration,
    },
    PortTouch {
        host: HostSnapshot,
        port: PortSnapshot,
    },
    PortNew {
        host: HostSnapshot,
        port: PortSnapshot,
    },
    PortLost {
        host: HostSnapshot,
        port: PortSnapshot,
        up: Duration,
    },
    PortFound {
        host: HostSnapshot,
        port: PortSnapshot,
        down: Duration,
    },
}

/// One lifecycle fact, stamped at emission.
#[derive(Debug, Clone)]
pub struct Event {
    pub at: DateTime<Utc>,
    pub body: EventBody,
}

impl Event {
    pub fn now(body: EventBody) -> Self {
        Self {
            at: Utc::now(),
            body,
        }
    }

    pub fn event_type(&self) -> EventType {
        match &self.body {
            EventBody::HostTouch { .. } => EventType::HostTouch,
            EventBody::HostNew { .. } => EventType::HostNew,
            EventBody::HostLost { .. } => EventType::HostLost,
            EventBody::HostFound { .. } => EventType::HostFound,
            EventBody::HostArpScanStart { .. } => EventType::HostArpScanStart,
            EventBody::HostArpScanStop { .. } => EventType::HostArpScanStop,
            EventBody::PortTouch { .. } => EventType::PortTouch,
            EventBody::PortNew { .. } => EventType::PortNew,
            EventBody::PortLost { .. } => EventType::PortLost,
            EventBody::PortFound { .. } => EventType::PortFound,
        }
    }

    pub fn host(&self) -> &HostSnapshot {
        match &self.body {
            EventBody::HostTouch { host }
            | EventBody::HostNew { host }
            | EventBody::HostLost { host, .. }
            | EventBody::HostFound { host, .. }
            | EventBody::HostArpScanStart { host }
            | EventBody::HostArpScanStop { host, .. }
            | EventBody::PortTouch { host, .. }
            | EventBody::PortNew { host, .. }
            | EventBody::PortLost { host, .. }
            | EventBody::PortFound { host, .. } => host,
        }
    }

    pub fn port(&self) -> Option<&PortSnapshot> {
        match &self.body {
            EventBody::PortTouch { port, .. }
            | EventBody::PortNew { port, .. }
            | EventBody::PortLost { port, .. }
            | EventBody::PortFound { port, .. } => Some(port),
            _ => None,
        }
    }

    pub fn up(&self) -> Option<Duration> {
        match &self.body {
            EventBody::HostLost { up, .. }
            | EventBody::HostArpScanStop { up, .. }
            | EventBody::PortLost { up, .. } => Some(*up),
            _ => None,
        }
    }

    pub fn down(&self) -> Option<Duration> {
        match &self.body {
            EventBody::HostFound { down, .. } | EventBody::PortFound { down, .. } => Some(*down),
            _ => None,
        }
    }
}

/// Flat projection of an event for shell templates.
#[derive(Debug, Clone)]
pub struct EventInfo {
    pub description: String,
    pub host: HostSnapshot,
    pub port: Option<PortSnapshot>,
    pub port_string: String,
    pub up: Option<Duration>,
    pub down: Option<Duration>,
    pub age: Option<Duration>,
}

impl EventInfo {
    pub fn new(event: &Event) -> Self {
        let host = event.host().clone();
        let port = event.port().cloned();
        let port_string = port.as_ref().map(|p| p.to_string()).unwrap_or_default();
        let addr = host_addr(&host);

        let (description, age) = match &event.body {
            EventBody::HostTouch { host } => (
                format!(
                    "touched host {} at {} (up {}) (age {})",
                    host.mac,
                    addr,
                    fmt_duration(host.up),
                    fmt_duration(host.age),
                ),
                None,
            ),
            EventBody::HostNew { host } => (
                format!("new host {} at {}", host.mac, addr),
                Some(host.age),
            ),
            EventBody::HostLost { host, up } => (
                format!(
                    "lost host {} at {} (up {}) (age {})",
                    host.mac,
                    addr,
                    fmt_duration(*up),
                    fmt_duration(host.age),
                ),
                None,
            ),
            EventBody::HostFound { host, down } => (
                format!(
                    "found host {} at {} (down {}) (age {})",
                    host.mac,
                    addr,
                    fmt_duration(*down),
                    fmt_duration(host.age),
                ),
                None,
            ),
            EventBody::HostArpScanStart { host } => {
                (format!("host {} started arp scan", host.mac), None)
            }
            EventBody::HostArpScanStop { host, up } => (
                format!(
                    "host {} stopped arp scan (up {})",
                    host.mac,
                    fmt_duration(*up)
                ),
                None,
            ),
            EventBody::PortTouch { host, port } => (
                format!(
                    "touched port {} at {} (up {})",
                    port,
                    addr,
                    fmt_duration(host.up)
                ),
                None,
            ),
            EventBody::PortNew { port, .. } => (
                format!("new port {} at {} (age {})", port, addr, fmt_duration(port.age)),
                Some(port.age),
            ),
            EventBody::PortLost { port, up, .. } => (
                format!(
                    "lost port {} at {} (up {}) (age {})",
                    port,
                    addr,
                    fmt_duration(*up),
                    fmt_duration(port.age),
                ),
                None,
            ),
            EventBody::PortFound { port, down, .. } => (
                format!(
                    "found port {} at {} (down {}) (age {})",
                    port,
                    addr,
                    fmt_duration(*down),
                    fmt_duration(port.age),
                ),
                None,
            ),
        };

        Self {
            description,
            host,
            port,
            port_string,
            up: event.up(),
            down: event.down(),
            age,
        }
    }

    /// Resolve a template field path. Absent fields render as empty so
    /// templates stay safe across event kinds.
    pub fn field(&self, path: &str) -> String {
        match path {
            "Description" => self.description.clone(),
            "Host.MAC" => self.host.mac.to_string(),
            "Host.IPv4" => self
                .host
                .ipv4
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            "Host.IPv6" => self
                .host
                .ipv6
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            "Host.Hostname" => self.host.hostname.clone().unwrap_or_default(),
            "Port.Num" => self
                .port
                .as_ref()
                .map(|p| p.num.to_string())
                .unwrap_or_default(),
            "PortString" => self.port_string.clone(),
            "Up" => self.up.map(fmt_duration).unwrap_or_default(),
            "Down" => self.down.map(fmt_duration).unwrap_or_default(),
            "Age" => self.age.map(fmt_duration).unwrap_or_default(),
            _ => String::new(),
        }
    }
}

/// Best human-facing address for a host: IPv4, then IPv6, then a dash.
fn host_addr(host: &HostSnapshot) -> String {
    if let Some(ip) = host.ipv4 {
        ip.to_string()
    } else if let Some(ip) = host.ipv6 {
        ip.to_string()
    } else {
        "-".to_string()
    }
}

/// Render a duration as `2h3m5s`, dropping zero leading units.
pub fn fmt_duration(d: Duration) -> String {
    let total = d.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mac::Mac;
    use crate::watch::host::PortKind;

    fn snapshot() -> HostSnapshot {
        HostSnapshot {
            mac: "aa:aa:aa:aa:aa:aa".parse::<Mac>().unwrap(),
            ipv4: Some("10.0.0.2".parse().unwrap()),
            ipv6: None,
            hostname: None,
            tcp: vec![],
            udp: vec![],
            age: Duration::from_secs(65),
            up: Duration::from_secs(5),
        }
    }

    fn port_snapshot() -> PortSnapshot {
        PortSnapshot {
            num: 443,
            kind: PortKind::Tcp,
            age: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_event_type_round_trip() {
        for ty in [
            EventType::Invalid,
            EventType::HostTouch,
            EventType::HostNew,
            EventType::HostLost,
            EventType::HostFound,
            EventType::HostArpScanStart,
            EventType::HostArpScanStop,
            EventType::PortTouch,
            EventType::PortNew,
            EventType::PortLost,
            EventType::PortFound,
        ] {
            assert_eq!(EventType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(EventType::parse(""), Some(EventType::Invalid));
        assert_eq!(EventType::parse("host.rebooted"), None);
    }

    #[test]
    fn test_fmt_duration() {
        assert_eq!(fmt_duration(Duration::from_secs(0)), "0s");
        assert_eq!(fmt_duration(Duration::from_secs(35)), "35s");
        assert_eq!(fmt_duration(Duration::from_secs(125)), "2m5s");
        assert_eq!(fmt_duration(Duration::from_secs(3700)), "1h1m40s");
    }

    #[test]
    fn test_info_fields_for_port_event() {
        let event = Event::now(EventBody::PortLost {
            host: snapshot(),
            port: port_snapshot(),
            up: Duration::from_secs(35),
        });
        let info = EventInfo::new(&event);

        assert_eq!(info.field("Host.MAC"), "aa:aa:aa:aa:aa:aa");
        assert_eq!(info.field("Host.IPv4"), "10.0.0.2");
        assert_eq!(info.field("Host.IPv6"), "");
        assert_eq!(info.field("PortString"), "443/tcp");
        assert_eq!(info.field("Port.Num"), "443");
        assert_eq!(info.field("Up"), "35s");
        assert_eq!(info.field("Down"), "");
        assert_eq!(info.description, "lost port 443/tcp at 10.0.0.2 (up 35s) (age 5s)");
    }

    #[test]
    fn test_info_fields_absent_port() {
        let event = Event::now(EventBody::HostNew { host: snapshot() });
        let info = EventInfo::new(&event);

        assert_eq!(info.field("PortString"), "");
        assert_eq!(info.field("Port.Num"), "");
        assert_eq!(info.field("Age"), "1m5s");
        assert_eq!(info.field("Whatever"), "");
        assert_eq!(info.description, "new host aa:aa:aa:aa:aa:aa at 10.0.0.2");
    }

    #[test]
    fn test_event_accessors() {
        let event = Event::now(EventBody::HostFound {
            host: snapshot(),
            down: Duration::from_secs(200),
        });
        assert_eq!(event.event_type(), EventType::HostFound);
        assert_eq!(event.down(), Some(Duration::from_secs(200)));
        assert_eq!(event.up(), None);
        assert!(event.port().is_none());
    }
}
