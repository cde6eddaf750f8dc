//! Host tracking and event publishing
//!
//! Maintains the live model of the LAN (hosts and their ports under TTL
//! governance), merges decoded packets into it, and fans the resulting
//! lifecycle events out to subscribers.

pub mod event;
pub mod host;
pub mod subscriber;
pub mod update;
pub mod watcher;

pub use event::{Event, EventBody, EventInfo, EventType};
pub use host::{Host, HostSnapshot, HostTable, Port, PortKind, PortSnapshot};
pub use subscriber::{subscribers_from_config, FilteredSubscriber, Subscriber};
pub use update::Updater;
pub use watcher::Watcher;
