//! Link-layer addressing
//!
//! Hosts are keyed by their hardware address, so the canonical textual
//! form doubles as the identity key throughout the watcher.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Canonical textual form of a 48-bit hardware address.
///
/// The address is lowercased on construction, which makes equality and
/// hashing case-insensitive with respect to the observed spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Mac(String);

impl Mac {
    /// Build from the six raw octets of an Ethernet header.
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        Mac(format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<[u8; 6]> for Mac {
    fn from(bytes: [u8; 6]) -> Self {
        Mac::from_bytes(bytes)
    }
}

impl FromStr for Mac {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            bail!("invalid hardware address: {s:?}");
        }
        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| anyhow::anyhow!("invalid hardware address: {s:?}"))?;
        }
        Ok(Mac::from_bytes(bytes))
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
