//! Peer identity and connection snapshots reported by the radio subsystem.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Discovery status of a peer, as last reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Available,
    Invited,
    Connected,
    Failed,
    Unavailable,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceStatus::Available => "Available",
            DeviceStatus::Invited => "Invited",
            DeviceStatus::Connected => "Connected",
            DeviceStatus::Failed => "Failed",
            DeviceStatus::Unavailable => "Unavailable",
        };
        f.write_str(label)
    }
}

/// A discoverable remote endpoint. Immutable snapshot; every discovery update
/// replaces the whole value, never mutates it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDevice {
    pub name: String,
    /// Hardware address as reported by the radio. Opaque to the engine; only
    /// the platform interprets it.
    pub address: String,
    pub status: DeviceStatus,
}

impl fmt::Display for PeerDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] ({})", self.name, self.address, self.status)
    }
}

/// Resolved state of a formed connection. Produced once per successful
/// connection; the transfer phase derives its socket endpoint from
/// `group_owner_addr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub group_formed: bool,
    pub is_group_owner: bool,
    pub group_owner_addr: IpAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels() {
        assert_eq!(DeviceStatus::Available.to_string(), "Available");
        assert_eq!(DeviceStatus::Invited.to_string(), "Invited");
        assert_eq!(DeviceStatus::Connected.to_string(), "Connected");
        assert_eq!(DeviceStatus::Failed.to_string(), "Failed");
        assert_eq!(DeviceStatus::Unavailable.to_string(), "Unavailable");
    }

    #[test]
    fn device_display_includes_name_address_and_status() {
        let device = PeerDevice {
            name: "pixel".into(),
            address: "02:00:4c:4f:4f:50".into(),
            status: DeviceStatus::Available,
        };
        assert_eq!(
            device.to_string(),
            "pixel [02:00:4c:4f:4f:50] (Available)"
        );
    }
}
