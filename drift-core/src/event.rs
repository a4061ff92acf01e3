//! Domain events and host commands consumed by the session state machine.

use crate::device::{ConnectionInfo, PeerDevice};

/// The closed set of events the notification adapter produces. One event per
/// platform notification, except that disabling the radio also forces an
/// empty peer list.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    RadioEnabled(bool),
    PeersAvailable(Vec<PeerDevice>),
    ConnectionInfoAvailable(ConnectionInfo),
    Disconnected,
    SelfDeviceChanged(PeerDevice),
}

/// Commands the host issues to drive the session lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCmd {
    StartDiscovery,
    Connect(PeerDevice),
    Disconnect,
}
