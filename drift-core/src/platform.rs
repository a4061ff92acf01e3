//! The abstract radio collaborator: control calls plus a notification stream.

use std::future::Future;

use crate::device::{ConnectionInfo, PeerDevice};

/// Raw notifications delivered by the platform, one at a time, in delivery
/// order. The peers-changed notification carries no peer data; the adapter
/// answers it with a `request_peers` round-trip.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformNotification {
    RadioStateChanged(bool),
    PeersChanged,
    ConnectivityChanged(bool),
    SelfDeviceChanged(PeerDevice),
}

/// Failure reported by a control call or round-trip.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("platform i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("platform rejected the request: {0}")]
    Rejected(String),
}

/// The device-discovery/radio subsystem, injected by the host.
///
/// Implementations deliver [`PlatformNotification`]s over the channel handed
/// out at construction and answer the calls below. Every call may fail; a
/// failure surfaces on the log stream and leaves the session machine where it
/// was.
pub trait Platform: Send + Sync + 'static {
    /// Start an active peer scan. Results arrive as `PeersChanged`
    /// notifications.
    fn discover_peers(&self) -> impl Future<Output = Result<(), PlatformError>> + Send;

    /// Invite `peer` to form a direct link. The outcome arrives as a
    /// `ConnectivityChanged` notification.
    fn connect(&self, peer: &PeerDevice) -> impl Future<Output = Result<(), PlatformError>> + Send;

    /// Drop the current link.
    fn disconnect(&self) -> impl Future<Output = Result<(), PlatformError>> + Send;

    /// Tear down the formed group, if any remains.
    fn remove_group(&self) -> impl Future<Output = Result<(), PlatformError>> + Send;

    /// Round-trip: the current peer list, ordered by discovery arrival.
    fn request_peers(&self) -> impl Future<Output = Result<Vec<PeerDevice>, PlatformError>> + Send;

    /// Round-trip: the resolved state of the current connection.
    fn request_connection_info(
        &self,
    ) -> impl Future<Output = Result<ConnectionInfo, PlatformError>> + Send;
}
