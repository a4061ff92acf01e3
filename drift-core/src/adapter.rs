//! Translates raw platform notifications into domain events, answering the
//! peers-changed and connectivity-changed notifications with their
//! round-trips against the platform.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::event::DomainEvent;
use crate::platform::{Platform, PlatformNotification};

/// Consume `notifications` until the channel closes, forwarding domain events
/// on `events`. One notification is handled at a time, in delivery order, so
/// handlers are never re-entered; a failed round-trip is logged and produces
/// no event, leaving the session machine untouched.
pub async fn run_adapter<P: Platform>(
    platform: Arc<P>,
    mut notifications: mpsc::Receiver<PlatformNotification>,
    events: mpsc::Sender<DomainEvent>,
) {
    while let Some(notification) = notifications.recv().await {
        let mut out = Vec::with_capacity(2);
        match notification {
            PlatformNotification::RadioStateChanged(enabled) => {
                out.push(DomainEvent::RadioEnabled(enabled));
                // A disabled radio invalidates every known peer.
                if !enabled {
                    out.push(DomainEvent::PeersAvailable(Vec::new()));
                }
            }
            PlatformNotification::PeersChanged => match platform.request_peers().await {
                Ok(devices) => out.push(DomainEvent::PeersAvailable(devices)),
                Err(e) => warn!(error = %e, "peer list request failed"),
            },
            PlatformNotification::ConnectivityChanged(true) => {
                match platform.request_connection_info().await {
                    Ok(info) => out.push(DomainEvent::ConnectionInfoAvailable(info)),
                    Err(e) => warn!(error = %e, "connection info request failed"),
                }
            }
            PlatformNotification::ConnectivityChanged(false) => {
                out.push(DomainEvent::Disconnected);
            }
            PlatformNotification::SelfDeviceChanged(device) => {
                out.push(DomainEvent::SelfDeviceChanged(device));
            }
        }
        for event in out {
            if events.send(event).await.is_err() {
                return;
            }
        }
    }
}
