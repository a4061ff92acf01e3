//! Observer fan-out: session, peer, transfer and log streams for the host.

use tokio::sync::broadcast;

use crate::device::PeerDevice;
use crate::session::SessionState;
use crate::transfer::TransferState;

/// Everything the engine reports to its observers.
#[derive(Debug, Clone)]
pub enum BusEvent {
    Session(SessionState),
    Peers(Vec<PeerDevice>),
    SelfDevice(PeerDevice),
    Transfer(TransferState),
    Log(String),
}

/// Default per-subscriber buffer.
pub const DEFAULT_BUS_CAPACITY: usize = 128;

/// Bounded multi-subscriber channel. Publishing never blocks; a subscriber
/// that falls more than the buffer behind loses the oldest events and is told
/// so on its next receive.
#[derive(Debug, Clone)]
pub struct ObserverBus {
    tx: broadcast::Sender<BusEvent>,
}

impl ObserverBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Publish to every current subscriber. A bus with no subscribers drops
    /// the event silently.
    pub fn publish(&self, event: BusEvent) {
        let _ = self.tx.send(event);
    }

    /// Free-text log line for the host's log stream.
    pub fn log(&self, line: impl Into<String>) {
        self.publish(BusEvent::Log(line.into()));
    }
}

impl Default for ObserverBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = ObserverBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.log("hello");
        for rx in [&mut a, &mut b] {
            match rx.recv().await.unwrap() {
                BusEvent::Log(line) => assert_eq!(line, "hello"),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let bus = ObserverBus::default();
        bus.log("nobody listening");
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking_the_producer() {
        let bus = ObserverBus::new(4);
        let mut rx = bus.subscribe();
        // Far more events than the buffer holds, published without yielding.
        for i in 0..64 {
            bus.log(format!("line {i}"));
        }
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped > 0),
            other => panic!("expected lag, got {other:?}"),
        }
        // The newest events are still there after the lag report.
        assert!(matches!(rx.recv().await, Ok(BusEvent::Log(_))));
    }
}
