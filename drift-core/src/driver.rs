//! Wires the adapter, the session machine and the bus together on one
//! serialized event context.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::adapter;
use crate::bus::ObserverBus;
use crate::event::{DomainEvent, SessionCmd};
use crate::platform::{Platform, PlatformNotification};
use crate::session::{PlatformCall, SessionEffect, SessionMachine};

const CHANNEL_DEPTH: usize = 32;

/// Host handle to a running session. Commands go in here; everything else
/// comes out on the bus.
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCmd>,
}

impl SessionHandle {
    /// Returns false once the session loop has stopped.
    pub async fn command(&self, cmd: SessionCmd) -> bool {
        self.cmd_tx.send(cmd).await.is_ok()
    }
}

/// Spawn the adapter and session loops. `notifications` is the stream the
/// platform handed out at construction.
pub fn spawn_session<P: Platform>(
    platform: Arc<P>,
    notifications: mpsc::Receiver<PlatformNotification>,
    bus: ObserverBus,
) -> SessionHandle {
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_DEPTH);
    tokio::spawn(adapter::run_adapter(
        platform.clone(),
        notifications,
        event_tx,
    ));
    tokio::spawn(run_session(platform, cmd_rx, event_rx, bus));
    SessionHandle { cmd_tx }
}

/// One message at a time, commands first; effects run to completion before
/// the next input is taken, so the machine is never re-entered.
async fn run_session<P: Platform>(
    platform: Arc<P>,
    mut commands: mpsc::Receiver<SessionCmd>,
    mut events: mpsc::Receiver<DomainEvent>,
    bus: ObserverBus,
) {
    let mut machine = SessionMachine::new();
    loop {
        let effects = tokio::select! {
            biased;
            cmd = commands.recv() => match cmd {
                Some(cmd) => machine.on_command(cmd),
                None => break,
            },
            event = events.recv() => match event {
                Some(event) => machine.on_event(event),
                None => break,
            },
        };
        for effect in effects {
            match effect {
                SessionEffect::Publish(event) => bus.publish(event),
                SessionEffect::Call(call) => run_call(platform.as_ref(), call, &bus).await,
            }
        }
    }
    debug!("session loop stopped");
}

async fn run_call<P: Platform>(platform: &P, call: PlatformCall, bus: &ObserverBus) {
    let failure = match &call {
        PlatformCall::Discover => platform.discover_peers().await.err(),
        PlatformCall::Connect(peer) => platform.connect(peer).await.err(),
        PlatformCall::Disconnect => match platform.disconnect().await {
            Err(e) => Some(e),
            Ok(()) => platform.remove_group().await.err(),
        },
    };
    if let Some(e) = failure {
        warn!(?call, error = %e, "platform call failed");
        bus.log(format!("platform call failed: {e}"));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::broadcast;

    use super::*;
    use crate::bus::BusEvent;
    use crate::platform::fake::{sample_info, sample_peer, FakePlatform};
    use crate::session::SessionState;

    async fn wait_for_event(
        rx: &mut broadcast::Receiver<BusEvent>,
        matches_fn: impl Fn(&BusEvent) -> bool,
    ) -> BusEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(ev) if matches_fn(&ev) => return ev,
                    Ok(_) => {}
                    Err(e) => panic!("event channel error: {e}"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn discovery_through_connection_reaches_the_bus() {
        let platform = Arc::new(FakePlatform::new());
        *platform.peers.lock().unwrap() = vec![sample_peer("pixel")];
        *platform.info.lock().unwrap() = Some(sample_info());

        let (notif_tx, notif_rx) = mpsc::channel(8);
        let bus = ObserverBus::default();
        let mut rx = bus.subscribe();
        let session = spawn_session(platform.clone(), notif_rx, bus);

        assert!(session.command(SessionCmd::StartDiscovery).await);
        wait_for_event(&mut rx, |e| {
            matches!(e, BusEvent::Session(SessionState::Discovering))
        })
        .await;

        notif_tx
            .send(PlatformNotification::PeersChanged)
            .await
            .unwrap();
        let ev = wait_for_event(&mut rx, |e| matches!(e, BusEvent::Peers(_))).await;
        match ev {
            BusEvent::Peers(peers) => assert_eq!(peers, vec![sample_peer("pixel")]),
            _ => unreachable!(),
        }

        assert!(session.command(SessionCmd::Connect(sample_peer("pixel"))).await);
        wait_for_event(&mut rx, |e| {
            matches!(e, BusEvent::Session(SessionState::Connecting))
        })
        .await;

        notif_tx
            .send(PlatformNotification::ConnectivityChanged(true))
            .await
            .unwrap();
        let ev = wait_for_event(&mut rx, |e| {
            matches!(e, BusEvent::Session(SessionState::Connected(_)))
        })
        .await;
        match ev {
            BusEvent::Session(SessionState::Connected(info)) => assert_eq!(info, sample_info()),
            _ => unreachable!(),
        }

        let calls = platform.recorded_calls();
        assert!(calls.contains(&"discover".to_string()));
        assert!(calls.iter().any(|c| c.starts_with("connect ")));
    }

    #[tokio::test]
    async fn disconnect_command_tears_the_group_down() {
        let platform = Arc::new(FakePlatform::new());
        *platform.info.lock().unwrap() = Some(sample_info());

        let (notif_tx, notif_rx) = mpsc::channel(8);
        let bus = ObserverBus::default();
        let mut rx = bus.subscribe();
        let session = spawn_session(platform.clone(), notif_rx, bus);

        session.command(SessionCmd::StartDiscovery).await;
        session
            .command(SessionCmd::Connect(sample_peer("pixel")))
            .await;
        notif_tx
            .send(PlatformNotification::ConnectivityChanged(true))
            .await
            .unwrap();
        wait_for_event(&mut rx, |e| {
            matches!(e, BusEvent::Session(SessionState::Connected(_)))
        })
        .await;

        session.command(SessionCmd::Disconnect).await;
        wait_for_event(&mut rx, |e| {
            matches!(e, BusEvent::Session(SessionState::Disconnected))
        })
        .await;

        let calls = platform.recorded_calls();
        assert!(calls.contains(&"disconnect".to_string()));
        assert!(calls.contains(&"remove_group".to_string()));
    }

    #[tokio::test]
    async fn radio_disable_resets_to_idle_with_empty_peers() {
        let platform = Arc::new(FakePlatform::new());
        let (notif_tx, notif_rx) = mpsc::channel(8);
        let bus = ObserverBus::default();
        let mut rx = bus.subscribe();
        let session = spawn_session(platform, notif_rx, bus);

        session.command(SessionCmd::StartDiscovery).await;
        wait_for_event(&mut rx, |e| {
            matches!(e, BusEvent::Session(SessionState::Discovering))
        })
        .await;

        notif_tx
            .send(PlatformNotification::RadioStateChanged(false))
            .await
            .unwrap();
        wait_for_event(&mut rx, |e| {
            matches!(e, BusEvent::Session(SessionState::Idle))
        })
        .await;
        let ev = wait_for_event(&mut rx, |e| matches!(e, BusEvent::Peers(_))).await;
        match ev {
            BusEvent::Peers(peers) => assert!(peers.is_empty()),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn failing_platform_call_is_surfaced_on_the_log_stream() {
        struct RefusingPlatform;
        impl Platform for RefusingPlatform {
            async fn discover_peers(&self) -> Result<(), crate::platform::PlatformError> {
                Err(crate::platform::PlatformError::Rejected("radio off".into()))
            }
            async fn connect(
                &self,
                _peer: &crate::device::PeerDevice,
            ) -> Result<(), crate::platform::PlatformError> {
                Ok(())
            }
            async fn disconnect(&self) -> Result<(), crate::platform::PlatformError> {
                Ok(())
            }
            async fn remove_group(&self) -> Result<(), crate::platform::PlatformError> {
                Ok(())
            }
            async fn request_peers(
                &self,
            ) -> Result<Vec<crate::device::PeerDevice>, crate::platform::PlatformError> {
                Ok(Vec::new())
            }
            async fn request_connection_info(
                &self,
            ) -> Result<crate::device::ConnectionInfo, crate::platform::PlatformError> {
                Err(crate::platform::PlatformError::Rejected("none".into()))
            }
        }

        let (_notif_tx, notif_rx) = mpsc::channel(8);
        let bus = ObserverBus::default();
        let mut rx = bus.subscribe();
        let session = spawn_session(Arc::new(RefusingPlatform), notif_rx, bus);

        session.command(SessionCmd::StartDiscovery).await;
        // The state still advances; the failure rides the log stream.
        wait_for_event(&mut rx, |e| {
            matches!(e, BusEvent::Session(SessionState::Discovering))
        })
        .await;
        wait_for_event(&mut rx, |e| {
            matches!(e, BusEvent::Log(line) if line.contains("platform call failed"))
        })
        .await;
    }
}
