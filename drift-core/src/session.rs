//! Session lifecycle state machine. Host-driven: the driver feeds commands
//! and domain events in, the machine hands effects back. No I/O in here.

use tracing::debug;

use crate::bus::BusEvent;
use crate::device::{ConnectionInfo, PeerDevice};
use crate::event::{DomainEvent, SessionCmd};

/// Connection phase of the current session. Exactly one is current at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Discovering,
    Connecting,
    Connected(ConnectionInfo),
    Disconnected,
}

/// Control call the driver issues against the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformCall {
    Discover,
    Connect(PeerDevice),
    Disconnect,
}

/// Work handed back to the driver after each input.
#[derive(Debug, Clone)]
pub enum SessionEffect {
    Call(PlatformCall),
    Publish(BusEvent),
}

/// The authoritative session state. Transitions happen only here; everything
/// the outside world learns travels out as effects.
pub struct SessionMachine {
    state: SessionState,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn on_command(&mut self, cmd: SessionCmd) -> Vec<SessionEffect> {
        match cmd {
            SessionCmd::StartDiscovery => match self.state {
                SessionState::Idle | SessionState::Disconnected => {
                    let mut effects = vec![SessionEffect::Call(PlatformCall::Discover)];
                    effects.extend(self.transition(SessionState::Discovering));
                    effects
                }
                _ => self.ignored("start-discovery command"),
            },
            SessionCmd::Connect(peer) => match self.state {
                SessionState::Discovering => {
                    let mut effects = vec![
                        SessionEffect::Publish(BusEvent::Log(format!("connecting to {peer}"))),
                        SessionEffect::Call(PlatformCall::Connect(peer)),
                    ];
                    effects.extend(self.transition(SessionState::Connecting));
                    effects
                }
                _ => self.ignored("connect command"),
            },
            SessionCmd::Disconnect => match self.state {
                SessionState::Connected(_) => {
                    let mut effects = vec![SessionEffect::Call(PlatformCall::Disconnect)];
                    effects.extend(self.transition(SessionState::Disconnected));
                    effects
                }
                _ => self.ignored("disconnect command"),
            },
        }
    }

    pub fn on_event(&mut self, event: DomainEvent) -> Vec<SessionEffect> {
        match event {
            DomainEvent::RadioEnabled(true) => {
                vec![SessionEffect::Publish(BusEvent::Log("radio enabled".into()))]
            }
            DomainEvent::RadioEnabled(false) => {
                // Hard reset; an in-flight connection attempt is abandoned.
                let mut effects = vec![SessionEffect::Publish(BusEvent::Log(
                    "radio disabled".into(),
                ))];
                effects.extend(self.transition(SessionState::Idle));
                effects
            }
            // Peer and self-device snapshots are orthogonal to the phase.
            DomainEvent::PeersAvailable(devices) => {
                vec![SessionEffect::Publish(BusEvent::Peers(devices))]
            }
            DomainEvent::SelfDeviceChanged(device) => {
                vec![SessionEffect::Publish(BusEvent::SelfDevice(device))]
            }
            DomainEvent::ConnectionInfoAvailable(info) => match self.state {
                SessionState::Connecting => self.transition(SessionState::Connected(info)),
                _ => self.ignored("connection info"),
            },
            DomainEvent::Disconnected => match self.state {
                SessionState::Connecting => {
                    let mut effects = vec![SessionEffect::Publish(BusEvent::Log(
                        "connection attempt failed: peer rejected or timed out".into(),
                    ))];
                    effects.extend(self.transition(SessionState::Disconnected));
                    effects
                }
                SessionState::Connected(_) => self.transition(SessionState::Disconnected),
                _ => self.ignored("disconnect notification"),
            },
        }
    }

    /// Move to `next` and publish it. A no-op transition publishes nothing.
    fn transition(&mut self, next: SessionState) -> Vec<SessionEffect> {
        if self.state == next {
            return Vec::new();
        }
        debug!(from = ?self.state, to = ?next, "session transition");
        self.state = next;
        vec![SessionEffect::Publish(BusEvent::Session(self.state.clone()))]
    }

    fn ignored(&self, what: &str) -> Vec<SessionEffect> {
        debug!(state = ?self.state, "ignoring unsolicited {what}");
        vec![SessionEffect::Publish(BusEvent::Log(format!(
            "ignored {what} while {:?}",
            self.state
        )))]
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}
