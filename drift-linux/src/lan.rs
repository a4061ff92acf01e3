//! LAN platform: UDP multicast beacons stand in for the radio subsystem.
//! Peers advertise themselves on a multicast group, link formation is a
//! unicast request/ack handshake, and the accepting side hosts the group.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use drift_core::{
    ConnectionInfo, DeviceStatus, PeerDevice, Platform, PlatformError, PlatformNotification,
};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 71, 71);
const BEACON_INTERVAL: Duration = Duration::from_secs(4);
const PEER_TIMEOUT: Duration = Duration::from_secs(16);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_DATAGRAM: usize = 2048;

/// Messages exchanged on the discovery port. Bincode-encoded, one per
/// datagram.
#[derive(Debug, Serialize, Deserialize)]
enum LanMessage {
    /// Periodic presence advertisement; answered with a reply.
    Beacon { instance: u64, name: String },
    /// Unicast answer to a beacon; never answered again.
    BeaconReply { instance: u64, name: String },
    /// Ask the peer to form a direct link.
    ConnectRequest { instance: u64, name: String },
    /// Accept a connect request; the accepting side hosts the group.
    ConnectAck,
    /// Tear the link down.
    Disconnect,
}

struct PeerEntry {
    device: PeerDevice,
    addr: SocketAddr,
    last_seen: Instant,
}

struct Link {
    peer_addr: SocketAddr,
    is_group_owner: bool,
}

#[derive(Default)]
struct Inner {
    /// Known peers, ordered by discovery arrival.
    peers: Vec<PeerEntry>,
    /// Outbound connect awaiting an ack.
    pending: Option<(SocketAddr, Instant)>,
    link: Option<Link>,
}

pub struct LanPlatform {
    instance: u64,
    name: String,
    socket: Arc<UdpSocket>,
    group_addr: SocketAddr,
    inner: Mutex<Inner>,
    notif_tx: mpsc::Sender<PlatformNotification>,
}

impl LanPlatform {
    /// Bind the discovery socket and start the beacon, receive and expiry
    /// loops. The returned receiver is the platform notification stream.
    pub async fn spawn(
        name: String,
        discovery_port: u16,
    ) -> anyhow::Result<(Arc<Self>, mpsc::Receiver<PlatformNotification>)> {
        let socket = make_multicast_socket(discovery_port)?;
        let (notif_tx, notif_rx) = mpsc::channel(32);
        let platform = Arc::new(Self {
            instance: instance_id(),
            name,
            socket: Arc::new(socket),
            group_addr: SocketAddr::new(IpAddr::V4(MULTICAST_GROUP), discovery_port),
            inner: Mutex::new(Inner::default()),
            notif_tx,
        });
        tokio::spawn(recv_loop(platform.clone()));
        tokio::spawn(beacon_loop(platform.clone()));
        tokio::spawn(expiry_loop(platform.clone()));

        // The radio is "on" as soon as the socket is bound.
        let self_device = PeerDevice {
            name: platform.name.clone(),
            address: platform.socket.local_addr()?.to_string(),
            status: DeviceStatus::Available,
        };
        platform
            .notify(PlatformNotification::RadioStateChanged(true))
            .await;
        platform
            .notify(PlatformNotification::SelfDeviceChanged(self_device))
            .await;
        Ok((platform, notif_rx))
    }

    async fn notify(&self, notification: PlatformNotification) {
        if self.notif_tx.send(notification).await.is_err() {
            debug!("notification receiver dropped");
        }
    }

    async fn send_message(&self, message: &LanMessage, to: SocketAddr) {
        match bincode::serialize(message) {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, to).await {
                    warn!(error = %e, %to, "discovery send failed");
                }
            }
            Err(e) => warn!(error = %e, "discovery encode failed"),
        }
    }

    /// Record or refresh a peer. Returns true when the list changed.
    async fn upsert_peer(&self, name: &str, addr: SocketAddr) -> bool {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.peers.iter_mut().find(|p| p.addr == addr) {
            entry.last_seen = Instant::now();
            if entry.device.name != name {
                entry.device.name = name.to_string();
                return true;
            }
            return false;
        }
        inner.peers.push(PeerEntry {
            device: PeerDevice {
                name: name.to_string(),
                address: addr.to_string(),
                status: DeviceStatus::Available,
            },
            addr,
            last_seen: Instant::now(),
        });
        true
    }

    async fn handle_message(&self, message: LanMessage, from: SocketAddr) {
        match message {
            LanMessage::Beacon { instance, name } => {
                if instance == self.instance {
                    return;
                }
                let changed = self.upsert_peer(&name, from).await;
                let reply = LanMessage::BeaconReply {
                    instance: self.instance,
                    name: self.name.clone(),
                };
                self.send_message(&reply, from).await;
                if changed {
                    self.notify(PlatformNotification::PeersChanged).await;
                }
            }
            LanMessage::BeaconReply { instance, name } => {
                if instance == self.instance {
                    return;
                }
                if self.upsert_peer(&name, from).await {
                    self.notify(PlatformNotification::PeersChanged).await;
                }
            }
            LanMessage::ConnectRequest { instance, name } => {
                if instance == self.instance {
                    return;
                }
                self.upsert_peer(&name, from).await;
                {
                    let mut inner = self.inner.lock().await;
                    inner.link = Some(Link {
                        peer_addr: from,
                        is_group_owner: true,
                    });
                    inner.pending = None;
                    set_status(&mut inner.peers, from, DeviceStatus::Connected);
                }
                self.send_message(&LanMessage::ConnectAck, from).await;
                self.notify(PlatformNotification::PeersChanged).await;
                self.notify(PlatformNotification::ConnectivityChanged(true))
                    .await;
            }
            LanMessage::ConnectAck => {
                let accepted = {
                    let mut inner = self.inner.lock().await;
                    match inner.pending.take() {
                        Some((addr, _)) if addr == from => {
                            inner.link = Some(Link {
                                peer_addr: from,
                                is_group_owner: false,
                            });
                            set_status(&mut inner.peers, from, DeviceStatus::Connected);
                            true
                        }
                        other => {
                            inner.pending = other;
                            false
                        }
                    }
                };
                if accepted {
                    self.notify(PlatformNotification::PeersChanged).await;
                    self.notify(PlatformNotification::ConnectivityChanged(true))
                        .await;
                } else {
                    debug!(%from, "ignoring unexpected connect ack");
                }
            }
            LanMessage::Disconnect => {
                let dropped = {
                    let mut inner = self.inner.lock().await;
                    let linked_to_sender =
                        inner.link.as_ref().is_some_and(|l| l.peer_addr == from);
                    if linked_to_sender {
                        inner.link = None;
                        set_status(&mut inner.peers, from, DeviceStatus::Available);
                    }
                    linked_to_sender
                };
                if dropped {
                    self.notify(PlatformNotification::PeersChanged).await;
                    self.notify(PlatformNotification::ConnectivityChanged(false))
                        .await;
                }
            }
        }
    }
}

impl Platform for LanPlatform {
    async fn discover_peers(&self) -> Result<(), PlatformError> {
        // An immediate beacon shortens the wait for the next interval tick.
        let beacon = LanMessage::Beacon {
            instance: self.instance,
            name: self.name.clone(),
        };
        let bytes =
            bincode::serialize(&beacon).map_err(|e| PlatformError::Rejected(e.to_string()))?;
        self.socket
            .send_to(&bytes, self.group_addr)
            .await
            .map_err(PlatformError::Io)?;
        Ok(())
    }

    async fn connect(&self, peer: &PeerDevice) -> Result<(), PlatformError> {
        let known = {
            let inner = self.inner.lock().await;
            inner
                .peers
                .iter()
                .find(|p| p.device.address == peer.address)
                .map(|p| p.addr)
        };
        let addr = known
            .or_else(|| peer.address.parse().ok())
            .ok_or_else(|| PlatformError::Rejected(format!("unknown peer {}", peer.address)))?;
        {
            let mut inner = self.inner.lock().await;
            inner.pending = Some((addr, Instant::now()));
            set_status(&mut inner.peers, addr, DeviceStatus::Invited);
        }
        self.notify(PlatformNotification::PeersChanged).await;
        let request = LanMessage::ConnectRequest {
            instance: self.instance,
            name: self.name.clone(),
        };
        self.send_message(&request, addr).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PlatformError> {
        let peer_addr = {
            let mut inner = self.inner.lock().await;
            inner.pending = None;
            let link = inner.link.take();
            if let Some(link) = &link {
                set_status(&mut inner.peers, link.peer_addr, DeviceStatus::Available);
            }
            link.map(|l| l.peer_addr)
        };
        if let Some(addr) = peer_addr {
            self.send_message(&LanMessage::Disconnect, addr).await;
            self.notify(PlatformNotification::PeersChanged).await;
            self.notify(PlatformNotification::ConnectivityChanged(false))
                .await;
        }
        Ok(())
    }

    async fn remove_group(&self) -> Result<(), PlatformError> {
        // Disconnect already tore the link down; clear any remnant.
        let mut inner = self.inner.lock().await;
        inner.link = None;
        inner.pending = None;
        Ok(())
    }

    async fn request_peers(&self) -> Result<Vec<PeerDevice>, PlatformError> {
        let inner = self.inner.lock().await;
        Ok(inner.peers.iter().map(|p| p.device.clone()).collect())
    }

    async fn request_connection_info(&self) -> Result<ConnectionInfo, PlatformError> {
        let link = {
            let inner = self.inner.lock().await;
            inner
                .link
                .as_ref()
                .map(|l| (l.peer_addr, l.is_group_owner))
        };
        let (peer_addr, is_group_owner) =
            link.ok_or_else(|| PlatformError::Rejected("no group formed".into()))?;
        let group_owner_addr = if is_group_owner {
            local_addr_towards(peer_addr)?
        } else {
            peer_addr.ip()
        };
        Ok(ConnectionInfo {
            group_formed: true,
            is_group_owner,
            group_owner_addr,
        })
    }
}

async fn recv_loop(platform: Arc<LanPlatform>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = match platform.socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "discovery receive failed");
                return;
            }
        };
        let Ok(message) = bincode::deserialize::<LanMessage>(&buf[..n]) else {
            debug!(%from, "ignoring undecodable datagram");
            continue;
        };
        platform.handle_message(message, from).await;
    }
}

async fn beacon_loop(platform: Arc<LanPlatform>) {
    loop {
        let beacon = LanMessage::Beacon {
            instance: platform.instance,
            name: platform.name.clone(),
        };
        platform.send_message(&beacon, platform.group_addr).await;
        tokio::time::sleep(BEACON_INTERVAL).await;
    }
}

/// Drop peers that stopped beaconing and give up on unanswered connect
/// requests.
async fn expiry_loop(platform: Arc<LanPlatform>) {
    loop {
        tokio::time::sleep(BEACON_INTERVAL).await;
        let now = Instant::now();
        let (peers_changed, connect_expired) = {
            let mut inner = platform.inner.lock().await;
            let before = inner.peers.len();
            inner
                .peers
                .retain(|p| now.duration_since(p.last_seen) < PEER_TIMEOUT);
            let peers_changed = inner.peers.len() != before;
            let connect_expired = match inner.pending {
                Some((_, since)) if now.duration_since(since) >= CONNECT_TIMEOUT => {
                    inner.pending = None;
                    true
                }
                _ => false,
            };
            (peers_changed, connect_expired)
        };
        if peers_changed {
            platform.notify(PlatformNotification::PeersChanged).await;
        }
        if connect_expired {
            // Unanswered invitation: surface it as a lost connection.
            platform
                .notify(PlatformNotification::ConnectivityChanged(false))
                .await;
        }
    }
}

fn set_status(peers: &mut [PeerEntry], addr: SocketAddr, status: DeviceStatus) {
    if let Some(entry) = peers.iter_mut().find(|p| p.addr == addr) {
        entry.device.status = status;
    }
}

fn make_multicast_socket(discovery_port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind(("0.0.0.0", discovery_port))?;
    std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

/// The local address the peer would see: route an ephemeral socket toward it
/// and read the chosen source address.
fn local_addr_towards(peer: SocketAddr) -> Result<IpAddr, PlatformError> {
    let probe = std::net::UdpSocket::bind(("0.0.0.0", 0)).map_err(PlatformError::Io)?;
    probe.connect(peer).map_err(PlatformError::Io)?;
    Ok(probe.local_addr().map_err(PlatformError::Io)?.ip())
}

fn instance_id() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    nanos ^ ((std::process::id() as u64) << 32)
}
