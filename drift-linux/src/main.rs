// Drift daemon: LAN discovery, session wiring, send and receive roles.

mod config;
mod lan;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand};
use drift_core::{
    BusEvent, ConnectionInfo, FileReceiver, FileSender, ObserverBus, PeerDevice, SessionCmd,
    SessionHandle, SessionState, TransferErrorKind, TransferState,
};
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Pause between the link forming and the first dial, so the receiver is at
/// its socket before the sender knocks.
const CONNECT_GRACE: Duration = Duration::from_millis(750);
const RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_SEND_ATTEMPTS: u32 = 3;

#[derive(Parser)]
#[command(name = "drift", version, about = "Direct peer-to-peer file transfer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for a peer and receive one file.
    Receive,
    /// Discover a peer, connect, and send one file.
    Send {
        file: PathBuf,
        /// Peer name or address to dial; defaults to the first peer found.
        #[arg(long)]
        peer: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    let cfg = config::load();
    info!(device = %cfg.device_name, "starting drift");

    let (platform, notifications) =
        lan::LanPlatform::spawn(cfg.device_name.clone(), cfg.discovery_port).await?;
    let bus = ObserverBus::default();
    let events = bus.subscribe();
    let session = drift_core::spawn_session(platform, notifications, bus.clone());
    session.command(SessionCmd::StartDiscovery).await;

    let outcome = tokio::select! {
        result = run_role(cli.command, &cfg, &bus, &session, events) => result,
        result = shutdown_signal() => {
            info!("shutting down");
            result.map_err(Into::into)
        }
    };
    session.command(SessionCmd::Disconnect).await;
    outcome
}

async fn run_role(
    command: Command,
    cfg: &config::Config,
    bus: &ObserverBus,
    session: &SessionHandle,
    events: broadcast::Receiver<BusEvent>,
) -> anyhow::Result<()> {
    match command {
        Command::Receive => run_receive(cfg, bus, events).await,
        Command::Send { file, peer } => run_send(cfg, bus, session, events, file, peer).await,
    }
}

async fn run_receive(
    cfg: &config::Config,
    bus: &ObserverBus,
    mut events: broadcast::Receiver<BusEvent>,
) -> anyhow::Result<()> {
    let mut receiver = FileReceiver::new(bus.clone());
    receiver.set_accept_timeout(Duration::from_secs(cfg.accept_timeout_secs));
    let Some(addr) = receiver.start_listening(&cfg.save_dir, cfg.transfer_port) else {
        bail!("could not start listening on port {}", cfg.transfer_port);
    };
    println!(
        "receiving into {} (listening on {addr})",
        cfg.save_dir.display()
    );
    loop {
        match events.recv().await {
            Ok(event) => {
                report(&event);
                match event {
                    BusEvent::Transfer(TransferState::Succeeded { path }) => {
                        println!("saved {}", path.display());
                        return Ok(());
                    }
                    BusEvent::Transfer(TransferState::Failed { message, .. }) => {
                        bail!("receive failed: {message}");
                    }
                    _ => {}
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => bail!("engine stopped"),
        }
    }
}

async fn run_send(
    cfg: &config::Config,
    bus: &ObserverBus,
    session: &SessionHandle,
    mut events: broadcast::Receiver<BusEvent>,
    file: PathBuf,
    peer: Option<String>,
) -> anyhow::Result<()> {
    anyhow::ensure!(file.is_file(), "{} is not a file", file.display());
    let sender = FileSender::new(bus.clone());
    let mut invited = false;
    let mut connected: Option<ConnectionInfo> = None;
    let mut attempts = 0u32;
    println!("looking for a peer...");
    loop {
        match events.recv().await {
            Ok(event) => {
                report(&event);
                match event {
                    BusEvent::Peers(peers) if !invited => {
                        if let Some(target) = pick_peer(&peers, peer.as_deref()) {
                            println!("connecting to {target}");
                            session.command(SessionCmd::Connect(target)).await;
                            invited = true;
                        }
                    }
                    BusEvent::Session(SessionState::Connected(info)) if connected.is_none() => {
                        connected = Some(info);
                        tokio::time::sleep(CONNECT_GRACE).await;
                        attempts = 1;
                        anyhow::ensure!(
                            sender.send_file(info.group_owner_addr, cfg.transfer_port, &file),
                            "a send attempt is already active"
                        );
                    }
                    BusEvent::Session(SessionState::Disconnected) if connected.is_none() => {
                        bail!("the peer rejected the connection or timed out");
                    }
                    BusEvent::Transfer(TransferState::Succeeded { path }) => {
                        println!("sent {}", path.display());
                        return Ok(());
                    }
                    BusEvent::Transfer(TransferState::Failed { kind, message }) => {
                        let retryable =
                            kind == TransferErrorKind::Connectivity && attempts < MAX_SEND_ATTEMPTS;
                        match (retryable, connected) {
                            (true, Some(info)) => {
                                info!(%message, "dial failed, retrying");
                                tokio::time::sleep(RETRY_DELAY).await;
                                attempts += 1;
                                sender.send_file(info.group_owner_addr, cfg.transfer_port, &file);
                            }
                            _ => bail!("send failed: {message}"),
                        }
                    }
                    _ => {}
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => bail!("engine stopped"),
        }
    }
}

/// Choose the peer to dial: an explicit selector matches name or address,
/// otherwise the first discovered peer wins.
fn pick_peer(peers: &[PeerDevice], selector: Option<&str>) -> Option<PeerDevice> {
    match selector {
        Some(sel) => peers
            .iter()
            .find(|p| p.name == sel || p.address == sel)
            .cloned(),
        None => peers.first().cloned(),
    }
}

fn report(event: &BusEvent) {
    match event {
        BusEvent::Log(line) => info!("{line}"),
        BusEvent::Session(state) => info!(?state, "session"),
        BusEvent::Peers(peers) => {
            for peer in peers {
                info!(%peer, "peer");
            }
        }
        BusEvent::SelfDevice(device) => info!(%device, "this device"),
        BusEvent::Transfer(TransferState::Transferring { bytes }) => {
            debug!(bytes, "transferring");
        }
        BusEvent::Transfer(_) => {}
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
