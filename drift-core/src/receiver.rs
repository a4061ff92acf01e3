//! Receiving side of a transfer: listen, read the metadata frame, stream the
//! payload to disk.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::bus::{BusEvent, ObserverBus};
use crate::transfer::{
    AttemptGate, TransferError, TransferState, CHUNK_SIZE, DEFAULT_ACCEPT_TIMEOUT,
};
use crate::wire;

/// Receiver role of the transfer protocol. One attempt at a time; starting a
/// second while one runs is a logged no-op.
pub struct FileReceiver {
    bus: ObserverBus,
    gate: AttemptGate,
    accept_timeout: Duration,
}

impl FileReceiver {
    pub fn new(bus: ObserverBus) -> Self {
        Self {
            bus,
            gate: AttemptGate::default(),
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
        }
    }

    /// Set how long to wait for the sender before giving up.
    pub fn set_accept_timeout(&mut self, accept_timeout: Duration) {
        self.accept_timeout = accept_timeout;
    }

    /// Bind on `port` and accept one transfer into `save_dir`, on a worker
    /// task. Must be called from within a tokio runtime. Returns the bound
    /// address, or `None` when an attempt is already active or the bind
    /// fails; either way the outcome is reported through the bus.
    pub fn start_listening(&self, save_dir: impl Into<PathBuf>, port: u16) -> Option<SocketAddr> {
        let Some(permit) = self.gate.acquire() else {
            self.bus.log("receive attempt already active, ignoring start");
            return None;
        };
        // Fresh attempt: supersede whatever the previous one left behind.
        self.bus.publish(BusEvent::Transfer(TransferState::Idle));
        self.bus.publish(BusEvent::Transfer(TransferState::Connecting));
        self.bus.log("opening socket");
        let (listener, addr) = match bind_reusable(port) {
            Ok(bound) => bound,
            Err(e) => {
                let err = TransferError::Connectivity(e);
                warn!(error = %err, port, "bind failed");
                self.bus.log(format!("receive failed: {err}"));
                self.bus.publish(BusEvent::Transfer(err.into_state()));
                drop(permit);
                return None;
            }
        };
        let bus = self.bus.clone();
        let save_dir = save_dir.into();
        let accept_timeout = self.accept_timeout;
        tokio::spawn(async move {
            // Held for the whole attempt; dropping it re-opens the gate on
            // every exit path.
            let _permit = permit;
            match receive_one(listener, &save_dir, accept_timeout, &bus).await {
                Ok(path) => {
                    info!(path = %path.display(), "file received");
                    bus.log("file received");
                    bus.publish(BusEvent::Transfer(TransferState::Succeeded { path }));
                }
                Err(e) => {
                    warn!(error = %e, "receive attempt failed");
                    bus.log(format!("receive failed: {e}"));
                    bus.publish(BusEvent::Transfer(e.into_state()));
                }
            }
        });
        Some(addr)
    }
}

/// Bind a listener with address reuse so a fresh attempt can claim a port the
/// previous one just released.
fn bind_reusable(port: u16) -> std::io::Result<(TcpListener, SocketAddr)> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    socket.bind(&addr.into())?;
    socket.listen(1)?;
    socket.set_nonblocking(true)?;
    let listener = TcpListener::from_std(socket.into())?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}

async fn receive_one(
    listener: TcpListener,
    save_dir: &Path,
    accept_timeout: Duration,
    bus: &ObserverBus,
) -> Result<PathBuf, TransferError> {
    bus.log(format!(
        "waiting up to {}s for the sender to connect",
        accept_timeout.as_secs_f32()
    ));
    let (mut stream, peer) = match timeout(accept_timeout, listener.accept()).await {
        Ok(Ok(accepted)) => accepted,
        Ok(Err(e)) => return Err(TransferError::Connectivity(e)),
        Err(_) => return Err(TransferError::Timeout),
    };
    // One inbound connection per attempt; release the port right away.
    drop(listener);
    info!(peer = %peer, "sender connected");
    bus.publish(BusEvent::Transfer(TransferState::Transferring { bytes: 0 }));

    let metadata = wire::read_frame(&mut stream).await?;
    let file_name = sanitize_file_name(&metadata.file_name)
        .ok_or_else(|| TransferError::BadFileName(metadata.file_name.clone()))?;
    fs::create_dir_all(save_dir)
        .await
        .map_err(TransferError::Io)?;
    let path = save_dir.join(file_name);
    bus.log(format!(
        "receiving {:?} ({} bytes) into {}",
        metadata.file_name,
        metadata.size,
        path.display()
    ));

    let mut file = fs::File::create(&path).await.map_err(TransferError::Io)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut received: u64 = 0;
    loop {
        let n = stream.read(&mut buf).await.map_err(TransferError::Io)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await.map_err(TransferError::Io)?;
        received += n as u64;
        bus.publish(BusEvent::Transfer(TransferState::Transferring {
            bytes: received,
        }));
    }
    file.flush().await.map_err(TransferError::Io)?;
    Ok(path)
}

/// Reduce a sender-supplied name to its final path component so it cannot
/// escape the save directory. Names with no usable component fail the
/// attempt.
fn sanitize_file_name(name: &str) -> Option<String> {
    let unified = name.replace('\\', "/");
    let candidate = Path::new(&unified).file_name()?.to_str()?;
    if candidate.is_empty() || candidate == "." || candidate == ".." {
        return None;
    }
    Some(candidate.to_string())
}
