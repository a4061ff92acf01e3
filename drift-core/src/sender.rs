//! Sending side of a transfer: dial the receiver, frame the metadata, stream
//! the file.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::bus::{BusEvent, ObserverBus};
use crate::transfer::{AttemptGate, TransferError, TransferState, CHUNK_SIZE};
use crate::wire::{self, TransferMetadata};

/// Sender role of the transfer protocol. One attempt at a time; starting a
/// second while one runs is a logged no-op.
pub struct FileSender {
    bus: ObserverBus,
    gate: AttemptGate,
}

impl FileSender {
    pub fn new(bus: ObserverBus) -> Self {
        Self {
            bus,
            gate: AttemptGate::default(),
        }
    }

    /// Stream `file_path` to `peer_addr:port` on a worker task. Must be
    /// called from within a tokio runtime. Returns false when a send attempt
    /// is already active.
    pub fn send_file(&self, peer_addr: IpAddr, port: u16, file_path: impl Into<PathBuf>) -> bool {
        let Some(permit) = self.gate.acquire() else {
            self.bus.log("send attempt already active, ignoring start");
            return false;
        };
        let bus = self.bus.clone();
        let path = file_path.into();
        let addr = SocketAddr::new(peer_addr, port);
        tokio::spawn(async move {
            let _permit = permit;
            match send_one(addr, &path, &bus).await {
                Ok(()) => {
                    info!(path = %path.display(), "file sent");
                    bus.log("file sent");
                    bus.publish(BusEvent::Transfer(TransferState::Succeeded { path }));
                }
                Err(e) => {
                    warn!(error = %e, "send attempt failed");
                    bus.log(format!("send failed: {e}"));
                    bus.publish(BusEvent::Transfer(e.into_state()));
                }
            }
        });
        true
    }
}

async fn send_one(addr: SocketAddr, path: &Path, bus: &ObserverBus) -> Result<(), TransferError> {
    bus.publish(BusEvent::Transfer(TransferState::Idle));
    bus.publish(BusEvent::Transfer(TransferState::Connecting));
    let metadata = describe(path).await?;
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(TransferError::Connectivity)?;
    bus.log(format!(
        "connected to {addr}, sending {:?} ({} bytes)",
        metadata.file_name, metadata.size
    ));

    let frame = wire::encode_frame(&metadata)?;
    stream.write_all(&frame).await.map_err(TransferError::Io)?;
    bus.publish(BusEvent::Transfer(TransferState::Transferring { bytes: 0 }));

    let mut file = fs::File::open(path).await.map_err(TransferError::Io)?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;
    loop {
        let n = file.read(&mut buf).await.map_err(TransferError::Io)?;
        if n == 0 {
            break;
        }
        stream.write_all(&buf[..n]).await.map_err(TransferError::Io)?;
        sent += n as u64;
        bus.publish(BusEvent::Transfer(TransferState::Transferring { bytes: sent }));
    }
    // Closing the write side is the end-of-file marker for the receiver.
    stream.shutdown().await.map_err(TransferError::Io)?;
    Ok(())
}

async fn describe(path: &Path) -> Result<TransferMetadata, TransferError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TransferError::BadFileName(path.display().to_string()))?
        .to_string();
    let size = fs::metadata(path).await.map_err(TransferError::Io)?.len();
    Ok(TransferMetadata { file_name, size })
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::sync::broadcast;

    use super::*;
    use crate::transfer::TransferErrorKind;

    async fn terminal_state(rx: &mut broadcast::Receiver<BusEvent>) -> TransferState {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let BusEvent::Transfer(state) = rx.recv().await.expect("bus closed") {
                    if matches!(
                        state,
                        TransferState::Succeeded { .. } | TransferState::Failed { .. }
                    ) {
                        return state;
                    }
                }
            }
        })
        .await
        .expect("no terminal transfer state")
    }

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[tokio::test]
    async fn refused_connection_reports_connectivity_failure() {
        // Grab a port that nothing listens on once the listener drops.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("x.bin");
        std::fs::write(&src, b"data").unwrap();

        let bus = ObserverBus::default();
        let mut rx = bus.subscribe();
        let sender = FileSender::new(bus);
        assert!(sender.send_file(localhost(), port, &src));

        assert!(matches!(
            terminal_state(&mut rx).await,
            TransferState::Failed {
                kind: TransferErrorKind::Connectivity,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_file_reports_io_failure() {
        let bus = ObserverBus::default();
        let mut rx = bus.subscribe();
        let sender = FileSender::new(bus);
        assert!(sender.send_file(localhost(), 1, "/no/such/file.bin"));

        assert!(matches!(
            terminal_state(&mut rx).await,
            TransferState::Failed {
                kind: TransferErrorKind::Io,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn second_send_is_a_noop_while_one_is_active() {
        // A listener that accepts nothing: the first attempt blocks once the
        // socket buffers fill, keeping its permit held.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("big.bin");
        std::fs::write(&src, vec![0u8; 32 * 1024 * 1024]).unwrap();

        let bus = ObserverBus::default();
        let sender = FileSender::new(bus);
        assert!(sender.send_file(localhost(), port, &src));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!sender.send_file(localhost(), port, &src));
        drop(listener);
    }
}
