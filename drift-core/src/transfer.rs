//! Transfer attempt state, error taxonomy, and the single-attempt gate.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::wire::{FrameDecodeError, FrameEncodeError};

/// Bytes moved per read/write cycle.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// How long the receiver waits for the sender to dial in.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(15);

/// Progress of one transfer attempt. A new attempt supersedes the previous
/// value outright; nothing is merged.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferState {
    Idle,
    Connecting,
    Transferring { bytes: u64 },
    Succeeded { path: PathBuf },
    Failed { kind: TransferErrorKind, message: String },
}

/// Anything that ends a transfer attempt early.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("connection failed: {0}")]
    Connectivity(#[source] std::io::Error),
    #[error("timed out waiting for a connection")]
    Timeout,
    #[error("bad metadata frame: {0}")]
    Protocol(#[from] FrameDecodeError),
    #[error("metadata frame rejected: {0}")]
    Encode(#[from] FrameEncodeError),
    #[error("unusable file name {0:?}")]
    BadFileName(String),
    #[error("transfer i/o failed: {0}")]
    Io(#[source] std::io::Error),
}

/// Coarse classification carried on the bus; the full error is rendered into
/// the failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferErrorKind {
    Connectivity,
    Timeout,
    Protocol,
    Io,
}

impl TransferError {
    pub fn kind(&self) -> TransferErrorKind {
        match self {
            TransferError::Connectivity(_) => TransferErrorKind::Connectivity,
            TransferError::Timeout => TransferErrorKind::Timeout,
            TransferError::Protocol(_) | TransferError::Encode(_) | TransferError::BadFileName(_) => {
                TransferErrorKind::Protocol
            }
            TransferError::Io(_) => TransferErrorKind::Io,
        }
    }

    /// Fold the error into the terminal state published on the bus.
    pub(crate) fn into_state(self) -> TransferState {
        TransferState::Failed {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Single-attempt gate shared between the command issuer and the worker.
/// `acquire` check-and-sets atomically; dropping the permit re-opens the gate
/// on every exit path.
#[derive(Debug, Clone, Default)]
pub(crate) struct AttemptGate {
    active: Arc<AtomicBool>,
}

impl AttemptGate {
    pub(crate) fn acquire(&self) -> Option<AttemptPermit> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then(|| AttemptPermit {
                active: self.active.clone(),
            })
    }
}

pub(crate) struct AttemptPermit {
    active: Arc<AtomicBool>,
}

impl Drop for AttemptPermit {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_admits_one_attempt_at_a_time() {
        let gate = AttemptGate::default();
        let permit = gate.acquire().expect("first acquire");
        assert!(gate.acquire().is_none());
        drop(permit);
        assert!(gate.acquire().is_some());
    }

    #[test]
    fn error_kinds() {
        assert_eq!(TransferError::Timeout.kind(), TransferErrorKind::Timeout);
        assert_eq!(
            TransferError::BadFileName("..".into()).kind(),
            TransferErrorKind::Protocol
        );
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(
            TransferError::Connectivity(io).kind(),
            TransferErrorKind::Connectivity
        );
    }

    #[test]
    fn failed_state_carries_kind_and_cause() {
        let state = TransferError::Timeout.into_state();
        match state {
            TransferState::Failed { kind, message } => {
                assert_eq!(kind, TransferErrorKind::Timeout);
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }
}
