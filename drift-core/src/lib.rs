//! Drift: peer-to-peer file transfer over a direct wireless link.
//! Host-driven engine: platform notifications and host commands flow in,
//! session state and transfer progress flow out over the observer bus.

pub mod adapter;
pub mod bus;
pub mod device;
pub mod driver;
pub mod event;
pub mod platform;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod transfer;
pub mod wire;

pub use bus::{BusEvent, ObserverBus};
pub use device::{ConnectionInfo, DeviceStatus, PeerDevice};
pub use driver::{spawn_session, SessionHandle};
pub use event::{DomainEvent, SessionCmd};
pub use platform::{Platform, PlatformError, PlatformNotification};
pub use receiver::FileReceiver;
pub use sender::FileSender;
pub use session::{SessionMachine, SessionState};
pub use transfer::{TransferError, TransferErrorKind, TransferState};
pub use wire::{decode_frame, encode_frame, TransferMetadata};
