//! Error types for the Plejd gateway.

use thiserror::Error;

use crate::core::bluetooth::bus::BusError;

/// Errors raised by the BLE session engine.
///
/// The type is `Clone` so that a single reconnect outcome can be handed to
/// every caller waiting on the same in-flight `init()`.
#[derive(Debug, Clone, Error)]
pub enum PlejdError {
    #[error("no compatible bluetooth adapter found")]
    NoAdapter,

    #[error("failed to start discovery: {0}")]
    ScanRejected(String),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("no active Plejd session")]
    NotConnected,

    #[error("Plejd service not found on {0}")]
    ServiceNotFound(String),

    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(&'static str),

    #[error("ping mismatch: sent {sent}, received {received:?}")]
    PingMismatch { sent: u8, received: Option<u8> },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("invalid crypto key: {0}")]
    InvalidKey(String),

    #[error("unknown device id {0}")]
    UnknownDevice(u8),
}

pub type Result<T> = std::result::Result<T, PlejdError>;
