//! Defines shared data structures for the Bluetooth module.

use std::sync::Arc;

use crate::core::bluetooth::bus::{BlePeer, GattCharacteristic};
use crate::core::registry::DeviceDescriptor;

/// A peripheral seen during the scan window
#[derive(Clone)]
pub struct BlePeerCandidate {
    /// Bus object path of the peripheral
    pub path: String,
    /// The signal strength (RSSI) of the peripheral
    pub rssi: i16,
    /// Handle to the bus device object
    pub peer: Arc<dyn BlePeer>,
    /// The registry entry whose serial number matches the radio address, if any
    pub device: Option<DeviceDescriptor>,
}

impl std::fmt::Debug for BlePeerCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlePeerCandidate")
            .field("path", &self.path)
            .field("rssi", &self.rssi)
            .field("device", &self.device)
            .finish()
    }
}

/// The four characteristics of the Plejd service
#[derive(Clone)]
pub struct PlejdCharacteristics {
    /// Encrypted commands are written here
    pub data: Arc<dyn GattCharacteristic>,
    /// Notifies encrypted mesh events
    pub last_data: Arc<dyn GattCharacteristic>,
    /// Challenge/response handshake
    pub auth: Arc<dyn GattCharacteristic>,
    /// Keepalive ping/pong
    pub ping: Arc<dyn GattCharacteristic>,
}

/// Represents the single active, bound link to the mesh.
/// A `Session` is either fully populated or absent.
#[derive(Clone)]
pub struct Session {
    /// The connected peripheral
    pub peer: Arc<dyn BlePeer>,
    /// Peer radio address, byte order reversed from its textual form
    pub address: [u8; 6],
    pub characteristics: PlejdCharacteristics,
}

/// Last known state of a mesh device, as reported by notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceRuntimeState {
    pub state: u8,
    pub dim: u8,
}

impl DeviceRuntimeState {
    /// Brightness used as the starting point of a transition: an off device counts as 0
    pub fn brightness(&self) -> u8 {
        if self.state == 0 { 0 } else { self.dim }
    }
}
