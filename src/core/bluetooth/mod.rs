//! Bluetooth functionality for the Plejd gateway
//! This module handles all bluetooth operations including scanning,
//! connecting, authenticating and exchanging encrypted data with the mesh.

pub mod bluest_bus;
pub mod bus;
pub mod commands;
pub mod connection;
pub mod constants;
pub mod crypto;
pub mod gatt;
pub mod keepalive;
pub mod manager;
pub mod notification;
pub mod scanner;
pub mod single_flight;
pub mod transition;
pub mod types;
pub mod write_queue;

// Re-export types that should be publicly accessible
pub use bluest_bus::BluestAdapter;
pub use bus::{BleAdapter, BlePeer, BusError, GattCharacteristic, GattService, ValueStream};
pub use commands::PlejdCommand;
pub use connection::ConnectionManager;
pub use crypto::CryptoKey;
pub use manager::{ConnectionState, ManagerSettings, PlejdManager};
pub use notification::NotificationHandler;
pub use scanner::BluetoothScanner;
pub use types::{BlePeerCandidate, DeviceRuntimeState, PlejdCharacteristics, Session};
