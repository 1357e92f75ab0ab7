//! Constants used throughout the gateway
//! This module contains the Plejd protocol identifiers, wire command
//! fragments and the fixed timing values of the session engine.

use uuid::Uuid;

/// The UUID of the Plejd mesh service
pub const UUID_PLEJD_SERVICE: Uuid = Uuid::from_u128(0x31ba0001_6085_4726_be45_040c957391b5);

/// Data characteristic, encrypted commands are written here
pub const UUID_DATA_CHAR: Uuid = Uuid::from_u128(0x31ba0004_6085_4726_be45_040c957391b5);

/// Last-data characteristic, mesh events are notified here
pub const UUID_LAST_DATA_CHAR: Uuid = Uuid::from_u128(0x31ba0005_6085_4726_be45_040c957391b5);

/// Authentication characteristic (challenge/response)
pub const UUID_AUTH_CHAR: Uuid = Uuid::from_u128(0x31ba0009_6085_4726_be45_040c957391b5);

/// Ping characteristic used by the keepalive monitor
pub const UUID_PING_CHAR: Uuid = Uuid::from_u128(0x31ba000a_6085_4726_be45_040c957391b5);

/// Inbound command codes, as the hex rendering of decoded bytes 3..5
pub const BLE_CMD_STATE_CHANGE: &str = "0097";
pub const BLE_CMD_DIM_CHANGE: &str = "0098";
pub const BLE_CMD_DIM2_CHANGE: &str = "00c8";
pub const BLE_CMD_SCENE_TRIG: &str = "0021";
pub const BLE_CMD_MESH_CHATTER: &str = "001b";

/// Device id used by the mesh for broadcast commands such as scene triggers
pub const BLE_BROADCAST_DEVICE_ID: u8 = 0x02;

/// Maximum number of retries for a single queued write
pub const MAX_RETRY_COUNT: u32 = 5;

/// Upper bound on brightness steps per second during a transition
pub const MAX_TRANSITION_STEPS_PER_SECOND: f64 = 5.0;

/// Keepalive ping interval in seconds
pub const PING_INTERVAL_SECS: u64 = 3;

/// Default scan / settle window in seconds
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 2;

/// Default write queue drain interval in milliseconds
pub const DEFAULT_WRITE_QUEUE_WAIT_TIME_MS: u64 = 400;

/// Decoded notifications shorter than this are dropped
pub const MIN_NOTIFICATION_LEN: usize = 5;
