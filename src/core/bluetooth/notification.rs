//! Notification handling for the Plejd mesh
//! This module decodes last-data notifications into gateway events and runs
//! the task that listens on the notification stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use log::{debug, error, info, trace};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::bus::ValueStream;
use crate::core::bluetooth::constants::{
    BLE_CMD_DIM2_CHANGE, BLE_CMD_DIM_CHANGE, BLE_CMD_MESH_CHATTER, BLE_CMD_SCENE_TRIG,
    BLE_CMD_STATE_CHANGE, MIN_NOTIFICATION_LEN,
};
use crate::core::bluetooth::crypto::{CryptoKey, encrypt_decrypt};
use crate::core::bluetooth::types::DeviceRuntimeState;
use crate::core::events::{DeviceStateUpdate, GatewayEvent};

/// A decoded mesh notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StateChanged {
        device_id: u8,
        state: u8,
        brightness: Option<u8>,
    },
    SceneTriggered {
        device_id: u8,
        scene_id: u8,
    },
    MeshChatter,
    Unknown {
        command: String,
    },
}

/// Decodes a decrypted last-data payload.
/// Returns `None` for payloads too short to carry a command.
pub fn decode(decoded: &[u8]) -> Option<Notification> {
    if decoded.len() < MIN_NOTIFICATION_LEN {
        return None;
    }

    let device_id = decoded[0];
    // bytes 1..3 are not interpreted
    let command = hex::encode(&decoded[3..5]);
    let state = decoded.get(5).copied().unwrap_or(0);
    let data2 = match (decoded.get(6), decoded.get(7)) {
        (Some(hi), Some(_)) => *hi,
        _ => 0,
    };

    let notification = match command.as_str() {
        BLE_CMD_DIM_CHANGE | BLE_CMD_DIM2_CHANGE => Notification::StateChanged {
            device_id,
            state,
            brightness: Some(data2),
        },
        BLE_CMD_STATE_CHANGE => Notification::StateChanged {
            device_id,
            state,
            brightness: None,
        },
        BLE_CMD_SCENE_TRIG => match decoded.get(5) {
            Some(scene_id) => Notification::SceneTriggered {
                device_id,
                scene_id: *scene_id,
            },
            None => Notification::Unknown { command },
        },
        BLE_CMD_MESH_CHATTER => Notification::MeshChatter,
        _ => Notification::Unknown { command },
    };
    Some(notification)
}

/// Decrypts, decodes and dispatches last-data values
#[derive(Clone)]
pub struct NotificationHandler {
    key: CryptoKey,
    address: [u8; 6],
    runtime_state: Arc<Mutex<HashMap<u8, DeviceRuntimeState>>>,
    events: UnboundedSender<GatewayEvent>,
}

impl NotificationHandler {
    pub fn new(
        key: CryptoKey,
        address: [u8; 6],
        runtime_state: Arc<Mutex<HashMap<u8, DeviceRuntimeState>>>,
        events: UnboundedSender<GatewayEvent>,
    ) -> Self {
        Self {
            key,
            address,
            runtime_state,
            events,
        }
    }

    /// Handles one property change of the last-data value
    pub fn handle_value(&self, value: &[u8]) {
        if value.is_empty() {
            return;
        }

        let decoded = encrypt_decrypt(&self.key, &self.address, value);
        let Some(notification) = decode(&decoded) else {
            debug!("Too short raw event ignored: {}", hex::encode(&decoded));
            return;
        };

        match notification {
            Notification::StateChanged {
                device_id,
                state,
                brightness,
            } => {
                debug!(
                    "Device {} state changed: state {}, brightness {:?}",
                    device_id, state, brightness
                );
                if let Ok(mut runtime) = self.runtime_state.lock() {
                    runtime.insert(
                        device_id,
                        DeviceRuntimeState {
                            state,
                            dim: brightness.unwrap_or(0),
                        },
                    );
                }
                self.emit(GatewayEvent::StateChanged {
                    device_id,
                    update: DeviceStateUpdate { state, brightness },
                });
            }
            Notification::SceneTriggered {
                device_id,
                scene_id,
            } => {
                debug!("Scene {} triggered by device {}", scene_id, device_id);
                self.emit(GatewayEvent::SceneTriggered {
                    device_id,
                    scene_id,
                });
            }
            Notification::MeshChatter => {
                trace!("Command {} is repeating mesh traffic, ignored", BLE_CMD_MESH_CHATTER);
            }
            Notification::Unknown { command } => {
                debug!("Command {} unknown. {}", command, hex::encode(&decoded));
            }
        }
    }

    fn emit(&self, event: GatewayEvent) {
        if let Err(e) = self.events.send(event) {
            error!("Failed to emit gateway event: {}", e);
        }
    }

    /// Process notifications until the stream ends or `cancel` fires.
    /// Returns `true` when the stream ended on its own.
    pub async fn process_notifications(
        &self,
        mut stream: ValueStream,
        cancel: CancellationToken,
    ) -> bool {
        info!("Listening for Plejd notifications...");
        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(value)) => {
                        trace!("Received last data: {}", hex::encode(&value));
                        self.handle_value(&value);
                    }
                    Some(Err(e)) => {
                        error!("Error in notification stream: {}", e);
                        return true;
                    }
                    None => {
                        info!("Notification stream ended");
                        return true;
                    }
                },
                _ = cancel.cancelled() => return false,
            }
        }
    }
}
