//! Events emitted to the home-automation layer

use serde::Serialize;

/// State reported by the mesh for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceStateUpdate {
    pub state: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A session was authenticated and is ready for commands
    Connected,
    /// No usable Plejd session could be bound on the connected peer
    ConnectFailed,
    StateChanged {
        device_id: u8,
        #[serde(flatten)]
        update: DeviceStateUpdate,
    },
    SceneTriggered {
        device_id: u8,
        scene_id: u8,
    },
}
