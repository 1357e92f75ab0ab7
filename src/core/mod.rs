//! Core functionality for the Plejd gateway
//! This module contains the BLE session engine and its collaborators

pub mod bluetooth;
pub mod events;
pub mod registry;
pub mod scene;

// Re-export commonly used types
pub use bluetooth::PlejdManager;
pub use events::{DeviceStateUpdate, GatewayEvent};
pub use registry::{DeviceDescriptor, DeviceRegistry};
pub use scene::{LightControl, MeshSceneExecutor, SceneExecutor, TurnOnOptions};
