//! Plejd mesh commands
//! This module contains the plain-text payloads written to the data
//! characteristic (before encryption).

use crate::core::bluetooth::constants::BLE_BROADCAST_DEVICE_ID;

/// Commands that can be sent to the mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlejdCommand {
    /// Turn a device off (`<id> 0110 0097 00`)
    Off { device_id: u8 },
    /// Turn a device on at its previous level (`<id> 0110 0097 01`)
    OnRestore { device_id: u8 },
    /// Turn a device on at a brightness (`<id> 0110 0098 01 <b><b>`)
    Dim { device_id: u8, brightness: u8 },
    /// Trigger a scene on the whole mesh (`02 0110 0021 <scene>`)
    Scene { scene_id: u8 },
}

impl PlejdCommand {
    /// Maps a requested brightness to its command. `None` restores the
    /// previous level, zero or less turns the device off, values above 255 are clamped.
    pub fn for_brightness(device_id: u8, brightness: Option<i32>) -> Self {
        match brightness {
            None => Self::OnRestore { device_id },
            Some(b) if b <= 0 => Self::Off { device_id },
            Some(b) => Self::Dim {
                device_id,
                brightness: b.min(255) as u8,
            },
        }
    }

    /// Id of the device the command is queued for
    pub fn device_id(&self) -> u8 {
        match self {
            Self::Off { device_id } | Self::OnRestore { device_id } | Self::Dim { device_id, .. } => {
                *device_id
            }
            Self::Scene { .. } => BLE_BROADCAST_DEVICE_ID,
        }
    }

    /// Convert the command to its byte representation
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Self::Off { device_id } => vec![device_id, 0x01, 0x10, 0x00, 0x97, 0x00],
            Self::OnRestore { device_id } => vec![device_id, 0x01, 0x10, 0x00, 0x97, 0x01],
            Self::Dim {
                device_id,
                brightness,
            } => {
                let value = ((brightness as u16) << 8) | brightness as u16;
                let [hi, lo] = value.to_be_bytes();
                vec![device_id, 0x01, 0x10, 0x00, 0x98, 0x01, hi, lo]
            }
            Self::Scene { scene_id } => {
                vec![BLE_BROADCAST_DEVICE_ID, 0x01, 0x10, 0x00, 0x21, scene_id]
            }
        }
    }

    /// Short label used in log lines
    pub fn label(&self) -> String {
        match self {
            Self::Off { .. } => "OFF".to_string(),
            Self::OnRestore { .. } => "ON".to_string(),
            Self::Dim { brightness, .. } => format!("DIM {}", brightness),
            Self::Scene { scene_id } => format!("SCENE {}", scene_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_payload() {
        let cmd = PlejdCommand::for_brightness(12, Some(0));
        assert_eq!(hex::encode(cmd.to_bytes()), "0c0110009700");
    }

    #[test]
    fn restore_payload() {
        let cmd = PlejdCommand::for_brightness(12, None);
        assert_eq!(hex::encode(cmd.to_bytes()), "0c0110009701");
    }

    #[test]
    fn dim_payload_replicates_brightness() {
        let cmd = PlejdCommand::for_brightness(12, Some(0x80));
        assert_eq!(hex::encode(cmd.to_bytes()), "0c01100098018080");
        assert_eq!(cmd.label(), "DIM 128");
    }

    #[test]
    fn brightness_is_clamped() {
        assert_eq!(
            PlejdCommand::for_brightness(1, Some(1000)),
            PlejdCommand::Dim {
                device_id: 1,
                brightness: 255
            }
        );
        assert_eq!(
            PlejdCommand::for_brightness(1, Some(-4)),
            PlejdCommand::Off { device_id: 1 }
        );
    }

    #[test]
    fn scene_is_broadcast() {
        let cmd = PlejdCommand::Scene { scene_id: 3 };
        assert_eq!(cmd.device_id(), BLE_BROADCAST_DEVICE_ID);
        assert_eq!(hex::encode(cmd.to_bytes()), "020110002103");
    }
}
