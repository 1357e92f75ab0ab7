//! Static registry of the devices installed on the Plejd site

use serde::{Deserialize, Serialize};

/// A device of the mesh, supplied by configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: u8,
    pub serial_number: String,
    pub name: String,
    #[serde(default)]
    pub dimmable: bool,
}

/// Read-only lookup over the configured devices
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceRegistry {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self { devices }
    }

    pub fn get(&self, id: u8) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Looks a device up by serial number. Radio addresses are accepted in any
    /// case and with `:`, `-` or `_` separators.
    pub fn by_serial(&self, serial_or_address: &str) -> Option<&DeviceDescriptor> {
        let wanted = normalize_serial(serial_or_address);
        self.devices
            .iter()
            .find(|d| normalize_serial(&d.serial_number) == wanted)
    }

    /// Human readable name for log lines
    pub fn name(&self, id: u8) -> String {
        self.get(id)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| format!("device {}", id))
    }

    pub fn is_dimmable(&self, id: u8) -> bool {
        self.get(id).map(|d| d.dimmable).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn normalize_serial(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '_'))
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(vec![
            DeviceDescriptor {
                id: 12,
                serial_number: "F1A2B3C4D5E6".to_string(),
                name: "Kitchen".to_string(),
                dimmable: true,
            },
            DeviceDescriptor {
                id: 13,
                serial_number: "0A0B0C0D0E0F".to_string(),
                name: "Hall".to_string(),
                dimmable: false,
            },
        ])
    }

    #[test]
    fn lookup_by_id() {
        let registry = registry();
        assert_eq!(registry.get(12).map(|d| d.name.as_str()), Some("Kitchen"));
        assert!(registry.get(99).is_none());
        assert!(registry.is_dimmable(12));
        assert!(!registry.is_dimmable(13));
        assert!(!registry.is_dimmable(99));
    }

    #[test]
    fn lookup_by_radio_address() {
        let registry = registry();
        assert_eq!(registry.by_serial("f1:a2:b3:c4:d5:e6").map(|d| d.id), Some(12));
        assert_eq!(registry.by_serial("0A_0B_0C_0D_0E_0F").map(|d| d.id), Some(13));
        assert!(registry.by_serial("00:00:00:00:00:00").is_none());
    }

    #[test]
    fn name_falls_back_to_id() {
        assert_eq!(registry().name(42), "device 42");
    }

    #[test]
    fn counts_configured_devices() {
        assert_eq!(registry().len(), 2);
        assert!(!registry().is_empty());
        assert!(DeviceRegistry::default().is_empty());
    }
}
