//! GATT binding for the Plejd service
//! Classifies the characteristics of an enumerated service by UUID and
//! captures the peer radio address in the byte order the cipher expects.

use std::sync::{Arc, LazyLock};

use log::{debug, info};
use regex::Regex;

use crate::core::bluetooth::bus::{BlePeer, BusError, GattCharacteristic, GattService};
use crate::core::bluetooth::constants::{
    UUID_AUTH_CHAR, UUID_DATA_CHAR, UUID_LAST_DATA_CHAR, UUID_PING_CHAR, UUID_PLEJD_SERVICE,
};
use crate::core::bluetooth::types::{PlejdCharacteristics, Session};
use crate::error::{PlejdError, Result};

static MAC_ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}([0-9A-Fa-f]{2})").expect("static regex")
});

/// Characteristics found under a Plejd service, before completeness is checked
#[derive(Default)]
pub struct ServiceCharacteristics {
    pub data: Option<Arc<dyn GattCharacteristic>>,
    pub last_data: Option<Arc<dyn GattCharacteristic>>,
    pub auth: Option<Arc<dyn GattCharacteristic>>,
    pub ping: Option<Arc<dyn GattCharacteristic>>,
}

/// Classifies the characteristics of `service`.
/// Returns `None` when the service is not the Plejd service.
pub fn classify_service(service: &GattService) -> Option<ServiceCharacteristics> {
    if service.uuid != UUID_PLEJD_SERVICE {
        return None;
    }

    let mut found = ServiceCharacteristics::default();
    for characteristic in &service.characteristics {
        let uuid = characteristic.uuid();
        let slot = match uuid {
            UUID_DATA_CHAR => &mut found.data,
            UUID_LAST_DATA_CHAR => &mut found.last_data,
            UUID_AUTH_CHAR => &mut found.auth,
            UUID_PING_CHAR => &mut found.ping,
            _ => {
                debug!("Ignoring characteristic {} ({})", characteristic.path(), uuid);
                continue;
            }
        };
        debug!("Found characteristic {} ({})", characteristic.path(), uuid);
        *slot = Some(characteristic.clone());
    }
    Some(found)
}

/// Finds the radio address in a bus object path such as
/// `/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF` and returns it without separators, upper case.
pub fn extract_address_text(path: &str) -> Option<String> {
    let textual = MAC_ADDRESS_RE.find_iter(path).last()?.as_str();
    Some(
        textual
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .collect::<String>()
            .to_uppercase(),
    )
}

/// Radio address of a bus object path, bytes reversed for the cipher
pub fn extract_address(path: &str) -> Option<[u8; 6]> {
    let mut bytes: [u8; 6] = hex::decode(extract_address_text(path)?).ok()?.try_into().ok()?;
    bytes.reverse();
    Some(bytes)
}

/// Resolves the services of a connected peer into a complete `Session`
pub fn bind_session(peer: Arc<dyn BlePeer>, services: &[GattService]) -> Result<Session> {
    let path = peer.path();
    let (service, found) = services
        .iter()
        .find_map(|s| classify_service(s).map(|found| (s, found)))
        .ok_or_else(|| PlejdError::ServiceNotFound(path.clone()))?;
    info!("Found Plejd service on {}", service.path);

    let auth = found.auth.ok_or(PlejdError::CharacteristicNotFound("auth"))?;
    let data = found.data.ok_or(PlejdError::CharacteristicNotFound("data"))?;
    let last_data = found.last_data.ok_or(PlejdError::CharacteristicNotFound("last data"))?;
    let ping = found.ping.ok_or(PlejdError::CharacteristicNotFound("ping"))?;

    let address = extract_address(&path)
        .ok_or_else(|| BusError::Failed(format!("no radio address in {}", path)))?;

    Ok(Session {
        peer,
        address,
        characteristics: PlejdCharacteristics {
            data,
            last_data,
            auth,
            ping,
        },
    })
}
