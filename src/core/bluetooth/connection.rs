//! Bluetooth connection handling for the Plejd mesh
//! This module connects to the best discovered peer and runs the
//! challenge/response handshake on the auth characteristic.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::core::bluetooth::bus::{BlePeer, GattCharacteristic};
use crate::core::bluetooth::crypto::{CryptoKey, challenge_response};
use crate::core::bluetooth::types::BlePeerCandidate;
use crate::error::{PlejdError, Result};

/// Connection manager for the mesh gateway peer
#[derive(Clone)]
pub struct ConnectionManager {
    key: CryptoKey,
}

impl ConnectionManager {
    pub fn new(key: CryptoKey) -> Self {
        Self { key }
    }

    /// Tries the candidates in order (strongest signal first) and returns the
    /// first peer that accepts the connection.
    pub async fn connect_best(&self, candidates: &[BlePeerCandidate]) -> Option<Arc<dyn BlePeer>> {
        for candidate in candidates {
            let name = candidate
                .device
                .as_ref()
                .map(|d| d.name.clone())
                .unwrap_or_else(|| "Unknown".to_string());
            info!(
                "Initiating connection to {} ({}), RSSI {}...",
                candidate.path, name, candidate.rssi
            );

            match candidate.peer.connect().await {
                Ok(()) => {
                    info!("Connected to {}", candidate.path);
                    return Some(candidate.peer.clone());
                }
                Err(e) => {
                    warn!("Connection attempt to {} failed: {}", candidate.path, e);
                }
            }
        }

        warn!("Unable to connect to any Plejd device");
        None
    }

    /// Answers the peer's challenge on the auth characteristic
    pub async fn authenticate(&self, auth: &dyn GattCharacteristic) -> Result<()> {
        info!("Authenticating to Plejd mesh...");
        auth.write(&[0x00]).await?;
        let challenge = auth.read().await?;
        if challenge.is_empty() {
            return Err(PlejdError::Authentication("empty challenge".to_string()));
        }
        debug!("Received challenge of {} bytes", challenge.len());

        let response = challenge_response(&self.key, &challenge);
        auth.write(&response).await?;
        info!("Authentication response sent");
        Ok(())
    }

    /// Disconnect from the peer
    pub async fn disconnect(&self, peer: &dyn BlePeer) {
        info!("Disconnecting from device {}", peer.path());
        match peer.disconnect().await {
            Ok(()) => info!("Successfully disconnected"),
            Err(e) => warn!("Failed to disconnect {}: {}", peer.path(), e),
        }
    }
}
