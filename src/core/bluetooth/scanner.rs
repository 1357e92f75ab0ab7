//! Bluetooth scanner for Plejd devices
//! This module runs the discovery window and turns discovered peers into
//! candidates ranked by signal strength.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use crate::core::bluetooth::bus::{BleAdapter, BlePeer, BusError};
use crate::core::bluetooth::constants::UUID_PLEJD_SERVICE;
use crate::core::bluetooth::gatt::extract_address_text;
use crate::core::bluetooth::types::BlePeerCandidate;
use crate::core::registry::DeviceRegistry;
use crate::error::{PlejdError, Result};

pub struct BluetoothScanner {
    adapter: Arc<dyn BleAdapter>,
    registry: DeviceRegistry,
}

impl BluetoothScanner {
    pub fn new(adapter: Arc<dyn BleAdapter>, registry: DeviceRegistry) -> Self {
        Self { adapter, registry }
    }

    /// Forgets stale Plejd peers so no old handles survive a re-init
    pub async fn reset_adapter(&self) -> Result<()> {
        info!("Resetting adapter, removing known Plejd peers");
        self.adapter
            .reset(UUID_PLEJD_SERVICE)
            .await
            .map_err(PlejdError::from)
    }

    /// Starts a scan filtered on the Plejd service
    pub async fn start_scan(&self) -> Result<UnboundedReceiver<Arc<dyn BlePeer>>> {
        info!("Starting bluetooth scan for Plejd devices");
        self.adapter
            .start_discovery(UUID_PLEJD_SERVICE)
            .await
            .map_err(|e| match e {
                BusError::DiscoveryRejected(reason) => PlejdError::ScanRejected(reason),
                other => PlejdError::ScanRejected(other.to_string()),
            })
    }

    pub async fn stop_scan(&self) {
        info!("Stopping Bluetooth scan.");
        if let Err(e) = self.adapter.stop_discovery().await {
            warn!("Failed to stop discovery: {}", e);
        }
    }

    /// Collects the peers announced during `window`, each path once
    pub async fn gather(
        discovered: &mut UnboundedReceiver<Arc<dyn BlePeer>>,
        window: Duration,
    ) -> Vec<Arc<dyn BlePeer>> {
        let deadline = Instant::now() + window;
        let mut seen = HashSet::new();
        let mut peers = Vec::new();

        while let Ok(Some(peer)) = tokio::time::timeout_at(deadline, discovered.recv()).await {
            let path = peer.path();
            if seen.insert(path.clone()) {
                debug!("Found device - Path: {}", path);
                peers.push(peer);
            }
        }
        // keep the window even if the scan stream closed early
        tokio::time::sleep_until(deadline).await;

        info!("Scan window closed, {} peer(s) discovered", peers.len());
        peers
    }

    /// Resolves RSSI and registry entry of every peer. Peers that cannot be
    /// inspected are skipped. The result is sorted by descending RSSI.
    pub async fn inspect(&self, peers: Vec<Arc<dyn BlePeer>>) -> Vec<BlePeerCandidate> {
        let mut candidates = Vec::with_capacity(peers.len());
        for peer in peers {
            let path = peer.path();
            let rssi = match peer.rssi().await {
                Ok(rssi) => rssi,
                Err(e) => {
                    warn!("Failed inspecting {}, skipping: {}", path, e);
                    continue;
                }
            };
            let device = extract_address_text(&path)
                .and_then(|address| self.registry.by_serial(&address))
                .cloned();

            info!(
                "Discovered {} with RSSI {} ({})",
                path,
                rssi,
                device.as_ref().map(|d| d.name.as_str()).unwrap_or("unknown device")
            );
            candidates.push(BlePeerCandidate {
                path,
                rssi,
                peer,
                device,
            });
        }

        rank_by_rssi(&mut candidates);
        candidates
    }
}

/// Strongest signal first
pub fn rank_by_rssi(candidates: &mut [BlePeerCandidate]) {
    candidates.sort_by(|a, b| b.rssi.cmp(&a.rssi));
}
