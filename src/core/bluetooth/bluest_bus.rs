//! Bus implementation on top of the `bluest` crate (BlueZ on Linux)

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bluest::{Adapter, AdvertisingDevice, Characteristic, Device, Uuid};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::bus::{
    BleAdapter, BlePeer, BusError, GattCharacteristic, GattService, ValueStream,
};

fn bus_error(e: bluest::Error) -> BusError {
    let message = e.to_string();
    if message.contains("In Progress") || message.contains("InProgress") {
        BusError::InProgress
    } else {
        BusError::Failed(message)
    }
}

/// The system's default bluetooth adapter
pub struct BluestAdapter {
    adapter: Option<Adapter>,
    scan_cancel: Mutex<Option<CancellationToken>>,
}

impl BluestAdapter {
    /// Looks up the default adapter. A missing adapter is reported by `is_available`.
    pub async fn new() -> Self {
        let adapter = Adapter::default().await;
        if adapter.is_none() {
            warn!("No Bluetooth adapter found");
        }
        Self {
            adapter,
            scan_cancel: Mutex::new(None),
        }
    }

    fn adapter(&self) -> Result<&Adapter, BusError> {
        self.adapter
            .as_ref()
            .ok_or_else(|| BusError::failed("no bluetooth adapter"))
    }

    fn replace_scan(&self, token: Option<CancellationToken>) {
        let previous = match self.scan_cancel.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, token),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), token),
        };
        if let Some(previous) = previous {
            previous.cancel();
        }
    }
}

#[async_trait]
impl BleAdapter for BluestAdapter {
    async fn is_available(&self) -> Result<bool, BusError> {
        match self.adapter.as_ref() {
            Some(adapter) => adapter.is_available().await.map_err(bus_error),
            None => Ok(false),
        }
    }

    async fn reset(&self, service: Uuid) -> Result<(), BusError> {
        let adapter = self.adapter()?;
        let connected = adapter
            .connected_devices_with_services(&[service])
            .await
            .map_err(bus_error)?;
        for device in connected {
            info!("Disconnecting stale Plejd peer {}", device.id());
            if let Err(e) = adapter.disconnect_device(&device).await {
                warn!("Failed to disconnect {}: {}", device.id(), e);
            }
        }
        Ok(())
    }

    async fn start_discovery(
        &self,
        service: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<Arc<dyn BlePeer>>, BusError> {
        let adapter = self.adapter()?.clone();
        let cancel = CancellationToken::new();
        self.replace_scan(Some(cancel.clone()));

        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let (started_tx, started_rx) = oneshot::channel();

        tokio::spawn(async move {
            let services = [service];
            let mut scan_stream = match adapter.scan(&services).await {
                Ok(stream) => {
                    let _ = started_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = started_tx.send(Err(BusError::DiscoveryRejected(e.to_string())));
                    return;
                }
            };

            loop {
                tokio::select! {
                    next = scan_stream.next() => match next {
                        Some(AdvertisingDevice { device, rssi, .. }) => {
                            debug!("Found device - Device: {:?}, RSSI: {:?}", device.id(), rssi);
                            let peer = BluestPeer::new(adapter.clone(), device, rssi);
                            if peers_tx.send(Arc::new(peer) as Arc<dyn BlePeer>).is_err() {
                                break;
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    },
                    _ = cancel.cancelled() => break,
                }
            }
        });

        match started_rx.await {
            Ok(Ok(())) => Ok(peers_rx),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BusError::DiscoveryRejected("scan task ended".to_string())),
        }
    }

    async fn stop_discovery(&self) -> Result<(), BusError> {
        self.replace_scan(None);
        Ok(())
    }
}

/// A peripheral discovered by `bluest`
pub struct BluestPeer {
    adapter: Adapter,
    device: Device,
    advertised_rssi: Option<i16>,
}

impl BluestPeer {
    fn new(adapter: Adapter, device: Device, advertised_rssi: Option<i16>) -> Self {
        Self {
            adapter,
            device,
            advertised_rssi,
        }
    }
}

#[async_trait]
impl BlePeer for BluestPeer {
    fn path(&self) -> String {
        self.device.id().to_string()
    }

    async fn rssi(&self) -> Result<i16, BusError> {
        match self.device.rssi().await {
            Ok(rssi) => Ok(rssi),
            Err(e) => self.advertised_rssi.ok_or_else(|| bus_error(e)),
        }
    }

    async fn connect(&self) -> Result<(), BusError> {
        if self.device.is_connected().await {
            return Ok(());
        }
        self.adapter.connect_device(&self.device).await.map_err(bus_error)
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        if !self.device.is_connected().await {
            return Ok(());
        }
        self.adapter
            .disconnect_device(&self.device)
            .await
            .map_err(bus_error)
    }

    async fn services(&self) -> Result<Vec<GattService>, BusError> {
        let path = self.path();
        let mut services = Vec::new();
        for service in self.device.services().await.map_err(bus_error)? {
            let service_path = format!("{}/{}", path, service.uuid());
            let characteristics = service
                .characteristics()
                .await
                .map_err(bus_error)?
                .into_iter()
                .map(|inner| {
                    Arc::new(BluestCharacteristic {
                        path: format!("{}/{}", service_path, inner.uuid()),
                        inner,
                    }) as Arc<dyn GattCharacteristic>
                })
                .collect();
            services.push(GattService {
                path: service_path,
                uuid: service.uuid(),
                characteristics,
            });
        }
        Ok(services)
    }
}

pub struct BluestCharacteristic {
    path: String,
    inner: Characteristic,
}

#[async_trait]
impl GattCharacteristic for BluestCharacteristic {
    fn path(&self) -> String {
        self.path.clone()
    }

    fn uuid(&self) -> Uuid {
        self.inner.uuid()
    }

    async fn write(&self, data: &[u8]) -> Result<(), BusError> {
        self.inner.write(data).await.map_err(bus_error)
    }

    async fn read(&self) -> Result<Vec<u8>, BusError> {
        self.inner.read().await.map_err(bus_error)
    }

    async fn notify(&self) -> Result<ValueStream, BusError> {
        let characteristic = self.inner.clone();
        let (values_tx, values_rx) = mpsc::unbounded_channel();
        let (started_tx, started_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut notification_stream = match characteristic.notify().await {
                Ok(stream) => {
                    let _ = started_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = started_tx.send(Err(bus_error(e)));
                    return;
                }
            };

            while let Some(result) = notification_stream.next().await {
                let value = result.map_err(bus_error);
                let failed = value.is_err();
                if values_tx.send(value).is_err() || failed {
                    break;
                }
            }
        });

        match started_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                error!("Notification task ended before subscribing");
                return Err(BusError::failed("notification task ended"));
            }
        }

        let stream = futures_util::stream::unfold(values_rx, |mut rx| async move {
            rx.recv().await.map(|value| (value, rx))
        });
        Ok(stream.boxed())
    }
}
