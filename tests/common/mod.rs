//! In-memory bluetooth bus used to drive the session engine in tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use uuid::Uuid;

use plejd_gateway::core::bluetooth::bus::{
    BleAdapter, BlePeer, BusError, GattCharacteristic, GattService, ValueStream,
};
use plejd_gateway::core::bluetooth::constants::{
    UUID_AUTH_CHAR, UUID_DATA_CHAR, UUID_LAST_DATA_CHAR, UUID_PING_CHAR, UUID_PLEJD_SERVICE,
};

pub const CHALLENGE: [u8; 16] = [0x11; 16];

/// How the fake ping characteristic answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingMode {
    Correct,
    Wrong,
}

pub struct FakeCharacteristic {
    uuid: Uuid,
    path: String,
    writes: Mutex<Vec<Vec<u8>>>,
    failing_writes: AtomicUsize,
    ping_mode: Mutex<PingMode>,
    notify_tx: Mutex<Option<mpsc::UnboundedSender<Result<Vec<u8>, BusError>>>>,
}

impl FakeCharacteristic {
    fn new(uuid: Uuid, peer_path: &str) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            path: format!("{}/service000b/{}", peer_path, uuid),
            writes: Mutex::new(Vec::new()),
            failing_writes: AtomicUsize::new(0),
            ping_mode: Mutex::new(PingMode::Correct),
            notify_tx: Mutex::new(None),
        })
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    /// Makes the next `count` writes fail with "operation already in progress"
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn set_ping_mode(&self, mode: PingMode) {
        *self.ping_mode.lock().unwrap() = mode;
    }

    /// Raises a property change of the value, as the notifying peer would
    pub fn notify_value(&self, value: Vec<u8>) {
        let sender = self.notify_tx.lock().unwrap();
        sender
            .as_ref()
            .expect("notifications not enabled")
            .send(Ok(value))
            .expect("notification stream dropped");
    }

    /// Closes the notification stream, as a dropped link would
    pub fn end_notifications(&self) {
        self.notify_tx.lock().unwrap().take();
    }

    pub fn is_notifying(&self) -> bool {
        self.notify_tx.lock().unwrap().is_some()
    }
}

#[async_trait]
impl GattCharacteristic for FakeCharacteristic {
    fn path(&self) -> String {
        self.path.clone()
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }

    async fn write(&self, data: &[u8]) -> Result<(), BusError> {
        let failing = self.failing_writes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_writes.store(failing - 1, Ordering::SeqCst);
            return Err(BusError::InProgress);
        }
        self.writes.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn read(&self) -> Result<Vec<u8>, BusError> {
        match self.uuid {
            UUID_AUTH_CHAR => Ok(CHALLENGE.to_vec()),
            UUID_PING_CHAR => {
                let last = self.writes.lock().unwrap().last().map(|w| w[0]).unwrap_or(0);
                match *self.ping_mode.lock().unwrap() {
                    PingMode::Correct => Ok(vec![last.wrapping_add(1)]),
                    PingMode::Wrong => Ok(vec![last]),
                }
            }
            _ => Ok(Vec::new()),
        }
    }

    async fn notify(&self) -> Result<ValueStream, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.notify_tx.lock().unwrap() = Some(tx);
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|value| (value, rx))
        });
        Ok(stream.boxed())
    }
}

pub struct FakePeer {
    path: String,
    rssi: i16,
    accepts_connection: bool,
    plejd_service: bool,
    pub data: Arc<FakeCharacteristic>,
    pub last_data: Arc<FakeCharacteristic>,
    pub auth: Arc<FakeCharacteristic>,
    pub ping: Arc<FakeCharacteristic>,
    connect_log: Arc<Mutex<Vec<String>>>,
}

impl FakePeer {
    pub fn plejd(address: &str, rssi: i16, connect_log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Self::build(address, rssi, true, true, connect_log)
    }

    pub fn build(
        address: &str,
        rssi: i16,
        accepts_connection: bool,
        plejd_service: bool,
        connect_log: Arc<Mutex<Vec<String>>>,
    ) -> Arc<Self> {
        let path = format!("/org/bluez/hci0/dev_{}", address.replace(':', "_"));
        Arc::new(Self {
            data: FakeCharacteristic::new(UUID_DATA_CHAR, &path),
            last_data: FakeCharacteristic::new(UUID_LAST_DATA_CHAR, &path),
            auth: FakeCharacteristic::new(UUID_AUTH_CHAR, &path),
            ping: FakeCharacteristic::new(UUID_PING_CHAR, &path),
            path,
            rssi,
            accepts_connection,
            plejd_service,
            connect_log,
        })
    }
}

#[async_trait]
impl BlePeer for FakePeer {
    fn path(&self) -> String {
        self.path.clone()
    }

    async fn rssi(&self) -> Result<i16, BusError> {
        Ok(self.rssi)
    }

    async fn connect(&self) -> Result<(), BusError> {
        self.connect_log.lock().unwrap().push(self.path.clone());
        if self.accepts_connection {
            Ok(())
        } else {
            Err(BusError::failed("connection refused"))
        }
    }

    async fn disconnect(&self) -> Result<(), BusError> {
        Ok(())
    }

    async fn services(&self) -> Result<Vec<GattService>, BusError> {
        let uuid = if self.plejd_service {
            UUID_PLEJD_SERVICE
        } else {
            Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb)
        };
        let characteristics: Vec<Arc<dyn GattCharacteristic>> = vec![
            self.data.clone(),
            self.last_data.clone(),
            self.auth.clone(),
            self.ping.clone(),
        ];
        Ok(vec![GattService {
            path: format!("{}/service000b", self.path),
            uuid,
            characteristics,
        }])
    }
}

pub struct FakeAdapter {
    pub peers: Vec<Arc<FakePeer>>,
    pub available: bool,
    pub reject_scan: bool,
    pub scans: AtomicUsize,
    pub resets: AtomicUsize,
    pub discovering: AtomicBool,
    /// How long stopping discovery takes
    pub stop_delay: Duration,
}

impl FakeAdapter {
    pub fn new(peers: Vec<Arc<FakePeer>>) -> Self {
        Self {
            peers,
            available: true,
            reject_scan: false,
            scans: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            discovering: AtomicBool::new(false),
            stop_delay: Duration::ZERO,
        }
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleAdapter for FakeAdapter {
    async fn is_available(&self) -> Result<bool, BusError> {
        Ok(self.available)
    }

    async fn reset(&self, _service: Uuid) -> Result<(), BusError> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start_discovery(
        &self,
        _service: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<Arc<dyn BlePeer>>, BusError> {
        if self.reject_scan {
            return Err(BusError::DiscoveryRejected(
                "Operation already in progress".to_string(),
            ));
        }
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.discovering.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        for peer in &self.peers {
            let _ = tx.send(peer.clone() as Arc<dyn BlePeer>);
        }
        Ok(rx)
    }

    async fn stop_discovery(&self) -> Result<(), BusError> {
        tokio::time::sleep(self.stop_delay).await;
        self.discovering.store(false, Ordering::SeqCst);
        Ok(())
    }
}
