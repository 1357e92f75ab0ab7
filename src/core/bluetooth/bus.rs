//! Object model of the system bluetooth bus
//! The session engine only talks to the radio through these traits. The
//! production implementation lives in `bluest_bus`, tests provide in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Failure of a single bus call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    /// The stack refused the call because another GATT operation is pending
    #[error("operation already in progress")]
    InProgress,
    /// Discovery could not be started, typically because another process is scanning
    #[error("discovery rejected: {0}")]
    DiscoveryRejected(String),
    #[error("{0}")]
    Failed(String),
}

impl BusError {
    pub fn failed(e: impl std::fmt::Display) -> Self {
        Self::Failed(e.to_string())
    }
}

/// Stream of raw values raised by a notifying characteristic
pub type ValueStream = BoxStream<'static, Result<Vec<u8>, BusError>>;

/// A GATT characteristic exposed under a connected peripheral
#[async_trait]
pub trait GattCharacteristic: Send + Sync {
    /// Object path (or platform id) of the characteristic
    fn path(&self) -> String;

    fn uuid(&self) -> Uuid;

    async fn write(&self, data: &[u8]) -> Result<(), BusError>;

    async fn read(&self) -> Result<Vec<u8>, BusError>;

    /// Enables notifications and returns the property-changed feed of the value
    async fn notify(&self) -> Result<ValueStream, BusError>;
}

/// A GATT service and its characteristics, as enumerated on the bus
#[derive(Clone)]
pub struct GattService {
    pub path: String,
    pub uuid: Uuid,
    pub characteristics: Vec<Arc<dyn GattCharacteristic>>,
}

/// A peripheral device object
#[async_trait]
pub trait BlePeer: Send + Sync {
    /// Bus object path, carries the textual radio address
    fn path(&self) -> String;

    async fn rssi(&self) -> Result<i16, BusError>;

    async fn connect(&self) -> Result<(), BusError>;

    async fn disconnect(&self) -> Result<(), BusError>;

    /// Enumerates the GATT services currently exported for this peer
    async fn services(&self) -> Result<Vec<GattService>, BusError>;
}

/// The local bluetooth adapter
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Whether a powered, low energy capable adapter is present
    async fn is_available(&self) -> Result<bool, BusError>;

    /// Disconnects and forgets every known peer advertising `service`
    async fn reset(&self, service: Uuid) -> Result<(), BusError>;

    /// Starts a low energy scan filtered on `service`. Every discovered
    /// peer is delivered on the returned channel until `stop_discovery`.
    async fn start_discovery(
        &self,
        service: Uuid,
    ) -> Result<mpsc::UnboundedReceiver<Arc<dyn BlePeer>>, BusError>;

    async fn stop_discovery(&self) -> Result<(), BusError>;
}
