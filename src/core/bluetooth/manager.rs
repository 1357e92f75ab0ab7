//! Plejd manager for the gateway
//! This module owns the session lifecycle: discovery, connection, GATT
//! binding, authentication, and the background tasks of a live session.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::core::bluetooth::bus::{BleAdapter, BlePeer, BusError};
use crate::core::bluetooth::commands::PlejdCommand;
use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::constants::PING_INTERVAL_SECS;
use crate::core::bluetooth::crypto::{CryptoKey, encrypt_decrypt};
use crate::core::bluetooth::gatt;
use crate::core::bluetooth::keepalive::{self, PingLink};
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::single_flight::{Flight, SingleFlight};
use crate::core::bluetooth::transition::{BrightnessSink, TransitionEngine};
use crate::core::bluetooth::types::{DeviceRuntimeState, Session};
use crate::core::bluetooth::write_queue::{PayloadWriter, WriteQueue, WriteQueueItem};
use crate::core::events::GatewayEvent;
use crate::core::registry::DeviceRegistry;
use crate::core::scene::{LightControl, SceneExecutor, TurnOnOptions};
use crate::error::{PlejdError, Result};

/// Where the manager is in establishing a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Scanning,
    CandidatesGathering,
    Connecting,
    Enumerating,
    Authenticating,
    Ready,
    ReInitializing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Timing of the session engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Scan window, and settle time after connecting
    pub connection_timeout: Duration,
    /// Pause between write queue passes
    pub write_queue_wait_time: Duration,
    pub keep_alive: bool,
    pub ping_interval: Duration,
}

impl From<&GatewayConfig> for ManagerSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            connection_timeout: Duration::from_secs(config.connection_timeout_secs),
            write_queue_wait_time: Duration::from_millis(config.write_queue_wait_time_ms),
            keep_alive: config.keep_alive,
            ping_interval: Duration::from_secs(PING_INTERVAL_SECS),
        }
    }
}

struct Inner {
    key: CryptoKey,
    registry: DeviceRegistry,
    adapter: Arc<dyn BleAdapter>,
    scanner: BluetoothScanner,
    connection: ConnectionManager,
    scenes: Arc<dyn SceneExecutor>,
    settings: ManagerSettings,
    events: UnboundedSender<GatewayEvent>,
    /// Held across every GATT operation of the session
    session: tokio::sync::Mutex<Option<Session>>,
    runtime_state: Arc<Mutex<HashMap<u8, DeviceRuntimeState>>>,
    write_queue: Arc<WriteQueue>,
    transitions: TransitionEngine,
    /// Parent token of the keepalive, write queue and notification tasks
    session_tasks: Mutex<CancellationToken>,
    reconnect: SingleFlight<Result<()>>,
    state: Mutex<ConnectionState>,
}

/// Manages the Plejd session. Cheap to clone, every clone drives the same session.
#[derive(Clone)]
pub struct PlejdManager {
    inner: Arc<Inner>,
}

impl PlejdManager {
    /// Creates a new PlejdManager
    pub fn new(
        adapter: Arc<dyn BleAdapter>,
        key: CryptoKey,
        registry: DeviceRegistry,
        scenes: Arc<dyn SceneExecutor>,
        settings: ManagerSettings,
        events: UnboundedSender<GatewayEvent>,
    ) -> Self {
        let scanner = BluetoothScanner::new(adapter.clone(), registry.clone());
        let connection = ConnectionManager::new(key.clone());
        Self {
            inner: Arc::new(Inner {
                key,
                registry,
                adapter,
                scanner,
                connection,
                scenes,
                settings,
                events,
                session: tokio::sync::Mutex::new(None),
                runtime_state: Arc::new(Mutex::new(HashMap::new())),
                write_queue: Arc::new(WriteQueue::new()),
                transitions: TransitionEngine::new(),
                session_tasks: Mutex::new(CancellationToken::new()),
                reconnect: SingleFlight::new(),
                state: Mutex::new(ConnectionState::Idle),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner
            .state
            .lock()
            .map(|s| *s)
            .unwrap_or(ConnectionState::ReInitializing)
    }

    fn set_state(&self, state: ConnectionState) {
        if let Ok(mut current) = self.inner.state.lock() {
            if *current != state {
                debug!("Connection state {} -> {}", *current, state);
                *current = state;
            }
        }
    }

    /// Last state reported by the mesh for a device
    pub fn device_state(&self, device_id: u8) -> Option<DeviceRuntimeState> {
        self.inner
            .runtime_state
            .lock()
            .ok()
            .and_then(|runtime| runtime.get(&device_id).copied())
    }

    /// Number of commands waiting in the write queue
    pub fn pending_writes(&self) -> usize {
        self.inner.write_queue.len()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.session.lock().await.is_some()
    }

    fn emit(&self, event: GatewayEvent) {
        if let Err(e) = self.inner.events.send(event) {
            error!("Failed to emit gateway event: {}", e);
        }
    }

    fn session_token(&self) -> CancellationToken {
        match self.inner.session_tasks.lock() {
            Ok(token) => token.child_token(),
            Err(poisoned) => poisoned.into_inner().child_token(),
        }
    }

    /// Stops every background task and drops the session
    async fn clear_session(&self) {
        let previous = match self.inner.session_tasks.lock() {
            Ok(mut token) => std::mem::replace(&mut *token, CancellationToken::new()),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), CancellationToken::new()),
        };
        previous.cancel();
        self.inner.transitions.cancel_all();
        *self.inner.session.lock().await = None;
    }

    /// Tears down the current session and establishes a new one.
    ///
    /// Errors are returned for the failures that abort this attempt: no usable
    /// adapter, or the platform rejecting the scan.
    pub async fn init(&self) -> Result<()> {
        info!("Initializing Plejd session");
        self.set_state(ConnectionState::ReInitializing);
        self.clear_session().await;
        self.set_state(ConnectionState::Idle);

        match self.inner.adapter.is_available().await {
            Ok(true) => {}
            Ok(false) => {
                error!("Unable to find a bluetooth adapter that is compatible.");
                return Err(PlejdError::NoAdapter);
            }
            Err(e) => {
                error!("Unable to find a bluetooth adapter that is compatible: {}", e);
                return Err(PlejdError::NoAdapter);
            }
        }

        if let Err(e) = self.inner.scanner.reset_adapter().await {
            warn!("Failed to reset adapter, continuing: {}", e);
        }

        self.set_state(ConnectionState::Scanning);
        let mut discovered = match self.inner.scanner.start_scan().await {
            Ok(discovered) => discovered,
            Err(e) => {
                error!(
                    "Failed to start discovery. Make sure no other program is scanning: {}",
                    e
                );
                self.set_state(ConnectionState::Idle);
                return Err(e);
            }
        };

        self.set_state(ConnectionState::CandidatesGathering);
        let peers =
            BluetoothScanner::gather(&mut discovered, self.inner.settings.connection_timeout).await;
        let candidates = self.inner.scanner.inspect(peers).await;

        self.set_state(ConnectionState::Connecting);
        let connected = self.inner.connection.connect_best(&candidates).await;

        // give the bus time to export the GATT objects of the peer
        tokio::time::sleep(self.inner.settings.connection_timeout).await;

        match connected {
            Some(peer) => {
                if let Err(e) = self.on_device_connected(peer).await {
                    error!("Failed to set up Plejd session: {}", e);
                    self.set_state(ConnectionState::Idle);
                    self.emit(GatewayEvent::ConnectFailed);
                }
            }
            None => {
                self.set_state(ConnectionState::Idle);
                if self.inner.settings.keep_alive {
                    warn!("No Plejd device connected, waiting for keepalive to retry");
                    self.start_keepalive();
                } else {
                    warn!("No Plejd device connected, retrying");
                    let manager = self.clone();
                    let token = self.session_token();
                    tokio::spawn(async move {
                        let delay = manager.inner.settings.connection_timeout;
                        manager.reconnect_unless_replaced(delay, token).await;
                    });
                }
            }
        }

        self.inner.scanner.stop_scan().await;
        Ok(())
    }

    /// Binds the Plejd service of a connected peer and brings the session up
    pub async fn on_device_connected(&self, peer: Arc<dyn BlePeer>) -> Result<()> {
        self.set_state(ConnectionState::Enumerating);
        info!("Connection successful, discovering services...");
        let services = peer.services().await?;
        let session = gatt::bind_session(peer, &services)?;

        self.set_state(ConnectionState::Authenticating);
        if let Err(e) = self
            .inner
            .connection
            .authenticate(session.characteristics.auth.as_ref())
            .await
        {
            error!("Failed to authenticate: {}", e);
        }

        *self.inner.session.lock().await = Some(session.clone());

        self.start_keepalive();
        self.start_write_queue();
        self.start_notifications(&session).await;

        self.set_state(ConnectionState::Ready);
        info!("Plejd session ready");
        self.emit(GatewayEvent::Connected);
        Ok(())
    }

    /// Schedules `init()` after `delay`. While a re-init is pending or running,
    /// every caller gets the same handle.
    pub fn throttled_init(&self, delay: Duration) -> Flight<Result<()>> {
        let manager = self.clone();
        self.inner.reconnect.run(move || async move {
            info!("Reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
            manager.init().await
        })
    }

    /// Reconnects for the session owning `token` once any re-init in flight
    /// has completed. Skipped when that session was torn down meanwhile.
    async fn reconnect_unless_replaced(&self, delay: Duration, token: CancellationToken) {
        if let Some(current) = self.inner.reconnect.current() {
            debug!("Re-init in progress, reconnecting once it completes");
            let _ = current.await;
        }
        if token.is_cancelled() {
            debug!("Session already replaced, no reconnect needed");
            return;
        }
        let _ = self.throttled_init(delay);
    }

    fn start_keepalive(&self) {
        if !self.inner.settings.keep_alive {
            debug!("Keepalive disabled");
            return;
        }
        let link: Arc<dyn PingLink> = Arc::new(self.clone());
        tokio::spawn(keepalive::run(
            link,
            self.inner.settings.ping_interval,
            self.session_token(),
        ));
    }

    fn start_write_queue(&self) {
        let writer: Arc<dyn PayloadWriter> = Arc::new(self.clone());
        tokio::spawn(self.inner.write_queue.clone().run(
            writer,
            self.inner.settings.write_queue_wait_time,
            self.session_token(),
        ));
    }

    async fn start_notifications(&self, session: &Session) {
        let handler = NotificationHandler::new(
            self.inner.key.clone(),
            session.address,
            self.inner.runtime_state.clone(),
            self.inner.events.clone(),
        );

        info!("Subscribing to notifications...");
        let stream = match session.characteristics.last_data.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                return;
            }
        };

        let token = self.session_token();
        let manager = self.clone();
        tokio::spawn(async move {
            let ended = handler.process_notifications(stream, token.clone()).await;
            if ended && !token.is_cancelled() {
                warn!("Notification stream lost, reconnecting");
                let delay = manager.inner.settings.connection_timeout;
                manager.reconnect_unless_replaced(delay, token).await;
            }
        });
    }

    /// Stops the session and disconnects from the peer
    pub async fn disconnect(&self) {
        info!("Disconnecting Plejd session");
        let session = self.inner.session.lock().await.clone();
        self.clear_session().await;
        self.inner.write_queue.clear();
        if let Some(session) = session {
            self.inner.connection.disconnect(session.peer.as_ref()).await;
        }
        self.set_state(ConnectionState::Idle);
    }

    fn ensure_known(&self, device_id: u8) -> Result<()> {
        self.inner
            .registry
            .get(device_id)
            .map(|_| ())
            .ok_or(PlejdError::UnknownDevice(device_id))
    }

    fn transition_to(&self, device_id: u8, target: Option<i32>, transition: f64) {
        let initial = self.device_state(device_id).map(|s| s.brightness());
        let sink: Arc<dyn BrightnessSink> = Arc::new(self.clone());
        self.inner.transitions.transition_to(
            sink,
            device_id,
            self.inner.registry.is_dimmable(device_id),
            initial,
            target,
            transition,
        );
    }

    /// Runs the scene through the scene collaborator
    pub async fn trigger_scene(&self, scene_id: u8) -> Result<()> {
        self.inner.scenes.execute_scene(scene_id, self).await
    }
}

impl LightControl for PlejdManager {
    fn turn_on(&self, device_id: u8, options: TurnOnOptions) -> Result<()> {
        self.ensure_known(device_id)?;
        info!(
            "Turning on {} (brightness {:?}, transition {}s)",
            self.inner.registry.name(device_id),
            options.brightness,
            options.transition
        );
        self.transition_to(
            device_id,
            options.brightness.map(i32::from),
            options.transition,
        );
        Ok(())
    }

    fn turn_off(&self, device_id: u8, transition: f64) -> Result<()> {
        self.ensure_known(device_id)?;
        info!(
            "Turning off {} (transition {}s)",
            self.inner.registry.name(device_id),
            transition
        );
        self.transition_to(device_id, Some(0), transition);
        Ok(())
    }

    fn send_command(&self, command: PlejdCommand) {
        self.inner.write_queue.push(WriteQueueItem::new(command, true));
    }
}

impl BrightnessSink for PlejdManager {
    fn set_brightness(&self, device_id: u8, brightness: Option<i32>, should_retry: bool) {
        let command = PlejdCommand::for_brightness(device_id, brightness);
        self.inner
            .write_queue
            .push(WriteQueueItem::new(command, should_retry));
    }
}

#[async_trait]
impl PayloadWriter for PlejdManager {
    async fn write_payload(&self, payload: &[u8]) -> Result<()> {
        let outcome = {
            let session = self.inner.session.lock().await;
            let Some(session) = session.as_ref() else {
                debug!("Data characteristic not available, cannot write");
                return Err(PlejdError::NotConnected);
            };

            debug!("Sending {} byte(s) of data to Plejd: {}", payload.len(), hex::encode(payload));
            let encrypted = encrypt_decrypt(&self.inner.key, &session.address, payload);
            session.characteristics.data.write(&encrypted).await
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(e) => {
                if e == BusError::InProgress {
                    debug!("Write failed due to 'In Progress'");
                } else {
                    debug!("Write failed: {}", e);
                }
                let _ = self.throttled_init(self.inner.settings.connection_timeout);
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl PingLink for PlejdManager {
    async fn ping(&self) -> Result<u8> {
        let session = self.inner.session.lock().await;
        let session = session.as_ref().ok_or(PlejdError::NotConnected)?;
        let sent: u8 = rand::random();
        keepalive::ping_exchange(session.characteristics.ping.as_ref(), sent).await
    }

    fn ping_failed(&self, reason: PlejdError) {
        info!("Ping failed ({}), reconnecting.", reason);
        let _ = self.throttled_init(Duration::ZERO);
    }
}
