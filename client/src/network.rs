//! UDP conversation with the simulator's broadcasting interface

use crate::config::ConnectionConfig;
use crate::error::ClientError;
use crate::registry::{CarEntry, CarRegistry, RegistryHandle};
use log::{debug, error, info, warn};
use shared::{
    BroadcastingEvent, CarInfo, InboundMessage, OutboundMessage, RealtimeCarUpdate,
    SessionInfo, TrackData, MAX_DATAGRAM_SIZE,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, timeout_at};

/// Minimum gap between entry-list re-requests triggered by unknown cars
const ENTRY_LIST_RETRY: Duration = Duration::from_secs(1);
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Everything the client publishes to subscribers
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Registered { connection_id: i32, is_read_only: bool },
    EntryList { car_indexes: Vec<u16> },
    CarDetails(CarInfo),
    CarUpdate(RealtimeCarUpdate),
    SessionUpdate(SessionInfo),
    TrackData(TrackData),
    Broadcasting(BroadcastingEvent),
    /// No datagram for at least the watchdog interval; the client stays connected
    PeerSilent { silent_for: Duration },
    PeerResumed,
    /// Socket-level receive failure; the loop keeps running
    ReceiveError(String),
}

/// Client side of the broadcasting protocol
///
/// `connect` registers and spawns a receive task that owns all registry
/// writes. `disconnect` unregisters, stops the task and clears the registry.
/// Events fan out over a broadcast channel, so any number of subscribers can
/// listen without replacing each other.
pub struct BroadcastClient {
    config: ConnectionConfig,
    state: ConnectionState,
    connection_id: Option<i32>,
    socket: Option<Arc<UdpSocket>>,
    registry: Arc<RwLock<CarRegistry>>,
    events: broadcast::Sender<ClientEvent>,
    shutdown_tx: Option<watch::Sender<bool>>,
    receiver: Option<JoinHandle<()>>,
}

impl BroadcastClient {
    pub fn new(config: ConnectionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            config,
            state: ConnectionState::Disconnected,
            connection_id: None,
            socket: None,
            registry: Arc::new(RwLock::new(CarRegistry::new())),
            events,
            shutdown_tx: None,
            receiver: None,
        }
    }

    /// Replaces the connection settings used by the next `connect`
    pub fn configure(&mut self, config: ConnectionConfig) {
        self.config = config;
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn connection_id(&self) -> Option<i32> {
        self.connection_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> RegistryHandle {
        RegistryHandle::new(Arc::clone(&self.registry))
    }

    pub async fn standings(&self) -> Vec<CarEntry> {
        self.registry.read().await.standings()
    }

    pub async fn session_info(&self) -> Option<SessionInfo> {
        self.registry.read().await.session().cloned()
    }

    pub async fn track_data(&self) -> Option<TrackData> {
        self.registry.read().await.track().cloned()
    }

    /// Registers with the peer and starts the receive loop
    ///
    /// Fails with `ConnectionRejected` if the peer refuses the registration
    /// and `ConnectionTimeout` if nothing answers in time. Either way the
    /// client is left `Disconnected`.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.state != ConnectionState::Disconnected {
            return Err(ClientError::AlreadyConnected);
        }

        self.state = ConnectionState::Connecting;
        info!("Connecting to broadcasting interface at {}", self.config.peer_addr());

        match self.register().await {
            Ok((socket, connection_id)) => {
                self.start(socket, connection_id).await;
                Ok(())
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", self.config.peer_addr(), e);
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn register(&self) -> Result<(Arc<UdpSocket>, i32), ClientError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .connect((self.config.host.as_str(), self.config.port))
            .await?;

        let register = OutboundMessage::Register {
            display_name: self.config.display_name.clone(),
            connection_password: self.config.connection_password.clone(),
            command_password: self.config.command_password.clone(),
            update_interval_ms: self.config.update_interval_ms as i32,
        };
        socket.send(&register.encode()).await?;

        let wait = self.config.registration_timeout();
        let deadline = tokio::time::Instant::now() + wait;
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let len = match timeout_at(deadline, socket.recv(&mut buffer)).await {
                Err(_) => return Err(ClientError::ConnectionTimeout(wait)),
                Ok(Ok(len)) => len,
                Ok(Err(e)) => {
                    // ICMP port unreachable surfaces here; keep waiting for the deadline
                    debug!("Receive failed while registering: {}", e);
                    sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            match InboundMessage::decode(&buffer[..len]) {
                Ok(InboundMessage::RegistrationResult(result)) => {
                    if !result.success {
                        return Err(ClientError::ConnectionRejected(result.error_message));
                    }
                    if result.is_read_only {
                        info!("Registered read-only (command password not accepted)");
                    }
                    let _ = self.events.send(ClientEvent::Registered {
                        connection_id: result.connection_id,
                        is_read_only: result.is_read_only,
                    });
                    return Ok((Arc::new(socket), result.connection_id));
                }
                Ok(other) => debug!("Ignoring tag {} before registration", other.tag()),
                Err(e) => warn!("Discarding datagram: {}", e),
            }
        }
    }

    async fn start(&mut self, socket: Arc<UdpSocket>, connection_id: i32) {
        info!("Connected with connection id {}", connection_id);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let receiver = Receiver {
            socket: Arc::clone(&socket),
            registry: Arc::clone(&self.registry),
            events: self.events.clone(),
            connection_id,
            receive_timeout: self.config.receive_timeout(),
            watchdog_interval: self.config.watchdog_interval(),
            last_entry_list_request: None,
        };

        self.receiver = Some(tokio::spawn(receiver.run(shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);
        self.socket = Some(socket);
        self.connection_id = Some(connection_id);
        self.state = ConnectionState::Connected;

        if let Err(e) = self.request_entry_list().await {
            error!("Failed to request entry list: {}", e);
        }
        if let Err(e) = self.request_track_data().await {
            error!("Failed to request track data: {}", e);
        }
    }

    pub async fn request_entry_list(&self) -> Result<(), ClientError> {
        let connection_id = self.connection_id.ok_or(ClientError::NotConnected)?;
        self.send(&OutboundMessage::RequestEntryList { connection_id })
            .await
    }

    pub async fn request_track_data(&self) -> Result<(), ClientError> {
        let connection_id = self.connection_id.ok_or(ClientError::NotConnected)?;
        self.send(&OutboundMessage::RequestTrackData { connection_id })
            .await
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), ClientError> {
        let socket = self.socket.as_ref().ok_or(ClientError::NotConnected)?;
        socket.send(&message.encode()).await?;
        Ok(())
    }

    /// Unregisters, stops the receive loop and clears the registry
    ///
    /// Safe to call when already disconnected. The unregister datagram is
    /// best effort; a send failure is only logged.
    pub async fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }

        if let Some(connection_id) = self.connection_id {
            if let Err(e) = self.send(&OutboundMessage::Unregister { connection_id }).await {
                debug!("Unregister not delivered: {}", e);
            }
        }

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.receiver.take() {
            if let Err(e) = handle.await {
                error!("Receive task ended abnormally: {}", e);
            }
        }

        self.registry.write().await.clear();
        self.socket = None;
        self.connection_id = None;
        self.state = ConnectionState::Disconnected;
        info!("Disconnected from broadcasting interface");
    }
}

impl Drop for BroadcastClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
    }
}

const RECEIVE_BACKOFF_BASE: Duration = Duration::from_millis(10);

/// Consecutive receive failures since the last datagram
///
/// A vanished peer makes every receive fail at once, so only the first
/// failure of a burst is reported and the retry delay doubles up to a cap.
#[derive(Debug, Default)]
struct ErrorBurst {
    count: u32,
}

impl ErrorBurst {
    /// Returns true for the first failure of a burst
    fn record(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.count == 1
    }

    fn count(&self) -> u32 {
        self.count
    }

    fn backoff(&self, cap: Duration) -> Duration {
        let doublings = self.count.saturating_sub(1).min(16);
        RECEIVE_BACKOFF_BASE
            .saturating_mul(1 << doublings)
            .min(cap.max(RECEIVE_BACKOFF_BASE))
    }

    /// Ends the burst, returning how many failures it had
    fn clear(&mut self) -> u32 {
        std::mem::take(&mut self.count)
    }
}

/// State owned by the receive task
struct Receiver {
    socket: Arc<UdpSocket>,
    registry: Arc<RwLock<CarRegistry>>,
    events: broadcast::Sender<ClientEvent>,
    connection_id: i32,
    receive_timeout: Duration,
    watchdog_interval: Duration,
    last_entry_list_request: Option<Instant>,
}

impl Receiver {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut last_datagram = Instant::now();
        let mut silent = false;
        let mut errors = ErrorBurst::default();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,

                result = timeout(self.receive_timeout, self.socket.recv(&mut buffer)) => {
                    match result {
                        Ok(Ok(len)) => {
                            last_datagram = Instant::now();
                            let failures = errors.clear();
                            if failures > 1 {
                                info!("Receiving again after {} failed attempts", failures);
                            }
                            if silent {
                                silent = false;
                                info!("Broadcast peer resumed");
                                let _ = self.events.send(ClientEvent::PeerResumed);
                            }

                            match InboundMessage::decode(&buffer[..len]) {
                                Ok(message) => self.handle_message(message).await,
                                Err(e) => warn!("Discarding datagram: {}", e),
                            }
                        }
                        Ok(Err(e)) => {
                            if errors.record() {
                                error!("Error receiving datagram: {}", e);
                                let _ = self.events.send(ClientEvent::ReceiveError(e.to_string()));
                            } else {
                                debug!("Receive still failing ({} in a row): {}", errors.count(), e);
                            }
                            sleep(errors.backoff(self.receive_timeout)).await;
                        }
                        Err(_) => {}
                    }

                    let silent_for = last_datagram.elapsed();
                    if !silent && silent_for >= self.watchdog_interval {
                        silent = true;
                        warn!("No datagrams from broadcast peer for {:?}", silent_for);
                        let _ = self.events.send(ClientEvent::PeerSilent { silent_for });
                    }
                }
            }
        }

        debug!("Receive loop stopped");
    }

    async fn handle_message(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::RegistrationResult(result) => {
                debug!(
                    "Late registration result for connection {} (success: {})",
                    result.connection_id, result.success
                );
            }
            InboundMessage::EntryList { car_indexes, .. } => {
                self.registry.write().await.apply_entry_list(&car_indexes);
                debug!("Entry list with {} cars", car_indexes.len());
                let _ = self.events.send(ClientEvent::EntryList { car_indexes });
            }
            InboundMessage::EntryListCar(info) => {
                self.registry.write().await.upsert_car_info(info.clone());
                let _ = self.events.send(ClientEvent::CarDetails(info));
            }
            InboundMessage::RealtimeCarUpdate(update) => {
                let known = self.registry.write().await.apply_realtime_car_update(&update);
                if !known {
                    self.request_entry_list_throttled(update.car_index).await;
                }
                let _ = self.events.send(ClientEvent::CarUpdate(update));
            }
            InboundMessage::RealtimeUpdate(session) => {
                self.registry.write().await.set_session(session.clone());
                let _ = self.events.send(ClientEvent::SessionUpdate(session));
            }
            InboundMessage::TrackData(track) => {
                info!("Track: {} ({} m)", track.track_name, track.length_meters);
                self.registry.write().await.set_track(track.clone());
                let _ = self.events.send(ClientEvent::TrackData(track));
            }
            InboundMessage::BroadcastingEvent(event) => {
                debug!("Broadcasting event {:?}: {}", event.kind, event.message);
                let _ = self.events.send(ClientEvent::Broadcasting(event));
            }
        }
    }

    async fn request_entry_list_throttled(&mut self, car_index: u16) {
        let due = self
            .last_entry_list_request
            .map_or(true, |at| at.elapsed() >= ENTRY_LIST_RETRY);
        if !due {
            return;
        }

        self.last_entry_list_request = Some(Instant::now());
        debug!("Unknown car {}, requesting entry list", car_index);

        let request = OutboundMessage::RequestEntryList {
            connection_id: self.connection_id,
        };
        if let Err(e) = self.socket.send(&request.encode()).await {
            warn!("Failed to request entry list: {}", e);
        }
    }
}
