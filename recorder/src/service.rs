//! Supervised monitoring: the poll task, the orchestrator task and the
//! optional broadcast connection, started and stopped as one unit

use crate::config::{MonitorConfig, RecorderConfig};
use crate::error::ServiceError;
use crate::monitor::{LifecycleState, MonitorEvent, Sample, SessionStateMonitor};
use crate::orchestrator::{
    OrchestratorEvent, RecordingOrchestrator, ScreenRecorder, StandingsProvider,
    TelemetryRecorder,
};
use client::{BroadcastClient, ClientEvent, ReadOutcome, SharedStateReader};
use log::{debug, error, info, warn};
use shared::SessionInfo;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

const EVENT_CAPACITY: usize = 64;

struct Running {
    shutdown_tx: watch::Sender<bool>,
    poll_task: JoinHandle<SharedStateReader>,
    orchestrator_task: JoinHandle<RecordingOrchestrator>,
}

/// Entry point for callers: `start_monitoring` / `stop_monitoring`
///
/// While running, one task polls shared memory and drives the monitor, and a
/// second task runs the orchestrator so slow recorder launches never stall
/// polling. The reader and orchestrator move into their tasks and come back
/// when monitoring stops, so the service can be restarted.
pub struct RecorderService {
    config: RecorderConfig,
    reader: Option<SharedStateReader>,
    orchestrator: Option<RecordingOrchestrator>,
    client: BroadcastClient,
    orchestrator_events: broadcast::Sender<OrchestratorEvent>,
    monitor_events: broadcast::Sender<MonitorEvent>,
    state_rx: watch::Receiver<LifecycleState>,
    running: Option<Running>,
}

impl RecorderService {
    pub fn new(
        config: RecorderConfig,
        reader: SharedStateReader,
        telemetry: Box<dyn TelemetryRecorder>,
        screen: Box<dyn ScreenRecorder>,
    ) -> Self {
        let orchestrator = RecordingOrchestrator::new(telemetry, screen, config.screen.clone());
        let orchestrator_events = orchestrator.event_sender();
        let client = BroadcastClient::new(config.broadcast.clone().unwrap_or_default());
        let (monitor_events, _) = broadcast::channel(EVENT_CAPACITY);
        let (_, state_rx) = watch::channel(LifecycleState::Off);

        Self {
            config,
            reader: Some(reader),
            orchestrator: Some(orchestrator),
            client,
            orchestrator_events,
            monitor_events,
            state_rx,
            running: None,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Takes effect on the next `start_monitoring`
    pub fn configure(&mut self, config: RecorderConfig) {
        self.config = config;
    }

    pub fn is_monitoring(&self) -> bool {
        self.running.is_some()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.state_rx.borrow()
    }

    pub fn broadcast_client(&self) -> &BroadcastClient {
        &self.client
    }

    pub fn subscribe_monitor(&self) -> broadcast::Receiver<MonitorEvent> {
        self.monitor_events.subscribe()
    }

    pub fn subscribe_orchestrator(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.orchestrator_events.subscribe()
    }

    /// Connects the optional broadcast channel and spawns the supervised tasks
    ///
    /// A broadcast connection failure is logged and monitoring continues on
    /// shared memory alone. Calling this while already monitoring does nothing.
    pub async fn start_monitoring(&mut self) -> Result<(), ServiceError> {
        if self.running.is_some() {
            warn!("Monitoring already running");
            return Ok(());
        }

        let mut orchestrator = self
            .orchestrator
            .take()
            .ok_or(ServiceError::ComponentLost("recording orchestrator"))?;
        let Some(reader) = self.reader.take() else {
            self.orchestrator = Some(orchestrator);
            return Err(ServiceError::ComponentLost("shared memory reader"));
        };

        orchestrator.set_screen_config(self.config.screen.clone());
        orchestrator.set_standings_provider(None);

        let mut sessions = None;
        if let Some(connection) = &self.config.broadcast {
            self.client.configure(connection.clone());
            let events = self.client.subscribe();
            match self.client.connect().await {
                Ok(()) => {
                    let standings: Arc<dyn StandingsProvider> = Arc::new(self.client.registry());
                    orchestrator.set_standings_provider(Some(standings));
                    sessions = Some(events);
                }
                Err(e) => warn!("Continuing without broadcast data: {}", e),
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (orchestrator_tx, orchestrator_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LifecycleState::Off);
        self.state_rx = state_rx;

        let poller = Poller {
            reader,
            monitor: SessionStateMonitor::new(self.config.monitor.clone()),
            config: self.config.monitor.clone(),
            sessions,
            orchestrator_tx,
            monitor_events: self.monitor_events.clone(),
            state_tx,
            last_connect_attempt: None,
        };

        self.running = Some(Running {
            shutdown_tx,
            poll_task: tokio::spawn(poller.run(shutdown_rx)),
            orchestrator_task: tokio::spawn(orchestrator.run(orchestrator_rx)),
        });

        info!("Monitoring started");
        Ok(())
    }

    /// Stops polling, lets the orchestrator close any open recording, and
    /// disconnects the broadcast channel
    ///
    /// Returns once both tasks have finished. Calling it again is a no-op.
    pub async fn stop_monitoring(&mut self) {
        let Some(running) = self.running.take() else {
            debug!("Monitoring not running");
            return;
        };

        let _ = running.shutdown_tx.send(true);

        match running.poll_task.await {
            Ok(reader) => self.reader = Some(reader),
            Err(e) => error!("Poll task failed: {}", e),
        }
        match running.orchestrator_task.await {
            Ok(orchestrator) => self.orchestrator = Some(orchestrator),
            Err(e) => error!("Orchestrator task failed: {}", e),
        }

        self.client.disconnect().await;
        info!("Monitoring stopped");
    }
}

/// State owned by the poll task
struct Poller {
    reader: SharedStateReader,
    monitor: SessionStateMonitor,
    config: MonitorConfig,
    sessions: Option<broadcast::Receiver<ClientEvent>>,
    orchestrator_tx: mpsc::UnboundedSender<MonitorEvent>,
    monitor_events: broadcast::Sender<MonitorEvent>,
    state_tx: watch::Sender<LifecycleState>,
    last_connect_attempt: Option<Instant>,
}

impl Poller {
    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> SharedStateReader {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let events = self.monitor.shutdown(Instant::now());
                    self.dispatch(events);
                    break;
                },

                _ = ticker.tick() => {
                    let now = Instant::now();
                    let sample = self.sample(now);
                    let events = self.monitor.process(sample, now);
                    self.dispatch(events);
                },

                Some(session) = next_session(&mut self.sessions) => {
                    let events = self.monitor.observe_session(&session, Instant::now());
                    self.dispatch(events);
                },
            }
        }

        self.reader.disconnect();
        debug!("Poll task stopped");
        self.reader
    }

    fn sample(&mut self, now: Instant) -> Sample {
        if !self.reader.is_connected() {
            let due = self.last_connect_attempt.map_or(true, |at| {
                now.duration_since(at) >= self.config.reconnect_interval()
            });
            if !due {
                return Sample::Unavailable;
            }

            self.last_connect_attempt = Some(now);
            if let Err(e) = self.reader.connect() {
                debug!("{}", e);
                return Sample::Unavailable;
            }
        }

        match self.reader.read() {
            Ok(ReadOutcome::Fresh(snapshot)) => Sample::Fresh(snapshot),
            Ok(ReadOutcome::Stale) => Sample::Stale,
            Err(e) => {
                debug!("Shared memory read failed: {}", e);
                Sample::Unavailable
            }
        }
    }

    fn dispatch(&self, events: Vec<MonitorEvent>) {
        if events.is_empty() {
            return;
        }

        for event in events {
            if let Err(e) = self.orchestrator_tx.send(event.clone()) {
                error!("Orchestrator task gone, dropping {:?}", e.0);
            }
            let _ = self.monitor_events.send(event);
        }
        let _ = self.state_tx.send(self.monitor.state());
    }
}

/// Next session update from the broadcast client; pends forever without one
async fn next_session(
    events: &mut Option<broadcast::Receiver<ClientEvent>>,
) -> Option<SessionInfo> {
    let Some(rx) = events.as_mut() else {
        return std::future::pending().await;
    };

    loop {
        match rx.recv().await {
            Ok(ClientEvent::SessionUpdate(session)) => return Some(session),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => debug!("Skipped {} client events", skipped),
            Err(RecvError::Closed) => return None,
        }
    }
}
