//! Exactly-once start/stop of the telemetry and screen recorders
//!
//! The orchestrator owns the single open [`RecordingSession`]. Whether a
//! recording is running is decided only by that session's presence, never by
//! asking the recorders, so repeated or out-of-place monitor events cannot
//! double-start or double-stop them.
//!
//! Start order is telemetry then screen, since the screen recorder writes into
//! the directory the telemetry recorder creates. Stop order is the reverse.
//! If the screen recorder fails to start, the telemetry recorder is stopped
//! again before the failure is reported.

use crate::config::ScreenCaptureConfig;
use crate::error::{OrchestratorError, RecorderError};
use crate::monitor::MonitorEvent;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use client::{CarEntry, RegistryHandle};
use log::{debug, error, info, warn};
use shared::{PlayerSnapshot, SessionType};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderKind {
    Telemetry,
    Screen,
}

/// What the telemetry recorder reports when stopped
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryStats {
    pub record_count: u64,
    pub duration_seconds: f64,
}

/// Writes telemetry records for one session
#[async_trait]
pub trait TelemetryRecorder: Send {
    /// Creates the session's storage and returns its directory
    async fn start(&mut self, session_id: &str) -> Result<PathBuf, RecorderError>;

    async fn stop(&mut self) -> Result<TelemetryStats, RecorderError>;

    /// Fed by whatever samples telemetry for storage; the orchestrator never calls it
    async fn append(&mut self, snapshot: &PlayerSnapshot) -> Result<(), RecorderError>;
}

/// Captures the screen to a video file
#[async_trait]
pub trait ScreenRecorder: Send {
    async fn start(
        &mut self,
        output_path: &Path,
        config: &ScreenCaptureConfig,
    ) -> Result<(), RecorderError>;

    /// Returns the captured video's duration in seconds
    async fn stop(&mut self) -> Result<f64, RecorderError>;

    /// Where to report failures that happen while capturing
    fn set_error_sink(&mut self, sink: mpsc::UnboundedSender<RecorderError>);
}

/// Source of final standings for the stop report
#[async_trait]
pub trait StandingsProvider: Send + Sync {
    async fn standings(&self) -> Vec<CarEntry>;
}

#[async_trait]
impl StandingsProvider for RegistryHandle {
    async fn standings(&self) -> Vec<CarEntry> {
        RegistryHandle::standings(self).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSession {
    pub id: String,
    pub session_type: SessionType,
    pub started_at: DateTime<Local>,
    pub directory: PathBuf,
    pub video_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingReport {
    pub session_id: String,
    pub session_type: SessionType,
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    /// Racing time as measured by the monitor
    pub duration_seconds: f64,
    pub directory: PathBuf,
    /// `None` if the telemetry recorder failed to stop
    pub telemetry: Option<TelemetryStats>,
    /// `None` if the screen recorder failed to stop
    pub video_duration_seconds: Option<f64>,
    /// Empty when no standings source is attached
    pub standings: Vec<CarEntry>,
}

#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    RecordingStarted(RecordingSession),
    RecordingStopped(RecordingReport),
    Failed(OrchestratorError),
    /// Reported by the screen recorder while capturing
    ScreenError(RecorderError),
}

/// `ACC_<type>_<YYYYmmdd_HHMMSS>` in local time
pub fn session_id(session_type: SessionType, started_at: &DateTime<Local>) -> String {
    format!(
        "ACC_{}_{}",
        session_type.label(),
        started_at.format("%Y%m%d_%H%M%S")
    )
}

pub struct RecordingOrchestrator {
    telemetry: Box<dyn TelemetryRecorder>,
    screen: Box<dyn ScreenRecorder>,
    screen_config: ScreenCaptureConfig,
    standings: Option<Arc<dyn StandingsProvider>>,
    session: Option<RecordingSession>,
    events: broadcast::Sender<OrchestratorEvent>,
    screen_errors: mpsc::UnboundedReceiver<RecorderError>,
}

impl RecordingOrchestrator {
    pub fn new(
        telemetry: Box<dyn TelemetryRecorder>,
        mut screen: Box<dyn ScreenRecorder>,
        screen_config: ScreenCaptureConfig,
    ) -> Self {
        let (sink, screen_errors) = mpsc::unbounded_channel();
        screen.set_error_sink(sink);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            telemetry,
            screen,
            screen_config,
            standings: None,
            session: None,
            events,
            screen_errors,
        }
    }

    pub fn set_standings_provider(&mut self, provider: Option<Arc<dyn StandingsProvider>>) {
        self.standings = provider;
    }

    pub fn set_screen_config(&mut self, config: ScreenCaptureConfig) {
        self.screen_config = config;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<OrchestratorEvent> {
        self.events.clone()
    }

    pub fn current_session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Starts both recorders for a new session
    ///
    /// Returns `Ok(None)` without touching the recorders if a session is
    /// already open.
    pub async fn start_recording(
        &mut self,
        session_type: SessionType,
        started_at: DateTime<Local>,
    ) -> Result<Option<RecordingSession>, OrchestratorError> {
        if let Some(open) = &self.session {
            warn!("Session {} already recording, ignoring start", open.id);
            return Ok(None);
        }

        let id = session_id(session_type, &started_at);
        info!("Starting recording {}", id);

        let directory = self.telemetry.start(&id).await.map_err(|cause| {
            error!("Telemetry recorder failed to start: {}", cause);
            OrchestratorError::RecordingStartFailed {
                stage: RecorderKind::Telemetry,
                cause,
                rollback: None,
            }
        })?;

        let video_path = directory.join(format!("{}.mp4", id));
        if let Err(cause) = self.screen.start(&video_path, &self.screen_config).await {
            error!("Screen recorder failed to start: {}, rolling back telemetry", cause);
            let rollback = self.telemetry.stop().await.err();
            if let Some(e) = &rollback {
                error!("Telemetry rollback failed: {}", e);
            }
            return Err(OrchestratorError::RecordingStartFailed {
                stage: RecorderKind::Screen,
                cause,
                rollback,
            });
        }

        let session = RecordingSession {
            id,
            session_type,
            started_at,
            directory,
            video_path,
        };
        info!("Recording to {}", session.directory.display());
        self.session = Some(session.clone());
        Ok(Some(session))
    }

    /// Stops both recorders and closes the session
    ///
    /// The session is closed even when a recorder fails to stop. Returns
    /// `Ok(None)` if no session was open.
    pub async fn stop_recording(
        &mut self,
        ended_at: DateTime<Local>,
        duration_seconds: f64,
    ) -> Result<Option<RecordingReport>, OrchestratorError> {
        let Some(session) = self.session.take() else {
            debug!("No open session, ignoring stop");
            return Ok(None);
        };

        info!("Stopping recording {}", session.id);
        let video = self.screen.stop().await;
        let telemetry = self.telemetry.stop().await;

        let standings = match &self.standings {
            Some(provider) => provider.standings().await,
            None => Vec::new(),
        };

        let report = RecordingReport {
            session_id: session.id,
            session_type: session.session_type,
            started_at: session.started_at,
            ended_at,
            duration_seconds,
            directory: session.directory,
            telemetry: telemetry.as_ref().ok().copied(),
            video_duration_seconds: video.as_ref().ok().copied(),
            standings,
        };

        match (video, telemetry) {
            (Ok(_), Ok(stats)) => {
                info!(
                    "Recording {} stopped: {:.1}s, {} telemetry records",
                    report.session_id, duration_seconds, stats.record_count
                );
                Ok(Some(report))
            }
            (video, telemetry) => {
                let screen = video.err();
                let telemetry = telemetry.err();
                error!(
                    "Recording {} stopped with errors (video: {:?}, telemetry: {:?})",
                    report.session_id, screen, telemetry
                );
                Err(OrchestratorError::RecordingStopFailed {
                    screen,
                    telemetry,
                    partial: Box::new(report),
                })
            }
        }
    }

    /// Acts on one monitor event and publishes the outcome
    pub async fn handle_event(&mut self, event: &MonitorEvent) {
        let outcome = match event {
            MonitorEvent::SessionStarted {
                session_type,
                started_at,
            } => self
                .start_recording(*session_type, *started_at)
                .await
                .map(|started| started.map(OrchestratorEvent::RecordingStarted)),
            MonitorEvent::SessionEnded {
                ended_at,
                duration_seconds,
            } => self
                .stop_recording(*ended_at, *duration_seconds)
                .await
                .map(|stopped| stopped.map(OrchestratorEvent::RecordingStopped)),
            MonitorEvent::StatusChanged { .. } => Ok(None),
        };

        let published = match outcome {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => OrchestratorEvent::Failed(e),
        };
        let _ = self.events.send(published);
    }

    /// Consumes monitor events until the sender goes away, then hands itself back
    ///
    /// A session still open at that point is stopped before returning.
    pub async fn run(mut self, mut monitor_events: mpsc::UnboundedReceiver<MonitorEvent>) -> Self {
        loop {
            tokio::select! {
                event = monitor_events.recv() => {
                    match event {
                        Some(event) => self.handle_event(&event).await,
                        None => break,
                    }
                },

                Some(error) = self.screen_errors.recv() => {
                    warn!("Screen recorder reported: {}", error);
                    let _ = self.events.send(OrchestratorEvent::ScreenError(error));
                },
            }
        }

        if let Some(session) = &self.session {
            warn!("Monitor stopped with {} still recording", session.id);
            let ended_at = Local::now();
            let duration_seconds =
                (ended_at - session.started_at).num_milliseconds().max(0) as f64 / 1000.0;
            self.handle_event(&MonitorEvent::SessionEnded {
                ended_at,
                duration_seconds,
            })
            .await;
        }

        debug!("Orchestrator task stopped");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Calls {
        order: Vec<&'static str>,
        screen_sink: Option<mpsc::UnboundedSender<RecorderError>>,
    }

    impl Calls {
        fn count(&self, call: &str) -> usize {
            self.order.iter().filter(|c| **c == call).count()
        }
    }

    struct FakeTelemetry {
        calls: Arc<Mutex<Calls>>,
        fail_start: bool,
        fail_stop: bool,
    }

    #[async_trait]
    impl TelemetryRecorder for FakeTelemetry {
        async fn start(&mut self, session_id: &str) -> Result<PathBuf, RecorderError> {
            self.calls.lock().unwrap().order.push("telemetry.start");
            if self.fail_start {
                return Err(RecorderError::Failed("disk full".to_string()));
            }
            Ok(PathBuf::from("sessions").join(session_id))
        }

        async fn stop(&mut self) -> Result<TelemetryStats, RecorderError> {
            self.calls.lock().unwrap().order.push("telemetry.stop");
            if self.fail_stop {
                return Err(RecorderError::NotRunning);
            }
            Ok(TelemetryStats {
                record_count: 1200,
                duration_seconds: 60.0,
            })
        }

        async fn append(&mut self, _snapshot: &PlayerSnapshot) -> Result<(), RecorderError> {
            Ok(())
        }
    }

    struct FakeScreen {
        calls: Arc<Mutex<Calls>>,
        fail_start: bool,
    }

    #[async_trait]
    impl ScreenRecorder for FakeScreen {
        async fn start(
            &mut self,
            _output_path: &Path,
            _config: &ScreenCaptureConfig,
        ) -> Result<(), RecorderError> {
            self.calls.lock().unwrap().order.push("screen.start");
            if self.fail_start {
                return Err(RecorderError::Launch("ffmpeg not found".to_string()));
            }
            Ok(())
        }

        async fn stop(&mut self) -> Result<f64, RecorderError> {
            self.calls.lock().unwrap().order.push("screen.stop");
            Ok(59.5)
        }

        fn set_error_sink(&mut self, sink: mpsc::UnboundedSender<RecorderError>) {
            self.calls.lock().unwrap().screen_sink = Some(sink);
        }
    }

    fn orchestrator(
        telemetry_fails_start: bool,
        screen_fails_start: bool,
        telemetry_fails_stop: bool,
    ) -> (RecordingOrchestrator, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let telemetry = FakeTelemetry {
            calls: Arc::clone(&calls),
            fail_start: telemetry_fails_start,
            fail_stop: telemetry_fails_stop,
        };
        let screen = FakeScreen {
            calls: Arc::clone(&calls),
            fail_start: screen_fails_start,
        };
        let orchestrator = RecordingOrchestrator::new(
            Box::new(telemetry),
            Box::new(screen),
            ScreenCaptureConfig::default(),
        );
        (orchestrator, calls)
    }

    fn at(s: &str) -> DateTime<Local> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Local)
    }

    #[test]
    fn test_session_id_format() {
        let started_at = Local::now();
        let id = session_id(SessionType::Race, &started_at);
        assert_eq!(
            id,
            format!("ACC_Race_{}", started_at.format("%Y%m%d_%H%M%S"))
        );
        assert_eq!(id.len(), "ACC_Race_".len() + 15);
    }

    #[tokio::test]
    async fn test_start_then_stop_in_order() {
        let (mut orchestrator, calls) = orchestrator(false, false, false);

        let session = orchestrator
            .start_recording(SessionType::Race, Local::now())
            .await
            .unwrap()
            .unwrap();
        assert!(orchestrator.is_recording());
        assert_eq!(
            session.video_path,
            session.directory.join(format!("{}.mp4", session.id))
        );

        let report = orchestrator
            .stop_recording(Local::now(), 61.0)
            .await
            .unwrap()
            .unwrap();
        assert!(!orchestrator.is_recording());
        assert_eq!(report.session_id, session.id);
        assert_eq!(report.telemetry.unwrap().record_count, 1200);
        assert_eq!(report.video_duration_seconds, Some(59.5));
        assert!(report.standings.is_empty());

        assert_eq!(
            calls.lock().unwrap().order,
            vec!["telemetry.start", "screen.start", "screen.stop", "telemetry.stop"]
        );
    }

    #[tokio::test]
    async fn test_second_start_is_ignored() {
        let (mut orchestrator, calls) = orchestrator(false, false, false);

        orchestrator
            .start_recording(SessionType::Practice, Local::now())
            .await
            .unwrap();
        let second = orchestrator
            .start_recording(SessionType::Practice, Local::now())
            .await
            .unwrap();

        assert!(second.is_none());
        assert_eq!(calls.lock().unwrap().count("telemetry.start"), 1);
        assert_eq!(calls.lock().unwrap().count("screen.start"), 1);
    }

    #[tokio::test]
    async fn test_stop_without_session_is_ignored() {
        let (mut orchestrator, calls) = orchestrator(false, false, false);

        let report = orchestrator.stop_recording(Local::now(), 0.0).await.unwrap();
        assert!(report.is_none());
        assert!(calls.lock().unwrap().order.is_empty());
    }

    #[tokio::test]
    async fn test_screen_failure_rolls_back_telemetry() {
        let (mut orchestrator, calls) = orchestrator(false, true, false);

        let result = orchestrator
            .start_recording(SessionType::Race, Local::now())
            .await;

        assert_eq!(
            result,
            Err(OrchestratorError::RecordingStartFailed {
                stage: RecorderKind::Screen,
                cause: RecorderError::Launch("ffmpeg not found".to_string()),
                rollback: None,
            })
        );
        assert!(!orchestrator.is_recording());
        assert_eq!(calls.lock().unwrap().count("telemetry.stop"), 1);
    }

    #[tokio::test]
    async fn test_telemetry_failure_starts_nothing() {
        let (mut orchestrator, calls) = orchestrator(true, false, false);

        let result = orchestrator
            .start_recording(SessionType::Race, Local::now())
            .await;

        assert!(matches!(
            result,
            Err(OrchestratorError::RecordingStartFailed {
                stage: RecorderKind::Telemetry,
                ..
            })
        ));
        assert_eq!(calls.lock().unwrap().order, vec!["telemetry.start"]);
    }

    #[tokio::test]
    async fn test_stop_failure_still_closes_session() {
        let (mut orchestrator, _calls) = orchestrator(false, false, true);

        orchestrator
            .start_recording(SessionType::Hotstint, at("2024-05-01T14:30:00+00:00"))
            .await
            .unwrap();
        let result = orchestrator
            .stop_recording(at("2024-05-01T14:40:00+00:00"), 600.0)
            .await;

        match result {
            Err(OrchestratorError::RecordingStopFailed {
                screen,
                telemetry,
                partial,
            }) => {
                assert!(screen.is_none());
                assert_eq!(telemetry, Some(RecorderError::NotRunning));
                assert_eq!(partial.video_duration_seconds, Some(59.5));
                assert!(partial.telemetry.is_none());
            }
            other => panic!("Expected stop failure, got {:?}", other),
        }
        assert!(!orchestrator.is_recording());
    }

    #[tokio::test]
    async fn test_run_publishes_and_closes_on_shutdown() {
        let (orchestrator, calls) = orchestrator(false, false, false);
        let mut published = orchestrator.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(orchestrator.run(rx));
        tx.send(MonitorEvent::SessionStarted {
            session_type: SessionType::Race,
            started_at: Local::now(),
        })
        .unwrap();
        drop(tx);

        let orchestrator = task.await.unwrap();
        assert!(!orchestrator.is_recording());
        assert_eq!(calls.lock().unwrap().count("telemetry.stop"), 1);

        assert!(matches!(
            published.recv().await.unwrap(),
            OrchestratorEvent::RecordingStarted(_)
        ));
        assert!(matches!(
            published.recv().await.unwrap(),
            OrchestratorEvent::RecordingStopped(_)
        ));
    }

    #[tokio::test]
    async fn test_screen_errors_are_published() {
        let (orchestrator, calls) = orchestrator(false, false, false);
        let mut published = orchestrator.subscribe();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(orchestrator.run(rx));

        let sink = calls.lock().unwrap().screen_sink.clone().unwrap();
        sink.send(RecorderError::Failed("encoder crashed".to_string()))
            .unwrap();

        match published.recv().await.unwrap() {
            OrchestratorEvent::ScreenError(error) => {
                assert_eq!(error, RecorderError::Failed("encoder crashed".to_string()))
            }
            other => panic!("Unexpected event: {:?}", other),
        }

        drop(tx);
        task.await.unwrap();
    }
}
