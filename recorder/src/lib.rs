//! # Session Recorder
//!
//! Watches the simulator's lifecycle and records exactly one telemetry file
//! set and one screen capture per racing session.
//!
//! ## Components
//! - [`SessionStateMonitor`]: pure state machine from shared-memory samples
//!   and broadcast session updates to session start/end events, with
//!   debounce on the racing speed threshold
//! - [`RecordingOrchestrator`]: starts and stops the two recorders in order,
//!   rolls back a half-started recording, and reports final standings
//! - [`RecorderService`]: the supervised poll and orchestrator tasks behind
//!   `start_monitoring` / `stop_monitoring`
//!
//! The recorders themselves are traits ([`TelemetryRecorder`],
//! [`ScreenRecorder`]); storage and capture live outside this crate.

pub mod config;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod service;

pub use config::{MonitorConfig, RecorderConfig, ScreenCaptureConfig};
pub use error::{OrchestratorError, RecorderError, ServiceError};
pub use monitor::{LifecycleState, MonitorEvent, Sample, SessionStateMonitor};
pub use orchestrator::{
    session_id, OrchestratorEvent, RecorderKind, RecordingOrchestrator, RecordingReport,
    RecordingSession, ScreenRecorder, StandingsProvider, TelemetryRecorder, TelemetryStats,
};
pub use service::RecorderService;
