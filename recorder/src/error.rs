use crate::orchestrator::{RecorderKind, RecordingReport};
use thiserror::Error;

/// Failure reported by a recorder collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecorderError {
    #[error("failed to launch: {0}")]
    Launch(String),

    #[error("recorder is not running")]
    NotRunning,

    #[error("{0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    /// No session was left open; a telemetry recorder that had started was stopped again
    #[error("{}", start_failed(.stage, .cause, .rollback))]
    RecordingStartFailed {
        stage: RecorderKind,
        cause: RecorderError,
        /// Set when stopping the telemetry recorder during rollback also failed
        rollback: Option<RecorderError>,
    },

    /// The session was closed anyway; `partial` holds whatever the recorders reported
    #[error("{}", stop_failed(.screen, .telemetry))]
    RecordingStopFailed {
        screen: Option<RecorderError>,
        telemetry: Option<RecorderError>,
        partial: Box<RecordingReport>,
    },
}

fn start_failed(
    stage: &RecorderKind,
    cause: &RecorderError,
    rollback: &Option<RecorderError>,
) -> String {
    match (stage, rollback) {
        (RecorderKind::Telemetry, _) => format!("telemetry failed to start: {}", cause),
        (RecorderKind::Screen, None) => {
            format!("video failed to start: {}; telemetry rolled back", cause)
        }
        (RecorderKind::Screen, Some(rollback)) => format!(
            "video failed to start: {}; telemetry rollback also failed: {}",
            cause, rollback
        ),
    }
}

fn stop_failed(screen: &Option<RecorderError>, telemetry: &Option<RecorderError>) -> String {
    let mut causes = Vec::new();
    if let Some(e) = screen {
        causes.push(format!("video: {}", e));
    }
    if let Some(e) = telemetry {
        causes.push(format!("telemetry: {}", e));
    }
    format!("stop failed, files may be incomplete ({})", causes.join(", "))
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// A supervised task panicked and took its component with it
    #[error("{0} was lost when its task failed")]
    ComponentLost(&'static str),
}
