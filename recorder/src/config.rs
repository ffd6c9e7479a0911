use client::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and thresholds for the lifecycle state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    /// Speed that counts as driving, in km/h
    pub speed_threshold_kmh: f32,
    /// How long speed must stay above the threshold before a session starts
    pub sustain_ms: u64,
    /// How long a stalled producer is tolerated before the region counts as gone
    pub stale_grace_ms: u64,
    /// Same, when the last fresh status was a pause; the game stops its
    /// counters while paused, so this is much longer
    pub paused_stale_grace_ms: u64,
    /// Delay between attempts to open a missing region
    pub reconnect_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            speed_threshold_kmh: 10.0,
            sustain_ms: 3_000,
            stale_grace_ms: 2_000,
            paused_stale_grace_ms: 600_000,
            reconnect_interval_ms: 1_000,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sustain(&self) -> Duration {
        Duration::from_millis(self.sustain_ms)
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_millis(self.stale_grace_ms)
    }

    pub fn paused_stale_grace(&self) -> Duration {
        Duration::from_millis(self.paused_stale_grace_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// Settings handed to the screen recorder untouched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenCaptureConfig {
    pub frame_rate: u32,
    pub encoder_preset: String,
    /// Constant rate factor; lower is better quality
    pub quality_factor: u8,
    pub include_audio: bool,
}

impl Default for ScreenCaptureConfig {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            encoder_preset: "ultrafast".to_string(),
            quality_factor: 23,
            include_audio: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub monitor: MonitorConfig,
    pub screen: ScreenCaptureConfig,
    /// Broadcasting connection used for session context and standings.
    /// `None` runs on shared memory alone.
    pub broadcast: Option<ConnectionConfig>,
}
