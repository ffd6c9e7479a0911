use serde::{Deserialize, Serialize};
use shared::DEFAULT_BROADCAST_PORT;
use std::time::Duration;

/// Everything needed to register against the simulator's broadcasting interface.
///
/// Defaults match the simulator's stock `broadcasting.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Name the peer shows for this connection
    pub display_name: String,
    pub connection_password: String,
    /// Only needed for camera/HUD commands, which this client never sends
    pub command_password: String,
    /// How often the peer pushes realtime updates
    pub update_interval_ms: u32,
    pub registration_timeout_ms: u64,
    /// Upper bound on one blocking receive, and so on shutdown latency
    pub receive_timeout_ms: u64,
    /// Silence longer than this is reported as `PeerSilent`
    pub watchdog_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_BROADCAST_PORT,
            display_name: "ACCRecorder".to_string(),
            connection_password: "asd".to_string(),
            command_password: String::new(),
            update_interval_ms: 250,
            registration_timeout_ms: 2_000,
            receive_timeout_ms: 250,
            watchdog_interval_ms: 5_000,
        }
    }
}

impl ConnectionConfig {
    pub fn peer_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }
}
