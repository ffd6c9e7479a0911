use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker the peer uses for "no time recorded" in lap and split fields
pub const NO_TIME: i32 = i32::MAX;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    Practice,
    Qualifying,
    Superpole,
    Race,
    Hotlap,
    Hotstint,
    HotlapSuperpole,
    Replay,
    TimeAttack,
    Drift,
    Drag,
    #[default]
    Unknown,
}

impl SessionType {
    /// Broadcasting protocol numbering
    pub fn from_wire(value: u8) -> Self {
        match value {
            0 => SessionType::Practice,
            4 => SessionType::Qualifying,
            9 => SessionType::Superpole,
            10 => SessionType::Race,
            11 => SessionType::Hotlap,
            12 => SessionType::Hotstint,
            13 => SessionType::HotlapSuperpole,
            14 => SessionType::Replay,
            _ => SessionType::Unknown,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            SessionType::Practice => 0,
            SessionType::Qualifying => 4,
            SessionType::Superpole => 9,
            SessionType::Race => 10,
            SessionType::Hotlap => 11,
            SessionType::Hotstint => 12,
            SessionType::HotlapSuperpole => 13,
            SessionType::Replay => 14,
            SessionType::TimeAttack
            | SessionType::Drift
            | SessionType::Drag
            | SessionType::Unknown => 255,
        }
    }

    /// Shared-memory graphics page numbering, which differs from the wire one
    pub fn from_shared_memory(value: i32) -> Self {
        match value {
            0 => SessionType::Practice,
            1 => SessionType::Qualifying,
            2 => SessionType::Race,
            3 => SessionType::Hotlap,
            4 => SessionType::TimeAttack,
            5 => SessionType::Drift,
            6 => SessionType::Drag,
            7 => SessionType::Hotstint,
            8 => SessionType::HotlapSuperpole,
            _ => SessionType::Unknown,
        }
    }

    pub fn to_shared_memory(self) -> i32 {
        match self {
            SessionType::Practice => 0,
            SessionType::Qualifying => 1,
            SessionType::Race => 2,
            SessionType::Hotlap => 3,
            SessionType::TimeAttack => 4,
            SessionType::Drift => 5,
            SessionType::Drag => 6,
            SessionType::Hotstint => 7,
            SessionType::HotlapSuperpole => 8,
            SessionType::Superpole | SessionType::Replay | SessionType::Unknown => -1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionType::Practice => "Practice",
            SessionType::Qualifying => "Qualifying",
            SessionType::Superpole => "Superpole",
            SessionType::Race => "Race",
            SessionType::Hotlap => "Hotlap",
            SessionType::Hotstint => "Hotstint",
            SessionType::HotlapSuperpole => "HotlapSuperpole",
            SessionType::Replay => "Replay",
            SessionType::TimeAttack => "TimeAttack",
            SessionType::Drift => "Drift",
            SessionType::Drag => "Drag",
            SessionType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Sub-state of a session as reported by the remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionPhase {
    None,
    Starting,
    PreFormation,
    FormationLap,
    PreSession,
    Session,
    SessionOver,
    PostSession,
    ResultUi,
}

impl SessionPhase {
    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => SessionPhase::Starting,
            2 => SessionPhase::PreFormation,
            3 => SessionPhase::FormationLap,
            4 => SessionPhase::PreSession,
            5 => SessionPhase::Session,
            6 => SessionPhase::SessionOver,
            7 => SessionPhase::PostSession,
            8 => SessionPhase::ResultUi,
            _ => SessionPhase::None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            SessionPhase::None => 0,
            SessionPhase::Starting => 1,
            SessionPhase::PreFormation => 2,
            SessionPhase::FormationLap => 3,
            SessionPhase::PreSession => 4,
            SessionPhase::Session => 5,
            SessionPhase::SessionOver => 6,
            SessionPhase::PostSession => 7,
            SessionPhase::ResultUi => 8,
        }
    }

    /// True while cars can be on track
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionPhase::Starting
                | SessionPhase::PreFormation
                | SessionPhase::FormationLap
                | SessionPhase::PreSession
                | SessionPhase::Session
                | SessionPhase::SessionOver
        )
    }
}

/// Where a car is; `None` means not on the circuit at all (garage/menus)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CarLocation {
    None,
    Track,
    Pitlane,
    PitEntry,
    PitExit,
}

impl CarLocation {
    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => CarLocation::Track,
            2 => CarLocation::Pitlane,
            3 => CarLocation::PitEntry,
            4 => CarLocation::PitExit,
            _ => CarLocation::None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            CarLocation::None => 0,
            CarLocation::Track => 1,
            CarLocation::Pitlane => 2,
            CarLocation::PitEntry => 3,
            CarLocation::PitExit => 4,
        }
    }

    pub fn in_pits(self) -> bool {
        matches!(
            self,
            CarLocation::Pitlane | CarLocation::PitEntry | CarLocation::PitExit
        )
    }
}

/// Status flag published in the shared-memory graphics page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameStatus {
    #[default]
    Off,
    Replay,
    Live,
    Pause,
}

impl GameStatus {
    pub fn from_shared_memory(value: i32) -> Self {
        match value {
            1 => GameStatus::Replay,
            2 => GameStatus::Live,
            3 => GameStatus::Pause,
            _ => GameStatus::Off,
        }
    }

    pub fn to_shared_memory(self) -> i32 {
        match self {
            GameStatus::Off => 0,
            GameStatus::Replay => 1,
            GameStatus::Live => 2,
            GameStatus::Pause => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BroadcastingEventType {
    None,
    GreenFlag,
    SessionOver,
    PenaltyCommMsg,
    Accident,
    LapCompleted,
    BestSessionLap,
    BestPersonalLap,
}

impl BroadcastingEventType {
    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => BroadcastingEventType::GreenFlag,
            2 => BroadcastingEventType::SessionOver,
            3 => BroadcastingEventType::PenaltyCommMsg,
            4 => BroadcastingEventType::Accident,
            5 => BroadcastingEventType::LapCompleted,
            6 => BroadcastingEventType::BestSessionLap,
            7 => BroadcastingEventType::BestPersonalLap,
            _ => BroadcastingEventType::None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            BroadcastingEventType::None => 0,
            BroadcastingEventType::GreenFlag => 1,
            BroadcastingEventType::SessionOver => 2,
            BroadcastingEventType::PenaltyCommMsg => 3,
            BroadcastingEventType::Accident => 4,
            BroadcastingEventType::LapCompleted => 5,
            BroadcastingEventType::BestSessionLap => 6,
            BroadcastingEventType::BestPersonalLap => 7,
        }
    }
}

/// One lap as reported by the peer. `None` times were sent as [`NO_TIME`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LapInfo {
    pub lap_time_ms: Option<i32>,
    pub car_index: u16,
    pub driver_index: u16,
    pub splits: Vec<Option<i32>>,
    pub is_invalid: bool,
    pub is_valid_for_best: bool,
    pub is_out_lap: bool,
    pub is_in_lap: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub first_name: String,
    pub last_name: String,
    pub short_name: String,
    pub category: u8,
    pub nationality: u16,
}

impl DriverInfo {
    /// "First Last", or the short name when both are blank
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.short_name.clone()
        } else {
            full.to_string()
        }
    }
}

/// Static identity of one car, sent once per car after an entry-list request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CarInfo {
    pub car_index: u16,
    pub car_model: u8,
    pub team_name: String,
    pub race_number: i32,
    pub cup_category: u8,
    pub current_driver_index: u8,
    pub nationality: u16,
    pub drivers: Vec<DriverInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeCarUpdate {
    pub car_index: u16,
    pub driver_index: u16,
    pub driver_count: u8,
    /// -1 reverse, 0 neutral, 1.. forward gears
    pub gear: i8,
    pub world_pos_x: f32,
    pub world_pos_y: f32,
    pub yaw: f32,
    pub location: CarLocation,
    pub kmh: u16,
    pub position: u16,
    pub cup_position: u16,
    pub track_position: u16,
    pub spline_position: f32,
    pub laps: u16,
    pub delta_ms: i32,
    pub best_session_lap: LapInfo,
    pub last_lap: LapInfo,
    pub current_lap: LapInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    pub ambient_temp: u8,
    pub track_temp: u8,
    /// 0.0 - 1.0
    pub cloud_cover: f32,
    /// 0.0 - 1.0
    pub rain_level: f32,
    /// 0.0 - 1.0
    pub wetness: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReplayInfo {
    pub session_time: f32,
    pub remaining_time: f32,
}

/// Session-level state from a `RealtimeUpdate`. Always replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub event_index: u16,
    pub session_index: u16,
    pub session_type: SessionType,
    pub phase: SessionPhase,
    pub session_time_ms: f32,
    pub remaining_time_ms: f32,
    pub focused_car_index: i32,
    pub active_camera_set: String,
    pub active_camera: String,
    pub hud_page: String,
    pub replay: Option<ReplayInfo>,
    pub time_of_day: f32,
    pub weather: Weather,
    pub best_session_lap: LapInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraSet {
    pub name: String,
    pub cameras: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackData {
    pub connection_id: i32,
    pub track_name: String,
    pub track_id: i32,
    pub length_meters: i32,
    pub camera_sets: Vec<CameraSet>,
    pub hud_pages: Vec<String>,
}

/// Incident/penalty style notification; forwarded, never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastingEvent {
    pub kind: BroadcastingEventType,
    pub message: String,
    pub time_ms: i32,
    pub car_index: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub connection_id: i32,
    pub success: bool,
    pub is_read_only: bool,
    pub error_message: String,
}
