//! Lifecycle state machine driven by shared-memory samples
//!
//! Turns a noisy stream of per-poll samples into six discrete states and two
//! recording triggers:
//! - Menu, replay and pause changes follow the status flag immediately
//! - Entering a session is debounced: speed must stay above the threshold
//!   for the sustain duration across consecutive fresh samples
//! - Leaving a session is instantaneous, except that a pause keeps the
//!   session open
//!
//! The monitor is synchronous and takes the current `Instant` as an argument,
//! so tests can drive it with synthetic clocks.

use crate::config::MonitorConfig;
use chrono::{DateTime, Local};
use log::{debug, info};
use shared::{GameStatus, PlayerSnapshot, SessionInfo, SessionPhase, SessionType};
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Shared region unavailable: simulator closed
    Off,
    Menu,
    Replay,
    Paused,
    /// In a live session, not yet driving
    Waiting,
    Racing,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Off => "OFF",
            LifecycleState::Menu => "MENU",
            LifecycleState::Replay => "REPLAY",
            LifecycleState::Paused => "PAUSED",
            LifecycleState::Waiting => "WAITING",
            LifecycleState::Racing => "RACING",
        };
        f.write_str(name)
    }
}

/// One poll of the shared-memory reader
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Fresh(PlayerSnapshot),
    Stale,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    StatusChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
    SessionStarted {
        session_type: SessionType,
        started_at: DateTime<Local>,
    },
    SessionEnded {
        ended_at: DateTime<Local>,
        duration_seconds: f64,
    },
}

/// Latest session context from the broadcasting channel
#[derive(Debug, Clone, Copy)]
struct BroadcastContext {
    session_index: u16,
    session_type: SessionType,
    phase: SessionPhase,
    seen_at: Instant,
}

pub struct SessionStateMonitor {
    config: MonitorConfig,
    state: LifecycleState,
    /// First fresh sample of the current above-threshold run
    speeding_since: Option<Instant>,
    racing_since: Option<Instant>,
    last_fresh_at: Option<Instant>,
    last_fresh_status: Option<GameStatus>,
    /// Graphics-page lap clock from the previous fresh sample
    last_lap_time_ms: Option<i32>,
    session_type: SessionType,
    broadcast: Option<BroadcastContext>,
}

impl SessionStateMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            state: LifecycleState::Off,
            speeding_since: None,
            racing_since: None,
            last_fresh_at: None,
            last_fresh_status: None,
            last_lap_time_ms: None,
            session_type: SessionType::Unknown,
            broadcast: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_racing(&self) -> bool {
        self.state == LifecycleState::Racing
    }

    /// Feeds one poll result through the state machine
    pub fn process(&mut self, sample: Sample, now: Instant) -> Vec<MonitorEvent> {
        let mut events = Vec::new();

        match sample {
            Sample::Fresh(snapshot) => self.process_fresh(&snapshot, now, &mut events),
            Sample::Stale => self.process_stale(now, &mut events),
            Sample::Unavailable => self.region_lost(now, &mut events),
        }

        events
    }

    fn process_fresh(
        &mut self,
        snapshot: &PlayerSnapshot,
        now: Instant,
        events: &mut Vec<MonitorEvent>,
    ) {
        self.last_fresh_at = Some(now);
        self.last_fresh_status = Some(snapshot.status);
        let clock_reset = self.last_lap_time_ms.is_some_and(|prev| prev > 0)
            && snapshot.current_lap_time_ms == 0;
        self.last_lap_time_ms = Some(snapshot.current_lap_time_ms);
        if snapshot.session_type != SessionType::Unknown {
            self.session_type = snapshot.session_type;
        }

        match snapshot.status {
            GameStatus::Off => self.leave_session(LifecycleState::Menu, now, events),
            GameStatus::Replay => self.leave_session(LifecycleState::Replay, now, events),
            GameStatus::Pause => {
                if self.state != LifecycleState::Racing {
                    self.speeding_since = None;
                    self.transition(LifecycleState::Paused, events);
                }
            }
            GameStatus::Live => {
                if self.state == LifecycleState::Racing {
                    // Restarting a session puts the car back on the grid with a zeroed clock
                    if clock_reset && snapshot.speed_kmh <= self.config.speed_threshold_kmh {
                        info!("Session clock reset, restarting");
                        self.leave_session(LifecycleState::Waiting, now, events);
                    }
                    return;
                }
                if self.state != LifecycleState::Waiting {
                    self.speeding_since = None;
                    self.transition(LifecycleState::Waiting, events);
                }
                self.debounce_start(snapshot.speed_kmh, now, events);
            }
        }
    }

    fn debounce_start(&mut self, speed_kmh: f32, now: Instant, events: &mut Vec<MonitorEvent>) {
        if speed_kmh <= self.config.speed_threshold_kmh {
            if self.speeding_since.take().is_some() {
                debug!("Speed dropped below threshold, debounce reset");
            }
            return;
        }

        let since = *self.speeding_since.get_or_insert(now);
        if now.duration_since(since) < self.config.sustain() {
            return;
        }

        self.speeding_since = None;
        self.racing_since = Some(now);
        self.transition(LifecycleState::Racing, events);

        let session_type = self.current_session_type();
        info!("Session started: {}", session_type);
        events.push(MonitorEvent::SessionStarted {
            session_type,
            started_at: Local::now(),
        });
    }

    fn process_stale(&mut self, now: Instant, events: &mut Vec<MonitorEvent>) {
        if self.state == LifecycleState::Waiting {
            self.speeding_since = None;
        }

        let Some(last_fresh_at) = self.last_fresh_at else {
            return;
        };

        // Menus and replays legitimately stop the physics counter
        let live = matches!(
            self.state,
            LifecycleState::Waiting | LifecycleState::Racing
        );
        if !live {
            return;
        }

        // So does a pause, but a game that exits while paused looks the same
        let grace = if self.last_fresh_status == Some(GameStatus::Pause) {
            self.config.paused_stale_grace()
        } else {
            self.config.stale_grace()
        };
        if now.duration_since(last_fresh_at) > grace {
            debug!("Producer stalled for more than {:?}", grace);
            self.region_lost(now, events);
        }
    }

    fn region_lost(&mut self, now: Instant, events: &mut Vec<MonitorEvent>) {
        if self.broadcast_active(now) {
            debug!("Shared memory unavailable, broadcast still reports an active session");
            return;
        }

        self.last_fresh_at = None;
        self.last_fresh_status = None;
        self.last_lap_time_ms = None;
        self.leave_session(LifecycleState::Off, now, events);
    }

    /// Records session context from the broadcasting channel
    ///
    /// A new session index while racing means the session was restarted:
    /// the current one ends and the next needs its own debounce.
    pub fn observe_session(&mut self, session: &SessionInfo, now: Instant) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        let previous = self.broadcast.replace(BroadcastContext {
            session_index: session.session_index,
            session_type: session.session_type,
            phase: session.phase,
            seen_at: now,
        });

        let restarted = previous.is_some_and(|p| p.session_index != session.session_index);
        if restarted && self.state == LifecycleState::Racing {
            info!(
                "Session index changed to {}, restarting",
                session.session_index
            );
            self.leave_session(LifecycleState::Waiting, now, &mut events);
        }

        events
    }

    /// Ends any racing session and moves to `Off`. Repeated calls emit nothing.
    pub fn shutdown(&mut self, now: Instant) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        self.leave_session(LifecycleState::Off, now, &mut events);
        self.broadcast = None;
        self.last_fresh_at = None;
        self.last_fresh_status = None;
        self.last_lap_time_ms = None;
        events
    }

    fn broadcast_active(&self, now: Instant) -> bool {
        self.broadcast.is_some_and(|b| {
            b.phase.is_active() && now.duration_since(b.seen_at) <= self.config.stale_grace()
        })
    }

    fn current_session_type(&self) -> SessionType {
        match (self.session_type, self.broadcast) {
            (SessionType::Unknown, Some(b)) => b.session_type,
            (session_type, _) => session_type,
        }
    }

    /// Moves to `target`, ending the session first if one is running
    fn leave_session(
        &mut self,
        target: LifecycleState,
        now: Instant,
        events: &mut Vec<MonitorEvent>,
    ) {
        self.speeding_since = None;
        let was_racing = self.state == LifecycleState::Racing;
        self.transition(target, events);

        if was_racing {
            let duration = self
                .racing_since
                .take()
                .map_or(Duration::ZERO, |since| now.duration_since(since));
            info!("Session ended after {:.1}s", duration.as_secs_f64());
            events.push(MonitorEvent::SessionEnded {
                ended_at: Local::now(),
                duration_seconds: duration.as_secs_f64(),
            });
        }
    }

    fn transition(&mut self, to: LifecycleState, events: &mut Vec<MonitorEvent>) {
        if self.state == to {
            return;
        }

        let from = self.state;
        self.state = to;
        info!("Lifecycle {} -> {}", from, to);
        events.push(MonitorEvent::StatusChanged { from, to });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn live(speed_kmh: f32) -> Sample {
        Sample::Fresh(PlayerSnapshot {
            status: GameStatus::Live,
            session_type: SessionType::Race,
            speed_kmh,
            ..PlayerSnapshot::default()
        })
    }

    fn with_status(status: GameStatus) -> Sample {
        Sample::Fresh(PlayerSnapshot {
            status,
            ..PlayerSnapshot::default()
        })
    }

    fn started(events: &[MonitorEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, MonitorEvent::SessionStarted { .. }))
            .count()
    }

    fn ended(events: &[MonitorEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, MonitorEvent::SessionEnded { .. }))
            .count()
    }

    /// Drives the monitor into `Racing` and returns the time it got there
    fn race(monitor: &mut SessionStateMonitor, t0: Instant) -> Instant {
        let mut t = t0;
        for _ in 0..=30 {
            monitor.process(live(50.0), t);
            t += Duration::from_millis(100);
        }
        assert!(monitor.is_racing());
        t
    }

    #[test]
    fn test_monitor_creation() {
        let monitor = SessionStateMonitor::new(MonitorConfig::default());
        assert_eq!(monitor.state(), LifecycleState::Off);
        assert!(!monitor.is_racing());
    }

    #[test]
    fn test_status_flag_transitions_are_immediate() {
        let mut monitor = SessionStateMonitor::new(MonitorConfig::default());
        let t = Instant::now();

        let events = monitor.process(with_status(GameStatus::Off), t);
        assert_eq!(monitor.state(), LifecycleState::Menu);
        assert_eq!(
            events,
            vec![MonitorEvent::StatusChanged {
                from: LifecycleState::Off,
                to: LifecycleState::Menu,
            }]
        );

        monitor.process(with_status(GameStatus::Replay), t);
        assert_eq!(monitor.state(), LifecycleState::Replay);

        monitor.process(with_status(GameStatus::Pause), t);
        assert_eq!(monitor.state(), LifecycleState::Paused);

        monitor.process(live(0.0), t);
        assert_eq!(monitor.state(), LifecycleState::Waiting);

        // unchanged status emits nothing
        assert!(monitor.process(live(0.0), t).is_empty());
    }

    #[test]
    fn test_single_spike_does_not_start() {
        let mut monitor = SessionStateMonitor::new(MonitorConfig::default());
        let t0 = Instant::now();

        monitor.process(live(0.0), t0);
        monitor.process(live(120.0), t0 + Duration::from_millis(100));
        let events = monitor.process(live(0.0), t0 + Duration::from_millis(200));
        let events2 = monitor.process(live(0.0), t0 + Duration::from_secs(10));

        assert_eq!(started(&events) + started(&events2), 0);
        assert_eq!(monitor.state(), LifecycleState::Waiting);
    }

    #[test]
    fn test_debounce_boundary() {
        for (sustain_ms, expect_start) in [(2_900u64, false), (3_100u64, true)] {
            let mut monitor = SessionStateMonitor::new(MonitorConfig::default());
            let t0 = Instant::now();
            let mut starts = 0;

            let mut elapsed = 0;
            while elapsed <= sustain_ms {
                let events = monitor.process(live(25.0), t0 + Duration::from_millis(elapsed));
                starts += started(&events);
                elapsed += 100;
            }
            let events = monitor.process(live(0.0), t0 + Duration::from_millis(elapsed));
            starts += started(&events);

            assert_eq!(starts, expect_start as usize, "sustain {}ms", sustain_ms);
        }
    }

    #[test]
    fn test_stale_sample_resets_debounce() {
        let mut monitor = SessionStateMonitor::new(MonitorConfig::default());
        let t0 = Instant::now();

        for i in 0..20 {
            monitor.process(live(30.0), t0 + Duration::from_millis(i * 100));
        }
        monitor.process(Sample::Stale, t0 + Duration::from_millis(2_000));
        for i in 21..=35 {
            let events = monitor.process(live(30.0), t0 + Duration::from_millis(i * 100));
            assert_eq!(started(&events), 0);
        }
        assert_eq!(monitor.state(), LifecycleState::Waiting);
    }

    #[test]
    fn test_pause_keeps_session_running() {
        let mut monitor = SessionStateMonitor::new(MonitorConfig::default());
        let t = race(&mut monitor, Instant::now());

        let events = monitor.process(with_status(GameStatus::Pause), t);
        assert!(events.is_empty());
        assert!(monitor.is_racing());

        let events = monitor.process(live(0.0), t + Duration::from_secs(1));
        assert!(events.is_empty());
        assert!(monitor.is_racing());

        // a paused producer stops updating; that is not an exit
        monitor.process(with_status(GameStatus::Pause), t + Duration::from_secs(2));
        let events = monitor.process(Sample::Stale, t + Duration::from_secs(30));
        assert_eq!(ended(&events), 0);
        assert!(monitor.is_racing());
    }

    #[test]
    fn test_stale_pause_ends_after_paused_grace() {
        let mut monitor = SessionStateMonitor::new(MonitorConfig::default());
        let t = race(&mut monitor, Instant::now());
        monitor.process(with_status(GameStatus::Pause), t);

        let mut total_ended = 0;
        for secs in 1..=3_600u64 {
            let events = monitor.process(Sample::Stale, t + Duration::from_secs(secs));
            total_ended += ended(&events);
            if secs == 599 {
                assert!(monitor.is_racing());
            }
        }

        assert_eq!(total_ended, 1);
        assert_eq!(monitor.state(), LifecycleState::Off);
    }

    #[test]
    fn test_lap_clock_reset_restarts_session() {
        let mut monitor = SessionStateMonitor::new(MonitorConfig::default());
        let t0 = Instant::now();
        let clocked = |speed_kmh: f32, lap_ms: i32| {
            Sample::Fresh(PlayerSnapshot {
                status: GameStatus::Live,
                session_type: SessionType::Race,
                speed_kmh,
                current_lap_time_ms: lap_ms,
                ..PlayerSnapshot::default()
            })
        };

        let mut starts = 0;
        let mut t = t0;
        for i in 0..40 {
            starts += started(&monitor.process(clocked(80.0, 1_000 + i * 100), t));
            t += Duration::from_millis(100);
        }
        assert_eq!(starts, 1);

        // crossing the line at speed is not a restart
        assert!(monitor.process(clocked(150.0, 0), t).is_empty());
        assert!(monitor.process(clocked(150.0, 100), t).is_empty());
        assert!(monitor.is_racing());

        let events = monitor.process(clocked(0.0, 0), t + Duration::from_millis(100));
        assert_eq!(ended(&events), 1);
        assert_eq!(monitor.state(), LifecycleState::Waiting);

        t += Duration::from_millis(200);
        for i in 0..40 {
            starts += started(&monitor.process(clocked(80.0, i * 100), t));
            t += Duration::from_millis(100);
        }
        assert_eq!(starts, 2);
        assert!(monitor.is_racing());
    }

    #[test]
    fn test_menu_ends_session_with_duration() {
        let mut monitor = SessionStateMonitor::new(MonitorConfig::default());
        let t = race(&mut monitor, Instant::now());

        let events = monitor.process(with_status(GameStatus::Off), t + Duration::from_secs(60));
        assert_eq!(ended(&events), 1);
        assert_eq!(monitor.state(), LifecycleState::Menu);

        let duration = events
            .iter()
            .find_map(|e| match e {
                MonitorEvent::SessionEnded {
                    duration_seconds, ..
                } => Some(*duration_seconds),
                _ => None,
            })
            .unwrap();
        assert_approx_eq!(duration, 60.1, 1e-6);
    }

    #[test]
    fn test_stale_beyond_grace_ends_session() {
        let mut monitor = SessionStateMonitor::new(MonitorConfig::default());
        let t = race(&mut monitor, Instant::now());
        let last_fresh = t - Duration::from_millis(100);

        let events = monitor.process(Sample::Stale, last_fresh + Duration::from_millis(1_900));
        assert!(events.is_empty());
        assert!(monitor.is_racing());

        let events = monitor.process(Sample::Stale, last_fresh + Duration::from_millis(2_100));
        assert_eq!(ended(&events), 1);
        assert_eq!(monitor.state(), LifecycleState::Off);
    }

    #[test]
    fn test_unavailable_goes_off_and_recovers() {
        let mut monitor = SessionStateMonitor::new(MonitorConfig::default());
        let t = race(&mut monitor, Instant::now());

        let events = monitor.process(Sample::Unavailable, t);
        assert_eq!(ended(&events), 1);
        assert_eq!(monitor.state(), LifecycleState::Off);

        monitor.process(with_status(GameStatus::Off), t + Duration::from_secs(5));
        assert_eq!(monitor.state(), LifecycleState::Menu);
    }

    #[test]
    fn test_broadcast_context_substitutes_for_region() {
        let mut monitor = SessionStateMonitor::new(MonitorConfig::default());
        let t = race(&mut monitor, Instant::now());

        let session = SessionInfo {
            event_index: 0,
            session_index: 1,
            session_type: SessionType::Race,
            phase: SessionPhase::Session,
            session_time_ms: 0.0,
            remaining_time_ms: 0.0,
            focused_car_index: 0,
            active_camera_set: String::new(),
            active_camera: String::new(),
            hud_page: String::new(),
            replay: None,
            time_of_day: 0.0,
            weather: Default::default(),
            best_session_lap: Default::default(),
        };
        monitor.observe_session(&session, t);

        let events = monitor.process(Sample::Unavailable, t + Duration::from_millis(500));
        assert!(events.is_empty());
        assert!(monitor.is_racing());

        // broadcast context itself goes quiet
        let events = monitor.process(Sample::Unavailable, t + Duration::from_secs(5));
        assert_eq!(ended(&events), 1);
    }

    #[test]
    fn test_session_restart_ends_recording() {
        let mut monitor = SessionStateMonitor::new(MonitorConfig::default());
        let t = Instant::now();

        let mut session = SessionInfo {
            event_index: 0,
            session_index: 0,
            session_type: SessionType::Practice,
            phase: SessionPhase::Session,
            session_time_ms: 0.0,
            remaining_time_ms: 0.0,
            focused_car_index: 0,
            active_camera_set: String::new(),
            active_camera: String::new(),
            hud_page: String::new(),
            replay: None,
            time_of_day: 0.0,
            weather: Default::default(),
            best_session_lap: Default::default(),
        };
        monitor.observe_session(&session, t);
        let t = race(&mut monitor, t);

        assert!(monitor.observe_session(&session, t).is_empty());

        session.session_index = 1;
        let events = monitor.observe_session(&session, t);
        assert_eq!(ended(&events), 1);
        assert_eq!(monitor.state(), LifecycleState::Waiting);
    }

    #[test]
    fn test_session_type_falls_back_to_broadcast() {
        let mut monitor = SessionStateMonitor::new(MonitorConfig::default());
        let t0 = Instant::now();

        let session = SessionInfo {
            event_index: 0,
            session_index: 0,
            session_type: SessionType::Qualifying,
            phase: SessionPhase::Session,
            session_time_ms: 0.0,
            remaining_time_ms: 0.0,
            focused_car_index: 0,
            active_camera_set: String::new(),
            active_camera: String::new(),
            hud_page: String::new(),
            replay: None,
            time_of_day: 0.0,
            weather: Default::default(),
            best_session_lap: Default::default(),
        };
        monitor.observe_session(&session, t0);

        let mut session_type = None;
        for i in 0..=30 {
            let sample = Sample::Fresh(PlayerSnapshot {
                status: GameStatus::Live,
                session_type: SessionType::Unknown,
                speed_kmh: 80.0,
                ..PlayerSnapshot::default()
            });
            for event in monitor.process(sample, t0 + Duration::from_millis(i * 100)) {
                if let MonitorEvent::SessionStarted { session_type: s, .. } = event {
                    session_type = Some(s);
                }
            }
        }
        assert_eq!(session_type, Some(SessionType::Qualifying));
    }

    #[test]
    fn test_shutdown_ends_once() {
        let mut monitor = SessionStateMonitor::new(MonitorConfig::default());
        let t = race(&mut monitor, Instant::now());

        assert_eq!(ended(&monitor.shutdown(t)), 1);
        assert_eq!(monitor.state(), LifecycleState::Off);
        assert!(monitor.shutdown(t).is_empty());
    }
}
