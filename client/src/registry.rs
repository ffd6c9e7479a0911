//! Car registry and standings derived from the broadcast stream
//!
//! This module owns everything the client learns about the field:
//! - Car identity (model, race number, team, drivers) from `EntryListCar`
//! - Live race state (position, laps, gap, lap times) from `RealtimeCarUpdate`
//! - Session and track metadata, replaced wholesale on every update
//!
//! The registry itself is plain synchronous state. The broadcast client wraps
//! it in a lock that only its receive task writes to; everyone else reads
//! through [`RegistryHandle`], which hands out copies.

use log::{debug, info};
use shared::{
    CarInfo, CarLocation, DriverInfo, LapInfo, RealtimeCarUpdate, SessionInfo, TrackData,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One car in the current connection
///
/// Identity fields come from the entry list; everything else is overwritten
/// by each realtime update. A car seen in a realtime update before its
/// details arrive is kept as a placeholder with `has_details == false`.
#[derive(Debug, Clone, PartialEq)]
pub struct CarEntry {
    /// Stable key for the lifetime of a connection
    pub car_index: u16,
    pub race_number: i32,
    pub car_model: u8,
    pub team_name: String,
    pub cup_category: u8,
    /// Roster in entry-list order
    pub drivers: Vec<DriverInfo>,
    /// Index into `drivers` of whoever is driving now
    pub active_driver_index: u16,
    /// 1-based rank, 0 until the first realtime update
    pub position: u16,
    pub laps: u16,
    /// Gap to the leader in milliseconds
    pub delta_ms: i32,
    pub best_lap: LapInfo,
    pub last_lap: LapInfo,
    pub current_lap: LapInfo,
    pub location: CarLocation,
    pub kmh: u16,
    /// False while only realtime data has been seen for this index
    pub has_details: bool,
}

impl CarEntry {
    /// Entry for a car whose details have not arrived yet
    pub fn placeholder(car_index: u16) -> Self {
        Self {
            car_index,
            race_number: 0,
            car_model: 0,
            team_name: String::new(),
            cup_category: 0,
            drivers: Vec::new(),
            active_driver_index: 0,
            position: 0,
            laps: 0,
            delta_ms: 0,
            best_lap: LapInfo::default(),
            last_lap: LapInfo::default(),
            current_lap: LapInfo::default(),
            location: CarLocation::None,
            kmh: 0,
            has_details: false,
        }
    }

    /// Overwrites identity fields, leaving live race state untouched
    fn apply_details(&mut self, info: CarInfo) {
        self.race_number = info.race_number;
        self.car_model = info.car_model;
        self.team_name = info.team_name;
        self.cup_category = info.cup_category;
        self.drivers = info.drivers;
        self.active_driver_index = info.current_driver_index as u16;
        self.has_details = true;
    }

    fn apply_update(&mut self, update: &RealtimeCarUpdate) {
        self.active_driver_index = update.driver_index;
        self.position = update.position;
        self.laps = update.laps;
        self.delta_ms = update.delta_ms;
        self.best_lap = update.best_session_lap.clone();
        self.last_lap = update.last_lap.clone();
        self.current_lap = update.current_lap.clone();
        self.location = update.location;
        self.kmh = update.kmh;
    }

    pub fn active_driver(&self) -> Option<&DriverInfo> {
        self.drivers.get(self.active_driver_index as usize)
    }

    /// Driver display names with the active driver first, the rest in roster order
    pub fn driver_names(&self) -> Vec<String> {
        let active = self.active_driver_index as usize;
        let mut names = Vec::with_capacity(self.drivers.len());

        if let Some(driver) = self.drivers.get(active) {
            names.push(driver.display_name());
        }
        names.extend(
            self.drivers
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != active)
                .map(|(_, driver)| driver.display_name()),
        );

        names
    }
}

/// All cars plus session and track metadata for one connection
#[derive(Debug, Default)]
pub struct CarRegistry {
    cars: HashMap<u16, CarEntry>,
    session: Option<SessionInfo>,
    track: Option<TrackData>,
}

impl CarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the set of known car indexes
    ///
    /// Cars missing from the new list have left the session and are removed.
    /// Listed cars are not created here; their `EntryListCar` details follow
    /// as separate datagrams. Returns how many cars were pruned.
    pub fn apply_entry_list(&mut self, car_indexes: &[u16]) -> usize {
        let before = self.cars.len();
        self.cars.retain(|index, _| car_indexes.contains(index));
        let pruned = before - self.cars.len();

        if pruned > 0 {
            info!("Entry list pruned {} cars", pruned);
        }
        pruned
    }

    /// Inserts or enriches the entry for `info.car_index`
    pub fn upsert_car_info(&mut self, info: CarInfo) {
        let car_index = info.car_index;
        let entry = self
            .cars
            .entry(car_index)
            .or_insert_with(|| CarEntry::placeholder(car_index));

        if !entry.has_details {
            debug!("Car {} details received (#{})", car_index, info.race_number);
        }
        entry.apply_details(info);
    }

    /// Applies live race state to a car, creating a placeholder if needed
    ///
    /// The most recently received update wins; no reordering is attempted.
    /// Returns false when the car's details are still unknown, which is the
    /// caller's cue to ask the peer for the entry list again.
    pub fn apply_realtime_car_update(&mut self, update: &RealtimeCarUpdate) -> bool {
        let entry = self
            .cars
            .entry(update.car_index)
            .or_insert_with(|| CarEntry::placeholder(update.car_index));

        entry.apply_update(update);
        entry.has_details
    }

    pub fn set_session(&mut self, session: SessionInfo) {
        self.session = Some(session);
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    pub fn set_track(&mut self, track: TrackData) {
        self.track = Some(track);
    }

    pub fn track(&self) -> Option<&TrackData> {
        self.track.as_ref()
    }

    pub fn get(&self, car_index: u16) -> Option<&CarEntry> {
        self.cars.get(&car_index)
    }

    pub fn len(&self) -> usize {
        self.cars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty()
    }

    /// Copies of all cars ordered by position, ties by car index
    ///
    /// Cars without a realtime update yet have position 0 and go last.
    pub fn standings(&self) -> Vec<CarEntry> {
        let mut cars: Vec<CarEntry> = self.cars.values().cloned().collect();
        cars.sort_by_key(|car| (car.position == 0, car.position, car.car_index));
        cars
    }

    /// Forgets every car along with session and track data
    pub fn clear(&mut self) {
        self.cars.clear();
        self.session = None;
        self.track = None;
    }
}

/// Read-only, clonable view of a client's registry
///
/// Every accessor takes the read lock briefly and returns owned copies, so
/// callers never hold a reference into state the receive task is updating.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    inner: Arc<RwLock<CarRegistry>>,
}

impl RegistryHandle {
    pub(crate) fn new(inner: Arc<RwLock<CarRegistry>>) -> Self {
        Self { inner }
    }

    pub async fn standings(&self) -> Vec<CarEntry> {
        self.inner.read().await.standings()
    }

    pub async fn car(&self, car_index: u16) -> Option<CarEntry> {
        self.inner.read().await.get(car_index).cloned()
    }

    pub async fn session_info(&self) -> Option<SessionInfo> {
        self.inner.read().await.session().cloned()
    }

    pub async fn track_data(&self) -> Option<TrackData> {
        self.inner.read().await.track().cloned()
    }

    pub async fn car_count(&self) -> usize {
        self.inner.read().await.len()
    }
}
