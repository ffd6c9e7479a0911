//! Player telemetry from the simulator's shared-memory pages
//!
//! The simulator publishes several fixed-layout, 4-byte packed structures.
//! We read two of them: the physics page (car dynamics, updated every physics
//! step) and the graphics page (session status, laps, pit state). Only the
//! leading part of each page is copied; [`PHYSICS_PAGE_LEN`] and
//! [`GRAPHICS_PAGE_LEN`] cover every field parsed here.

use crate::error::PageTooShort;
use crate::types::{GameStatus, SessionType};
use serde::{Deserialize, Serialize};

pub const PHYSICS_PAGE_NAME: &str = "Local\\acpmf_physics";
pub const GRAPHICS_PAGE_NAME: &str = "Local\\acpmf_graphics";

/// Bytes of the physics page needed to parse a snapshot
pub const PHYSICS_PAGE_LEN: usize = 368;
/// Bytes of the graphics page needed to parse a snapshot
pub const GRAPHICS_PAGE_LEN: usize = 164;

mod physics {
    pub const PACKET_ID: usize = 0;
    pub const GAS: usize = 4;
    pub const BRAKE: usize = 8;
    pub const FUEL: usize = 12;
    pub const GEAR: usize = 16;
    pub const RPM: usize = 20;
    pub const STEER: usize = 24;
    pub const SPEED: usize = 28;
    pub const VELOCITY: usize = 32;
    pub const ACC_G: usize = 44;
    pub const WHEEL_PRESSURE: usize = 88;
    pub const TYRE_WEAR: usize = 120;
    pub const TYRE_CORE_TEMP: usize = 152;
    pub const BRAKE_TEMP: usize = 348;
    pub const CLUTCH: usize = 364;
}

mod graphics {
    pub const PACKET_ID: usize = 0;
    pub const STATUS: usize = 4;
    pub const SESSION: usize = 8;
    pub const COMPLETED_LAPS: usize = 132;
    pub const POSITION: usize = 136;
    pub const CURRENT_TIME: usize = 140;
    pub const SESSION_TIME_LEFT: usize = 152;
    pub const IS_IN_PIT: usize = 160;
}

/// Acceleration in g, split by the car's axes
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GForce {
    pub lateral: f32,
    pub longitudinal: f32,
    pub vertical: f32,
}

/// Per-wheel values in FL, FR, RL, RR order
pub type Wheels = [f32; 4];

/// One read of the player's car. Produced per poll, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// Physics step counter; unchanged between reads means the producer is idle
    pub packet_id: i32,
    pub status: GameStatus,
    pub session_type: SessionType,
    pub speed_kmh: f32,
    /// -1 reverse, 0 neutral, 1.. forward gears
    pub gear: i32,
    pub rpm: i32,
    pub throttle: f32,
    pub brake: f32,
    pub clutch: f32,
    pub steer: f32,
    pub fuel: f32,
    pub velocity: [f32; 3],
    pub g_force: GForce,
    pub tyre_core_temp: Wheels,
    pub tyre_pressure: Wheels,
    pub tyre_wear: Wheels,
    pub brake_temp: Wheels,
    pub completed_laps: i32,
    pub position: i32,
    pub current_lap_time_ms: i32,
    pub session_time_left: f32,
    pub is_in_pit: bool,
}

impl PlayerSnapshot {
    /// Parses copies of the physics and graphics pages
    pub fn parse(physics_page: &[u8], graphics_page: &[u8]) -> Result<Self, PageTooShort> {
        check_len("physics", physics_page, PHYSICS_PAGE_LEN)?;
        check_len("graphics", graphics_page, GRAPHICS_PAGE_LEN)?;

        let p = Page(physics_page);
        let g = Page(graphics_page);
        let acc = p.f32x3(physics::ACC_G);

        Ok(Self {
            packet_id: p.i32(physics::PACKET_ID),
            status: GameStatus::from_shared_memory(g.i32(graphics::STATUS)),
            session_type: SessionType::from_shared_memory(g.i32(graphics::SESSION)),
            speed_kmh: p.f32(physics::SPEED),
            gear: p.i32(physics::GEAR) - 1,
            rpm: p.i32(physics::RPM),
            throttle: p.f32(physics::GAS),
            brake: p.f32(physics::BRAKE),
            clutch: p.f32(physics::CLUTCH),
            steer: p.f32(physics::STEER),
            fuel: p.f32(physics::FUEL),
            velocity: p.f32x3(physics::VELOCITY),
            g_force: GForce {
                lateral: acc[0],
                vertical: acc[1],
                longitudinal: acc[2],
            },
            tyre_core_temp: p.wheels(physics::TYRE_CORE_TEMP),
            tyre_pressure: p.wheels(physics::WHEEL_PRESSURE),
            tyre_wear: p.wheels(physics::TYRE_WEAR),
            brake_temp: p.wheels(physics::BRAKE_TEMP),
            completed_laps: g.i32(graphics::COMPLETED_LAPS),
            position: g.i32(graphics::POSITION),
            current_lap_time_ms: g.i32(graphics::CURRENT_TIME),
            session_time_left: g.f32(graphics::SESSION_TIME_LEFT),
            is_in_pit: g.i32(graphics::IS_IN_PIT) != 0,
        })
    }

    /// Lays the snapshot back out as (physics, graphics) page bytes.
    /// Used to simulate the producer.
    pub fn to_pages(&self) -> (Vec<u8>, Vec<u8>) {
        let mut p = PageMut(vec![0u8; PHYSICS_PAGE_LEN]);
        p.i32(physics::PACKET_ID, self.packet_id);
        p.f32(physics::GAS, self.throttle);
        p.f32(physics::BRAKE, self.brake);
        p.f32(physics::FUEL, self.fuel);
        p.i32(physics::GEAR, self.gear + 1);
        p.i32(physics::RPM, self.rpm);
        p.f32(physics::STEER, self.steer);
        p.f32(physics::SPEED, self.speed_kmh);
        p.f32s(physics::VELOCITY, &self.velocity);
        p.f32s(
            physics::ACC_G,
            &[
                self.g_force.lateral,
                self.g_force.vertical,
                self.g_force.longitudinal,
            ],
        );
        p.f32s(physics::WHEEL_PRESSURE, &self.tyre_pressure);
        p.f32s(physics::TYRE_WEAR, &self.tyre_wear);
        p.f32s(physics::TYRE_CORE_TEMP, &self.tyre_core_temp);
        p.f32s(physics::BRAKE_TEMP, &self.brake_temp);
        p.f32(physics::CLUTCH, self.clutch);

        let mut g = PageMut(vec![0u8; GRAPHICS_PAGE_LEN]);
        g.i32(graphics::PACKET_ID, self.packet_id);
        g.i32(graphics::STATUS, self.status.to_shared_memory());
        g.i32(graphics::SESSION, self.session_type.to_shared_memory());
        g.i32(graphics::COMPLETED_LAPS, self.completed_laps);
        g.i32(graphics::POSITION, self.position);
        g.i32(graphics::CURRENT_TIME, self.current_lap_time_ms);
        g.f32(graphics::SESSION_TIME_LEFT, self.session_time_left);
        g.i32(graphics::IS_IN_PIT, self.is_in_pit as i32);

        (p.0, g.0)
    }
}

fn check_len(page: &'static str, bytes: &[u8], needed: usize) -> Result<(), PageTooShort> {
    if bytes.len() < needed {
        return Err(PageTooShort {
            page,
            len: bytes.len(),
            needed,
        });
    }
    Ok(())
}

/// Length-checked view; every offset used is below the page's minimum length
struct Page<'a>(&'a [u8]);

impl Page<'_> {
    fn word(&self, offset: usize) -> [u8; 4] {
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.0[offset..offset + 4]);
        out
    }

    fn i32(&self, offset: usize) -> i32 {
        i32::from_le_bytes(self.word(offset))
    }

    fn f32(&self, offset: usize) -> f32 {
        f32::from_le_bytes(self.word(offset))
    }

    fn f32x3(&self, offset: usize) -> [f32; 3] {
        [
            self.f32(offset),
            self.f32(offset + 4),
            self.f32(offset + 8),
        ]
    }

    fn wheels(&self, offset: usize) -> Wheels {
        [
            self.f32(offset),
            self.f32(offset + 4),
            self.f32(offset + 8),
            self.f32(offset + 12),
        ]
    }
}

struct PageMut(Vec<u8>);

impl PageMut {
    fn i32(&mut self, offset: usize, value: i32) {
        self.0[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn f32(&mut self, offset: usize, value: f32) {
        self.0[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn f32s(&mut self, offset: usize, values: &[f32]) {
        for (i, value) in values.iter().enumerate() {
            self.f32(offset + i * 4, *value);
        }
    }
}
