//! Encode/decode for the simulator's UDP broadcasting protocol
//!
//! Every datagram starts with a one-byte message tag followed by a payload of
//! little-endian fixed-width fields. Strings are a `u16` byte length followed
//! by UTF-8 bytes. Inbound and outbound tags overlap (tag 1 is both
//! `Register` and `RegistrationResult`), so each direction has its own
//! decoder.
//!
//! The codec is pure: no sockets, no state. Adding a message kind means adding
//! a variant, and the exhaustive `match` in `decode`/`encode` points at every
//! place that needs to learn about it.

use crate::error::DecodeError;
use crate::types::*;

/// Protocol revision sent in the registration request
pub const PROTOCOL_VERSION: u8 = 4;

const TAG_REGISTER: u8 = 1;
const TAG_UNREGISTER: u8 = 9;
const TAG_REQUEST_ENTRY_LIST: u8 = 10;
const TAG_REQUEST_TRACK_DATA: u8 = 11;

const TAG_REGISTRATION_RESULT: u8 = 1;
const TAG_REALTIME_UPDATE: u8 = 2;
const TAG_REALTIME_CAR_UPDATE: u8 = 3;
const TAG_ENTRY_LIST: u8 = 4;
const TAG_TRACK_DATA: u8 = 5;
const TAG_ENTRY_LIST_CAR: u8 = 6;
const TAG_BROADCASTING_EVENT: u8 = 7;

/// Messages this client sends to the peer
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Register {
        display_name: String,
        connection_password: String,
        command_password: String,
        update_interval_ms: i32,
    },
    Unregister {
        connection_id: i32,
    },
    RequestEntryList {
        connection_id: i32,
    },
    RequestTrackData {
        connection_id: i32,
    },
}

impl OutboundMessage {
    pub fn tag(&self) -> u8 {
        match self {
            OutboundMessage::Register { .. } => TAG_REGISTER,
            OutboundMessage::Unregister { .. } => TAG_UNREGISTER,
            OutboundMessage::RequestEntryList { .. } => TAG_REQUEST_ENTRY_LIST,
            OutboundMessage::RequestTrackData { .. } => TAG_REQUEST_TRACK_DATA,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new(self.tag());
        match self {
            OutboundMessage::Register {
                display_name,
                connection_password,
                command_password,
                update_interval_ms,
            } => {
                w.u8(PROTOCOL_VERSION);
                w.string(display_name);
                w.string(connection_password);
                w.i32(*update_interval_ms);
                w.string(command_password);
            }
            OutboundMessage::Unregister { connection_id }
            | OutboundMessage::RequestEntryList { connection_id }
            | OutboundMessage::RequestTrackData { connection_id } => {
                w.i32(*connection_id);
            }
        }
        w.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (&tag, _) = bytes.split_first().ok_or(DecodeError::Empty)?;
        let mut r = Reader::new(bytes);

        let message = match tag {
            TAG_REGISTER => {
                let _version = r.u8()?;
                let display_name = r.string()?;
                let connection_password = r.string()?;
                let update_interval_ms = r.i32()?;
                let command_password = r.string()?;
                OutboundMessage::Register {
                    display_name,
                    connection_password,
                    command_password,
                    update_interval_ms,
                }
            }
            TAG_UNREGISTER => OutboundMessage::Unregister {
                connection_id: r.i32()?,
            },
            TAG_REQUEST_ENTRY_LIST => OutboundMessage::RequestEntryList {
                connection_id: r.i32()?,
            },
            TAG_REQUEST_TRACK_DATA => OutboundMessage::RequestTrackData {
                connection_id: r.i32()?,
            },
            other => return Err(DecodeError::UnknownTag(other)),
        };

        Ok(message)
    }
}

/// Messages the peer sends to this client
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    RegistrationResult(RegistrationResult),
    RealtimeUpdate(SessionInfo),
    RealtimeCarUpdate(RealtimeCarUpdate),
    EntryList {
        connection_id: i32,
        car_indexes: Vec<u16>,
    },
    TrackData(TrackData),
    EntryListCar(CarInfo),
    BroadcastingEvent(BroadcastingEvent),
}

impl InboundMessage {
    pub fn tag(&self) -> u8 {
        match self {
            InboundMessage::RegistrationResult(_) => TAG_REGISTRATION_RESULT,
            InboundMessage::RealtimeUpdate(_) => TAG_REALTIME_UPDATE,
            InboundMessage::RealtimeCarUpdate(_) => TAG_REALTIME_CAR_UPDATE,
            InboundMessage::EntryList { .. } => TAG_ENTRY_LIST,
            InboundMessage::TrackData(_) => TAG_TRACK_DATA,
            InboundMessage::EntryListCar(_) => TAG_ENTRY_LIST_CAR,
            InboundMessage::BroadcastingEvent(_) => TAG_BROADCASTING_EVENT,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (&tag, _) = bytes.split_first().ok_or(DecodeError::Empty)?;
        let mut r = Reader::new(bytes);

        let message = match tag {
            TAG_REGISTRATION_RESULT => InboundMessage::RegistrationResult(RegistrationResult {
                connection_id: r.i32()?,
                success: r.bool()?,
                is_read_only: r.bool()?,
                error_message: r.string()?,
            }),
            TAG_REALTIME_UPDATE => InboundMessage::RealtimeUpdate(read_session_info(&mut r)?),
            TAG_REALTIME_CAR_UPDATE => {
                InboundMessage::RealtimeCarUpdate(read_realtime_car_update(&mut r)?)
            }
            TAG_ENTRY_LIST => {
                let connection_id = r.i32()?;
                let count = r.u16()?;
                let mut car_indexes = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    car_indexes.push(r.u16()?);
                }
                InboundMessage::EntryList {
                    connection_id,
                    car_indexes,
                }
            }
            TAG_TRACK_DATA => InboundMessage::TrackData(read_track_data(&mut r)?),
            TAG_ENTRY_LIST_CAR => InboundMessage::EntryListCar(read_car_info(&mut r)?),
            TAG_BROADCASTING_EVENT => InboundMessage::BroadcastingEvent(BroadcastingEvent {
                kind: BroadcastingEventType::from_wire(r.u8()?),
                message: r.string()?,
                time_ms: r.i32()?,
                car_index: r.i32()?,
            }),
            other => return Err(DecodeError::UnknownTag(other)),
        };

        Ok(message)
    }

    /// Peer-side encoding. Used to simulate the peer and to replay captures.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new(self.tag());
        match self {
            InboundMessage::RegistrationResult(result) => {
                w.i32(result.connection_id);
                w.bool(result.success);
                w.bool(result.is_read_only);
                w.string(&result.error_message);
            }
            InboundMessage::RealtimeUpdate(info) => write_session_info(&mut w, info),
            InboundMessage::RealtimeCarUpdate(update) => write_realtime_car_update(&mut w, update),
            InboundMessage::EntryList {
                connection_id,
                car_indexes,
            } => {
                w.i32(*connection_id);
                let count = car_indexes.len().min(u16::MAX as usize);
                w.u16(count as u16);
                for index in car_indexes.iter().take(count) {
                    w.u16(*index);
                }
            }
            InboundMessage::TrackData(track) => write_track_data(&mut w, track),
            InboundMessage::EntryListCar(car) => write_car_info(&mut w, car),
            InboundMessage::BroadcastingEvent(event) => {
                w.u8(event.kind.to_wire());
                w.string(&event.message);
                w.i32(event.time_ms);
                w.i32(event.car_index);
            }
        }
        w.finish()
    }
}

fn read_lap(r: &mut Reader) -> Result<LapInfo, DecodeError> {
    let lap_time_ms = optional_time(r.i32()?);
    let car_index = r.u16()?;
    let driver_index = r.u16()?;
    let split_count = r.u8()?;
    let mut splits = Vec::with_capacity(split_count as usize);
    for _ in 0..split_count {
        splits.push(optional_time(r.i32()?));
    }

    Ok(LapInfo {
        lap_time_ms,
        car_index,
        driver_index,
        splits,
        is_invalid: r.bool()?,
        is_valid_for_best: r.bool()?,
        is_out_lap: r.bool()?,
        is_in_lap: r.bool()?,
    })
}

fn write_lap(w: &mut Writer, lap: &LapInfo) {
    w.i32(lap.lap_time_ms.unwrap_or(NO_TIME));
    w.u16(lap.car_index);
    w.u16(lap.driver_index);
    let count = w.count(lap.splits.len());
    for split in lap.splits.iter().take(count) {
        w.i32(split.unwrap_or(NO_TIME));
    }
    w.bool(lap.is_invalid);
    w.bool(lap.is_valid_for_best);
    w.bool(lap.is_out_lap);
    w.bool(lap.is_in_lap);
}

fn optional_time(raw: i32) -> Option<i32> {
    (raw != NO_TIME).then_some(raw)
}

fn read_session_info(r: &mut Reader) -> Result<SessionInfo, DecodeError> {
    let event_index = r.u16()?;
    let session_index = r.u16()?;
    let session_type = SessionType::from_wire(r.u8()?);
    let phase = SessionPhase::from_wire(r.u8()?);
    let session_time_ms = r.f32()?;
    let remaining_time_ms = r.f32()?;
    let focused_car_index = r.i32()?;
    let active_camera_set = r.string()?;
    let active_camera = r.string()?;
    let hud_page = r.string()?;

    let replay = if r.bool()? {
        Some(ReplayInfo {
            session_time: r.f32()?,
            remaining_time: r.f32()?,
        })
    } else {
        None
    };

    let time_of_day = r.f32()?;
    let weather = Weather {
        ambient_temp: r.u8()?,
        track_temp: r.u8()?,
        cloud_cover: r.u8()? as f32 / 10.0,
        rain_level: r.u8()? as f32 / 10.0,
        wetness: r.u8()? as f32 / 10.0,
    };
    let best_session_lap = read_lap(r)?;

    Ok(SessionInfo {
        event_index,
        session_index,
        session_type,
        phase,
        session_time_ms,
        remaining_time_ms,
        focused_car_index,
        active_camera_set,
        active_camera,
        hud_page,
        replay,
        time_of_day,
        weather,
        best_session_lap,
    })
}

fn write_session_info(w: &mut Writer, info: &SessionInfo) {
    w.u16(info.event_index);
    w.u16(info.session_index);
    w.u8(info.session_type.to_wire());
    w.u8(info.phase.to_wire());
    w.f32(info.session_time_ms);
    w.f32(info.remaining_time_ms);
    w.i32(info.focused_car_index);
    w.string(&info.active_camera_set);
    w.string(&info.active_camera);
    w.string(&info.hud_page);
    match info.replay {
        Some(replay) => {
            w.bool(true);
            w.f32(replay.session_time);
            w.f32(replay.remaining_time);
        }
        None => w.bool(false),
    }
    w.f32(info.time_of_day);
    w.u8(info.weather.ambient_temp);
    w.u8(info.weather.track_temp);
    w.tenths(info.weather.cloud_cover);
    w.tenths(info.weather.rain_level);
    w.tenths(info.weather.wetness);
    write_lap(w, &info.best_session_lap);
}

fn read_realtime_car_update(r: &mut Reader) -> Result<RealtimeCarUpdate, DecodeError> {
    Ok(RealtimeCarUpdate {
        car_index: r.u16()?,
        driver_index: r.u16()?,
        driver_count: r.u8()?,
        gear: (r.u8()? as i16 - 2) as i8,
        world_pos_x: r.f32()?,
        world_pos_y: r.f32()?,
        yaw: r.f32()?,
        location: CarLocation::from_wire(r.u8()?),
        kmh: r.u16()?,
        position: r.u16()?,
        cup_position: r.u16()?,
        track_position: r.u16()?,
        spline_position: r.f32()?,
        laps: r.u16()?,
        delta_ms: r.i32()?,
        best_session_lap: read_lap(r)?,
        last_lap: read_lap(r)?,
        current_lap: read_lap(r)?,
    })
}

fn write_realtime_car_update(w: &mut Writer, update: &RealtimeCarUpdate) {
    w.u16(update.car_index);
    w.u16(update.driver_index);
    w.u8(update.driver_count);
    w.u8((update.gear as i16 + 2) as u8);
    w.f32(update.world_pos_x);
    w.f32(update.world_pos_y);
    w.f32(update.yaw);
    w.u8(update.location.to_wire());
    w.u16(update.kmh);
    w.u16(update.position);
    w.u16(update.cup_position);
    w.u16(update.track_position);
    w.f32(update.spline_position);
    w.u16(update.laps);
    w.i32(update.delta_ms);
    write_lap(w, &update.best_session_lap);
    write_lap(w, &update.last_lap);
    write_lap(w, &update.current_lap);
}

fn read_track_data(r: &mut Reader) -> Result<TrackData, DecodeError> {
    let connection_id = r.i32()?;
    let track_name = r.string()?;
    let track_id = r.i32()?;
    let length_meters = r.i32()?;

    let set_count = r.u8()?;
    let mut camera_sets = Vec::with_capacity(set_count as usize);
    for _ in 0..set_count {
        let name = r.string()?;
        let camera_count = r.u8()?;
        let mut cameras = Vec::with_capacity(camera_count as usize);
        for _ in 0..camera_count {
            cameras.push(r.string()?);
        }
        camera_sets.push(CameraSet { name, cameras });
    }

    let page_count = r.u8()?;
    let mut hud_pages = Vec::with_capacity(page_count as usize);
    for _ in 0..page_count {
        hud_pages.push(r.string()?);
    }

    Ok(TrackData {
        connection_id,
        track_name,
        track_id,
        length_meters,
        camera_sets,
        hud_pages,
    })
}

fn write_track_data(w: &mut Writer, track: &TrackData) {
    w.i32(track.connection_id);
    w.string(&track.track_name);
    w.i32(track.track_id);
    w.i32(track.length_meters);

    let set_count = w.count(track.camera_sets.len());
    for set in track.camera_sets.iter().take(set_count) {
        w.string(&set.name);
        let camera_count = w.count(set.cameras.len());
        for camera in set.cameras.iter().take(camera_count) {
            w.string(camera);
        }
    }

    let page_count = w.count(track.hud_pages.len());
    for page in track.hud_pages.iter().take(page_count) {
        w.string(page);
    }
}

fn read_car_info(r: &mut Reader) -> Result<CarInfo, DecodeError> {
    let car_index = r.u16()?;
    let car_model = r.u8()?;
    let team_name = r.string()?;
    let race_number = r.i32()?;
    let cup_category = r.u8()?;
    let current_driver_index = r.u8()?;
    let nationality = r.u16()?;

    let driver_count = r.u8()?;
    let mut drivers = Vec::with_capacity(driver_count as usize);
    for _ in 0..driver_count {
        drivers.push(DriverInfo {
            first_name: r.string()?,
            last_name: r.string()?,
            short_name: r.string()?,
            category: r.u8()?,
            nationality: r.u16()?,
        });
    }

    Ok(CarInfo {
        car_index,
        car_model,
        team_name,
        race_number,
        cup_category,
        current_driver_index,
        nationality,
        drivers,
    })
}

fn write_car_info(w: &mut Writer, car: &CarInfo) {
    w.u16(car.car_index);
    w.u8(car.car_model);
    w.string(&car.team_name);
    w.i32(car.race_number);
    w.u8(car.cup_category);
    w.u8(car.current_driver_index);
    w.u16(car.nationality);

    let count = w.count(car.drivers.len());
    for driver in car.drivers.iter().take(count) {
        w.string(&driver.first_name);
        w.string(&driver.last_name);
        w.string(&driver.short_name);
        w.u8(driver.category);
        w.u16(driver.nationality);
    }
}

/// Cursor over a datagram. Offsets in errors count from the tag byte.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    tag: u8,
}

impl<'a> Reader<'a> {
    /// Positions the cursor just past the tag byte. `bytes` must be non-empty.
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 1,
            tag: bytes[0],
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.bytes.len().saturating_sub(self.pos);
        if available < len {
            return Err(DecodeError::Truncated {
                tag: self.tag,
                offset: self.pos,
                needed: len - available,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.u8()? != 0)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.u16()? as usize;
        let offset = self.pos;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidString {
            tag: self.tag,
            offset,
        })
    }
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new(tag: u8) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.push(tag);
        Self { buf }
    }

    fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    fn u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn f32(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// 0.0-1.0 fraction carried as a byte of tenths
    fn tenths(&mut self, value: f32) {
        self.u8((value * 10.0).round().clamp(0.0, 255.0) as u8);
    }

    /// Writes a u8 element count, clamped, and returns how many to write
    fn count(&mut self, len: usize) -> usize {
        let count = len.min(u8::MAX as usize);
        self.u8(count as u8);
        count
    }

    fn string(&mut self, value: &str) {
        let mut len = value.len().min(u16::MAX as usize);
        while !value.is_char_boundary(len) {
            len -= 1;
        }
        self.u16(len as u16);
        self.buf.extend_from_slice(&value.as_bytes()[..len]);
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}
