//! Reader for the simulator's shared-memory telemetry pages
//!
//! The simulator publishes its pages as named file mappings that exist only
//! while it runs. A missing region is the normal state whenever the game is
//! closed, so callers get `SharedRegionUnavailable` and simply try again later.
//!
//! The reader is not self-scheduled: whoever owns the poll loop calls
//! [`SharedStateReader::read`] at its own rate.

use crate::error::ReaderError;
use log::{debug, info};
use shared::snapshot::{GRAPHICS_PAGE_LEN, PHYSICS_PAGE_LEN};
use shared::PlayerSnapshot;
use std::sync::{Arc, Mutex, PoisonError};

/// Source of raw page bytes
pub trait SharedRegion: Send {
    /// Opens the region; fails if the producer has not created it
    fn open(&mut self) -> Result<(), ReaderError>;

    /// Copies the leading bytes of both pages into the given buffers
    fn copy_pages(&self, physics: &mut [u8], graphics: &mut [u8]) -> Result<(), ReaderError>;

    fn close(&mut self);
}

/// Result of one poll
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Fresh(PlayerSnapshot),
    /// The physics packet counter has not moved since the previous read
    Stale,
}

pub struct SharedStateReader {
    region: Box<dyn SharedRegion>,
    connected: bool,
    last_packet_id: Option<i32>,
    physics: Vec<u8>,
    graphics: Vec<u8>,
}

impl SharedStateReader {
    pub fn new(region: Box<dyn SharedRegion>) -> Self {
        Self {
            region,
            connected: false,
            last_packet_id: None,
            physics: vec![0u8; PHYSICS_PAGE_LEN],
            graphics: vec![0u8; GRAPHICS_PAGE_LEN],
        }
    }

    /// Reader over the platform's real mapping
    pub fn platform() -> Self {
        Self::new(Box::new(platform_region()))
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn connect(&mut self) -> Result<(), ReaderError> {
        if self.connected {
            return Ok(());
        }

        self.region.open()?;
        self.connected = true;
        self.last_packet_id = None;
        info!("Shared memory region opened");
        Ok(())
    }

    /// Takes one snapshot
    ///
    /// A region that disappears mid-session disconnects the reader, so the
    /// next poll has to `connect` again.
    pub fn read(&mut self) -> Result<ReadOutcome, ReaderError> {
        if !self.connected {
            return Err(ReaderError::SharedRegionUnavailable(
                "reader not connected".to_string(),
            ));
        }

        if let Err(e) = self.region.copy_pages(&mut self.physics, &mut self.graphics) {
            debug!("Shared memory read failed: {}", e);
            self.disconnect();
            return Err(e);
        }

        let snapshot = PlayerSnapshot::parse(&self.physics, &self.graphics)?;
        if self.last_packet_id == Some(snapshot.packet_id) {
            return Ok(ReadOutcome::Stale);
        }

        self.last_packet_id = Some(snapshot.packet_id);
        Ok(ReadOutcome::Fresh(snapshot))
    }

    pub fn disconnect(&mut self) {
        if self.connected {
            self.region.close();
            self.connected = false;
            info!("Shared memory region closed");
        }
    }
}

/// In-process region for simulating the producer
///
/// Clones share the same pages: publish through one handle, read through the
/// reader that owns another. A region with no published pages behaves like a
/// simulator that is not running.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegion {
    pages: Arc<Mutex<Option<(Vec<u8>, Vec<u8>)>>>,
}

impl MemoryRegion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: &PlayerSnapshot) {
        let pages = snapshot.to_pages();
        *self.pages.lock().unwrap_or_else(PoisonError::into_inner) = Some(pages);
    }

    /// Simulates the producer exiting
    pub fn remove(&self) {
        *self.pages.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_present(&self) -> bool {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

fn missing() -> ReaderError {
    ReaderError::SharedRegionUnavailable("no producer has published the pages".to_string())
}

impl SharedRegion for MemoryRegion {
    fn open(&mut self) -> Result<(), ReaderError> {
        if self.is_present() {
            Ok(())
        } else {
            Err(missing())
        }
    }

    fn copy_pages(&self, physics: &mut [u8], graphics: &mut [u8]) -> Result<(), ReaderError> {
        let guard = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        let (physics_page, graphics_page) = guard.as_ref().ok_or_else(missing)?;

        let n = physics.len().min(physics_page.len());
        physics[..n].copy_from_slice(&physics_page[..n]);
        let n = graphics.len().min(graphics_page.len());
        graphics[..n].copy_from_slice(&graphics_page[..n]);
        Ok(())
    }

    fn close(&mut self) {}
}

#[cfg(windows)]
pub use mapped::MappedRegion;

#[cfg(windows)]
fn platform_region() -> MappedRegion {
    MappedRegion::new()
}

/// Only Windows builds of the simulator publish the region
#[cfg(not(windows))]
#[derive(Debug, Default)]
pub struct UnsupportedRegion;

#[cfg(not(windows))]
impl SharedRegion for UnsupportedRegion {
    fn open(&mut self) -> Result<(), ReaderError> {
        Err(ReaderError::SharedRegionUnavailable(
            "shared memory is only published on Windows".to_string(),
        ))
    }

    fn copy_pages(&self, _physics: &mut [u8], _graphics: &mut [u8]) -> Result<(), ReaderError> {
        Err(ReaderError::SharedRegionUnavailable(
            "shared memory is only published on Windows".to_string(),
        ))
    }

    fn close(&mut self) {}
}

#[cfg(not(windows))]
fn platform_region() -> UnsupportedRegion {
    UnsupportedRegion
}

#[cfg(windows)]
mod mapped {
    use super::SharedRegion;
    use crate::error::ReaderError;
    use shared::snapshot::{GRAPHICS_PAGE_NAME, PHYSICS_PAGE_NAME};
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{CloseHandle, BOOL, HANDLE};
    use windows::Win32::System::Memory::{
        MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, FILE_MAP_READ,
        MEMORY_MAPPED_VIEW_ADDRESS,
    };

    struct View {
        handle: HANDLE,
        address: MEMORY_MAPPED_VIEW_ADDRESS,
    }

    impl View {
        fn open(name: &str) -> Result<Self, ReaderError> {
            let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();

            let handle = unsafe {
                OpenFileMappingW(FILE_MAP_READ.0, BOOL::from(false), PCWSTR(wide.as_ptr()))
            }
            .map_err(|e| {
                ReaderError::SharedRegionUnavailable(format!("{} not found: {}", name, e))
            })?;

            let address = unsafe { MapViewOfFile(handle, FILE_MAP_READ, 0, 0, 0) };
            if address.Value.is_null() {
                unsafe {
                    let _ = CloseHandle(handle);
                }
                return Err(ReaderError::SharedRegionUnavailable(format!(
                    "{} could not be mapped",
                    name
                )));
            }

            Ok(Self { handle, address })
        }

        fn copy_into(&self, buf: &mut [u8]) {
            // The published structures are larger than any prefix we read
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.address.Value as *const u8,
                    buf.as_mut_ptr(),
                    buf.len(),
                );
            }
        }
    }

    impl Drop for View {
        fn drop(&mut self) {
            unsafe {
                let _ = UnmapViewOfFile(self.address);
                let _ = CloseHandle(self.handle);
            }
        }
    }

    /// Read-only view of the simulator's physics and graphics mappings
    #[derive(Default)]
    pub struct MappedRegion {
        views: Option<(View, View)>,
    }

    // The views are read-only and owned by exactly one reader
    unsafe impl Send for MappedRegion {}

    impl MappedRegion {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl SharedRegion for MappedRegion {
        fn open(&mut self) -> Result<(), ReaderError> {
            let physics = View::open(PHYSICS_PAGE_NAME)?;
            let graphics = View::open(GRAPHICS_PAGE_NAME)?;
            self.views = Some((physics, graphics));
            Ok(())
        }

        fn copy_pages(
            &self,
            physics: &mut [u8],
            graphics: &mut [u8],
        ) -> Result<(), ReaderError> {
            let (physics_view, graphics_view) = self.views.as_ref().ok_or_else(|| {
                ReaderError::SharedRegionUnavailable("region not open".to_string())
            })?;
            physics_view.copy_into(physics);
            graphics_view.copy_into(graphics);
            Ok(())
        }

        fn close(&mut self) {
            self.views = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::GameStatus;

    fn snapshot(packet_id: i32, speed_kmh: f32) -> PlayerSnapshot {
        PlayerSnapshot {
            packet_id,
            status: GameStatus::Live,
            speed_kmh,
            ..PlayerSnapshot::default()
        }
    }

    #[test]
    fn test_connect_fails_without_producer() {
        let region = MemoryRegion::new();
        let mut reader = SharedStateReader::new(Box::new(region));

        assert!(matches!(
            reader.connect(),
            Err(ReaderError::SharedRegionUnavailable(_))
        ));
        assert!(!reader.is_connected());
        assert!(reader.read().is_err());
    }

    #[test]
    fn test_fresh_then_stale() {
        let region = MemoryRegion::new();
        region.publish(&snapshot(1, 50.0));

        let mut reader = SharedStateReader::new(Box::new(region.clone()));
        reader.connect().unwrap();

        match reader.read().unwrap() {
            ReadOutcome::Fresh(s) => assert_eq!(s.speed_kmh, 50.0),
            ReadOutcome::Stale => panic!("First read should be fresh"),
        }
        assert_eq!(reader.read().unwrap(), ReadOutcome::Stale);

        region.publish(&snapshot(2, 51.0));
        assert!(matches!(reader.read().unwrap(), ReadOutcome::Fresh(_)));
    }

    #[test]
    fn test_producer_exit_disconnects() {
        let region = MemoryRegion::new();
        region.publish(&snapshot(1, 0.0));

        let mut reader = SharedStateReader::new(Box::new(region.clone()));
        reader.connect().unwrap();
        region.remove();

        assert!(matches!(
            reader.read(),
            Err(ReaderError::SharedRegionUnavailable(_))
        ));
        assert!(!reader.is_connected());

        region.publish(&snapshot(5, 0.0));
        reader.connect().unwrap();
        assert!(matches!(reader.read().unwrap(), ReadOutcome::Fresh(_)));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_platform_region_unavailable() {
        let mut reader = SharedStateReader::platform();
        assert!(reader.connect().is_err());
    }
}
