//! # Broadcast Client Library
//!
//! Client side of the two channels the simulator exposes telemetry on.
//!
//! ## Broadcasting protocol (`network`, `registry`)
//! [`BroadcastClient`] registers against the simulator's UDP broadcasting
//! interface, runs a receive task that decodes every datagram, and keeps a
//! registry of every car in the session:
//! - Registration handshake with bounded wait and typed failures
//! - Entry list, car details and realtime updates folded into [`CarRegistry`]
//! - Standings ordered by position, ties broken by car index
//! - Watchdog that reports a silent peer without dropping the connection
//! - Typed [`ClientEvent`]s on a broadcast channel for any number of subscribers
//!
//! ## Shared memory (`shared_memory`)
//! [`SharedStateReader`] copies the local player's physics and graphics pages
//! and turns them into [`shared::PlayerSnapshot`]s, reporting `Stale` when the
//! producer has stopped advancing its packet counter.
//!
//! ## Usage
//!
//! ```no_run
//! use client::{BroadcastClient, ConnectionConfig};
//!
//! # async fn run() -> Result<(), client::ClientError> {
//! let mut client = BroadcastClient::new(ConnectionConfig::default());
//! client.connect().await?;
//!
//! for car in client.standings().await {
//!     println!("P{} #{} {}", car.position, car.race_number, car.team_name);
//! }
//!
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod network;
pub mod registry;
pub mod shared_memory;

pub use config::ConnectionConfig;
pub use error::{ClientError, ReaderError};
pub use network::{BroadcastClient, ClientEvent, ConnectionState};
pub use registry::{CarEntry, CarRegistry, RegistryHandle};
pub use shared_memory::{MemoryRegion, ReadOutcome, SharedRegion, SharedStateReader};
