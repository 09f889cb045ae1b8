//! Nearby-aircraft poller and daily sighting tracker.
//!
//! This library provides functionality to:
//! - Poll the OpenSky state-vector API for aircraft around a reference point
//! - Rank them by great-circle distance and derive route labels
//! - Resolve per-aircraft metadata lazily in the background
//! - Keep a deduplicated daily count and a capped first-sighting history
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │   Client    │───▶│  Protocol   │───▶│     Geo     │
//! │ (Transport) │    │  (Decoder)  │    │ (Box/Dist.) │
//! └─────────────┘    └─────────────┘    └─────────────┘
//!   ▲        ▲                                 │
//!   │  ┌─────┴──────┐                          ▼
//!   │  │  Metadata  │◀──────────────────┌─────────────┐    ┌─────────────┐
//!   │  │  (Cache)   │                   │  Collector  │───▶│    Stats    │
//!   │  └────────────┘                   │  (Poller)   │    │ (Dedup/Hist)│
//!   │  ┌────────────┐                   └─────────────┘    └─────────────┘
//!   └──│    Auth    │◀─────────────────────────┘                  │
//!      │  (Tokens)  │                                             ▼
//!      └────────────┘                                      ┌─────────────┐
//!                                                          │   Storage   │
//!                                                          │ (Key/Value) │
//!                                                          └─────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use overhead::{
//!     collector::PollerBuilder,
//!     config::AuthSettings,
//!     geo::Coordinates,
//!     location::FixedLocation,
//!     storage::FileStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let location = FixedLocation::new(Some(Coordinates::new(41.387, 2.170)), None);
//!
//!     let poller = Arc::new(
//!         PollerBuilder::new()
//!             .store(Arc::new(FileStore::open("state.json")?))
//!             .location(Arc::new(location))
//!             .auth(AuthSettings::from_parts(None, None, Some("id".into()), Some("secret".into())))
//!             .build()?,
//!     );
//!
//!     let handle = Arc::clone(&poller).spawn();
//!     let mut snapshots = handle.snapshot();
//!
//!     while snapshots.changed().await.is_ok() {
//!         for aircraft in &snapshots.borrow().aircraft {
//!             println!("{}", aircraft);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod clock;
pub mod collector;
pub mod config;
pub mod geo;
pub mod location;
pub mod metadata;
pub mod protocol;
pub mod route;
pub mod stats;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{Authenticator, TokenManager};
pub use client::{ApiClient, ReqwestTransport, Transport};
pub use collector::{Poller, PollerBuilder, PollerHandle, Snapshot};
pub use config::{AuthSettings, PollerConfig};
pub use geo::{haversine_km, BoundingBox, Coordinates};
pub use location::{FixedLocation, LocationProvider};
pub use metadata::MetadataCache;
pub use protocol::parse_states;
pub use route::resolve_route;
pub use stats::StatsTracker;
pub use storage::{FileStore, KeyValueStore, MemoryStore, StateStore};
pub use types::{Aircraft, AircraftMetadata, AircraftState, SightingHistoryEntry};
