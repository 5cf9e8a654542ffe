//! # Avlgate Core Library
//!
//! A TCP ingestion gateway for AVL (automatic vehicle location) trackers.
//! One listener accepts devices speaking any of several wire protocols:
//! - Teltonika Codec8 (1-byte and FM1200 4-byte framing variants)
//! - GT06 family (Wanway, Concox, TR06)
//! - IntelliTrac A-series (dual binary/ASCII)
//! - Aquila OBD (ASCII CSV)
//!
//! ## Features
//!
//! - Non-destructive login negotiation from the first bytes of a stream
//! - Bit-exact frame decoding with per-family checksum validation
//! - A canonical status record every family maps into
//! - Per-connection worker + bounded dispatch queue with backpressure
//! - Pluggable storage behind the `DeviceStore` trait (JSONL bundled)
//!
//! ## Example
//!
//! ```rust,no_run
//! use avlgate_core::core::{
//!     DeviceFamily, FileStore, GatewayServer, Negotiator, WorkerSettings,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(FileStore::open("data", None).await?);
//!     let negotiator = Negotiator::with_families(
//!         &[DeviceFamily::Teltonika, DeviceFamily::Gt06],
//!         true,
//!     );
//!     let settings = WorkerSettings { queue_capacity: 256, verify_devices: false };
//!
//!     let server = GatewayServer::new(negotiator, store, settings);
//!     server.serve("0.0.0.0:5027".parse()?).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::config::GatewayConfig;
pub use crate::core::{
    CanonicalStatusRecord, DeviceFamily, DeviceResponse, DeviceStore, FileStore, GatewayError,
    GatewayServer, Negotiator, ProtocolSession, StoreError, WorkerSettings,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
