//! Core module containing the gateway engine
//!
//! This module provides:
//! - Checksum algorithms shared by the protocol families
//! - Buffered stream reading with non-destructive lookahead
//! - Per-protocol state machines and the login negotiator
//! - The canonical status model every family maps into
//! - Per-connection worker and dispatch sink
//! - The storage backend contract and the JSONL file backend
//! - The TCP listener

pub mod checksum;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod sink;
pub mod status;
pub mod store;
pub mod stream;
pub mod worker;

pub use error::{GatewayError, StoreError};
pub use protocol::{FrameOutcome, Login, Negotiator, Protocol};
pub use server::GatewayServer;
pub use session::ProtocolSession;
pub use sink::{DispatchSink, SinkItem, SinkStats};
pub use status::{
    CanonicalStatusRecord, DeviceFamily, DeviceResponse, GpsPosition, RawPayload, VehicleStatus,
};
pub use store::{DeviceStore, FileStore};
pub use stream::FrameReader;
pub use worker::{run_connection, WorkerSettings};
