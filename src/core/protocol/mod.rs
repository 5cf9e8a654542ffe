//! Protocol state machines
//!
//! One module per device family. Each family implements the [`Protocol`]
//! capability set: a non-destructive login probe and a frame parser producing
//! canonical records plus the ack bytes the device expects back.

pub mod aquila;
mod cursor;
pub mod fm1200;
pub mod gt06;
pub mod intellitrac;
mod negotiator;
pub mod teltonika;

pub use aquila::Aquila;
pub use fm1200::Fm1200;
pub use gt06::Gt06;
pub use intellitrac::IntelliTrac;
pub use negotiator::Negotiator;
pub use teltonika::Teltonika;

use crate::core::error::GatewayError;
use crate::core::session::ProtocolSession;
use crate::core::status::{CanonicalStatusRecord, DeviceFamily, DeviceResponse};
use crate::core::stream::FrameReader;
use async_trait::async_trait;
use tokio::io::AsyncRead;

impl<R> std::fmt::Debug for dyn Protocol<R> + '_
where
    R: AsyncRead + Send + Unpin,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("family", &self.family())
            .finish()
    }
}

/// Result of a successful login probe
#[derive(Debug)]
pub struct Login {
    /// Exact number of buffered bytes the handshake consumed
    pub consumed: usize,
    /// Ack bytes to write back to the device (may be empty)
    pub ack: Vec<u8>,
    /// The now-initialized session
    pub session: ProtocolSession,
}

/// Result of parsing one telemetry frame
#[derive(Debug, Default)]
pub struct FrameOutcome {
    /// Canonical records decoded from the frame (a frame may carry several)
    pub records: Vec<CanonicalStatusRecord>,
    /// Command responses decoded from the frame
    pub responses: Vec<DeviceResponse>,
    /// Ack bytes to write back before reading the next frame
    pub ack: Option<Vec<u8>>,
}

/// Capability set implemented by every protocol family
#[async_trait]
pub trait Protocol<R>: Send + Sync
where
    R: AsyncRead + Send + Unpin,
{
    /// Family tag this state machine decodes
    fn family(&self) -> DeviceFamily;

    /// Try to recognize and parse a login handshake using lookahead only.
    ///
    /// `Ok(None)` means "not mine": the reader's buffer must be left exactly
    /// as it was so the negotiator can try the next candidate. `Ok(Some(_))`
    /// reports how many bytes the handshake consumed; the negotiator commits
    /// them afterwards.
    async fn probe_login(
        &self,
        reader: &mut FrameReader<R>,
    ) -> Result<Option<Login>, GatewayError>;

    /// Parse one frame from a bound connection.
    ///
    /// Called only after `probe_login` succeeded and its bytes were consumed.
    /// A checksum mismatch or malformed frame is fatal for the connection.
    async fn read_frame(
        &self,
        reader: &mut FrameReader<R>,
        session: &mut ProtocolSession,
    ) -> Result<FrameOutcome, GatewayError>;
}
