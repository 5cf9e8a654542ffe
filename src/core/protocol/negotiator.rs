//! First-bytes protocol negotiation
//!
//! Candidates are probed in configured order against a peeked window of the
//! stream; the first probe that recognises a login wins and its handshake
//! bytes are consumed. Probes never consume, so a declined candidate leaves
//! the stream exactly as it found it.

use crate::core::error::GatewayError;
use crate::core::protocol::{Aquila, Fm1200, Gt06, IntelliTrac, Login, Protocol, Teltonika};
use crate::core::status::DeviceFamily;
use crate::core::stream::FrameReader;
use tokio::io::AsyncRead;
use tracing::debug;

/// Ordered set of protocol candidates for one listener
pub struct Negotiator<R> {
    candidates: Vec<Box<dyn Protocol<R>>>,
}

impl<R> Negotiator<R>
where
    R: AsyncRead + Send + Unpin,
{
    /// Build from an explicit candidate list
    pub fn new(candidates: Vec<Box<dyn Protocol<R>>>) -> Self {
        Self { candidates }
    }

    /// Build from an ordered family list. Order matters: Teltonika and
    /// FM1200 share a handshake, so whichever is listed first claims it.
    pub fn with_families(families: &[DeviceFamily], gt06_strict_crc: bool) -> Self {
        let candidates = families
            .iter()
            .map(|family| -> Box<dyn Protocol<R>> {
                match family {
                    DeviceFamily::Teltonika => Box::new(Teltonika::new()),
                    DeviceFamily::Fm1200 => Box::new(Fm1200::new()),
                    DeviceFamily::Gt06 => Box::new(Gt06::new(gt06_strict_crc)),
                    DeviceFamily::IntelliTrac => Box::new(IntelliTrac::new()),
                    DeviceFamily::Aquila => Box::new(Aquila::new()),
                }
            })
            .collect();
        Self { candidates }
    }

    /// Number of configured candidates
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// True when no candidate is configured
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Probe candidates in order and bind the first match, consuming its
    /// handshake bytes. No match is `UnknownProtocol`.
    pub async fn negotiate(
        &self,
        reader: &mut FrameReader<R>,
    ) -> Result<(Login, &dyn Protocol<R>), GatewayError> {
        for candidate in &self.candidates {
            if let Some(login) = candidate.probe_login(reader).await? {
                debug!(
                    family = %login.session.family,
                    device = %login.session.device_id(),
                    "protocol negotiated"
                );
                reader.consume(login.consumed);
                return Ok((login, candidate.as_ref()));
            }
        }
        Err(GatewayError::UnknownProtocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn all_families() -> Vec<DeviceFamily> {
        vec![
            DeviceFamily::Teltonika,
            DeviceFamily::Gt06,
            DeviceFamily::IntelliTrac,
            DeviceFamily::Aquila,
        ]
    }

    #[tokio::test]
    async fn test_teltonika_handshake_wins() {
        let bytes = hex::decode("000f333536333037303433373231353739").unwrap();
        let mut reader = FrameReader::new(Cursor::new(bytes));

        let negotiator = Negotiator::with_families(&all_families(), true);
        let (login, protocol) = negotiator.negotiate(&mut reader).await.unwrap();
        assert_eq!(protocol.family(), DeviceFamily::Teltonika);
        assert_eq!(login.session.device_id(), "356307043721579");
        // handshake consumed, stream at the frame boundary
        assert!(!reader.has_data().await.unwrap());
    }

    #[tokio::test]
    async fn test_family_order_decides_shared_handshake() {
        let bytes = hex::decode("000f333536333037303433373231353739").unwrap();
        let mut reader = FrameReader::new(Cursor::new(bytes));

        let negotiator =
            Negotiator::with_families(&[DeviceFamily::Fm1200, DeviceFamily::Teltonika], true);
        let (login, _) = negotiator.negotiate(&mut reader).await.unwrap();
        assert_eq!(login.session.family, DeviceFamily::Fm1200);
    }

    #[tokio::test]
    async fn test_gt06_login_negotiates() {
        let bytes = hex::decode("78781101012345678901234505184dd80001cb970d0a").unwrap();
        let mut reader = FrameReader::new(Cursor::new(bytes));

        let negotiator = Negotiator::with_families(&all_families(), true);
        let (login, protocol) = negotiator.negotiate(&mut reader).await.unwrap();
        assert_eq!(protocol.family(), DeviceFamily::Gt06);
        assert_eq!(login.session.device_id(), "123456789012345");
    }

    #[tokio::test]
    async fn test_unknown_header_rejected() {
        let bytes = vec![0x76, 0x76, 0xFA, 0xFA, 0xFA, 0xFA];
        let mut reader = FrameReader::new(Cursor::new(bytes));

        let negotiator = Negotiator::with_families(&all_families(), true);
        let err = negotiator.negotiate(&mut reader).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownProtocol));
    }

    #[tokio::test]
    async fn test_probing_is_idempotent() {
        let bytes = hex::decode("78781101012345678901234505184dd80001cb970d0a").unwrap();
        let mut reader = FrameReader::new(Cursor::new(bytes));

        // a declined probe must leave the stream intact for the next one
        let aquila = Aquila::new();
        assert!(aquila.probe_login(&mut reader).await.unwrap().is_none());
        let intellitrac = IntelliTrac::new();
        assert!(intellitrac.probe_login(&mut reader).await.unwrap().is_none());

        let negotiator = Negotiator::with_families(&all_families(), true);
        let (login, _) = negotiator.negotiate(&mut reader).await.unwrap();
        assert_eq!(login.session.device_id(), "123456789012345");
    }
}
