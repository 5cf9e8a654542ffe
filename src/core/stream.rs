//! Buffered lookahead reader over a byte stream
//!
//! TCP is a stream without message boundaries, and protocol negotiation must
//! probe candidate framings without consuming bytes a later candidate may
//! need. `FrameReader` buffers the stream and exposes peek/consume primitives:
//! peeks never advance, and a failed login probe leaves the buffer untouched
//! for the next candidate.

use crate::core::error::GatewayError;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on buffered bytes; a stream that reaches it without yielding a
/// complete frame is malformed.
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Initial buffer capacity for incoming TCP data
const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Buffered reader with non-destructive lookahead
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    eof: bool,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Send + Unpin,
{
    /// Wrap a stream
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            eof: false,
        }
    }

    /// Number of bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Buffer at least `n` bytes, or as many as the stream holds before EOF.
    /// Returns the number of buffered bytes.
    pub async fn fill(&mut self, n: usize) -> Result<usize, GatewayError> {
        if n > MAX_BUFFER_SIZE {
            return Err(GatewayError::BadPacket(format!(
                "frame larger than {MAX_BUFFER_SIZE} byte buffer limit"
            )));
        }
        while self.buf.len() < n && !self.eof {
            let read = self.inner.read_buf(&mut self.buf).await?;
            if read == 0 {
                self.eof = true;
            }
            if self.buf.len() > MAX_BUFFER_SIZE {
                return Err(GatewayError::BadPacket(format!(
                    "buffered more than {MAX_BUFFER_SIZE} bytes without a frame boundary"
                )));
            }
        }
        Ok(self.buf.len())
    }

    /// Look at the next `n` bytes without consuming; `None` when the stream
    /// ends before `n` bytes are available. Used by login probes.
    pub async fn try_peek(&mut self, n: usize) -> Result<Option<&[u8]>, GatewayError> {
        if self.fill(n).await? < n {
            return Ok(None);
        }
        Ok(Some(&self.buf[..n]))
    }

    /// Look at the next `n` bytes without consuming; `Truncated` when the
    /// stream ends first. Used once a protocol is bound.
    pub async fn peek(&mut self, n: usize) -> Result<&[u8], GatewayError> {
        if self.fill(n).await? < n {
            return Err(GatewayError::Truncated);
        }
        Ok(&self.buf[..n])
    }

    /// Discard `n` already-buffered bytes
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.buf.len(), "consume past buffered data");
        self.buf.advance(n);
    }

    /// Consume and return exactly `n` bytes; `Truncated` when the stream ends
    /// mid-frame.
    pub async fn read_exact(&mut self, n: usize) -> Result<Bytes, GatewayError> {
        if self.fill(n).await? < n {
            return Err(GatewayError::Truncated);
        }
        Ok(self.buf.split_to(n).freeze())
    }

    /// True when at least one more byte is available; false means the stream
    /// ended cleanly at a frame boundary.
    pub async fn has_data(&mut self) -> Result<bool, GatewayError> {
        Ok(self.fill(1).await? >= 1)
    }

    /// Scan buffered bytes (filling as needed) for `delimiter`, returning its
    /// offset. Gives up with `Truncated` at EOF and `BadPacket` at the buffer
    /// bound. Used by the line-terminated ASCII family.
    pub async fn find_byte(&mut self, delimiter: u8) -> Result<usize, GatewayError> {
        let mut searched = 0;
        loop {
            if let Some(pos) = self.buf[searched..].iter().position(|&b| b == delimiter) {
                return Ok(searched + pos);
            }
            searched = self.buf.len();
            if self.eof {
                return Err(GatewayError::Truncated);
            }
            self.fill(searched + 1).await?;
            if self.buf.len() == searched && self.eof {
                return Err(GatewayError::Truncated);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_peek_does_not_consume() {
        let data = vec![0x01, 0x02, 0x03, 0x04, 0x05];
        let mut reader = FrameReader::new(Cursor::new(data.clone()));

        let peeked = reader.peek(3).await.unwrap().to_vec();
        assert_eq!(peeked, &data[..3]);
        // A second peek of the full window still returns the original bytes
        let peeked = reader.peek(5).await.unwrap().to_vec();
        assert_eq!(peeked, data);

        let consumed = reader.read_exact(5).await.unwrap();
        assert_eq!(&consumed[..], &data[..]);
    }

    #[tokio::test]
    async fn test_try_peek_at_eof() {
        let mut reader = FrameReader::new(Cursor::new(vec![0xAA, 0xBB]));
        assert!(reader.try_peek(3).await.unwrap().is_none());
        // Shorter peeks still succeed
        assert_eq!(reader.try_peek(2).await.unwrap(), Some(&[0xAA, 0xBB][..]));
    }

    #[tokio::test]
    async fn test_read_exact_truncated() {
        let mut reader = FrameReader::new(Cursor::new(vec![0x01]));
        let err = reader.read_exact(4).await.unwrap_err();
        assert!(matches!(err, GatewayError::Truncated));
    }

    #[tokio::test]
    async fn test_has_data_clean_eof() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(!reader.has_data().await.unwrap());

        let mut reader = FrameReader::new(Cursor::new(vec![0x01]));
        assert!(reader.has_data().await.unwrap());
        reader.consume(1);
        assert!(!reader.has_data().await.unwrap());
    }

    #[tokio::test]
    async fn test_find_byte_across_fills() {
        let mut line = b"$$AQTRK,869867038152396".to_vec();
        line.push(b'*');
        line.extend_from_slice(b"40\r\n");
        let star = line.iter().position(|&b| b == b'*').unwrap();

        let mut reader = FrameReader::new(Cursor::new(line));
        assert_eq!(reader.find_byte(b'*').await.unwrap(), star);
        // The scan is lookahead-only
        assert_eq!(reader.peek(2).await.unwrap(), b"$$");
    }

    #[tokio::test]
    async fn test_fill_spans_partial_reads() {
        // bytes trickle in across several socket reads
        let io = tokio_test::io::Builder::new()
            .read(&[0x00])
            .read(&[0x0F, 0x33])
            .read(b"5630704372157")
            .read(b"9")
            .build();
        let mut reader = FrameReader::new(io);

        let window = reader.peek(17).await.unwrap().to_vec();
        assert_eq!(window[..2], [0x00, 0x0F]);
        assert_eq!(&window[2..], b"356307043721579");
        assert_eq!(reader.buffered(), 17);
    }

    #[tokio::test]
    async fn test_find_byte_missing_is_truncated() {
        let mut reader = FrameReader::new(Cursor::new(b"no terminator here".to_vec()));
        let err = reader.find_byte(b'*').await.unwrap_err();
        assert!(matches!(err, GatewayError::Truncated));
    }
}
