//! Bounds-checked cursor over one frame body
//!
//! Binary bodies are length-delimited before sub-parsing starts, so every
//! short read here is a malformed packet, not a truncated stream.

use crate::core::error::GatewayError;

pub(crate) struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], GatewayError> {
        if self.remaining() < n {
            return Err(GatewayError::BadPacket(format!(
                "body ends {} bytes short",
                n - self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn take_u8(&mut self) -> Result<u8, GatewayError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn take_u16(&mut self) -> Result<u16, GatewayError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn take_u32(&mut self) -> Result<u32, GatewayError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn take_u64(&mut self) -> Result<u64, GatewayError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub(crate) fn take_i32(&mut self) -> Result<i32, GatewayError> {
        Ok(self.take_u32()? as i32)
    }

    /// Signed 24-bit big-endian value
    pub(crate) fn take_i24(&mut self) -> Result<i32, GatewayError> {
        let b = self.take(3)?;
        let unsigned = ((b[0] as i32) << 16) | ((b[1] as i32) << 8) | b[2] as i32;
        // Sign-extend from bit 23
        Ok((unsigned << 8) >> 8)
    }

    /// Unsigned 24-bit big-endian value
    pub(crate) fn take_u24(&mut self) -> Result<u32, GatewayError> {
        let b = self.take(3)?;
        Ok(((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_widths() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut cur = ByteCursor::new(&buf);
        assert_eq!(cur.take_u16().unwrap(), 0x0102);
        assert_eq!(cur.take_u32().unwrap(), 0x0304_0506);
        assert_eq!(cur.remaining(), 2);
        assert!(cur.take_u32().is_err());
    }

    #[test]
    fn test_i24_sign_extension() {
        let mut cur = ByteCursor::new(&[0xFF, 0xFF, 0xCE]);
        assert_eq!(cur.take_i24().unwrap(), -50);
        let mut cur = ByteCursor::new(&[0x00, 0x00, 0x34]);
        assert_eq!(cur.take_i24().unwrap(), 52);
    }
}
