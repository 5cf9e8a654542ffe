//! Checksum algorithms used by the wire protocols
//!
//! Supports: CRC-16/ARC (Teltonika, FM1200), CRC-16/X25 (GT06 family),
//! XOR (Aquila ASCII frames)

/// CRC-16/ARC (also known as CRC-16/IBM)
///
/// Polynomial: 0x8005, Init: 0x0000, RefIn: true, RefOut: true, XorOut: 0x0000
pub fn crc16_arc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0x0000;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    crc
}

/// CRC-16/X25 (X.25 link layer)
///
/// Polynomial: 0x1021, Init: 0xFFFF, RefIn: true, RefOut: true, XorOut: 0xFFFF
pub fn crc16_x25(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
        }
    }

    crc ^ 0xFFFF
}

/// XOR checksum - XOR of all bytes
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_arc() {
        // Standard check value for CRC-16/ARC
        assert_eq!(crc16_arc(b"123456789"), 0xBB3D);
        assert_eq!(crc16_arc(&[]), 0x0000);
    }

    #[test]
    fn test_crc16_x25() {
        // Standard check value for CRC-16/X25
        assert_eq!(crc16_x25(b"123456789"), 0x906E);
    }

    #[test]
    fn test_crc16_x25_gt06_vector() {
        // Captured GT06 heartbeat content: length byte through serial number
        let data: [u8; 16] = [
            0x11, 0x01, 0x07, 0x52, 0x53, 0x36, 0x78, 0x90, 0x02, 0x42, 0x70, 0x00, 0x32, 0x01,
            0x00, 0x05,
        ];
        assert_eq!(crc16_x25(&data), 0x1279);
    }

    #[test]
    fn test_xor() {
        assert_eq!(xor_checksum(&[0x01, 0x02, 0x03]), 0x00);
        assert_eq!(xor_checksum(&[0xFF, 0x00]), 0xFF);
        assert_eq!(xor_checksum(b""), 0x00);
    }
}
