//! The two checksums used on the bus: the Modbus CRC16 for the meter
//! emulation and a plain 16-bit sum for the proprietary Solax framing.

/// A failed comparison, kept for logging.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Mismatch {
    pub computed: u16,
    pub received: u16,
}

pub fn crc16_modbus(data: &[u8]) -> u16 {
    crc16::State::<crc16::MODBUS>::calculate(data)
}

/// Wrapping sum of every byte.
pub fn additive(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |sum, b| sum.wrapping_add(*b as u16))
}

/// Compares the CRC over `covered` with the two trailing bytes, low byte first.
pub fn verify_crc16(covered: &[u8], trailer: [u8; 2]) -> Result<(), Mismatch> {
    compare(crc16_modbus(covered), u16::from_le_bytes(trailer))
}

/// Compares the additive sum over `covered` with the two trailing bytes, high byte first.
pub fn verify_additive(covered: &[u8], trailer: [u8; 2]) -> Result<(), Mismatch> {
    compare(additive(covered), u16::from_be_bytes(trailer))
}

fn compare(computed: u16, received: u16) -> Result<(), Mismatch> {
    if computed == received {
        Ok(())
    } else {
        Err(Mismatch { computed, received })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_matches_known_requests() {
        // handshake request sent by an X1 boost to its meter
        assert_eq!(crc16_modbus(&[0x01, 0x03, 0x00, 0x0B, 0x00, 0x01]).to_le_bytes(), [0xF5, 0xC8]);
        assert_eq!(crc16_modbus(&[0x01, 0x04, 0x00, 0x0C, 0x00, 0x02]).to_le_bytes(), [0xB1, 0xC8]);
    }

    #[test]
    fn additive_wraps() {
        assert_eq!(additive(&[]), 0);
        assert_eq!(additive(&[0xFF; 258]), (0xFFu32 * 258 % 0x1_0000) as u16);
        assert_eq!(additive(&vec![0xFF; 300]), 0x2AD4);
    }

    #[test]
    fn verify_reports_both_values() {
        assert_eq!(verify_additive(&[0x01, 0x02], [0x00, 0x03]), Ok(()));
        assert_eq!(
            verify_additive(&[0x01, 0x02], [0x03, 0x00]),
            Err(Mismatch { computed: 0x0003, received: 0x0300 })
        );
        assert!(verify_crc16(&[0x01, 0x03, 0x00, 0x0B, 0x00, 0x01], [0xC8, 0xF5]).is_err());
    }

    #[test]
    fn single_bit_corruption_is_detected() {
        let frame = [0xAA, 0x55, 0x01, 0x00, 0x00, 0x0A, 0x11, 0x02, 0x00];
        let crc = crc16_modbus(&frame).to_le_bytes();
        let sum = additive(&frame).to_be_bytes();
        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame;
                corrupted[byte] ^= 1 << bit;
                assert!(verify_crc16(&corrupted, crc).is_err());
                assert!(verify_additive(&corrupted, sum).is_err());
            }
        }
    }
}
