#![forbid(unsafe_code)]
//! Checksum primitives.
//!
//! ext4 metadata checksums chain a *raw* (uninverted) CRC-32C update over
//! seeded state: the stream starts at `!0` and no final complement is
//! applied. The `crc32c` crate implements the finalized convention
//! (`crc32c_append(c, d) = !raw(!c, d)`), so the raw update is recovered
//! as `!crc32c_append(!state, data)`. Callers manage seed state
//! explicitly; both functions are pure.
//!
//! The legacy `gdt_csum` feature instead uses a CRC-16 over a fixed
//! 256-entry table (polynomial 0xA001, reflected).

/// Initial state of every ext4 CRC-32C stream.
pub const CRC32C_SEED: u32 = !0;

/// Initial state of the CRC-16 stream used by the legacy descriptor
/// checksum.
pub const CRC16_SEED: u16 = !0;

/// Advance a raw CRC-32C stream over `bytes`.
#[must_use]
pub fn crc32c_update(state: u32, bytes: &[u8]) -> u32 {
    !crc32c::crc32c_append(!state, bytes)
}

/// Advance a raw CRC-32C stream over the little-endian encoding of `n`.
#[must_use]
pub fn crc32c_update_u32(state: u32, n: u32) -> u32 {
    crc32c_update(state, &n.to_le_bytes())
}

/// CRC-16 table for polynomial 0xA001 (reflected 0x8005), as used by
/// e2fsprogs for the uninitialised-block-group descriptor checksum.
const CRC16_TABLE: [u16; 256] = [
    0x0000, 0xC0C1, 0xC181, 0x0140, 0xC301, 0x03C0, 0x0280, 0xC241,
    0xC601, 0x06C0, 0x0780, 0xC741, 0x0500, 0xC5C1, 0xC481, 0x0440,
    0xCC01, 0x0CC0, 0x0D80, 0xCD41, 0x0F00, 0xCFC1, 0xCE81, 0x0E40,
    0x0A00, 0xCAC1, 0xCB81, 0x0B40, 0xC901, 0x09C0, 0x0880, 0xC841,
    0xD801, 0x18C0, 0x1980, 0xD941, 0x1B00, 0xDBC1, 0xDA81, 0x1A40,
    0x1E00, 0xDEC1, 0xDF81, 0x1F40, 0xDD01, 0x1DC0, 0x1C80, 0xDC41,
    0x1400, 0xD4C1, 0xD581, 0x1540, 0xD701, 0x17C0, 0x1680, 0xD641,
    0xD201, 0x12C0, 0x1380, 0xD341, 0x1100, 0xD1C1, 0xD081, 0x1040,
    0xF001, 0x30C0, 0x3180, 0xF141, 0x3300, 0xF3C1, 0xF281, 0x3240,
    0x3600, 0xF6C1, 0xF781, 0x3740, 0xF501, 0x35C0, 0x3480, 0xF441,
    0x3C00, 0xFCC1, 0xFD81, 0x3D40, 0xFF01, 0x3FC0, 0x3E80, 0xFE41,
    0xFA01, 0x3AC0, 0x3B80, 0xFB41, 0x3900, 0xF9C1, 0xF881, 0x3840,
    0x2800, 0xE8C1, 0xE981, 0x2940, 0xEB01, 0x2BC0, 0x2A80, 0xEA41,
    0xEE01, 0x2EC0, 0x2F80, 0xEF41, 0x2D00, 0xEDC1, 0xEC81, 0x2C40,
    0xE401, 0x24C0, 0x2580, 0xE541, 0x2700, 0xE7C1, 0xE681, 0x2640,
    0x2200, 0xE2C1, 0xE381, 0x2340, 0xE101, 0x21C0, 0x2080, 0xE041,
    0xA001, 0x60C0, 0x6180, 0xA141, 0x6300, 0xA3C1, 0xA281, 0x6240,
    0x6600, 0xA6C1, 0xA781, 0x6740, 0xA501, 0x65C0, 0x6480, 0xA441,
    0x6C00, 0xACC1, 0xAD81, 0x6D40, 0xAF01, 0x6FC0, 0x6E80, 0xAE41,
    0xAA01, 0x6AC0, 0x6B80, 0xAB41, 0x6900, 0xA9C1, 0xA881, 0x6840,
    0x7800, 0xB8C1, 0xB981, 0x7940, 0xBB01, 0x7BC0, 0x7A80, 0xBA41,
    0xBE01, 0x7EC0, 0x7F80, 0xBF41, 0x7D00, 0xBDC1, 0xBC81, 0x7C40,
    0xB401, 0x74C0, 0x7580, 0xB541, 0x7700, 0xB7C1, 0xB681, 0x7640,
    0x7200, 0xB2C1, 0xB381, 0x7340, 0xB101, 0x71C0, 0x7080, 0xB041,
    0x5000, 0x90C1, 0x9181, 0x5140, 0x9301, 0x53C0, 0x5280, 0x9241,
    0x9601, 0x56C0, 0x5780, 0x9741, 0x5500, 0x95C1, 0x9481, 0x5440,
    0x9C01, 0x5CC0, 0x5D80, 0x9D41, 0x5F00, 0x9FC1, 0x9E81, 0x5E40,
    0x5A00, 0x9AC1, 0x9B81, 0x5B40, 0x9901, 0x59C0, 0x5880, 0x9841,
    0x8801, 0x48C0, 0x4980, 0x8941, 0x4B00, 0x8BC1, 0x8A81, 0x4A40,
    0x4E00, 0x8EC1, 0x8F81, 0x4F40, 0x8D01, 0x4DC0, 0x4C80, 0x8C41,
    0x4400, 0x84C1, 0x8581, 0x4540, 0x8701, 0x47C0, 0x4680, 0x8641,
    0x8201, 0x42C0, 0x4380, 0x8341, 0x4100, 0x81C1, 0x8081, 0x4040,
];

/// Advance a CRC-16 stream over `bytes`.
#[must_use]
pub fn crc16_update(state: u16, bytes: &[u8]) -> u16 {
    let mut crc = state;
    for byte in bytes {
        crc = (crc >> 8) ^ CRC16_TABLE[usize::from((crc ^ u16::from(*byte)) & 0xFF)];
    }
    crc
}

/// Advance a CRC-16 stream over the little-endian encoding of `n`.
#[must_use]
pub fn crc16_update_u32(state: u16, n: u32) -> u16 {
    crc16_update(state, &n.to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Golden values computed with an independent shift-register reference.

    #[test]
    fn crc32c_check_string() {
        assert_eq!(crc32c_update(CRC32C_SEED, b"123456789"), 0x1CF9_6D7C);
        // The finalized convention's well-known check value relates to the
        // raw one by a complement.
        assert_eq!(!crc32c_update(CRC32C_SEED, b"123456789"), 0xE306_9283);
    }

    #[test]
    fn crc32c_empty_is_identity() {
        assert_eq!(crc32c_update(CRC32C_SEED, b""), CRC32C_SEED);
        assert_eq!(crc32c_update(0x1234_5678, b""), 0x1234_5678);
    }

    #[test]
    fn crc32c_uuid_seed() {
        let uuid: Vec<u8> = (0..16).collect();
        assert_eq!(crc32c_update(CRC32C_SEED, &uuid), 0x2636_F714);
    }

    #[test]
    fn crc32c_zero_state() {
        assert_eq!(crc32c_update(0, b"ext4"), 0xB29C_8350);
    }

    #[test]
    fn crc32c_chaining_matches_single_pass() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let whole = crc32c_update(CRC32C_SEED, data);
        let mut state = CRC32C_SEED;
        for chunk in data.chunks(7) {
            state = crc32c_update(state, chunk);
        }
        assert_eq!(state, whole);
    }

    #[test]
    fn crc32c_u32_helper_is_le_encoding() {
        assert_eq!(
            crc32c_update_u32(0x1234_5678, 0xDEAD_BEEF),
            crc32c_update(0x1234_5678, &[0xEF, 0xBE, 0xAD, 0xDE])
        );
        assert_eq!(crc32c_update_u32(0x1234_5678, 0xDEAD_BEEF), 0xF3ED_4B20);
    }

    #[test]
    fn crc16_check_string() {
        assert_eq!(crc16_update(CRC16_SEED, b"123456789"), 0x4B37);
    }

    #[test]
    fn crc16_empty_and_uuid() {
        assert_eq!(crc16_update(CRC16_SEED, b""), CRC16_SEED);
        let uuid: Vec<u8> = (0..16).collect();
        assert_eq!(crc16_update(CRC16_SEED, &uuid), 0xE7B4);
    }

    #[test]
    fn crc16_arbitrary_state() {
        assert_eq!(crc16_update(0x1D0F, b"ext4"), 0x102B);
    }

    #[test]
    fn crc16_u32_helper_is_le_encoding() {
        assert_eq!(
            crc16_update_u32(CRC16_SEED, 7),
            crc16_update(CRC16_SEED, &[7, 0, 0, 0])
        );
    }
}
