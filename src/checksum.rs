/// Modbus RTU CRC16 computation and frame validation
///
/// The CRC is computed with the two 256-entry lookup tables published in the
/// Modbus over Serial Line implementation guide. The running register is kept as two
/// bytes: `hi` is the byte transmitted first on the wire, `lo` the second, so
/// `crc16` returns `(hi << 8) | lo`.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::MIN_FRAME_LEN;

/// Table of CRC values for high-order byte
const CRC_HI_TABLE: [u8; 256] = [
    0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41, 0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40,
    0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40, 0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41,
    0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40, 0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41,
    0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41, 0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40,
    0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40, 0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41,
    0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41, 0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40,
    0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41, 0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40,
    0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40, 0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41,
    0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40, 0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41,
    0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41, 0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40,
    0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41, 0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40,
    0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40, 0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41,
    0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41, 0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40,
    0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40, 0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41,
    0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40, 0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41,
    0x00, 0xC1, 0x81, 0x40, 0x01, 0xC0, 0x80, 0x41, 0x01, 0xC0, 0x80, 0x41, 0x00, 0xC1, 0x81, 0x40,
];

/// Table of CRC values for low-order byte
const CRC_LO_TABLE: [u8; 256] = [
    0x00, 0xC0, 0xC1, 0x01, 0xC3, 0x03, 0x02, 0xC2, 0xC6, 0x06, 0x07, 0xC7, 0x05, 0xC5, 0xC4, 0x04,
    0xCC, 0x0C, 0x0D, 0xCD, 0x0F, 0xCF, 0xCE, 0x0E, 0x0A, 0xCA, 0xCB, 0x0B, 0xC9, 0x09, 0x08, 0xC8,
    0xD8, 0x18, 0x19, 0xD9, 0x1B, 0xDB, 0xDA, 0x1A, 0x1E, 0xDE, 0xDF, 0x1F, 0xDD, 0x1D, 0x1C, 0xDC,
    0x14, 0xD4, 0xD5, 0x15, 0xD7, 0x17, 0x16, 0xD6, 0xD2, 0x12, 0x13, 0xD3, 0x11, 0xD1, 0xD0, 0x10,
    0xF0, 0x30, 0x31, 0xF1, 0x33, 0xF3, 0xF2, 0x32, 0x36, 0xF6, 0xF7, 0x37, 0xF5, 0x35, 0x34, 0xF4,
    0x3C, 0xFC, 0xFD, 0x3D, 0xFF, 0x3F, 0x3E, 0xFE, 0xFA, 0x3A, 0x3B, 0xFB, 0x39, 0xF9, 0xF8, 0x38,
    0x28, 0xE8, 0xE9, 0x29, 0xEB, 0x2B, 0x2A, 0xEA, 0xEE, 0x2E, 0x2F, 0xEF, 0x2D, 0xED, 0xEC, 0x2C,
    0xE4, 0x24, 0x25, 0xE5, 0x27, 0xE7, 0xE6, 0x26, 0x22, 0xE2, 0xE3, 0x23, 0xE1, 0x21, 0x20, 0xE0,
    0xA0, 0x60, 0x61, 0xA1, 0x63, 0xA3, 0xA2, 0x62, 0x66, 0xA6, 0xA7, 0x67, 0xA5, 0x65, 0x64, 0xA4,
    0x6C, 0xAC, 0xAD, 0x6D, 0xAF, 0x6F, 0x6E, 0xAE, 0xAA, 0x6A, 0x6B, 0xAB, 0x69, 0xA9, 0xA8, 0x68,
    0x78, 0xB8, 0xB9, 0x79, 0xBB, 0x7B, 0x7A, 0xBA, 0xBE, 0x7E, 0x7F, 0xBF, 0x7D, 0xBD, 0xBC, 0x7C,
    0xB4, 0x74, 0x75, 0xB5, 0x77, 0xB7, 0xB6, 0x76, 0x72, 0xB2, 0xB3, 0x73, 0xB1, 0x71, 0x70, 0xB0,
    0x50, 0x90, 0x91, 0x51, 0x93, 0x53, 0x52, 0x92, 0x96, 0x56, 0x57, 0x97, 0x55, 0x95, 0x94, 0x54,
    0x9C, 0x5C, 0x5D, 0x9D, 0x5F, 0x9F, 0x9E, 0x5E, 0x5A, 0x9A, 0x9B, 0x5B, 0x99, 0x59, 0x58, 0x98,
    0x88, 0x48, 0x49, 0x89, 0x4B, 0x8B, 0x8A, 0x4A, 0x4E, 0x8E, 0x8F, 0x4F, 0x8D, 0x4D, 0x4C, 0x8C,
    0x44, 0x84, 0x85, 0x45, 0x87, 0x47, 0x46, 0x86, 0x82, 0x42, 0x43, 0x83, 0x41, 0x81, 0x80, 0x40,
];

/// Compute the Modbus RTU CRC16 over `address` followed by `pdu`
///
/// Returns `(CRCHi << 8) | CRCLo`, i.e. the first wire byte in the high half.
///
/// ```rust
/// use voltage_rtu_bridge::checksum::crc16;
///
/// assert_eq!(crc16(0x01, &[0x03, 0x00, 0x00, 0x00, 0x0A]), 0xC5CD);
/// ```
pub fn crc16(address: u8, pdu: &[u8]) -> u16 {
    let mut hi: u8 = 0xFF;
    let mut lo: u8 = 0xFF;

    for &byte in std::iter::once(&address).chain(pdu) {
        let index = (hi ^ byte) as usize;
        hi = lo ^ CRC_HI_TABLE[index];
        lo = CRC_LO_TABLE[index];
    }

    u16::from_be_bytes([hi, lo])
}

/// Order of the two trailing CRC bytes when packed into a `u16`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrcByteOrder {
    /// `(frame[len-2] << 8) | frame[len-1]`, as the deployed bridges read it
    #[default]
    HiLo,
    /// `(frame[len-1] << 8) | frame[len-2]`
    LoHi,
}

/// Validates trailing CRCs of candidate RTU frames
#[derive(Debug, Clone, Copy, Default)]
pub struct CrcValidator {
    order: CrcByteOrder,
}

impl CrcValidator {
    /// Create a validator for the given trailing byte order
    pub fn new(order: CrcByteOrder) -> Self {
        Self { order }
    }

    /// Trailing byte order in use
    pub fn order(&self) -> CrcByteOrder {
        self.order
    }

    /// Pack the two trailing bytes of `frame`, `None` when shorter than 4 bytes
    pub fn trailing_crc(&self, frame: &[u8]) -> Option<u16> {
        if frame.len() < MIN_FRAME_LEN {
            return None;
        }
        let tail = &frame[frame.len() - 2..];
        Some(match self.order {
            CrcByteOrder::HiLo => BigEndian::read_u16(tail),
            CrcByteOrder::LoHi => LittleEndian::read_u16(tail),
        })
    }

    /// Recompute the CRC over `frame[0]` and `frame[1..len-2]`
    pub fn expected_crc(&self, frame: &[u8]) -> Option<u16> {
        if frame.len() < MIN_FRAME_LEN {
            return None;
        }
        Some(crc16(frame[0], &frame[1..frame.len() - 2]))
    }

    /// `true` when the frame is at least 4 bytes and its trailing CRC matches
    pub fn validate(&self, frame: &[u8]) -> bool {
        match (self.expected_crc(frame), self.trailing_crc(frame)) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => false,
        }
    }

    /// Like [`validate`](Self::validate) but explains the rejection
    pub fn check(&self, frame: &[u8]) -> BridgeResult<()> {
        let (expected, actual) = match (self.expected_crc(frame), self.trailing_crc(frame)) {
            (Some(expected), Some(actual)) => (expected, actual),
            _ => {
                return Err(BridgeError::frame(format!(
                    "frame too short: {} bytes (minimum {})",
                    frame.len(), MIN_FRAME_LEN
                )));
            }
        };

        if expected != actual {
            return Err(BridgeError::crc_mismatch(expected, actual));
        }
        Ok(())
    }

    /// Append the CRC of `frame` (address + PDU) in the configured order
    pub fn append_crc(&self, frame: &mut Vec<u8>) {
        let Some((&address, pdu)) = frame.split_first() else {
            return;
        };
        let crc = crc16(address, pdu);
        let mut tail = [0u8; 2];
        match self.order {
            CrcByteOrder::HiLo => BigEndian::write_u16(&mut tail, crc),
            CrcByteOrder::LoHi => LittleEndian::write_u16(&mut tail, crc),
        }
        frame.extend_from_slice(&tail);
    }
}
