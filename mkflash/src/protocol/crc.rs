//! CRC-16 checksum used by the bootloader for program blocks.
//!
//! CCITT polynomial `0x1021`, seed `0xFFFF`, processed MSB first with no
//! final XOR (the CRC-16/CCITT-FALSE parameter set).

/// CRC polynomial.
pub const CRC16_POLY: u16 = 0x1021;

/// Initial accumulator value.
pub const CRC16_SEED: u16 = 0xFFFF;

/// Incremental CRC-16 accumulator.
///
/// ```rust
/// use mkflash::protocol::crc::Crc16;
///
/// let mut crc = Crc16::new();
/// for byte in b"123456789" {
///     crc.update(*byte);
/// }
/// assert_eq!(crc.result(), 0x29B1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    crc: u16,
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc16 {
    /// Create an accumulator seeded with [`CRC16_SEED`].
    #[must_use]
    pub const fn new() -> Self {
        Self { crc: CRC16_SEED }
    }

    /// Fold one byte into the checksum.
    pub fn update(&mut self, byte: u8) {
        self.crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if self.crc & 0x8000 != 0 {
                self.crc = (self.crc << 1) ^ CRC16_POLY;
            } else {
                self.crc <<= 1;
            }
        }
    }

    /// Fold a slice into the checksum.
    pub fn update_slice(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// Current checksum value.
    #[must_use]
    pub const fn result(&self) -> u16 {
        self.crc
    }
}

/// Calculate the CRC-16 of a whole buffer.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update_slice(data);
    crc.result()
}
