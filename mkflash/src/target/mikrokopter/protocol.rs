//! MikroKopter bootloader wire format.
//!
//! Commands are single ASCII bytes, some followed by big-endian arguments.
//! Most replies are a single `0x0D` acknowledgement.
//!
//! ```text
//! 't'                          -> sig, ?
//! 'T' sig                      -> 0x0D
//! 'V'                          -> 2..3 version chars
//! 'b'                          -> 'Y' size_hi size_lo
//! 'X' n2 n1 n0                 -> 0x0D      (STR911 only)
//! 'e'                          -> 0x0D
//! 'A' addr_hi addr_lo          -> 0x0D
//! 'B' size_hi size_lo 'F' data crc_hi crc_lo -> 0x0D
//! 'E'                          (no reply)
//! ```

use byteorder::{BigEndian, WriteBytesExt};

/// Frame that asks running firmware to reboot into the bootloader.
///
/// Sync `#`, address `a`, command `R`, two checksum characters and three
/// carriage returns.
pub const RESET_FRAME: [u8; 8] = [b'#', b'a', b'R', 0x40, 0x53, b'\r', b'\r', b'\r'];

/// Ping sent first in each discovery round.
pub const PING_ESCAPE: u8 = 0x1B;

/// Ping sent second in each discovery round.
pub const PING_SYNC: u8 = 0xAA;

/// Announcement sent by the bootloader once it is listening.
pub const BOOTLOADER_ID: &[u8] = b"MKBL";

/// Positive acknowledgement.
pub const OK: u8 = 0x0D;

/// First byte of a valid block size reply.
pub const BLOCK_SIZE_TAG: u8 = b'Y';

/// Memory selector for flash in a program block header.
pub const MEMORY_FLASH: u8 = b'F';

/// Bootloader commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Read the device signature.
    ReadSignature = b't',
    /// Select the device type.
    SetDevice = b'T',
    /// Read the bootloader version.
    ReadVersion = b'V',
    /// Read the program block size.
    ReadBlockSize = b'b',
    /// Announce how many bytes to erase.
    SetEraseSize = b'X',
    /// Erase the flash.
    Erase = b'e',
    /// Set the write address.
    SetAddress = b'A',
    /// Program one block.
    ProgramBlock = b'B',
    /// Leave the bootloader.
    Exit = b'E',
}

impl Command {
    /// Command byte.
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Human-readable request name for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadSignature => "signature",
            Self::SetDevice => "set device",
            Self::ReadVersion => "bootloader version",
            Self::ReadBlockSize => "program block size",
            Self::SetEraseSize => "set erase size",
            Self::Erase => "erase flash",
            Self::SetAddress => "set address",
            Self::ProgramBlock => "block programming",
            Self::Exit => "exit",
        }
    }

    /// Frame for a command without arguments.
    pub fn frame(self) -> Vec<u8> {
        vec![self.byte()]
    }
}

/// `'T'` + signature.
pub fn set_device(signature: u8) -> Vec<u8> {
    vec![Command::SetDevice.byte(), signature]
}

/// `'X'` + 24-bit big-endian erase size.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn set_erase_size(bytes: u32) -> Vec<u8> {
    let mut frame = Command::SetEraseSize.frame();
    frame
        .write_u24::<BigEndian>(bytes & 0x00FF_FFFF)
        .unwrap();
    frame
}

/// `'A'` + 16-bit big-endian address.
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn set_address(address: u16) -> Vec<u8> {
    let mut frame = Command::SetAddress.frame();
    frame
        .write_u16::<BigEndian>(address)
        .unwrap();
    frame
}

/// Complete program block frame: header, payload and CRC.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn program_block(payload: &[u8], crc: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 6);
    frame.push(Command::ProgramBlock.byte());
    // Block sizes come from a 16-bit reply, so the payload fits.
    frame
        .write_u16::<BigEndian>(payload.len() as u16)
        .unwrap();
    frame.push(MEMORY_FLASH);
    frame.extend_from_slice(payload);
    frame
        .write_u16::<BigEndian>(crc)
        .unwrap();
    frame
}

/// Parse the reply to `'b'`.
///
/// Returns `None` when the reply does not start with `'Y'`.
pub fn parse_block_size(reply: &[u8]) -> Option<u16> {
    match reply {
        [BLOCK_SIZE_TAG, hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

/// Render the reply to `'V'` as `major.minor[patch]`.
pub fn format_version(reply: &[u8]) -> String {
    let text: Vec<char> = reply.iter().map(|b| char::from(*b)).collect();
    match text.as_slice() {
        [major, rest @ ..] => {
            let minor: String = rest.iter().collect();
            format!("{major}.{minor}")
        },
        [] => String::new(),
    }
}

/// Streaming search for a byte pattern.
///
/// Progress survives across [`feed`](Self::feed) calls, so the pattern may
/// arrive split over several reads. A byte that breaks the match resets
/// progress to the start of the pattern.
#[derive(Debug, Clone)]
pub struct StreamMatcher {
    pattern: &'static [u8],
    matched: usize,
}

impl StreamMatcher {
    /// Create a matcher.
    pub fn new(pattern: &'static [u8]) -> Self {
        Self {
            pattern,
            matched: 0,
        }
    }

    /// Feed received bytes; returns `true` once the whole pattern was seen.
    pub fn feed(&mut self, data: &[u8]) -> bool {
        for &byte in data {
            if self.pattern.get(self.matched) == Some(&byte) {
                self.matched += 1;
                if self.matched == self.pattern.len() {
                    self.matched = 0;
                    return true;
                }
            } else {
                self.matched = 0;
            }
        }
        false
    }

    /// Forget partial progress.
    pub fn reset(&mut self) {
        self.matched = 0;
    }
}
