//! Intel HEX record decoding.
//!
//! ```text
//! :BB AAAA TT DD..DD CC
//!  |  |    |  |      +-- checksum (two's complement of the byte sum)
//!  |  |    |  +--------- payload, BB bytes
//!  |  |    +------------ record type
//!  |  +----------------- address within the active segment
//!  +-------------------- byte count
//! ```
//!
//! Only the record types used by MikroKopter firmware images are
//! understood: data, end-of-file and extended segment address. Anything
//! else decodes to [`RecordType::Unsupported`] and is rejected by the
//! image builder.

use std::fmt;

use thiserror::Error;

/// Character offsets of the fixed fields, counted from the `:` marker.
mod ranges {
    use std::ops::Range;
    pub const COUNT: Range<usize> = 1..3;
    pub const ADDRESS: Range<usize> = 3..7;
    pub const TYPE: Range<usize> = 7..9;
    pub const PAYLOAD_START: usize = 9;
}

/// Start code of every record.
pub const START_CODE: char = ':';

/// Shortest possible record: marker, count, address, type and checksum.
pub const MIN_RECORD_LEN: usize = 11;

/// Record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// `00`: program bytes.
    Data,
    /// `01`: end of file.
    EndOfFile,
    /// `02`: extended segment address.
    ExtendedAddress,
    /// Any other type; carries the raw value.
    Unsupported(u8),
}

impl RecordType {
    /// Raw type byte.
    pub fn code(self) -> u8 {
        match self {
            Self::Data => 0x00,
            Self::EndOfFile => 0x01,
            Self::ExtendedAddress => 0x02,
            Self::Unsupported(code) => code,
        }
    }
}

impl From<u8> for RecordType {
    fn from(code: u8) -> Self {
        match code {
            0x00 => Self::Data,
            0x01 => Self::EndOfFile,
            0x02 => Self::ExtendedAddress,
            other => Self::Unsupported(other),
        }
    }
}

/// Field of a record, used to point at the broken part of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Byte count.
    ByteCount,
    /// Address.
    Address,
    /// Record type.
    RecordType,
    /// Payload.
    Payload,
    /// Checksum.
    Checksum,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ByteCount => "byte count",
            Self::Address => "address",
            Self::RecordType => "record type",
            Self::Payload => "payload",
            Self::Checksum => "checksum",
        };
        f.write_str(name)
    }
}

/// Reasons a line is not a well-formed record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The line has no `:` start code.
    #[error("missing start code ':'")]
    MissingStartCode,
    /// The line is shorter than the smallest record.
    #[error("line too short ({0} characters, minimum {min})", min = MIN_RECORD_LEN)]
    TooShort(usize),
    /// The line ends before the declared payload and checksum.
    #[error(
        "byte count {declared} needs {needed} characters after the header, found {available}",
        needed = payload_chars(.declared)
    )]
    TruncatedPayload {
        /// Payload bytes declared by the byte count.
        declared: u8,
        /// Characters available after the header.
        available: usize,
    },
    /// A field contains non-hexadecimal characters.
    #[error("invalid hex digits in {0}")]
    InvalidHex(Field),
    /// Stored and computed checksums differ.
    #[error("checksum mismatch: stored 0x{stored:02X}, computed 0x{computed:02X}")]
    ChecksumMismatch {
        /// Checksum stored in the record.
        stored: u8,
        /// Checksum computed from the record.
        computed: u8,
    },
    /// An extended address record with fewer than two payload bytes.
    #[error("extended address record carries {0} byte(s), expected 2")]
    ShortExtendedAddress(u8),
}

/// Characters needed after the header for a payload plus checksum.
fn payload_chars(declared: &u8) -> usize {
    usize::from(*declared) * 2 + 2
}

/// One decoded line of a HEX file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Record type.
    pub record_type: RecordType,
    /// Declared payload length.
    pub byte_count: u8,
    /// Address relative to the active segment.
    pub address: u16,
    /// Payload bytes; always `byte_count` long.
    pub payload: Vec<u8>,
    /// Checksum stored in the line.
    pub checksum: u8,
}

impl HexRecord {
    /// Checksum the record should carry.
    pub fn computed_checksum(&self) -> u8 {
        let [addr_hi, addr_lo] = self.address.to_be_bytes();
        let sum = self
            .payload
            .iter()
            .fold(
                self.byte_count
                    .wrapping_add(addr_hi)
                    .wrapping_add(addr_lo)
                    .wrapping_add(self.record_type.code()),
                |acc, b| acc.wrapping_add(*b),
            );
        (!sum).wrapping_add(1)
    }

    /// Whether the stored checksum is correct.
    pub fn checksum_ok(&self) -> bool {
        self.computed_checksum() == self.checksum
    }

    /// Segment offset selected by an extended address record.
    ///
    /// The first two payload bytes `p0, p1` give `(p0 << 12) + (p1 << 4)`.
    pub fn extended_offset(&self) -> Result<u32, FormatError> {
        match self.payload.as_slice() {
            [p0, p1, ..] => Ok((u32::from(*p0) << 12) + (u32::from(*p1) << 4)),
            _ => Err(FormatError::ShortExtendedAddress(self.byte_count)),
        }
    }

    /// Decode one line.
    ///
    /// `line` must start at the `:` marker; a trailing `\r` or `\n` is
    /// ignored. The checksum is decoded but not verified here.
    pub fn decode(line: &str) -> Result<Self, FormatError> {
        let line = line.trim_end_matches(['\r', '\n']);

        if !line.starts_with(START_CODE) {
            return Err(FormatError::MissingStartCode);
        }
        if line.len() < MIN_RECORD_LEN {
            return Err(FormatError::TooShort(line.len()));
        }

        let byte_count = parse_u8(line, ranges::COUNT, Field::ByteCount)?;
        let address = u16::from_str_radix(hex_field(line, ranges::ADDRESS, Field::Address)?, 16)
            .map_err(|_| FormatError::InvalidHex(Field::Address))?;
        let record_type = RecordType::from(parse_u8(line, ranges::TYPE, Field::RecordType)?);

        let payload_chars = usize::from(byte_count) * 2;
        let available = line.len() - ranges::PAYLOAD_START;
        if available < payload_chars + 2 {
            return Err(FormatError::TruncatedPayload {
                declared: byte_count,
                available,
            });
        }

        let payload_end = ranges::PAYLOAD_START + payload_chars;
        let payload = (ranges::PAYLOAD_START..payload_end)
            .step_by(2)
            .map(|at| parse_u8(line, at..at + 2, Field::Payload))
            .collect::<Result<Vec<u8>, _>>()?;

        // The checksum is always the last two characters.
        let checksum = parse_u8(line, line.len() - 2..line.len(), Field::Checksum)?;

        Ok(Self {
            record_type,
            byte_count,
            address,
            payload,
            checksum,
        })
    }
}

fn hex_field(line: &str, range: std::ops::Range<usize>, which: Field) -> Result<&str, FormatError> {
    line.get(range)
        .filter(|text| text.bytes().all(|b| b.is_ascii_hexdigit()))
        .ok_or(FormatError::InvalidHex(which))
}

fn parse_u8(line: &str, range: std::ops::Range<usize>, which: Field) -> Result<u8, FormatError> {
    u8::from_str_radix(hex_field(line, range, which)?, 16).map_err(|_| FormatError::InvalidHex(which))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_data_record() {
        let record = HexRecord::decode(":0300300002337A1E\r\n").unwrap();
        assert_eq!(record.record_type, RecordType::Data);
        assert_eq!(record.byte_count, 3);
        assert_eq!(record.address, 0x0030);
        assert_eq!(record.payload, vec![0x02, 0x33, 0x7A]);
        assert_eq!(record.checksum, 0x1E);
        assert!(record.checksum_ok());
    }

    #[test]
    fn test_decode_end_of_file() {
        let record = HexRecord::decode(":00000001FF").unwrap();
        assert_eq!(record.record_type, RecordType::EndOfFile);
        assert!(record.payload.is_empty());
        assert!(record.checksum_ok());
    }

    #[test]
    fn test_decode_extended_address() {
        let record = HexRecord::decode(":020000021000EC").unwrap();
        assert_eq!(record.record_type, RecordType::ExtendedAddress);
        assert_eq!(record.extended_offset().unwrap(), 0x1_0000);
        assert!(record.checksum_ok());
    }

    #[test]
    fn test_decode_unsupported_type() {
        let record = HexRecord::decode(":04000005000000CD2A").unwrap();
        assert_eq!(record.record_type, RecordType::Unsupported(0x05));
    }

    #[test]
    fn test_missing_start_code() {
        assert_eq!(
            HexRecord::decode("00000001FF"),
            Err(FormatError::MissingStartCode)
        );
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            HexRecord::decode(":000000FF\r\n"),
            Err(FormatError::TooShort(9))
        );
    }

    #[test]
    fn test_truncated_payload() {
        let err = HexRecord::decode(":10000000AABBCC11").unwrap_err();
        assert!(matches!(
            err,
            FormatError::TruncatedPayload { declared: 16, .. }
        ));
    }

    #[test]
    fn test_invalid_hex_names_field() {
        assert_eq!(
            HexRecord::decode(":0100000GAA55"),
            Err(FormatError::InvalidHex(Field::RecordType))
        );
        assert_eq!(
            HexRecord::decode(":01000000ZZ55"),
            Err(FormatError::InvalidHex(Field::Payload))
        );
        assert_eq!(
            HexRecord::decode(":0100X000AA55"),
            Err(FormatError::InvalidHex(Field::Address))
        );
    }

    #[test]
    fn test_bad_checksum_is_decoded() {
        let record = HexRecord::decode(":0300300002337A1F").unwrap();
        assert!(!record.checksum_ok());
        assert_eq!(record.computed_checksum(), 0x1E);
    }

    #[test]
    fn test_short_extended_address() {
        let record = HexRecord::decode(":0100000210ED").unwrap();
        assert_eq!(
            record.extended_offset(),
            Err(FormatError::ShortExtendedAddress(1))
        );
    }

    #[test]
    fn test_format_error_messages() {
        assert_eq!(
            FormatError::TooShort(5).to_string(),
            "line too short (5 characters, minimum 11)"
        );
        assert_eq!(
            FormatError::TruncatedPayload {
                declared: 4,
                available: 3
            }
            .to_string(),
            "byte count 4 needs 10 characters after the header, found 3"
        );
        assert_eq!(
            FormatError::InvalidHex(Field::Address).to_string(),
            "invalid hex digits in address"
        );
        let source: &dyn std::error::Error = &FormatError::MissingStartCode;
        assert_eq!(source.to_string(), "missing start code ':'");
    }
}
