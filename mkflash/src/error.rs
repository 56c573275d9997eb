//! Error types for mkflash.

use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::image::hex::FormatError;
use crate::image::program::StructureError;
use crate::target::DeviceKind;

/// Result type for mkflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mkflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A HEX line could not be decoded.
    #[error("{source_name}:{line}: malformed record: {kind}")]
    HexFormat {
        /// Name of the HEX source (usually the file path).
        source_name: String,
        /// 1-based line number.
        line: usize,
        /// What was wrong with the line.
        kind: FormatError,
    },

    /// A HEX record decoded fine but violates the image layout rules.
    #[error("{source_name}:{line}: {kind}")]
    HexStructure {
        /// Name of the HEX source.
        source_name: String,
        /// 1-based line number (line count read so far for end-of-input errors).
        line: usize,
        /// Which rule was violated.
        kind: StructureError,
    },

    /// The HEX source contains no program data.
    #[error("{0}: image contains no program data")]
    EmptyImage(String),

    /// No serial port is available.
    #[error("No serial port found")]
    NoPortFound,

    /// The bootloader never announced itself.
    #[error("Device did not respond within {timeout:?} (no bootloader found)")]
    NoResponse {
        /// Discovery timeout that elapsed.
        timeout: Duration,
    },

    /// A reply had too few or too many bytes.
    #[error(
        "Unexpected reply length for '{request}': got {actual} byte(s), expected {min}..={max}"
    )]
    ResponseLength {
        /// Request that was answered.
        request: &'static str,
        /// Minimum accepted length.
        min: usize,
        /// Maximum accepted length.
        max: usize,
        /// Length actually received.
        actual: usize,
    },

    /// A reply had the right length but the wrong content.
    #[error("Unexpected reply to '{request}': expected 0x{expected:02X}, got 0x{actual:02X}")]
    UnexpectedResponse {
        /// Request that was answered.
        request: &'static str,
        /// Expected byte.
        expected: u8,
        /// Received byte.
        actual: u8,
    },

    /// The device did not acknowledge a program block.
    #[error("Block {block} was rejected by the device (reply 0x{response:02X})")]
    BlockRejected {
        /// Zero-based block index.
        block: usize,
        /// Byte received instead of the acknowledgement.
        response: u8,
    },

    /// The device reported a signature outside the supported set.
    #[error("Unsupported device signature 0x{0:02X}")]
    UnsupportedDevice(u8),

    /// The device does not match the one the image was built for.
    #[error("Image is for {expected} but the connected device is {found}")]
    DeviceMismatch {
        /// Device the image targets.
        expected: DeviceKind,
        /// Device that answered.
        found: DeviceKind,
    },

    /// The bootloader reported an unusable block size.
    #[error("Invalid block size {0} reported by the bootloader")]
    InvalidBlockSize(u16),

    /// A session step was invoked out of order.
    #[error("Cannot {operation} while the session is {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// Current state name.
        state: String,
    },

    /// Unsupported value or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error was caused by the input image rather than the link.
    pub fn is_image_error(&self) -> bool {
        matches!(
            self,
            Self::HexFormat { .. } | Self::HexStructure { .. } | Self::EmptyImage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_line() {
        let err = Error::HexStructure {
            source_name: "fc.hex".into(),
            line: 7,
            kind: StructureError::NonContiguousData {
                expected: 0x20,
                found: 0x30,
            },
        };
        let text = err.to_string();
        assert!(text.starts_with("fc.hex:7:"));
        assert!(text.contains("0x000030"));
        assert!(err.is_image_error());
    }

    #[test]
    fn test_block_rejected_reports_byte() {
        let err = Error::BlockRejected {
            block: 3,
            response: 0x3F,
        };
        assert_eq!(
            err.to_string(),
            "Block 3 was rejected by the device (reply 0x3F)"
        );
        assert!(!err.is_image_error());
    }
}
