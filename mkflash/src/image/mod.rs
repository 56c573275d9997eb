//! Firmware image formats.

pub mod hex;
pub mod program;

pub use hex::{FormatError, HexRecord, RecordType};
pub use program::{AddressSegment, Blocks, HexOptions, ProgramImage, ProgramImageBuilder, StructureError};
