//! Flat program image assembled from Intel HEX records.
//!
//! The bootloader always programs from address zero, so the image must be
//! one gap-free run of bytes. Records are consumed in a single forward pass:
//! every data record has to land exactly on the write cursor, and an
//! extended address record may only move the segment base to the cursor.
//!
//! ```rust
//! use mkflash::image::{HexOptions, ProgramImage};
//!
//! let text = ":0400000001020304F2\n:00000001FF\n";
//! let image = ProgramImage::parse_str(text, HexOptions::default()).unwrap();
//! assert_eq!(image.data(), &[1, 2, 3, 4]);
//! ```

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::image::hex::{FormatError, HexRecord, RecordType, START_CODE};

/// Options controlling how strictly a HEX source is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HexOptions {
    /// Reject records whose checksum does not match instead of warning.
    pub strict_checksum: bool,
    /// Accept a source without any data bytes.
    pub allow_empty: bool,
}

impl HexOptions {
    /// Enable or disable strict checksum checking.
    #[must_use]
    pub fn with_strict_checksum(mut self, strict: bool) -> Self {
        self.strict_checksum = strict;
        self
    }

    /// Allow or reject empty images.
    #[must_use]
    pub fn with_allow_empty(mut self, allow: bool) -> Self {
        self.allow_empty = allow;
        self
    }
}

/// Layout rules a sequence of records can violate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructureError {
    /// A data record does not start at the write cursor.
    #[error(
        "data at 0x{found:06X} does not follow the previous record (expected 0x{expected:06X})"
    )]
    NonContiguousData {
        /// Cursor position.
        expected: u32,
        /// Absolute address of the record.
        found: u32,
    },
    /// An extended address record moves the segment away from the cursor.
    #[error("extended address 0x{offset:06X} does not continue the image at 0x{cursor:06X}")]
    NonContiguousSegment {
        /// Requested segment base.
        offset: u32,
        /// Cursor position.
        cursor: u32,
    },
    /// A record type outside data, end-of-file and extended address.
    #[error("unsupported record type 0x{0:02X}")]
    UnsupportedRecord(u8),
    /// Input ended without an end-of-file record.
    #[error("missing end-of-file record")]
    MissingEndOfFile,
    /// Image length disagrees with the data byte counts.
    #[error("image length {total} does not match {counted} data bytes")]
    LengthMismatch {
        /// Final cursor position.
        total: u32,
        /// Sum of all data record byte counts.
        counted: u64,
    },
}

/// Segment base introduced by an extended address record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AddressSegment {
    /// Offset added to the addresses of following data records.
    pub base_offset: u32,
    /// Line that selected the segment; 0 for the implicit first segment.
    pub line: usize,
}

/// Contiguous program bytes starting at address zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramImage {
    data: Vec<u8>,
    segments: Vec<AddressSegment>,
    source: String,
}

impl ProgramImage {
    /// Parse a HEX file.
    pub fn from_file<P: AsRef<Path>>(path: P, options: HexOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), path.display().to_string(), options)
    }

    /// Parse HEX text from any buffered reader.
    ///
    /// Reading stops at the end-of-file record; later lines are never read.
    pub fn from_reader<R: BufRead>(
        reader: R,
        source: impl Into<String>,
        options: HexOptions,
    ) -> Result<Self> {
        let mut builder = ProgramImageBuilder::new(source, options);
        for (index, line) in reader.lines().enumerate() {
            builder.push_line(index + 1, &line?)?;
            if builder.is_complete() {
                break;
            }
        }
        builder.finish()
    }

    /// Parse HEX text held in memory.
    pub fn parse_str(text: &str, options: HexOptions) -> Result<Self> {
        Self::from_reader(text.as_bytes(), "<memory>", options)
    }

    /// Program bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of program bytes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn total_bytes(&self) -> u32 {
        // The builder tracks the cursor as u32, so the length always fits.
        self.data.len() as u32
    }

    /// Segments in the order they were selected.
    pub fn segments(&self) -> &[AddressSegment] {
        &self.segments
    }

    /// Where the image came from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of blocks of `block_size` bytes needed for the image.
    pub fn block_count(&self, block_size: u16) -> Result<usize> {
        let size = non_zero(block_size)?;
        Ok(self.data.len().div_ceil(size))
    }

    /// Image length rounded up to whole blocks.
    pub fn padded_len(&self, block_size: u16) -> Result<usize> {
        Ok(self.block_count(block_size)? * usize::from(block_size))
    }

    /// Split the image into blocks of exactly `block_size` bytes.
    ///
    /// The last block is padded with `0x00`.
    pub fn chunks(&self, block_size: u16) -> Result<Blocks<'_>> {
        let size = non_zero(block_size)?;
        Ok(Blocks {
            inner: self.data.chunks(size),
            size,
        })
    }
}

fn non_zero(block_size: u16) -> Result<usize> {
    if block_size == 0 {
        return Err(Error::InvalidBlockSize(block_size));
    }
    Ok(usize::from(block_size))
}

/// Iterator over fixed-size program blocks.
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    inner: std::slice::Chunks<'a, u8>,
    size: usize,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = Cow<'a, [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.inner.next()?;
        if chunk.len() == self.size {
            return Some(Cow::Borrowed(chunk));
        }
        let mut padded = chunk.to_vec();
        padded.resize(self.size, 0x00);
        Some(Cow::Owned(padded))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Blocks<'_> {}

/// Incremental image builder.
///
/// Feed records with [`push`](Self::push) or raw lines with
/// [`push_line`](Self::push_line), then call [`finish`](Self::finish).
#[derive(Debug)]
pub struct ProgramImageBuilder {
    source: String,
    options: HexOptions,
    data: Vec<u8>,
    segments: Vec<AddressSegment>,
    current_offset: u32,
    cursor: u32,
    counted: u64,
    last_line: usize,
    complete: bool,
}

impl ProgramImageBuilder {
    /// Start a new image.
    pub fn new(source: impl Into<String>, options: HexOptions) -> Self {
        Self {
            source: source.into(),
            options,
            data: Vec::new(),
            segments: vec![AddressSegment {
                base_offset: 0,
                line: 0,
            }],
            current_offset: 0,
            cursor: 0,
            counted: 0,
            last_line: 0,
            complete: false,
        }
    }

    /// Whether the end-of-file record has been seen.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Decode and consume one line of text.
    ///
    /// Blank lines are skipped, as is anything before the `:` start code.
    pub fn push_line(&mut self, line: usize, text: &str) -> Result<()> {
        self.last_line = line;
        let text = text.trim_end_matches(['\r', '\n']);
        if text.trim().is_empty() {
            return Ok(());
        }

        let start = text
            .find(START_CODE)
            .ok_or_else(|| self.format_error(line, FormatError::MissingStartCode))?;
        let record =
            HexRecord::decode(&text[start..]).map_err(|kind| self.format_error(line, kind))?;
        self.push(line, record)
    }

    /// Consume one decoded record.
    pub fn push(&mut self, line: usize, record: HexRecord) -> Result<()> {
        self.last_line = self.last_line.max(line);
        if self.complete {
            trace!("{}:{line}: ignoring record after end of file", self.source);
            return Ok(());
        }

        if !record.checksum_ok() {
            let kind = FormatError::ChecksumMismatch {
                stored: record.checksum,
                computed: record.computed_checksum(),
            };
            if self.options.strict_checksum {
                return Err(self.format_error(line, kind));
            }
            warn!("{}:{line}: {kind}", self.source);
        }

        match record.record_type {
            RecordType::Data => {
                let absolute = self.current_offset + u32::from(record.address);
                if absolute != self.cursor {
                    return Err(self.structure_error(
                        line,
                        StructureError::NonContiguousData {
                            expected: self.cursor,
                            found: absolute,
                        },
                    ));
                }
                self.data.extend_from_slice(&record.payload);
                self.cursor += u32::from(record.byte_count);
                self.counted += u64::from(record.byte_count);
            },
            RecordType::ExtendedAddress => {
                let offset = record
                    .extended_offset()
                    .map_err(|kind| self.format_error(line, kind))?;
                if offset != self.cursor {
                    return Err(self.structure_error(
                        line,
                        StructureError::NonContiguousSegment {
                            offset,
                            cursor: self.cursor,
                        },
                    ));
                }
                trace!("{}:{line}: segment base 0x{offset:06X}", self.source);
                self.current_offset = offset;
                self.segments.push(AddressSegment {
                    base_offset: offset,
                    line,
                });
            },
            RecordType::EndOfFile => {
                self.complete = true;
            },
            RecordType::Unsupported(code) => {
                return Err(self.structure_error(line, StructureError::UnsupportedRecord(code)));
            },
        }
        Ok(())
    }

    /// Validate the totals and produce the image.
    pub fn finish(self) -> Result<ProgramImage> {
        if !self.complete {
            return Err(self.structure_error(self.last_line, StructureError::MissingEndOfFile));
        }
        if u64::from(self.cursor) != self.counted || self.data.len() as u64 != self.counted {
            return Err(self.structure_error(
                self.last_line,
                StructureError::LengthMismatch {
                    total: self.cursor,
                    counted: self.counted,
                },
            ));
        }
        if self.data.is_empty() && !self.options.allow_empty {
            return Err(Error::EmptyImage(self.source));
        }

        debug!(
            "Parsed {}: {} bytes in {} segment(s)",
            self.source,
            self.data.len(),
            self.segments.len()
        );

        Ok(ProgramImage {
            data: self.data,
            segments: self.segments,
            source: self.source,
        })
    }

    fn format_error(&self, line: usize, kind: FormatError) -> Error {
        Error::HexFormat {
            source_name: self.source.clone(),
            line,
            kind,
        }
    }

    fn structure_error(&self, line: usize, kind: StructureError) -> Error {
        Error::HexStructure {
            source_name: self.source.clone(),
            line,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;
    use std::io::Write as _;

    /// Render one record with a correct checksum.
    fn record(record_type: u8, address: u16, payload: &[u8]) -> String {
        let rec = HexRecord {
            record_type: RecordType::from(record_type),
            byte_count: payload.len() as u8,
            address,
            payload: payload.to_vec(),
            checksum: 0,
        };
        let mut line = format!(":{:02X}{address:04X}{record_type:02X}", payload.len());
        for b in payload {
            write!(line, "{b:02X}").unwrap();
        }
        write!(line, "{:02X}", rec.computed_checksum()).unwrap();
        line
    }

    fn eof() -> String {
        ":00000001FF".to_string()
    }

    fn parse(lines: &[String]) -> Result<ProgramImage> {
        ProgramImage::parse_str(&lines.join("\n"), HexOptions::default())
    }

    #[test]
    fn test_sequential_records_concatenate() {
        let image = parse(&[
            record(0, 0x0000, &[1, 2, 3, 4]),
            record(0, 0x0004, &[5, 6]),
            record(0, 0x0006, &[7, 8, 9]),
            eof(),
        ])
        .unwrap();
        assert_eq!(image.total_bytes(), 9);
        assert_eq!(image.data(), &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(image.segments().len(), 1);
    }

    #[test]
    fn test_gap_is_rejected() {
        let err = parse(&[
            record(0, 0x0000, &[1, 2, 3, 4]),
            record(0, 0x0008, &[5, 6]),
            eof(),
        ])
        .unwrap_err();
        match err {
            Error::HexStructure { line, kind, .. } => {
                assert_eq!(line, 2);
                assert_eq!(
                    kind,
                    StructureError::NonContiguousData {
                        expected: 4,
                        found: 8
                    }
                );
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_overlap_is_rejected() {
        let err = parse(&[
            record(0, 0x0000, &[1, 2, 3, 4]),
            record(0, 0x0002, &[5, 6]),
            eof(),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            Error::HexStructure {
                kind: StructureError::NonContiguousData { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_extended_address_at_cursor() {
        // Fill exactly one 64 KiB segment, then switch to segment 0x1000.
        let mut lines = Vec::new();
        for address in (0..=0xFFF0u32).step_by(16) {
            lines.push(record(0, address as u16, &[0xA5; 16]));
        }
        lines.push(record(2, 0x0000, &[0x10, 0x00]));
        lines.push(record(0, 0x0000, &[0x5A, 0x5A]));
        lines.push(eof());

        let image = parse(&lines).unwrap();
        assert_eq!(image.total_bytes(), 0x1_0002);
        assert_eq!(image.data()[0x1_0000], 0x5A);
        assert_eq!(image.segments()[1].base_offset, 0x1_0000);
        assert_eq!(image.segments()[1].line, 4097);
    }

    #[test]
    fn test_extended_address_away_from_cursor() {
        let err = parse(&[
            record(0, 0x0000, &[1, 2]),
            record(2, 0x0000, &[0x10, 0x00]),
            record(0, 0x0000, &[3, 4]),
            eof(),
        ])
        .unwrap_err();
        match err {
            Error::HexStructure { line, kind, .. } => {
                assert_eq!(line, 2);
                assert_eq!(
                    kind,
                    StructureError::NonContiguousSegment {
                        offset: 0x1_0000,
                        cursor: 2
                    }
                );
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unsupported_record_type() {
        let err = parse(&[
            record(0, 0x0000, &[1, 2]),
            record(4, 0x0000, &[0x00, 0x01]),
            eof(),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            Error::HexStructure {
                line: 2,
                kind: StructureError::UnsupportedRecord(4),
                ..
            }
        ));
    }

    #[test]
    fn test_missing_end_of_file() {
        let err = parse(&[record(0, 0x0000, &[1, 2])]).unwrap_err();
        assert!(matches!(
            err,
            Error::HexStructure {
                kind: StructureError::MissingEndOfFile,
                ..
            }
        ));
    }

    #[test]
    fn test_lines_after_end_of_file_are_not_read() {
        let text = format!("{}\n{}\nthis is not hex\n", record(0, 0, &[9]), eof());
        let image = ProgramImage::parse_str(&text, HexOptions::default()).unwrap();
        assert_eq!(image.data(), &[9]);
    }

    #[test]
    fn test_prefix_and_blank_lines_are_skipped() {
        let text = format!("\n  {}\r\n\r\n{}\r\n", record(0, 0, &[1, 2, 3]), eof());
        let image = ProgramImage::parse_str(&text, HexOptions::default()).unwrap();
        assert_eq!(image.data(), &[1, 2, 3]);
    }

    #[test]
    fn test_line_without_start_code() {
        let err = ProgramImage::parse_str("garbage\n:00000001FF\n", HexOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::HexFormat {
                line: 1,
                kind: FormatError::MissingStartCode,
                ..
            }
        ));
    }

    #[test]
    fn test_checksum_lenient_and_strict() {
        let text = ":0300300002337A1F\n:00000001FF\n".replace(":030030", ":030000");
        let lenient = ProgramImage::parse_str(&text, HexOptions::default()).unwrap();
        assert_eq!(lenient.data(), &[0x02, 0x33, 0x7A]);

        let strict = HexOptions::default().with_strict_checksum(true);
        let err = ProgramImage::parse_str(&text, strict).unwrap_err();
        assert!(matches!(
            err,
            Error::HexFormat {
                line: 1,
                kind: FormatError::ChecksumMismatch { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_empty_image() {
        let err = parse(&[eof()]).unwrap_err();
        assert!(matches!(err, Error::EmptyImage(_)));

        let allow = HexOptions::default().with_allow_empty(true);
        let image = ProgramImage::parse_str(":00000001FF\n", allow).unwrap();
        assert_eq!(image.total_bytes(), 0);
        assert_eq!(image.block_count(64).unwrap(), 0);
    }

    #[test]
    fn test_chunks_pad_last_block() {
        let image = parse(&[record(0, 0, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]), eof()]).unwrap();
        assert_eq!(image.block_count(4).unwrap(), 3);
        assert_eq!(image.padded_len(4).unwrap(), 12);

        let blocks: Vec<_> = image.chunks(4).unwrap().collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(&*blocks[0], &[1, 2, 3, 4]);
        assert_eq!(&*blocks[1], &[5, 6, 7, 8]);
        assert_eq!(&*blocks[2], &[9, 10, 0, 0]);
        assert!(matches!(blocks[0], Cow::Borrowed(_)));
    }

    #[test]
    fn test_zero_block_size() {
        let image = parse(&[record(0, 0, &[1]), eof()]).unwrap();
        assert!(matches!(image.block_count(0), Err(Error::InvalidBlockSize(0))));
        assert!(image.chunks(0).is_err());
    }

    #[test]
    fn test_sixteen_byte_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, ":10000000000102030405060708090A0B0C0D0E0F78").unwrap();
        writeln!(file, ":00000001FF").unwrap();

        let image = ProgramImage::from_file(file.path(), HexOptions::default()).unwrap();
        assert_eq!(image.total_bytes(), 16);
        assert_eq!(image.data()[15], 0x0F);
        assert_eq!(image.block_count(16).unwrap(), 1);
        assert_eq!(image.block_count(7).unwrap(), 3);
        assert_eq!(image.source(), file.path().display().to_string());
    }

    #[test]
    fn test_builder_incremental() {
        let mut builder = ProgramImageBuilder::new("fc.hex", HexOptions::default());
        builder
            .push(1, HexRecord::decode(&record(0, 0, &[0xAA, 0xBB])).unwrap())
            .unwrap();
        assert!(!builder.is_complete());
        builder.push(2, HexRecord::decode(&eof()).unwrap()).unwrap();
        assert!(builder.is_complete());
        let image = builder.finish().unwrap();
        assert_eq!(image.data(), &[0xAA, 0xBB]);
        assert_eq!(image.source(), "fc.hex");
    }

    #[test]
    fn test_structure_error_messages() {
        assert_eq!(
            StructureError::UnsupportedRecord(4).to_string(),
            "unsupported record type 0x04"
        );
        assert_eq!(
            StructureError::LengthMismatch {
                total: 16,
                counted: 12
            }
            .to_string(),
            "image length 16 does not match 12 data bytes"
        );
        let source: &dyn std::error::Error = &StructureError::MissingEndOfFile;
        assert_eq!(source.to_string(), "missing end-of-file record");
    }
}
