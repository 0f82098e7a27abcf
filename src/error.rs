// lazybam: Streaming BAM decoding, sorting and chunk merging.
//
// Copyright 2025 Tommi Mäklin [tommi@maklin.fi].
//
// Copyrights in this project are retained by contributors. No copyright assignment
// is required to contribute to this project.
//
// Except as otherwise noted (below and/or in individual files), this
// project is licensed under the Apache License, Version 2.0
// <LICENSE-APACHE> or <http://www.apache.org/licenses/LICENSE-2.0> or
// the MIT license, <LICENSE-MIT> or <http://opensource.org/licenses/MIT>,
// at your option.
//

//! Error types.
//!
//! Every fallible operation in lazybam returns [Result], whose error type
//! [Error] falls into one of five categories:
//!
//!   - [FormatError]: structurally invalid input.
//!   - [CorruptionError]: integrity failure inside a compressed block.
//!   - [TruncatedStreamError]: a well-formed prefix with a missing suffix.
//!   - [ValidationError]: an in-memory record that cannot be encoded.
//!   - [std::io::Error]: failure of the underlying storage.
//!

/// Result type used throughout lazybam.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Structurally invalid input
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Checksum or size mismatch inside a compressed block
    #[error("Corrupted block: {0}")]
    Corruption(#[from] CorruptionError),

    /// The input ended early
    #[error("Truncated stream: {0}")]
    TruncatedStream(#[from] TruncatedStreamError),

    /// A record violates an invariant and cannot be encoded
    #[error("Invalid record: {0}")]
    Validation(#[from] ValidationError),

    /// Errors from the underlying reader or writer
    #[error("Error with IO: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }

    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }

    #[must_use]
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::TruncatedStream(_))
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// An error of the same class that reports `self` again.
    pub(crate) fn repeat(&self) -> Error {
        match self {
            Self::Format(e) => FormatError::Repeated(e.to_string()).into(),
            Self::Corruption(e) => CorruptionError::Repeated(e.to_string()).into(),
            Self::TruncatedStream(e) => TruncatedStreamError::Repeated(e.to_string()).into(),
            Self::Validation(e) => ValidationError::Repeated(e.to_string()).into(),
            Self::Io(e) => std::io::Error::new(e.kind(), format!("Stream failed earlier: {e}")).into(),
        }
    }
}

/// Errors for structurally invalid blocks, headers and records.
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    /// The block does not start with the gzip magic, deflate method and FEXTRA flag
    #[error("Invalid BGZF block magic at offset {offset}: {found:02x?}")]
    InvalidBlockMagic { offset: u64, found: [u8; 4] },

    /// The gzip extra field has no `BC` subfield
    #[error("Missing BSIZE subfield in BGZF block at offset {0}")]
    MissingBlockSize(u64),

    /// BSIZE is smaller than the fixed block overhead
    #[error("Invalid BGZF block size {size} at offset {offset}")]
    InvalidBlockSize { offset: u64, size: usize },

    /// The decompressed stream does not start with `BAM\1`
    #[error("Invalid BAM magic: {0:02x?}")]
    InvalidFileMagic([u8; 4]),

    /// A length field in the header is negative or overruns the header bytes
    #[error("Invalid {field} length {length} in header ({available} bytes available)")]
    InvalidHeaderLength {
        field: &'static str,
        length: i64,
        available: usize,
    },

    /// Bytes remain after the last reference entry
    #[error("Header has {0} trailing bytes")]
    TrailingHeaderBytes(usize),

    /// A string is missing its NUL terminator
    #[error("Missing NUL terminator in {0}")]
    MissingNulTerminator(&'static str),

    /// A string field is not valid UTF-8
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// The record's length prefix does not match its contents
    #[error("Record declares {declared} bytes but {actual} bytes were decoded")]
    RecordLengthMismatch { declared: usize, actual: usize },

    /// The record is shorter than its fixed-length fields
    #[error("Record length {0} is shorter than the fixed 32-byte block")]
    RecordTooShort(i64),

    /// An unknown CIGAR operation code
    #[error("Invalid CIGAR operation code {0}")]
    InvalidCigarOp(u8),

    /// An unknown tag type code
    #[error("Unknown type code '{type_code}' for tag {tag}")]
    UnknownTagType { tag: String, type_code: char },

    /// An unknown `B` array subtype
    #[error("Unknown array subtype '{subtype}' for tag {tag}")]
    UnknownArraySubtype { tag: String, subtype: char },

    /// A reference id outside the header's reference table
    #[error("Reference id {id} is outside the header's {n_refs} references")]
    InvalidReferenceId { id: i32, n_refs: usize },

    /// An `@SQ` line in SAM header text lacks a usable `SN` or `LN` field
    #[error("Invalid @SQ line {line} in SAM header: {reason}")]
    InvalidSamHeader { line: usize, reason: String },

    /// A chunk's header cannot be merged with the supplied header
    #[error("Incompatible header in chunk {chunk}: {reason}")]
    IncompatibleHeaders { chunk: String, reason: String },

    /// Fixed-width fields could not be decoded
    #[error("Could not decode fixed fields: {0}")]
    FixedFields(#[from] bincode::error::DecodeError),

    /// An earlier error stopped the stream
    #[error("Stream failed earlier: {0}")]
    Repeated(String),
}

/// Errors for integrity failures inside a BGZF block.
#[derive(thiserror::Error, Debug)]
pub enum CorruptionError {
    /// The CRC32 of the inflated payload does not match the block footer
    #[error("CRC32 mismatch in block at offset {offset}: expected {expected:#010x}, found {found:#010x}")]
    ChecksumMismatch { offset: u64, expected: u32, found: u32 },

    /// The inflated payload size does not match ISIZE
    #[error("Size mismatch in block at offset {offset}: expected {expected} bytes, found {found}")]
    SizeMismatch {
        offset: u64,
        expected: usize,
        found: usize,
    },

    /// The DEFLATE stream could not be inflated
    #[error("Invalid deflate data in block at offset {offset}: {message}")]
    Inflate { offset: u64, message: String },

    /// An earlier error stopped the stream
    #[error("Stream failed earlier: {0}")]
    Repeated(String),
}

/// Errors for streams that end before they are complete.
#[derive(thiserror::Error, Debug)]
pub enum TruncatedStreamError {
    /// The stream ended inside a BGZF block
    #[error("Partial BGZF block at offset {offset} ({available} of {expected} bytes)")]
    PartialBlock {
        offset: u64,
        available: usize,
        expected: usize,
    },

    /// The stream ended at a block boundary without the empty EOF block
    #[error("Missing BGZF end-of-file marker")]
    MissingEofMarker,

    /// The decompressed stream ended inside the header
    #[error("Stream ended inside the BAM header")]
    PartialHeader,

    /// The decompressed stream ended inside a record
    #[error("Partial record at end of stream ({available} of {expected} bytes)")]
    PartialRecord { available: usize, expected: usize },

    /// An earlier error stopped the stream
    #[error("Stream failed earlier: {0}")]
    Repeated(String),
}

/// Errors for records that violate an invariant before encoding.
#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("Sequence length ({sequence}) does not match quality length ({quality})")]
    SequenceQualityMismatch { sequence: usize, quality: usize },

    #[error("Reference id ({ref_id}) and position ({position}) disagree on whether the record is placed")]
    UnplacedMismatch { ref_id: i32, position: i32 },

    #[error("Reference id {id} is outside the header's {n_refs} references")]
    ReferenceOutOfRange { id: i32, n_refs: usize },

    #[error("Read name of {0} bytes exceeds the 254 byte limit")]
    NameTooLong(usize),

    #[error("Read name contains a NUL byte")]
    NameContainsNul,

    #[error("Record has {0} CIGAR operations, at most 65535 are supported")]
    TooManyCigarOps(usize),

    #[error("CIGAR operation length {0} exceeds 2^28 - 1")]
    CigarOpTooLong(u32),

    #[error("Invalid 4-bit base code {0}")]
    InvalidBaseCode(u8),

    #[error("Invalid base '{0}'")]
    InvalidBase(char),

    #[error("String value of tag {0} contains a NUL byte")]
    TagContainsNul(String),

    #[error("Array tag {tag} has {len} elements, at most {max} are supported")]
    ArrayTooLong { tag: String, len: usize, max: usize },

    #[error("Record of {0} bytes exceeds the maximum record size")]
    RecordTooLarge(usize),

    #[error("Compressed block of {0} bytes exceeds the 65536 byte BGZF limit")]
    BlockTooLarge(usize),

    #[error("Compression level {0} is outside 0..=9")]
    CompressionLevel(u32),

    /// An earlier error stopped the stream
    #[error("Stream failed earlier: {0}")]
    Repeated(String),
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn classify_errors() {
        use super::{Error, FormatError, TruncatedStreamError, ValidationError};

        let format: Error = FormatError::InvalidFileMagic(*b"BAM\x02").into();
        let truncated: Error = TruncatedStreamError::MissingEofMarker.into();
        let validation: Error = ValidationError::NameTooLong(300).into();

        assert!(format.is_format());
        assert!(!format.is_truncated());
        assert!(truncated.is_truncated());
        assert!(validation.is_validation());
        assert!(!validation.is_io());
    }

    #[test]
    fn repeat_keeps_class_and_message() {
        use super::{Error, FormatError, TruncatedStreamError};

        let format: Error = FormatError::InvalidCigarOp(12).into();
        let truncated: Error = TruncatedStreamError::MissingEofMarker.into();
        let io: Error = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "gone").into();

        assert!(format.repeat().is_format());
        assert!(format.repeat().to_string().contains("CIGAR operation code 12"));
        assert!(truncated.repeat().is_truncated());
        assert!(io.repeat().is_io());
    }

    #[test]
    fn error_messages_carry_context() {
        use super::{CorruptionError, FormatError};

        let got = CorruptionError::ChecksumMismatch { offset: 28, expected: 0xdeadbeef, found: 0 }.to_string();
        assert!(got.contains("0xdeadbeef"));
        assert!(got.contains("28"));

        let got = FormatError::UnknownTagType { tag: "XY".to_string(), type_code: 'q' }.to_string();
        assert!(got.contains("XY"));
        assert!(got.contains('q'));
    }

    #[test]
    fn io_error_converts() {
        use super::Error;

        let err: Error = std::io::Error::other("disk full").into();
        assert!(err.is_io());
        assert!(err.to_string().contains("disk full"));
    }
}
