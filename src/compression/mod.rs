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

//! BGZF block compression.
//!
//! BAM files are a series of independently compressed BGZF blocks. Each
//! block inflates on its own, which makes the block the unit of I/O and of
//! parallel decoding in [Reader](crate::decoder::Reader) and
//! [Writer](crate::encoder::Writer).
//!

pub mod bgzf;

pub use bgzf::compress_block;
pub use bgzf::decompress_block;

use crate::error::{Result, ValidationError};

/// Largest payload placed in a single block.
///
/// Matches htslib so that incompressible payloads still fit in
/// [MAX_BLOCK_LEN](crate::headers::block::MAX_BLOCK_LEN).
pub const MAX_BLOCK_PAYLOAD: usize = 0xff00;

/// Number of blocks inflated or deflated together on the rayon pool.
///
/// Each batch is processed in one go: the reader inflates its next window
/// only once the previous one is consumed, so decoding does not overlap
/// with the caller's use of the records.
pub const PARALLEL_BLOCK_COUNT: usize = 8;

/// The empty block that terminates every BGZF stream.
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff,
    0x06, 0x00, 0x42, 0x43, 0x02, 0x00, 0x1b, 0x00,
    0x03, 0x00,
    0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00,
];

/// DEFLATE compression level, 0 (store) to 9 (best).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    pub fn new(level: u32) -> Result<Self> {
        if level > 9 {
            return Err(ValidationError::CompressionLevel(level).into());
        }
        Ok(CompressionLevel(level))
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        CompressionLevel(6)
    }
}

impl From<CompressionLevel> for flate2::Compression {
    fn from(level: CompressionLevel) -> Self {
        flate2::Compression::new(level.0)
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn compression_level_bounds() {
        use super::CompressionLevel;

        assert_eq!(CompressionLevel::default().get(), 6);
        assert_eq!(CompressionLevel::new(0).unwrap().get(), 0);
        assert!(CompressionLevel::new(10).unwrap_err().is_validation());
    }

    #[test]
    fn eof_marker_is_an_empty_block() {
        use super::{decompress_block, BGZF_EOF};

        let (payload, consumed) = decompress_block(&BGZF_EOF, 0).unwrap();

        assert!(payload.is_empty());
        assert_eq!(consumed, 28);
    }
}
