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

//! Block and file headers of the BAM format.
//!
//! Consists of the [BlockHeader](block::BlockHeader) that starts every BGZF
//! block and the [Header](file::Header) that starts the decompressed BAM
//! stream.
//!
//! ## BGZF block header
//!
//! A BGZF block is a gzip member with the FEXTRA flag set and a `BC` extra
//! subfield that stores the total size of the block minus one (BSIZE):
//!
//! - 10 bytes: gzip ID1, ID2, CM, FLG, MTIME, XFL, OS.
//! - 2 bytes: XLEN, the length of the extra field.
//! - XLEN bytes: extra subfields, one of which is `BC` with a 2-byte BSIZE.
//!
//! The header is followed by the raw DEFLATE data and an 8-byte footer
//! holding the CRC32 and the uncompressed size (ISIZE) of the payload.
//!
//! Blocks written by lazybam always have XLEN = 6 and carry only the `BC`
//! subfield, giving an 18-byte header.
//!
//! ## BAM header
//!
//! The decompressed stream starts with:
//!
//! - 4 bytes: magic `BAM\1`.
//! - 4 bytes: length of the SAM header text.
//! - The SAM header text.
//! - 4 bytes: number of reference sequences.
//! - For each reference: name length including the NUL terminator, the
//!   NUL-terminated name, and the reference length.
//!
//! All integers are little-endian.
//!

pub mod block;
pub mod file;

use crate::error::{Error, FormatError, Result};

/// Little-endian fixed-width integer encoding used for the fixed header fields.
pub(crate) fn fixed_int_config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

pub(crate) fn encode_fixed<T: bincode::Encode>(
    value: &T,
    out: &mut Vec<u8>,
) -> Result<usize> {
    bincode::encode_into_std_write(value, out, fixed_int_config())
        .map_err(|e| Error::Io(std::io::Error::other(e)))
}

pub(crate) fn decode_fixed<T: bincode::Decode<()>>(
    bytes: &[u8],
) -> Result<T> {
    let (value, _) = bincode::decode_from_slice(bytes, fixed_int_config()).map_err(FormatError::from)?;
    Ok(value)
}
