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
use bincode::{Encode, Decode};

use crate::error::{FormatError, Result};
use crate::headers::{decode_fixed, encode_fixed};

/// gzip ID1 and ID2.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// DEFLATE compression method.
pub const CM_DEFLATE: u8 = 8;

/// FEXTRA bit of the gzip FLG byte.
pub const FLG_FEXTRA: u8 = 0x04;

/// Bytes in the fixed part of the gzip header, up to and including XLEN.
pub const GZIP_HEADER_LEN: usize = 12;

/// Bytes in a BGZF header: the gzip header plus the 6-byte `BC` subfield.
pub const BGZF_HEADER_LEN: usize = 18;

/// Bytes in the CRC32 + ISIZE footer.
pub const BGZF_FOOTER_LEN: usize = 8;

/// Largest total size of a BGZF block.
pub const MAX_BLOCK_LEN: usize = 65536;

/// Fixed gzip header fields.
///
/// BGZF blocks always set FLG.FEXTRA, so XLEN is part of the fixed fields.
#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub id1: u8,
    pub id2: u8,
    pub cm: u8,
    pub flg: u8,
    pub mtime: u32,
    pub xfl: u8,
    pub os: u8,
    pub xlen: u16,
}

impl Default for BlockHeader {
    fn default() -> Self {
        BlockHeader {
            id1: GZIP_MAGIC[0],
            id2: GZIP_MAGIC[1],
            cm: CM_DEFLATE,
            flg: FLG_FEXTRA,
            mtime: 0,
            xfl: 0,
            os: 0xff,
            xlen: 6,
        }
    }
}

impl BlockHeader {
    pub fn is_bgzf(&self) -> bool {
        self.id1 == GZIP_MAGIC[0]
            && self.id2 == GZIP_MAGIC[1]
            && self.cm == CM_DEFLATE
            && self.flg & FLG_FEXTRA != 0
    }
}

/// The `BC` extra subfield carrying the total block size minus one.
#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSize {
    pub si1: u8,
    pub si2: u8,
    pub slen: u16,
    pub bsize: u16,
}

impl BlockSize {
    pub fn new(block_len: usize) -> Self {
        BlockSize { si1: b'B', si2: b'C', slen: 2, bsize: (block_len - 1) as u16 }
    }
}

/// CRC32 and uncompressed size of the payload.
#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFooter {
    pub crc32: u32,
    pub isize: u32,
}

pub fn encode_block_header(
    block_len: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    let nbytes = encode_fixed(&BlockHeader::default(), out)?
        + encode_fixed(&BlockSize::new(block_len), out)?;
    debug_assert_eq!(nbytes, BGZF_HEADER_LEN);
    Ok(())
}

/// Decode the fixed gzip header from the first [GZIP_HEADER_LEN] bytes.
///
/// Fails with [FormatError::InvalidBlockMagic] if the bytes are not the
/// start of a BGZF block.
pub fn decode_block_header(
    header_bytes: &[u8],
    offset: u64,
) -> Result<BlockHeader> {
    let header: BlockHeader = decode_fixed(&header_bytes[..GZIP_HEADER_LEN])?;
    if !header.is_bgzf() {
        let mut found = [0_u8; 4];
        found.copy_from_slice(&header_bytes[..4]);
        return Err(FormatError::InvalidBlockMagic { offset, found }.into());
    }
    Ok(header)
}

/// Find BSIZE among the gzip extra subfields.
///
/// Returns the total block length (BSIZE + 1).
pub fn find_block_len(
    extra: &[u8],
    offset: u64,
) -> Result<usize> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let slen = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        if extra[pos] == b'B' && extra[pos + 1] == b'C' && slen == 2 && pos + 6 <= extra.len() {
            let subfield: BlockSize = decode_fixed(&extra[pos..(pos + 6)])?;
            return Ok(subfield.bsize as usize + 1);
        }
        pos += 4 + slen;
    }
    Err(FormatError::MissingBlockSize(offset).into())
}

pub fn encode_block_footer(
    crc32: u32,
    isize: u32,
    out: &mut Vec<u8>,
) -> Result<()> {
    let nbytes = encode_fixed(&BlockFooter { crc32, isize }, out)?;
    debug_assert_eq!(nbytes, BGZF_FOOTER_LEN);
    Ok(())
}

pub fn decode_block_footer(
    footer_bytes: &[u8],
) -> Result<BlockFooter> {
    decode_fixed(footer_bytes)
}
