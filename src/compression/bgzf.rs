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
use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::compression::CompressionLevel;
use crate::error::{CorruptionError, FormatError, Result, TruncatedStreamError, ValidationError};
use crate::headers::block::{
    decode_block_footer, decode_block_header, encode_block_footer, encode_block_header, find_block_len,
    BGZF_FOOTER_LEN, BGZF_HEADER_LEN, GZIP_HEADER_LEN, MAX_BLOCK_LEN,
};

/// Compress `payload` into a single BGZF block.
///
/// Fails with [ValidationError::BlockTooLarge] if the compressed block does
/// not fit in [MAX_BLOCK_LEN] bytes. Payloads of at most
/// [MAX_BLOCK_PAYLOAD](crate::compression::MAX_BLOCK_PAYLOAD) bytes always fit.
///
/// ## Usage
/// ```rust
/// use lazybam::compression::{compress_block, decompress_block, CompressionLevel};
///
/// let payload = b"ACGTACGTACGTACGT".repeat(100);
/// let block = compress_block(&payload, CompressionLevel::default()).unwrap();
///
/// let (got, consumed) = decompress_block(&block, 0).unwrap();
/// assert_eq!(got, payload);
/// assert_eq!(consumed, block.len());
/// ```
///
pub fn compress_block(
    payload: &[u8],
    level: CompressionLevel,
) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(payload.len() / 2 + 64), level.into());
    encoder.write_all(payload)?;
    let cdata = encoder.finish()?;

    let block_len = BGZF_HEADER_LEN + cdata.len() + BGZF_FOOTER_LEN;
    if block_len > MAX_BLOCK_LEN {
        return Err(ValidationError::BlockTooLarge(block_len).into());
    }

    let mut block: Vec<u8> = Vec::with_capacity(block_len);
    encode_block_header(block_len, &mut block)?;
    block.extend_from_slice(&cdata);
    encode_block_footer(crc32fast::hash(payload), payload.len() as u32, &mut block)?;

    Ok(block)
}

/// Decompress the BGZF block at the start of `bytes`.
///
/// `offset` is the position of the block in its stream and is only used in
/// error messages. Returns the payload and the number of bytes consumed.
pub fn decompress_block(
    bytes: &[u8],
    offset: u64,
) -> Result<(Vec<u8>, usize)> {
    if bytes.len() < GZIP_HEADER_LEN {
        return Err(TruncatedStreamError::PartialBlock {
            offset,
            available: bytes.len(),
            expected: GZIP_HEADER_LEN,
        }.into());
    }
    let header = decode_block_header(&bytes[..GZIP_HEADER_LEN], offset)?;

    let data_start = GZIP_HEADER_LEN + header.xlen as usize;
    if bytes.len() < data_start {
        return Err(TruncatedStreamError::PartialBlock {
            offset,
            available: bytes.len(),
            expected: data_start,
        }.into());
    }
    let block_len = find_block_len(&bytes[GZIP_HEADER_LEN..data_start], offset)?;
    if block_len < data_start + BGZF_FOOTER_LEN {
        return Err(FormatError::InvalidBlockSize { offset, size: block_len }.into());
    }
    if bytes.len() < block_len {
        return Err(TruncatedStreamError::PartialBlock {
            offset,
            available: bytes.len(),
            expected: block_len,
        }.into());
    }

    let footer_start = block_len - BGZF_FOOTER_LEN;
    let footer = decode_block_footer(&bytes[footer_start..block_len])?;
    let payload = inflate(&bytes[data_start..footer_start], footer.isize as usize, offset)?;

    if payload.len() != footer.isize as usize {
        return Err(CorruptionError::SizeMismatch {
            offset,
            expected: footer.isize as usize,
            found: payload.len(),
        }.into());
    }
    let crc32 = crc32fast::hash(&payload);
    if crc32 != footer.crc32 {
        return Err(CorruptionError::ChecksumMismatch {
            offset,
            expected: footer.crc32,
            found: crc32,
        }.into());
    }

    Ok((payload, block_len))
}

// Reads at most `expected + 1` bytes so that an oversized stream is caught
// by the size check without inflating it completely.
fn inflate(
    cdata: &[u8],
    expected: usize,
    offset: u64,
) -> Result<Vec<u8>> {
    let mut payload: Vec<u8> = Vec::with_capacity(expected.min(MAX_BLOCK_LEN));
    DeflateDecoder::new(cdata)
        .take(expected as u64 + 1)
        .read_to_end(&mut payload)
        .map_err(|e| CorruptionError::Inflate { offset, message: e.to_string() })?;
    Ok(payload)
}

// Fill `buf` from `conn`, stopping early only at end of input.
fn read_up_to<R: Read>(
    conn: &mut R,
    buf: &mut [u8],
) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match conn.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Read the raw bytes of the next BGZF block from `conn`.
///
/// Returns `None` at a clean end of input, i.e. when no bytes remain before
/// the next block. A stream that ends inside a block is a
/// [TruncatedStreamError::PartialBlock].
pub fn read_block<R: Read>(
    conn: &mut R,
    offset: u64,
) -> Result<Option<Vec<u8>>> {
    let mut block: Vec<u8> = vec![0; GZIP_HEADER_LEN];
    let nread = read_up_to(conn, &mut block)?;
    if nread == 0 {
        return Ok(None);
    }
    if nread < GZIP_HEADER_LEN {
        return Err(TruncatedStreamError::PartialBlock {
            offset,
            available: nread,
            expected: GZIP_HEADER_LEN,
        }.into());
    }
    let header = decode_block_header(&block, offset)?;

    let data_start = GZIP_HEADER_LEN + header.xlen as usize;
    block.resize(data_start, 0);
    let nread = read_up_to(conn, &mut block[GZIP_HEADER_LEN..])?;
    if GZIP_HEADER_LEN + nread < data_start {
        return Err(TruncatedStreamError::PartialBlock {
            offset,
            available: GZIP_HEADER_LEN + nread,
            expected: data_start,
        }.into());
    }

    let block_len = find_block_len(&block[GZIP_HEADER_LEN..], offset)?;
    if block_len < data_start + BGZF_FOOTER_LEN {
        return Err(FormatError::InvalidBlockSize { offset, size: block_len }.into());
    }
    block.resize(block_len, 0);
    let nread = read_up_to(conn, &mut block[data_start..])?;
    if data_start + nread < block_len {
        return Err(TruncatedStreamError::PartialBlock {
            offset,
            available: data_start + nread,
            expected: block_len,
        }.into());
    }

    Ok(Some(block))
}
