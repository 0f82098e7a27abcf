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
use crate::compression::bgzf::read_block;
use crate::compression::decompress_block;
use crate::error::{Error, Result, TruncatedStreamError};

use std::collections::VecDeque;
use std::io::Read;

use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;

/// Decompressed view of a BGZF stream.
///
/// Raw blocks are read sequentially in windows of `prefetch_blocks`, each
/// window is inflated on the rayon pool, and the payloads are handed out in
/// stream order. The next window is read only when the current one is used
/// up. An error in a block is returned only after the payloads
/// of every earlier block have been consumed.
pub struct BlockReader<R: Read> {
    conn: R,
    prefetch_blocks: usize,

    // Offset of the next raw block in `conn`
    offset: u64,
    payloads: VecDeque<Vec<u8>>,
    current: Vec<u8>,
    pos: usize,
    pending: Option<Error>,
    last_block_empty: bool,
    finished: bool,
    blocks_read: u64,
}

impl<R: Read> BlockReader<R> {
    pub fn new(
        conn: R,
        prefetch_blocks: usize,
    ) -> Self {
        BlockReader {
            conn,
            prefetch_blocks: prefetch_blocks.max(1),
            offset: 0,
            payloads: VecDeque::new(),
            current: Vec::new(),
            pos: 0,
            pending: None,
            last_block_empty: false,
            finished: false,
            blocks_read: 0,
        }
    }

    /// Number of blocks inflated so far, including prefetched blocks.
    pub fn blocks_read(&self) -> u64 {
        self.blocks_read
    }

    /// Append up to `n` decompressed bytes to `out`.
    ///
    /// Returns the number of bytes appended, which is less than `n` only at
    /// the end of a complete stream.
    pub fn read_bytes(
        &mut self,
        n: usize,
        out: &mut Vec<u8>,
    ) -> Result<usize> {
        let mut nread = 0;
        while nread < n {
            if self.pos == self.current.len() {
                if !self.next_payload()? {
                    break;
                }
                continue;
            }
            let len = (n - nread).min(self.current.len() - self.pos);
            out.extend_from_slice(&self.current[self.pos..(self.pos + len)]);
            self.pos += len;
            nread += len;
        }
        Ok(nread)
    }

    fn next_payload(&mut self) -> Result<bool> {
        loop {
            if let Some(payload) = self.payloads.pop_front() {
                self.current = payload;
                self.pos = 0;
                return Ok(true);
            }
            if let Some(e) = self.pending.take() {
                self.finished = true;
                return Err(e);
            }
            if self.finished {
                return Ok(false);
            }
            self.fill();
        }
    }

    // Read and inflate the next window. Always leaves a payload, a pending
    // error or the finished state behind.
    fn fill(&mut self) {
        let mut raw: Vec<(u64, Vec<u8>)> = Vec::with_capacity(self.prefetch_blocks);
        let mut read_error: Option<Error> = None;
        let mut at_eof = false;
        while raw.len() < self.prefetch_blocks {
            match read_block(&mut self.conn, self.offset) {
                Ok(Some(block)) => {
                    let offset = self.offset;
                    self.offset += block.len() as u64;
                    raw.push((offset, block));
                },
                Ok(None) => {
                    at_eof = true;
                    break;
                },
                Err(e) => {
                    read_error = Some(e);
                    break;
                },
            }
        }

        let inflated: Vec<Result<(Vec<u8>, usize)>> = raw.par_iter().map(|(offset, block)| {
            decompress_block(block, *offset)
        }).collect();

        for result in inflated {
            match result {
                Ok((payload, _)) => {
                    self.last_block_empty = payload.is_empty();
                    self.blocks_read += 1;
                    self.payloads.push_back(payload);
                },
                Err(e) => {
                    self.pending = Some(e);
                    return;
                },
            }
        }

        if let Some(e) = read_error {
            self.pending = Some(e);
        } else if at_eof {
            if self.last_block_empty {
                log::debug!("Reached BGZF end-of-file marker after {} blocks", self.blocks_read);
                self.finished = true;
            } else {
                self.pending = Some(TruncatedStreamError::MissingEofMarker.into());
            }
        }
    }
}
