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
use crate::compression::{compress_block, CompressionLevel, BGZF_EOF, MAX_BLOCK_PAYLOAD, PARALLEL_BLOCK_COUNT};
use crate::error::Result;

use std::io::Write;

use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;

/// Compressing writer for a BGZF stream.
///
/// Bytes are cut into payloads of [MAX_BLOCK_PAYLOAD] bytes. Full payloads
/// are queued and compressed [PARALLEL_BLOCK_COUNT] at a time on the rayon
/// pool, then written in order.
pub struct BlockWriter<W: Write> {
    conn: W,
    level: CompressionLevel,

    // Internals
    buf: Vec<u8>,
    queue: Vec<Vec<u8>>,
    blocks_written: u64,
    bytes_written: u64,
}

impl<W: Write> BlockWriter<W> {
    pub fn new(
        conn: W,
        level: CompressionLevel,
    ) -> Self {
        BlockWriter {
            conn,
            level,
            buf: Vec::with_capacity(MAX_BLOCK_PAYLOAD),
            queue: Vec::with_capacity(PARALLEL_BLOCK_COUNT),
            blocks_written: 0,
            bytes_written: 0,
        }
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn write(
        &mut self,
        bytes: &[u8],
    ) -> Result<()> {
        self.buf.extend_from_slice(bytes);
        while self.buf.len() >= MAX_BLOCK_PAYLOAD {
            let rest = self.buf.split_off(MAX_BLOCK_PAYLOAD);
            let payload = std::mem::replace(&mut self.buf, rest);
            self.queue.push(payload);
            if self.queue.len() >= PARALLEL_BLOCK_COUNT {
                self.write_queue()?;
            }
        }
        Ok(())
    }

    /// End the current block and write every queued block.
    pub fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            let payload = std::mem::take(&mut self.buf);
            self.queue.push(payload);
        }
        self.write_queue()
    }

    fn write_queue(&mut self) -> Result<()> {
        let level = self.level;
        let blocks: Vec<Result<Vec<u8>>> = self.queue.par_iter().map(|payload| {
            compress_block(payload, level)
        }).collect();
        self.queue.clear();

        for block in blocks {
            let block = block?;
            self.conn.write_all(&block)?;
            self.blocks_written += 1;
            self.bytes_written += block.len() as u64;
        }
        Ok(())
    }

    /// Write the remaining data and the end-of-file block.
    ///
    /// Returns the inner writer and the final block and byte counts, which
    /// include the end-of-file block.
    pub fn finish(mut self) -> Result<(W, u64, u64)> {
        self.flush()?;
        self.conn.write_all(&BGZF_EOF)?;
        self.blocks_written += 1;
        self.bytes_written += BGZF_EOF.len() as u64;
        self.conn.flush()?;
        Ok((self.conn, self.blocks_written, self.bytes_written))
    }
}
