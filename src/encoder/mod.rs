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
pub mod blocks;

use crate::compression::CompressionLevel;
use crate::encoder::blocks::BlockWriter;
use crate::error::{Result, ValidationError};
use crate::headers::file::Header;
use crate::record::codec::encode_into;
use crate::record::AlignmentRecord;
use crate::sort::sort_records;

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Counts reported after a complete write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteResult {
    pub records_written: u64,
    /// BGZF blocks, including the end-of-file block.
    pub blocks_written: u64,
    /// Compressed bytes.
    pub bytes_written: u64,
}

/// Configures a [Writer] or [ChunkWriter].
///
/// ## Usage
/// ```rust
/// use lazybam::encoder::WriterBuilder;
/// use lazybam::headers::file::{Header, Reference};
/// use lazybam::record::RecordBuilder;
///
/// let header = Header::new(b"", vec![Reference::new("chr1", 1000)]);
/// let records = vec![
///     RecordBuilder::new().query_name("b").flag(0).ref_id(0).position(50).build().unwrap(),
///     RecordBuilder::new().query_name("a").flag(0).ref_id(0).position(10).build().unwrap(),
/// ];
///
/// let dir = tempfile::tempdir().unwrap();
/// let dest = dir.path().join("chunk.bam");
///
/// let result = WriterBuilder::new()
///     .compression_level(1)
///     .sort(true)
///     .write_chunk(&header, records, &dest)
///     .unwrap();
/// assert_eq!(result.records_written, 2);
/// assert!(dest.exists());
/// ```
///
#[derive(Debug, Clone, Copy)]
pub struct WriterBuilder {
    compression_level: u32,
    sort: bool,
}

impl Default for WriterBuilder {
    fn default() -> Self {
        WriterBuilder { compression_level: CompressionLevel::default().get(), sort: false }
    }
}

impl WriterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// DEFLATE level 0-9, checked when the writer is created.
    #[must_use]
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Stably sort records by coordinate in [write_chunk](WriterBuilder::write_chunk).
    #[must_use]
    pub fn sort(mut self, sort: bool) -> Self {
        self.sort = sort;
        self
    }

    pub fn sorts(&self) -> bool {
        self.sort
    }

    pub fn build<W: Write>(
        self,
        conn: W,
        header: &Header,
    ) -> Result<Writer<W>> {
        Writer::with_level(conn, header, CompressionLevel::new(self.compression_level)?)
    }

    pub fn create<P: AsRef<Path>>(
        self,
        destination: P,
        header: &Header,
    ) -> Result<ChunkWriter> {
        ChunkWriter::create(destination, header, CompressionLevel::new(self.compression_level)?)
    }

    /// Write `records` to `destination` as one BAM file.
    ///
    /// The file appears under `destination` only if every record was
    /// written.
    pub fn write_chunk<P: AsRef<Path>>(
        self,
        header: &Header,
        mut records: Vec<AlignmentRecord>,
        destination: P,
    ) -> Result<WriteResult> {
        if self.sort {
            sort_records(&mut records);
        }
        let mut writer = self.create(destination.as_ref(), header)?;
        writer.write_all(&records)?;
        writer.finish()
    }
}

/// Writes a BAM stream into any [Write].
///
/// The header is written on creation and ends its own block. Records are
/// checked against the header's reference table before they are encoded.
pub struct Writer<W: Write> {
    blocks: BlockWriter<W>,
    n_refs: usize,

    // Internals
    buf: Vec<u8>,
    records_written: u64,
}

impl<W: Write> Writer<W> {
    pub fn new(
        conn: W,
        header: &Header,
    ) -> Result<Self> {
        Self::with_level(conn, header, CompressionLevel::default())
    }

    pub fn with_level(
        conn: W,
        header: &Header,
        level: CompressionLevel,
    ) -> Result<Self> {
        let mut blocks = BlockWriter::new(conn, level);
        blocks.write(&header.serialize())?;
        blocks.flush()?;
        Ok(Writer { blocks, n_refs: header.reference_count(), buf: Vec::new(), records_written: 0 })
    }

    fn check_ref_id(&self, id: i32) -> Result<()> {
        if id < -1 || (id >= 0 && id as usize >= self.n_refs) {
            return Err(ValidationError::ReferenceOutOfRange { id, n_refs: self.n_refs }.into());
        }
        Ok(())
    }

    pub fn write_record(
        &mut self,
        record: &AlignmentRecord,
    ) -> Result<()> {
        self.check_ref_id(record.ref_id())?;
        self.check_ref_id(record.next_ref_id())?;
        self.buf.clear();
        encode_into(record, &mut self.buf)?;
        self.blocks.write(&self.buf)?;
        self.records_written += 1;
        Ok(())
    }

    pub fn write_all(
        &mut self,
        records: &[AlignmentRecord],
    ) -> Result<()> {
        records.iter().try_for_each(|record| self.write_record(record))
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Write the end-of-file block and return the inner writer.
    pub fn into_inner(self) -> Result<(W, WriteResult)> {
        let records_written = self.records_written;
        let (conn, blocks_written, bytes_written) = self.blocks.finish()?;
        Ok((conn, WriteResult { records_written, blocks_written, bytes_written }))
    }

    pub fn finish(self) -> Result<WriteResult> {
        let (_, result) = self.into_inner()?;
        Ok(result)
    }
}

/// [Writer] into a temporary file that replaces `destination` on
/// [finish](ChunkWriter::finish).
///
/// The temporary file lives in the destination's directory so that the
/// final rename stays on one filesystem. Dropping the writer before
/// `finish` deletes it.
pub struct ChunkWriter {
    writer: Writer<BufWriter<NamedTempFile>>,
    destination: PathBuf,
}

impl ChunkWriter {
    pub fn create<P: AsRef<Path>>(
        destination: P,
        header: &Header,
        level: CompressionLevel,
    ) -> Result<Self> {
        let destination = destination.as_ref().to_path_buf();
        let dir = match destination.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let tmp = tempfile::Builder::new()
            .prefix(".lazybam-")
            .suffix(".tmp")
            .tempfile_in(&dir)?;
        log::debug!("Writing {} through {}", destination.display(), tmp.path().display());

        let writer = Writer::with_level(BufWriter::new(tmp), header, level)?;
        Ok(ChunkWriter { writer, destination })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn write_record(
        &mut self,
        record: &AlignmentRecord,
    ) -> Result<()> {
        self.writer.write_record(record)
    }

    pub fn write_all(
        &mut self,
        records: &[AlignmentRecord],
    ) -> Result<()> {
        self.writer.write_all(records)
    }

    /// Flush and sync the temporary file, then rename it to the destination.
    pub fn finish(self) -> Result<WriteResult> {
        let (conn, result) = self.writer.into_inner()?;
        let tmp = conn.into_inner().map_err(|e| e.into_error())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.destination).map_err(|e| e.error)?;
        log::info!("Wrote {} records in {} blocks to {}", result.records_written, result.blocks_written, self.destination.display());
        Ok(result)
    }
}
