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

//! lazybam is a library and a command-line client for:
//!
//!   - Streaming alignment records out of [BAM](https://samtools.github.io/hts-specs/SAMv1.pdf) files in batches.
//!   - Writing records back out as BAM, optionally sorted by coordinate.
//!   - Merging coordinate sorted BAM chunks into one sorted file.
//!
//! Together these support external sorting of alignment files that do not
//! fit in memory: read a batch, sort it and write it as a chunk, then merge
//! the chunks.
//!
//! ## Usage
//!
//! ### Command line
//!
//! The lazybam CLI supports the following subcommands:
//!   - `lazybam view` print records as SAM text.
//!   - `lazybam sort` sort a BAM file by coordinate in chunks.
//!   - `lazybam merge` merge BAM chunks into a single file.
//!
//! ### Rust API
//!
//! The functions at the crate root cover the three operations on files:
//! [open_reader] and [read_next_batch], [write_chunk], and [merge_chunks].
//! Headers are passed in their serialized BAM form, as returned by
//! [Reader::header_bytes](decoder::Reader::header_bytes).
//!
//! For use cases requiring more control, the following structs are provided:
//!
//!   - [Reader](decoder::Reader): reads a BAM stream from any [Read].
//!   - [Writer](encoder::Writer): writes a BAM stream into any [Write].
//!   - [ChunkWriter](encoder::ChunkWriter): writes a BAM file that only appears once complete.
//!   - [RecordBuilder](record::RecordBuilder): creates and modifies [AlignmentRecord]s.
//!
//! ## File format
//!
//! A BAM file is a series of BGZF blocks, see [compression]. The
//! concatenated block payloads hold the header, see [headers], followed by
//! length-prefixed records, see [record]. The file ends with an empty block.
//!
//! Writes are atomic: output goes to a temporary file next to the
//! destination, which is renamed into place only after all data is written.
//!

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

pub mod compression;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod headers;
pub mod merge;
pub mod record;
pub mod sort;

pub use error::{Error, Result};
pub use encoder::WriteResult;
pub use headers::file::{Header, Reference};
pub use merge::MergeResult;
pub use record::AlignmentRecord;

use decoder::{Reader, ReaderBuilder};
use encoder::{Writer, WriterBuilder};

/// Open a BAM file for reading in batches of `batch_size` records.
///
/// The header is parsed before this returns.
///
/// ## Usage
/// ```rust
/// use lazybam::{open_reader, read_next_batch, write_chunk, Header, Reference};
/// use lazybam::record::RecordBuilder;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("in.bam");
///
/// let header = Header::new(b"", vec![Reference::new("chr1", 1000)]);
/// let records: Vec<_> = (0..5).map(|i| {
///     RecordBuilder::new().query_name(format!("r{i}")).flag(0).ref_id(0).position(i).build().unwrap()
/// }).collect();
/// write_chunk(&header.serialize(), records, &path, false).unwrap();
///
/// let mut reader = open_reader(&path, 2).unwrap();
/// assert_eq!(read_next_batch(&mut reader).unwrap().len(), 2);
/// assert_eq!(read_next_batch(&mut reader).unwrap().len(), 2);
/// assert_eq!(read_next_batch(&mut reader).unwrap().len(), 1);
/// assert!(read_next_batch(&mut reader).unwrap().is_empty());
/// ```
///
pub fn open_reader<P: AsRef<Path>>(
    path: P,
    batch_size: usize,
) -> Result<Reader<BufReader<File>>> {
    ReaderBuilder::new().batch_size(batch_size).from_path(path)
}

/// Read the next batch; empty once the file is exhausted.
pub fn read_next_batch<R: Read>(
    reader: &mut Reader<R>,
) -> Result<Vec<AlignmentRecord>> {
    reader.next_batch()
}

/// Write `records` to `destination` as a complete BAM file.
///
/// `header_bytes` is a serialized BAM header. With `sort` the records are
/// stably sorted by coordinate first. Nothing appears at `destination`
/// unless every record was written.
///
/// ## Errors
///
/// Returns a [FormatError](error::FormatError) for an invalid header, a
/// [ValidationError](error::ValidationError) for records that cannot be
/// encoded, including reference ids outside the header, and IO errors
/// from the filesystem.
///
pub fn write_chunk<P: AsRef<Path>>(
    header_bytes: &[u8],
    records: Vec<AlignmentRecord>,
    destination: P,
    sort: bool,
) -> Result<WriteResult> {
    let header = Header::parse(header_bytes)?;
    let destination = destination.as_ref();
    WriterBuilder::new().sort(sort).write_chunk(&header, records, destination).inspect_err(|e| {
        log::warn!("Discarded output for {}: {}", destination.display(), e);
    })
}

/// Merge BAM chunks into `destination`.
///
/// With `sort` the chunks must each be coordinate sorted and the output is
/// their k-way merge; records with equal coordinates keep the order of
/// `chunk_paths`. Without `sort` the chunks are concatenated. Every chunk
/// header must list the same references as `header_bytes`.
///
/// ## Usage
/// ```rust
/// use lazybam::{merge_chunks, open_reader, write_chunk, Header, Reference};
/// use lazybam::record::RecordBuilder;
///
/// let dir = tempfile::tempdir().unwrap();
/// let header = Header::new(b"", vec![Reference::new("chr1", 1000)]).serialize();
/// let record = |name: &str, pos: i32| {
///     RecordBuilder::new().query_name(name).flag(0).ref_id(0).position(pos).build().unwrap()
/// };
///
/// let first = dir.path().join("1.bam");
/// let second = dir.path().join("2.bam");
/// write_chunk(&header, vec![record("a", 10), record("c", 30)], &first, true).unwrap();
/// write_chunk(&header, vec![record("b", 20)], &second, true).unwrap();
///
/// let merged = dir.path().join("merged.bam");
/// let result = merge_chunks(&header, &[&first, &second], &merged, true).unwrap();
/// assert_eq!(result.records_written, 3);
///
/// let names: Vec<String> = open_reader(&merged, 1).unwrap()
///     .map(|x| x.unwrap().query_name().to_string())
///     .collect();
/// assert_eq!(names, vec!["a", "b", "c"]);
/// ```
///
pub fn merge_chunks<P: AsRef<Path>, Q: AsRef<Path>>(
    header_bytes: &[u8],
    chunk_paths: &[P],
    destination: Q,
    sort: bool,
) -> Result<MergeResult> {
    let header = Header::parse(header_bytes)?;
    let destination = destination.as_ref();
    let result = merge::merge(&header, chunk_paths, destination, WriterBuilder::new().sort(sort)).inspect_err(|e| {
        log::warn!("Discarded output for {}: {}", destination.display(), e);
    })?;
    log::info!("Merged {} chunks into {}", result.chunks_merged, destination.display());
    Ok(result)
}

/// Decode a complete BAM stream from [Read] into memory.
///
/// ## Usage
/// ```rust
/// use lazybam::{decode_from_read, encode_to_write, Header, Reference};
/// use lazybam::record::RecordBuilder;
/// use std::io::{Cursor, Seek};
///
/// let header = Header::new(b"@CO\tmock\n", vec![Reference::new("chr1", 1000)]);
/// let records = vec![
///     RecordBuilder::new().query_name("r1").flag(0).ref_id(0).position(5).build().unwrap(),
///     RecordBuilder::new().query_name("r2").build().unwrap(),
/// ];
///
/// let mut bytes: Cursor<Vec<u8>> = Cursor::new(Vec::new());
/// encode_to_write(&header, &records, &mut bytes).unwrap();
///
/// bytes.rewind().unwrap();
/// let (got_header, got_records) = decode_from_read(&mut bytes).unwrap();
///
/// assert_eq!(got_header, header);
/// assert_eq!(got_records, records);
/// ```
///
pub fn decode_from_read<R: Read>(
    conn: &mut R,
) -> Result<(Header, Vec<AlignmentRecord>)> {
    let reader = Reader::new(conn)?;
    let header = reader.header().clone();
    let records = reader.collect::<Result<Vec<AlignmentRecord>>>()?;
    Ok((header, records))
}

/// Encode a header and records from memory to [Write].
pub fn encode_to_write<W: Write>(
    header: &Header,
    records: &[AlignmentRecord],
    conn: &mut W,
) -> Result<WriteResult> {
    let mut writer = Writer::new(conn, header)?;
    writer.write_all(records)?;
    writer.finish()
}
