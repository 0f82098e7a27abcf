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

use crate::compression::PARALLEL_BLOCK_COUNT;
use crate::decoder::blocks::BlockReader;
use crate::error::{Error, FormatError, Result, TruncatedStreamError};
use crate::headers::file::{Header, BAM_MAGIC};
use crate::record::codec::{decode_body, FIXED_FIELDS_LEN};
use crate::record::AlignmentRecord;

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Configures and opens a [Reader].
///
/// ## Usage
/// ```rust,no_run
/// use lazybam::decoder::ReaderBuilder;
///
/// let mut reader = ReaderBuilder::new()
///     .batch_size(10_000)
///     .prefetch_blocks(16)
///     .from_path("input.bam")
///     .unwrap();
///
/// let batch = reader.next_batch().unwrap();
/// println!("Read {} records", batch.len());
/// ```
///
#[derive(Debug, Clone, Copy)]
pub struct ReaderBuilder {
    batch_size: usize,
    prefetch_blocks: usize,
}

impl Default for ReaderBuilder {
    fn default() -> Self {
        ReaderBuilder { batch_size: 1, prefetch_blocks: PARALLEL_BLOCK_COUNT }
    }
}

impl ReaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records returned by [Reader::next_batch]; values below 1 are raised to 1.
    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Blocks read and inflated together each time the decoded data runs out.
    #[must_use]
    pub fn prefetch_blocks(mut self, prefetch_blocks: usize) -> Self {
        self.prefetch_blocks = prefetch_blocks.max(1);
        self
    }

    pub fn build<R: Read>(self, conn: R) -> Result<Reader<R>> {
        Reader::with_config(conn, self.batch_size, self.prefetch_blocks)
    }

    pub fn from_path<P: AsRef<Path>>(self, path: P) -> Result<Reader<BufReader<File>>> {
        let conn = BufReader::new(File::open(path.as_ref())?);
        log::debug!("Opened {}", path.as_ref().display());
        self.build(conn)
    }
}

/// Streaming reader over a BAM file.
///
/// The header is parsed when the reader is created. Records are decoded
/// lazily in on-disk order, either in batches with
/// [next_batch](Reader::next_batch) or one at a time through [Iterator].
/// The first error stops the reader: later calls to
/// [read_record](Reader::read_record) and [next_batch](Reader::next_batch)
/// report it again and the iterator ends.
///
/// ## Usage
/// ```rust
/// use lazybam::decoder::Reader;
/// use lazybam::encoder::Writer;
/// use lazybam::headers::file::{Header, Reference};
/// use lazybam::record::RecordBuilder;
///
/// let header = Header::new(b"", vec![Reference::new("chr1", 1000)]);
/// let records: Vec<_> = (0..3).map(|i| {
///     RecordBuilder::new().query_name(format!("r{i}")).flag(0).ref_id(0).position(i).build().unwrap()
/// }).collect();
///
/// let mut bytes: Vec<u8> = Vec::new();
/// let mut writer = Writer::new(&mut bytes, &header).unwrap();
/// writer.write_all(&records).unwrap();
/// writer.finish().unwrap();
///
/// let reader = Reader::new(bytes.as_slice()).unwrap();
/// let got = reader.collect::<Result<Vec<_>, _>>().unwrap();
/// assert_eq!(got, records);
/// ```
///
pub struct Reader<R: Read> {
    blocks: BlockReader<R>,
    header: Header,
    header_bytes: Vec<u8>,
    batch_size: usize,

    // Internals
    buf: Vec<u8>,
    records_read: u64,
    failure: Option<Error>,
}

impl<R: Read> Reader<R> {
    pub fn new(conn: R) -> Result<Self> {
        ReaderBuilder::default().build(conn)
    }

    fn with_config(
        conn: R,
        batch_size: usize,
        prefetch_blocks: usize,
    ) -> Result<Self> {
        let mut blocks = BlockReader::new(conn, prefetch_blocks);
        let header_bytes = read_header_bytes(&mut blocks)?;
        let header = Header::parse(&header_bytes)?;
        log::debug!("Parsed header with {} references and {} bytes of text", header.reference_count(), header.text().len());

        Ok(Reader {
            blocks,
            header,
            header_bytes,
            batch_size: batch_size.max(1),
            buf: Vec::new(),
            records_read: 0,
            failure: None,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The header exactly as it was stored in the file.
    pub fn header_bytes(&self) -> &[u8] {
        &self.header_bytes
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Read the next record, or `None` at the end of the stream.
    pub fn read_record(&mut self) -> Result<Option<AlignmentRecord>> {
        if let Some(e) = &self.failure {
            return Err(e.repeat());
        }
        self.decode_next().inspect_err(|e| {
            log::debug!("Reader stopped after {} records: {}", self.records_read, e);
            self.failure = Some(e.repeat());
        })
    }

    fn decode_next(&mut self) -> Result<Option<AlignmentRecord>> {
        self.buf.clear();
        let nread = self.blocks.read_bytes(4, &mut self.buf)?;
        if nread == 0 {
            return Ok(None);
        }
        if nread < 4 {
            return Err(TruncatedStreamError::PartialRecord { available: nread, expected: 4 }.into());
        }

        let block_size = i32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if block_size < FIXED_FIELDS_LEN as i32 {
            return Err(FormatError::RecordTooShort(block_size as i64).into());
        }

        self.buf.clear();
        let nread = self.blocks.read_bytes(block_size as usize, &mut self.buf)?;
        if nread < block_size as usize {
            return Err(TruncatedStreamError::PartialRecord {
                available: nread + 4,
                expected: block_size as usize + 4,
            }.into());
        }

        let record = decode_body(&self.buf, &self.header)?;
        self.records_read += 1;
        Ok(Some(record))
    }

    /// Read up to `batch_size` records.
    ///
    /// The batch is shorter only at the end of the stream and empty exactly
    /// when the stream is exhausted. Errors are returned as soon as they
    /// are found; records already decoded into the failed batch are dropped.
    /// Once an error is returned every later call fails as well.
    pub fn next_batch(&mut self) -> Result<Vec<AlignmentRecord>> {
        self.read_batch(self.batch_size)
    }

    /// [next_batch](Reader::next_batch) with an explicit size.
    pub fn read_batch(
        &mut self,
        batch_size: usize,
    ) -> Result<Vec<AlignmentRecord>> {
        let mut batch: Vec<AlignmentRecord> = Vec::with_capacity(batch_size.min(1 << 16));
        while batch.len() < batch_size {
            match self.read_record()? {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Iterate over batches of `batch_size` records until the stream ends.
    pub fn batches(&mut self) -> Batches<'_, R> {
        Batches { reader: self, done: false }
    }
}

impl Reader<BufReader<File>> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        ReaderBuilder::default().from_path(path)
    }
}

impl<R: Read> Iterator for Reader<R> {
    type Item = Result<AlignmentRecord>;

    fn next(&mut self) -> Option<Result<AlignmentRecord>> {
        if self.failure.is_some() {
            return None;
        }
        self.read_record().transpose()
    }
}

/// Iterator over non-empty batches, see [Reader::batches].
pub struct Batches<'a, R: Read> {
    reader: &'a mut Reader<R>,
    done: bool,
}

impl<R: Read> Iterator for Batches<'_, R> {
    type Item = Result<Vec<AlignmentRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_batch() {
            Ok(batch) if batch.is_empty() => {
                self.done = true;
                None
            },
            Ok(batch) => Some(Ok(batch)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            },
        }
    }
}

fn read_exact_header(
    blocks: &mut BlockReader<impl Read>,
    n: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    if blocks.read_bytes(n, out)? < n {
        return Err(TruncatedStreamError::PartialHeader.into());
    }
    Ok(())
}

fn read_length(
    bytes: &[u8],
    field: &'static str,
) -> Result<usize> {
    let start = bytes.len() - 4;
    let value = i32::from_le_bytes([bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]]);
    if value < 0 {
        return Err(FormatError::InvalidHeaderLength { field, length: value as i64, available: 0 }.into());
    }
    Ok(value as usize)
}

// Pull the header out of the stream one length-delimited piece at a time
fn read_header_bytes(
    blocks: &mut BlockReader<impl Read>,
) -> Result<Vec<u8>> {
    let mut bytes: Vec<u8> = Vec::new();

    read_exact_header(blocks, 4, &mut bytes)?;
    if bytes[..4] != BAM_MAGIC {
        let mut found = [0_u8; 4];
        found.copy_from_slice(&bytes[..4]);
        return Err(FormatError::InvalidFileMagic(found).into());
    }

    read_exact_header(blocks, 4, &mut bytes)?;
    let l_text = read_length(&bytes, "text")?;
    read_exact_header(blocks, l_text + 4, &mut bytes)?;
    let n_ref = read_length(&bytes, "reference count")?;

    for _ in 0..n_ref {
        read_exact_header(blocks, 4, &mut bytes)?;
        let l_name = read_length(&bytes, "reference name")?;
        read_exact_header(blocks, l_name + 4, &mut bytes)?;
    }

    Ok(bytes)
}

// Tests
#[cfg(test)]
mod tests {

    fn mock_header() -> crate::headers::file::Header {
        use crate::headers::file::{Header, Reference};
        Header::new(b"@HD\tVN:1.6\n", vec![Reference::new("chr1", 10000), Reference::new("chr2", 5000)])
    }

    fn mock_records(n: i32) -> Vec<crate::record::AlignmentRecord> {
        use crate::record::{RecordBuilder, Sequence};
        (0..n).map(|i| {
            RecordBuilder::new()
                .query_name(format!("read{i}"))
                .flag(0)
                .ref_id(i % 2)
                .position(i * 10)
                .cigar("8M".parse().unwrap())
                .sequence(Sequence::from_ascii(b"ACGTACGT").unwrap())
                .quality(vec![20; 8])
                .build()
                .unwrap()
        }).collect()
    }

    fn mock_bam(n: i32) -> Vec<u8> {
        use crate::encoder::Writer;

        let mut bytes: Vec<u8> = Vec::new();
        let mut writer = Writer::new(&mut bytes, &mock_header()).unwrap();
        writer.write_all(&mock_records(n)).unwrap();
        writer.finish().unwrap();
        bytes
    }

    #[test]
    fn header_is_parsed_on_open() {
        use super::Reader;

        let bytes = mock_bam(0);
        let reader = Reader::new(bytes.as_slice()).unwrap();

        assert_eq!(reader.header(), &mock_header());
        assert_eq!(reader.header_bytes(), mock_header().serialize().as_slice());
    }

    #[test]
    fn batches_are_full_until_the_end() {
        use super::ReaderBuilder;

        let bytes = mock_bam(10);
        let mut reader = ReaderBuilder::new().batch_size(4).build(bytes.as_slice()).unwrap();

        assert_eq!(reader.next_batch().unwrap().len(), 4);
        assert_eq!(reader.next_batch().unwrap().len(), 4);
        assert_eq!(reader.next_batch().unwrap().len(), 2);
        assert!(reader.next_batch().unwrap().is_empty());
        assert!(reader.next_batch().unwrap().is_empty());
        assert_eq!(reader.records_read(), 10);
    }

    #[test]
    fn batches_iterator_concatenates_to_stream() {
        use super::ReaderBuilder;

        let bytes = mock_bam(7);
        let mut reader = ReaderBuilder::new().batch_size(3).prefetch_blocks(1).build(bytes.as_slice()).unwrap();

        let sizes: Vec<usize> = reader.batches().map(|x| x.unwrap().len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn records_in_disk_order() {
        use super::Reader;

        let bytes = mock_bam(5);
        let got = Reader::new(bytes.as_slice()).unwrap().collect::<Result<Vec<_>, _>>().unwrap();

        assert_eq!(got, mock_records(5));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        use super::ReaderBuilder;

        let bytes = mock_bam(100);
        let truncated = &bytes[..bytes.len() - 10];
        let mut reader = ReaderBuilder::new().batch_size(1000).build(truncated).unwrap();

        assert!(reader.next_batch().unwrap_err().is_truncated());
    }

    #[test]
    fn iterator_stops_after_error() {
        use super::Reader;

        let bytes = mock_bam(3);
        let truncated = &bytes[..bytes.len() - 28];
        let mut reader = Reader::new(truncated).unwrap();

        let got: Vec<_> = reader.by_ref().collect();
        assert_eq!(got.len(), 4);
        assert!(got[3].as_ref().unwrap_err().is_truncated());
        assert!(reader.next().is_none());
    }

    #[test]
    fn partial_header() {
        use super::Reader;
        use crate::compression::{compress_block, CompressionLevel, BGZF_EOF};

        let header = mock_header().serialize();
        let mut bytes = compress_block(&header[..10], CompressionLevel::default()).unwrap();
        bytes.extend_from_slice(&BGZF_EOF);

        let got = Reader::new(bytes.as_slice());
        assert!(got.err().is_some_and(|e| e.is_truncated()));
    }

    #[test]
    fn wrong_magic() {
        use super::Reader;
        use crate::compression::{compress_block, CompressionLevel, BGZF_EOF};

        let mut bytes = compress_block(b"BAI\x01\x00\x00\x00\x00", CompressionLevel::default()).unwrap();
        bytes.extend_from_slice(&BGZF_EOF);

        let got = Reader::new(bytes.as_slice());
        assert!(got.err().is_some_and(|e| e.is_format()));
    }

    #[test]
    fn partial_record() {
        use super::Reader;
        use crate::compression::{compress_block, CompressionLevel, BGZF_EOF};
        use crate::record::codec::encode;

        let mut payload = mock_header().serialize();
        let record = encode(&mock_records(1)[0]).unwrap();
        payload.extend_from_slice(&record[..record.len() - 3]);

        let mut bytes = compress_block(&payload, CompressionLevel::default()).unwrap();
        bytes.extend_from_slice(&BGZF_EOF);

        let mut reader = Reader::new(bytes.as_slice()).unwrap();
        assert!(reader.read_record().unwrap_err().is_truncated());
    }

    #[test]
    fn truncation_is_reported_on_every_call() {
        use super::ReaderBuilder;

        let bytes = mock_bam(50);
        let truncated = &bytes[..bytes.len() - 10];
        let mut reader = ReaderBuilder::new().batch_size(1000).build(truncated).unwrap();

        assert!(reader.next_batch().unwrap_err().is_truncated());
        assert!(reader.next_batch().unwrap_err().is_truncated());
        assert!(reader.read_record().unwrap_err().is_truncated());
        assert!(reader.next().is_none());
    }

    #[test]
    fn malformed_record_is_not_skipped() {
        use super::ReaderBuilder;
        use crate::compression::{compress_block, CompressionLevel, BGZF_EOF};
        use crate::record::codec::encode;
        use crate::record::{RecordBuilder, Tag, TagValue};

        let named = |name: &str| RecordBuilder::new().query_name(name).build().unwrap();
        let mut bad = encode(&named("bad").to_builder().tag(Tag::new(b"XY"), TagValue::UInt8(1)).build().unwrap()).unwrap();
        let type_pos = bad.len() - 2;
        bad[type_pos] = b'q';

        let mut payload = mock_header().serialize();
        payload.extend(encode(&named("a")).unwrap());
        payload.extend(bad);
        payload.extend(encode(&named("c")).unwrap());
        let mut bytes = compress_block(&payload, CompressionLevel::default()).unwrap();
        bytes.extend_from_slice(&BGZF_EOF);

        let mut reader = ReaderBuilder::new().batch_size(10).build(bytes.as_slice()).unwrap();
        assert!(reader.next_batch().unwrap_err().is_format());

        let got = reader.next_batch();
        assert!(got.unwrap_err().is_format());
        assert!(reader.read_record().unwrap_err().is_format());
        assert_eq!(reader.records_read(), 1);
    }
}
