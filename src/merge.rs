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

//! Merging chunk files.
//!
//! With sorting enabled the chunks are assumed to be coordinate sorted and
//! are merged with a k-way merge that holds one record per chunk in memory.
//! Records with equal keys keep the order of their chunks in the input list.
//! Without sorting the chunks are concatenated in input order.
//!
//! Every chunk header must have the same reference names, in the same order,
//! as the output header. This is checked before the output is created.
//!

use crate::decoder::{Reader, ReaderBuilder};
use crate::encoder::{ChunkWriter, WriterBuilder};
use crate::error::{FormatError, Result};
use crate::headers::file::Header;
use crate::record::AlignmentRecord;

use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Counts reported after a complete merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeResult {
    pub records_written: u64,
    pub chunks_merged: usize,
    /// BGZF blocks, including the end-of-file block.
    pub blocks_written: u64,
    /// Compressed bytes.
    pub bytes_written: u64,
}

// Heap entry ordered by coordinate, then by chunk index
struct Entry {
    record: AlignmentRecord,
    chunk: usize,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.record.sort_key()
            .cmp(&other.record.sort_key())
            .then(self.chunk.cmp(&other.chunk))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

type ChunkReader = Reader<BufReader<File>>;

fn open_chunks<P: AsRef<Path>>(
    header: &Header,
    chunk_paths: &[P],
) -> Result<Vec<ChunkReader>> {
    chunk_paths.iter().map(|path| {
        let path = path.as_ref();
        let reader = ReaderBuilder::new().from_path(path)?;
        if let Some(reason) = header.incompatibility(reader.header()) {
            return Err(FormatError::IncompatibleHeaders {
                chunk: path.display().to_string(),
                reason,
            }.into());
        }
        log::debug!("Opened chunk {}", path.display());
        Ok(reader)
    }).collect()
}

fn merge_sorted(
    readers: &mut [ChunkReader],
    out: &mut ChunkWriter,
) -> Result<()> {
    let mut heap: BinaryHeap<Reverse<Entry>> = BinaryHeap::with_capacity(readers.len());
    for (chunk, reader) in readers.iter_mut().enumerate() {
        if let Some(record) = reader.next().transpose()? {
            heap.push(Reverse(Entry { record, chunk }));
        }
    }

    while let Some(Reverse(entry)) = heap.pop() {
        out.write_record(&entry.record)?;
        if let Some(record) = readers[entry.chunk].next().transpose()? {
            if record.sort_key() < entry.record.sort_key() {
                log::warn!("Chunk {} is not coordinate sorted at read {}", entry.chunk, record.query_name());
            }
            heap.push(Reverse(Entry { record, chunk: entry.chunk }));
        }
    }
    Ok(())
}

fn concatenate(
    readers: &mut [ChunkReader],
    out: &mut ChunkWriter,
) -> Result<()> {
    for reader in readers.iter_mut() {
        for record in reader.by_ref() {
            out.write_record(&record?)?;
        }
    }
    Ok(())
}

/// Merge `chunk_paths` into a single BAM file at `destination`.
///
/// `config` sets the compression level and whether to merge by coordinate
/// ([WriterBuilder::sort]) or concatenate. The output only appears at
/// `destination` if the merge completes.
pub fn merge<P: AsRef<Path>, Q: AsRef<Path>>(
    header: &Header,
    chunk_paths: &[P],
    destination: Q,
    config: WriterBuilder,
) -> Result<MergeResult> {
    let mut readers = open_chunks(header, chunk_paths)?;
    let mut out = config.create(destination.as_ref(), header)?;

    if config.sorts() {
        merge_sorted(&mut readers, &mut out)?;
    } else {
        concatenate(&mut readers, &mut out)?;
    }

    let result = out.finish()?;
    Ok(MergeResult {
        records_written: result.records_written,
        chunks_merged: readers.len(),
        blocks_written: result.blocks_written,
        bytes_written: result.bytes_written,
    })
}

// Tests
#[cfg(test)]
mod tests {

    fn mock_header() -> crate::headers::file::Header {
        use crate::headers::file::{Header, Reference};
        Header::new(b"", vec![Reference::new("chr1", 1000), Reference::new("chr2", 1000)])
    }

    fn mock_record(name: &str, ref_id: i32, position: i32) -> crate::record::AlignmentRecord {
        use crate::record::RecordBuilder;
        let flag = if ref_id < 0 { 4 } else { 0 };
        RecordBuilder::new().query_name(name).flag(flag).ref_id(ref_id).position(position).build().unwrap()
    }

    fn write_chunk(dir: &std::path::Path, name: &str, records: Vec<crate::record::AlignmentRecord>) -> std::path::PathBuf {
        use crate::encoder::WriterBuilder;
        let path = dir.join(name);
        WriterBuilder::new().sort(true).write_chunk(&mock_header(), records, &path).unwrap();
        path
    }

    fn read_names(path: &std::path::Path) -> Vec<String> {
        use crate::decoder::Reader;
        Reader::from_path(path).unwrap().map(|x| x.unwrap().query_name().to_string()).collect()
    }

    #[test]
    fn entry_order_breaks_ties_by_chunk() {
        use super::Entry;

        let a = Entry { record: mock_record("r", 0, 5), chunk: 1 };
        let b = Entry { record: mock_record("r", 0, 5), chunk: 0 };
        let c = Entry { record: mock_record("a", 1, 0), chunk: 0 };

        assert!(b < a);
        assert!(a < c);
    }

    #[test]
    fn k_way_merge() {
        use super::merge;
        use crate::encoder::WriterBuilder;

        let dir = tempfile::tempdir().unwrap();
        let first = write_chunk(dir.path(), "1.bam", vec![
            mock_record("a", 0, 1), mock_record("d", 0, 40), mock_record("u1", -1, -1),
        ]);
        let second = write_chunk(dir.path(), "2.bam", vec![
            mock_record("b", 0, 2), mock_record("e", 1, 0),
        ]);
        let third = write_chunk(dir.path(), "3.bam", vec![]);

        let dest = dir.path().join("merged.bam");
        let got = merge(&mock_header(), &[&first, &second, &third], &dest, WriterBuilder::new().sort(true)).unwrap();

        assert_eq!(got.records_written, 5);
        assert_eq!(got.chunks_merged, 3);
        assert_eq!(read_names(&dest), vec!["a", "b", "d", "e", "u1"]);
    }

    #[test]
    fn equal_keys_keep_chunk_order() {
        use super::merge;
        use crate::decoder::Reader;
        use crate::encoder::WriterBuilder;
        use crate::record::{Tag, TagValue};

        let tagged = |chunk: i32| {
            mock_record("same", 0, 10).to_builder().tag(Tag::new(b"XC"), TagValue::Int32(chunk)).build().unwrap()
        };

        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<_> = (0..4).map(|i| write_chunk(dir.path(), &format!("{i}.bam"), vec![tagged(i)])).collect();

        let dest = dir.path().join("merged.bam");
        merge(&mock_header(), &paths, &dest, WriterBuilder::new().sort(true)).unwrap();

        let got: Vec<i64> = Reader::from_path(&dest).unwrap()
            .map(|x| x.unwrap().tag(&Tag::new(b"XC")).and_then(|v| v.as_int()).unwrap())
            .collect();
        assert_eq!(got, vec![0, 1, 2, 3]);
    }

    #[test]
    fn concatenate_without_sort() {
        use super::merge;
        use crate::encoder::WriterBuilder;

        let dir = tempfile::tempdir().unwrap();
        let first = write_chunk(dir.path(), "1.bam", vec![mock_record("z", 1, 500)]);
        let second = write_chunk(dir.path(), "2.bam", vec![mock_record("a", 0, 1)]);

        let dest = dir.path().join("merged.bam");
        let got = merge(&mock_header(), &[&first, &second], &dest, WriterBuilder::new()).unwrap();

        assert_eq!(got.records_written, 2);
        assert_eq!(read_names(&dest), vec!["z", "a"]);
    }

    #[test]
    fn incompatible_header_creates_no_output() {
        use super::merge;
        use crate::encoder::WriterBuilder;
        use crate::headers::file::{Header, Reference};

        let dir = tempfile::tempdir().unwrap();
        let chunk = write_chunk(dir.path(), "1.bam", vec![mock_record("a", 0, 1)]);

        let other = Header::new(b"", vec![Reference::new("chrX", 1000), Reference::new("chr2", 1000)]);
        let dest = dir.path().join("merged.bam");
        let got = merge(&other, &[&chunk], &dest, WriterBuilder::new().sort(true));

        assert!(got.unwrap_err().is_format());
        assert!(!dest.exists());
    }

    #[test]
    fn missing_chunk_is_io_error() {
        use super::merge;
        use crate::encoder::WriterBuilder;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("merged.bam");
        let got = merge(&mock_header(), &[dir.path().join("nope.bam")], &dest, WriterBuilder::new());

        assert!(got.unwrap_err().is_io());
        assert!(!dest.exists());
    }
}
