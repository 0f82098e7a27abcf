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
use std::path::Path;

use lazybam::compression::{compress_block, CompressionLevel, BGZF_EOF};
use lazybam::decoder::blocks::BlockReader;
use lazybam::record::{RecordBuilder, Sequence, Tag, TagArray, TagValue};
use lazybam::{decode_from_read, encode_to_write, merge_chunks, open_reader, read_next_batch, write_chunk};
use lazybam::{AlignmentRecord, Header, Reference};

fn mock_header() -> Header {
    Header::new(
        b"@HD\tVN:1.6\tSO:unsorted\n@SQ\tSN:chr1\tLN:5000\n@SQ\tSN:chr2\tLN:3000\n",
        vec![Reference::new("chr1", 5000), Reference::new("chr2", 3000)],
    )
}

fn mock_record(name: &str, ref_id: i32, position: i32) -> AlignmentRecord {
    let flag = if ref_id < 0 { 4 } else { 0 };
    let mut builder = RecordBuilder::new()
        .query_name(name)
        .flag(flag)
        .ref_id(ref_id)
        .position(position)
        .sequence(Sequence::from_ascii(b"ACGTN").unwrap())
        .quality(vec![30, 31, 32, 33, 2])
        .tag(Tag::new(b"RG"), TagValue::String("grp1".to_string()));
    if ref_id >= 0 {
        builder = builder.map_quality(60).cigar("5M".parse().unwrap());
    }
    builder.build().unwrap()
}

// Deterministic, unsorted and with duplicate keys
fn mock_records(n: usize) -> Vec<AlignmentRecord> {
    (0..n).map(|i| {
        match i % 7 {
            0 => mock_record(&format!("u{i}"), -1, -1),
            k => mock_record(&format!("r{i}"), (k % 2) as i32, ((i * 37) % 50) as i32),
        }
    }).collect()
}

fn read_all(path: &Path) -> (Header, Vec<AlignmentRecord>) {
    let mut reader = open_reader(path, 16).unwrap();
    let header = reader.header().clone();
    let mut records = Vec::new();
    loop {
        let batch = read_next_batch(&mut reader).unwrap();
        if batch.is_empty() {
            break;
        }
        records.extend(batch);
    }
    (header, records)
}

// Concatenated block payloads of a BGZF stream
fn inflate_all(bytes: &[u8]) -> Vec<u8> {
    let mut blocks = BlockReader::new(bytes, 8);
    let mut out: Vec<u8> = Vec::new();
    blocks.read_bytes(usize::MAX, &mut out).unwrap();
    out
}

fn leftover_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir).unwrap()
        .map(|x| x.unwrap().file_name().to_string_lossy().to_string())
        .collect()
}

#[test]
fn write_then_read_keeps_records_and_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chunk.bam");
    let header = mock_header();
    let records = mock_records(100);

    let result = write_chunk(&header.serialize(), records.clone(), &path, false).unwrap();
    assert_eq!(result.records_written, 100);

    let (got_header, got_records) = read_all(&path);
    assert_eq!(got_header, header);
    assert_eq!(got_records, records);
}

#[test]
fn batches_cover_every_record_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chunk.bam");
    write_chunk(&mock_header().serialize(), mock_records(10), &path, false).unwrap();

    let mut reader = open_reader(&path, 3).unwrap();
    let mut sizes = Vec::new();
    loop {
        let batch = read_next_batch(&mut reader).unwrap();
        if batch.is_empty() {
            break;
        }
        sizes.push(batch.len());
    }
    assert_eq!(sizes, vec![3, 3, 3, 1]);
    assert!(read_next_batch(&mut reader).unwrap().is_empty());
}

#[test]
fn sorted_chunk_is_a_stable_coordinate_sort() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sorted.bam");
    let records = mock_records(200);

    write_chunk(&mock_header().serialize(), records.clone(), &path, true).unwrap();
    let (_, got) = read_all(&path);

    let mut expected = records;
    expected.sort_by(|a, b| {
        let key = |r: &AlignmentRecord| (r.ref_id() as u32, r.position(), r.query_name().to_string());
        key(a).cmp(&key(b))
    });
    assert_eq!(got, expected);
    assert!(lazybam::sort::is_sorted(&got));

    // Unmapped reads come last
    assert!(got.last().unwrap().ref_id() == -1);
}

#[test]
fn merging_one_chunk_reproduces_it() {
    let dir = tempfile::tempdir().unwrap();
    let chunk = dir.path().join("chunk.bam");
    let merged = dir.path().join("merged.bam");
    let header = mock_header();

    write_chunk(&header.serialize(), mock_records(50), &chunk, true).unwrap();
    let result = merge_chunks(&header.serialize(), &[&chunk], &merged, true).unwrap();
    assert_eq!(result.records_written, 50);
    assert_eq!(result.chunks_merged, 1);

    assert_eq!(read_all(&chunk), read_all(&merged));
}

#[test]
fn merged_chunks_equal_sorting_everything() {
    let dir = tempfile::tempdir().unwrap();
    let header = mock_header().serialize();
    let records = mock_records(300);

    let mut paths = Vec::new();
    for (i, part) in records.chunks(70).enumerate() {
        let path = dir.path().join(format!("chunk-{i}.bam"));
        write_chunk(&header, part.to_vec(), &path, true).unwrap();
        paths.push(path);
    }

    let merged = dir.path().join("merged.bam");
    let result = merge_chunks(&header, &paths, &merged, true).unwrap();
    assert_eq!(result.records_written, 300);
    assert_eq!(result.chunks_merged, 5);

    // Chunks partition the input in order, so a stable sort of the input is
    // the expected merge
    let mut expected = records;
    lazybam::sort::sort_records(&mut expected);
    let (_, got) = read_all(&merged);
    assert_eq!(got, expected);
}

#[test]
fn concatenation_keeps_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let header = mock_header().serialize();
    let first = dir.path().join("1.bam");
    let second = dir.path().join("2.bam");
    let records = mock_records(20);

    write_chunk(&header, records[10..].to_vec(), &first, false).unwrap();
    write_chunk(&header, records[..10].to_vec(), &second, false).unwrap();

    let merged = dir.path().join("merged.bam");
    merge_chunks(&header, &[&first, &second], &merged, false).unwrap();

    let (_, got) = read_all(&merged);
    let mut expected = records[10..].to_vec();
    expected.extend_from_slice(&records[..10]);
    assert_eq!(got, expected);
}

#[test]
fn empty_chunk_has_no_batches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.bam");
    let header = mock_header();

    let result = write_chunk(&header.serialize(), Vec::new(), &path, true).unwrap();
    assert_eq!(result.records_written, 0);

    let mut reader = open_reader(&path, 10).unwrap();
    assert_eq!(reader.header(), &header);
    assert!(read_next_batch(&mut reader).unwrap().is_empty());
}

#[test]
fn truncated_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chunk.bam");
    write_chunk(&mock_header().serialize(), mock_records(100), &path, false).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let cut = dir.path().join("cut.bam");
    std::fs::write(&cut, &bytes[..bytes.len() - 10]).unwrap();

    let mut reader = open_reader(&cut, 1000).unwrap();
    let got = read_next_batch(&mut reader);
    assert!(got.unwrap_err().is_truncated());

    // Asking again must not look like a clean end of stream
    let got = read_next_batch(&mut reader);
    assert!(got.unwrap_err().is_truncated());
}

#[test]
fn reencoding_reproduces_the_payload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chunk.bam");
    let header = mock_header();

    let mut records = mock_records(40);
    records.push(RecordBuilder::new()
        .query_name("no-quality")
        .sequence(Sequence::from_ascii(b"ACGTACG").unwrap())
        .tag(Tag::new(b"XB"), TagValue::Array(TagArray::Int16(vec![-3, 0, 7])))
        .tag(Tag::new(b"XF"), TagValue::Float(0.25))
        .build()
        .unwrap());
    write_chunk(&header.serialize(), records, &path, false).unwrap();

    // Store a bin that differs from the computed one in the first record
    let mut payload = inflate_all(&std::fs::read(&path).unwrap());
    let bin_pos = header.serialize().len() + 14;
    payload[bin_pos..(bin_pos + 2)].copy_from_slice(&4681_u16.to_le_bytes());
    let mut edited = compress_block(&payload, CompressionLevel::default()).unwrap();
    edited.extend_from_slice(&BGZF_EOF);

    let mut conn = edited.as_slice();
    let (got_header, got_records) = decode_from_read(&mut conn).unwrap();
    assert_eq!(got_records[0].bin(), 4681);
    assert_eq!(got_records.last().unwrap().quality(), &[0xff; 7]);

    let mut reencoded: Vec<u8> = Vec::new();
    encode_to_write(&got_header, &got_records, &mut reencoded).unwrap();
    assert_eq!(inflate_all(&reencoded), payload);
}

#[test]
fn incompatible_headers_refuse_to_merge() {
    let dir = tempfile::tempdir().unwrap();
    let chunk = dir.path().join("chunk.bam");
    write_chunk(&mock_header().serialize(), mock_records(5), &chunk, true).unwrap();

    let other = Header::new(b"", vec![Reference::new("chr1", 5000), Reference::new("chrM", 16569)]);
    let merged = dir.path().join("merged.bam");
    let got = merge_chunks(&other.serialize(), &[&chunk], &merged, true);

    assert!(got.unwrap_err().is_format());
    assert!(!merged.exists());
}

#[test]
fn different_reference_counts_refuse_to_merge() {
    let dir = tempfile::tempdir().unwrap();
    let chunk = dir.path().join("chunk.bam");
    write_chunk(&mock_header().serialize(), mock_records(5), &chunk, true).unwrap();

    let other = Header::new(b"", vec![Reference::new("chr1", 5000)]);
    let merged = dir.path().join("merged.bam");
    let got = merge_chunks(&other.serialize(), &[&chunk], &merged, true);

    assert!(got.unwrap_err().is_format());
    assert!(!merged.exists());
    assert_eq!(leftover_files(dir.path()), vec!["chunk.bam".to_string()]);
}

#[test]
fn failed_write_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chunk.bam");

    // Reference id 5 is not in the header
    let mut records = mock_records(10);
    records.push(mock_record("bad", 5, 10));

    let got = write_chunk(&mock_header().serialize(), records, &path, false);
    assert!(got.unwrap_err().is_validation());
    assert!(leftover_files(dir.path()).is_empty());
}

#[test]
fn invalid_header_bytes_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chunk.bam");

    let got = write_chunk(b"SAM\x01", mock_records(1), &path, false);
    assert!(got.unwrap_err().is_format());
    assert!(!path.exists());
}
