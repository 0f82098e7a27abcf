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
use crate::error::Result;
use crate::record::codec::{record_bin, validate};
use crate::record::{AlignmentRecord, Cigar, Sequence, Tag, TagValue};

/// Builds [AlignmentRecord]s.
///
/// A new builder describes an unmapped, unplaced read named `*` with no
/// sequence. [build](RecordBuilder::build) checks the record invariants.
///
/// The `bin` field is computed from the position and CIGAR. A builder made
/// with [to_builder](AlignmentRecord::to_builder) keeps the record's `bin`
/// unless one of those is set.
///
/// ## Usage
/// ```rust
/// use lazybam::record::{RecordBuilder, Sequence, Tag, TagValue};
///
/// let record = RecordBuilder::new()
///     .query_name("read1")
///     .flag(0)
///     .ref_id(0)
///     .position(1000)
///     .cigar("4M".parse().unwrap())
///     .sequence(Sequence::from_ascii(b"ACGT").unwrap())
///     .tag(Tag::new(b"NM"), TagValue::Int32(0))
///     .build()
///     .unwrap();
///
/// // Move the read and drop its tags
/// let moved = record.to_builder().ref_id(1).position(20).clear_tags().build().unwrap();
/// assert_eq!(moved.ref_id(), 1);
/// assert!(moved.tags().is_empty());
/// ```
///
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    record: AlignmentRecord,
    keep_bin: bool,
}

impl Default for RecordBuilder {
    fn default() -> Self {
        RecordBuilder {
            record: AlignmentRecord {
                query_name: "*".to_string(),
                flag: 0x4,
                ref_id: -1,
                position: -1,
                map_quality: 255,
                bin: 4680,
                cigar: Cigar::default(),
                next_ref_id: -1,
                next_position: -1,
                template_length: 0,
                sequence: Sequence::default(),
                quality: Vec::new(),
                tags: Vec::new(),
            },
            keep_bin: false,
        }
    }
}

impl RecordBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_record(record: AlignmentRecord) -> Self {
        RecordBuilder { record, keep_bin: true }
    }

    #[must_use]
    pub fn query_name(mut self, name: impl Into<String>) -> Self {
        self.record.query_name = name.into();
        self
    }

    #[must_use]
    pub fn flag(mut self, flag: u16) -> Self {
        self.record.flag = flag;
        self
    }

    #[must_use]
    pub fn ref_id(mut self, ref_id: i32) -> Self {
        self.keep_bin = false;
        self.record.ref_id = ref_id;
        self
    }

    #[must_use]
    pub fn position(mut self, position: i32) -> Self {
        self.keep_bin = false;
        self.record.position = position;
        self
    }

    #[must_use]
    pub fn map_quality(mut self, map_quality: u8) -> Self {
        self.record.map_quality = map_quality;
        self
    }

    #[must_use]
    pub fn cigar(mut self, cigar: Cigar) -> Self {
        self.keep_bin = false;
        self.record.cigar = cigar;
        self
    }

    #[must_use]
    pub fn next_ref_id(mut self, next_ref_id: i32) -> Self {
        self.record.next_ref_id = next_ref_id;
        self
    }

    #[must_use]
    pub fn next_position(mut self, next_position: i32) -> Self {
        self.record.next_position = next_position;
        self
    }

    #[must_use]
    pub fn template_length(mut self, template_length: i32) -> Self {
        self.record.template_length = template_length;
        self
    }

    #[must_use]
    pub fn sequence(mut self, sequence: Sequence) -> Self {
        self.record.sequence = sequence;
        self
    }

    /// Phred qualities without the +33 offset; empty for absent.
    #[must_use]
    pub fn quality(mut self, quality: Vec<u8>) -> Self {
        self.record.quality = quality;
        self
    }

    /// Set a tag, replacing an existing value in place.
    #[must_use]
    pub fn tag(mut self, tag: Tag, value: TagValue) -> Self {
        match self.record.tags.iter_mut().find(|(key, _)| *key == tag) {
            Some(entry) => entry.1 = value,
            None => self.record.tags.push((tag, value)),
        }
        self
    }

    #[must_use]
    pub fn remove_tag(mut self, tag: &Tag) -> Self {
        self.record.tags.retain(|(key, _)| key != tag);
        self
    }

    #[must_use]
    pub fn clear_tags(mut self) -> Self {
        self.record.tags.clear();
        self
    }

    pub fn build(mut self) -> Result<AlignmentRecord> {
        validate(&self.record)?;
        if !self.keep_bin {
            self.record.bin = record_bin(&self.record);
        }
        Ok(self.record)
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn default_is_unmapped() {
        use super::RecordBuilder;

        let got = RecordBuilder::new().build().unwrap();

        assert_eq!(got.query_name(), "*");
        assert!(got.is_unmapped());
        assert_eq!(got.ref_id(), -1);
        assert_eq!(got.position(), -1);
        assert_eq!(got.map_quality(), 255);
    }

    #[test]
    fn tag_replaces_in_place() {
        use super::RecordBuilder;
        use crate::record::{Tag, TagValue};

        let got = RecordBuilder::new()
            .tag(Tag::new(b"NM"), TagValue::UInt8(1))
            .tag(Tag::new(b"AS"), TagValue::UInt8(50))
            .tag(Tag::new(b"NM"), TagValue::UInt8(4))
            .remove_tag(&Tag::new(b"AS"))
            .build()
            .unwrap();

        assert_eq!(got.tags(), &[(Tag::new(b"NM"), TagValue::UInt8(4))]);
    }

    #[test]
    fn build_checks_invariants() {
        use super::RecordBuilder;
        use crate::record::Sequence;

        let got = RecordBuilder::new().ref_id(0).build();
        assert!(got.unwrap_err().is_validation());

        let got = RecordBuilder::new()
            .sequence(Sequence::from_ascii(b"ACGT").unwrap())
            .quality(vec![30, 30])
            .build();
        assert!(got.unwrap_err().is_validation());

        let got = RecordBuilder::new().query_name("a\0b").build();
        assert!(got.unwrap_err().is_validation());
    }

    #[test]
    fn to_builder_keeps_other_fields() {
        use super::RecordBuilder;

        let record = RecordBuilder::new().query_name("r").flag(0).ref_id(2).position(7).build().unwrap();
        let got = record.to_builder().position(8).build().unwrap();

        assert_eq!(got.query_name(), "r");
        assert_eq!(got.ref_id(), 2);
        assert_eq!(got.position(), 8);
    }

    #[test]
    fn bin_follows_coordinates() {
        use super::RecordBuilder;
        use crate::record::codec::reg2bin;

        let record = RecordBuilder::new()
            .query_name("r").flag(0).ref_id(0).position(100).cigar("50M".parse().unwrap())
            .build().unwrap();
        assert_eq!(record.bin(), reg2bin(100, 150));
        assert_eq!(RecordBuilder::new().build().unwrap().bin(), 4680);

        // Untouched coordinates keep the stored bin
        let mut stored = record.clone();
        stored.bin = 1;
        assert_eq!(stored.to_builder().flag(16).build().unwrap().bin(), 1);
        assert_eq!(stored.to_builder().position(20000).build().unwrap().bin(), reg2bin(20000, 20050));
        assert_eq!(stored.to_builder().cigar("2M".parse().unwrap()).build().unwrap().bin(), reg2bin(100, 102));
    }
}
