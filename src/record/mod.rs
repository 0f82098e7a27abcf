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

//! Alignment records.
//!
//! [AlignmentRecord] is an immutable value. Records are created by
//! [decode](codec::decode) or [RecordBuilder], and modified copies are made
//! with [AlignmentRecord::to_builder].
//!
//! The binary layout of a record is:
//!
//! - 4 bytes: length of the rest of the record (block_size).
//! - 32 bytes: fixed fields, see [codec].
//! - l_read_name bytes: NUL-terminated read name.
//! - n_cigar_op * 4 bytes: CIGAR operations, see [cigar].
//! - (l_seq + 1) / 2 bytes: 4-bit encoded sequence, high nibble first.
//! - l_seq bytes: base qualities, 0xFF when absent.
//! - Remaining bytes: tags, see [data].
//!

pub mod builder;
pub mod cigar;
pub mod codec;
pub mod data;

pub use builder::RecordBuilder;
pub use cigar::Cigar;
pub use data::{Tag, TagArray, TagValue};

use std::fmt;

use crate::error::{Result, ValidationError};

/// 4-bit base codes in code order.
pub const BASES: &[u8; 16] = b"=ACMGRSVTWYHKDBN";

/// Read sequence stored as one 4-bit base code per base.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Sequence(Vec<u8>);

impl Sequence {
    /// Build from 4-bit base codes, failing on codes above 15.
    pub fn from_codes(codes: Vec<u8>) -> Result<Self> {
        if let Some(code) = codes.iter().find(|x| **x > 15) {
            return Err(ValidationError::InvalidBaseCode(*code).into());
        }
        Ok(Sequence(codes))
    }

    /// Build from IUPAC text such as `ACGTN`. Lowercase bases are accepted.
    ///
    /// ## Usage
    /// ```rust
    /// use lazybam::record::Sequence;
    ///
    /// let seq = Sequence::from_ascii(b"ACGTn").unwrap();
    /// assert_eq!(seq.codes(), &[1, 2, 4, 8, 15]);
    /// assert_eq!(seq.to_string(), "ACGTN");
    /// ```
    ///
    pub fn from_ascii(bases: &[u8]) -> Result<Self> {
        let codes = bases.iter().map(|base| {
            let upper = base.to_ascii_uppercase();
            BASES.iter()
                 .position(|x| *x == upper)
                 .map(|x| x as u8)
                 .ok_or(ValidationError::InvalidBase(*base as char))
        }).collect::<std::result::Result<Vec<u8>, ValidationError>>()?;
        Ok(Sequence(codes))
    }

    pub(crate) fn from_codes_unchecked(codes: Vec<u8>) -> Self {
        Sequence(codes)
    }

    pub fn codes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_ascii(&self) -> Vec<u8> {
        self.0.iter().map(|x| BASES[*x as usize]).collect()
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "*");
        }
        for code in &self.0 {
            write!(f, "{}", BASES[*code as usize] as char)?;
        }
        Ok(())
    }
}

/// A single alignment record.
///
/// Invariants checked before encoding and by [RecordBuilder::build]:
///
/// - `quality` is empty (absent) or as long as `sequence`.
/// - `ref_id` is -1 exactly when `position` is -1.
///
/// Decoded records are kept as found on disk, including quality strings
/// of 0xFF bytes and the stored `bin`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRecord {
    pub(crate) query_name: String,
    pub(crate) flag: u16,
    pub(crate) ref_id: i32,
    pub(crate) position: i32,
    pub(crate) map_quality: u8,
    pub(crate) bin: u16,
    pub(crate) cigar: Cigar,
    pub(crate) next_ref_id: i32,
    pub(crate) next_position: i32,
    pub(crate) template_length: i32,
    pub(crate) sequence: Sequence,
    pub(crate) quality: Vec<u8>,
    pub(crate) tags: Vec<(Tag, TagValue)>,
}

impl AlignmentRecord {
    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    pub fn flag(&self) -> u16 {
        self.flag
    }

    /// Index into the header's reference table, -1 if unplaced.
    pub fn ref_id(&self) -> i32 {
        self.ref_id
    }

    /// 0-based leftmost position, -1 if unplaced.
    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn map_quality(&self) -> u8 {
        self.map_quality
    }

    /// BAI bin of the alignment span.
    pub fn bin(&self) -> u16 {
        self.bin
    }

    pub fn cigar(&self) -> &Cigar {
        &self.cigar
    }

    pub fn next_ref_id(&self) -> i32 {
        self.next_ref_id
    }

    pub fn next_position(&self) -> i32 {
        self.next_position
    }

    pub fn template_length(&self) -> i32 {
        self.template_length
    }

    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    /// Phred base qualities; empty when absent.
    pub fn quality(&self) -> &[u8] {
        &self.quality
    }

    pub fn has_quality(&self) -> bool {
        self.quality.first().is_some_and(|x| *x != 0xff)
    }

    pub fn tags(&self) -> &[(Tag, TagValue)] {
        &self.tags
    }

    pub fn tag(&self, tag: &Tag) -> Option<&TagValue> {
        self.tags.iter().find(|(key, _)| key == tag).map(|(_, value)| value)
    }

    pub fn is_unmapped(&self) -> bool {
        self.flag & 0x4 != 0
    }

    /// Start a builder from a copy of this record.
    pub fn to_builder(&self) -> RecordBuilder {
        RecordBuilder::from_record(self.clone())
    }
}

/// Tab-separated SAM line, with reference names resolved by the caller.
pub struct SamLine<'a> {
    pub record: &'a AlignmentRecord,
    pub header: &'a crate::headers::file::Header,
}

impl fmt::Display for SamLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ref_name = |id: i32| self.header.reference(id).map_or("*", |x| x.name.as_str());
        let record = self.record;

        let next_ref_name = if record.next_ref_id >= 0 && record.next_ref_id == record.ref_id {
            "="
        } else {
            ref_name(record.next_ref_id)
        };

        write!(f, "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t",
               record.query_name, record.flag, ref_name(record.ref_id), record.position as i64 + 1,
               record.map_quality, record.cigar, next_ref_name, record.next_position as i64 + 1,
               record.template_length, record.sequence)?;

        if record.has_quality() {
            for x in &record.quality {
                write!(f, "{}", (x.saturating_add(33)) as char)?;
            }
        } else {
            write!(f, "*")?;
        }

        for (tag, value) in &record.tags {
            write!(f, "\t{tag}:{value}")?;
        }
        Ok(())
    }
}
