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

//! Coordinate sort order.
//!
//! Records are ordered by reference id, then position, then read name.
//! Unplaced records (reference id -1) sort after every placed record.
//!

use std::cmp::Ordering;

use crate::record::AlignmentRecord;

/// Key that orders records by genomic coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey<'a> {
    ref_id: u32,
    position: i32,
    query_name: &'a str,
}

impl<'a> SortKey<'a> {
    pub fn new(record: &'a AlignmentRecord) -> Self {
        // -1 maps to u32::MAX, every valid id is below i32::MAX
        let ref_id = if record.ref_id() < 0 { u32::MAX } else { record.ref_id() as u32 };
        SortKey {
            ref_id,
            position: record.position(),
            query_name: record.query_name(),
        }
    }
}

impl AlignmentRecord {
    pub fn sort_key(&self) -> SortKey<'_> {
        SortKey::new(self)
    }
}

pub fn coordinate_cmp(
    a: &AlignmentRecord,
    b: &AlignmentRecord,
) -> Ordering {
    a.sort_key().cmp(&b.sort_key())
}

/// Stable in-place coordinate sort.
pub fn sort_records(records: &mut [AlignmentRecord]) {
    records.sort_by(coordinate_cmp);
}

/// Whether `records` is non-decreasing in coordinate order.
pub fn is_sorted(records: &[AlignmentRecord]) -> bool {
    records.windows(2).all(|x| coordinate_cmp(&x[0], &x[1]) != Ordering::Greater)
}
