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

//! Binary record codec.
//!
//! The 32 fixed bytes after the length prefix are, in order: refID (i32),
//! pos (i32), l_read_name (u8), mapq (u8), bin (u16), n_cigar_op (u16),
//! flag (u16), l_seq (u32), next_refID (i32), next_pos (i32), tlen (i32).
//!

use bincode::{Decode, Encode};

use crate::error::{FormatError, Result, ValidationError};
use crate::headers::file::Header;
use crate::headers::{decode_fixed, encode_fixed};
use crate::record::cigar::{Op, MAX_OP_LEN};
use crate::record::data::{TagArray, TagValue};
use crate::record::{AlignmentRecord, Cigar, Sequence, Tag};

/// Bytes in the fixed part of a record, after the length prefix.
pub const FIXED_FIELDS_LEN: usize = 32;

/// Longest read name, excluding the NUL terminator.
pub const MAX_NAME_LEN: usize = 254;

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq)]
struct FixedFields {
    ref_id: i32,
    pos: i32,
    l_read_name: u8,
    mapq: u8,
    bin: u16,
    n_cigar_op: u16,
    flag: u16,
    l_seq: u32,
    next_ref_id: i32,
    next_pos: i32,
    tlen: i32,
}

/// Compute the BAI bin of the 0-based half-open interval `[beg, end)`.
pub fn reg2bin(
    beg: i64,
    end: i64,
) -> u16 {
    let end = end - 1;
    let bin = if beg >> 14 == end >> 14 {
        ((1 << 15) - 1) / 7 + (beg >> 14)
    } else if beg >> 17 == end >> 17 {
        ((1 << 12) - 1) / 7 + (beg >> 17)
    } else if beg >> 20 == end >> 20 {
        ((1 << 9) - 1) / 7 + (beg >> 20)
    } else if beg >> 23 == end >> 23 {
        ((1 << 6) - 1) / 7 + (beg >> 23)
    } else if beg >> 26 == end >> 26 {
        ((1 << 3) - 1) / 7 + (beg >> 26)
    } else {
        0
    };
    bin as u16
}

/// Bin of a record, computed over its reference span (at least one base).
pub fn record_bin(record: &AlignmentRecord) -> u16 {
    let beg = record.position as i64;
    let span = (record.cigar.reference_span() as i64).max(1);
    reg2bin(beg, beg + span)
}

/// Check the invariants a record must satisfy to be encoded.
pub fn validate(record: &AlignmentRecord) -> Result<()> {
    if !record.quality.is_empty() && record.quality.len() != record.sequence.len() {
        return Err(ValidationError::SequenceQualityMismatch {
            sequence: record.sequence.len(),
            quality: record.quality.len(),
        }.into());
    }
    if (record.ref_id == -1) != (record.position == -1) {
        return Err(ValidationError::UnplacedMismatch {
            ref_id: record.ref_id,
            position: record.position,
        }.into());
    }
    if record.query_name.len() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong(record.query_name.len()).into());
    }
    if record.query_name.as_bytes().contains(&0) {
        return Err(ValidationError::NameContainsNul.into());
    }
    if record.cigar.len() > u16::MAX as usize {
        return Err(ValidationError::TooManyCigarOps(record.cigar.len()).into());
    }
    if let Some(op) = record.cigar.iter().find(|op| op.len() > MAX_OP_LEN) {
        return Err(ValidationError::CigarOpTooLong(op.len()).into());
    }
    if let Some(code) = record.sequence.codes().iter().find(|x| **x > 15) {
        return Err(ValidationError::InvalidBaseCode(*code).into());
    }
    if record.sequence.len() > i32::MAX as usize {
        return Err(ValidationError::RecordTooLarge(record.sequence.len()).into());
    }
    for (tag, value) in &record.tags {
        match value {
            TagValue::String(x) | TagValue::Hex(x) if x.as_bytes().contains(&0) => {
                return Err(ValidationError::TagContainsNul(tag.to_string()).into());
            },
            TagValue::Array(array) if array.len() > i32::MAX as usize => {
                return Err(ValidationError::ArrayTooLong {
                    tag: tag.to_string(),
                    len: array.len(),
                    max: i32::MAX as usize,
                }.into());
            },
            _ => (),
        }
    }
    Ok(())
}

// Bounds-checked view over the bytes after the length prefix.
struct Fields<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.bytes.len()).ok_or(
            FormatError::RecordLengthMismatch {
                declared: self.bytes.len(),
                actual: self.pos.saturating_add(n),
            }
        )?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0_u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_cstr(&mut self, what: &'static str) -> Result<String> {
        let rest = &self.bytes[self.pos..];
        let len = rest.iter().position(|x| *x == 0).ok_or(FormatError::MissingNulTerminator(what))?;
        let bytes = self.take(len + 1)?;
        let value = std::str::from_utf8(&bytes[..len]).map_err(|_| FormatError::InvalidUtf8(what))?;
        Ok(value.to_string())
    }

    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

macro_rules! take_values {
    ($fields:expr, $count:expr, $ty:ty) => {{
        let width = std::mem::size_of::<$ty>();
        let bytes = $fields.take($count.checked_mul(width).unwrap_or(usize::MAX))?;
        bytes.chunks_exact(width)
             .map(|x| {
                 let mut buf = [0_u8; std::mem::size_of::<$ty>()];
                 buf.copy_from_slice(x);
                 <$ty>::from_le_bytes(buf)
             })
             .collect::<Vec<$ty>>()
    }};
}

fn decode_tag_value(
    fields: &mut Fields,
    tag: &Tag,
    type_code: u8,
) -> Result<TagValue> {
    let value = match type_code {
        b'A' => TagValue::Char(fields.take_u8()?),
        b'c' => TagValue::Int8(i8::from_le_bytes(fields.take_array()?)),
        b'C' => TagValue::UInt8(fields.take_u8()?),
        b's' => TagValue::Int16(i16::from_le_bytes(fields.take_array()?)),
        b'S' => TagValue::UInt16(u16::from_le_bytes(fields.take_array()?)),
        b'i' => TagValue::Int32(i32::from_le_bytes(fields.take_array()?)),
        b'I' => TagValue::UInt32(u32::from_le_bytes(fields.take_array()?)),
        b'f' => TagValue::Float(f32::from_le_bytes(fields.take_array()?)),
        b'Z' => TagValue::String(fields.take_cstr("string tag")?),
        b'H' => TagValue::Hex(fields.take_cstr("hex tag")?),
        b'B' => {
            let subtype = fields.take_u8()?;
            let count = u32::from_le_bytes(fields.take_array()?) as usize;
            let array = match subtype {
                b'c' => TagArray::Int8(take_values!(fields, count, i8)),
                b'C' => TagArray::UInt8(take_values!(fields, count, u8)),
                b's' => TagArray::Int16(take_values!(fields, count, i16)),
                b'S' => TagArray::UInt16(take_values!(fields, count, u16)),
                b'i' => TagArray::Int32(take_values!(fields, count, i32)),
                b'I' => TagArray::UInt32(take_values!(fields, count, u32)),
                b'f' => TagArray::Float(take_values!(fields, count, f32)),
                _ => {
                    return Err(FormatError::UnknownArraySubtype {
                        tag: tag.to_string(),
                        subtype: subtype as char,
                    }.into());
                },
            };
            TagValue::Array(array)
        },
        _ => {
            return Err(FormatError::UnknownTagType {
                tag: tag.to_string(),
                type_code: type_code as char,
            }.into());
        },
    };
    Ok(value)
}

fn check_ref_id(
    id: i32,
    header: &Header,
) -> Result<()> {
    if id < -1 || (id >= 0 && id as usize >= header.reference_count()) {
        return Err(FormatError::InvalidReferenceId { id, n_refs: header.reference_count() }.into());
    }
    Ok(())
}

/// Decode the record body that follows the length prefix.
///
/// `bytes` must be exactly the `block_size` bytes declared by the prefix.
pub fn decode_body(
    bytes: &[u8],
    header: &Header,
) -> Result<AlignmentRecord> {
    if bytes.len() < FIXED_FIELDS_LEN {
        return Err(FormatError::RecordTooShort(bytes.len() as i64).into());
    }
    let fixed: FixedFields = decode_fixed(&bytes[..FIXED_FIELDS_LEN])?;
    check_ref_id(fixed.ref_id, header)?;
    check_ref_id(fixed.next_ref_id, header)?;

    let mut fields = Fields { bytes, pos: FIXED_FIELDS_LEN };

    let name_bytes = fields.take(fixed.l_read_name as usize)?;
    let query_name = match name_bytes.split_last() {
        Some((&0, name)) => std::str::from_utf8(name).map_err(|_| FormatError::InvalidUtf8("read name"))?.to_string(),
        _ => return Err(FormatError::MissingNulTerminator("read name").into()),
    };

    let ops = take_values!(fields, fixed.n_cigar_op as usize, u32)
        .into_iter()
        .map(Op::from_packed)
        .collect::<Result<Vec<Op>>>()?;

    let l_seq = fixed.l_seq as usize;
    let packed = fields.take(l_seq.div_ceil(2))?;
    let mut codes: Vec<u8> = Vec::with_capacity(l_seq);
    for byte in packed {
        codes.push(byte >> 4);
        codes.push(byte & 0xf);
    }
    codes.truncate(l_seq);

    let quality = fields.take(l_seq)?.to_vec();

    let mut tags: Vec<(Tag, TagValue)> = Vec::new();
    while !fields.is_empty() {
        let tag = Tag(fields.take_array()?);
        let type_code = fields.take_u8()?;
        let value = decode_tag_value(&mut fields, &tag, type_code)?;
        tags.push((tag, value));
    }

    Ok(AlignmentRecord {
        query_name,
        flag: fixed.flag,
        ref_id: fixed.ref_id,
        position: fixed.pos,
        map_quality: fixed.mapq,
        bin: fixed.bin,
        cigar: Cigar::new(ops),
        next_ref_id: fixed.next_ref_id,
        next_position: fixed.next_pos,
        template_length: fixed.tlen,
        sequence: Sequence::from_codes_unchecked(codes),
        quality,
        tags,
    })
}

/// Decode a single length-prefixed record.
///
/// Reference ids are checked against `header`.
///
/// ## Usage
/// ```rust
/// use lazybam::headers::file::{Header, Reference};
/// use lazybam::record::RecordBuilder;
/// use lazybam::record::codec::{decode, encode};
///
/// let header = Header::new(b"", vec![Reference::new("chr1", 5000)]);
/// let record = RecordBuilder::new().query_name("r1").flag(0).ref_id(0).position(10).build().unwrap();
///
/// let bytes = encode(&record).unwrap();
/// let got = decode(&bytes, &header).unwrap();
/// assert_eq!(got, record);
/// ```
///
pub fn decode(
    bytes: &[u8],
    header: &Header,
) -> Result<AlignmentRecord> {
    if bytes.len() < 4 {
        return Err(FormatError::RecordTooShort(bytes.len() as i64).into());
    }
    let block_size = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if block_size < FIXED_FIELDS_LEN as i32 {
        return Err(FormatError::RecordTooShort(block_size as i64).into());
    }
    if block_size as usize != bytes.len() - 4 {
        return Err(FormatError::RecordLengthMismatch {
            declared: block_size as usize,
            actual: bytes.len() - 4,
        }.into());
    }
    decode_body(&bytes[4..], header)
}

fn encode_tag_value(
    value: &TagValue,
    out: &mut Vec<u8>,
) {
    match value {
        TagValue::Char(x) => out.push(*x),
        TagValue::Int8(x) => out.extend_from_slice(&x.to_le_bytes()),
        TagValue::UInt8(x) => out.push(*x),
        TagValue::Int16(x) => out.extend_from_slice(&x.to_le_bytes()),
        TagValue::UInt16(x) => out.extend_from_slice(&x.to_le_bytes()),
        TagValue::Int32(x) => out.extend_from_slice(&x.to_le_bytes()),
        TagValue::UInt32(x) => out.extend_from_slice(&x.to_le_bytes()),
        TagValue::Float(x) => out.extend_from_slice(&x.to_le_bytes()),
        TagValue::String(x) | TagValue::Hex(x) => {
            out.extend_from_slice(x.as_bytes());
            out.push(0);
        },
        TagValue::Array(array) => {
            out.push(array.subtype());
            out.extend_from_slice(&(array.len() as u32).to_le_bytes());
            match array {
                TagArray::Int8(x) => x.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
                TagArray::UInt8(x) => out.extend_from_slice(x),
                TagArray::Int16(x) => x.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
                TagArray::UInt16(x) => x.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
                TagArray::Int32(x) => x.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
                TagArray::UInt32(x) => x.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
                TagArray::Float(x) => x.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
            }
        },
    }
}

/// Append the length-prefixed encoding of `record` to `out`.
///
/// Nothing is appended if the record fails [validate].
pub fn encode_into(
    record: &AlignmentRecord,
    out: &mut Vec<u8>,
) -> Result<()> {
    validate(record)?;

    let start = out.len();
    out.extend_from_slice(&[0_u8; 4]);

    let fixed = FixedFields {
        ref_id: record.ref_id,
        pos: record.position,
        l_read_name: (record.query_name.len() + 1) as u8,
        mapq: record.map_quality,
        bin: record.bin,
        n_cigar_op: record.cigar.len() as u16,
        flag: record.flag,
        l_seq: record.sequence.len() as u32,
        next_ref_id: record.next_ref_id,
        next_pos: record.next_position,
        tlen: record.template_length,
    };
    encode_fixed(&fixed, out)?;

    out.extend_from_slice(record.query_name.as_bytes());
    out.push(0);

    for op in record.cigar.iter() {
        out.extend_from_slice(&op.to_packed().to_le_bytes());
    }

    for pair in record.sequence.codes().chunks(2) {
        let low = pair.get(1).copied().unwrap_or(0);
        out.push((pair[0] << 4) | low);
    }

    if record.quality.is_empty() {
        out.resize(out.len() + record.sequence.len(), 0xff);
    } else {
        out.extend_from_slice(&record.quality);
    }

    for (tag, value) in &record.tags {
        out.extend_from_slice(tag.as_bytes());
        out.push(value.type_code());
        encode_tag_value(value, out);
    }

    let block_size = out.len() - start - 4;
    if block_size > i32::MAX as usize {
        out.truncate(start);
        return Err(ValidationError::RecordTooLarge(block_size).into());
    }
    out[start..(start + 4)].copy_from_slice(&(block_size as i32).to_le_bytes());

    Ok(())
}

/// Encode `record` with its length prefix.
pub fn encode(record: &AlignmentRecord) -> Result<Vec<u8>> {
    let mut out: Vec<u8> = Vec::new();
    encode_into(record, &mut out)?;
    Ok(out)
}
