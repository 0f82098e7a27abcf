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

//! CIGAR operations.
//!
//! In BAM each operation is a little-endian u32 with the operation length in
//! the high 28 bits and the operation code in the low 4 bits. The codes index
//! into `MIDNSHP=X`.
//!

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, FormatError, Result, ValidationError};

/// Largest length a single operation can store.
pub const MAX_OP_LEN: u32 = (1 << 28) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Match,
    Insertion,
    Deletion,
    Skip,
    SoftClip,
    HardClip,
    Pad,
    SequenceMatch,
    SequenceMismatch,
}

const KINDS: [Kind; 9] = [
    Kind::Match,
    Kind::Insertion,
    Kind::Deletion,
    Kind::Skip,
    Kind::SoftClip,
    Kind::HardClip,
    Kind::Pad,
    Kind::SequenceMatch,
    Kind::SequenceMismatch,
];

const SYMBOLS: &[u8; 9] = b"MIDNSHP=X";

impl Kind {
    pub fn from_code(code: u8) -> Result<Self> {
        KINDS.get(code as usize)
             .copied()
             .ok_or(FormatError::InvalidCigarOp(code).into())
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_symbol(symbol: u8) -> Option<Self> {
        SYMBOLS.iter().position(|x| *x == symbol).map(|i| KINDS[i])
    }

    pub fn symbol(&self) -> char {
        SYMBOLS[self.code() as usize] as char
    }

    /// Whether the operation advances along the reference.
    pub fn consumes_reference(&self) -> bool {
        matches!(self, Kind::Match | Kind::Deletion | Kind::Skip | Kind::SequenceMatch | Kind::SequenceMismatch)
    }

    /// Whether the operation advances along the read sequence.
    pub fn consumes_query(&self) -> bool {
        matches!(self, Kind::Match | Kind::Insertion | Kind::SoftClip | Kind::SequenceMatch | Kind::SequenceMismatch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Op {
    kind: Kind,
    len: u32,
}

impl Op {
    pub fn new(kind: Kind, len: u32) -> Self {
        Op { kind, len }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Unpack an operation from its BAM representation.
    pub fn from_packed(value: u32) -> Result<Self> {
        let kind = Kind::from_code((value & 0xf) as u8)?;
        Ok(Op { kind, len: value >> 4 })
    }

    /// Pack into the BAM representation.
    ///
    /// Lengths above [MAX_OP_LEN] are rejected by the record encoder before
    /// this is called.
    pub fn to_packed(&self) -> u32 {
        (self.len << 4) | self.kind.code() as u32
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.len, self.kind.symbol())
    }
}

/// Ordered list of CIGAR operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Cigar(Vec<Op>);

impl Cigar {
    pub fn new(ops: Vec<Op>) -> Self {
        Cigar(ops)
    }

    pub fn ops(&self) -> &[Op] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Op> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of reference bases covered by the alignment.
    pub fn reference_span(&self) -> u64 {
        self.0.iter()
              .filter(|op| op.kind.consumes_reference())
              .map(|op| op.len as u64)
              .sum()
    }

    /// Number of read bases described by the alignment.
    pub fn query_len(&self) -> u64 {
        self.0.iter()
              .filter(|op| op.kind.consumes_query())
              .map(|op| op.len as u64)
              .sum()
    }
}

impl From<Vec<Op>> for Cigar {
    fn from(ops: Vec<Op>) -> Self {
        Cigar(ops)
    }
}

impl fmt::Display for Cigar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "*");
        }
        for op in &self.0 {
            write!(f, "{op}")?;
        }
        Ok(())
    }
}

/// Parse SAM text such as `10M2I5S`; `*` is the empty CIGAR.
impl FromStr for Cigar {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "*" {
            return Ok(Cigar::default());
        }
        let mut ops: Vec<Op> = Vec::new();
        let mut len: u64 = 0;
        let mut has_digits = false;
        for byte in s.bytes() {
            if byte.is_ascii_digit() {
                len = len * 10 + (byte - b'0') as u64;
                if len > MAX_OP_LEN as u64 {
                    return Err(ValidationError::CigarOpTooLong(len.min(u32::MAX as u64) as u32).into());
                }
                has_digits = true;
            } else {
                let kind = Kind::from_symbol(byte).ok_or(FormatError::InvalidCigarOp(byte))?;
                if !has_digits {
                    return Err(FormatError::InvalidCigarOp(byte).into());
                }
                ops.push(Op::new(kind, len as u32));
                len = 0;
                has_digits = false;
            }
        }
        if has_digits {
            return Err(FormatError::InvalidCigarOp(s.as_bytes()[s.len() - 1]).into());
        }
        Ok(Cigar(ops))
    }
}

// Tests
#[cfg(test)]
mod tests {

    #[test]
    fn packed_round_trip() {
        use super::{Kind, Op};

        let op = Op::new(Kind::SoftClip, 12);
        assert_eq!(op.to_packed(), (12 << 4) | 4);

        let got = Op::from_packed((7 << 4) | 8).unwrap();
        assert_eq!(got, Op::new(Kind::SequenceMismatch, 7));
    }

    #[test]
    fn unknown_op_code() {
        use super::Op;

        let got = Op::from_packed((3 << 4) | 9);
        assert!(got.unwrap_err().is_format());
    }

    #[test]
    fn reference_span_and_query_len() {
        use super::Cigar;

        let cigar: Cigar = "5S10M2I3D4N6=1X2H".parse().unwrap();

        assert_eq!(cigar.len(), 8);
        assert_eq!(cigar.reference_span(), 10 + 3 + 4 + 6 + 1);
        assert_eq!(cigar.query_len(), 5 + 10 + 2 + 6 + 1);
    }

    #[test]
    fn display_matches_sam_text() {
        use super::Cigar;

        let cigar: Cigar = "3S97M".parse().unwrap();
        assert_eq!(cigar.to_string(), "3S97M");
        assert_eq!(Cigar::default().to_string(), "*");
    }

    #[test]
    fn parse_rejects_malformed_text() {
        use super::Cigar;

        assert!("10Q".parse::<Cigar>().is_err());
        assert!("M".parse::<Cigar>().is_err());
        assert!("10M5".parse::<Cigar>().is_err());
        assert!("*".parse::<Cigar>().unwrap().is_empty());
    }
}
