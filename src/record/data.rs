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

//! Optional record fields (tags).
//!
//! Each tag is a two-character key, a one-byte type code and a value. The
//! type code is kept with the value so that a decoded record re-encodes to
//! the same bytes.
//!
//! | code | value                                   |
//! |------|-----------------------------------------|
//! | `A`  | [TagValue::Char]                        |
//! | `c`  | [TagValue::Int8]                        |
//! | `C`  | [TagValue::UInt8]                       |
//! | `s`  | [TagValue::Int16]                       |
//! | `S`  | [TagValue::UInt16]                      |
//! | `i`  | [TagValue::Int32]                       |
//! | `I`  | [TagValue::UInt32]                      |
//! | `f`  | [TagValue::Float]                       |
//! | `Z`  | [TagValue::String]                      |
//! | `H`  | [TagValue::Hex]                         |
//! | `B`  | [TagValue::Array], subtype then count   |
//!

use std::fmt;

/// Two-character tag key such as `NM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub [u8; 2]);

impl Tag {
    pub fn new(key: &[u8; 2]) -> Self {
        Tag(*key)
    }

    pub fn as_bytes(&self) -> &[u8; 2] {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.0[0] as char, self.0[1] as char)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TagArray {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Float(Vec<f32>),
}

impl TagArray {
    pub fn subtype(&self) -> u8 {
        match self {
            TagArray::Int8(_) => b'c',
            TagArray::UInt8(_) => b'C',
            TagArray::Int16(_) => b's',
            TagArray::UInt16(_) => b'S',
            TagArray::Int32(_) => b'i',
            TagArray::UInt32(_) => b'I',
            TagArray::Float(_) => b'f',
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TagArray::Int8(x) => x.len(),
            TagArray::UInt8(x) => x.len(),
            TagArray::Int16(x) => x.len(),
            TagArray::UInt16(x) => x.len(),
            TagArray::Int32(x) => x.len(),
            TagArray::UInt32(x) => x.len(),
            TagArray::Float(x) => x.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Char(u8),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Float(f32),
    String(String),
    Hex(String),
    Array(TagArray),
}

impl TagValue {
    /// BAM type code of the value.
    pub fn type_code(&self) -> u8 {
        match self {
            TagValue::Char(_) => b'A',
            TagValue::Int8(_) => b'c',
            TagValue::UInt8(_) => b'C',
            TagValue::Int16(_) => b's',
            TagValue::UInt16(_) => b'S',
            TagValue::Int32(_) => b'i',
            TagValue::UInt32(_) => b'I',
            TagValue::Float(_) => b'f',
            TagValue::String(_) => b'Z',
            TagValue::Hex(_) => b'H',
            TagValue::Array(_) => b'B',
        }
    }

    /// Integer value regardless of width, or None for other types.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            TagValue::Int8(x) => Some(*x as i64),
            TagValue::UInt8(x) => Some(*x as i64),
            TagValue::Int16(x) => Some(*x as i64),
            TagValue::UInt16(x) => Some(*x as i64),
            TagValue::Int32(x) => Some(*x as i64),
            TagValue::UInt32(x) => Some(*x as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::String(x) | TagValue::Hex(x) => Some(x),
            _ => None,
        }
    }
}

fn join<T: fmt::Display>(values: &[T], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for value in values {
        write!(f, ",{value}")?;
    }
    Ok(())
}

/// SAM text form `TYPE:VALUE`, with integer types shown as `i`.
impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Char(x) => write!(f, "A:{}", *x as char),
            TagValue::Float(x) => write!(f, "f:{x}"),
            TagValue::String(x) => write!(f, "Z:{x}"),
            TagValue::Hex(x) => write!(f, "H:{x}"),
            TagValue::Array(array) => {
                write!(f, "B:{}", array.subtype() as char)?;
                match array {
                    TagArray::Int8(x) => join(x, f),
                    TagArray::UInt8(x) => join(x, f),
                    TagArray::Int16(x) => join(x, f),
                    TagArray::UInt16(x) => join(x, f),
                    TagArray::Int32(x) => join(x, f),
                    TagArray::UInt32(x) => join(x, f),
                    TagArray::Float(x) => join(x, f),
                }
            },
            int => write!(f, "i:{}", int.as_int().unwrap_or_default()),
        }
    }
}
