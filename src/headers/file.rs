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
use crate::error::{FormatError, Result};

/// BAM magic bytes.
pub const BAM_MAGIC: [u8; 4] = *b"BAM\x01";

/// A reference sequence in the header dictionary.
///
/// The id of a reference is its position in [Header::references].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Reference {
    pub name: String,
    pub length: u32,
}

impl Reference {
    pub fn new(name: &str, length: u32) -> Self {
        Reference { name: name.to_string(), length }
    }
}

/// BAM file header: SAM text plus the reference dictionary.
///
/// The text is kept as raw bytes so that [Header::serialize] reproduces the
/// parsed bytes exactly, including any NUL padding written by other tools.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Header {
    text: Vec<u8>,
    references: Vec<Reference>,
}

impl Header {
    pub fn new(text: &[u8], references: Vec<Reference>) -> Self {
        Header { text: text.to_vec(), references }
    }

    /// SAM header text.
    pub fn text(&self) -> &[u8] {
        &self.text
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn reference(&self, id: i32) -> Option<&Reference> {
        usize::try_from(id).ok().and_then(|idx| self.references.get(idx))
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Check that `other` uses the same coordinate space.
    ///
    /// Returns a description of the first difference, or None if the
    /// reference counts and names agree.
    pub fn incompatibility(&self, other: &Header) -> Option<String> {
        if self.references.len() != other.references.len() {
            return Some(format!(
                "{} references, expected {}",
                other.references.len(), self.references.len()
            ));
        }
        self.references.iter().zip(other.references.iter()).enumerate()
            .find(|(_, (mine, theirs))| mine.name != theirs.name)
            .map(|(idx, (mine, theirs))| format!(
                "reference {} is named '{}', expected '{}'",
                idx, theirs.name, mine.name
            ))
    }

    pub fn is_compatible_with(&self, other: &Header) -> bool {
        self.incompatibility(other).is_none()
    }

    /// Build a header from SAM header text.
    ///
    /// The reference table is taken from the `SN` and `LN` fields of the
    /// `@SQ` lines, in order. The text itself is stored unchanged.
    ///
    /// ## Usage
    /// ```rust
    /// use lazybam::headers::file::Header;
    ///
    /// let text = b"@HD\tVN:1.6\tSO:coordinate\n@SQ\tSN:chr1\tLN:248956422\n@SQ\tSN:chrM\tLN:16569\n";
    /// let header = Header::from_sam_text(text).unwrap();
    ///
    /// assert_eq!(header.reference_count(), 2);
    /// assert_eq!(header.references()[1].name, "chrM");
    /// assert_eq!(header.references()[1].length, 16569);
    /// ```
    ///
    pub fn from_sam_text(
        text: &[u8],
    ) -> Result<Self> {
        let contents = std::str::from_utf8(text).map_err(|_| FormatError::InvalidUtf8("header text"))?;

        let mut references: Vec<Reference> = Vec::new();
        for (idx, line) in contents.lines().enumerate().filter(|(_, line)| line.starts_with("@SQ\t")) {
            let invalid = |reason: String| FormatError::InvalidSamHeader { line: idx + 1, reason };
            let mut name: Option<&str> = None;
            let mut length: Option<&str> = None;
            for field in line.split('\t').skip(1) {
                if let Some(value) = field.strip_prefix("SN:") {
                    name = Some(value);
                } else if let Some(value) = field.strip_prefix("LN:") {
                    length = Some(value);
                }
            }
            let name = name.ok_or_else(|| invalid("missing SN field".to_string()))?;
            let length = length.ok_or_else(|| invalid("missing LN field".to_string()))?;
            let length = length.parse::<u32>().map_err(|_| invalid(format!("invalid LN value '{length}'")))?;
            references.push(Reference::new(name, length));
        }

        Ok(Header { text: text.to_vec(), references })
    }

    /// Parse a serialized BAM header.
    ///
    /// `bytes` must contain exactly the header: magic, text and the
    /// reference dictionary.
    ///
    /// ## Usage
    /// ```rust
    /// use lazybam::headers::file::{Header, Reference};
    ///
    /// let header = Header::new(b"@SQ\tSN:chr1\tLN:1000\n", vec![Reference::new("chr1", 1000)]);
    /// let bytes = header.serialize();
    ///
    /// let parsed = Header::parse(&bytes).unwrap();
    /// assert_eq!(parsed, header);
    /// assert_eq!(parsed.serialize(), bytes);
    /// ```
    ///
    pub fn parse(
        bytes: &[u8],
    ) -> Result<Self> {
        let (header, consumed) = parse_prefix(bytes)?;
        if consumed != bytes.len() {
            return Err(FormatError::TrailingHeaderBytes(bytes.len() - consumed).into());
        }
        Ok(header)
    }

    /// Serialize the header into its BAM binary form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = Vec::with_capacity(12 + self.text.len() + 32 * self.references.len());
        bytes.extend_from_slice(&BAM_MAGIC);
        bytes.extend_from_slice(&(self.text.len() as i32).to_le_bytes());
        bytes.extend_from_slice(&self.text);
        bytes.extend_from_slice(&(self.references.len() as i32).to_le_bytes());
        self.references.iter().for_each(|reference| {
            bytes.extend_from_slice(&(reference.name.len() as i32 + 1).to_le_bytes());
            bytes.extend_from_slice(reference.name.as_bytes());
            bytes.push(0);
            bytes.extend_from_slice(&reference.length.to_le_bytes());
        });
        bytes
    }
}

fn read_length(
    bytes: &[u8],
    pos: &mut usize,
    field: &'static str,
) -> Result<usize> {
    let available = bytes.len().saturating_sub(*pos);
    if available < 4 {
        return Err(FormatError::InvalidHeaderLength { field, length: 4, available }.into());
    }
    let value = i32::from_le_bytes([bytes[*pos], bytes[*pos + 1], bytes[*pos + 2], bytes[*pos + 3]]);
    *pos += 4;
    if value < 0 {
        return Err(FormatError::InvalidHeaderLength { field, length: value as i64, available: available - 4 }.into());
    }
    Ok(value as usize)
}

fn take<'a>(
    bytes: &'a [u8],
    pos: &mut usize,
    len: usize,
    field: &'static str,
) -> Result<&'a [u8]> {
    let available = bytes.len().saturating_sub(*pos);
    if len > available {
        return Err(FormatError::InvalidHeaderLength { field, length: len as i64, available }.into());
    }
    let slice = &bytes[*pos..(*pos + len)];
    *pos += len;
    Ok(slice)
}

/// Parse a header from the start of `bytes`.
///
/// Returns the header and the number of bytes it occupies. Trailing bytes
/// after the reference dictionary are not examined.
pub fn parse_prefix(
    bytes: &[u8],
) -> Result<(Header, usize)> {
    if bytes.len() < 4 || bytes[..4] != BAM_MAGIC {
        let mut found = [0_u8; 4];
        bytes.iter().take(4).enumerate().for_each(|(idx, byte)| found[idx] = *byte);
        return Err(FormatError::InvalidFileMagic(found).into());
    }
    let mut pos = 4;

    let l_text = read_length(bytes, &mut pos, "text")?;
    let text = take(bytes, &mut pos, l_text, "text")?.to_vec();

    let n_ref = read_length(bytes, &mut pos, "reference count")?;
    let mut references: Vec<Reference> = Vec::with_capacity(n_ref.min(bytes.len() / 9));
    for _ in 0..n_ref {
        let l_name = read_length(bytes, &mut pos, "reference name")?;
        let name = take(bytes, &mut pos, l_name, "reference name")?;
        let name = match name.split_last() {
            Some((&0, name)) => name,
            _ => return Err(FormatError::MissingNulTerminator("reference name").into()),
        };
        let name = std::str::from_utf8(name).map_err(|_| FormatError::InvalidUtf8("reference name"))?;
        let length = read_length(bytes, &mut pos, "reference length")?;
        references.push(Reference { name: name.to_string(), length: length as u32 });
    }

    Ok((Header { text, references }, pos))
}

// Tests
#[cfg(test)]
mod tests {

    fn mock_header() -> super::Header {
        use super::{Header, Reference};
        let text = b"@HD\tVN:1.6\tSO:unsorted\n@SQ\tSN:chr1\tLN:1000\n@SQ\tSN:chr2\tLN:500\n";
        Header::new(text, vec![Reference::new("chr1", 1000), Reference::new("chr2", 500)])
    }

    #[test]
    fn serialize_layout() {
        use super::{Header, Reference};

        let header = Header::new(b"@CO\tx\n", vec![Reference::new("c1", 7)]);
        let got = header.serialize();

        let mut expected: Vec<u8> = b"BAM\x01".to_vec();
        expected.append(&mut vec![6, 0, 0, 0]);
        expected.append(&mut b"@CO\tx\n".to_vec());
        expected.append(&mut vec![1, 0, 0, 0]);
        expected.append(&mut vec![3, 0, 0, 0]);
        expected.append(&mut b"c1\0".to_vec());
        expected.append(&mut vec![7, 0, 0, 0]);

        assert_eq!(got, expected);
    }

    #[test]
    fn parse_round_trip() {
        use super::Header;

        let header = mock_header();
        let bytes = header.serialize();
        let got = Header::parse(&bytes).unwrap();

        assert_eq!(got, header);
        assert_eq!(got.serialize(), bytes);
    }

    #[test]
    fn parse_keeps_nul_padded_text() {
        use super::Header;

        let header = super::Header::new(b"@HD\tVN:1.6\n\0\0\0", vec![]);
        let bytes = header.serialize();
        let got = Header::parse(&bytes).unwrap();

        assert_eq!(got.text(), b"@HD\tVN:1.6\n\0\0\0");
        assert_eq!(got.serialize(), bytes);
    }

    #[test]
    fn parse_rejects_bad_magic() {
        use super::Header;

        let mut bytes = mock_header().serialize();
        bytes[3] = 2;
        let got = Header::parse(&bytes);

        assert!(got.unwrap_err().is_format());
    }

    #[test]
    fn parse_rejects_overlong_text() {
        use super::Header;

        let mut bytes = mock_header().serialize();
        bytes[4..8].copy_from_slice(&100000_i32.to_le_bytes());
        let got = Header::parse(&bytes);

        assert!(got.unwrap_err().is_format());
    }

    #[test]
    fn parse_rejects_negative_reference_count() {
        use super::Header;

        let mut bytes: Vec<u8> = b"BAM\x01".to_vec();
        bytes.extend_from_slice(&0_i32.to_le_bytes());
        bytes.extend_from_slice(&(-1_i32).to_le_bytes());
        let got = Header::parse(&bytes);

        assert!(got.unwrap_err().is_format());
    }

    #[test]
    fn parse_rejects_trailing_bytes() {
        use super::Header;

        let mut bytes = mock_header().serialize();
        bytes.push(0);
        let got = Header::parse(&bytes);

        assert!(got.unwrap_err().is_format());
    }

    #[test]
    fn from_sam_text_reads_sq_lines() {
        use super::Header;

        let header = mock_header();
        let got = Header::from_sam_text(header.text()).unwrap();

        assert_eq!(got, header);
    }

    #[test]
    fn from_sam_text_rejects_incomplete_sq_lines() {
        use super::Header;
        use crate::error::{Error, FormatError};

        let got = Header::from_sam_text(b"@HD\tVN:1.6\n@SQ\tLN:100\n");
        assert!(matches!(
            got,
            Err(Error::Format(FormatError::InvalidSamHeader { line: 2, ref reason })) if reason.contains("SN")
        ));

        let got = Header::from_sam_text(b"@SQ\tSN:chr1\tLN:long\n").unwrap_err();
        assert!(got.is_format());
        assert!(got.to_string().contains("'long'"));
    }

    #[test]
    fn compatibility() {
        use super::{Header, Reference};

        let header = mock_header();
        let renamed = Header::new(b"", vec![Reference::new("chr1", 1000), Reference::new("chrX", 500)]);
        let shorter = Header::new(b"", vec![Reference::new("chr1", 1000)]);
        let other_text = Header::new(b"@CO\tdifferent\n", header.references().to_vec());

        assert!(header.is_compatible_with(&other_text));
        assert!(!header.is_compatible_with(&renamed));
        assert!(header.incompatibility(&shorter).unwrap().contains("1 references"));
    }

    #[test]
    fn reference_lookup() {
        let header = mock_header();

        assert_eq!(header.reference(1).unwrap().name, "chr2");
        assert!(header.reference(-1).is_none());
        assert!(header.reference(2).is_none());
    }
}
