//! Bounds-checked reads relative to firmware sections
//!
//! All offsets within a Thunderbolt image are either absolute or relative to
//! the start of one of a handful of sections. The [`Reader`] keeps track of
//! the section bases resolved so far and serves little-endian integer reads
//! relative to them, failing instead of reading past the end of the image.

use core::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use strum::{Display as StrDisplay, EnumIter, IntoEnumIterator};
use zerocopy::FromBytes;
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

use crate::firmware::ParseError;

#[derive(StrDisplay, EnumIter, Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
pub enum Section {
    Digital,
    #[strum(serialize = "DROM")]
    Drom,
    #[strum(serialize = "ARC params")]
    ArcParams,
    #[strum(serialize = "DRAM ucode")]
    DramUcode,
}

const SECTION_COUNT: usize = 4;

/// Absolute offsets of the sections within an image.
///
/// NOTE: 0 means that a section is absent or has not been resolved (yet).
/// This does not apply to the digital section: it is always resolved first,
/// and a digital base of 0 is what makes the first reads absolute.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SectionTable([u32; SECTION_COUNT]);

impl SectionTable {
    pub fn get(&self, section: Section) -> u32 {
        self.0[section as usize]
    }

    pub fn set(&mut self, section: Section, offset: u32) {
        self.0[section as usize] = offset;
    }

    /// Offset of a section, or `None` if it is absent.
    pub fn get_resolved(&self, section: Section) -> Option<u32> {
        match (section, self.get(section)) {
            (Section::Digital, o) => Some(o),
            (_, 0) => None,
            (_, o) => Some(o),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Section, u32)> + '_ {
        Section::iter().map(|s| (s, self.get(s)))
    }
}

impl Display for SectionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines = self
            .iter()
            .map(|(s, o)| {
                let n = s.to_string();
                format!("  {n:12} @ 0x{o:08x}")
            })
            .collect::<Vec<String>>()
            .join("\n");
        write!(f, "{lines}")
    }
}

/// 24-bit little-endian value, as used for the FARB pointer
#[derive(Immutable, IntoBytes, FromBytes, Clone, Copy, Debug)]
#[repr(C)]
struct U24([u8; 3]);

impl U24 {
    fn get(self) -> u32 {
        let [b0, b1, b2] = self.0;
        u32::from_le_bytes([b0, b1, b2, 0])
    }
}

pub struct Reader<'a> {
    data: &'a [u8],
    pub sections: SectionTable,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            sections: SectionTable::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get `len` bytes at `offset` relative to the start of `section`.
    /// `field` names what is being read, for the error in case the range
    /// does not fit into the image.
    pub fn read(
        &self,
        section: Section,
        offset: u32,
        len: usize,
        field: &str,
    ) -> Result<&'a [u8], ParseError> {
        // Computed in u64 so that neither addition can overflow.
        let start = u64::from(self.sections.get(section)) + u64::from(offset);
        let end = start + len as u64;
        let size = self.data.len();
        let out_of_bounds = || ParseError::OutOfBounds {
            field: field.to_string(),
            offset: start,
            len,
            size,
        };
        let (Ok(s), Ok(e)) = (usize::try_from(start), usize::try_from(end)) else {
            return Err(out_of_bounds());
        };
        self.data.get(s..e).ok_or_else(out_of_bounds)
    }

    pub fn read_u8(&self, section: Section, offset: u32, field: &str) -> Result<u8, ParseError> {
        let b = self.read(section, offset, 1, field)?;
        Ok(b[0])
    }

    pub fn read_u16(&self, section: Section, offset: u32, field: &str) -> Result<u16, ParseError> {
        let b = self.read(section, offset, size_of::<U16>(), field)?;
        match U16::read_from_bytes(b) {
            Ok(v) => Ok(v.get()),
            Err(_) => Err(self.size_mismatch(section, offset, b.len(), field)),
        }
    }

    pub fn read_u32(&self, section: Section, offset: u32, field: &str) -> Result<u32, ParseError> {
        let b = self.read(section, offset, size_of::<U32>(), field)?;
        match U32::read_from_bytes(b) {
            Ok(v) => Ok(v.get()),
            Err(_) => Err(self.size_mismatch(section, offset, b.len(), field)),
        }
    }

    /// Read 3 bytes into the lower 24 bits of a u32.
    pub fn read_u24(&self, section: Section, offset: u32, field: &str) -> Result<u32, ParseError> {
        let b = self.read(section, offset, size_of::<U24>(), field)?;
        match U24::read_from_bytes(b) {
            Ok(v) => Ok(v.get()),
            Err(_) => Err(self.size_mismatch(section, offset, b.len(), field)),
        }
    }

    // `read` hands out exactly the requested length, so this cannot happen,
    // but we would rather report it than panic.
    fn size_mismatch(&self, section: Section, offset: u32, len: usize, field: &str) -> ParseError {
        ParseError::OutOfBounds {
            field: field.to_string(),
            offset: u64::from(self.sections.get(section)) + u64::from(offset),
            len,
            size: self.data.len(),
        }
    }

    /// Turn an offset relative to `section` into an absolute one.
    /// Wraps around like the 32-bit offsets in the image do; a wrapped
    /// offset is caught by the bounds check on the next read.
    pub fn absolute(&self, section: Section, offset: u32) -> u32 {
        self.sections.get(section).wrapping_add(offset)
    }
}

#[test]
fn read_relative_to_section() {
    let data: Vec<u8> = (0u8..0x20).collect();
    let mut r = Reader::new(&data);
    assert_eq!(r.read_u8(Section::Digital, 0x4, "x"), Ok(0x04));
    r.sections.set(Section::Drom, 0x10);
    assert_eq!(r.read_u8(Section::Drom, 0x4, "x"), Ok(0x14));
    assert_eq!(r.read_u16(Section::Drom, 0x0, "x"), Ok(0x1110));
    assert_eq!(r.read_u32(Section::Drom, 0x0, "x"), Ok(0x1312_1110));
}

#[test]
fn read_u24_leaves_top_byte_zero() {
    let data = [0x56, 0x34, 0x12, 0xff];
    let r = Reader::new(&data);
    assert_eq!(r.read_u24(Section::Digital, 0, "farb"), Ok(0x0012_3456));
}

#[test]
fn read_up_to_the_last_byte() {
    let data = [0u8, 0, 0, 0xaa, 0xbb];
    let r = Reader::new(&data);
    assert_eq!(r.read_u16(Section::Digital, 3, "tail"), Ok(0xbbaa));
    assert_eq!(r.read(Section::Digital, 5, 0, "empty"), Ok(&[][..]));
}

#[test]
fn read_past_the_end() {
    let data = [0u8; 5];
    let r = Reader::new(&data);
    let err = r.read_u16(Section::Digital, 4, "device id");
    assert_eq!(
        err,
        Err(ParseError::OutOfBounds {
            field: "device id".to_string(),
            offset: 4,
            len: 2,
            size: 5,
        })
    );
    assert!(r.read_u32(Section::Digital, 2, "x").is_err());
    assert!(r.read_u8(Section::Digital, 5, "x").is_err());
}

#[test]
fn read_with_huge_base_does_not_overflow() {
    let data = [0u8; 16];
    let mut r = Reader::new(&data);
    r.sections.set(Section::ArcParams, u32::MAX);
    let err = r.read_u32(Section::ArcParams, u32::MAX, "pd pointer");
    assert!(matches!(
        err,
        Err(ParseError::OutOfBounds { offset, .. }) if offset == 2 * u64::from(u32::MAX)
    ));
}

#[test]
fn absolute_offsets_wrap() {
    let data = [0u8; 1];
    let mut r = Reader::new(&data);
    r.sections.set(Section::Digital, 0x200);
    assert_eq!(r.absolute(Section::Digital, 0x10), 0x210);
    assert_eq!(r.absolute(Section::Digital, 0xffff_fe00), 0);
}

#[test]
fn absent_sections_are_zero() {
    let mut t = SectionTable::default();
    assert_eq!(t.get_resolved(Section::Digital), Some(0));
    assert_eq!(t.get_resolved(Section::Drom), None);
    t.set(Section::Drom, 0x600);
    assert_eq!(t.get_resolved(Section::Drom), Some(0x600));
    assert_eq!(t.get_resolved(Section::DramUcode), None);
}
