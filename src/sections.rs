//! Sections located via the digital section
//!
//! From generation 3 on, the digital section holds 32-bit pointers to the
//! DROM and the ARC parameters, relative to itself.
//!
//! The DRAM microcode section of host controllers is harder to find: it is
//! the last one in a chain of up to 7 sections, each prefixed with its own
//! length. A bitmask in the digital section tells which of them exist, and
//! the chain starts at an offset given right after it.
//!
//! | Digital offset | Size | Meaning                                     |
//! | -------------- | ---- | ------------------------------------------- |
//! | 0x002          | 1    | available sections, 1 bit per section       |
//! | 0x003          | 2    | start of the chain, relative to digital     |
//! | 0x075          | 4    | ARC params offset, relative to digital      |
//! | 0x10e          | 4    | DROM offset, relative to digital            |

use bitfield_struct::bitfield;
use log::debug;

use crate::firmware::ParseError;
use crate::reader::{Reader, Section};

const AVAILABLE_SECTIONS: u32 = 0x2;
const UCODE_START: u32 = 0x3;
const ARC_PARAMS_POINTER: u32 = 0x75;
const DROM_POINTER: u32 = 0x10e;

/// Number of sections chained before the DRAM ucode
const CHAINED_SECTIONS: u32 = 6;

#[bitfield(u8)]
pub struct AvailableSections {
    #[bits(6)]
    pub chained: u8,
    pub dram_ucode: bool,
    _r: bool,
}

impl AvailableSections {
    /// Indices of the chained sections that are present, ascending
    pub fn present(self) -> impl Iterator<Item = u32> {
        let c = self.chained();
        (0..CHAINED_SECTIONS).filter(move |i| c & (1u8 << i) != 0)
    }
}

/// The length field of a chained section counts DWORDs and excludes itself.
/// This gives the distance to the next section in bytes.
pub fn ucode_section_len(raw: u16) -> u32 {
    u32::from(raw) * 4 + 2
}

/// Resolve DROM, ARC params and, for host controllers, DRAM ucode.
///
/// Expects the digital section to be resolved already.
pub fn resolve(reader: &mut Reader, generation: u32, is_host: bool) -> Result<(), ParseError> {
    if generation >= 3 || generation == 0 {
        let o = reader.read_u32(Section::Digital, DROM_POINTER, "DROM offset")?;
        let drom = reader.absolute(Section::Digital, o);
        debug!("DROM @ {drom:08x}");
        reader.sections.set(Section::Drom, drom);

        let o = reader.read_u32(Section::Digital, ARC_PARAMS_POINTER, "ARC params offset")?;
        let arc = reader.absolute(Section::Digital, o);
        debug!("ARC params @ {arc:08x}");
        reader.sections.set(Section::ArcParams, arc);
    }

    if is_host && generation > 2 {
        let o = dram_ucode_offset(reader)?;
        let dram = reader.absolute(Section::Digital, o);
        debug!("DRAM ucode @ {dram:08x}");
        reader.sections.set(Section::DramUcode, dram);
    }

    Ok(())
}

/// Walk the chain of sections to find the DRAM ucode, relative to digital.
fn dram_ucode_offset(reader: &Reader) -> Result<u32, ParseError> {
    let raw = reader.read_u8(Section::Digital, AVAILABLE_SECTIONS, "available sections")?;
    let available = AvailableSections::from_bits(raw);
    let start = reader.read_u16(Section::Digital, UCODE_START, "ucode offset")?;
    if !available.dram_ucode() {
        return Err(ParseError::MissingSection(format!(
            "DRAM ucode not in available sections {raw:08b}"
        )));
    }

    // At most 6 * (0xffff * 4 + 2) on top of a u16, which fits.
    let mut offset = u32::from(start);
    for i in available.present() {
        let raw = reader.read_u16(Section::Digital, offset, "ucode section length")?;
        let len = ucode_section_len(raw);
        debug!("ucode section {i} @ {offset:08x}, {len:08x} bytes");
        offset += len;
    }
    Ok(offset)
}

#[cfg(test)]
use crate::fixture::{self, DIGITAL, ImageBuilder};

#[cfg(test)]
fn digital_reader(data: &[u8]) -> Reader<'_> {
    let mut r = Reader::new(data);
    r.sections.set(Section::Digital, DIGITAL);
    r
}

#[test]
fn chain_with_multiple_sections() {
    let data = fixture::alpine_ridge_host().build();
    let mut r = digital_reader(&data);
    assert_eq!(resolve(&mut r, 3, true), Ok(()));
    assert_eq!(r.sections.get(Section::DramUcode), fixture::DRAM_UCODE);
    assert_eq!(r.sections.get(Section::Drom), DIGITAL + fixture::DROM_REL);
    assert_eq!(r.sections.get(Section::ArcParams), DIGITAL + fixture::ARC_REL);
}

#[test]
fn chain_with_all_sections() {
    let mut b = fixture::alpine_ridge_host()
        .digital_u8(0x2, 0b0111_1111)
        .digital_u16(0x3, 0x180);
    // Lengths 0..=5 DWORDs, one after the other
    let mut o = 0x180;
    for raw in 0..6u16 {
        b = b.digital_u16(o, raw);
        o += ucode_section_len(raw);
    }
    let data = b.build();
    let mut r = digital_reader(&data);
    assert_eq!(resolve(&mut r, 3, true), Ok(()));
    // 0x180 + (0 + 1 + 2 + 3 + 4 + 5) * 4 + 6 * 2
    assert_eq!(r.sections.get(Section::DramUcode), DIGITAL + 0x180 + 60 + 12);
}

#[test]
fn chain_without_lower_sections() {
    let data = fixture::alpine_ridge_host()
        .digital_u8(0x2, 0b0100_0000)
        .build();
    let mut r = digital_reader(&data);
    assert_eq!(resolve(&mut r, 3, true), Ok(()));
    assert_eq!(r.sections.get(Section::DramUcode), DIGITAL + fixture::UCODE_REL);
}

#[test]
fn chain_skips_absent_sections() {
    // Only section 5 present; its length sits right at the start.
    let data = fixture::alpine_ridge_host()
        .digital_u8(0x2, 0b0110_0000)
        .digital_u16(fixture::UCODE_REL, 7)
        .build();
    let mut r = digital_reader(&data);
    assert_eq!(resolve(&mut r, 3, true), Ok(()));
    assert_eq!(
        r.sections.get(Section::DramUcode),
        DIGITAL + fixture::UCODE_REL + 30
    );
}

#[test]
fn chain_without_dram_ucode() {
    let data = fixture::alpine_ridge_host()
        .digital_u8(0x2, 0b0011_1111)
        .build();
    let mut r = digital_reader(&data);
    let res = resolve(&mut r, 3, true);
    assert!(matches!(res, Err(ParseError::MissingSection(_))));
}

#[test]
fn chain_out_of_bounds() {
    let data = fixture::alpine_ridge_host()
        .digital_u16(0x3, 0xfff0)
        .build();
    let mut r = digital_reader(&data);
    let res = resolve(&mut r, 3, true);
    assert!(matches!(
        res,
        Err(ParseError::OutOfBounds { ref field, .. }) if field == "ucode section length"
    ));
}

#[test]
fn devices_have_no_dram_ucode() {
    let data = fixture::alpine_ridge_host()
        .digital_u8(0x2, 0)
        .build();
    let mut r = digital_reader(&data);
    assert_eq!(resolve(&mut r, 3, false), Ok(()));
    assert_eq!(r.sections.get(Section::DramUcode), 0);
    assert_ne!(r.sections.get(Section::Drom), 0);
}

#[test]
fn gen2_host_has_no_pointers() {
    // Nothing beyond the device id is needed, so the image can be tiny.
    let data = ImageBuilder::new(DIGITAL as usize + 0x10).build();
    let mut r = digital_reader(&data);
    assert_eq!(resolve(&mut r, 2, true), Ok(()));
    assert_eq!(r.sections.get(Section::Drom), 0);
    assert_eq!(r.sections.get(Section::ArcParams), 0);
    assert_eq!(r.sections.get(Section::DramUcode), 0);
}

#[test]
fn unknown_generation_has_pointers() {
    let data = fixture::alpine_ridge_host().build();
    let mut r = digital_reader(&data);
    assert_eq!(resolve(&mut r, 0, false), Ok(()));
    assert_eq!(r.sections.get(Section::Drom), DIGITAL + fixture::DROM_REL);
    assert_eq!(r.sections.get(Section::DramUcode), 0);
}

#[test]
fn section_lengths() {
    assert_eq!(ucode_section_len(0), 2);
    assert_eq!(ucode_section_len(3), 14);
    assert_eq!(ucode_section_len(0xffff), 0x3_fffe);
}

#[test]
fn available_sections_bits() {
    let a = AvailableSections::from_bits(0b0100_0101);
    assert!(a.dram_ucode());
    assert_eq!(a.present().collect::<Vec<_>>(), vec![0, 2]);
    let a = AvailableSections::from_bits(0b1011_1111);
    assert!(!a.dram_ucode());
    assert_eq!(a.present().count(), 6);
}
