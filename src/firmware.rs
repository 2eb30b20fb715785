//! Thunderbolt controller firmware descriptor
//!
//! Metadata needed to decide whether an image fits a controller, taken from
//! the digital section, the DROM and the ARC parameters:
//!
//! | Section    | Offset | Size | Meaning                                |
//! | ---------- | ------ | ---- | -------------------------------------- |
//! | (absolute) | 0x07b  | 1    | bit 5: native mode                     |
//! | Digital    | 0x005  | 2    | PCI device id                          |
//! | Digital    | 0x010  | 1    | bit 1: host controller                 |
//! | Digital    | 0x045  | 1    | bits 0..2: flash size (AR, AR-C, TR)   |
//! | DROM       | 0x010  | 2    | vendor id                              |
//! | DROM       | 0x012  | 2    | model id                               |
//! | ARC params | 0x10c  | 4    | PD pointer, 0 or all 1's if absent     |
//!
//! The flash size is an encoded value, only meant to be compared between
//! two images, not a size in bytes.

use core::fmt::{self, Display};

use bitfield_struct::bitfield;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::hw::{self, Family};
use crate::reader::{Reader, Section, SectionTable};
use crate::{CHUNK_SIZE, farb, sections};

const NATIVE_OFFSET: u32 = 0x7b;
const DEVICE_ID_OFFSET: u32 = 0x05;
const HOST_FLAGS_OFFSET: u32 = 0x10;
const FLASH_SIZE_OFFSET: u32 = 0x45;
const VENDOR_ID_OFFSET: u32 = 0x10;
const MODEL_ID_OFFSET: u32 = 0x12;
const PD_POINTER_OFFSET: u32 = 0x10c;

#[bitfield(u8)]
struct NativeFlags {
    #[bits(5)]
    _r: u8,
    native: bool,
    #[bits(2)]
    _r: u8,
}

#[bitfield(u8)]
struct HostFlags {
    _r: bool,
    host: bool,
    #[bits(6)]
    _r: u8,
}

#[bitfield(u8)]
struct FlashFlags {
    #[bits(3)]
    size: u8,
    #[bits(5)]
    _r: u8,
}

#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// A field does not fit into the image.
    OutOfBounds {
        field: String,
        offset: u64,
        len: usize,
        size: usize,
    },
    /// Not a Thunderbolt firmware image
    InvalidFormat(String),
    /// Host controller with a device id we know nothing about
    UnsupportedController(u16),
    MissingSection(String),
    MissingRequiredSection(String),
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds {
                field,
                offset,
                len,
                size,
            } => write!(
                f,
                "failed to read {field}: {len} bytes @ {offset:08x} outside of image of size {size:08x}"
            ),
            Self::InvalidFormat(e) => write!(f, "invalid image format: {e}"),
            Self::UnsupportedController(id) => write!(f, "unknown controller {id:04x}"),
            Self::MissingSection(e) => write!(f, "missing section: {e}"),
            Self::MissingRequiredSection(e) => write!(f, "missing required section: {e}"),
        }
    }
}

impl std::error::Error for ParseError {}

pub fn valid_pd_pointer(pointer: u32) -> bool {
    pointer != 0 && pointer != 0xffff_ffff
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, Eq, PartialEq)]
pub struct ThunderboltFirmware {
    sections: SectionTable,
    family: Family,
    generation: u32,
    ports: u32,
    is_host: bool,
    is_native: bool,
    has_pd: bool,
    device_id: u16,
    vendor_id: u16,
    model_id: u16,
    flash_size: u8,
}

impl ThunderboltFirmware {
    /// Decode the metadata of a Thunderbolt controller firmware image.
    ///
    /// Given just the first chunk of an image (exactly [`CHUNK_SIZE`] bytes),
    /// only the native flag and the digital section offset are decoded.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut r = Reader::new(data);
        let mut fw = Self::default();

        // The digital base is still 0 here, so this is absolute.
        let raw = r.read_u8(Section::Digital, NATIVE_OFFSET, "native flag")?;
        fw.is_native = NativeFlags::from_bits(raw).native();

        let digital = farb::resolve(&r)?;
        info!("Digital section @ {digital:08x}");
        r.sections.set(Section::Digital, digital);

        if r.len() == CHUNK_SIZE {
            debug!("Only got the first chunk, done");
            fw.sections = r.sections;
            return Ok(fw);
        }

        let raw = r.read_u8(Section::Digital, HOST_FLAGS_OFFSET, "host flag")?;
        fw.is_host = HostFlags::from_bits(raw).host();

        fw.device_id = r.read_u16(Section::Digital, DEVICE_ID_OFFSET, "device id")?;
        let id = fw.device_id;
        match hw::lookup(id) {
            Some(i) => {
                fw.family = i.family;
                fw.generation = i.generation;
                fw.ports = i.ports;
                info!("Controller {id:04x}: {}, gen {}", i.family, i.generation);
            }
            None => warn!("Unknown controller {id:04x}"),
        }
        if fw.is_host && fw.ports == 0 {
            return Err(ParseError::UnsupportedController(id));
        }

        sections::resolve(&mut r, fw.generation, fw.is_host)?;
        fw.sections = r.sections;
        if fw.missing_needed_drom() {
            return Err(ParseError::MissingRequiredSection(format!(
                "no DROM in gen {} {} image",
                fw.generation,
                if fw.is_host { "host" } else { "device" }
            )));
        }

        if fw.sections.get_resolved(Section::Drom).is_some() {
            fw.vendor_id = r.read_u16(Section::Drom, VENDOR_ID_OFFSET, "vendor id")?;
            fw.model_id = r.read_u16(Section::Drom, MODEL_ID_OFFSET, "model id")?;
        }

        if fw.sections.get_resolved(Section::ArcParams).is_some() {
            let p = r.read_u32(Section::ArcParams, PD_POINTER_OFFSET, "PD pointer")?;
            debug!("PD pointer: {p:08x}");
            fw.has_pd = valid_pd_pointer(p);
        }

        if fw.is_host && fw.family.has_flash_size() {
            let raw = r.read_u8(Section::Digital, FLASH_SIZE_OFFSET, "flash size")?;
            fw.flash_size = FlashFlags::from_bits(raw).size();
        }

        Ok(fw)
    }

    // Gen 1 and 2 host controller images come without a DROM.
    fn missing_needed_drom(&self) -> bool {
        if self.sections.get_resolved(Section::Drom).is_some() {
            return false;
        }
        !(self.is_host && self.generation < 3)
    }

    pub fn sections(&self) -> &SectionTable {
        &self.sections
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn ports(&self) -> u32 {
        self.ports
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    pub fn is_native(&self) -> bool {
        self.is_native
    }

    pub fn has_pd(&self) -> bool {
        self.has_pd
    }

    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn model_id(&self) -> u16 {
        self.model_id
    }

    pub fn flash_size(&self) -> u8 {
        self.flash_size
    }
}

impl Display for ThunderboltFirmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fa = format!("Family:     {}", self.family);
        let ho = format!("Host:       {}", self.is_host);
        let na = format!("Native:     {}", self.is_native);
        let di = format!("Device ID:  0x{:04x}", self.device_id);
        let vi = format!("Vendor ID:  0x{:04x}", self.vendor_id);
        let mi = format!("Model ID:   0x{:04x}", self.model_id);
        let fs = format!("Flash size: 0x{:x}", self.flash_size);
        let ge = format!("Generation: {}", self.generation);
        let po = format!("Ports:      {}", self.ports);
        let pd = format!("Has PD:     {}", self.has_pd);
        let se = format!("Sections:\n{}", self.sections);
        write!(f, "{fa}\n{ho}\n{na}\n{di}\n{vi}\n{mi}\n{fs}\n{ge}\n{po}\n{pd}\n{se}")
    }
}

#[cfg(test)]
use crate::fixture::{self, DIGITAL, ImageBuilder};

#[test]
fn parse_alpine_ridge_host() {
    let data = fixture::alpine_ridge_host().build();
    let fw = ThunderboltFirmware::parse(&data).unwrap();
    assert!(fw.is_host());
    assert!(fw.is_native());
    assert!(fw.has_pd());
    assert_eq!(fw.device_id(), fixture::DEVICE_ID);
    assert_eq!(fw.vendor_id(), fixture::VENDOR_ID);
    assert_eq!(fw.model_id(), fixture::MODEL_ID);
    assert_eq!(fw.family(), Family::AlpineRidge);
    assert_eq!(fw.generation(), 3);
    assert_eq!(fw.ports(), 2);
    // 0xfb & 0x07
    assert_eq!(fw.flash_size(), 3);
    let s = fw.sections();
    assert_eq!(s.get(Section::Digital), DIGITAL);
    assert_eq!(s.get(Section::Drom), DIGITAL + fixture::DROM_REL);
    assert_eq!(s.get(Section::ArcParams), DIGITAL + fixture::ARC_REL);
    assert_eq!(s.get(Section::DramUcode), fixture::DRAM_UCODE);
}

#[test]
fn parse_first_chunk_only() {
    let data = fixture::alpine_ridge_host().truncate(CHUNK_SIZE).build();
    let fw = ThunderboltFirmware::parse(&data).unwrap();
    assert!(fw.is_native());
    assert_eq!(fw.sections().get(Section::Digital), DIGITAL);
    let expected = ThunderboltFirmware {
        sections: *fw.sections(),
        is_native: true,
        ..Default::default()
    };
    assert_eq!(fw, expected);
}

#[test]
fn parse_first_chunk_not_native() {
    let data = ImageBuilder::new(CHUNK_SIZE)
        .u24(0x0, 0x4000)
        .u8(0x7b, 0xdf)
        .build();
    let fw = ThunderboltFirmware::parse(&data).unwrap();
    assert!(!fw.is_native());
    assert_eq!(fw.sections().get(Section::Digital), 0x4000);
    assert_eq!(fw.sections().get_resolved(Section::Drom), None);
}

#[test]
fn parse_via_fallback_farb_pointer() {
    // Move everything up to make room for a digital section at 0x1200.
    let data = ImageBuilder::new(0x1300)
        .u24(0x0, 0xff_ffff)
        .u24(0x1000, 0x1200)
        .u16(0x1205, 0x156d)
        .u8(0x1210, 0b10)
        .build();
    let fw = ThunderboltFirmware::parse(&data).unwrap();
    assert_eq!(fw.sections().get(Section::Digital), 0x1200);
    assert_eq!(fw.family(), Family::FalconRidge);
}

#[test]
fn parse_not_an_image() {
    let data = ImageBuilder::new(0x2000).build();
    let res = ThunderboltFirmware::parse(&data);
    assert!(matches!(res, Err(ParseError::InvalidFormat(_))));
}

#[test]
fn parse_too_short_for_native_flag() {
    let data = ImageBuilder::new(0x40).u24(0x0, DIGITAL).build();
    let res = ThunderboltFirmware::parse(&data);
    assert!(matches!(
        res,
        Err(ParseError::OutOfBounds { ref field, offset: 0x7b, .. }) if field == "native flag"
    ));
}

#[test]
fn parse_truncated_images() {
    // Cut right before each field; each must be reported, nothing must panic.
    let host = fixture::alpine_ridge_host;
    let device = || fixture::alpine_ridge_host().digital_u8(0x10, 0);
    let cases = [
        (host(), DIGITAL + 0x10, "host flag"),
        (host(), DIGITAL + 0x110, "DROM offset"),
        (host(), DIGITAL + fixture::UCODE_REL + 1, "ucode section length"),
        (device(), DIGITAL + fixture::DROM_REL + 0x12, "model id"),
        (device(), DIGITAL + fixture::ARC_REL + 0x10e, "PD pointer"),
    ];
    for (b, size, field) in cases {
        let size = size as usize;
        let data = b.truncate(size).build();
        let res = ThunderboltFirmware::parse(&data);
        match res {
            Err(ParseError::OutOfBounds { field: f, size: s, .. }) => {
                assert_eq!(f, field);
                assert_eq!(s, size);
            }
            r => panic!("expected {field} out of bounds, got {r:?}"),
        }
    }
}

#[test]
fn parse_any_prefix_without_panic() {
    let data = fixture::alpine_ridge_host().build();
    // Up to and including the length of the last chained section
    let needed = (DIGITAL + fixture::UCODE_REL + 3 * 4 + 2 + 2) as usize;
    for size in 0..data.len() {
        let res = ThunderboltFirmware::parse(&data[..size]);
        let ok = size >= needed || size == CHUNK_SIZE;
        assert_eq!(res.is_ok(), ok, "prefix of {size:x} bytes: {res:?}");
    }
}

#[test]
fn parse_unknown_host_controller() {
    let data = fixture::alpine_ridge_host()
        .digital_u16(0x5, 0x1234)
        .build();
    let res = ThunderboltFirmware::parse(&data);
    assert_eq!(res, Err(ParseError::UnsupportedController(0x1234)));
}

#[test]
fn parse_host_without_ports() {
    // BB is known, but has no ports, so it cannot be a host.
    let data = fixture::alpine_ridge_host()
        .digital_u16(0x5, 0x15ee)
        .build();
    let res = ThunderboltFirmware::parse(&data);
    assert_eq!(res, Err(ParseError::UnsupportedController(0x15ee)));
}

#[test]
fn parse_unknown_device() {
    let data = fixture::alpine_ridge_host()
        .digital_u8(0x10, 0)
        .digital_u16(0x5, 0x1234)
        .build();
    let fw = ThunderboltFirmware::parse(&data).unwrap();
    assert!(!fw.is_host());
    assert_eq!(fw.family(), Family::Unknown);
    assert_eq!(fw.generation(), 0);
    assert_eq!(fw.ports(), 0);
    // Pointers are still followed for unknown devices.
    assert_eq!(fw.vendor_id(), fixture::VENDOR_ID);
    assert_eq!(fw.model_id(), fixture::MODEL_ID);
    assert!(fw.has_pd());
    assert_eq!(fw.sections().get_resolved(Section::DramUcode), None);
    assert_eq!(fw.flash_size(), 0);
}

#[test]
fn parse_gen2_host_without_drom() {
    let data = ImageBuilder::new(0x400)
        .u24(0x0, DIGITAL)
        .digital_u8(0x10, 0b10)
        .digital_u16(0x5, 0x156d)
        .digital_u8(0x45, 0x07)
        .build();
    let fw = ThunderboltFirmware::parse(&data).unwrap();
    assert!(fw.is_host());
    assert_eq!(fw.family(), Family::FalconRidge);
    assert_eq!(fw.generation(), 2);
    assert_eq!(fw.ports(), 2);
    assert_eq!(fw.sections().get_resolved(Section::Drom), None);
    assert_eq!(fw.sections().get_resolved(Section::ArcParams), None);
    assert_eq!(fw.vendor_id(), 0);
    assert_eq!(fw.model_id(), 0);
    assert!(!fw.has_pd());
    // Falcon Ridge has no flash size.
    assert_eq!(fw.flash_size(), 0);
}

#[test]
fn parse_gen2_device_needs_drom() {
    let data = ImageBuilder::new(0x400)
        .u24(0x0, DIGITAL)
        .digital_u16(0x5, 0x157e)
        .build();
    let res = ThunderboltFirmware::parse(&data);
    assert!(matches!(res, Err(ParseError::MissingRequiredSection(_))));
}

#[test]
fn parse_gen3_host_needs_drom() {
    // The DROM offset wraps around to 0, i.e. there is none.
    let data = fixture::alpine_ridge_host()
        .digital_u32(0x10e, 0u32.wrapping_sub(DIGITAL))
        .build();
    let res = ThunderboltFirmware::parse(&data);
    assert!(matches!(res, Err(ParseError::MissingRequiredSection(_))));
}

#[test]
fn parse_host_without_dram_ucode() {
    let data = fixture::alpine_ridge_host()
        .digital_u8(0x2, 0b0000_0101)
        .build();
    let res = ThunderboltFirmware::parse(&data);
    assert!(matches!(res, Err(ParseError::MissingSection(_))));
}

#[test]
fn parse_pd_pointer() {
    let arc = DIGITAL + fixture::ARC_REL;
    for (p, has_pd) in [
        (0x0000_0000, false),
        (0xffff_ffff, false),
        (0x0000_0001, true),
        (0xffff_fffe, true),
        (0x00ff_ffff, true),
    ] {
        let data = fixture::alpine_ridge_host().u32(arc + 0x10c, p).build();
        let fw = ThunderboltFirmware::parse(&data).unwrap();
        assert_eq!(fw.has_pd(), has_pd, "PD pointer {p:08x}");
    }
}

#[test]
fn parse_flash_size_families() {
    for (id, size) in [(0x15d3u16, 5u8), (0x15e7, 5), (0x15ea, 5)] {
        let data = fixture::alpine_ridge_host()
            .digital_u16(0x5, id)
            .digital_u8(0x45, 0xf5)
            .build();
        let fw = ThunderboltFirmware::parse(&data).unwrap();
        assert_eq!(fw.flash_size(), size, "device {id:04x}");
    }
    // Devices do not report a flash size.
    let data = fixture::alpine_ridge_host()
        .digital_u8(0x10, 0)
        .digital_u8(0x45, 0xf5)
        .build();
    let fw = ThunderboltFirmware::parse(&data).unwrap();
    assert_eq!(fw.flash_size(), 0);
}

#[test]
fn display_descriptor() {
    let data = fixture::alpine_ridge_host().build();
    let fw = ThunderboltFirmware::parse(&data).unwrap();
    let s = fw.to_string();
    assert!(s.contains("Family:     Alpine Ridge"));
    assert!(s.contains("Device ID:  0x1578"));
    assert!(s.contains("Vendor ID:  0x8086"));
    assert!(s.contains("DRAM ucode   @ 0x00000a24"));
}

#[test]
fn display_error() {
    let e = ParseError::OutOfBounds {
        field: "vendor id".to_string(),
        offset: 0x610,
        len: 2,
        size: 0x600,
    };
    assert_eq!(
        e.to_string(),
        "failed to read vendor id: 2 bytes @ 00000610 outside of image of size 00000600"
    );
}
