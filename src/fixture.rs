//! Synthetic images for tests
//!
//! The well-formed image models an Alpine Ridge 4C host controller:
//!
//! | Offset  | Content                                        |
//! | ------- | ---------------------------------------------- |
//! | 0x0000  | FARB pointer -> 0x200                          |
//! | 0x007b  | native flag                                    |
//! | 0x0200  | digital section                                |
//! | 0x0600  | DROM (vendor 0x8086, model 0x1234)             |
//! | 0x0700  | ARC params (PD pointer 0x1000)                 |
//! | 0x0a00  | ucode chain: sections 0 and 2, then DRAM ucode |

pub const SIZE: usize = 0x2000;
pub const DIGITAL: u32 = 0x200;
pub const DROM_REL: u32 = 0x400;
pub const ARC_REL: u32 = 0x500;
pub const UCODE_REL: u32 = 0x800;

pub const DEVICE_ID: u16 = 0x1578;
pub const VENDOR_ID: u16 = 0x8086;
pub const MODEL_ID: u16 = 0x1234;
pub const PD_POINTER: u32 = 0x1000;

/// Section 0 has 3 DWORDs, section 2 has 5 DWORDs, each plus the length.
pub const DRAM_UCODE: u32 = DIGITAL + UCODE_REL + (3 * 4 + 2) + (5 * 4 + 2);

pub struct ImageBuilder {
    data: Vec<u8>,
}

impl ImageBuilder {
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
        }
    }

    fn put(mut self, offset: u32, bytes: &[u8]) -> Self {
        let o = offset as usize;
        self.data[o..o + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn u8(self, offset: u32, v: u8) -> Self {
        self.put(offset, &[v])
    }

    pub fn u16(self, offset: u32, v: u16) -> Self {
        self.put(offset, &v.to_le_bytes())
    }

    pub fn u24(self, offset: u32, v: u32) -> Self {
        self.put(offset, &v.to_le_bytes()[..3])
    }

    pub fn u32(self, offset: u32, v: u32) -> Self {
        self.put(offset, &v.to_le_bytes())
    }

    /// Write relative to the digital section.
    pub fn digital_u8(self, offset: u32, v: u8) -> Self {
        self.u8(DIGITAL + offset, v)
    }

    pub fn digital_u16(self, offset: u32, v: u16) -> Self {
        self.u16(DIGITAL + offset, v)
    }

    pub fn digital_u32(self, offset: u32, v: u32) -> Self {
        self.u32(DIGITAL + offset, v)
    }

    pub fn truncate(mut self, size: usize) -> Self {
        self.data.truncate(size);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

pub fn alpine_ridge_host() -> ImageBuilder {
    let drom = DIGITAL + DROM_REL;
    let arc = DIGITAL + ARC_REL;
    ImageBuilder::new(SIZE)
        .u24(0x0, DIGITAL)
        .u8(0x7b, 0x20)
        .digital_u8(0x10, 0b10)
        .digital_u16(0x5, DEVICE_ID)
        .digital_u8(0x45, 0xfb)
        .digital_u32(0x10e, DROM_REL)
        .digital_u32(0x75, ARC_REL)
        .u16(drom + 0x10, VENDOR_ID)
        .u16(drom + 0x12, MODEL_ID)
        .u32(arc + 0x10c, PD_POINTER)
        // sections 0 and 2 plus DRAM ucode
        .digital_u8(0x2, 0b0100_0101)
        .digital_u16(0x3, UCODE_REL as u16)
        .digital_u16(UCODE_REL, 3)
        .digital_u16(UCODE_REL + 3 * 4 + 2, 5)
}
