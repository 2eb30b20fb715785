//! FARB pointer
//!
//! The digital section does not start at a fixed offset. Its location is
//! given by a 24-bit pointer at the very start of the image, or, if that one
//! is blank, by a second copy 4K into the image.

use log::{debug, warn};

use crate::firmware::ParseError;
use crate::reader::{Reader, Section};

/// Where to look for the pointer, in order
pub const FARB_OFFSETS: [u32; 2] = [0x0000, 0x1000];

const FARB_BLANK: u32 = 0x00ff_ffff;

pub fn valid_farb_pointer(pointer: u32) -> bool {
    pointer != 0 && pointer != FARB_BLANK
}

/// Find the absolute offset of the digital section.
///
/// Must be called while the digital base is still 0, so that the probes
/// are absolute.
pub fn resolve(reader: &Reader) -> Result<u32, ParseError> {
    for (i, o) in FARB_OFFSETS.into_iter().enumerate() {
        let p = reader.read_u24(Section::Digital, o, "FARB pointer")?;
        if valid_farb_pointer(p) {
            if i > 0 {
                warn!("Primary FARB pointer invalid, using the one @ {o:08x}");
            }
            debug!("FARB pointer @ {o:08x}: {p:06x}");
            return Ok(p);
        }
        debug!("No valid FARB pointer @ {o:08x}, got {p:06x}");
    }
    Err(ParseError::InvalidFormat(
        "no valid FARB pointer, not a Thunderbolt firmware image".to_string(),
    ))
}

#[cfg(test)]
fn image_with_pointers(size: usize, primary: [u8; 3], secondary: [u8; 3]) -> Vec<u8> {
    let mut data = vec![0u8; size];
    data[..3].copy_from_slice(&primary);
    if size >= 0x1003 {
        data[0x1000..0x1003].copy_from_slice(&secondary);
    }
    data
}

#[test]
fn primary_pointer() {
    // No room for the second pointer, so it must not be probed.
    let data = image_with_pointers(0x200, [0x00, 0x40, 0x00], [0; 3]);
    assert_eq!(resolve(&Reader::new(&data)), Ok(0x4000));
}

#[test]
fn fallback_pointer() {
    let data = image_with_pointers(0x2000, [0xff, 0xff, 0xff], [0x34, 0x12, 0x01]);
    assert_eq!(resolve(&Reader::new(&data)), Ok(0x01_1234));
    let data = image_with_pointers(0x2000, [0; 3], [0x00, 0x05, 0x00]);
    assert_eq!(resolve(&Reader::new(&data)), Ok(0x500));
}

#[test]
fn no_valid_pointer() {
    let data = image_with_pointers(0x2000, [0; 3], [0xff, 0xff, 0xff]);
    let res = resolve(&Reader::new(&data));
    assert!(matches!(res, Err(ParseError::InvalidFormat(_))));
    let data = image_with_pointers(0x2000, [0xff, 0xff, 0xff], [0; 3]);
    let res = resolve(&Reader::new(&data));
    assert!(matches!(res, Err(ParseError::InvalidFormat(_))));
}

#[test]
fn fallback_out_of_bounds() {
    let data = image_with_pointers(0x800, [0; 3], [0; 3]);
    let res = resolve(&Reader::new(&data));
    assert!(matches!(res, Err(ParseError::OutOfBounds { offset: 0x1000, .. })));
}

#[test]
fn too_short_for_any_pointer() {
    let data = [0x01, 0x02];
    let res = resolve(&Reader::new(&data));
    assert!(matches!(res, Err(ParseError::OutOfBounds { offset: 0, .. })));
}

#[test]
fn pointer_validity() {
    assert!(!valid_farb_pointer(0));
    assert!(!valid_farb_pointer(0x00ff_ffff));
    assert!(valid_farb_pointer(1));
    assert!(valid_farb_pointer(0x00ff_fffe));
}
