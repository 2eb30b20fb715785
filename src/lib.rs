//! Decoder for Thunderbolt controller firmware images
//!
//! A firmware image carries no global table of contents. Everything of
//! interest hangs off the digital section, which is found through a 24-bit
//! relocation (FARB) pointer near the start of the image. From there, the
//! DROM, ARC parameters and DRAM microcode sections are located via pointers
//! and a chain of length-prefixed sub-sections. See the respective modules:
//!
//! | Module       | Purpose                                          |
//! | ------------ | ------------------------------------------------ |
//! | [`reader`]   | bounds-checked, section-relative field reads     |
//! | [`hw`]       | device id to controller family/generation/ports  |
//! | [`farb`]     | locating the digital section                     |
//! | [`sections`] | resolving DROM, ARC params and DRAM ucode        |
//! | [`firmware`] | assembling the final descriptor                  |
//!
//! The decoder never writes to the image and keeps no reference to it after
//! [`ThunderboltFirmware::parse`] returns.

pub mod farb;
pub mod firmware;
pub mod hw;
pub mod reader;
pub mod sections;

#[cfg(test)]
mod fixture;

pub use firmware::{ParseError, ThunderboltFirmware};
pub use hw::Family;
pub use reader::{Section, SectionTable};

/// Size of the first chunk of an image as read from a device.
/// Given exactly this much, only the native flag and digital base are decoded.
pub const CHUNK_SIZE: usize = 0x80;
