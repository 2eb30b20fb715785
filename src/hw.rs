//! Known Thunderbolt controllers, keyed by PCI device id.
//!
//! The device id is stored in the digital section of an image. Looking it up
//! is best-effort: unknown devices are fine, unknown host controllers are not
//! (see [`crate::firmware`]).

use phf::phf_map;
use serde::{Deserialize, Serialize};
use strum::Display as StrDisplay;

/// Controller family
#[derive(StrDisplay, Serialize, Deserialize, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Family {
    #[default]
    Unknown,
    #[strum(serialize = "Falcon Ridge")]
    FalconRidge,
    #[strum(serialize = "Win Ridge")]
    WinRidge,
    #[strum(serialize = "Alpine Ridge")]
    AlpineRidge,
    #[strum(serialize = "Alpine Ridge C")]
    AlpineRidgeC,
    #[strum(serialize = "Titan Ridge")]
    TitanRidge,
    BB,
}

impl Family {
    /// Whether host controller images of this family carry a flash size.
    pub fn has_flash_size(self) -> bool {
        matches!(self, Self::AlpineRidge | Self::AlpineRidgeC | Self::TitanRidge)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Eq, PartialEq)]
pub struct HwInfo {
    pub device_id: u16,
    pub generation: u32,
    pub family: Family,
    pub ports: u32,
}

// NOTE: phf rejects duplicate keys at compile time, so device ids are unique.
static HW_INFO: phf::Map<u16, HwInfo> = phf_map! {
    // FR 4C
    0x156Du16 => HwInfo { device_id: 0x156D, generation: 2, family: Family::FalconRidge, ports: 2 },
    // FR 2C
    0x156Bu16 => HwInfo { device_id: 0x156B, generation: 2, family: Family::FalconRidge, ports: 1 },
    // WR
    0x157Eu16 => HwInfo { device_id: 0x157E, generation: 2, family: Family::WinRidge, ports: 1 },
    // AR 4C
    0x1578u16 => HwInfo { device_id: 0x1578, generation: 3, family: Family::AlpineRidge, ports: 2 },
    // AR 2C
    0x1576u16 => HwInfo { device_id: 0x1576, generation: 3, family: Family::AlpineRidge, ports: 1 },
    // AR LP
    0x15C0u16 => HwInfo { device_id: 0x15C0, generation: 3, family: Family::AlpineRidge, ports: 1 },
    // AR-C 4C
    0x15D3u16 => HwInfo { device_id: 0x15D3, generation: 3, family: Family::AlpineRidgeC, ports: 2 },
    // AR-C 2C
    0x15DAu16 => HwInfo { device_id: 0x15DA, generation: 3, family: Family::AlpineRidgeC, ports: 1 },
    // TR 2C
    0x15E7u16 => HwInfo { device_id: 0x15E7, generation: 3, family: Family::TitanRidge, ports: 1 },
    // TR 4C
    0x15EAu16 => HwInfo { device_id: 0x15EA, generation: 3, family: Family::TitanRidge, ports: 2 },
    // TR 4C device
    0x15EFu16 => HwInfo { device_id: 0x15EF, generation: 3, family: Family::TitanRidge, ports: 2 },
    // BB device
    0x15EEu16 => HwInfo { device_id: 0x15EE, generation: 3, family: Family::BB, ports: 0 },
};

pub fn lookup(device_id: u16) -> Option<&'static HwInfo> {
    HW_INFO.get(&device_id)
}

/// All known controllers, in no particular order
pub fn known() -> impl Iterator<Item = &'static HwInfo> {
    HW_INFO.values()
}

#[test]
fn table_is_consistent() {
    assert_eq!(known().count(), 12);
    for info in known() {
        assert_eq!(lookup(info.device_id), Some(info));
    }
}

#[test]
fn lookup_known_controllers() {
    let ar = lookup(0x1578);
    assert_eq!(
        ar,
        Some(&HwInfo {
            device_id: 0x1578,
            generation: 3,
            family: Family::AlpineRidge,
            ports: 2,
        })
    );
    let fr = lookup(0x156B).map(|i| (i.generation, i.family, i.ports));
    assert_eq!(fr, Some((2, Family::FalconRidge, 1)));
    let wr = lookup(0x157E).map(|i| (i.generation, i.family, i.ports));
    assert_eq!(wr, Some((2, Family::WinRidge, 1)));
    let arc = lookup(0x15DA).map(|i| (i.generation, i.family, i.ports));
    assert_eq!(arc, Some((3, Family::AlpineRidgeC, 1)));
    let tr = lookup(0x15EF).map(|i| (i.generation, i.family, i.ports));
    assert_eq!(tr, Some((3, Family::TitanRidge, 2)));
    let bb = lookup(0x15EE).map(|i| (i.generation, i.family, i.ports));
    assert_eq!(bb, Some((3, Family::BB, 0)));
}

#[test]
fn lookup_unknown_controller() {
    assert_eq!(lookup(0x0000), None);
    assert_eq!(lookup(0x1234), None);
    assert_eq!(lookup(0x15EB), None);
}

#[test]
fn family_names() {
    assert_eq!(Family::Unknown.to_string(), "Unknown");
    assert_eq!(Family::FalconRidge.to_string(), "Falcon Ridge");
    assert_eq!(Family::AlpineRidgeC.to_string(), "Alpine Ridge C");
    assert_eq!(Family::TitanRidge.to_string(), "Titan Ridge");
    assert_eq!(Family::BB.to_string(), "BB");
}

#[test]
fn flash_size_families() {
    assert!(Family::AlpineRidge.has_flash_size());
    assert!(Family::AlpineRidgeC.has_flash_size());
    assert!(Family::TitanRidge.has_flash_size());
    assert!(!Family::FalconRidge.has_flash_size());
    assert!(!Family::WinRidge.has_flash_size());
    assert!(!Family::BB.has_flash_size());
    assert!(!Family::Unknown.has_flash_size());
}
