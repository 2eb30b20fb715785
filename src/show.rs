use tbt_fw::{Section, ThunderboltFirmware};

pub fn show(fw: &ThunderboltFirmware, verbose: bool) {
    if verbose {
        println!("{fw:#02x?}");
    }
    println!();
    println!("{fw}");
    println!();
}

pub fn show_native(fw: &ThunderboltFirmware, verbose: bool) {
    if verbose {
        println!("{fw:#02x?}");
    }
    let d = fw.sections().get(Section::Digital);
    let n = if fw.is_native() { "native" } else { "not native" };
    println!("Digital section @ 0x{d:08x}, {n}");
}
