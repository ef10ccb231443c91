use prism_gb_core::{Console, GameBoy};

/// Smallest valid ROM image: two 16 KiB banks, no mapper, no RAM, with a
/// passing header checksum and `program` placed at the entry point 0x0100.
#[allow(dead_code)]
pub fn build_rom(program: &[u8]) -> Vec<u8> {
    build_rom_with(0x00, program)
}

#[allow(dead_code)]
pub fn build_rom_with(cgb_flag: u8, program: &[u8]) -> Vec<u8> {
    let mut rom = vec![0u8; 0x8000];
    rom[0x0143] = cgb_flag;
    rom[0x0147] = 0x00;
    rom[0x0148] = 0x00;
    rom[0x0149] = 0x00;
    let mut checksum = 0u8;
    for &b in &rom[0x0134..0x014D] {
        checksum = checksum.wrapping_sub(b).wrapping_sub(1);
    }
    rom[0x014D] = checksum;
    rom[0x0100..0x0100 + program.len()].copy_from_slice(program);
    rom
}

#[allow(dead_code)]
pub fn dmg_with(program: &[u8]) -> GameBoy {
    GameBoy::new(Console::Dmg, build_rom(program), None).unwrap()
}

#[allow(dead_code)]
pub fn cgb_with(program: &[u8]) -> GameBoy {
    GameBoy::new(Console::Cgb, build_rom_with(0x80, program), None).unwrap()
}
