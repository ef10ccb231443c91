use log::warn;

use crate::hardware::CoreError;

const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;

const RTC_CYCLES_PER_SECOND: u32 = 4_194_304;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcKind {
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
}

#[derive(Debug)]
enum MbcState {
    None,
    Mbc1 {
        /// Low 5 bits of the ROM bank. The two upper bits live here or in
        /// `ram_bank` depending on the banking mode.
        rom_bank: usize,
        ram_bank: usize,
        ram_bank_mode: bool,
    },
    Mbc2 {
        rom_bank: usize,
    },
    Mbc3 {
        rom_bank: usize,
        /// 0x00-0x07 select a RAM bank, 0x08-0x0C an RTC register.
        ram_bank: usize,
        rtc: Option<Rtc>,
        latch_pending: bool,
    },
    Mbc5 {
        /// 9-bit bank number; 0 is a valid selection here.
        rom_bank: usize,
        ram_bank: usize,
    },
}

/// Real-time clock on MBC3 cartridges.
///
/// Time is sourced from emulated cycles rather than the host clock, so a
/// given input sequence always produces the same observable state. Carrying
/// time across save/load sessions is the shell's policy decision.
#[derive(Debug, Default)]
struct Rtc {
    seconds: u8,
    minutes: u8,
    hours: u8,
    /// 9-bit day counter; bit 8 and the halt/carry flags live in `flags`.
    days_low: u8,
    flags: u8,

    latched: [u8; 5],
    subsecond_cycles: u32,
}

impl Rtc {
    fn halted(&self) -> bool {
        self.flags & 0x40 != 0
    }

    fn step(&mut self, cycles: u32) {
        if self.halted() {
            return;
        }
        self.subsecond_cycles += cycles;
        while self.subsecond_cycles >= RTC_CYCLES_PER_SECOND {
            self.subsecond_cycles -= RTC_CYCLES_PER_SECOND;
            self.tick_second();
        }
    }

    fn tick_second(&mut self) {
        // Registers hold whatever software wrote, including out-of-range
        // values; those tick through their full bit width without carrying.
        self.seconds = (self.seconds + 1) & 0x3F;
        if self.seconds == 60 {
            self.seconds = 0;
            self.minutes = (self.minutes + 1) & 0x3F;
            if self.minutes == 60 {
                self.minutes = 0;
                self.hours = (self.hours + 1) & 0x1F;
                if self.hours == 24 {
                    self.hours = 0;
                    self.tick_day();
                }
            }
        }
    }

    fn tick_day(&mut self) {
        let days = (((self.flags & 0x01) as u16) << 8) | self.days_low as u16;
        if days == 0x01FF {
            self.days_low = 0;
            self.flags &= !0x01;
            // Day counter overflow sets the carry flag until software
            // clears it.
            self.flags |= 0x80;
        } else {
            let days = days + 1;
            self.days_low = days as u8;
            self.flags = (self.flags & !0x01) | ((days >> 8) as u8 & 0x01);
        }
    }

    fn latch(&mut self) {
        self.latched = [
            self.seconds,
            self.minutes,
            self.hours,
            self.days_low,
            self.flags,
        ];
    }

    fn read(&self, reg: usize) -> u8 {
        match reg {
            0x08 => self.latched[0],
            0x09 => self.latched[1],
            0x0A => self.latched[2],
            0x0B => self.latched[3],
            0x0C => self.latched[4] | 0x3E,
            _ => 0xFF,
        }
    }

    fn write(&mut self, reg: usize, val: u8) {
        match reg {
            0x08 => {
                self.seconds = val % 60;
                self.subsecond_cycles = 0;
            }
            0x09 => self.minutes = val % 60,
            0x0A => self.hours = val % 24,
            0x0B => self.days_low = val,
            0x0C => self.flags = val & 0xC1,
            _ => {}
        }
    }
}

#[derive(Debug)]
pub struct Cartridge {
    rom: Vec<u8>,
    ext_ram: Vec<u8>,

    pub mbc: MbcKind,
    pub title: String,
    pub cgb_flag: bool,

    num_rom_banks: usize,
    ext_ram_present: bool,
    rumble_present: bool,
    ext_ram_enabled: bool,

    state: MbcState,
}

impl Cartridge {
    /// Parse the header and build the cartridge. `save` (when given) must be
    /// exactly the declared external RAM size.
    pub fn new(rom: Vec<u8>, save: Option<Vec<u8>>) -> Result<Self, CoreError> {
        if rom.len() < 0x0150 {
            return Err(CoreError::RomTooSmall);
        }

        let num_rom_banks = rom.len() / ROM_BANK_SIZE;
        if rom.len() % ROM_BANK_SIZE != 0 || !num_rom_banks.is_power_of_two() {
            return Err(CoreError::RomSizeMismatch {
                declared: (2 << rom[0x0148]) * ROM_BANK_SIZE,
                actual: rom.len(),
            });
        }
        let declared_banks = 2usize << rom[0x0148];
        if declared_banks != num_rom_banks {
            warn!(
                "header declares {} ROM banks but the image holds {}",
                declared_banks, num_rom_banks
            );
        }

        let (mbc, ext_ram_present, rtc_present, rumble_present) = mbc_from_header(rom[0x0147])?;

        let mut ram_size = match rom[0x0149] {
            0x00 => 0,
            0x01 => 0x0800,
            0x02 => 0x2000,
            0x03 => 0x8000,
            0x04 => 0x20000,
            0x05 => 0x10000,
            code => return Err(CoreError::UnknownRamSize(code)),
        };
        // MBC2 carts declare no RAM but carry 512x4 bits on the mapper itself.
        if mbc == MbcKind::Mbc2 && ext_ram_present {
            ram_size = 0x200;
        }

        let ext_ram = match save {
            Some(bytes) => {
                if bytes.len() != ram_size {
                    return Err(CoreError::SaveSizeMismatch {
                        expected: ram_size,
                        actual: bytes.len(),
                    });
                }
                bytes
            }
            None => vec![0; ram_size],
        };

        let mut checksum = 0u8;
        for &b in &rom[0x0134..0x014D] {
            checksum = checksum.wrapping_sub(b).wrapping_sub(1);
        }
        if checksum != rom[0x014D] {
            warn!("header checksum mismatch; this ROM would not boot on hardware");
        }

        let title_bytes = &rom[0x0134..0x0143];
        let title_end = title_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(title_bytes.len());
        let title = String::from_utf8_lossy(&title_bytes[..title_end])
            .trim()
            .to_string();

        let cgb_flag = rom[0x0143] & 0x80 != 0;

        let state = match mbc {
            MbcKind::None => MbcState::None,
            MbcKind::Mbc1 => MbcState::Mbc1 {
                rom_bank: 0x01,
                ram_bank: 0x00,
                ram_bank_mode: false,
            },
            MbcKind::Mbc2 => MbcState::Mbc2 { rom_bank: 0x01 },
            MbcKind::Mbc3 => MbcState::Mbc3 {
                rom_bank: 0x01,
                ram_bank: 0x00,
                rtc: rtc_present.then(Rtc::default),
                latch_pending: false,
            },
            MbcKind::Mbc5 => MbcState::Mbc5 {
                rom_bank: 0x01,
                ram_bank: 0x00,
            },
        };

        Ok(Self {
            rom,
            ext_ram,
            mbc,
            title,
            cgb_flag,
            num_rom_banks,
            ext_ram_present,
            rumble_present,
            ext_ram_enabled: false,
            state,
        })
    }

    /// Advance the RTC (if present) by one machine cycle.
    pub fn step_rtc(&mut self) {
        if let MbcState::Mbc3 { rtc: Some(rtc), .. } = &mut self.state {
            rtc.step(4);
        }
    }

    /// Read from the ROM region, 0x0000-0x7FFF.
    pub fn read_rom(&self, addr: u16) -> u8 {
        let bank = if addr < 0x4000 {
            // Bank 0 slot. In MBC1 RAM-banking mode the upper bank bits leak
            // into this window as well.
            match &self.state {
                MbcState::Mbc1 { ram_bank, .. } => (ram_bank << 5) % self.num_rom_banks,
                _ => 0,
            }
        } else {
            self.switchable_rom_bank()
        };
        self.rom[bank * ROM_BANK_SIZE + (addr as usize & 0x3FFF)]
    }

    fn switchable_rom_bank(&self) -> usize {
        let bank = match &self.state {
            MbcState::None => 1,
            MbcState::Mbc1 {
                rom_bank, ram_bank, ..
            } => (ram_bank << 5) | rom_bank,
            MbcState::Mbc2 { rom_bank } => *rom_bank,
            MbcState::Mbc3 { rom_bank, .. } => *rom_bank,
            MbcState::Mbc5 { rom_bank, .. } => *rom_bank,
        };
        bank % self.num_rom_banks
    }

    /// Read from the external RAM / RTC region, 0xA000-0xBFFF.
    pub fn read_ram(&self, addr: u16) -> u8 {
        if !self.ext_ram_enabled {
            return 0xFF;
        }
        match &self.state {
            MbcState::None => self
                .ext_ram
                .get(addr as usize - 0xA000)
                .copied()
                .unwrap_or(0xFF),
            MbcState::Mbc1 { ram_bank, .. } => self.ram_byte(*ram_bank, addr).unwrap_or(0xFF),
            // MBC2 internal RAM spans 0xA000-0xA1FF; the upper nibble of
            // every byte reads back as set.
            MbcState::Mbc2 { .. } => self
                .ext_ram
                .get(addr as usize - 0xA000)
                .map(|b| 0xF0 | (b & 0x0F))
                .unwrap_or(0xFF),
            MbcState::Mbc3 {
                ram_bank, rtc: None, ..
            } => self.ram_byte(*ram_bank, addr).unwrap_or(0xFF),
            MbcState::Mbc3 {
                ram_bank,
                rtc: Some(rtc),
                ..
            } => {
                if *ram_bank & 0x08 != 0 {
                    rtc.read(*ram_bank)
                } else {
                    self.ram_byte(*ram_bank, addr).unwrap_or(0xFF)
                }
            }
            MbcState::Mbc5 { ram_bank, .. } => {
                let bank = if self.rumble_present {
                    // Bit 3 drives the rumble motor instead of bank selection.
                    ram_bank & 0x07
                } else {
                    *ram_bank
                };
                self.ram_byte(bank, addr).unwrap_or(0xFF)
            }
        }
    }

    /// Write to the external RAM / RTC region, 0xA000-0xBFFF.
    pub fn write_ram(&mut self, addr: u16, val: u8) {
        if !self.ext_ram_enabled {
            return;
        }
        let index = |bank: usize| bank * RAM_BANK_SIZE + (addr as usize - 0xA000);
        match &mut self.state {
            MbcState::None => {
                let idx = addr as usize - 0xA000;
                if let Some(b) = self.ext_ram.get_mut(idx) {
                    *b = val;
                }
            }
            MbcState::Mbc1 { ram_bank, .. } => {
                let idx = index(*ram_bank);
                if let Some(b) = self.ext_ram.get_mut(idx) {
                    *b = val;
                }
            }
            MbcState::Mbc2 { .. } => {
                let idx = addr as usize - 0xA000;
                if let Some(b) = self.ext_ram.get_mut(idx) {
                    *b = val & 0x0F;
                }
            }
            MbcState::Mbc3 { ram_bank, rtc, .. } => {
                if *ram_bank & 0x08 != 0 {
                    if let Some(rtc) = rtc {
                        rtc.write(*ram_bank, val);
                    }
                } else {
                    let idx = index(*ram_bank);
                    if let Some(b) = self.ext_ram.get_mut(idx) {
                        *b = val;
                    }
                }
            }
            MbcState::Mbc5 { ram_bank, .. } => {
                let bank = if self.rumble_present {
                    *ram_bank & 0x07
                } else {
                    *ram_bank
                };
                let idx = index(bank);
                if let Some(b) = self.ext_ram.get_mut(idx) {
                    *b = val;
                }
            }
        }
    }

    fn ram_byte(&self, bank: usize, addr: u16) -> Option<u8> {
        self.ext_ram
            .get(bank * RAM_BANK_SIZE + (addr as usize - 0xA000))
            .copied()
    }

    /// Writes to 0x0000-0x7FFF update the mapper's control latches; the ROM
    /// itself is never written.
    pub fn write_control(&mut self, addr: u16, val: u8) {
        match &mut self.state {
            MbcState::None => {}
            MbcState::Mbc1 {
                rom_bank,
                ram_bank,
                ram_bank_mode,
            } => match addr {
                0x0000..=0x1FFF => {
                    self.ext_ram_enabled = self.ext_ram_present && val & 0x0F == 0x0A;
                }
                0x2000..=0x3FFF => {
                    // Only the low 5 bits are wired; banks 0x00/0x20/0x40/0x60
                    // bump to the next bank because the quirky zero check
                    // looks at the combined 7-bit number.
                    let mut bank = (*rom_bank & 0x60) | (val as usize & 0x1F);
                    if bank == 0x00 || bank == 0x20 || bank == 0x40 || bank == 0x60 {
                        bank += 1;
                    }
                    *rom_bank = bank;
                }
                0x4000..=0x5FFF => {
                    if *ram_bank_mode {
                        *ram_bank = val as usize & 0x03;
                    } else {
                        *rom_bank = (*rom_bank & 0x1F) | ((val as usize & 0x03) << 5);
                    }
                }
                0x6000..=0x7FFF => {
                    // Switching modes moves the two upper bits between the
                    // ROM and RAM bank registers; the effective 7-bit ROM
                    // bank number survives the reshuffle.
                    let new_mode = val & 0x01 != 0;
                    if new_mode != *ram_bank_mode {
                        if new_mode {
                            *ram_bank = (*rom_bank & 0x60) >> 5;
                            *rom_bank &= 0x1F;
                        } else {
                            *rom_bank |= *ram_bank << 5;
                            *ram_bank = 0;
                        }
                        *ram_bank_mode = new_mode;
                    }
                }
                _ => {}
            },
            MbcState::Mbc2 { rom_bank } => {
                if addr < 0x4000 {
                    // Address bit 8 multiplexes RAM enable and ROM bank
                    // select over the whole control range.
                    if addr & 0x0100 == 0 {
                        self.ext_ram_enabled = self.ext_ram_present && val & 0x0F == 0x0A;
                    } else {
                        *rom_bank = (val as usize & 0x0F).max(1);
                    }
                }
            }
            MbcState::Mbc3 {
                rom_bank,
                ram_bank,
                rtc,
                latch_pending,
            } => match addr {
                0x0000..=0x1FFF => {
                    self.ext_ram_enabled =
                        (self.ext_ram_present || rtc.is_some()) && val & 0x0F == 0x0A;
                }
                0x2000..=0x3FFF => {
                    *rom_bank = (val as usize & 0x7F).max(1);
                }
                0x4000..=0x5FFF => {
                    *ram_bank = val as usize & 0x0F;
                }
                0x6000..=0x7FFF => {
                    // Writing 0x00 then 0x01 latches the live counters into
                    // the readable registers.
                    if val == 0x00 {
                        *latch_pending = true;
                    } else {
                        if val == 0x01 && *latch_pending {
                            if let Some(rtc) = rtc {
                                rtc.latch();
                            }
                        }
                        *latch_pending = false;
                    }
                }
                _ => {}
            },
            MbcState::Mbc5 {
                rom_bank,
                ram_bank,
            } => match addr {
                0x0000..=0x1FFF => {
                    self.ext_ram_enabled = self.ext_ram_present && val & 0x0F == 0x0A;
                }
                0x2000..=0x2FFF => {
                    *rom_bank = (*rom_bank & 0x100) | val as usize;
                }
                0x3000..=0x3FFF => {
                    *rom_bank = (*rom_bank & 0x0FF) | ((val as usize & 0x01) << 8);
                }
                0x4000..=0x5FFF => {
                    *ram_bank = val as usize & 0x0F;
                }
                _ => {}
            },
        }
    }

    pub fn has_rtc(&self) -> bool {
        matches!(self.state, MbcState::Mbc3 { rtc: Some(_), .. })
    }

    /// Raw external RAM contents, the save-file payload.
    pub fn ext_ram(&self) -> &[u8] {
        &self.ext_ram
    }
}

fn mbc_from_header(code: u8) -> Result<(MbcKind, bool, bool, bool), CoreError> {
    // (mapper, external RAM present, RTC present, rumble present)
    let info = match code {
        0x00 => (MbcKind::None, false, false, false),
        0x01 => (MbcKind::Mbc1, false, false, false),
        0x02 | 0x03 => (MbcKind::Mbc1, true, false, false),
        0x05 => (MbcKind::Mbc2, false, false, false),
        0x06 => (MbcKind::Mbc2, true, false, false),
        0x08 | 0x09 => (MbcKind::None, true, false, false),
        0x0F => (MbcKind::Mbc3, false, true, false),
        0x10 => (MbcKind::Mbc3, true, true, false),
        0x11 => (MbcKind::Mbc3, false, false, false),
        0x12 | 0x13 => (MbcKind::Mbc3, true, false, false),
        0x19 | 0x1A | 0x1B => (MbcKind::Mbc5, code != 0x19, false, false),
        0x1C => (MbcKind::Mbc5, false, false, true),
        0x1D | 0x1E => (MbcKind::Mbc5, true, false, true),
        other => return Err(CoreError::UnknownMapper(other)),
    };
    Ok(info)
}
