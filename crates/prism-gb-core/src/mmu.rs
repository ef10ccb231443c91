use log::trace;

use crate::{
    apu::Apu,
    cartridge::Cartridge,
    hardware::{Console, GameMode},
    joypad::Joypad,
    ppu::Ppu,
    serial::Serial,
    timer::Timer,
};

const WRAM_BANK_SIZE: usize = 0x1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    VBlank = 0x01,
    Stat = 0x02,
    Timer = 0x04,
    Serial = 0x08,
    Joypad = 0x10,
}

/// IF/IE pair plus the one-cycle "IF was just written" latch.
///
/// A software write to IF in a given machine cycle wins over anything the
/// hardware would have set or cleared in that same cycle, including the bit
/// clear performed by interrupt dispatch.
pub struct Interrupts {
    flags: u8,
    pub enable: u8,
    if_written_this_cycle: bool,
}

impl Interrupts {
    pub fn new() -> Self {
        Self {
            // VBlank is left pending from the boot sequence.
            flags: 0x01,
            enable: 0x00,
            if_written_this_cycle: false,
        }
    }

    pub fn request(&mut self, intr: Interrupt) {
        if !self.if_written_this_cycle {
            self.flags |= intr as u8;
        }
    }

    pub fn clear(&mut self, intr: Interrupt) {
        if !self.if_written_this_cycle {
            self.flags &= !(intr as u8);
        }
    }

    pub fn read_flags(&self) -> u8 {
        self.flags | 0xE0
    }

    pub fn write_flags(&mut self, val: u8) {
        self.flags = val & 0x1F;
        self.if_written_this_cycle = true;
    }

    /// Requested-and-enabled set.
    pub fn pending(&self) -> u8 {
        self.flags & self.enable & 0x1F
    }

    pub fn end_cycle(&mut self) {
        self.if_written_this_cycle = false;
    }
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DmaState {
    Inactive,
    /// FF46 was written this cycle; the source latch happens next.
    RegWritten,
    /// Source latched; the first byte is read and the bus claimed.
    Starting,
    Active,
    /// HBlank DMA waiting for the next mode-0 slot.
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HdmaType {
    Gdma,
    Hdma,
}

pub struct Mmu {
    pub console: Console,
    pub game_mode: GameMode,
    pub double_speed: bool,

    wram: [[u8; WRAM_BANK_SIZE]; 8],
    hram: [u8; 0x7F],

    pub cart: Cartridge,
    pub ints: Interrupts,
    pub timer: Timer,
    pub serial: Serial,
    pub ppu: Ppu,
    pub apu: Apu,
    pub joypad: Joypad,

    // KEY1: bit 7 current speed, bit 0 switch armed.
    pub speed_switch: u8,
    wram_bank_num: usize,

    // OAM DMA engine.
    oam_dma_start: u8,
    oam_dma_state: DmaState,
    dma_bus_blocked: bool,
    oam_transfer_addr: u16,
    oam_transfer_byte: u8,
    bytes_read: usize,

    // HDMA/GDMA engine.
    hdma_source_hi: u8,
    hdma_source_lo: u8,
    hdma_dest_hi: u8,
    hdma_dest_lo: u8,
    hdma_control: u8,
    hdma_state: DmaState,
    hdma_type: HdmaType,
    hdma_reg_written: bool,
    bytes_to_copy: usize,
    hblank_bytes: usize,

    // RP (infrared stub) and the undocumented CGB registers.
    infrared: u8,
    undocumented: [u8; 5],
}

impl Mmu {
    pub fn new(console: Console, game_mode: GameMode, cart: Cartridge) -> Self {
        // Power-on DIV phase differs per console; these are the phases the
        // post-boot state is documented with.
        let divider = match (console, game_mode) {
            (Console::Dmg, _) => 0xABCC,
            (Console::Cgb, GameMode::Dmg) => 0x267C,
            (Console::Cgb, GameMode::Cgb) => 0x1EA0,
        };
        let mut timer = Timer::new();
        timer.divider = divider;

        let oam_dma_start = match console {
            Console::Dmg => 0xFF,
            Console::Cgb => 0x00,
        };

        Self {
            console,
            game_mode,
            double_speed: false,
            wram: [[0; WRAM_BANK_SIZE]; 8],
            hram: [0; 0x7F],
            cart,
            ints: Interrupts::new(),
            timer,
            serial: Serial::new(game_mode, divider as u8),
            ppu: Ppu::new(console, game_mode),
            apu: Apu::new(console),
            joypad: Joypad::new(console),
            speed_switch: 0x00,
            wram_bank_num: 0x00,
            oam_dma_start,
            oam_dma_state: DmaState::Inactive,
            dma_bus_blocked: false,
            oam_transfer_addr: 0,
            oam_transfer_byte: 0,
            bytes_read: 160,
            hdma_source_hi: 0xFF,
            hdma_source_lo: 0xFF,
            hdma_dest_hi: 0xFF,
            hdma_dest_lo: 0xFF,
            hdma_control: 0xFF,
            hdma_state: DmaState::Inactive,
            hdma_type: HdmaType::Gdma,
            hdma_reg_written: false,
            bytes_to_copy: 0,
            hblank_bytes: 0,
            infrared: 0x02,
            undocumented: [0; 5],
        }
    }

    fn cgb_mode(&self) -> bool {
        self.game_mode == GameMode::Cgb
    }

    /// Effective WRAM bank for the 0xD000 window (bank 0 selects 1).
    fn wram_bank(&self) -> usize {
        if self.cgb_mode() {
            self.wram_bank_num.max(1)
        } else {
            1
        }
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        // While OAM DMA holds the bus, only I/O, HRAM and IE stay reachable.
        if self.dma_bus_blocked && addr < 0xFF00 {
            trace!("read {addr:#06X} blocked by OAM DMA");
            return 0xFF;
        }

        match addr {
            0x0000..=0x7FFF => self.cart.read_rom(addr),
            0x8000..=0x9FFF => {
                if self.ppu.vram_accessible() {
                    self.ppu.vram[self.ppu.vram_bank][(addr - 0x8000) as usize]
                } else {
                    0xFF
                }
            }
            0xA000..=0xBFFF => self.cart.read_ram(addr),
            0xC000..=0xCFFF => self.wram[0][(addr - 0xC000) as usize],
            0xD000..=0xDFFF => self.wram[self.wram_bank()][(addr - 0xD000) as usize],
            // Echo of 0xC000-0xDDFF.
            0xE000..=0xEFFF => self.wram[0][(addr - 0xE000) as usize],
            0xF000..=0xFDFF => self.wram[self.wram_bank()][(addr - 0xF000) as usize],
            0xFE00..=0xFE9F => {
                if self.ppu.oam_accessible() {
                    self.ppu.oam[(addr - 0xFE00) as usize]
                } else {
                    0xFF
                }
            }
            // Unusable region reads zero on this hardware family.
            0xFEA0..=0xFEFF => 0x00,
            0xFF00..=0xFF7F => self.read_io(addr),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            0xFFFF => self.ints.enable,
        }
    }

    pub fn write_byte(&mut self, addr: u16, val: u8) {
        if self.dma_bus_blocked && addr < 0xFF00 {
            trace!("write {addr:#06X}={val:#04X} blocked by OAM DMA");
            return;
        }

        match addr {
            0x0000..=0x7FFF => self.cart.write_control(addr, val),
            0x8000..=0x9FFF => {
                if self.ppu.vram_accessible() {
                    self.ppu.vram[self.ppu.vram_bank][(addr - 0x8000) as usize] = val;
                }
            }
            0xA000..=0xBFFF => self.cart.write_ram(addr, val),
            0xC000..=0xCFFF => self.wram[0][(addr - 0xC000) as usize] = val,
            0xD000..=0xDFFF => self.wram[self.wram_bank()][(addr - 0xD000) as usize] = val,
            0xE000..=0xEFFF => self.wram[0][(addr - 0xE000) as usize] = val,
            0xF000..=0xFDFF => self.wram[self.wram_bank()][(addr - 0xF000) as usize] = val,
            0xFE00..=0xFE9F => {
                if self.ppu.oam_accessible() {
                    self.ppu.oam[(addr - 0xFE00) as usize] = val;
                }
            }
            0xFEA0..=0xFEFF => {}
            0xFF00..=0xFF7F => self.write_io(addr, val),
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            0xFFFF => self.ints.enable = val,
        }
    }

    fn read_io(&self, addr: u16) -> u8 {
        match addr {
            0xFF00 => self.joypad.read(),
            0xFF01 | 0xFF02 => self.serial.read(addr),
            0xFF04..=0xFF07 => self.timer.read(addr),
            0xFF0F => self.ints.read_flags(),
            0xFF10..=0xFF3F => self.apu.read_reg(addr),
            0xFF40 => self.ppu.lcdc,
            0xFF41 => self.ppu.stat | 0x80,
            0xFF42 => self.ppu.scroll_y,
            0xFF43 => self.ppu.scroll_x,
            0xFF44 => self.ppu.ly,
            0xFF45 => self.ppu.ly_compare,
            0xFF46 => self.oam_dma_start,
            0xFF47 => self.ppu.bg_palette_dmg,
            0xFF48 => self.ppu.obj_palette_dmg0,
            0xFF49 => self.ppu.obj_palette_dmg1,
            0xFF4A => self.ppu.window_y,
            0xFF4B => self.ppu.window_x,
            0xFF4D => {
                self.speed_switch
                    | if self.cgb_mode() { 0x7E } else { 0xFF }
            }
            0xFF4F => {
                if self.console == Console::Cgb {
                    // In DMG mode bank 0 is always selected.
                    if self.cgb_mode() {
                        self.ppu.vram_bank as u8 | 0xFE
                    } else {
                        0xFE
                    }
                } else {
                    0xFF
                }
            }
            0xFF55 => {
                if self.cgb_mode() {
                    self.hdma_control
                } else {
                    0xFF
                }
            }
            0xFF56 => {
                if self.cgb_mode() {
                    self.infrared | 0x3C
                } else {
                    0xFF
                }
            }
            0xFF68 => {
                if self.console == Console::Cgb {
                    self.ppu.bg_palette_index | 0x40
                } else {
                    0xFF
                }
            }
            0xFF69 => {
                // Palette RAM is unreadable during mode 3.
                if self.cgb_mode() && self.ppu.vram_accessible() {
                    self.ppu.bg_palette_data[(self.ppu.bg_palette_index & 0x3F) as usize]
                } else {
                    0xFF
                }
            }
            0xFF6A => {
                if self.console == Console::Cgb {
                    self.ppu.obj_palette_index | 0x40
                } else {
                    0xFF
                }
            }
            0xFF6B => {
                if self.cgb_mode() && self.ppu.vram_accessible() {
                    self.ppu.obj_palette_data[(self.ppu.obj_palette_index & 0x3F) as usize]
                } else {
                    0xFF
                }
            }
            0xFF70 => {
                if self.cgb_mode() {
                    self.wram_bank_num as u8 | 0xF8
                } else {
                    0xFF
                }
            }
            0xFF6C => {
                if self.cgb_mode() {
                    self.undocumented[0] | 0xFE
                } else {
                    0xFF
                }
            }
            0xFF72 => {
                if self.console == Console::Cgb {
                    self.undocumented[1]
                } else {
                    0xFF
                }
            }
            0xFF73 => {
                if self.console == Console::Cgb {
                    self.undocumented[2]
                } else {
                    0xFF
                }
            }
            0xFF74 => {
                if self.cgb_mode() {
                    self.undocumented[3]
                } else {
                    0xFF
                }
            }
            0xFF75 => {
                if self.console == Console::Cgb {
                    self.undocumented[4] | 0x8F
                } else {
                    0xFF
                }
            }
            0xFF76 | 0xFF77 => {
                if self.console == Console::Cgb {
                    0x00
                } else {
                    0xFF
                }
            }
            // Unused I/O reads with every bit set.
            _ => 0xFF,
        }
    }

    fn write_io(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF00 => self.joypad.write(val),
            0xFF01 | 0xFF02 => self.serial.write(addr, val),
            0xFF04..=0xFF07 => self.timer.write(addr, val),
            0xFF0F => self.ints.write_flags(val),
            0xFF10..=0xFF3F => self.apu.write_reg(addr, val),
            0xFF40 => self.ppu.lcdc = val,
            0xFF41 => {
                self.ppu.stat = (val & 0x78) | (self.ppu.stat & 0x07);
                // DMG quirk: a STAT write during mode 0/1 with the LCD on
                // pulses the interrupt line.
                if self.console == Console::Dmg
                    && self.ppu.lcd_enabled()
                    && self.ppu.stat & 0x02 == 0
                {
                    self.ppu.raise_stat_signal();
                }
            }
            0xFF42 => self.ppu.scroll_y = val,
            0xFF43 => self.ppu.scroll_x = val,
            // LY is read-only.
            0xFF44 => {}
            0xFF45 => self.ppu.ly_compare = val,
            0xFF46 => {
                trace!("OAM DMA scheduled from {:#06X}", (val as u16) << 8);
                self.oam_dma_start = val;
                // Restarting while Active skips Inactive, so the bus stays
                // blocked across the restart.
                self.oam_dma_state = DmaState::RegWritten;
            }
            0xFF47 => self.ppu.bg_palette_dmg = val,
            0xFF48 => self.ppu.obj_palette_dmg0 = val,
            0xFF49 => self.ppu.obj_palette_dmg1 = val,
            0xFF4A => self.ppu.window_y = val,
            0xFF4B => self.ppu.window_x = val,
            0xFF4D => self.speed_switch = (self.speed_switch & 0x80) | (val & 0x01),
            0xFF4F => {
                if self.cgb_mode() {
                    self.ppu.vram_bank = (val & 0x01) as usize;
                }
            }
            0xFF51 => self.hdma_source_hi = val,
            0xFF52 => self.hdma_source_lo = val & 0xF0,
            0xFF53 => self.hdma_dest_hi = val & 0x1F,
            0xFF54 => self.hdma_dest_lo = val & 0xF0,
            0xFF55 => {
                self.hdma_control = val;
                if self.cgb_mode() {
                    self.hdma_reg_written = true;
                }
            }
            0xFF56 => {
                if self.cgb_mode() {
                    self.infrared = (self.infrared & 0x02) | (val & 0xC1);
                }
            }
            0xFF68 => {
                if self.cgb_mode() {
                    self.ppu.bg_palette_index = val & 0xBF;
                }
            }
            0xFF69 => {
                if self.cgb_mode() && self.ppu.vram_accessible() {
                    let index = (self.ppu.bg_palette_index & 0x3F) as usize;
                    self.ppu.bg_palette_data[index] = val;
                    if self.ppu.bg_palette_index & 0x80 != 0 {
                        self.ppu.bg_palette_index = (self.ppu.bg_palette_index + 1) & 0xBF;
                    }
                }
            }
            0xFF6A => {
                if self.cgb_mode() {
                    self.ppu.obj_palette_index = val & 0xBF;
                }
            }
            0xFF6B => {
                if self.cgb_mode() && self.ppu.vram_accessible() {
                    let index = (self.ppu.obj_palette_index & 0x3F) as usize;
                    self.ppu.obj_palette_data[index] = val;
                    if self.ppu.obj_palette_index & 0x80 != 0 {
                        self.ppu.obj_palette_index = (self.ppu.obj_palette_index + 1) & 0xBF;
                    }
                }
            }
            0xFF70 => {
                if self.cgb_mode() {
                    self.wram_bank_num = (val & 0x07) as usize;
                }
            }
            0xFF6C => {
                if self.cgb_mode() {
                    self.undocumented[0] = val & 0x01;
                }
            }
            0xFF72 => {
                if self.console == Console::Cgb {
                    self.undocumented[1] = val;
                }
            }
            0xFF73 => {
                if self.console == Console::Cgb {
                    self.undocumented[2] = val;
                }
            }
            0xFF74 => {
                if self.cgb_mode() {
                    self.undocumented[3] = val;
                }
            }
            0xFF75 => {
                if self.console == Console::Cgb {
                    self.undocumented[4] = val & 0x70;
                }
            }
            _ => {}
        }
    }

    // ******** Per-cycle hardware updates ********

    /// Full fan-out for one machine cycle: DMA engines, timer, serial, LCD,
    /// joypad, audio, then the per-cycle write flags are cleared.
    pub fn tick(&mut self) {
        self.update_oam_dma();
        self.update_hdma();
        self.timer.step(&mut self.ints);
        self.serial.step(&mut self.ints);
        if self.ppu.step(&mut self.ints) {
            self.signal_hdma();
        }
        self.joypad.step(&mut self.ints);
        // The APU runs at 2 MHz regardless of the CPU speed.
        for _ in 0..(2 >> self.double_speed as u32) {
            self.apu.step();
        }
        self.cart.step_rtc();

        self.ints.end_cycle();
    }

    /// Peripheral-only tick used while the CPU is halted or stopped: no DMA
    /// stepping and no deferred-IME fold.
    pub fn halted_tick(&mut self) {
        self.timer.step(&mut self.ints);
        self.serial.step(&mut self.ints);
        if self.ppu.step(&mut self.ints) {
            self.signal_hdma();
        }
        self.joypad.step(&mut self.ints);
        for _ in 0..(2 >> self.double_speed as u32) {
            self.apu.step();
        }
        self.cart.step_rtc();
    }

    pub fn toggle_cpu_speed(&mut self) {
        self.speed_switch = (self.speed_switch ^ 0x80) & 0x80;
        self.double_speed = !self.double_speed;
        self.ppu.set_double_speed(self.double_speed);
    }

    // ******** OAM DMA ********

    fn update_oam_dma(&mut self) {
        match self.oam_dma_state {
            DmaState::Inactive | DmaState::Paused => {}
            DmaState::RegWritten => {
                self.oam_transfer_addr = (self.oam_dma_start as u16) << 8;
                self.oam_dma_state = DmaState::Starting;
            }
            DmaState::Starting => {
                // No OAM write on the startup cycle; the engine reads its
                // first byte and claims the bus.
                self.oam_transfer_byte = self.dma_copy(self.oam_transfer_addr);
                self.bytes_read = 1;
                self.oam_dma_state = DmaState::Active;
                self.dma_bus_blocked = true;
            }
            DmaState::Active => {
                // Write the byte read last cycle, then read the next one.
                self.ppu.oam[self.bytes_read - 1] = self.oam_transfer_byte;
                if self.bytes_read == 160 {
                    self.oam_dma_state = DmaState::Inactive;
                    self.dma_bus_blocked = false;
                    return;
                }
                self.oam_transfer_byte = self
                    .dma_copy(self.oam_transfer_addr.wrapping_add(self.bytes_read as u16));
                self.bytes_read += 1;
            }
        }
    }

    pub fn oam_dma_blocking(&self) -> bool {
        self.dma_bus_blocked
    }

    /// DMA-engine read path; ignores the CPU-facing bus block.
    fn dma_copy(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF => self.cart.read_rom(addr),
            0x8000..=0x9FFF => {
                // The engines cannot read VRAM while the PPU transfers
                // pixels, nor while an HDMA writes it.
                if self.ppu.vram_accessible() && self.hdma_state != DmaState::Active {
                    self.ppu.vram[self.ppu.vram_bank][(addr - 0x8000) as usize]
                } else {
                    0xFF
                }
            }
            0xA000..=0xBFFF => self.cart.read_ram(addr),
            0xC000..=0xCFFF => self.wram[0][(addr - 0xC000) as usize],
            0xD000..=0xDFFF => self.wram[self.wram_bank()][(addr - 0xD000) as usize],
            0xE000..=0xFFFF => {
                if self.hdma_state == DmaState::Active {
                    // HDMA reads of this region land on external RAM instead.
                    self.cart.read_ram(addr - 0x4000)
                } else if addr < 0xF000 {
                    self.wram[0][(addr - 0xE000) as usize]
                } else if addr < 0xF200 {
                    self.wram[self.wram_bank()][(addr - 0xF000) as usize]
                } else {
                    // Beyond the valid OAM DMA source range.
                    0xFF
                }
            }
        }
    }

    // ******** HDMA / GDMA ********

    /// True while an HDMA/GDMA transfer should stall the CPU.
    pub fn hdma_in_progress(&self) -> bool {
        matches!(self.hdma_state, DmaState::Starting | DmaState::Active)
    }

    /// Called on HBlank entry (and LCD off) to release the next block of a
    /// paused HBlank DMA.
    fn signal_hdma(&mut self) {
        if self.hdma_state == DmaState::Paused {
            self.hblank_bytes = 16;
            self.hdma_state = DmaState::Starting;
        }
    }

    pub fn update_hdma(&mut self) {
        if self.hdma_reg_written {
            if self.hdma_state == DmaState::Inactive {
                self.init_hdma();
            } else if self.hdma_control & 0x80 != 0 {
                // Restart from the paused state.
                self.init_hdma();
            } else {
                // Cancel: bit 7 of FF55 reads set afterwards. Going straight
                // from HDMA to GDMA is impossible, the transfer stops first.
                self.hdma_control |= 0x80;
                self.bytes_to_copy = 0;
                self.hblank_bytes = 0;
                self.hdma_state = DmaState::Inactive;
            }
            self.hdma_reg_written = false;
        } else if self.hdma_state == DmaState::Starting {
            self.hdma_state = DmaState::Active;
        } else if self.hdma_state == DmaState::Active {
            self.execute_hdma();

            if self.bytes_to_copy == 0 {
                self.hdma_control = 0xFF;
                self.hdma_state = DmaState::Inactive;
            } else if self.hdma_type == HdmaType::Hdma && self.hblank_bytes == 0 {
                self.hdma_state = DmaState::Paused;
            }
        }
    }

    fn init_hdma(&mut self) {
        self.hdma_type = if self.hdma_control & 0x80 != 0 {
            HdmaType::Hdma
        } else {
            HdmaType::Gdma
        };
        self.bytes_to_copy = ((self.hdma_control & 0x7F) as usize + 1) * 16;
        self.hblank_bytes = 16;
        self.hdma_control &= 0x7F;

        if self.hdma_type == HdmaType::Hdma && !self.ppu.in_hblank() {
            self.hdma_state = DmaState::Paused;
        } else {
            self.hdma_state = DmaState::Starting;
        }
    }

    fn execute_hdma(&mut self) {
        let mut source = ((self.hdma_source_hi as u16) << 8) | self.hdma_source_lo as u16;
        let mut dest = (((self.hdma_dest_hi | 0x80) as u16) << 8) | self.hdma_dest_lo as u16;

        // The copy engine moves two bytes per machine cycle in single speed
        // and one in double speed.
        let mut num_bytes = (2 >> self.double_speed as usize).min(self.bytes_to_copy);
        if self.hdma_type == HdmaType::Hdma {
            num_bytes = num_bytes.min(self.hblank_bytes);
            self.hblank_bytes -= num_bytes;
        }
        self.bytes_to_copy -= num_bytes;

        for _ in 0..num_bytes {
            if self.ppu.vram_accessible() {
                let byte = self.dma_copy(source);
                self.ppu.vram[self.ppu.vram_bank][(dest - 0x8000) as usize] = byte;
            }
            // Wrap within VRAM if the destination runs off the end.
            dest = (dest + 1) & 0x9FFF;
            source = source.wrapping_add(1);
        }

        self.hdma_source_lo = source as u8;
        self.hdma_source_hi = (source >> 8) as u8;
        self.hdma_dest_lo = dest as u8;
        self.hdma_dest_hi = ((dest >> 8) & 0x1F) as u8;
        self.hdma_control = ((self.bytes_to_copy / 16).wrapping_sub(1) & 0x7F) as u8;
    }
}
