use crate::{
    cartridge::Cartridge,
    cpu::Cpu,
    hardware::{Button, Console, CoreError, GameMode},
    mmu::Mmu,
};

// T-states between VBlanks with the LCD on.
const CYCLES_PER_FRAME: i64 = 70224;

/// The whole machine: CPU plus the bus that owns every peripheral.
///
/// The shell drives it one frame at a time and collects video, audio and
/// save-RAM output between frames.
pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
    overspent_cycles: i64,
}

impl GameBoy {
    /// Build a machine for the given console from a ROM image and an
    /// optional save-RAM payload.
    pub fn new(console: Console, rom: Vec<u8>, save: Option<Vec<u8>>) -> Result<Self, CoreError> {
        let cart = Cartridge::new(rom, save)?;
        // CGB hardware runs DMG-only software in the reduced DMG mode.
        let game_mode = if console == Console::Cgb && cart.cgb_flag {
            GameMode::Cgb
        } else {
            GameMode::Dmg
        };
        Ok(Self {
            cpu: Cpu::new(console, game_mode),
            mmu: Mmu::new(console, game_mode, cart),
            overspent_cycles: 0,
        })
    }

    /// Pick the console from the cartridge's CGB flag: CGB-capable software
    /// gets a CGB, everything else a DMG.
    pub fn new_auto(rom: Vec<u8>, save: Option<Vec<u8>>) -> Result<Self, CoreError> {
        let cgb = rom.get(0x0143).is_some_and(|&flag| flag & 0x80 != 0);
        let console = if cgb { Console::Cgb } else { Console::Dmg };
        Self::new(console, rom, save)
    }

    /// Run exactly one frame's worth of cycles, carrying the previous frame's
    /// overshoot. Returns after the VBlank boundary; a fatal CPU hang is
    /// reported to the shell instead of panicking.
    pub fn run_one_frame(&mut self) -> Result<(), CoreError> {
        let target =
            (CYCLES_PER_FRAME << self.mmu.double_speed as u32) + self.overspent_cycles;
        self.overspent_cycles = self.cpu.run_for(&mut self.mmu, target)?;
        Ok(())
    }

    /// Pressing any selected button also wakes a stopped CPU.
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        self.mmu.joypad.set_button(button, pressed);
    }

    /// 160x144 BGR555 pixels of the last completed frame.
    pub fn front_buffer(&self) -> &[u16] {
        self.mmu.ppu.front_buffer()
    }

    /// Stereo samples accumulated since the last call, at roughly 48 kHz.
    pub fn take_audio_samples(&mut self) -> Vec<(i16, i16)> {
        self.mmu.apu.take_samples()
    }

    /// Bytes the serial port shifted out since the last call.
    pub fn take_serial_output(&mut self) -> Vec<u8> {
        self.mmu.serial.take_output()
    }

    /// Raw external-RAM contents for save-game persistence. No header; the
    /// dump is exactly the size the cartridge declares.
    pub fn snapshot_ext_ram(&self) -> &[u8] {
        self.mmu.cart.ext_ram()
    }
}
