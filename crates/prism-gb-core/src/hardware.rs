use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
/// Console hardware variant.
///
/// Orthogonal to [`GameMode`]: CGB hardware can execute DMG software with the
/// reduced compatibility palette map.
pub enum Console {
    #[default]
    Dmg,
    Cgb,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Which feature set the running software uses.
///
/// Selected from the cartridge's CGB flag and the console: DMG software always
/// runs in DMG mode, CGB software runs in CGB mode only on CGB hardware.
pub enum GameMode {
    Dmg,
    Cgb,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    Start,
    Select,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unrecognized mapper byte {0:#04X} in cartridge header")]
    UnknownMapper(u8),
    #[error("unrecognized external RAM size code {0:#04X} in cartridge header")]
    UnknownRamSize(u8),
    #[error("ROM is {actual} bytes but the header declares {declared}")]
    RomSizeMismatch { declared: usize, actual: usize },
    #[error("save file is {actual} bytes but the cartridge has {expected} bytes of RAM")]
    SaveSizeMismatch { expected: usize, actual: usize },
    #[error("ROM image is too small to contain a cartridge header")]
    RomTooSmall,
    /// Real hardware hangs here; the shell may choose to freeze the UI.
    #[error("CPU hung: STOP executed with all joypad input lines disabled")]
    StoppedWithJoypadDisabled,
    #[error("CPU hung: enabled joypad press during a speed switch")]
    JoypadDuringSpeedSwitch,
}
