//! Machine configuration.
//!
//! Everything here deserializes from host config files; ROM images are
//! raw byte blobs the host loads itself, so they stay out of serde.

use serde::{Deserialize, Serialize};

/// Supported Spectrum models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpectrumModel {
    Spectrum48K,
    Spectrum128K,
    SpectrumPlus3,
    Pentagon128,
}

impl SpectrumModel {
    /// 48K machines stop on the TZX "stop if 48K" block.
    #[must_use]
    pub fn is_48k(self) -> bool {
        matches!(self, Self::Spectrum48K)
    }

    /// Whether the model has the 128K paging register.
    #[must_use]
    pub fn has_paging(self) -> bool {
        !matches!(self, Self::Spectrum48K)
    }
}

/// Frame geometry in T-states.
///
/// `frame_len` and `int_len` drive the core scheduler; `t_line` and
/// `paper` describe the raster layout and are passed through to the
/// video collaborator untouched.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// T-states per frame.
    pub frame_len: u32,
    /// Frame position where the INT line goes active.
    pub int_pos: u32,
    /// INT pulse length in T-states.
    pub int_len: u32,
    /// T-states per scan line (video geometry).
    pub t_line: u32,
    /// T-states from frame start to the first paper line (video geometry).
    pub paper: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        // 50 Hz Pentagon timing.
        Self {
            frame_len: 71_680,
            int_pos: 0,
            int_len: 32,
            t_line: 224,
            paper: 17_989,
        }
    }
}

/// Tape subsystem options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TapeConfig {
    /// Enable the PC=0x056B ROM loader trap.
    pub traps: bool,
    /// Start the tape on the first ear-port read.
    pub autostart: bool,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            traps: true,
            autostart: true,
        }
    }
}

/// Beta Disk Interface options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BetaDiskConfig {
    /// The interface is fitted at all.
    pub present: bool,
    /// Enable the five TR-DOS ROM traps.
    pub traps: bool,
    /// Sector ordering on format: 0 sequential, 1 = 2:1, 2 = 3:1.
    pub interleave: u8,
    /// Collapse all WD1793 delays to zero.
    pub no_delay: bool,
    /// Per-drive write protection.
    pub write_protect: [bool; 4],
}

impl Default for BetaDiskConfig {
    fn default() -> Self {
        Self {
            present: true,
            traps: true,
            interleave: 1,
            no_delay: false,
            write_protect: [false; 4],
        }
    }
}

/// Sound collaborator options the core has to know about: pattern-based
/// tape acceleration would skip the very edges the beeper mixes, so it
/// only runs while sound is off.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    pub enabled: bool,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// ROM images for the machine. Loaded by the host, not serialized.
#[derive(Debug, Clone, Default)]
pub struct RomSet {
    /// 128K editor ROM (page 0).
    pub rom_128: Vec<u8>,
    /// 48K BASIC ROM (page 1).
    pub rom_48: Vec<u8>,
    /// TR-DOS ROM (paged in by the Beta Disk Interface).
    pub rom_dos: Vec<u8>,
    /// Fourth ROM page (+3 models).
    pub rom_sys: Vec<u8>,
}

/// Complete machine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    pub model: SpectrumModel,
    pub frame: FrameConfig,
    pub tape: TapeConfig,
    pub sound: SoundConfig,
    pub betadisk: BetaDiskConfig,
    #[serde(skip)]
    pub roms: RomSet,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            model: SpectrumModel::Pentagon128,
            frame: FrameConfig::default(),
            tape: TapeConfig::default(),
            sound: SoundConfig::default(),
            betadisk: BetaDiskConfig::default(),
            roms: RomSet::default(),
        }
    }
}
