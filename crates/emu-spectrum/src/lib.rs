//! Cycle-accurate ZX Spectrum core.
//!
//! The three engineering-dense subsystems of a Spectrum emulator: the
//! T-state clock and frame scheduler around a cycle-counting Z80, the
//! tape subsystem (TAP/TZX/CSW parsed into a shared pulse stream, with
//! ROM-trap and pattern-based loader acceleration), and the Beta Disk
//! subsystem (a WD1793 state machine over raw MFM track stores, with
//! TR-DOS ROM traps).
//!
//! Video rasterization, sound mixing and the host UI are collaborators,
//! not residents: the core exposes the border latch, the screen-page
//! selector, tape edge events and the framebuffer-free `run_frame()`
//! loop, and consumes a keyboard matrix.

mod accel;
mod betadisk;
mod bus;
mod config;
mod csw;
mod error;
mod keyboard;
mod memory;
mod pulses;
mod sna;
mod sp;
mod snapshot;
mod spectrum;
mod tap;
mod tape;
mod tape_trap;
mod tzx;
mod z80_file;

pub use betadisk::BetaDisk;
pub use bus::{SpectrumBus, CPU_CLOCK_HZ};
pub use config::{
    BetaDiskConfig, FrameConfig, RomSet, SoundConfig, SpectrumConfig, SpectrumModel, TapeConfig,
};
pub use csw::parse_csw;
pub use error::{SnapshotError, TapeError};
pub use keyboard::KeyboardState;
pub use memory::SpectrumMemory;
pub use pulses::{BlockInfo, PulseStore, END_PULSE, MAX_PULSES};
pub use sna::load_sna;
pub use snapshot::{detect as detect_snapshot, load_any, load_snapshot, SnapshotKind};
pub use sp::load_sp;
pub use spectrum::Spectrum;
pub use tap::{encode_tap, parse_tap};
pub use tape::{TapeEngine, EAR_BIT};
pub use tape_trap::{LD_BYTES_DONE, LD_BYTES_ERROR, LD_BYTES_TRAP};
pub use tzx::parse_tzx;
pub use z80_file::load_z80;
