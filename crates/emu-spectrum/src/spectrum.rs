//! Top-level Spectrum system.
//!
//! One instruction at a time: the executor steps the Z80, advances the
//! shared clock by the instruction's T-states, then runs the hook chain
//! — TR-DOS paging, disk traps, the tape ROM trap and the pattern
//! accelerator — before looking at the frame boundary. Interrupts are
//! sampled at instruction boundaries inside the configured window.
//!
//! # Frame loop
//!
//! `run_frame()` executes until the frame-relative counter reaches
//! `frame_len`, then performs the boundary adjustment: the monotonic
//! total absorbs one frame, the relative counter keeps the overshoot,
//! and `ei_pos`/`halt_pos` rebase with it. No absolute timestamp ever
//! changes across the wrap.

use log::debug;
use zilog_z80::Z80;

use crate::betadisk;
use crate::bus::SpectrumBus;
use crate::config::SpectrumConfig;
use crate::error::TapeError;
use crate::tape_trap::{self, LD_BYTES_TRAP};
use crate::{accel, csw, tap, tzx};

use wd_1793::images::{self, ImageError};
use wd_1793::{FloppyDisk, ImageKind};

/// Extra T-states an interrupt acknowledge needs before frame end; an
/// instruction that would land closer than this defers the interrupt.
const INT_SETUP: u32 = 10;

/// ZX Spectrum system.
pub struct Spectrum {
    cpu: Z80,
    bus: SpectrumBus,
    config: SpectrumConfig,
    /// Frame time of the last EI, rebased at each frame boundary.
    ei_pos: i64,
    /// Frame time the CPU halted at, -1 while running.
    halt_pos: i64,
    /// Interrupt deadline ("tpi"): frame_len by default.
    tpi: u32,
    /// A maskable interrupt is latched and waiting (snapshot restore);
    /// delivered at the next boundary IFF1 allows, window or not.
    int_pending: bool,
    /// Requests latched until the next instruction boundary.
    pending_stop_tape: bool,
    pending_reset: bool,
}

impl Spectrum {
    #[must_use]
    pub fn new(config: &SpectrumConfig) -> Self {
        let mut bus = SpectrumBus::new(config);
        bus.beta.wd.set_no_delay(config.betadisk.no_delay);
        for (drive, &wp) in config.betadisk.write_protect.iter().enumerate() {
            bus.beta.wd.drives[drive].write_protect = wp;
        }
        let mut cpu = Z80::new();
        cpu.reset();
        cpu.regs.pc = 0;

        Self {
            cpu,
            bus,
            config: config.clone(),
            ei_pos: -1,
            halt_pos: -1,
            tpi: config.frame.frame_len,
            int_pending: false,
            pending_stop_tape: false,
            pending_reset: false,
        }
    }

    /// Execute one instruction (with interrupt sampling and the trap
    /// chain) and return its T-state cost. Debugger hosts single-step
    /// with this; `run_frame()` is a loop around it.
    pub fn step(&mut self) -> u32 {
        self.apply_pending();
        self.maybe_interrupt();

        let cycles = self.cpu.step(&mut self.bus);
        self.bus.clock.advance(cycles);

        if self.cpu.ei_just_executed() {
            self.ei_pos = i64::from(self.bus.clock.t());
        }
        if self.cpu.halted {
            if self.halt_pos < 0 {
                self.halt_pos = i64::from(self.bus.clock.t());
            }
        } else {
            self.halt_pos = -1;
        }

        self.after_instruction();
        cycles
    }

    /// Run one frame. Returns the number of T-states executed.
    pub fn run_frame(&mut self) -> u32 {
        let start = self.bus.clock.t();

        while self.bus.clock.t() < self.bus.clock.frame_len() {
            self.step();
        }

        let executed = self.bus.clock.t() - start;
        self.bus.clock.cross_frame();
        let frame_len = i64::from(self.bus.clock.frame_len());
        if self.ei_pos >= 0 {
            self.ei_pos -= frame_len;
        }
        if self.halt_pos >= 0 {
            self.halt_pos -= frame_len;
        }
        executed
    }

    /// Deliver the frame interrupt when the window and the CPU allow it.
    /// A latched interrupt (snapshot restore) ignores the window and
    /// fires at the first boundary IFF1 permits.
    fn maybe_interrupt(&mut self) {
        if !self.int_pending && !self.bus.clock.int_active() {
            return;
        }
        if !self.cpu.interrupts_enabled() {
            return;
        }
        if !self.int_pending {
            let t = self.bus.clock.t();
            if i64::from(t) <= self.ei_pos || t + INT_SETUP >= self.tpi {
                return;
            }
        }
        self.int_pending = false;
        let cycles = self.cpu.interrupt(&mut self.bus);
        self.bus.clock.advance(cycles);
        self.halt_pos = -1;
    }

    /// Post-instruction hook chain.
    fn after_instruction(&mut self) {
        let pc = self.cpu.regs.pc;

        if self.bus.beta.present {
            betadisk::update_dos_paging(&mut self.bus.memory, pc);
            if self.bus.memory.dos() {
                if self.config.betadisk.traps {
                    betadisk::run_traps(
                        &mut self.cpu,
                        &mut self.bus.memory,
                        &mut self.bus.beta,
                        self.bus.clock.now(),
                    );
                }
                return;
            }
        }

        if self.bus.tape.is_playing() {
            if self.config.tape.traps && pc == LD_BYTES_TRAP {
                tape_trap::run(
                    &mut self.cpu,
                    &mut self.bus.memory,
                    &mut self.bus.tape,
                    self.bus.clock.now(),
                );
            } else if !self.config.sound.enabled {
                let _ = accel::run(
                    &mut self.cpu,
                    &self.bus.memory,
                    &mut self.bus.tape,
                    &mut self.bus.clock,
                );
            }
        }
    }

    fn apply_pending(&mut self) {
        if self.pending_stop_tape {
            self.pending_stop_tape = false;
            self.bus.tape.stop();
        }
        if self.pending_reset {
            self.pending_reset = false;
            self.reset();
        }
    }

    /// Hard reset: CPU, clock, paging and the disk controller return to
    /// power-on state. RAM survives, the tape stops.
    pub fn reset(&mut self) {
        debug!("hard reset");
        self.cpu.reset();
        self.cpu.regs.pc = 0;
        self.bus.clock.reset();
        self.bus.memory.reset();
        self.bus.tape.stop();
        self.bus.beta.wd.write_system(0x00, 0); // reset line low
        self.bus.beta.wd.write_system(0x3C, 0);
        self.ei_pos = -1;
        self.halt_pos = -1;
        self.int_pending = false;
    }

    /// Latch a maskable interrupt as already asserted (a snapshot was
    /// taken with INT pending). Delivered at the next instruction
    /// boundary where IFF1 allows, independent of the frame window.
    pub fn set_pending_interrupt(&mut self) {
        self.int_pending = true;
    }

    /// Whether a latched interrupt is still waiting for delivery.
    #[must_use]
    pub fn pending_interrupt(&self) -> bool {
        self.int_pending
    }

    /// Latch a stop-tape request; it applies at the next instruction
    /// boundary.
    pub fn request_stop_tape(&mut self) {
        self.pending_stop_tape = true;
    }

    /// Latch a reset request; it applies at the next instruction
    /// boundary.
    pub fn request_reset(&mut self) {
        self.pending_reset = true;
    }

    // -----------------------------------------------------------------------
    // Media
    // -----------------------------------------------------------------------

    /// Parse and insert a TAP tape image.
    pub fn insert_tap(&mut self, data: &[u8]) -> Result<(), TapeError> {
        let store = tap::parse_tap(data)?;
        self.bus.tape.load(store);
        Ok(())
    }

    /// Parse and insert a TZX tape image.
    pub fn insert_tzx(&mut self, data: &[u8]) -> Result<(), TapeError> {
        let store = tzx::parse_tzx(data, self.config.model)?;
        self.bus.tape.load(store);
        Ok(())
    }

    /// Parse and insert a CSW tape image.
    pub fn insert_csw(&mut self, data: &[u8]) -> Result<(), TapeError> {
        let store = csw::parse_csw(data)?;
        self.bus.tape.load(store);
        Ok(())
    }

    /// Start tape playback now.
    pub fn play_tape(&mut self) {
        let now = self.bus.clock.now();
        self.bus.tape.start(now);
    }

    /// Parse a disk image and insert it into a drive.
    pub fn insert_disk(
        &mut self,
        drive: usize,
        kind: ImageKind,
        data: &[u8],
    ) -> Result<(), ImageError> {
        let disk = images::load_image(kind, data, self.config.betadisk.interleave)?;
        self.bus.beta.wd.insert(drive, disk);
        Ok(())
    }

    /// Eject a disk (for save-back by the host).
    pub fn eject_disk(&mut self, drive: usize) -> Option<FloppyDisk> {
        self.bus.beta.wd.eject(drive)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn cpu(&self) -> &Z80 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Z80 {
        &mut self.cpu
    }

    #[must_use]
    pub fn bus(&self) -> &SpectrumBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut SpectrumBus {
        &mut self.bus
    }

    #[must_use]
    pub fn config(&self) -> &SpectrumConfig {
        &self.config
    }

    /// Frame time the CPU halted at, or -1 while running.
    #[must_use]
    pub fn halt_pos(&self) -> i64 {
        self.halt_pos
    }

    /// Frame time of the last EI, or -1.
    #[must_use]
    pub fn ei_pos(&self) -> i64 {
        self.ei_pos
    }
}
