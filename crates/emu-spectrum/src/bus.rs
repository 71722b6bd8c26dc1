//! Spectrum bus: memory and I/O routing.
//!
//! The bus owns everything the CPU can reach mid-instruction: the
//! clock, paged memory, keyboard matrix, tape engine and the Beta Disk
//! Interface. Port decoding is the Spectrum's partial scheme — any even
//! port is the ULA, 0x7FFD/0x1FFD match on the address lines the
//! hardware actually looks at, and the Beta Disk claims its five ports
//! only while TR-DOS is paged in.

use emu_core::{Bus, FrameClock};

use crate::betadisk::BetaDisk;
use crate::config::SpectrumConfig;
use crate::keyboard::KeyboardState;
use crate::memory::SpectrumMemory;
use crate::tape::TapeEngine;

/// Nominal Z80 clock, used for disk rotation and tape pause timing.
pub const CPU_CLOCK_HZ: u64 = 3_500_000;

pub struct SpectrumBus {
    pub clock: FrameClock,
    pub memory: SpectrumMemory,
    pub keyboard: KeyboardState,
    pub tape: TapeEngine,
    pub beta: BetaDisk,
    /// Border colour latched from port 0xFE writes (video collaborator).
    pub border: u8,
    /// Last full value written to port 0xFE (MIC/speaker bits).
    pub last_fe: u8,
    /// Start the tape on the first ear read.
    pub tape_autostart: bool,
}

impl SpectrumBus {
    #[must_use]
    pub fn new(config: &SpectrumConfig) -> Self {
        Self {
            clock: FrameClock::new(
                config.frame.frame_len,
                config.frame.int_pos,
                config.frame.int_len,
            ),
            memory: SpectrumMemory::new(config.model, &config.roms),
            keyboard: KeyboardState::new(),
            tape: TapeEngine::new(config.sound.enabled),
            beta: BetaDisk::new(CPU_CLOCK_HZ, config.betadisk.present),
            border: 7,
            last_fe: 0,
            tape_autostart: config.tape.autostart,
        }
    }
}

impl Bus for SpectrumBus {
    fn read(&mut self, addr: u16) -> u8 {
        self.memory.read(addr)
    }

    fn write(&mut self, addr: u16, value: u8) {
        self.memory.write(addr, value);
    }

    fn io_read(&mut self, port: u16) -> u8 {
        let now = self.clock.now();
        if self.beta.claims_port(port, self.memory.dos()) {
            return self.beta.io_read(port, now);
        }
        if port & 1 == 0 {
            // ULA: keyboard rows in bits 0-4, ear on bit 6.
            if self.tape_autostart && !self.tape.is_playing() && self.tape.has_image() {
                self.tape.start(now);
            }
            let keys = self.keyboard.scan((port >> 8) as u8);
            return (0xE0 | keys) & (0xBF | self.tape.tape_bit(now));
        }
        0xFF
    }

    fn io_write(&mut self, port: u16, value: u8) {
        let now = self.clock.now();
        if self.beta.claims_port(port, self.memory.dos()) {
            self.beta.io_write(port, value, now);
            return;
        }
        if port & 1 == 0 {
            self.border = value & 0x07;
            self.last_fe = value;
            return;
        }
        // 0x7FFD: A15 low, A1 low.
        if port & 0x8002 == 0 {
            self.memory.write_7ffd(value);
            return;
        }
        // 0x1FFD: A15-A13 low, A12 high, A1 low.
        if port & 0xF002 == 0x1000 {
            self.memory.write_1ffd(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpectrumModel;
    use crate::pulses::PulseStore;
    use emu_core::Ticks;

    fn make_bus() -> SpectrumBus {
        let mut config = SpectrumConfig::default();
        config.tape.autostart = false;
        SpectrumBus::new(&config)
    }

    #[test]
    fn fe_read_idle_keyboard() {
        let mut bus = make_bus();
        // No keys, no tape: bits 0-4 high, bit 6 low (ear idle).
        assert_eq!(bus.io_read(0xFEFE), 0xBF);
    }

    #[test]
    fn fe_read_reflects_keyboard() {
        let mut bus = make_bus();
        bus.keyboard.set_key(0, 0, true);
        assert_eq!(bus.io_read(0xFEFE) & 0x1F, 0x1E);
        assert_eq!(bus.io_read(0x7FFE) & 0x1F, 0x1F, "other row unaffected");
    }

    #[test]
    fn fe_write_sets_border() {
        let mut bus = make_bus();
        bus.io_write(0x00FE, 0x15);
        assert_eq!(bus.border, 5);
        assert_eq!(bus.last_fe, 0x15);
    }

    #[test]
    fn paging_port_decode() {
        let mut bus = make_bus();
        bus.io_write(0x7FFD, 0x10);
        assert_eq!(bus.memory.p7ffd(), 0x10);
        // A15 set: not the paging port.
        bus.io_write(0xFFFD, 0x07);
        assert_eq!(bus.memory.p7ffd(), 0x10);
    }

    #[test]
    fn autostart_fires_on_ear_read() {
        let mut config = SpectrumConfig::default();
        config.tape.autostart = true;
        let mut bus = SpectrumBus::new(&config);

        let mut store = PulseStore::new();
        store.append(2168);
        store.append_end_marker();
        bus.tape.load(store);
        assert!(!bus.tape.is_playing());

        let _ = bus.io_read(0xFEFE);
        assert!(bus.tape.is_playing());
    }

    #[test]
    fn ear_bit_follows_tape() {
        let mut bus = make_bus();
        let mut store = PulseStore::new();
        store.append(1000);
        store.append(1000);
        store.append_end_marker();
        bus.tape.load(store);
        bus.tape.start(Ticks::ZERO);

        // First edge at t=0 raises the line.
        let v = bus.io_read(0xFEFE);
        assert_eq!(v & 0x40, 0x40);
        bus.clock.advance(1000);
        let v = bus.io_read(0xFEFE);
        assert_eq!(v & 0x40, 0x00);
    }

    #[test]
    fn beta_ports_hidden_outside_dos() {
        let mut config = SpectrumConfig::default();
        config.model = SpectrumModel::Pentagon128;
        let mut bus = SpectrumBus::new(&config);
        // Not in DOS: 0x1F is not the controller.
        assert_eq!(bus.io_read(0x001F), 0xFF);
        // Enter DOS: status register reads (NOT_READY set, no disk).
        bus.memory.write_7ffd(0x10);
        bus.memory.set_dos(true);
        assert_eq!(bus.io_read(0x001F) & 0x80, 0x80);
    }
}
