//! Beta Disk Interface: WD1793 port decode and TR-DOS ROM traps.
//!
//! The interface watches the CPU rather than the other way round: when
//! PC enters 0x3Dxx with the 48 BASIC ROM active, the TR-DOS ROM pages
//! in over 0x0000-0x3FFF; the first fetch from 0x4000 upwards pages it
//! back out. While TR-DOS is paged in, ports 0x1F/0x3F/0x5F/0x7F reach
//! the WD1793 registers and 0xFF the system register.
//!
//! The five ROM traps short-circuit the hottest TR-DOS routines. Each is
//! gated on a PC value, a verification byte in the ROM image (so a
//! patched or foreign ROM falls back to real execution), and for the
//! bulk-transfer pair the controller's transfer state.

use emu_core::Ticks;
use log::trace;
use wd_1793::Wd1793;
use zilog_z80::Z80;

use crate::memory::SpectrumMemory;

/// The Beta Disk Interface: a WD1793 plus paging logic.
pub struct BetaDisk {
    pub wd: Wd1793,
    pub present: bool,
}

impl BetaDisk {
    #[must_use]
    pub fn new(cpu_hz: u64, present: bool) -> Self {
        Self {
            wd: Wd1793::new(cpu_hz),
            present,
        }
    }

    /// Whether the interface claims an I/O port (TR-DOS paged in, low
    /// byte fully decoded).
    #[must_use]
    pub fn claims_port(&self, port: u16, dos: bool) -> bool {
        self.present && dos && matches!(port & 0xFF, 0x1F | 0x3F | 0x5F | 0x7F | 0xFF)
    }

    pub fn io_read(&mut self, port: u16, now: Ticks) -> u8 {
        let now = now.get();
        match port & 0xFF {
            0x1F => self.wd.read_status(now),
            0x3F => self.wd.read_track_reg(),
            0x5F => self.wd.read_sector_reg(),
            0x7F => self.wd.read_data(now),
            _ => self.wd.read_system(now),
        }
    }

    pub fn io_write(&mut self, port: u16, value: u8, now: Ticks) {
        let now = now.get();
        match port & 0xFF {
            0x1F => self.wd.write_command(value, now),
            0x3F => self.wd.write_track_reg(value),
            0x5F => self.wd.write_sector_reg(value),
            0x7F => self.wd.write_data(value, now),
            _ => self.wd.write_system(value, now),
        }
    }
}

/// TR-DOS paging transitions, checked after every instruction.
pub(crate) fn update_dos_paging(memory: &mut SpectrumMemory, pc: u16) {
    if !memory.dos() {
        if pc & 0xFF00 == 0x3D00 && memory.basic48_active() {
            trace!("betadisk: entering TR-DOS at PC={pc:#06x}");
            memory.set_dos(true);
        }
    } else if pc >= 0x4000 {
        trace!("betadisk: leaving TR-DOS at PC={pc:#06x}");
        memory.set_dos(false);
    }
}

/// Run the TR-DOS ROM traps for the instruction about to execute.
/// Caller has verified: DOS mode active, traps enabled.
pub(crate) fn run_traps(
    cpu: &mut Z80,
    memory: &mut SpectrumMemory,
    beta: &mut BetaDisk,
    now: Ticks,
) {
    match cpu.regs.pc {
        // Wait-for-ready loop: return immediately with A=0, C=0.
        0x3DFD if memory.peek(0x3DFD) == 0x3E => {
            trace!("disk trap T1");
            sim_ret(cpu, memory);
            cpu.regs.a = 0;
            cpu.regs.c = 0;
        }

        // Index-hole wait: return with A=0, B=0.
        0x3EA0 if memory.peek(0x3EA0) == 0x06 => {
            trace!("disk trap T2");
            sim_ret(cpu, memory);
            cpu.regs.a = 0;
            cpu.regs.b = 0;
        }

        // Delay counter: force the loop's exit condition.
        0x3E01 if memory.peek(0x3E01) == 0x0D => {
            cpu.regs.a = 1;
            cpu.regs.c = 1;
        }

        // INI transfer loop: drain the whole sector into memory at HL.
        0x3FEC if memory.peek(0x3FED) == 0xA2 && beta.wd.in_read_transfer() => {
            trace!(
                "disk trap T4: bulk read of {} bytes",
                beta.wd.transfer_remaining()
            );
            beta.wd.process(now.get());
            while let Some(byte) = beta.wd.trap_read_byte(now.get()) {
                memory.write(cpu.regs.hl(), byte);
                cpu.regs.set_hl(cpu.regs.hl().wrapping_add(1));
                cpu.regs.b = cpu.regs.b.wrapping_sub(1);
            }
            cpu.regs.pc = cpu.regs.pc.wrapping_add(2);
        }

        // OUTI transfer loop: feed the sector from memory at HL.
        0x3FD1
            if memory.peek(0x3FD2) == 0xA3
                && beta.wd.in_write_transfer()
                && beta.wd.drq_pending()
                && beta.wd.transfer_remaining() > 1 =>
        {
            trace!(
                "disk trap T5: bulk write of {} bytes",
                beta.wd.transfer_remaining()
            );
            beta.wd.process(now.get());
            while beta.wd.transfer_remaining() > 0 {
                let byte = memory.peek(cpu.regs.hl());
                if !beta.wd.trap_write_byte(byte, now.get()) {
                    break;
                }
                cpu.regs.set_hl(cpu.regs.hl().wrapping_add(1));
                cpu.regs.b = cpu.regs.b.wrapping_sub(1);
            }
            cpu.regs.pc = cpu.regs.pc.wrapping_add(2);
        }

        _ => {}
    }
}

/// Simulate a RET: pop the return address into PC.
fn sim_ret(cpu: &mut Z80, memory: &SpectrumMemory) {
    let lo = memory.peek(cpu.regs.sp);
    let hi = memory.peek(cpu.regs.sp.wrapping_add(1));
    cpu.regs.sp = cpu.regs.sp.wrapping_add(2);
    cpu.regs.pc = u16::from_le_bytes([lo, hi]);
}
