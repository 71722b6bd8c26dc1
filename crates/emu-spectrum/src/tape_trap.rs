//! ROM loader trap.
//!
//! When the guest enters the ROM's byte-loading loop at 0x056B with the
//! tape rolling, the trap decodes the whole block straight from the
//! pulse stream — pilot skip, bit pairs, checksum — and leaves the CPU
//! in the exact state the real routine would: registers, flags and the
//! return address. Thousands of emulated edge-polling iterations
//! collapse into one pass over the stream.

use emu_core::Ticks;
use log::debug;
use zilog_z80::{Z80, CF};

use crate::memory::SpectrumMemory;
use crate::tap::{BIT_ONE_THRESHOLD, SYNC_THRESHOLD};
use crate::tape::TapeEngine;

/// Entry point of the ROM's edge-polling byte loop.
pub const LD_BYTES_TRAP: u16 = 0x056B;
/// Successful exit: flag/data loaded, carry set.
pub const LD_BYTES_DONE: u16 = 0x05DF;
/// Error exit: loading error handling in the ROM.
pub const LD_BYTES_ERROR: u16 = 0x05E2;

/// Run the trap. The caller has verified PC, trap enablement and that
/// the tape is playing.
pub(crate) fn run(
    cpu: &mut Z80,
    memory: &mut SpectrumMemory,
    tape: &mut TapeEngine,
    now: Ticks,
) {
    // Pilot skip: wind through pilot pulses to the first sync pulse,
    // then swallow its partner.
    loop {
        match tape.consume_pulse() {
            None => return error_exit(cpu, tape, now),
            Some(p) if p <= SYNC_THRESHOLD => break,
            Some(_) => {}
        }
    }
    if tape.consume_pulse().is_none() {
        return error_exit(cpu, tape, now);
    }

    // Flag byte + DE payload bytes + checksum byte.
    let total = usize::from(cpu.regs.de()) + 2;
    for i in 0..total {
        let mut byte = 0u8;
        for bit in 0..8 {
            let Some(first) = tape.consume_pulse() else {
                return error_exit(cpu, tape, now);
            };
            if tape.consume_pulse().is_none() {
                return error_exit(cpu, tape, now);
            }
            if first > BIT_ONE_THRESHOLD {
                byte |= 0x80 >> bit;
            }
        }
        cpu.regs.l = byte;

        if i > 0 && i < total - 1 {
            memory.write(cpu.regs.ix, byte);
            cpu.regs.ix = cpu.regs.ix.wrapping_add(1);
            cpu.regs.set_de(cpu.regs.de().wrapping_sub(1));
        }
    }

    debug!("tape trap: block loaded, {} bytes", total - 2);
    cpu.regs.pc = LD_BYTES_DONE;
    cpu.regs.f |= CF;
    cpu.regs.set_bc(0xB001);
    cpu.regs.h = 0;
    tape.resync(now);
}

/// End of tape mid-block: take the ROM's error exit.
fn error_exit(cpu: &mut Z80, tape: &mut TapeEngine, now: Ticks) {
    debug!("tape trap: end of tape, error exit");
    cpu.regs.pc = LD_BYTES_ERROR;
    tape.stop();
    tape.resync(now);
}
