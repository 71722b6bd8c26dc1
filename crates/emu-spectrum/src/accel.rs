//! Pattern-based tape acceleration.
//!
//! Loaders burn most of their time in two kinds of loops: pure delay
//! counters and the edge-polling loop that samples the ear bit. Both
//! have recognisable opcode patterns. When the bytes at PC match one,
//! the whole loop is replayed arithmetically — the counter register and
//! the clock jump to where the loop would have left them.
//!
//! Runs only while the tape is playing and sound is off: warping time
//! across loops would glitch a live beeper stream.

use emu_core::FrameClock;
use zilog_z80::Z80;

use crate::memory::SpectrumMemory;
use crate::tape::TapeEngine;

/// An edge-polling loop signature.
///
/// `code` is compared byte-for-byte under `mask` (0x00 = wildcard).
/// `bit` is the port bit the loop tests (0x20 after an RRA, 0x40 when
/// the raw ear bit is masked). `step` and `timeout` describe the counter:
/// +1 loops time out when B reaches 0xFF, -1 loops at 0x01 — one
/// iteration short of the wrap, which is left to the real code.
struct EdgeLoop {
    name: &'static str,
    code: &'static [u8],
    mask: &'static [u8],
    bit: u8,
    cycles: u32,
    step: i8,
    timeout: u8,
}

/// Known edge-polling loops. Scanned in order; first match wins.
const EDGE_LOOPS: &[EdgeLoop] = &[
    // The 48K ROM's LD-SAMPLE: INC B; RET Z; LD A,n; IN A,(FE); RRA;
    // RET NC; XOR C; AND 20; JR Z,-13.
    EdgeLoop {
        name: "rom",
        code: &[0x04, 0xC8, 0x3E, 0x7F, 0xDB, 0xFE, 0x1F, 0xD0, 0xA9, 0xE6, 0x20, 0x28, 0xF3],
        mask: &[0xFF, 0xFF, 0xFF, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
        bit: 0x20,
        cycles: 59,
        step: 1,
        timeout: 0xFF,
    },
    // ROM loop testing the unshifted bit 6.
    EdgeLoop {
        name: "donkey kong",
        code: &[0x04, 0xC8, 0x3E, 0x7F, 0xDB, 0xFE, 0x1F, 0xD0, 0xA9, 0xE6, 0x40, 0x28, 0xF3],
        mask: &[0xFF, 0xFF, 0xFF, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
        bit: 0x40,
        cycles: 59,
        step: 1,
        timeout: 0xFF,
    },
    // ROM loop with the RET NC break-check dropped.
    EdgeLoop {
        name: "bleep",
        code: &[0x04, 0xC8, 0x3E, 0x7F, 0xDB, 0xFE, 0x1F, 0xA9, 0xE6, 0x20, 0x28, 0xF4],
        mask: &[0xFF, 0xFF, 0xFF, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
        bit: 0x20,
        cycles: 54,
        step: 1,
        timeout: 0xFF,
    },
    // Same shape on bit 6.
    EdgeLoop {
        name: "rana rama",
        code: &[0x04, 0xC8, 0x3E, 0x7F, 0xDB, 0xFE, 0x1F, 0xA9, 0xE6, 0x40, 0x28, 0xF4],
        mask: &[0xFF, 0xFF, 0xFF, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
        bit: 0x40,
        cycles: 54,
        step: 1,
        timeout: 0xFF,
    },
    // IN A,(C) variant.
    EdgeLoop {
        name: "popeye 2",
        code: &[0x04, 0xC8, 0xED, 0x78, 0x1F, 0xD0, 0xA9, 0xE6, 0x20, 0x28, 0xF5],
        mask: &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
        bit: 0x20,
        cycles: 53,
        step: 1,
        timeout: 0xFF,
    },
    // No LD A,n inside the loop at all.
    EdgeLoop {
        name: "zero music",
        code: &[0x04, 0xC8, 0xDB, 0xFE, 0x1F, 0xD0, 0xA9, 0xE6, 0x20, 0x28, 0xF5],
        mask: &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
        bit: 0x20,
        cycles: 52,
        step: 1,
        timeout: 0xFF,
    },
    // Downward counter (DEC B; RET Z; ...).
    EdgeLoop {
        name: "lode runner",
        code: &[0x05, 0xC8, 0x3E, 0x7F, 0xDB, 0xFE, 0x1F, 0xD0, 0xA9, 0xE6, 0x20, 0x28, 0xF3],
        mask: &[0xFF, 0xFF, 0xFF, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
        bit: 0x20,
        cycles: 59,
        step: -1,
        timeout: 0x01,
    },
];

/// Longest pattern we ever need to fetch.
const WINDOW: usize = 16;

/// Run the accelerator for the instruction about to execute at PC.
/// Returns the matched pattern name when anything was skipped (tests and
/// trace logging).
pub(crate) fn run(
    cpu: &mut Z80,
    memory: &SpectrumMemory,
    tape: &mut TapeEngine,
    clock: &mut FrameClock,
) -> Option<&'static str> {
    let pc = cpu.regs.pc;
    let mut window = [0u8; WINDOW];
    for (i, slot) in window.iter_mut().enumerate() {
        *slot = memory.peek(pc.wrapping_add(i as u16));
    }

    if let Some(name) = delay_loop(cpu, clock, pc, &window) {
        return Some(name);
    }
    edge_loop(cpu, tape, clock, &window)
}

/// Delay-counter loops: replace N iterations with one time jump.
fn delay_loop(
    cpu: &mut Z80,
    clock: &mut FrameClock,
    pc: u16,
    window: &[u8; WINDOW],
) -> Option<&'static str> {
    // DEC A; JR NZ,-3
    if window[0] == 0x3D && window[1] == 0x20 && window[2] == 0xFD {
        let turns = u32::from(cpu.regs.a.wrapping_sub(1));
        if turns > 0 {
            clock.advance(turns * 16);
            cpu.regs.a = 1;
            return Some("dec a; jr nz");
        }
        return None;
    }
    // DJNZ $
    if window[0] == 0x10 && window[1] == 0xFE {
        let turns = u32::from(cpu.regs.b.wrapping_sub(1));
        if turns > 0 {
            clock.advance(turns * 13);
            cpu.regs.b = 1;
            return Some("djnz $");
        }
        return None;
    }
    // DEC A; JP NZ, <self>
    if window[0] == 0x3D
        && window[1] == 0xC2
        && u16::from_le_bytes([window[2], window[3]]) == pc
    {
        let turns = u32::from(cpu.regs.a.wrapping_sub(1));
        if turns > 0 {
            clock.advance(turns * 14);
            cpu.regs.a = 1;
            return Some("dec a; jp nz");
        }
    }
    None
}

/// Edge-polling loops: spin the whole sampling loop here, advancing the
/// clock per iteration so `tape_bit()` sees real time.
fn edge_loop(
    cpu: &mut Z80,
    tape: &mut TapeEngine,
    clock: &mut FrameClock,
    window: &[u8; WINDOW],
) -> Option<&'static str> {
    let pattern = EDGE_LOOPS.iter().find(|p| {
        p.code
            .iter()
            .zip(p.mask)
            .zip(window.iter())
            .all(|((&code, &mask), &byte)| byte & mask == code & mask)
    })?;

    // Bit 0x20 loops test the ear bit after an RRA moved it down one.
    let shift = u32::from(pattern.bit == 0x20);
    let mut iterations = 0u32;
    loop {
        if cpu.regs.b == pattern.timeout {
            break;
        }
        let ear = tape.tape_bit(clock.now());
        if ((ear >> shift) ^ cpu.regs.c) & pattern.bit != 0 {
            break;
        }
        cpu.regs.b = cpu.regs.b.wrapping_add(pattern.step as u8);
        clock.advance(pattern.cycles);
        iterations += 1;
    }
    (iterations > 0).then_some(pattern.name)
}
