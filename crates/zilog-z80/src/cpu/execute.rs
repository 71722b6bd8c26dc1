//! Instruction decode and execution.
//!
//! One function call per instruction. Timing comes from a base table of
//! datasheet T-state counts plus per-case additions for taken branches,
//! prefix displacement fetches and block-op repeats.

#![allow(clippy::too_many_lines)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use emu_core::Bus;

use crate::alu;
use crate::flags::{parity, sz53, sz53p, CF, HF, NF, PF, SF, XF, YF, ZF};

use super::{Index, Z80};

/// Base T-states per unprefixed opcode. Conditional instructions hold the
/// not-taken cost; the prefix columns (CB/DD/ED/FD) are never consulted.
#[rustfmt::skip]
const CYCLES: [u8; 256] = [
    //  x0  x1  x2  x3  x4  x5  x6  x7  x8  x9  xA  xB  xC  xD  xE  xF
         4, 10,  7,  6,  4,  4,  7,  4,  4, 11,  7,  6,  4,  4,  7,  4, // 0x
         8, 10,  7,  6,  4,  4,  7,  4, 12, 11,  7,  6,  4,  4,  7,  4, // 1x
         7, 10, 16,  6,  4,  4,  7,  4,  7, 11, 16,  6,  4,  4,  7,  4, // 2x
         7, 10, 13,  6, 11, 11, 10,  4,  7, 11, 13,  6,  4,  4,  7,  4, // 3x
         4,  4,  4,  4,  4,  4,  7,  4,  4,  4,  4,  4,  4,  4,  7,  4, // 4x
         4,  4,  4,  4,  4,  4,  7,  4,  4,  4,  4,  4,  4,  4,  7,  4, // 5x
         4,  4,  4,  4,  4,  4,  7,  4,  4,  4,  4,  4,  4,  4,  7,  4, // 6x
         7,  7,  7,  7,  7,  7,  4,  7,  4,  4,  4,  4,  4,  4,  7,  4, // 7x
         4,  4,  4,  4,  4,  4,  7,  4,  4,  4,  4,  4,  4,  4,  7,  4, // 8x
         4,  4,  4,  4,  4,  4,  7,  4,  4,  4,  4,  4,  4,  4,  7,  4, // 9x
         4,  4,  4,  4,  4,  4,  7,  4,  4,  4,  4,  4,  4,  4,  7,  4, // Ax
         4,  4,  4,  4,  4,  4,  7,  4,  4,  4,  4,  4,  4,  4,  7,  4, // Bx
         5, 10, 10, 10, 10, 11,  7, 11,  5, 10, 10,  0, 10, 17,  7, 11, // Cx
         5, 10, 10, 11, 10, 11,  7, 11,  5,  4, 10, 11, 10,  0,  7, 11, // Dx
         5, 10, 10, 19, 10, 11,  7, 11,  5,  4, 10,  4, 10,  0,  7, 11, // Ex
         5, 10, 10,  4, 10, 11,  7, 11,  5,  6, 10,  4, 10,  0,  7, 11, // Fx
];

impl Z80 {
    /// Execute a decoded (unprefixed) opcode under the given index mode.
    pub(crate) fn exec_op<B: Bus>(&mut self, bus: &mut B, op: u8, idx: Index) -> u32 {
        let mut cycles = u32::from(CYCLES[op as usize]);

        match op {
            // NOP
            0x00 => {}

            // LD rr, nn
            0x01 => {
                let v = self.fetch16(bus);
                self.regs.set_bc(v);
            }
            0x11 => {
                let v = self.fetch16(bus);
                self.regs.set_de(v);
            }
            0x21 => {
                let v = self.fetch16(bus);
                self.set_idx16(idx, v);
            }
            0x31 => self.regs.sp = self.fetch16(bus),

            // LD (BC)/(DE), A and back
            0x02 => {
                let addr = self.regs.bc();
                bus.write(addr, self.regs.a);
                self.regs.wz =
                    (u16::from(self.regs.a) << 8) | (addr.wrapping_add(1) & 0x00FF);
            }
            0x12 => {
                let addr = self.regs.de();
                bus.write(addr, self.regs.a);
                self.regs.wz =
                    (u16::from(self.regs.a) << 8) | (addr.wrapping_add(1) & 0x00FF);
            }
            0x0A => {
                let addr = self.regs.bc();
                self.regs.a = bus.read(addr);
                self.regs.wz = addr.wrapping_add(1);
            }
            0x1A => {
                let addr = self.regs.de();
                self.regs.a = bus.read(addr);
                self.regs.wz = addr.wrapping_add(1);
            }

            // INC rr / DEC rr
            0x03 => self.regs.set_bc(self.regs.bc().wrapping_add(1)),
            0x13 => self.regs.set_de(self.regs.de().wrapping_add(1)),
            0x23 => {
                let v = self.idx16(idx).wrapping_add(1);
                self.set_idx16(idx, v);
            }
            0x33 => self.regs.sp = self.regs.sp.wrapping_add(1),
            0x0B => self.regs.set_bc(self.regs.bc().wrapping_sub(1)),
            0x1B => self.regs.set_de(self.regs.de().wrapping_sub(1)),
            0x2B => {
                let v = self.idx16(idx).wrapping_sub(1);
                self.set_idx16(idx, v);
            }
            0x3B => self.regs.sp = self.regs.sp.wrapping_sub(1),

            // INC r / DEC r
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C => {
                let code = (op >> 3) & 7;
                let r = alu::inc8(self.get_r(idx, code));
                self.set_r(idx, code, r.value);
                self.regs.f = (self.regs.f & CF) | r.flags;
            }
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D => {
                let code = (op >> 3) & 7;
                let r = alu::dec8(self.get_r(idx, code));
                self.set_r(idx, code, r.value);
                self.regs.f = (self.regs.f & CF) | r.flags;
            }
            0x34 => {
                let (addr, extra) = self.ea(bus, idx);
                cycles += extra;
                let r = alu::inc8(bus.read(addr));
                bus.write(addr, r.value);
                self.regs.f = (self.regs.f & CF) | r.flags;
            }
            0x35 => {
                let (addr, extra) = self.ea(bus, idx);
                cycles += extra;
                let r = alu::dec8(bus.read(addr));
                bus.write(addr, r.value);
                self.regs.f = (self.regs.f & CF) | r.flags;
            }

            // LD r, n
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => {
                let code = (op >> 3) & 7;
                let v = self.fetch8(bus);
                self.set_r(idx, code, v);
            }
            0x36 => {
                // LD (HL), n — indexed form fetches d before n.
                let (addr, extra) = match idx {
                    Index::Hl => (self.regs.hl(), 0),
                    _ => {
                        let d = self.fetch8(bus) as i8;
                        let addr = self.idx16(idx).wrapping_add(d as u16);
                        self.regs.wz = addr;
                        (addr, 5)
                    }
                };
                cycles += extra;
                let v = self.fetch8(bus);
                bus.write(addr, v);
            }

            // Accumulator rotates (S, Z, P preserved)
            0x07 => {
                let carry = self.regs.a >> 7;
                self.regs.a = self.regs.a.rotate_left(1);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
            }
            0x0F => {
                let carry = self.regs.a & 1;
                self.regs.a = self.regs.a.rotate_right(1);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
            }
            0x17 => {
                let old = u8::from(self.regs.f & CF != 0);
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | old;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
            }
            0x1F => {
                let old = u8::from(self.regs.f & CF != 0) << 7;
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | old;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | if carry != 0 { CF } else { 0 };
            }

            // EX AF, AF'
            0x08 => self.regs.ex_af(),

            // ADD HL/IX/IY, rr
            0x09 | 0x19 | 0x29 | 0x39 => {
                let lhs = self.idx16(idx);
                let rhs = match (op >> 4) & 3 {
                    0 => self.regs.bc(),
                    1 => self.regs.de(),
                    2 => lhs,
                    _ => self.regs.sp,
                };
                self.regs.wz = lhs.wrapping_add(1);
                let (value, flags) = alu::add16(lhs, rhs);
                self.set_idx16(idx, value);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
            }

            // DJNZ d
            0x10 => {
                let d = self.fetch8(bus) as i8;
                self.regs.b = self.regs.b.wrapping_sub(1);
                if self.regs.b != 0 {
                    self.regs.pc = self.regs.pc.wrapping_add(d as u16);
                    self.regs.wz = self.regs.pc;
                    cycles += 5;
                }
            }

            // JR d / JR cc, d
            0x18 => {
                let d = self.fetch8(bus) as i8;
                self.regs.pc = self.regs.pc.wrapping_add(d as u16);
                self.regs.wz = self.regs.pc;
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let d = self.fetch8(bus) as i8;
                if self.cond((op >> 3) & 3) {
                    self.regs.pc = self.regs.pc.wrapping_add(d as u16);
                    self.regs.wz = self.regs.pc;
                    cycles += 5;
                }
            }

            // LD (nn), HL/IX/IY and back
            0x22 => {
                let addr = self.fetch16(bus);
                let v = self.idx16(idx);
                self.write16(bus, addr, v);
                self.regs.wz = addr.wrapping_add(1);
            }
            0x2A => {
                let addr = self.fetch16(bus);
                let v = self.read16(bus, addr);
                self.set_idx16(idx, v);
                self.regs.wz = addr.wrapping_add(1);
            }

            // LD (nn), A / LD A, (nn)
            0x32 => {
                let addr = self.fetch16(bus);
                bus.write(addr, self.regs.a);
                self.regs.wz =
                    (u16::from(self.regs.a) << 8) | (addr.wrapping_add(1) & 0x00FF);
            }
            0x3A => {
                let addr = self.fetch16(bus);
                self.regs.a = bus.read(addr);
                self.regs.wz = addr.wrapping_add(1);
            }

            // DAA / CPL / SCF / CCF
            0x27 => {
                let r = alu::daa(self.regs.a, self.regs.f);
                self.regs.a = r.value;
                self.regs.f = r.flags;
            }
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.f = (self.regs.f & (SF | ZF | PF | CF))
                    | HF
                    | NF
                    | (self.regs.a & (YF | XF));
            }
            0x37 => {
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | CF
                    | (self.regs.a & (YF | XF));
            }
            0x3F => {
                let old_carry = self.regs.f & CF;
                let mut f = (self.regs.f & (SF | ZF | PF)) | (self.regs.a & (YF | XF));
                if old_carry != 0 {
                    f |= HF;
                } else {
                    f |= CF;
                }
                self.regs.f = f;
            }

            // HALT
            0x76 => {
                self.halted = true;
                // Refetch the HALT opcode while halted.
                self.regs.pc = self.regs.pc.wrapping_sub(1);
            }

            // LD r, r'
            0x40..=0x7F => {
                let dst = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    // LD r, (HL)/(IX+d): destination is always the plain
                    // register file, even under a prefix.
                    let (addr, extra) = self.ea(bus, idx);
                    cycles += extra;
                    let v = bus.read(addr);
                    self.set_r(Index::Hl, dst, v);
                } else if dst == 6 {
                    let (addr, extra) = self.ea(bus, idx);
                    cycles += extra;
                    let v = self.get_r(Index::Hl, src);
                    bus.write(addr, v);
                } else {
                    let v = self.get_r(idx, src);
                    self.set_r(idx, dst, v);
                }
            }

            // ALU A, r
            0x80..=0xBF => {
                let kind = (op >> 3) & 7;
                let src = op & 7;
                let operand = if src == 6 {
                    let (addr, extra) = self.ea(bus, idx);
                    cycles += extra;
                    bus.read(addr)
                } else {
                    self.get_r(idx, src)
                };
                self.alu_a(kind, operand);
            }

            // RET cc / RET
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                if self.cond((op >> 3) & 7) {
                    self.regs.pc = self.pop16(bus);
                    self.regs.wz = self.regs.pc;
                    cycles += 6;
                }
            }
            0xC9 => {
                self.regs.pc = self.pop16(bus);
                self.regs.wz = self.regs.pc;
            }

            // POP rr / PUSH rr
            0xC1 => {
                let v = self.pop16(bus);
                self.regs.set_bc(v);
            }
            0xD1 => {
                let v = self.pop16(bus);
                self.regs.set_de(v);
            }
            0xE1 => {
                let v = self.pop16(bus);
                self.set_idx16(idx, v);
            }
            0xF1 => {
                let v = self.pop16(bus);
                self.regs.set_af(v);
            }
            0xC5 => {
                let v = self.regs.bc();
                self.push16(bus, v);
            }
            0xD5 => {
                let v = self.regs.de();
                self.push16(bus, v);
            }
            0xE5 => {
                let v = self.idx16(idx);
                self.push16(bus, v);
            }
            0xF5 => {
                let v = self.regs.af();
                self.push16(bus, v);
            }

            // JP cc, nn / JP nn
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr;
                if self.cond((op >> 3) & 7) {
                    self.regs.pc = addr;
                }
            }
            0xC3 => {
                self.regs.pc = self.fetch16(bus);
                self.regs.wz = self.regs.pc;
            }

            // CALL cc, nn / CALL nn
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr;
                if self.cond((op >> 3) & 7) {
                    let pc = self.regs.pc;
                    self.push16(bus, pc);
                    self.regs.pc = addr;
                    cycles += 7;
                }
            }
            0xCD => {
                let addr = self.fetch16(bus);
                self.regs.wz = addr;
                let pc = self.regs.pc;
                self.push16(bus, pc);
                self.regs.pc = addr;
            }

            // ALU A, n
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let v = self.fetch8(bus);
                self.alu_a((op >> 3) & 7, v);
            }

            // RST
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                let pc = self.regs.pc;
                self.push16(bus, pc);
                self.regs.pc = u16::from(op & 0x38);
                self.regs.wz = self.regs.pc;
            }

            // Prefixes and I/O
            0xCB => return self.exec_cb(bus, idx),
            0xED => return self.exec_ed(bus),
            0xD3 => {
                let n = self.fetch8(bus);
                let port = (u16::from(self.regs.a) << 8) | u16::from(n);
                bus.io_write(port, self.regs.a);
                self.regs.wz = (u16::from(self.regs.a) << 8)
                    | (port.wrapping_add(1) & 0x00FF);
            }
            0xDB => {
                let n = self.fetch8(bus);
                let port = (u16::from(self.regs.a) << 8) | u16::from(n);
                self.regs.a = bus.io_read(port);
                self.regs.wz = port.wrapping_add(1);
            }

            // EXX / EX DE,HL / EX (SP),HL
            0xD9 => self.regs.exx(),
            0xEB => {
                // Not index-affected: DD EB still swaps DE with HL.
                let de = self.regs.de();
                let hl = self.regs.hl();
                self.regs.set_de(hl);
                self.regs.set_hl(de);
            }
            0xE3 => {
                let sp = self.regs.sp;
                let mem = self.read16(bus, sp);
                let v = self.idx16(idx);
                self.write16(bus, sp, v);
                self.set_idx16(idx, mem);
                self.regs.wz = mem;
            }

            // JP (HL) / LD SP,HL
            0xE9 => self.regs.pc = self.idx16(idx),
            0xF9 => self.regs.sp = self.idx16(idx),

            // DI / EI
            0xF3 => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
            }
            0xFB => {
                self.regs.iff1 = true;
                self.regs.iff2 = true;
                self.ei_latch = true;
            }

            // DD/FD are consumed by the prefix loop in step().
            0xDD | 0xFD => unreachable!("prefix handled by step()"),
        }

        cycles
    }

    /// Condition code test (NZ, Z, NC, C, PO, PE, P, M).
    fn cond(&self, code: u8) -> bool {
        match code {
            0 => self.regs.f & ZF == 0,
            1 => self.regs.f & ZF != 0,
            2 => self.regs.f & CF == 0,
            3 => self.regs.f & CF != 0,
            4 => self.regs.f & PF == 0,
            5 => self.regs.f & PF != 0,
            6 => self.regs.f & SF == 0,
            _ => self.regs.f & SF != 0,
        }
    }

    /// Accumulator ALU dispatch (ADD/ADC/SUB/SBC/AND/XOR/OR/CP).
    fn alu_a(&mut self, kind: u8, operand: u8) {
        let carry = self.regs.f & CF != 0;
        let r = match kind {
            0 => alu::add8(self.regs.a, operand, false),
            1 => alu::add8(self.regs.a, operand, carry),
            2 => alu::sub8(self.regs.a, operand, false),
            3 => alu::sub8(self.regs.a, operand, carry),
            4 => alu::and8(self.regs.a, operand),
            5 => alu::xor8(self.regs.a, operand),
            6 => alu::or8(self.regs.a, operand),
            _ => alu::cp8(self.regs.a, operand),
        };
        self.regs.a = r.value;
        self.regs.f = r.flags;
    }

    /// Rotate/shift dispatch for the CB group.
    fn rot(&mut self, kind: u8, value: u8) -> u8 {
        let carry = self.regs.f & CF != 0;
        let r = match kind {
            0 => alu::rlc8(value),
            1 => alu::rrc8(value),
            2 => alu::rl8(value, carry),
            3 => alu::rr8(value, carry),
            4 => alu::sla8(value),
            5 => alu::sra8(value),
            6 => alu::sll8(value),
            _ => alu::srl8(value),
        };
        self.regs.f = r.flags;
        r.value
    }

    /// BIT n — flag-only test. X/Y come from the tested value for the
    /// register forms; memory forms use the high byte of WZ instead.
    fn bit_test(&mut self, bit: u8, value: u8, xy_source: u8) {
        let tested = value & (1 << bit);
        let mut f = (self.regs.f & CF) | HF | (xy_source & (YF | XF));
        if tested == 0 {
            f |= ZF | PF;
        }
        if bit == 7 && tested != 0 {
            f |= SF;
        }
        self.regs.f = f;
    }

    // -----------------------------------------------------------------------
    // CB prefix
    // -----------------------------------------------------------------------

    fn exec_cb<B: Bus>(&mut self, bus: &mut B, idx: Index) -> u32 {
        if idx != Index::Hl {
            return self.exec_ddcb(bus, idx);
        }

        let op = self.fetch_op(bus);
        let group = op >> 6;
        let bit = (op >> 3) & 7;
        let code = op & 7;

        match group {
            0 => {
                // Rotates and shifts
                if code == 6 {
                    let addr = self.regs.hl();
                    let v = bus.read(addr);
                    let v = self.rot(bit, v);
                    bus.write(addr, v);
                    15
                } else {
                    let v = self.get_r(Index::Hl, code);
                    let v = self.rot(bit, v);
                    self.set_r(Index::Hl, code, v);
                    8
                }
            }
            1 => {
                // BIT
                if code == 6 {
                    let v = bus.read(self.regs.hl());
                    let wz_high = (self.regs.wz >> 8) as u8;
                    self.bit_test(bit, v, wz_high);
                    12
                } else {
                    let v = self.get_r(Index::Hl, code);
                    self.bit_test(bit, v, v);
                    8
                }
            }
            _ => {
                // RES / SET
                let mask = 1u8 << bit;
                if code == 6 {
                    let addr = self.regs.hl();
                    let v = bus.read(addr);
                    let v = if group == 2 { v & !mask } else { v | mask };
                    bus.write(addr, v);
                    15
                } else {
                    let v = self.get_r(Index::Hl, code);
                    let v = if group == 2 { v & !mask } else { v | mask };
                    self.set_r(Index::Hl, code, v);
                    8
                }
            }
        }
    }

    /// DD CB d op / FD CB d op — always operates on (IX+d); a non-memory
    /// register code additionally receives a copy of the result.
    fn exec_ddcb<B: Bus>(&mut self, bus: &mut B, idx: Index) -> u32 {
        let d = self.fetch8(bus) as i8;
        let op = self.fetch8(bus); // no refresh on the fourth byte
        let addr = self.idx16(idx).wrapping_add(d as u16);
        self.regs.wz = addr;

        let group = op >> 6;
        let bit = (op >> 3) & 7;
        let code = op & 7;

        match group {
            1 => {
                let v = bus.read(addr);
                let wz_high = (self.regs.wz >> 8) as u8;
                self.bit_test(bit, v, wz_high);
                16
            }
            _ => {
                let v = bus.read(addr);
                let result = match group {
                    0 => self.rot(bit, v),
                    2 => v & !(1 << bit),
                    _ => v | (1 << bit),
                };
                bus.write(addr, result);
                if code != 6 {
                    self.set_r(Index::Hl, code, result);
                }
                19
            }
        }
    }

    // -----------------------------------------------------------------------
    // ED prefix
    // -----------------------------------------------------------------------

    fn exec_ed<B: Bus>(&mut self, bus: &mut B) -> u32 {
        let op = self.fetch_op(bus);

        match op {
            // IN r, (C)
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78 => {
                let port = self.regs.bc();
                let v = bus.io_read(port);
                self.regs.wz = port.wrapping_add(1);
                self.regs.f = (self.regs.f & CF) | sz53p(v);
                let code = (op >> 3) & 7;
                if code != 6 {
                    self.set_r(Index::Hl, code, v);
                }
                12
            }

            // OUT (C), r — ED 71 outputs zero
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79 => {
                let port = self.regs.bc();
                let code = (op >> 3) & 7;
                let v = if code == 6 { 0 } else { self.get_r(Index::Hl, code) };
                bus.io_write(port, v);
                self.regs.wz = port.wrapping_add(1);
                12
            }

            // SBC HL, rr / ADC HL, rr
            0x42 | 0x52 | 0x62 | 0x72 => {
                let rhs = self.rp((op >> 4) & 3);
                let hl = self.regs.hl();
                self.regs.wz = hl.wrapping_add(1);
                let (v, f) = alu::sbc16(hl, rhs, self.regs.f & CF != 0);
                self.regs.set_hl(v);
                self.regs.f = f;
                15
            }
            0x4A | 0x5A | 0x6A | 0x7A => {
                let rhs = self.rp((op >> 4) & 3);
                let hl = self.regs.hl();
                self.regs.wz = hl.wrapping_add(1);
                let (v, f) = alu::adc16(hl, rhs, self.regs.f & CF != 0);
                self.regs.set_hl(v);
                self.regs.f = f;
                15
            }

            // LD (nn), rr / LD rr, (nn)
            0x43 | 0x53 | 0x63 | 0x73 => {
                let addr = self.fetch16(bus);
                let v = self.rp((op >> 4) & 3);
                self.write16(bus, addr, v);
                self.regs.wz = addr.wrapping_add(1);
                20
            }
            0x4B | 0x5B | 0x6B | 0x7B => {
                let addr = self.fetch16(bus);
                let v = self.read16(bus, addr);
                self.set_rp((op >> 4) & 3, v);
                self.regs.wz = addr.wrapping_add(1);
                20
            }

            // NEG (all mirrors)
            0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => {
                let r = alu::sub8(0, self.regs.a, false);
                self.regs.a = r.value;
                self.regs.f = r.flags;
                8
            }

            // RETN / RETI
            0x45 | 0x55 | 0x65 | 0x75 | 0x4D | 0x5D | 0x6D | 0x7D => {
                self.regs.iff1 = self.regs.iff2;
                self.regs.pc = self.pop16(bus);
                self.regs.wz = self.regs.pc;
                14
            }

            // IM 0/1/2
            0x46 | 0x4E | 0x66 | 0x6E => {
                self.regs.im = 0;
                8
            }
            0x56 | 0x76 => {
                self.regs.im = 1;
                8
            }
            0x5E | 0x7E => {
                self.regs.im = 2;
                8
            }

            // I and R transfers
            0x47 => {
                self.regs.i = self.regs.a;
                9
            }
            0x4F => {
                self.regs.set_r_full(self.regs.a);
                9
            }
            0x57 => {
                self.regs.a = self.regs.i;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
                9
            }
            0x5F => {
                self.regs.a = self.regs.r_full();
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | if self.regs.iff2 { PF } else { 0 };
                9
            }

            // RRD / RLD
            0x67 => {
                let addr = self.regs.hl();
                let m = bus.read(addr);
                let new_m = (self.regs.a << 4) | (m >> 4);
                self.regs.a = (self.regs.a & 0xF0) | (m & 0x0F);
                bus.write(addr, new_m);
                self.regs.wz = addr.wrapping_add(1);
                self.regs.f = (self.regs.f & CF) | sz53p(self.regs.a);
                18
            }
            0x6F => {
                let addr = self.regs.hl();
                let m = bus.read(addr);
                let new_m = (m << 4) | (self.regs.a & 0x0F);
                self.regs.a = (self.regs.a & 0xF0) | (m >> 4);
                bus.write(addr, new_m);
                self.regs.wz = addr.wrapping_add(1);
                self.regs.f = (self.regs.f & CF) | sz53p(self.regs.a);
                18
            }

            // Block transfer / search / I/O
            0xA0 => {
                self.ldi_ldd(bus, 1);
                16
            }
            0xA8 => {
                self.ldi_ldd(bus, -1);
                16
            }
            0xB0 => {
                self.ldi_ldd(bus, 1);
                self.block_repeat(self.regs.bc() != 0)
            }
            0xB8 => {
                self.ldi_ldd(bus, -1);
                self.block_repeat(self.regs.bc() != 0)
            }
            0xA1 => {
                self.cpi_cpd(bus, 1);
                16
            }
            0xA9 => {
                self.cpi_cpd(bus, -1);
                16
            }
            0xB1 => {
                let matched = self.cpi_cpd(bus, 1);
                self.block_repeat(self.regs.bc() != 0 && !matched)
            }
            0xB9 => {
                let matched = self.cpi_cpd(bus, -1);
                self.block_repeat(self.regs.bc() != 0 && !matched)
            }
            0xA2 => {
                self.ini_ind(bus, 1);
                16
            }
            0xAA => {
                self.ini_ind(bus, -1);
                16
            }
            0xB2 => {
                self.ini_ind(bus, 1);
                self.block_repeat(self.regs.b != 0)
            }
            0xBA => {
                self.ini_ind(bus, -1);
                self.block_repeat(self.regs.b != 0)
            }
            0xA3 => {
                self.outi_outd(bus, 1);
                16
            }
            0xAB => {
                self.outi_outd(bus, -1);
                16
            }
            0xB3 => {
                self.outi_outd(bus, 1);
                self.block_repeat(self.regs.b != 0)
            }
            0xBB => {
                self.outi_outd(bus, -1);
                self.block_repeat(self.regs.b != 0)
            }

            // Everything else in the ED space is a two-byte NOP.
            _ => 8,
        }
    }

    /// Rewind PC over a repeating block op and return its cycle cost.
    fn block_repeat(&mut self, repeat: bool) -> u32 {
        if repeat {
            self.regs.pc = self.regs.pc.wrapping_sub(2);
            self.regs.wz = self.regs.pc.wrapping_add(1);
            21
        } else {
            16
        }
    }

    fn rp(&self, code: u8) -> u16 {
        match code {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp,
        }
    }

    fn set_rp(&mut self, code: u8, value: u16) {
        match code {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            _ => self.regs.sp = value,
        }
    }

    /// LDI/LDD core: move one byte, update BC and the undocumented flags.
    fn ldi_ldd<B: Bus>(&mut self, bus: &mut B, dir: i16) {
        let hl = self.regs.hl();
        let de = self.regs.de();
        let n = bus.read(hl);
        bus.write(de, n);
        self.regs.set_hl(hl.wrapping_add(dir as u16));
        self.regs.set_de(de.wrapping_add(dir as u16));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        let k = n.wrapping_add(self.regs.a);
        let mut f = self.regs.f & (SF | ZF | CF);
        if bc != 0 {
            f |= PF;
        }
        if k & 0x02 != 0 {
            f |= YF;
        }
        f |= k & XF;
        self.regs.f = f;
    }

    /// CPI/CPD core. Returns true when the compared byte matched A.
    fn cpi_cpd<B: Bus>(&mut self, bus: &mut B, dir: i16) -> bool {
        let hl = self.regs.hl();
        let n = bus.read(hl);
        self.regs.set_hl(hl.wrapping_add(dir as u16));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        let res = self.regs.a.wrapping_sub(n);
        let half = self.regs.a & 0x0F < n & 0x0F;

        let mut f = (self.regs.f & CF) | NF | (res & SF);
        if res == 0 {
            f |= ZF;
        }
        if half {
            f |= HF;
        }
        if bc != 0 {
            f |= PF;
        }
        let k = res.wrapping_sub(u8::from(half));
        if k & 0x02 != 0 {
            f |= YF;
        }
        f |= k & XF;
        self.regs.f = f;

        res == 0
    }

    /// INI/IND core.
    fn ini_ind<B: Bus>(&mut self, bus: &mut B, dir: i16) {
        let port = self.regs.bc();
        let v = bus.io_read(port);
        let hl = self.regs.hl();
        bus.write(hl, v);
        self.regs.b = self.regs.b.wrapping_sub(1);
        self.regs.set_hl(hl.wrapping_add(dir as u16));

        let c_adj = if dir > 0 {
            self.regs.c.wrapping_add(1)
        } else {
            self.regs.c.wrapping_sub(1)
        };
        self.in_out_flags(v, c_adj);
    }

    /// OUTI/OUTD core. B decrements before the port address is formed.
    fn outi_outd<B: Bus>(&mut self, bus: &mut B, dir: i16) {
        let hl = self.regs.hl();
        let v = bus.read(hl);
        self.regs.b = self.regs.b.wrapping_sub(1);
        let port = self.regs.bc();
        bus.io_write(port, v);
        self.regs.set_hl(hl.wrapping_add(dir as u16));

        let l = self.regs.hl() as u8;
        self.in_out_flags(v, l);
    }

    /// Shared flag computation for the block I/O ops.
    fn in_out_flags(&mut self, value: u8, adj: u8) {
        let b = self.regs.b;
        let mut f = sz53(b);
        if value & 0x80 != 0 {
            f |= NF;
        }
        let k = u16::from(value) + u16::from(adj);
        if k > 0xFF {
            f |= HF | CF;
        }
        f |= parity(((k & 7) as u8) ^ b);
        self.regs.f = f;
    }
}
