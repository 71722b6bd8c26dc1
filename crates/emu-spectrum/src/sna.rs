//! SNA snapshot loader (48K and 128K).
//!
//! **48K** (49,179 bytes): 27-byte register header + 48 KiB of RAM.
//! PC is not in the header — it sits on the restored stack and is
//! popped after loading.
//!
//! **128K** (131,103 or 147,487 bytes): the 48K layout (banks 5, 2 and
//! the bank paged at 0xC000), then PC, the 0x7FFD value and the TR-DOS
//! flag, then the remaining banks in ascending order. The longer size
//! appears when the paged bank duplicates bank 5 or 2, leaving six
//! banks for the tail instead of five.

use crate::error::SnapshotError;
use crate::spectrum::Spectrum;

pub const SNA_48K_SIZE: usize = 49_179;
pub const SNA_128K_SIZE: usize = 131_103;
pub const SNA_128K_BIG_SIZE: usize = 147_487;

const HEADER_SIZE: usize = 27;
const RAM_DUMP: usize = 49_152;
const BANK: usize = 0x4000;

/// Load a SNA snapshot of either size.
///
/// # Errors
///
/// `SnapshotError::InvalidFormat` when the size matches neither layout
/// or the 48K stack pointer points into ROM.
pub fn load_sna(spectrum: &mut Spectrum, data: &[u8]) -> Result<(), SnapshotError> {
    match data.len() {
        SNA_48K_SIZE => load_48k(spectrum, data),
        SNA_128K_SIZE | SNA_128K_BIG_SIZE => load_128k(spectrum, data),
        n => Err(SnapshotError::invalid(
            "SNA",
            0,
            format!("size {n} matches no SNA layout"),
        )),
    }
}

/// Restore the 27-byte register header. Returns the border colour.
fn load_header(spectrum: &mut Spectrum, data: &[u8]) -> u8 {
    spectrum.reset();
    let regs = &mut spectrum.cpu_mut().regs;

    regs.i = data[0];
    regs.l_alt = data[1];
    regs.h_alt = data[2];
    regs.e_alt = data[3];
    regs.d_alt = data[4];
    regs.c_alt = data[5];
    regs.b_alt = data[6];
    regs.f_alt = data[7];
    regs.a_alt = data[8];

    regs.l = data[9];
    regs.h = data[10];
    regs.e = data[11];
    regs.d = data[12];
    regs.c = data[13];
    regs.b = data[14];
    regs.iy = u16::from_le_bytes([data[15], data[16]]);
    regs.ix = u16::from_le_bytes([data[17], data[18]]);

    let iff2 = data[19] & 0x04 != 0;
    regs.iff1 = iff2;
    regs.iff2 = iff2;

    regs.set_r_full(data[20]);
    regs.f = data[21];
    regs.a = data[22];
    regs.sp = u16::from_le_bytes([data[23], data[24]]);
    regs.im = data[25] & 0x03;

    data[26]
}

fn load_48k(spectrum: &mut Spectrum, data: &[u8]) -> Result<(), SnapshotError> {
    let border = load_header(spectrum, data);
    spectrum.bus_mut().border = border & 0x07;

    let ram = &data[HEADER_SIZE..HEADER_SIZE + RAM_DUMP];
    for (i, &byte) in ram.iter().enumerate() {
        spectrum.bus_mut().memory.write(0x4000 + i as u16, byte);
    }

    // Pop PC from the restored stack.
    let sp = spectrum.cpu().regs.sp;
    if sp < 0x4000 {
        return Err(SnapshotError::invalid(
            "SNA",
            23,
            format!("stack pointer {sp:#06x} points into ROM"),
        ));
    }
    let lo = spectrum.bus().memory.peek(sp);
    let hi = spectrum.bus().memory.peek(sp.wrapping_add(1));
    let regs = &mut spectrum.cpu_mut().regs;
    regs.pc = u16::from_le_bytes([lo, hi]);
    regs.sp = sp.wrapping_add(2);
    Ok(())
}

fn load_128k(spectrum: &mut Spectrum, data: &[u8]) -> Result<(), SnapshotError> {
    let border = load_header(spectrum, data);
    spectrum.bus_mut().border = border & 0x07;

    let ext = HEADER_SIZE + RAM_DUMP;
    let pc = u16::from_le_bytes([data[ext], data[ext + 1]]);
    let p7ffd = data[ext + 2];
    let trdos = data[ext + 3] != 0;

    spectrum.bus_mut().memory.write_7ffd(p7ffd);
    let paged = usize::from(p7ffd & 0x07);

    // Main dump: banks 5, 2 and the bank at 0xC000.
    let memory = &mut spectrum.bus_mut().memory;
    memory.load_bank(5, &data[HEADER_SIZE..HEADER_SIZE + BANK]);
    memory.load_bank(2, &data[HEADER_SIZE + BANK..HEADER_SIZE + 2 * BANK]);
    memory.load_bank(paged, &data[HEADER_SIZE + 2 * BANK..HEADER_SIZE + 3 * BANK]);

    // Tail: every bank not already covered, ascending. The longer
    // variant repeats banks 5/2-paged dumps, so only 5 and 2 are
    // excluded there.
    let tail_count = (data.len() - ext - 4) / BANK;
    let mut offset = ext + 4;
    for bank in 0..8usize {
        let covered = bank == 5 || bank == 2 || (tail_count == 5 && bank == paged);
        if covered {
            continue;
        }
        memory.load_bank(bank, &data[offset..offset + BANK]);
        offset += BANK;
    }

    if trdos {
        spectrum.bus_mut().memory.set_dos(true);
    }
    spectrum.cpu_mut().regs.pc = pc;
    Ok(())
}
