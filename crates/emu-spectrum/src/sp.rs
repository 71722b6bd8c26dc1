//! SP snapshot loader.
//!
//! A 38-byte header ("SP" signature, payload length and load address,
//! the register file, border, a status word) followed by the memory
//! payload. The format identifies itself by signature *and* internal
//! size consistency — header length + 38 must equal the file size.
//!
//! Status word layout (files in the wild disagree; this is the reading
//! recorded in DESIGN.md): bit 0 = IFF2, bit 1 = IFF1, bit 3 selects
//! IM 2 (IM 1 otherwise), bit 4 = an interrupt is pending.

use crate::error::SnapshotError;
use crate::spectrum::Spectrum;

pub const SP_HEADER_SIZE: usize = 38;

/// Whether the data passes the SP signature + size-consistency check.
#[must_use]
pub fn matches(data: &[u8]) -> bool {
    data.len() >= SP_HEADER_SIZE
        && &data[0..2] == b"SP"
        && usize::from(u16::from_le_bytes([data[2], data[3]])) + SP_HEADER_SIZE == data.len()
}

/// Load an SP snapshot.
///
/// # Errors
///
/// `SnapshotError::InvalidFormat` on a bad signature or a length field
/// inconsistent with the file size.
pub fn load_sp(spectrum: &mut Spectrum, data: &[u8]) -> Result<(), SnapshotError> {
    if data.len() < SP_HEADER_SIZE || &data[0..2] != b"SP" {
        return Err(SnapshotError::invalid("SP", 0, "bad signature"));
    }
    let length = usize::from(u16::from_le_bytes([data[2], data[3]]));
    if length + SP_HEADER_SIZE != data.len() {
        return Err(SnapshotError::invalid(
            "SP",
            2,
            format!(
                "length field {length} inconsistent with file size {}",
                data.len()
            ),
        ));
    }
    let start = u16::from_le_bytes([data[4], data[5]]);

    spectrum.reset();
    let regs = &mut spectrum.cpu_mut().regs;
    regs.set_bc(u16::from_le_bytes([data[6], data[7]]));
    regs.set_de(u16::from_le_bytes([data[8], data[9]]));
    regs.set_hl(u16::from_le_bytes([data[10], data[11]]));
    regs.f = data[12];
    regs.a = data[13];
    regs.ix = u16::from_le_bytes([data[14], data[15]]);
    regs.iy = u16::from_le_bytes([data[16], data[17]]);
    regs.c_alt = data[18];
    regs.b_alt = data[19];
    regs.e_alt = data[20];
    regs.d_alt = data[21];
    regs.l_alt = data[22];
    regs.h_alt = data[23];
    regs.f_alt = data[24];
    regs.a_alt = data[25];
    regs.set_r_full(data[26]);
    regs.i = data[27];
    regs.sp = u16::from_le_bytes([data[28], data[29]]);
    regs.pc = u16::from_le_bytes([data[30], data[31]]);

    spectrum.bus_mut().border = data[34] & 0x07;

    let status = u16::from_le_bytes([data[36], data[37]]);
    let regs = &mut spectrum.cpu_mut().regs;
    regs.iff2 = status & 0x01 != 0;
    regs.iff1 = status & 0x02 != 0;
    regs.im = if status & 0x08 != 0 { 2 } else { 1 };
    if status & 0x10 != 0 {
        spectrum.set_pending_interrupt();
    }

    for (i, &byte) in data[SP_HEADER_SIZE..].iter().enumerate() {
        let addr = start.wrapping_add(i as u16);
        spectrum.bus_mut().memory.write(addr, byte);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpectrumConfig;

    fn make_spectrum() -> Spectrum {
        Spectrum::new(&SpectrumConfig::default())
    }

    fn sp_image(start: u16, payload: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; SP_HEADER_SIZE];
        data[0] = b'S';
        data[1] = b'P';
        data[2] = payload.len() as u8;
        data[3] = (payload.len() >> 8) as u8;
        data[4] = start as u8;
        data[5] = (start >> 8) as u8;
        data.extend_from_slice(payload);
        data
    }

    #[test]
    fn loads_registers_and_memory() {
        let mut data = sp_image(0x8000, &[0xDE, 0xAD, 0xBE, 0xEF]);
        data[6] = 0x34; // C
        data[7] = 0x12; // B
        data[13] = 0x42; // A
        data[30] = 0x00; // PC
        data[31] = 0x60;
        data[34] = 4; // border green
        data[36] = 0x0B; // IFF1+IFF2, IM 2

        let mut spectrum = make_spectrum();
        load_sp(&mut spectrum, &data).expect("valid SP");

        let regs = &spectrum.cpu().regs;
        assert_eq!(regs.bc(), 0x1234);
        assert_eq!(regs.a, 0x42);
        assert_eq!(regs.pc, 0x6000, "PC from the header, not the stack");
        assert_eq!(regs.im, 2);
        assert!(regs.iff1);
        assert!(regs.iff2);
        assert_eq!(spectrum.bus().border, 4);
        assert_eq!(spectrum.bus().memory.peek(0x8000), 0xDE);
        assert_eq!(spectrum.bus().memory.peek(0x8003), 0xEF);
    }

    #[test]
    fn pending_interrupt_bit_latches_and_delivers() {
        let mut data = sp_image(0x8000, &[0x00]); // NOP at 0x8000
        data[28] = 0x00; // SP = 0x9000
        data[29] = 0x90;
        data[30] = 0x00; // PC = 0x8000
        data[31] = 0x80;
        data[36] = 0x13; // IFF1+IFF2, IM 1, interrupt pending

        let mut spectrum = make_spectrum();
        load_sp(&mut spectrum, &data).expect("valid SP");
        assert!(spectrum.pending_interrupt());

        // First step: the latched interrupt fires (IM 1 → 0x0038)
        // before anything at PC executes, then one handler byte runs.
        spectrum.step();
        assert!(!spectrum.pending_interrupt());
        assert_eq!(spectrum.cpu().regs.pc, 0x0039, "inside the handler");
        assert_eq!(spectrum.cpu().regs.sp, 0x8FFE, "return address pushed");
        assert!(!spectrum.cpu().regs.iff1, "acknowledge cleared IFF1");
    }

    #[test]
    fn no_pending_interrupt_without_bit_4() {
        let mut data = sp_image(0x8000, &[]);
        data[36] = 0x03; // IFF1+IFF2 only
        let mut spectrum = make_spectrum();
        load_sp(&mut spectrum, &data).expect("valid SP");
        assert!(!spectrum.pending_interrupt());
    }

    #[test]
    fn size_consistency_enforced() {
        let mut data = sp_image(0x8000, &[1, 2, 3]);
        data[2] = 10; // claims 10 bytes, carries 3
        let mut spectrum = make_spectrum();
        assert!(load_sp(&mut spectrum, &data).is_err());
        assert!(!matches(&data));
    }

    #[test]
    fn signature_check() {
        let data = sp_image(0x8000, &[]);
        assert!(matches(&data));
        let mut bad = data.clone();
        bad[1] = b'Q';
        assert!(!matches(&bad));
        let mut spectrum = make_spectrum();
        assert!(load_sp(&mut spectrum, &bad).is_err());
    }
}
