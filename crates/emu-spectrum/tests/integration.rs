//! End-to-end scenarios for the Spectrum core.
//!
//! Each test drives the whole machine through the public interface —
//! synthetic tape/disk/snapshot images in, guest-visible state out.

use emu_core::Bus;
use emu_spectrum::{
    encode_tap, load_any, parse_tap, Spectrum, SpectrumConfig, SpectrumModel, EAR_BIT,
    LD_BYTES_DONE, LD_BYTES_TRAP,
};
use wd_1793::images::trd::{DESC_DISK_TYPE, DESC_TRDOS_ID, DESCRIPTOR_OFFSET, TRDOS_ID};
use wd_1793::ImageKind;
use zilog_z80::CF;

/// Build one TAP block with a correct checksum.
fn tap_block(flag: u8, payload: &[u8]) -> Vec<u8> {
    let mut checksum = flag;
    for &b in payload {
        checksum ^= b;
    }
    let len = (payload.len() + 2) as u16;
    let mut out = len.to_le_bytes().to_vec();
    out.push(flag);
    out.extend_from_slice(payload);
    out.push(checksum);
    out
}

fn make_spectrum() -> Spectrum {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = SpectrumConfig::default();
    config.tape.autostart = false;
    Spectrum::new(&config)
}

// ---------------------------------------------------------------------------
// Scenario 1: TAP pulse structure
// ---------------------------------------------------------------------------

#[test]
fn tap_image_pulse_structure() {
    let header = {
        let mut h = vec![0u8; 17];
        h[1..11].copy_from_slice(b"test      ");
        h
    };
    let mut tap = tap_block(0x00, &header);
    tap.extend(tap_block(0xFF, &[0x00]));

    let mut spectrum = make_spectrum();
    spectrum.insert_tap(&tap).expect("valid TAP");

    let blocks = spectrum.bus().tape.blocks();
    assert_eq!(blocks.len(), 2);
    assert!(blocks[0].desc.contains("test"));

    // 19-byte header: pilot 8064 + 2 sync + 19×16 bits + pause;
    // 2-byte data block: pilot 3220 + 2 sync + 2×16 bits + pause.
    let store = &spectrum.bus().tape.store;
    assert_eq!(blocks[1].offset, 8064 + 2 + 19 * 16 + 1);
    assert_eq!(
        store.len(),
        (8064 + 2 + 19 * 16 + 1) + (3220 + 2 + 2 * 16 + 1) + 1
    );
}

// ---------------------------------------------------------------------------
// Scenario 2: Z80 v1 RLE payload
// ---------------------------------------------------------------------------

#[test]
fn z80_v1_rle_snapshot() {
    let mut data = vec![0u8; 30];
    data[6] = 0x00;
    data[7] = 0x80; // PC = 0x8000 (non-zero → v1)
    data[8] = 0x00;
    data[9] = 0x80; // SP
    data[12] = 0x20; // compressed
    data.extend_from_slice(&[0x41, 0x42, 0xED, 0xED, 0x05, 0x00, 0x43]);

    let mut spectrum = make_spectrum();
    load_any(&mut spectrum, "z80", &data).expect("valid Z80 v1");

    let expect = [0x41, 0x42, 0x00, 0x00, 0x00, 0x00, 0x00, 0x43];
    for (i, &want) in expect.iter().enumerate() {
        assert_eq!(
            spectrum.bus().memory.peek(0x4000 + i as u16),
            want,
            "byte {i} at 0x4000"
        );
    }
}

// ---------------------------------------------------------------------------
// Scenario 3: SNA 48K pops PC from the stack
// ---------------------------------------------------------------------------

#[test]
fn sna_48k_pc_from_stack() {
    let mut data = vec![0u8; 49_179];
    data[23] = 0x00; // SP = 0x5F00
    data[24] = 0x5F;
    data[27 + 0x5F00 - 0x4000] = 0x34;
    data[27 + 0x5F01 - 0x4000] = 0x12;

    let mut spectrum = make_spectrum();
    load_any(&mut spectrum, "sna", &data).expect("valid SNA");

    assert_eq!(spectrum.cpu().regs.pc, 0x1234);
    assert_eq!(spectrum.cpu().regs.sp, 0x5F02);
}

// ---------------------------------------------------------------------------
// Scenario 4: TRD disk descriptor
// ---------------------------------------------------------------------------

#[test]
fn trd_descriptor_recognised() {
    let mut trd = vec![0u8; 80 * 2 * 16 * 256];
    trd[DESCRIPTOR_OFFSET + DESC_DISK_TYPE] = 0x16; // 80 cyls, double-sided
    trd[DESCRIPTOR_OFFSET + DESC_TRDOS_ID] = TRDOS_ID;

    let mut spectrum = make_spectrum();
    spectrum
        .insert_disk(0, ImageKind::Trd, &trd)
        .expect("valid TRD");

    let disk = spectrum.eject_disk(0).expect("disk inserted");
    assert_eq!(disk.cyls(), 80);
    assert_eq!(disk.sides(), 2);
    let descriptor = disk.read_sector(0, 0, 9).expect("system sector");
    assert_eq!(descriptor[DESC_DISK_TYPE], 0x16);
    assert_eq!(descriptor[DESC_TRDOS_ID], TRDOS_ID, "TR-DOS signature");
}

// ---------------------------------------------------------------------------
// Scenario 5: real-time playback without traps
// ---------------------------------------------------------------------------

#[test]
fn tape_signal_observable_without_traps() {
    let mut config = SpectrumConfig::default();
    config.tape.traps = false;
    config.tape.autostart = false;
    config.sound.enabled = true; // keep the pattern accelerator out too
    let mut spectrum = Spectrum::new(&config);

    let tap = tap_block(0xFF, &[0xAA, 0x55, 0x12, 0x34]);
    spectrum.insert_tap(&tap).expect("valid TAP");
    spectrum.play_tape();

    // Sampling loop at 0x8000: IN A,(0xFE); AND 0x40; LD (HL),A;
    // INC HL; JR -8. Records successive ear samples into RAM.
    let program = [0xDB, 0xFE, 0xE6, 0x40, 0x77, 0x23, 0x18, 0xF8];
    for (i, &b) in program.iter().enumerate() {
        spectrum.bus_mut().memory.write(0x8000 + i as u16, b);
    }
    spectrum.cpu_mut().regs.pc = 0x8000;
    spectrum.cpu_mut().regs.set_hl(0x9000);

    let mut cycles = 0u32;
    while cycles < 100_000 {
        cycles += spectrum.step();
    }

    let samples: Vec<u8> = (0..spectrum.cpu().regs.hl() - 0x9000)
        .map(|i| spectrum.bus().memory.peek(0x9000 + i))
        .collect();
    assert!(samples.len() > 1000, "the loop ran freely");
    assert!(samples.contains(&0x00), "low levels observed");
    assert!(samples.contains(&EAR_BIT), "high levels observed");
    let transitions = samples.windows(2).filter(|w| w[0] != w[1]).count();
    assert!(
        transitions > 10,
        "pilot tone produced many edges, saw {transitions}"
    );
    assert!(spectrum.bus().tape.position() > 0, "playback advanced");
}

// ---------------------------------------------------------------------------
// Scenario 6: ROM trap loads a block in one step
// ---------------------------------------------------------------------------

#[test]
fn rom_trap_loads_block() {
    let mut spectrum = make_spectrum();
    // Flag 0xFF, one byte 0xAA, checksum 0x55.
    let tap = tap_block(0xFF, &[0xAA]);
    spectrum.insert_tap(&tap).expect("valid TAP");
    spectrum.play_tape();

    // JP 0x056B from RAM; the trap fires at the instruction boundary.
    let target = LD_BYTES_TRAP.to_le_bytes();
    spectrum.bus_mut().memory.write(0x8000, 0xC3);
    spectrum.bus_mut().memory.write(0x8001, target[0]);
    spectrum.bus_mut().memory.write(0x8002, target[1]);
    spectrum.cpu_mut().regs.pc = 0x8000;
    spectrum.cpu_mut().regs.ix = 0x9000;
    spectrum.cpu_mut().regs.set_de(0x0001);
    spectrum.cpu_mut().regs.a = 0xFF;

    spectrum.step(); // JP; then the trap runs the whole block

    assert_eq!(spectrum.cpu().regs.pc, LD_BYTES_DONE);
    assert!(spectrum.cpu().regs.f & CF != 0, "carry set on success");
    assert_eq!(spectrum.bus().memory.peek(0x9000), 0xAA);
    assert_eq!(spectrum.cpu().regs.ix, 0x9001);
    assert_eq!(spectrum.cpu().regs.de(), 0x0000);
    assert_eq!(spectrum.cpu().regs.bc(), 0xB001);
    assert_eq!(spectrum.cpu().regs.h, 0);
}

// ---------------------------------------------------------------------------
// Scenario 7: WD1793 read sector through the ports
// ---------------------------------------------------------------------------

#[test]
fn wd1793_read_sector_via_ports() {
    let mut config = SpectrumConfig::default();
    config.betadisk.no_delay = true;
    let mut spectrum = Spectrum::new(&config);

    let mut trd = vec![0u8; 80 * 2 * 16 * 256];
    trd[DESCRIPTOR_OFFSET + DESC_DISK_TYPE] = 0x16;
    trd[DESCRIPTOR_OFFSET + DESC_TRDOS_ID] = TRDOS_ID;
    trd[0] = 0xC9; // track 0 sector 1 byte 0
    spectrum
        .insert_disk(0, ImageKind::Trd, &trd)
        .expect("valid TRD");

    // Pretend TR-DOS is paged in, so the ports decode.
    spectrum.bus_mut().memory.write_7ffd(0x10);
    spectrum.bus_mut().memory.set_dos(true);

    let bus = spectrum.bus_mut();
    bus.io_write(0x00FF, 0x3C); // drive 0, side 0
    bus.io_write(0x003F, 0); // track register
    bus.io_write(0x005F, 1); // sector register
    bus.io_write(0x001F, 0x80); // Read Sector

    let status = bus.io_read(0x001F);
    assert_eq!(status & 0x01, 0x01, "BSY set during the transfer");
    assert_eq!(
        bus.io_read(0x00FF) & 0x40,
        0x40,
        "DRQ raised on the system port"
    );
    let first = bus.io_read(0x007F);
    assert_eq!(first, 0xC9, "first data byte is sector byte 0");
}

// ---------------------------------------------------------------------------
// Round trips (spec invariants 5 and 6)
// ---------------------------------------------------------------------------

#[test]
fn tap_round_trip() {
    let mut tap = tap_block(0x00, &{
        let mut h = vec![0u8; 17];
        h[1..5].copy_from_slice(b"game");
        h
    });
    tap.extend(tap_block(0xFF, &(0..=255u8).collect::<Vec<_>>()));
    tap.extend(tap_block(0xFF, &[0x01]));

    let store = parse_tap(&tap).expect("valid TAP");
    assert_eq!(encode_tap(&store), tap, "byte-identical re-encoding");
}

#[test]
fn trd_round_trip() {
    let mut trd = vec![0u8; 80 * 2 * 16 * 256];
    trd[DESCRIPTOR_OFFSET + DESC_DISK_TYPE] = 0x16;
    trd[DESCRIPTOR_OFFSET + DESC_TRDOS_ID] = TRDOS_ID;
    for i in 0..4096 {
        trd[0x20000 + i] = (i * 7) as u8;
    }

    let mut spectrum = make_spectrum();
    spectrum
        .insert_disk(0, ImageKind::Trd, &trd)
        .expect("valid TRD");
    let disk = spectrum.eject_disk(0).expect("inserted");
    assert_eq!(disk.to_trd(), trd, "unmodified disk re-exports identically");
}

// ---------------------------------------------------------------------------
// Paging lock (spec §6: sticky until reset)
// ---------------------------------------------------------------------------

#[test]
fn paging_lock_sticks_until_reset() {
    let mut spectrum = make_spectrum();
    let bus = spectrum.bus_mut();
    bus.io_write(0x7FFD, 0x25); // bank 5 + lock
    bus.io_write(0x7FFD, 0x02); // ignored
    assert_eq!(bus.memory.p7ffd(), 0x25);

    spectrum.request_reset();
    spectrum.run_frame();
    let bus = spectrum.bus_mut();
    bus.io_write(0x7FFD, 0x02);
    assert_eq!(bus.memory.p7ffd(), 0x02, "lock cleared by hard reset");
}

// ---------------------------------------------------------------------------
// TZX end-to-end: a turbo block loads through the ROM trap
// ---------------------------------------------------------------------------

#[test]
fn tzx_turbo_block_through_trap() {
    let mut tzx = b"ZXTape!\x1A".to_vec();
    tzx.push(1);
    tzx.push(20);
    // Turbo block with ROM-like thresholds but its own lengths.
    tzx.push(0x11);
    for v in [2100u16, 650, 700, 600, 1500, 50] {
        tzx.extend_from_slice(&v.to_le_bytes());
    }
    tzx.push(8); // all bits of the last byte
    tzx.extend_from_slice(&0u16.to_le_bytes()); // no pause
    tzx.extend_from_slice(&[3, 0, 0]); // flag + byte + checksum
    tzx.extend_from_slice(&[0xFF, 0x77, 0x88]);

    let mut spectrum = make_spectrum();
    spectrum.insert_tzx(&tzx).expect("valid TZX");
    spectrum.play_tape();

    spectrum.bus_mut().memory.write(0x8000, 0xC3);
    spectrum.bus_mut().memory.write(0x8001, (LD_BYTES_TRAP & 0xFF) as u8);
    spectrum.bus_mut().memory.write(0x8002, (LD_BYTES_TRAP >> 8) as u8);
    spectrum.cpu_mut().regs.pc = 0x8000;
    spectrum.cpu_mut().regs.ix = 0x9000;
    spectrum.cpu_mut().regs.set_de(0x0001);

    spectrum.step();

    assert_eq!(spectrum.cpu().regs.pc, LD_BYTES_DONE);
    assert_eq!(spectrum.bus().memory.peek(0x9000), 0x77);
    assert_eq!(spectrum.cpu().regs.l, 0x88, "checksum byte decoded last");
}
