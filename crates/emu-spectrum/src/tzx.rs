//! TZX tape format (v1.20 and later).
//!
//! TZX is a container of typed blocks: signal-producing blocks (standard
//! and turbo speed data, tones, pulse runs, direct recordings), control
//! blocks (pause, jumps, loops, call sequences) and metadata. Parsing is
//! a small interpreter over the block list — jumps and loops resolve at
//! parse time, so playback itself stays a flat pulse stream.

#![allow(clippy::cast_possible_truncation)]

use log::{debug, warn};

use crate::config::SpectrumModel;
use crate::error::TapeError;
use crate::pulses::PulseStore;
use crate::tap::{
    make_block, BLOCK_PAUSE_MS, ONE_PULSE, PILOT_DATA, PILOT_HEADER, PILOT_PULSE, SYNC1_PULSE,
    SYNC2_PULSE, TS_PER_MS, ZERO_PULSE,
};

const SIGNATURE: &[u8] = b"ZXTape!\x1A";

/// One block located in the file: id plus the offset of its body.
struct RawBlock {
    id: u8,
    body: usize,
}

/// Cursor over the file data with bounds-checked readers.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> Result<u8, TapeError> {
        let v = self
            .data
            .get(self.pos)
            .copied()
            .ok_or_else(|| TapeError::invalid("TZX", self.pos, "unexpected end of file"))?;
        self.pos += 1;
        Ok(v)
    }

    fn u16(&mut self) -> Result<u16, TapeError> {
        Ok(u16::from_le_bytes([self.u8()?, self.u8()?]))
    }

    fn u24(&mut self) -> Result<u32, TapeError> {
        Ok(u32::from(self.u8()?) | (u32::from(self.u8()?) << 8) | (u32::from(self.u8()?) << 16))
    }

    fn u32(&mut self) -> Result<u32, TapeError> {
        Ok(u32::from(self.u16()?) | (u32::from(self.u16()?) << 16))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], TapeError> {
        let slice = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| TapeError::invalid("TZX", self.pos, "unexpected end of file"))?;
        self.pos += len;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<(), TapeError> {
        self.bytes(len).map(|_| ())
    }
}

/// Advance a reader past the block body of the given id. This is the
/// "conventional length rule" table used both for indexing and for
/// unsupported blocks.
fn skip_block(r: &mut Reader<'_>, id: u8) -> Result<(), TapeError> {
    match id {
        0x10 => {
            r.skip(2)?;
            let len = usize::from(r.u16()?);
            r.skip(len)
        }
        0x11 => {
            r.skip(15)?;
            let len = r.u24()? as usize;
            r.skip(len)
        }
        0x12 => r.skip(4),
        0x13 => {
            let n = usize::from(r.u8()?);
            r.skip(n * 2)
        }
        0x14 => {
            r.skip(7)?;
            let len = r.u24()? as usize;
            r.skip(len)
        }
        0x15 => {
            r.skip(5)?;
            let len = r.u24()? as usize;
            r.skip(len)
        }
        0x20 | 0x23 | 0x24 => r.skip(2),
        0x21 | 0x30 => {
            let len = usize::from(r.u8()?);
            r.skip(len)
        }
        0x22 | 0x25 | 0x27 => Ok(()),
        0x26 => {
            let n = usize::from(r.u16()?);
            r.skip(n * 2)
        }
        0x28 | 0x32 => {
            let len = usize::from(r.u16()?);
            r.skip(len)
        }
        0x2A | 0x2B => {
            let len = r.u32()? as usize;
            r.skip(len)
        }
        0x31 => {
            r.skip(1)?;
            let len = usize::from(r.u8()?);
            r.skip(len)
        }
        0x33 => {
            let n = usize::from(r.u8()?);
            r.skip(n * 3)
        }
        0x35 => {
            r.skip(16)?;
            let len = r.u32()? as usize;
            r.skip(len)
        }
        0x40 => {
            r.skip(1)?;
            let len = r.u24()? as usize;
            r.skip(len)
        }
        0x5A => r.skip(9),
        // Extension rule: unknown ids carry a 32-bit length first.
        other => {
            warn!("tzx: skipping unknown block {other:#04x}");
            let len = r.u32()? as usize;
            r.skip(len)
        }
    }
}

/// Parse a TZX file into a pulse store.
///
/// `model` decides the "stop the tape if in 48K mode" blocks.
///
/// # Errors
///
/// `TapeError::InvalidFormat` on a bad signature, truncated blocks, or
/// an embedded snapshot block (0x40) — a snapshot cannot be rendered as
/// pulses mid-stream.
pub fn parse_tzx(data: &[u8], model: SpectrumModel) -> Result<PulseStore, TapeError> {
    if !data.starts_with(SIGNATURE) {
        return Err(TapeError::invalid("TZX", 0, "bad signature"));
    }
    if data.len() < 10 {
        return Err(TapeError::invalid("TZX", data.len(), "truncated header"));
    }
    let (major, minor) = (data[8], data[9]);
    debug!("tzx: version {major}.{minor:02}");

    // Index pass: locate every block.
    let mut blocks = Vec::new();
    let mut r = Reader { data, pos: 10 };
    while r.pos < data.len() {
        let at = r.pos;
        let id = r.u8()?;
        let body = r.pos;
        skip_block(&mut r, id).map_err(|_| {
            TapeError::invalid("TZX", at, format!("truncated block {id:#04x}"))
        })?;
        blocks.push(RawBlock { id, body });
    }

    // Interpretation pass.
    let mut store = PulseStore::new();
    let mut index = 0usize;
    let mut loop_stack: Vec<(usize, u16)> = Vec::new();
    let mut call_stack: Vec<usize> = Vec::new();
    // Pending call sequence: (list of block offsets, next entry).
    let mut call_seq: Vec<i16> = Vec::new();
    let mut call_origin = 0usize;
    let mut call_next = 0usize;

    while index < blocks.len() {
        let block = &blocks[index];
        let mut r = Reader { data, pos: block.body };
        let mut next = index + 1;

        match block.id {
            // Standard-speed data: identical pulse pattern to TAP.
            0x10 => {
                let pause = u32::from(r.u16()?);
                let len = usize::from(r.u16()?);
                let body = r.bytes(len)?;
                let flag = body.first().copied().unwrap_or(0);
                let pilot_len = if flag < 4 { PILOT_HEADER } else { PILOT_DATA };
                store.begin_block(format!("Standard block ({len} bytes)"));
                make_block(
                    &mut store,
                    body,
                    PILOT_PULSE,
                    SYNC1_PULSE,
                    SYNC2_PULSE,
                    ZERO_PULSE,
                    ONE_PULSE,
                    pilot_len,
                    pause,
                    8,
                );
                store.end_block();
            }

            // Turbo-speed data: every timing explicit.
            0x11 => {
                let pilot_t = u32::from(r.u16()?);
                let sync1 = u32::from(r.u16()?);
                let sync2 = u32::from(r.u16()?);
                let zero = u32::from(r.u16()?);
                let one = u32::from(r.u16()?);
                let pilot_len = u32::from(r.u16()?);
                let used_bits = r.u8()?;
                let pause = u32::from(r.u16()?);
                let len = r.u24()? as usize;
                let body = r.bytes(len)?;
                if (zero == 0 || one == 0) && !body.is_empty() {
                    return Err(TapeError::invalid("TZX", block.body, "zero-length bit pulse"));
                }
                let last = if used_bits == 0 || used_bits > 8 { 8 } else { used_bits };
                store.begin_block(format!("Turbo block ({len} bytes)"));
                make_block(
                    &mut store, body, pilot_t, sync1, sync2, zero, one, pilot_len, pause, last,
                );
                store.end_block();
            }

            // Pure tone.
            0x12 => {
                let pulse = u32::from(r.u16()?);
                let count = u32::from(r.u16()?);
                if pulse == 0 && count > 0 {
                    return Err(TapeError::invalid("TZX", block.body, "zero-length tone pulse"));
                }
                store.begin_block(format!("Tone ({count} pulses)"));
                store.append_repeated(pulse, count);
                store.end_block();
            }

            // Explicit pulse sequence.
            0x13 => {
                let count = usize::from(r.u8()?);
                store.begin_block(format!("Pulse sequence ({count})"));
                for _ in 0..count {
                    let pulse = u32::from(r.u16()?);
                    if pulse == 0 {
                        return Err(TapeError::invalid("TZX", block.body, "zero-length pulse"));
                    }
                    store.append(pulse);
                }
                store.end_block();
            }

            // Pure data: bits only, no pilot or sync.
            0x14 => {
                let zero = u32::from(r.u16()?);
                let one = u32::from(r.u16()?);
                let used_bits = r.u8()?;
                let pause = u32::from(r.u16()?);
                let len = r.u24()? as usize;
                let body = r.bytes(len)?;
                if (zero == 0 || one == 0) && !body.is_empty() {
                    return Err(TapeError::invalid("TZX", block.body, "zero-length bit pulse"));
                }
                let last = if used_bits == 0 || used_bits > 8 { 8 } else { used_bits };
                store.begin_block(format!("Pure data ({len} bytes)"));
                make_block(&mut store, body, 0, 0, 0, zero, one, 0, pause, last);
                store.end_block();
            }

            // Direct recording: raw samples; a pulse per polarity flip.
            0x15 => {
                let period = u32::from(r.u16()?);
                let pause = u32::from(r.u16()?);
                let used_bits = r.u8()?;
                let len = r.u24()? as usize;
                let body = r.bytes(len)?;
                if period == 0 && !body.is_empty() {
                    return Err(TapeError::invalid("TZX", block.body, "zero sample period"));
                }
                store.begin_block(format!("Direct recording ({len} bytes)"));
                direct_recording(&mut store, body, period, used_bits, pause);
                store.end_block();
            }

            // Pause / stop the tape.
            0x20 => {
                let pause = u32::from(r.u16()?);
                if pause == 0 {
                    store.begin_block("Stop the tape");
                    store.append_end_marker();
                    store.end_block();
                } else {
                    store.begin_block(format!("Pause {pause} ms"));
                    store.append(pause * TS_PER_MS);
                    store.end_block();
                }
            }

            // Group begin/end: metadata only.
            0x21 => {
                let len = usize::from(r.u8()?);
                let name = String::from_utf8_lossy(r.bytes(len)?).into_owned();
                debug!("tzx: group '{name}'");
            }
            0x22 => {}

            // Relative jump.
            0x23 => {
                let delta = r.u16()? as i16;
                next = add_delta(index, delta, blocks.len(), block.body)?;
            }

            // Loop begin / end.
            0x24 => {
                let count = r.u16()?;
                loop_stack.push((index + 1, count.max(1)));
            }
            0x25 => {
                if let Some((start, remaining)) = loop_stack.pop() {
                    if remaining > 1 {
                        loop_stack.push((start, remaining - 1));
                        next = start;
                    }
                }
            }

            // Call sequence / return.
            0x26 => {
                let count = usize::from(r.u16()?);
                call_seq.clear();
                for _ in 0..count {
                    call_seq.push(r.u16()? as i16);
                }
                call_origin = index;
                call_next = 0;
                if let Some(&delta) = call_seq.first() {
                    call_next = 1;
                    call_stack.push(index);
                    next = add_delta(index, delta, blocks.len(), block.body)?;
                }
            }
            0x27 => {
                if let Some(origin) = call_stack.pop() {
                    debug_assert_eq!(origin, call_origin);
                    if call_next < call_seq.len() {
                        let delta = call_seq[call_next];
                        call_next += 1;
                        call_stack.push(call_origin);
                        next = add_delta(call_origin, delta, blocks.len(), block.body)?;
                    } else {
                        next = call_origin + 1;
                    }
                }
            }

            // Select block: metadata (playback cannot ask the user).
            0x28 => {}

            // Stop the tape if in 48K mode.
            0x2A => {
                if model.is_48k() {
                    store.begin_block("Stop in 48K mode");
                    store.append_end_marker();
                    store.end_block();
                }
            }

            // Set signal level: absorbed — the stream is edge-based.
            0x2B => {}

            // Text / message / archive / hardware metadata.
            0x30 => {
                let len = usize::from(r.u8()?);
                let text = String::from_utf8_lossy(r.bytes(len)?).into_owned();
                debug!("tzx: '{text}'");
            }
            0x31 | 0x32 | 0x33 | 0x35 => {}

            // Embedded snapshot mid-stream cannot become pulses.
            0x40 => {
                return Err(TapeError::invalid(
                    "TZX",
                    block.body,
                    "embedded snapshot block in a tape stream",
                ));
            }

            // Glue block: a concatenated file's signature, ignore.
            0x5A => {}

            other => {
                warn!("tzx: ignoring block {other:#04x}");
            }
        }

        index = next;
    }

    store.append_end_marker();
    Ok(store)
}

/// Apply a signed block delta with bounds checking.
fn add_delta(
    index: usize,
    delta: i16,
    count: usize,
    offset: usize,
) -> Result<usize, TapeError> {
    let target = index as i64 + i64::from(delta);
    if target < 0 || target as usize > count {
        return Err(TapeError::invalid(
            "TZX",
            offset,
            format!("jump to block {target} out of range"),
        ));
    }
    Ok(target as usize)
}

/// Decode a direct-recording block: emit one pulse per polarity flip by
/// XOR-ing consecutive samples.
fn direct_recording(store: &mut PulseStore, body: &[u8], period: u32, used_bits: u8, pause: u32) {
    let mut level: Option<u8> = None;
    let mut run: u32 = 0;

    for (i, &byte) in body.iter().enumerate() {
        let bits = if i == body.len() - 1 && used_bits != 0 && used_bits <= 8 {
            used_bits
        } else {
            8
        };
        for bit in 0..bits {
            let sample = (byte >> (7 - bit)) & 1;
            match level {
                Some(current) if current ^ sample != 0 => {
                    store.append(run * period);
                    run = 1;
                    level = Some(sample);
                }
                Some(_) => run += 1,
                None => {
                    level = Some(sample);
                    run = 1;
                }
            }
        }
    }
    if run > 0 {
        store.append(run * period);
    }
    if pause > 0 {
        store.append(pause * TS_PER_MS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulses::END_PULSE;

    fn tzx_header() -> Vec<u8> {
        let mut data = SIGNATURE.to_vec();
        data.push(1);
        data.push(20);
        data
    }

    #[test]
    fn rejects_bad_signature() {
        assert!(parse_tzx(b"ZXTape?\x1A\x01\x14", SpectrumModel::Pentagon128).is_err());
    }

    #[test]
    fn standard_speed_block_matches_tap_layout() {
        let mut data = tzx_header();
        data.push(0x10);
        data.extend_from_slice(&500u16.to_le_bytes()); // pause ms
        data.extend_from_slice(&2u16.to_le_bytes()); // length
        data.extend_from_slice(&[0xFF, 0xFF]); // flag + checksum

        let store = parse_tzx(&data, SpectrumModel::Pentagon128).expect("valid TZX");
        // Data flag → short pilot; 2 bytes × 16 pulses; pause; end.
        assert_eq!(store.len(), PILOT_DATA as usize + 2 + 32 + 1 + 1);
        assert_eq!(store.duration_at(0), Some(PILOT_PULSE));
    }

    #[test]
    fn turbo_block_uses_explicit_timings() {
        let mut data = tzx_header();
        data.push(0x11);
        for v in [1000u16, 300, 350, 400, 800, 100] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data.push(6); // used bits in last byte
        data.extend_from_slice(&0u16.to_le_bytes()); // no pause
        data.extend_from_slice(&[1, 0, 0]); // 24-bit length = 1
        data.push(0b1010_0000);

        let store = parse_tzx(&data, SpectrumModel::Pentagon128).expect("valid TZX");
        // 100 pilot + 2 sync + 6 bits × 2 + end marker.
        assert_eq!(store.len(), 100 + 2 + 12 + 1);
        assert_eq!(store.duration_at(0), Some(1000));
        assert_eq!(store.duration_at(100), Some(300));
        assert_eq!(store.duration_at(101), Some(350));
        assert_eq!(store.duration_at(102), Some(800), "first bit is a one");
        assert_eq!(store.duration_at(104), Some(400), "second bit is a zero");
    }

    #[test]
    fn pure_tone_and_pulse_sequence() {
        let mut data = tzx_header();
        data.push(0x12);
        data.extend_from_slice(&2168u16.to_le_bytes());
        data.extend_from_slice(&4u16.to_le_bytes());
        data.push(0x13);
        data.push(2);
        data.extend_from_slice(&111u16.to_le_bytes());
        data.extend_from_slice(&222u16.to_le_bytes());

        let store = parse_tzx(&data, SpectrumModel::Pentagon128).expect("valid TZX");
        assert_eq!(store.len(), 4 + 2 + 1);
        assert_eq!(store.duration_at(4), Some(111));
        assert_eq!(store.duration_at(5), Some(222));
    }

    #[test]
    fn pause_zero_stops_the_tape() {
        let mut data = tzx_header();
        data.push(0x20);
        data.extend_from_slice(&0u16.to_le_bytes());
        data.push(0x12); // a tone after the stop marker
        data.extend_from_slice(&100u16.to_le_bytes());
        data.extend_from_slice(&3u16.to_le_bytes());

        let store = parse_tzx(&data, SpectrumModel::Pentagon128).expect("valid TZX");
        assert_eq!(store.duration_at(0), Some(END_PULSE));
        assert_eq!(store.duration_at(1), Some(100), "stream continues after stop");
    }

    #[test]
    fn loop_repeats_blocks() {
        let mut data = tzx_header();
        data.push(0x24);
        data.extend_from_slice(&3u16.to_le_bytes());
        data.push(0x12); // tone of 2 pulses
        data.extend_from_slice(&100u16.to_le_bytes());
        data.extend_from_slice(&2u16.to_le_bytes());
        data.push(0x25);

        let store = parse_tzx(&data, SpectrumModel::Pentagon128).expect("valid TZX");
        assert_eq!(store.len(), 3 * 2 + 1, "tone played three times");
    }

    #[test]
    fn relative_jump_skips_blocks() {
        let mut data = tzx_header();
        data.push(0x23);
        data.extend_from_slice(&2u16.to_le_bytes()); // skip the next block
        data.push(0x12); // tone that must NOT play
        data.extend_from_slice(&100u16.to_le_bytes());
        data.extend_from_slice(&5u16.to_le_bytes());
        data.push(0x12); // tone that must play
        data.extend_from_slice(&200u16.to_le_bytes());
        data.extend_from_slice(&2u16.to_le_bytes());

        let store = parse_tzx(&data, SpectrumModel::Pentagon128).expect("valid TZX");
        assert_eq!(store.len(), 2 + 1);
        assert_eq!(store.duration_at(0), Some(200));
    }

    #[test]
    fn call_sequence_visits_and_returns() {
        // Call block at index 0 calls the block at +2, which returns;
        // playback then continues after the call block.
        let mut data = tzx_header();
        data.push(0x26);
        data.extend_from_slice(&1u16.to_le_bytes()); // one call
        data.extend_from_slice(&2u16.to_le_bytes()); // delta +2
        data.push(0x12); // fall-through tone (after return)
        data.extend_from_slice(&100u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.push(0x12); // called tone
        data.extend_from_slice(&300u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.push(0x27); // return

        let store = parse_tzx(&data, SpectrumModel::Pentagon128).expect("valid TZX");
        // Called tone (300) first, then the fall-through tone (100)...
        // which then reaches the called tone again in file order.
        assert_eq!(store.duration_at(0), Some(300));
        assert_eq!(store.duration_at(1), Some(100));
    }

    #[test]
    fn stop_if_48k_depends_on_model() {
        let mut data = tzx_header();
        data.push(0x2A);
        data.extend_from_slice(&0u32.to_le_bytes());
        data.push(0x12);
        data.extend_from_slice(&100u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());

        let on_48k = parse_tzx(&data, SpectrumModel::Spectrum48K).expect("valid");
        assert_eq!(on_48k.duration_at(0), Some(END_PULSE));

        let on_128k = parse_tzx(&data, SpectrumModel::Pentagon128).expect("valid");
        assert_eq!(on_128k.duration_at(0), Some(100));
    }

    #[test]
    fn direct_recording_emits_edges() {
        let mut data = tzx_header();
        data.push(0x15);
        data.extend_from_slice(&79u16.to_le_bytes()); // T-states per sample
        data.extend_from_slice(&0u16.to_le_bytes()); // no pause
        data.push(8);
        data.extend_from_slice(&[2, 0, 0]); // two bytes
        data.extend_from_slice(&[0b1111_0000, 0b0011_1111]);

        let store = parse_tzx(&data, SpectrumModel::Pentagon128).expect("valid TZX");
        // Runs: 4 high, 6 low, 6 high → pulses 316, 474, 474.
        assert_eq!(store.duration_at(0), Some(4 * 79));
        assert_eq!(store.duration_at(1), Some(6 * 79));
        assert_eq!(store.duration_at(2), Some(6 * 79));
        assert_eq!(store.duration_at(3), Some(END_PULSE));
    }

    #[test]
    fn embedded_snapshot_is_invalid() {
        let mut data = tzx_header();
        data.push(0x40);
        data.push(0); // snapshot type
        data.extend_from_slice(&[1, 0, 0]);
        data.push(0xAA);

        let err = parse_tzx(&data, SpectrumModel::Pentagon128).unwrap_err();
        assert!(err.to_string().contains("snapshot"));
    }

    #[test]
    fn metadata_blocks_are_skipped() {
        let mut data = tzx_header();
        data.push(0x30);
        data.push(4);
        data.extend_from_slice(b"test");
        data.push(0x21);
        data.push(1);
        data.push(b'G');
        data.push(0x22);
        data.push(0x32);
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&[0, 0]);
        data.push(0x5A);
        data.extend_from_slice(&[0; 9]);

        let store = parse_tzx(&data, SpectrumModel::Pentagon128).expect("valid TZX");
        assert_eq!(store.len(), 1, "only the end marker");
    }
}
