//! TAP tape format: parsing into the pulse store and re-encoding the
//! pulse stream back to TAP.
//!
//! TAP stores what the ROM saves: for each block a 16-bit little-endian
//! length followed by flag byte, payload and XOR checksum. The pulse
//! rendition is the canonical ROM loader structure — pilot tone, two
//! sync pulses, two equal pulses per data bit, trailing pause.

use log::warn;

use crate::error::TapeError;
use crate::pulses::PulseStore;

/// Canonical ROM timings, in T-states.
pub const PILOT_PULSE: u32 = 2168;
pub const SYNC1_PULSE: u32 = 667;
pub const SYNC2_PULSE: u32 = 735;
pub const ZERO_PULSE: u32 = 855;
pub const ONE_PULSE: u32 = 1710;

/// Pilot length: header blocks (flag < 4) get the long pilot.
pub const PILOT_HEADER: u32 = 8064;
pub const PILOT_DATA: u32 = 3220;

/// Pause after each block, in milliseconds.
pub const BLOCK_PAUSE_MS: u32 = 1000;

/// T-states per millisecond at the 3.5 MHz Z80 clock.
pub const TS_PER_MS: u32 = 3500;

/// Decoding thresholds shared with the ROM trap: a pulse at most this
/// long is a sync pulse, one longer than `BIT_ONE_THRESHOLD` is a 1 bit.
pub const SYNC_THRESHOLD: u32 = 770;
pub const BIT_ONE_THRESHOLD: u32 = 1240;

/// Anything longer than a 1-bit pulse ends the block's data (pilot of
/// the next block, or a pause).
const BLOCK_END_THRESHOLD: u32 = 2000;

/// Append one ROM-format block to the pulse store: pilot, syncs, data
/// bits, pause. Shared with the TZX standard/turbo/pure-data blocks,
/// hence every timing is a parameter. `last_bits` limits the bits taken
/// from the final byte (8 for whole-byte formats).
#[allow(clippy::too_many_arguments)]
pub(crate) fn make_block(
    store: &mut PulseStore,
    data: &[u8],
    pilot_t: u32,
    sync1_t: u32,
    sync2_t: u32,
    zero_t: u32,
    one_t: u32,
    pilot_len: u32,
    pause_ms: u32,
    last_bits: u8,
) {
    if pilot_len > 0 {
        store.append_repeated(pilot_t, pilot_len);
        store.append(sync1_t);
        store.append(sync2_t);
    }
    for (i, &byte) in data.iter().enumerate() {
        let bits = if i == data.len() - 1 { last_bits } else { 8 };
        for bit in 0..bits {
            let duration = if byte & (0x80 >> bit) != 0 { one_t } else { zero_t };
            store.append(duration);
            store.append(duration);
        }
    }
    if pause_ms > 0 {
        store.append(pause_ms * TS_PER_MS);
    }
}

/// Short description of a block from its flag and payload.
fn describe(flag: u8, payload: &[u8]) -> String {
    if flag == 0x00 && payload.len() >= 17 {
        let name: String = payload[1..11]
            .iter()
            .map(|&b| if (0x20..0x7F).contains(&b) { b as char } else { '?' })
            .collect();
        let kind = match payload[0] {
            0 => "Program",
            1 => "Number array",
            2 => "Character array",
            _ => "Bytes",
        };
        format!("{kind}: {name}")
    } else {
        format!("Data block ({} bytes)", payload.len())
    }
}

/// Parse a TAP file into a pulse store.
///
/// # Errors
///
/// `TapeError::InvalidFormat` on a truncated block; a wrong checksum is
/// only logged — the guest's own loader is the judge of that.
pub fn parse_tap(data: &[u8]) -> Result<PulseStore, TapeError> {
    let mut store = PulseStore::new();
    let mut offset = 0;

    while offset < data.len() {
        if offset + 2 > data.len() {
            return Err(TapeError::invalid(
                "TAP",
                offset,
                "truncated block length",
            ));
        }
        let len = usize::from(u16::from_le_bytes([data[offset], data[offset + 1]]));
        offset += 2;
        if len == 0 {
            continue;
        }
        let block = data.get(offset..offset + len).ok_or_else(|| {
            TapeError::invalid(
                "TAP",
                offset,
                format!("block of {len} bytes runs past the end of the file"),
            )
        })?;

        let flag = block[0];
        let checksum: u8 = block[..len - 1].iter().fold(0, |acc, &b| acc ^ b);
        if len >= 2 && checksum != block[len - 1] {
            warn!(
                "tap: block at {:#x} has checksum {:#04x}, stored {:#04x}",
                offset - 2,
                checksum,
                block[len - 1]
            );
        }

        let payload = &block[1..len.saturating_sub(1)];
        store.begin_block(describe(flag, payload));
        let pilot_len = if flag < 4 { PILOT_HEADER } else { PILOT_DATA };
        make_block(
            &mut store,
            block,
            PILOT_PULSE,
            SYNC1_PULSE,
            SYNC2_PULSE,
            ZERO_PULSE,
            ONE_PULSE,
            pilot_len,
            BLOCK_PAUSE_MS,
            8,
        );
        store.end_block();
        offset += len;
    }

    store.append_end_marker();
    Ok(store)
}

/// Re-encode a (canonically timed) pulse stream as a TAP file.
///
/// The inverse of `parse_tap`: pilot and pause pulses delimit blocks,
/// bit pairs decode by the same threshold the ROM trap uses. Parsing a
/// TAP and re-encoding it yields the identical file.
#[must_use]
pub fn encode_tap(store: &PulseStore) -> Vec<u8> {
    let mut out = Vec::new();
    let mut pos = 0;

    'blocks: loop {
        // Skip pilot/pause pulses until the first sync pulse.
        loop {
            match store.duration_at(pos) {
                None | Some(crate::pulses::END_PULSE) => break 'blocks,
                Some(d) if d <= SYNC_THRESHOLD => break,
                Some(_) => pos += 1,
            }
        }
        pos += 2; // both sync pulses

        let mut bytes = Vec::new();
        'bytes: loop {
            let mut byte = 0u8;
            for bit in 0..8 {
                let first = match store.duration_at(pos) {
                    None | Some(crate::pulses::END_PULSE) => break 'bytes,
                    Some(d) if d > BLOCK_END_THRESHOLD => break 'bytes,
                    Some(d) => d,
                };
                if first > BIT_ONE_THRESHOLD {
                    byte |= 0x80 >> bit;
                }
                pos += 2;
            }
            bytes.push(byte);
        }

        if !bytes.is_empty() {
            out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            out.extend_from_slice(&bytes);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build one TAP block with a correct checksum.
    pub(crate) fn tap_block(flag: u8, payload: &[u8]) -> Vec<u8> {
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

    #[test]
    fn header_block_pulse_structure() {
        // 19-byte header block: flag 0x00 + 17 bytes + checksum.
        let mut header = vec![0u8; 17];
        header[1..5].copy_from_slice(b"test");
        let data = tap_block(0x00, &header);
        let store = parse_tap(&data).expect("valid TAP");

        // Pilot 8064 + 2 sync + 19 bytes × 16 + pause + end marker.
        assert_eq!(store.len(), 8064 + 2 + 19 * 16 + 1 + 1);
        assert_eq!(store.duration_at(0), Some(PILOT_PULSE));
        assert_eq!(store.duration_at(8063), Some(PILOT_PULSE));
        assert_eq!(store.duration_at(8064), Some(SYNC1_PULSE));
        assert_eq!(store.duration_at(8065), Some(SYNC2_PULSE));
        // Flag 0x00: first bit is a zero.
        assert_eq!(store.duration_at(8066), Some(ZERO_PULSE));
        assert_eq!(store.blocks().len(), 1);
        assert!(store.blocks()[0].desc.starts_with("Program"));
    }

    #[test]
    fn data_block_gets_short_pilot() {
        let data = tap_block(0xFF, &[0x00]);
        let store = parse_tap(&data).expect("valid TAP");
        assert_eq!(store.duration_at(0), Some(PILOT_PULSE));
        assert_eq!(store.duration_at(PILOT_DATA as usize), Some(SYNC1_PULSE));
        // Flag 0xFF: all eight bits are ones.
        assert_eq!(
            store.duration_at(PILOT_DATA as usize + 2),
            Some(ONE_PULSE)
        );
    }

    #[test]
    fn truncated_block_is_invalid() {
        let err = parse_tap(&[0x10, 0x00, 0xFF]).unwrap_err();
        assert!(err.to_string().contains("TAP"));
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let mut header = vec![0u8; 17];
        header[0] = 3; // Bytes
        header[1..7].copy_from_slice(b"screen");
        let mut tap = tap_block(0x00, &header);
        tap.extend(tap_block(0xFF, &[0x55, 0xAA, 0x00, 0xFF, 0x12]));
        tap.extend(tap_block(0xFF, &(0..=255u8).collect::<Vec<_>>()));

        let store = parse_tap(&tap).expect("valid TAP");
        assert_eq!(encode_tap(&store), tap);
    }

    #[test]
    fn spec_block_sequence() {
        // A 19-byte header plus a 2-byte data block (flag + checksum):
        // the stream is pilot, syncs, then 19×16 + 2×16 bit pulses and
        // the two pauses.
        let header = vec![0u8; 17];
        let mut tap = tap_block(0x00, &header);
        tap.extend(tap_block(0xFF, &[]));
        let store = parse_tap(&tap).expect("valid TAP");

        let expected = (8064 + 2 + 19 * 16 + 1) + (3220 + 2 + 2 * 16 + 1) + 1;
        assert_eq!(store.len(), expected);
        assert_eq!(store.blocks().len(), 2);
    }
}
