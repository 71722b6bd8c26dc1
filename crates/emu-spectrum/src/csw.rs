//! CSW v1 — Compressed Square Wave tapes.
//!
//! CSW stores the signal itself: each byte is a run length in samples
//! between two edges, with 0x00 escaping a 32-bit run for long silences.
//! Sample counts convert to T-states through the file's sample rate.

use log::debug;

use crate::error::TapeError;
use crate::pulses::PulseStore;

const SIGNATURE: &[u8] = b"Compressed Square Wave\x1A";

/// Z80 clock the sample rate converts against.
pub const Z80_CLOCK_HZ: u32 = 3_500_000;

/// Parse a CSW v1 file into a pulse store.
///
/// # Errors
///
/// `TapeError::InvalidFormat` on a bad signature, a zero sample rate, or
/// a compression type other than 1 (RLE).
pub fn parse_csw(data: &[u8]) -> Result<PulseStore, TapeError> {
    if !data.starts_with(SIGNATURE) {
        return Err(TapeError::invalid("CSW", 0, "bad signature"));
    }
    if data.len() < 0x20 {
        return Err(TapeError::invalid("CSW", data.len(), "truncated header"));
    }

    let sample_rate = u32::from(u16::from_le_bytes([data[0x19], data[0x1A]]));
    if sample_rate == 0 {
        return Err(TapeError::invalid("CSW", 0x19, "zero sample rate"));
    }
    if data[0x1B] != 1 {
        return Err(TapeError::invalid(
            "CSW",
            0x1B,
            format!("unsupported compression type {}", data[0x1B]),
        ));
    }
    let initial_polarity = data[0x1C] & 1;
    debug!("csw: {sample_rate} Hz, initial polarity {initial_polarity}");

    let ts_per_sample = Z80_CLOCK_HZ / sample_rate;
    let mut store = PulseStore::new();
    store.begin_block(format!("CSW recording ({sample_rate} Hz)"));

    let mut pos = 0x20;
    while pos < data.len() {
        let run = data[pos];
        pos += 1;
        let samples = if run != 0 {
            u32::from(run)
        } else {
            let long = data.get(pos..pos + 4).ok_or_else(|| {
                TapeError::invalid("CSW", pos, "truncated 32-bit run length")
            })?;
            pos += 4;
            u32::from_le_bytes(long.try_into().expect("4 bytes"))
        };
        if samples == 0 {
            return Err(TapeError::invalid("CSW", pos - 4, "zero-length run"));
        }
        store.append(samples.saturating_mul(ts_per_sample));
    }

    // Synthetic trailing pause so the last edge settles.
    store.append(Z80_CLOCK_HZ / 10);
    store.end_block();
    store.append_end_marker();
    Ok(store)
}
