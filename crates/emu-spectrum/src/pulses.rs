//! The pulse store: a compact representation of tape signals.
//!
//! Tape images of every format decode to the same thing — a sequence of
//! pulse durations. Durations repeat massively (a pilot tone is the same
//! pulse thousands of times), so the store keeps a table of up to 256
//! distinct durations and a byte stream of indices into it. Ordering in
//! the stream is strictly temporal.

use log::warn;

/// Maximum distinct pulse durations.
pub const MAX_PULSES: usize = 256;

/// Sentinel duration marking the end of the tape: playback stops here.
pub const END_PULSE: u32 = u32::MAX;

/// Metadata for one logical block of the tape.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    /// Human-readable description ("Program: name", "Turbo block", ...).
    pub desc: String,
    /// Offset of the block's first pulse in the index stream.
    pub offset: usize,
    /// Total duration of the block in T-states.
    pub t_size: u64,
}

/// Bounded duration table plus the byte-indexed pulse stream.
#[derive(Debug, Default)]
pub struct PulseStore {
    pulses: Vec<u32>,
    image: Vec<u8>,
    blocks: Vec<BlockInfo>,
}

impl PulseStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.pulses.clear();
        self.image.clear();
        self.blocks.clear();
    }

    /// Number of pulses in the stream.
    #[must_use]
    pub fn len(&self) -> usize {
        self.image.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }

    /// Duration of the pulse at a stream position.
    #[must_use]
    pub fn duration_at(&self, pos: usize) -> Option<u32> {
        self.image
            .get(pos)
            .map(|&idx| self.pulses[usize::from(idx)])
    }

    #[must_use]
    pub fn blocks(&self) -> &[BlockInfo] {
        &self.blocks
    }

    /// Intern a duration: exact match wins, then a free slot, then the
    /// nearest existing entry (first such entry on equal distance — the
    /// ±10% tolerance of real loaders absorbs the error).
    pub fn intern(&mut self, duration: u32) -> u8 {
        if let Some(found) = self.pulses.iter().position(|&p| p == duration) {
            return found as u8;
        }
        if self.pulses.len() < MAX_PULSES {
            self.pulses.push(duration);
            return (self.pulses.len() - 1) as u8;
        }
        let nearest = self
            .pulses
            .iter()
            .enumerate()
            .min_by_key(|&(_, &p)| p.abs_diff(duration))
            .map(|(i, _)| i)
            .expect("table is full, never empty");
        warn!(
            "pulse table full: {duration} T mapped to {} T",
            self.pulses[nearest]
        );
        nearest as u8
    }

    /// Append one pulse to the stream.
    pub fn append(&mut self, duration: u32) {
        let idx = self.intern(duration);
        self.image.push(idx);
    }

    /// Append `count` identical pulses.
    pub fn append_repeated(&mut self, duration: u32, count: u32) {
        let idx = self.intern(duration);
        self.image.extend(std::iter::repeat_n(idx, count as usize));
    }

    /// Append the end-of-tape marker: playback stops when it reaches it.
    pub fn append_end_marker(&mut self) {
        self.append(END_PULSE);
    }

    /// Open a new logical block at the current stream position.
    pub fn begin_block(&mut self, desc: impl Into<String>) {
        self.blocks.push(BlockInfo {
            desc: desc.into(),
            offset: self.image.len(),
            t_size: 0,
        });
    }

    /// Close the open block, computing its total duration.
    pub fn end_block(&mut self) {
        if let Some(block) = self.blocks.last_mut() {
            let total: u64 = self.image[block.offset..]
                .iter()
                .map(|&idx| {
                    let d = self.pulses[usize::from(idx)];
                    if d == END_PULSE { 0 } else { u64::from(d) }
                })
                .sum();
            block.t_size = total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_reuses_exact_matches() {
        let mut store = PulseStore::new();
        let a = store.intern(2168);
        let b = store.intern(667);
        let c = store.intern(2168);
        assert_eq!(a, c);
        assert_ne!(a, b);
    }

    #[test]
    fn full_table_maps_to_nearest_first_wins() {
        let mut store = PulseStore::new();
        for i in 0..MAX_PULSES as u32 {
            store.intern(i * 100);
        }
        // 1040 is equidistant from 1000 (slot 10) and 1100 (slot 11)?
        // No: 40 vs 60 — nearest is 1000. Use a true tie: 1050.
        let idx = store.intern(1050);
        assert_eq!(
            idx, 10,
            "tie between 1000 and 1100 resolves to the first entry"
        );
        // And the table did not grow.
        assert_eq!(store.intern(999_999), (MAX_PULSES - 1) as u8);
    }

    #[test]
    fn stream_indices_stay_in_range() {
        let mut store = PulseStore::new();
        store.begin_block("test");
        store.append_repeated(2168, 100);
        store.append(667);
        store.append(735);
        store.end_block();
        store.append_end_marker();

        for pos in 0..store.len() {
            let duration = store.duration_at(pos).expect("in range");
            if pos < store.len() - 1 {
                assert_ne!(duration, END_PULSE);
            }
        }
        assert_eq!(store.duration_at(store.len() - 1), Some(END_PULSE));
    }

    #[test]
    fn block_duration_totals() {
        let mut store = PulseStore::new();
        store.begin_block("tone");
        store.append_repeated(1000, 10);
        store.end_block();
        assert_eq!(store.blocks()[0].t_size, 10_000);
        assert_eq!(store.blocks()[0].offset, 0);
    }
}
