//! Tape playback engine.
//!
//! `tape_bit()` is the hot path: the ULA's ear input samples it on every
//! port 0xFE read. It runs lazily — nothing happens until absolute time
//! reaches the next recorded edge, then the engine catches up pulse by
//! pulse. Signal edges are pushed into a buffer the sound collaborator
//! drains; when sound is off the buffer stays empty and the pattern
//! accelerator is allowed to warp time across the loops.

use emu_core::Ticks;

use crate::pulses::{BlockInfo, PulseStore, END_PULSE};

/// Ear-line mask: bit 6 of port 0xFE.
pub const EAR_BIT: u8 = 0x40;

/// Tape playback state over a pulse store.
pub struct TapeEngine {
    pub store: PulseStore,
    /// Current position in the pulse stream, `None` when stopped.
    play_ptr: Option<usize>,
    /// Absolute T-state at which the signal toggles next.
    edge_change: Ticks,
    /// Current signal level: 0 or `EAR_BIT`.
    bit: u8,
    /// Edge events for the sound collaborator: (time, new level).
    edges: Vec<(u64, u8)>,
    /// Record edges at all (sound enabled).
    record_edges: bool,
}

impl TapeEngine {
    #[must_use]
    pub fn new(record_edges: bool) -> Self {
        Self {
            store: PulseStore::new(),
            play_ptr: None,
            edge_change: Ticks::ZERO,
            bit: 0,
            edges: Vec::new(),
            record_edges,
        }
    }

    /// Whether a tape image is loaded.
    #[must_use]
    pub fn has_image(&self) -> bool {
        !self.store.is_empty()
    }

    /// Whether the tape is rolling.
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.play_ptr.is_some()
    }

    /// Stream position, for progress displays.
    #[must_use]
    pub fn position(&self) -> usize {
        self.play_ptr.unwrap_or(0)
    }

    #[must_use]
    pub fn blocks(&self) -> &[BlockInfo] {
        self.store.blocks()
    }

    /// Replace the tape image (parser output) and rewind.
    pub fn load(&mut self, store: PulseStore) {
        self.store = store;
        self.play_ptr = None;
        self.bit = 0;
    }

    pub fn eject(&mut self) {
        self.store.clear();
        self.play_ptr = None;
        self.bit = 0;
    }

    /// Start (or resume) playback at the given absolute time.
    pub fn start(&mut self, now: Ticks) {
        if !self.has_image() && self.play_ptr.is_none() {
            return;
        }
        if self.play_ptr.is_none() {
            self.play_ptr = Some(0);
        }
        self.edge_change = now;
    }

    /// Stop playback. The signal line holds its last level.
    pub fn stop(&mut self) {
        self.play_ptr = None;
    }

    /// Rewind to the start of the tape (stops playback).
    pub fn rewind(&mut self) {
        self.play_ptr = None;
        self.bit = 0;
    }

    /// Drain the recorded edge events (sound collaborator handoff).
    pub fn take_edges(&mut self) -> Vec<(u64, u8)> {
        std::mem::take(&mut self.edges)
    }

    /// Current signal level as the port 0xFE ear bit (0 or 0x40).
    ///
    /// Lazily advances the playback position until the next edge lies in
    /// the future, toggling the level and emitting edge events on the
    /// way. On the end-of-tape marker the tape stops and the line keeps
    /// its last level.
    pub fn tape_bit(&mut self, now: Ticks) -> u8 {
        if self.play_ptr.is_none() || now < self.edge_change {
            return self.bit;
        }

        while self.play_ptr.is_some() && self.edge_change <= now {
            if self.record_edges {
                self.edges.push((self.edge_change.get(), self.bit ^ EAR_BIT));
            }
            self.bit ^= EAR_BIT;

            match self.consume_pulse() {
                Some(duration) => self.edge_change += u64::from(duration),
                None => break,
            }
        }
        self.bit
    }

    /// Take the next pulse duration from the stream, stopping the tape
    /// at the end marker or when the stream runs out.
    pub fn consume_pulse(&mut self) -> Option<u32> {
        let ptr = self.play_ptr?;
        match self.store.duration_at(ptr) {
            Some(END_PULSE) | None => {
                self.stop();
                None
            }
            Some(duration) => {
                self.play_ptr = Some(ptr + 1);
                Some(duration)
            }
        }
    }

    /// Re-anchor the edge clock after a trap consumed pulses directly.
    pub fn resync(&mut self, now: Ticks) {
        self.edge_change = now;
    }

    /// The absolute time of the next signal edge (tests and scheduling).
    #[must_use]
    pub fn next_edge(&self) -> Ticks {
        self.edge_change
    }
}
