//! The shared T-state time base.

use crate::Ticks;

/// Frame-relative T-state clock.
///
/// Two counters make up the time base: `t`, relative to the current frame
/// and reset at each frame boundary, and `t_total`, a monotonic 64-bit
/// total advanced by `frame_len` whenever a boundary is crossed. Absolute
/// time is their sum; event timestamps stored in absolute form stay valid
/// across the per-frame rebase.
///
/// `t` may briefly exceed `frame_len` — the executor only checks for the
/// boundary after the last instruction of a frame, and that instruction
/// can overshoot by a few T-states. The overshoot is carried into the next
/// frame by `cross_frame()`.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    /// Frame-relative T-state counter.
    t: u32,
    /// Monotonic total of all completed frames, in T-states.
    t_total: u64,
    /// T-states per frame (e.g. 71680 for a 50 Hz Pentagon).
    frame_len: u32,
    /// Frame-relative position where the INT line goes active.
    int_pos: u32,
    /// Duration of the INT pulse in T-states.
    int_len: u32,
    /// Completed frame counter.
    frames: u64,
}

impl FrameClock {
    /// Create a clock with the given frame geometry.
    #[must_use]
    pub const fn new(frame_len: u32, int_pos: u32, int_len: u32) -> Self {
        Self {
            t: 0,
            t_total: 0,
            frame_len,
            int_pos,
            int_len,
            frames: 0,
        }
    }

    /// Advance frame-relative time by `n` T-states.
    pub fn advance(&mut self, n: u32) {
        self.t += n;
    }

    /// Absolute T-state time: `t_total + t`.
    #[must_use]
    pub fn now(&self) -> Ticks {
        Ticks::new(self.t_total + u64::from(self.t))
    }

    /// Frame-relative T-state counter.
    #[must_use]
    pub const fn t(&self) -> u32 {
        self.t
    }

    /// T-states per frame.
    #[must_use]
    pub const fn frame_len(&self) -> u32 {
        self.frame_len
    }

    /// Completed frame count.
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    /// Whether the INT line is active at the current frame position.
    #[must_use]
    pub const fn int_active(&self) -> bool {
        self.t >= self.int_pos && self.t < self.int_pos + self.int_len
    }

    /// Cross the frame boundary if `t` has reached `frame_len`.
    ///
    /// Moves one frame's worth of T-states from the relative counter into
    /// the monotonic total, carrying any overshoot. Returns `true` when a
    /// boundary was crossed. Immediately afterwards
    /// `t_total % frame_len == 0` holds and `now()` is unchanged.
    pub fn cross_frame(&mut self) -> bool {
        if self.t < self.frame_len {
            return false;
        }
        self.t_total += u64::from(self.frame_len);
        self.t -= self.frame_len;
        self.frames += 1;
        true
    }

    /// Hard reset: both counters return to zero.
    pub fn reset(&mut self) {
        self.t = 0;
        self.t_total = 0;
        self.frames = 0;
    }

    /// Replace the frame geometry (takes effect from the current frame).
    pub fn set_geometry(&mut self, frame_len: u32, int_pos: u32, int_len: u32) {
        self.frame_len = frame_len;
        self.int_pos = int_pos;
        self.int_len = int_len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: u32 = 71_680;

    #[test]
    fn advance_accumulates() {
        let mut clock = FrameClock::new(FRAME, 0, 32);
        clock.advance(4);
        clock.advance(11);
        assert_eq!(clock.t(), 15);
        assert_eq!(clock.now(), Ticks::new(15));
    }

    #[test]
    fn cross_frame_preserves_absolute_time() {
        let mut clock = FrameClock::new(FRAME, 0, 32);
        clock.advance(FRAME + 7); // overshoot by 7
        let before = clock.now();

        assert!(clock.cross_frame());
        assert_eq!(clock.now(), before);
        assert_eq!(clock.t(), 7);
        assert_eq!(clock.frames(), 1);
    }

    #[test]
    fn cross_frame_only_at_boundary() {
        let mut clock = FrameClock::new(FRAME, 0, 32);
        clock.advance(FRAME - 1);
        assert!(!clock.cross_frame());
        clock.advance(1);
        assert!(clock.cross_frame());
    }

    #[test]
    fn t_total_multiple_of_frame_len() {
        let mut clock = FrameClock::new(FRAME, 0, 32);
        for _ in 0..100 {
            clock.advance(FRAME + 13);
            assert!(clock.cross_frame());
            assert_eq!(clock.now().get() % u64::from(FRAME), u64::from(clock.t()) % u64::from(FRAME));
            assert_eq!((clock.now().get() - u64::from(clock.t())) % u64::from(FRAME), 0);
        }
    }

    #[test]
    fn int_window() {
        let mut clock = FrameClock::new(FRAME, 100, 32);
        assert!(!clock.int_active());
        clock.advance(100);
        assert!(clock.int_active());
        clock.advance(31);
        assert!(clock.int_active());
        clock.advance(1);
        assert!(!clock.int_active());
    }

    #[test]
    fn reset_zeroes_counters() {
        let mut clock = FrameClock::new(FRAME, 0, 32);
        clock.advance(FRAME);
        clock.cross_frame();
        clock.advance(55);
        clock.reset();
        assert_eq!(clock.now(), Ticks::ZERO);
        assert_eq!(clock.t(), 0);
        assert_eq!(clock.frames(), 0);
    }
}
