//! Shared substrate for the Spectrum core.
//!
//! Holds the T-state time base and the bus interface the CPU executes
//! against. Everything in the machine is scheduled in T-states of the
//! CPU clock; absolute time is the monotonic frame total plus the
//! frame-relative counter. No exceptions.

mod bus;
mod clock;
mod ticks;

pub use bus::{Bus, SimpleBus};
pub use clock::FrameClock;
pub use ticks::Ticks;
