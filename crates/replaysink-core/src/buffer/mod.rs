//! Recording buffer state and flush policy.
//!
//! A `BufferState` is a pure decision object: it counts what has been
//! appended and reports when a count, size, or time threshold is crossed.
//! The fragments themselves are held by the partition worker.

mod clock;
mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use state::{BufferReadiness, BufferState, BufferThresholds, FlushReason};
