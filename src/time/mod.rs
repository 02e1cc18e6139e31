//! # Time
//!
//! Conversion of rendered audio samples and elapsed wall time into integer
//! tick positions. Audio ticks follow a tempo map, frame ticks a fixed rate.

mod clock;
mod frame;
pub mod smf;
mod tempo;

pub use self::clock::{TickClock, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};
pub use self::frame::{FrameClock, DEFAULT_FRAME_RATE};
pub use self::smf::{scan_tempo, TempoScan};
pub use self::tempo::{TempoEvent, TempoMap};
