use std::time::Duration;

/// Microseconds per beat for 120 BPM, the tempo assumed when none is given
pub const DEFAULT_MICROS_PER_BEAT: u32 = 500_000;

const MICROS_PER_MINUTE: f64 = 60_000_000.0;

/// Convert a MIDI style tempo to beats per minute
pub fn micros_to_bpm(micros_per_beat: u32) -> f64 {
    MICROS_PER_MINUTE / f64::from(micros_per_beat)
}

/// Convert beats per minute to a MIDI style tempo, rounded to the nearest
/// microsecond
pub fn bpm_to_micros(bpm: f64) -> u32 {
    (MICROS_PER_MINUTE / bpm).round() as u32
}

/// Number of ticks that elapse per second at `bpm` with `ppq` resolution
pub fn ticks_per_second(bpm: f64, ppq: u32) -> f64 {
    bpm / 60.0 * f64::from(ppq)
}

pub fn millis_to_dur(millis: f64) -> Duration {
    let secs = (millis / 1000.0).floor();
    let nanos = (millis - (secs * 1000.0)) * 1_000_000.0;
    Duration::new(secs as u64, nanos as u32)
}

pub fn dur_to_millis(dur: &Duration) -> f64 {
    let secs = dur.as_secs() as f64 * 1000.0;
    let nanos = f64::from(dur.subsec_nanos()) / 1_000_000.0;
    secs + nanos
}
