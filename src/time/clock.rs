use crate::err::ConfigErr;
use crate::math::ticks_per_second;

use super::tempo::TempoMap;

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Sample accurate tick generator.
///
/// Two query paths are provided and they agree with each other:
/// `process_samples` integrates rendered audio buffers and reports each new
/// integer tick once, while `tick_at_time` maps an absolute elapsed time to
/// a tick without touching any delivery state.
#[derive(Clone, Debug)]
pub struct TickClock {
    sample_rate: u32,
    ppq: u32,
    tempo_map: TempoMap,
    fractional_tick: f64,
    last_delivered_tick: i64,
    segment_index: usize,
    current_tempo_bpm: f64,
}

impl TickClock {
    pub fn new(sample_rate: u32, ppq: u32, tempo_map: TempoMap) -> Result<TickClock, ConfigErr> {
        if sample_rate < MIN_SAMPLE_RATE || sample_rate > MAX_SAMPLE_RATE {
            return Err(ConfigErr::SampleRate(sample_rate));
        }
        if ppq == 0 {
            return Err(ConfigErr::Ppq(ppq));
        }

        let bpm = tempo_map.bpm_at(0);
        Ok(TickClock {
            sample_rate: sample_rate,
            ppq: ppq,
            tempo_map: tempo_map,
            fractional_tick: 0.0,
            last_delivered_tick: -1,
            segment_index: 0,
            current_tempo_bpm: bpm,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn ppq(&self) -> u32 {
        self.ppq
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo_map
    }

    pub fn fractional_tick(&self) -> f64 {
        self.fractional_tick
    }

    pub fn last_delivered_tick(&self) -> i64 {
        self.last_delivered_tick
    }

    pub fn segment_index(&self) -> usize {
        self.segment_index
    }

    pub fn current_tempo_bpm(&self) -> f64 {
        self.current_tempo_bpm
    }

    /// Return to the state before playback started
    pub fn reset(&mut self) {
        self.fractional_tick = 0.0;
        self.last_delivered_tick = -1;
        self.segment_index = 0;
        self.current_tempo_bpm = self.tempo_map.bpm_at(0);
    }

    /// Move the segment cursor past every boundary the integer part of the
    /// fractional tick has reached, refreshing the cached tempo
    fn sync_segment(&mut self) {
        let whole = self.fractional_tick.floor();
        while let Some(next) = self.tempo_map.get(self.segment_index + 1) {
            if whole < next.tick as f64 {
                break;
            }
            self.segment_index += 1;
        }
        self.current_tempo_bpm = self.tempo_map.segments()[self.segment_index].bpm();
    }

    /// Advance by `samples` rendered audio samples.
    ///
    /// Returns the new integer tick when it exceeds the last one returned.
    /// A buffer that spans a tempo boundary is split at the boundary so each
    /// part advances at the tempo in effect for it.
    pub fn process_samples(&mut self, samples: u32) -> Option<i64> {
        self.sync_segment();

        let mut remaining = f64::from(samples) / f64::from(self.sample_rate);
        while remaining > 0.0 {
            let rate = ticks_per_second(self.current_tempo_bpm, self.ppq);
            let delta = remaining * rate;
            match self.tempo_map.get(self.segment_index + 1) {
                Some(next) if self.fractional_tick + delta >= next.tick as f64 => {
                    let boundary = next.tick as f64;
                    remaining -= (boundary - self.fractional_tick) / rate;
                    self.fractional_tick = boundary;
                    self.sync_segment();
                }
                _ => {
                    self.fractional_tick += delta;
                    remaining = 0.0;
                }
            }
        }

        self.sync_segment();

        let tick = self.fractional_tick.floor() as i64;
        if tick > self.last_delivered_tick {
            self.last_delivered_tick = tick;
            Some(tick)
        } else {
            None
        }
    }

    /// Tick position at `elapsed` seconds from the start of the timeline.
    ///
    /// Pure with respect to the clock: depends only on the tempo map and ppq.
    pub fn tick_at_time(&self, elapsed: f64) -> i64 {
        self.fractional_at_time(elapsed).trunc() as i64
    }

    pub fn fractional_at_time(&self, elapsed: f64) -> f64 {
        let segments = self.tempo_map.segments();
        let mut start_time = 0.0;
        for (idx, segment) in segments.iter().enumerate() {
            let rate = ticks_per_second(segment.bpm(), self.ppq);
            if let Some(next) = segments.get(idx + 1) {
                let duration = (next.tick - segment.tick) as f64 / rate;
                if elapsed >= start_time + duration {
                    start_time += duration;
                    continue;
                }
            }
            return segment.tick as f64 + (elapsed - start_time) * rate;
        }
        0.0
    }

    /// Elapsed seconds at which the timeline reaches `tick`
    pub fn seconds_at_tick(&self, tick: u64) -> f64 {
        let segments = self.tempo_map.segments();
        let mut seconds = 0.0;
        for (idx, segment) in segments.iter().enumerate() {
            let rate = ticks_per_second(segment.bpm(), self.ppq);
            let end = match segments.get(idx + 1) {
                Some(next) if next.tick <= tick => next.tick,
                _ => return seconds + (tick - segment.tick) as f64 / rate,
            };
            seconds += (end - segment.tick) as f64 / rate;
        }
        seconds
    }
}
