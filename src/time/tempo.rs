use crate::err::ConfigErr;
use crate::math::{micros_to_bpm, DEFAULT_MICROS_PER_BEAT};

/// A tempo change at a position on the tick timeline
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoEvent {
    pub tick: u64,
    pub micros_per_beat: u32,
}

impl TempoEvent {
    pub fn new(tick: u64, micros_per_beat: u32) -> TempoEvent {
        TempoEvent {
            tick: tick,
            micros_per_beat: micros_per_beat,
        }
    }

    pub fn bpm(&self) -> f64 {
        micros_to_bpm(self.micros_per_beat)
    }
}

/// Piecewise constant tempo over the tick timeline.
///
/// Construction sorts the events by tick, keeping declaration order among
/// events that share a tick, then collapses each such run to its last event.
/// The resulting segments are strictly increasing in tick and the first
/// always starts at tick zero.
#[derive(Clone, Debug, PartialEq)]
pub struct TempoMap {
    segments: Vec<TempoEvent>,
}

impl TempoMap {
    pub fn new(events: &[TempoEvent]) -> Result<TempoMap, ConfigErr> {
        if let Some(event) = events.iter().find(|e| e.micros_per_beat == 0) {
            return Err(ConfigErr::Tempo(event.tick));
        }

        let mut sorted = events.to_vec();
        sorted.sort_by_key(|e| e.tick);

        let mut segments: Vec<TempoEvent> = Vec::with_capacity(sorted.len() + 1);
        if sorted.first().map_or(true, |e| e.tick != 0) {
            segments.push(TempoEvent::new(0, DEFAULT_MICROS_PER_BEAT));
        }
        for event in sorted {
            match segments.last_mut() {
                Some(last) if last.tick == event.tick => *last = event,
                _ => segments.push(event),
            }
        }

        Ok(TempoMap { segments: segments })
    }

    /// A map holding a single tempo from tick zero
    pub fn constant(micros_per_beat: u32) -> Result<TempoMap, ConfigErr> {
        TempoMap::new(&[TempoEvent::new(0, micros_per_beat)])
    }

    pub fn segments(&self) -> &[TempoEvent] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TempoEvent> {
        self.segments.get(index)
    }

    /// Index of the segment in effect at `tick`
    pub fn segment_at(&self, tick: u64) -> usize {
        match self.segments.binary_search_by_key(&tick, |e| e.tick) {
            Ok(idx) => idx,
            Err(idx) => idx.saturating_sub(1),
        }
    }

    pub fn bpm_at(&self, tick: u64) -> f64 {
        self.segments[self.segment_at(tick)].bpm()
    }
}

impl Default for TempoMap {
    fn default() -> TempoMap {
        TempoMap {
            segments: vec![TempoEvent::new(0, DEFAULT_MICROS_PER_BEAT)],
        }
    }
}
