use std::time::Duration;

use crate::err::ConfigErr;

pub const DEFAULT_FRAME_RATE: u32 = 60;

/// Frame tick generator, independent of tempo.
///
/// Frame ticks are whole display frames at a fixed rate. Like `TickClock`,
/// each integer tick is reported once and reported ticks never decrease.
#[derive(Clone, Debug)]
pub struct FrameClock {
    frame_rate: u32,
    elapsed: Duration,
    last_delivered_tick: i64,
}

impl FrameClock {
    pub fn new(frame_rate: u32) -> Result<FrameClock, ConfigErr> {
        if frame_rate == 0 {
            return Err(ConfigErr::FrameRate(frame_rate));
        }
        Ok(FrameClock {
            frame_rate: frame_rate,
            elapsed: Duration::new(0, 0),
            last_delivered_tick: -1,
        })
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn last_delivered_tick(&self) -> i64 {
        self.last_delivered_tick
    }

    pub fn tick_at_time(&self, elapsed: f64) -> i64 {
        (elapsed * f64::from(self.frame_rate)).trunc() as i64
    }

    /// Advance by a frame delta
    pub fn advance(&mut self, delta: Duration) -> Option<i64> {
        let elapsed = self.elapsed + delta;
        self.update(elapsed)
    }

    /// Move to an absolute elapsed time. Earlier times than the current one
    /// are ignored.
    pub fn update(&mut self, elapsed: Duration) -> Option<i64> {
        if elapsed > self.elapsed {
            self.elapsed = elapsed;
        }
        let tick = self.tick_at_time(self.elapsed.as_secs_f64());
        if tick > self.last_delivered_tick {
            self.last_delivered_tick = tick;
            Some(tick)
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.elapsed = Duration::new(0, 0);
        self.last_delivered_tick = -1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rate() {
        assert_eq!(FrameClock::new(0).unwrap_err(), ConfigErr::FrameRate(0));
    }

    #[test]
    fn test_frames() {
        let mut clock = FrameClock::new(60).unwrap();
        let frame = Duration::from_nanos(16_666_667);
        assert_eq!(clock.advance(Duration::new(0, 0)), Some(0));
        assert_eq!(clock.advance(frame), Some(1));
        assert_eq!(clock.advance(frame), Some(2));
        assert_eq!(clock.advance(Duration::from_millis(1)), None);
        assert_eq!(clock.update(Duration::from_secs(1)), Some(60));
        // Going backwards does not rewind
        assert_eq!(clock.update(Duration::from_millis(500)), None);
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_reset() {
        let mut clock = FrameClock::new(30).unwrap();
        clock.update(Duration::from_secs(2));
        clock.reset();
        assert_eq!(clock.last_delivered_tick(), -1);
        assert_eq!(clock.advance(Duration::from_millis(40)), Some(1));
    }
}
