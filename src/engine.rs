use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::err::Error;
use crate::time::{FrameClock, TempoMap, TickClock};
use crate::vm::{EventKind, Payload, Scheduler, TickSource};

/// State shared by both tick producers. Every delivery goes through the one
/// scheduler lock, so script execution is serialised onto whichever thread
/// delivers the tick.
#[derive(Clone)]
pub struct EngineContext {
    config: EngineConfig,
    scheduler: Arc<Mutex<Scheduler>>,
    terminated: Arc<AtomicBool>,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Result<EngineContext, Error> {
        config.validate()?;
        let terminated = Arc::new(AtomicBool::new(false));
        let scheduler = Scheduler::new(&config, terminated.clone());
        Ok(EngineContext {
            config: config,
            scheduler: Arc::new(Mutex::new(scheduler)),
            terminated: terminated,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn lock(&self) -> Result<MutexGuard<Scheduler>, Error> {
        Ok(self.scheduler.lock()?)
    }

    /// Stop script execution. Sequences are deactivated on the next tick.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn termination_flag(&self) -> Arc<AtomicBool> {
        self.terminated.clone()
    }

    /// Entry point for key, click and user input collaborators
    pub fn fire_event(
        &self,
        kind: EventKind,
        user_id: Option<i64>,
        payload: Payload,
    ) -> Result<usize, Error> {
        let mut scheduler = self.lock()?;
        Ok(scheduler.fire_event(kind, user_id, payload))
    }
}

/// Turns rendered audio buffers into audio ticks
pub struct AudioDriver {
    context: EngineContext,
    clock: TickClock,
    end_tick: Option<i64>,
    ended: bool,
}

impl AudioDriver {
    pub fn new(context: EngineContext, tempo_map: TempoMap) -> Result<AudioDriver, Error> {
        let clock = {
            let config = context.config();
            TickClock::new(config.sample_rate, config.ppq, tempo_map)?
        };
        Ok(AudioDriver {
            context: context,
            clock: clock,
            end_tick: None,
            ended: false,
        })
    }

    /// Fire `AudioEnd` once the delivered audio tick reaches `tick`
    pub fn with_end_tick(mut self, tick: i64) -> AudioDriver {
        self.end_tick = Some(tick);
        self
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    /// Account for one rendered buffer, delivering every tick it crossed.
    /// Returns the number of ticks delivered.
    pub fn process_samples(&mut self, samples: u32) -> Result<usize, Error> {
        let tick = match self.clock.process_samples(samples) {
            Some(tick) => tick,
            None => return Ok(0),
        };
        let mut scheduler = self.context.lock()?;
        let delivered = scheduler.deliver_through(TickSource::Audio, tick)?;
        if let Some(end) = self.end_tick {
            if !self.ended && tick >= end {
                self.ended = true;
                log::debug!(target: "lockstep::engine", "audio ended at tick {}", tick);
                scheduler.fire_event(EventKind::AudioEnd, None, Payload::new().with("tick", tick));
            }
        }
        Ok(delivered)
    }

    /// Signal that playback has run out, firing `AudioEnd` if it has not
    /// fired yet
    pub fn end_of_audio(&mut self) -> Result<usize, Error> {
        if self.ended {
            return Ok(0);
        }
        self.ended = true;
        let tick = self.clock.last_delivered_tick();
        let mut scheduler = self.context.lock()?;
        Ok(scheduler.fire_event(EventKind::AudioEnd, None, Payload::new().with("tick", tick)))
    }
}

/// Turns display frame updates into frame ticks
pub struct FrameDriver {
    context: EngineContext,
    clock: FrameClock,
}

impl FrameDriver {
    pub fn new(context: EngineContext) -> Result<FrameDriver, Error> {
        let clock = FrameClock::new(context.config().frame_rate)?;
        Ok(FrameDriver {
            context: context,
            clock: clock,
        })
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    /// Length of one frame, rounded up to the next nanosecond so advancing
    /// by it always reaches the next tick
    pub fn frame_duration(&self) -> Duration {
        let rate = u64::from(self.clock.frame_rate());
        Duration::from_nanos((1_000_000_000 + rate - 1) / rate)
    }

    pub fn advance(&mut self, delta: Duration) -> Result<usize, Error> {
        let tick = self.clock.advance(delta);
        self.deliver(tick)
    }

    pub fn update(&mut self, elapsed: Duration) -> Result<usize, Error> {
        let tick = self.clock.update(elapsed);
        self.deliver(tick)
    }

    fn deliver(&self, tick: Option<i64>) -> Result<usize, Error> {
        match tick {
            Some(tick) => {
                let mut scheduler = self.context.lock()?;
                Ok(scheduler.deliver_through(TickSource::Frame, tick)?)
            }
            None => Ok(0),
        }
    }
}
