use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::engine::{AudioDriver, EngineContext, FrameDriver};
use crate::err::{ConfigErr, Error, SysErr};
use crate::log::{LogMessage, Logger};
use crate::math::dur_to_millis;
use crate::time::{scan_tempo, TempoEvent, TempoMap};
use crate::vm::{EventKind, GroupId, Payload, Scheduler, SequenceId, Stmt, TickSource, TimingMode};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceSpec {
    #[serde(default)]
    pub mode: TimingMode,
    #[serde(default)]
    pub group: Option<GroupId>,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandlerSpec {
    pub event: EventKind,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub mode: TimingMode,
    #[serde(default)]
    pub group: Option<GroupId>,
    pub body: Vec<Stmt>,
}

/// A document describing what to load into a fresh engine
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Script {
    pub tempo: Vec<TempoEvent>,
    /// Audio tick at which `audio_end` handlers fire
    pub end_tick: Option<i64>,
    pub sequences: Vec<SequenceSpec>,
    pub handlers: Vec<HandlerSpec>,
}

impl Script {
    pub fn from_json(text: &str) -> Result<Script, Error> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Script, Error> {
        let text = fs::read_to_string(path)?;
        Script::from_json(&text)
    }

    /// Replace the tempo map with the one found in a standard MIDI file,
    /// returning the file's ppq
    pub fn use_midi_tempo(&mut self, bytes: &[u8]) -> Result<u32, Error> {
        let scan = scan_tempo(bytes)?;
        self.tempo = scan.events;
        Ok(scan.ppq)
    }

    pub fn tempo_map(&self) -> Result<TempoMap, ConfigErr> {
        TempoMap::new(&self.tempo)
    }

    /// Register the handlers and then the sequences with a scheduler
    pub fn install(&self, scheduler: &mut Scheduler) -> Result<Vec<SequenceId>, Error> {
        for handler in &self.handlers {
            scheduler.register_handler(
                handler.event,
                handler.user_id,
                &handler.body,
                handler.mode,
                handler.group,
            )?;
        }
        let mut ids = Vec::with_capacity(self.sequences.len());
        for seq in &self.sequences {
            ids.push(scheduler.register_sequence(&seq.body, seq.mode, seq.group)?);
        }
        Ok(ids)
    }
}

/// Outcome of an offline run
#[derive(Clone, Debug, Serialize)]
pub struct Simulation {
    pub duration: Duration,
    pub audio_ticks: i64,
    pub frame_ticks: i64,
    pub active: usize,
    pub trace: Vec<LogMessage>,
}

fn prepare(config: &EngineConfig, script: &Script) -> Result<(EngineContext, AudioDriver), Error> {
    let context = EngineContext::new(config.clone())?;
    context.lock().and_then(|mut scheduler| script.install(&mut scheduler))?;
    let mut audio = AudioDriver::new(context.clone(), script.tempo_map()?)?;
    if let Some(end) = script.end_tick {
        audio = audio.with_end_tick(end);
    }
    Ok((context, audio))
}

/// Run a script for `duration` without touching any device. Audio is
/// rendered in `buffer_size` blocks and the frame clock follows the rendered
/// time. End of audio fires afterwards, followed by audio up to the next
/// audio tick and one last frame, so handlers of that event get to run in
/// either timing mode.
pub fn simulate(config: &EngineConfig, script: &Script, duration: Duration) -> Result<Simulation, Error> {
    let (context, mut audio) = prepare(config, script)?;
    let (sender, receiver) = channel();
    context.lock()?.set_logger(Logger::new(sender));
    let mut frames = FrameDriver::new(context.clone())?;

    let sample_rate = f64::from(config.sample_rate);
    let total = (duration.as_secs_f64() * sample_rate).round() as u64;
    let mut rendered = 0u64;
    frames.update(Duration::from_secs(0))?;
    while rendered < total {
        let samples = (total - rendered).min(u64::from(config.buffer_size)) as u32;
        audio.process_samples(samples)?;
        rendered += u64::from(samples);
        frames.update(Duration::from_secs_f64(rendered as f64 / sample_rate))?;
    }
    audio.end_of_audio()?;
    let mut tail = 0u64;
    while tail < u64::from(config.sample_rate) {
        tail += u64::from(config.buffer_size);
        if audio.process_samples(config.buffer_size)? > 0 {
            break;
        }
    }
    let frame = frames.frame_duration();
    frames.advance(frame)?;

    let scheduler = context.lock()?;
    let trace: Vec<LogMessage> = receiver.try_iter().collect();
    log::debug!(
        target: "lockstep::api",
        "simulated {}ms, {} trace records",
        dur_to_millis(&duration),
        trace.len()
    );
    Ok(Simulation {
        duration: duration,
        audio_ticks: scheduler.last_delivered(TickSource::Audio) + 1,
        frame_ticks: scheduler.last_delivered(TickSource::Frame) + 1,
        active: scheduler.active_count(),
        trace: trace,
    })
}

/// A running engine. Frames are delivered from a background thread at the
/// configured rate, audio from whoever owns the audio callback.
pub struct Session {
    context: EngineContext,
    audio: Arc<Mutex<AudioDriver>>,
    running: Arc<AtomicBool>,
    frames: Option<JoinHandle<Result<(), Error>>>,
}

impl Session {
    pub fn start(config: &EngineConfig, script: &Script) -> Result<Session, Error> {
        let (context, audio) = prepare(config, script)?;
        let running = Arc::new(AtomicBool::new(true));

        let mut driver = FrameDriver::new(context.clone())?;
        let period = driver.frame_duration();
        let alive = running.clone();
        let frames = thread::spawn(move || {
            let start = Instant::now();
            while alive.load(Ordering::SeqCst) {
                if let Err(err) = driver.update(start.elapsed()) {
                    log::error!(target: "lockstep::api", "frame delivery stopped: {}", err);
                    return Err(err);
                }
                thread::sleep(period);
            }
            Ok(())
        });

        log::info!(target: "lockstep::api", "session started");
        Ok(Session {
            context: context,
            audio: Arc::new(Mutex::new(audio)),
            running: running,
            frames: Some(frames),
        })
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Handle for the audio callback
    pub fn audio(&self) -> Arc<Mutex<AudioDriver>> {
        self.audio.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Deliver the ticks for one rendered buffer. Does nothing once stopped.
    pub fn process_samples(&self, samples: u32) -> Result<usize, Error> {
        if !self.is_running() {
            return Ok(0);
        }
        let mut audio = self.audio.lock()?;
        audio.process_samples(samples)
    }

    pub fn fire_event(&self, kind: EventKind, user_id: Option<i64>, payload: Payload) -> Result<usize, Error> {
        self.context.fire_event(kind, user_id, payload)
    }

    /// Terminate the engine and stop delivering ticks
    pub fn stop(&mut self) -> Result<(), Error> {
        self.context.terminate();
        self.running.store(false, Ordering::SeqCst);
        match self.frames.take() {
            Some(handle) => match handle.join() {
                Ok(res) => res,
                Err(_) => Err(Error::from(SysErr::ThreadPanicked)),
            },
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::warn!(target: "lockstep::api", "session stopped with error: {}", err);
        }
    }
}

/// Sets a termination flag once a deadline passes, unless disarmed first
pub struct Watchdog {
    cancel: Sender<()>,
    handle: JoinHandle<bool>,
}

impl Watchdog {
    pub fn arm(flag: Arc<AtomicBool>, deadline: Duration) -> Watchdog {
        let (cancel, waiting) = channel();
        let handle = thread::spawn(move || match waiting.recv_timeout(deadline) {
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(target: "lockstep::api", "deadline of {:?} passed, terminating", deadline);
                flag.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        });
        Watchdog {
            cancel: cancel,
            handle: handle,
        }
    }

    /// Stop watching, returning whether the deadline had already fired
    pub fn disarm(self) -> Result<bool, Error> {
        let _ = self.cancel.send(());
        self.handle
            .join()
            .map_err(|_| Error::from(SysErr::ThreadPanicked))
    }
}
