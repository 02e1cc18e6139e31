//! Deterministic tick scheduling for cooperative scripts.
//!
//! Rendered audio samples and display frames are turned into integer ticks,
//! each delivered exactly once and in order to a scheduler that advances
//! script sequences suspended on `wait`.

#[macro_use]
extern crate serde_derive;

mod api;
mod capi;
mod config;
mod engine;
mod err;
pub mod log;
mod math;
pub mod time;
pub mod vm;

pub use crate::api::{simulate, HandlerSpec, Script, SequenceSpec, Session, Simulation, Watchdog};
pub use crate::capi::{lockstep_free_string, lockstep_simulate};
pub use crate::config::EngineConfig;
pub use crate::engine::{AudioDriver, EngineContext, FrameDriver};
pub use crate::err::{
    AssemErr, ConfigErr, Error, RuntimeErr, ScheduleErr, SmfErr, SysErr,
};
pub use crate::math::{bpm_to_micros, dur_to_millis, micros_to_bpm, millis_to_dur, ticks_per_second};
pub use crate::time::{FrameClock, TempoEvent, TempoMap, TickClock};
pub use crate::vm::{EventKind, Payload, Scheduler, Stmt, TickSource, TimingMode, Value};
