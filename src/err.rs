use std::io;

use thiserror::Error as ThisError;

#[derive(Clone, Debug, PartialEq, Serialize, ThisError)]
pub enum SysErr {
    #[error("scheduler lock poisoned")]
    LockPoisoned,
    #[error("worker thread panicked")]
    ThreadPanicked,
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid utf-8: {0}")]
    Utf8(String),
    #[error("json error: {0}")]
    Json(String),
}

/// Invalid construction parameters, reported before anything is built
#[derive(Clone, Debug, PartialEq, Serialize, ThisError)]
pub enum ConfigErr {
    #[error("sample_rate must be within 8000..=192000 Hz, got {0}")]
    SampleRate(u32),
    #[error("ppq must be greater than zero, got {0}")]
    Ppq(u32),
    #[error("micros_per_beat must be greater than zero (tempo event at tick {0})")]
    Tempo(u64),
    #[error("frame_rate must be greater than zero, got {0}")]
    FrameRate(u32),
    #[error("frame_ticks_per_step must be greater than zero, got {0}")]
    FrameTicksPerStep(u32),
    #[error("buffer_size must be greater than zero, got {0}")]
    BufferSize(u32),
    #[error("compaction_interval must be greater than zero, got {0}")]
    CompactionInterval(u64),
    #[error("duration must be a finite number of seconds, got {0}")]
    Duration(f64),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, ThisError)]
pub enum AssemErr {
    #[error("break outside of a loop or switch")]
    BreakOutsideBlock,
    #[error("continue outside of a loop")]
    ContinueOutsideLoop,
}

/// Errors scoped to a single executing sequence
#[derive(Clone, Debug, PartialEq, Serialize, ThisError)]
pub enum RuntimeErr {
    #[error("division by zero")]
    DivisionByZero,
    #[error("modulo by zero")]
    ModuloByZero,
    #[error("unbound variable '{0}'")]
    UnboundVariable(String),
    #[error("type mismatch: cannot apply '{0}' to {1} and {2}")]
    TypeMismatch(&'static str, &'static str, &'static str),
    #[error("'{0}' expects an int, got {1}")]
    ExpectedInt(&'static str, &'static str),
    #[error("unknown word '{0}'")]
    UnknownWord(String),
    #[error("'{0}' expects {1} arguments, got {2}")]
    InvalidArgs(String, usize, usize),
    #[error("stack exhausted")]
    StackExhausted,
    #[error("invalid step size {0}")]
    InvalidStep(i64),
    #[error("instruction budget of {0} exhausted within one tick")]
    BudgetExhausted(usize),
}

/// Violations of the tick delivery contract by the caller
#[derive(Clone, Copy, Debug, PartialEq, Serialize, ThisError)]
pub enum ScheduleErr {
    #[error("{origin:?} tick {tick} delivered out of order, expected {expected}")]
    NonMonotonic {
        origin: crate::vm::TickSource,
        tick: i64,
        expected: i64,
    },
    #[error("{origin:?} tick {tick} skips ticks, expected {expected}")]
    Skipped {
        origin: crate::vm::TickSource,
        tick: i64,
        expected: i64,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, ThisError)]
pub enum SmfErr {
    #[error("missing MThd header")]
    MissingHeader,
    #[error("SMPTE time division is not supported")]
    SmpteDivision,
    #[error("time division of zero")]
    ZeroDivision,
    #[error("truncated data at byte {0}")]
    Truncated(usize),
    #[error("malformed variable length quantity at byte {0}")]
    BadVarLen(usize),
    #[error("running status without a previous status at byte {0}")]
    NoRunningStatus(usize),
}

#[derive(Clone, Debug, PartialEq, Serialize, ThisError)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigErr(#[from] ConfigErr),
    #[error("Assembly error: {0}")]
    AssemErr(#[from] AssemErr),
    #[error("Runtime error: {0}")]
    RuntimeErr(#[from] RuntimeErr),
    #[error("Schedule error: {0}")]
    ScheduleErr(#[from] ScheduleErr),
    #[error("MIDI file error: {0}")]
    SmfErr(#[from] SmfErr),
    #[error("System error: {0}")]
    SysErr(#[from] SysErr),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::SysErr(SysErr::Io(err.to_string()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::SysErr(SysErr::Json(err.to_string()))
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Error {
        Error::SysErr(SysErr::Utf8(err.to_string()))
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Error {
        Error::SysErr(SysErr::LockPoisoned)
    }
}
