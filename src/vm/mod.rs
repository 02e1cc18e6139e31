//! # Virtual machine
//!
//! Scripts are registered as statement trees, assembled into flat programs
//! and executed by cooperative sequences. The scheduler owns every sequence
//! and event handler and advances them one delivered tick at a time. A
//! sequence only gives up control at a `wait`, resuming from the same
//! program counter on a later tick, even from inside nested loops.

mod assem;
mod interp;
mod registry;
mod scheduler;
mod scope;
mod sequence;
mod types;
mod words;

pub use self::assem::assemble;
pub use self::interp::{binary, Effect, Env, Interpreter};
pub use self::registry::{EventRegistry, Template};
pub use self::scheduler::Scheduler;
pub use self::scope::{lookup, Scope, ScopeChain};
pub use self::sequence::{Sequence, SequenceState, StepUnits, FRAME_TICKS_PER_STEP};
pub use self::types::{
    BinaryOp, Case, EventKind, Expr, Flow, GroupId, HandlerId, InterpResult, Instr, Listener,
    Payload, Program, SequenceId, Stmt, TickSource, TimingMode, UnaryOp, Value,
};
pub use self::words::{builtins, Word};
