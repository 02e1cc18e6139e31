use crate::err::RuntimeErr;

use super::scope::Scope;
use super::types::{GroupId, Program, SequenceId, TimingMode, Value};

/// Frame ticks in one wait step, 50ms at 60Hz
pub const FRAME_TICKS_PER_STEP: u32 = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum SequenceState {
    Ready,
    Running,
    Waiting,
    Terminated,
}

/// Tick length of a single wait step for each timing mode
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StepUnits {
    pub audio: u32,
    pub frame: u32,
}

impl StepUnits {
    /// An audio step is an eighth of a quarter note
    pub fn new(ppq: u32, frame_ticks_per_step: u32) -> StepUnits {
        StepUnits {
            audio: (ppq / 8).max(1),
            frame: frame_ticks_per_step.max(1),
        }
    }

    pub fn ticks_per_step(&self, mode: TimingMode, step: u32) -> u32 {
        let unit = match mode {
            TimingMode::AudioTime => self.audio,
            TimingMode::FrameTime => self.frame,
        };
        unit.saturating_mul(step)
    }
}

impl Default for StepUnits {
    fn default() -> StepUnits {
        StepUnits::new(480, FRAME_TICKS_PER_STEP)
    }
}

/// One cooperative thread of script execution
#[derive(Clone, Debug)]
pub struct Sequence {
    id: SequenceId,
    program: Program,
    pc: usize,
    stack: Vec<Value>,
    scope: Scope,
    state: SequenceState,
    wait_ticks_remaining: i64,
    active: bool,
    mode: TimingMode,
    step: u32,
    ticks_per_step: u32,
    group: Option<GroupId>,
    parent: Option<SequenceId>,
    fault: Option<RuntimeErr>,
}

impl Sequence {
    pub fn new(
        id: SequenceId,
        program: Program,
        mode: TimingMode,
        group: Option<GroupId>,
        parent: Option<SequenceId>,
        units: &StepUnits,
    ) -> Sequence {
        Sequence {
            id: id,
            program: program,
            pc: 0,
            stack: Vec::new(),
            scope: Scope::new(),
            state: SequenceState::Ready,
            wait_ticks_remaining: 0,
            active: true,
            mode: mode,
            step: 1,
            ticks_per_step: units.ticks_per_step(mode, 1),
            group: group,
            parent: parent,
            fault: None,
        }
    }

    pub fn id(&self) -> SequenceId {
        self.id
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn set_pc(&mut self, pc: usize) {
        self.pc = pc;
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut Vec<Value> {
        &mut self.stack
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_ready(&self) -> bool {
        self.active && self.state == SequenceState::Ready
    }

    pub fn wait_ticks_remaining(&self) -> i64 {
        self.wait_ticks_remaining
    }

    pub fn mode(&self) -> TimingMode {
        self.mode
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn ticks_per_step(&self) -> u32 {
        self.ticks_per_step
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    pub fn parent(&self) -> Option<SequenceId> {
        self.parent
    }

    pub fn fault(&self) -> Option<&RuntimeErr> {
        self.fault.as_ref()
    }

    pub fn set_step(&mut self, step: u32, units: &StepUnits) {
        self.step = step;
        self.ticks_per_step = units.ticks_per_step(self.mode, step);
    }

    pub fn begin(&mut self) {
        self.state = SequenceState::Running;
    }

    /// Suspend for `ticks` ticks. The tick that issued the wait counts
    /// towards the countdown, hence the minus one.
    pub fn suspend(&mut self, ticks: i64) {
        self.state = SequenceState::Waiting;
        self.wait_ticks_remaining = ticks - 1;
    }

    /// Stop after a run ended without suspending, e.g. a terminated engine
    pub fn yield_ready(&mut self) {
        self.state = SequenceState::Ready;
    }

    /// Advance the wait countdown by one delivered tick, returning true
    /// when the sequence has just become ready to run
    pub fn tick_wait(&mut self) -> bool {
        if !self.active || self.state != SequenceState::Waiting {
            return false;
        }
        if self.wait_ticks_remaining <= 0 {
            self.state = SequenceState::Ready;
            true
        } else {
            self.wait_ticks_remaining -= 1;
            false
        }
    }

    pub fn terminate(&mut self) {
        self.state = SequenceState::Terminated;
        self.active = false;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn set_fault(&mut self, err: RuntimeErr) {
        self.fault = Some(err);
        self.terminate();
    }
}
