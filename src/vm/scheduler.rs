use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::err::{Error, ScheduleErr};
use crate::log::{Logger, Record};

use super::assem::assemble;
use super::interp::{Effect, Env, Interpreter};
use super::registry::{EventRegistry, Template};
use super::scope::{Scope, ScopeChain};
use super::sequence::{Sequence, StepUnits};
use super::types::{
    EventKind, Flow, GroupId, HandlerId, Payload, Program, SequenceId, Stmt, TickSource,
    TimingMode,
};
use super::words::Word;

impl ScopeChain for BTreeMap<SequenceId, Sequence> {
    fn scope_of(&self, id: SequenceId) -> Option<(&Scope, Option<SequenceId>)> {
        self.get(&id).map(|seq| (seq.scope(), seq.parent()))
    }
}

struct Pending {
    kind: EventKind,
    user_id: Option<i64>,
    payload: Payload,
}

/// The pool of sequences and handlers, advanced one delivered tick at a time
pub struct Scheduler {
    pool: BTreeMap<SequenceId, Sequence>,
    registry: EventRegistry,
    interp: Interpreter,
    units: StepUnits,
    budget: usize,
    max_event_rounds: usize,
    compaction_interval: u64,
    terminated: Arc<AtomicBool>,
    last_delivered: [i64; 2],
    delivered: u64,
    current: (Option<TickSource>, i64),
    next_id: SequenceId,
    pending: VecDeque<Pending>,
    logger: Option<Logger>,
}

impl Scheduler {
    pub fn new(config: &EngineConfig, terminated: Arc<AtomicBool>) -> Scheduler {
        Scheduler {
            pool: BTreeMap::new(),
            registry: EventRegistry::new(),
            interp: Interpreter::new(),
            units: StepUnits::new(config.ppq, config.frame_ticks_per_step),
            budget: config.max_instructions_per_tick.max(1),
            max_event_rounds: config.max_event_rounds.max(1),
            compaction_interval: config.compaction_interval,
            terminated: terminated,
            last_delivered: [-1, -1],
            delivered: 0,
            current: (None, -1),
            next_id: 1,
            pending: VecDeque::new(),
            logger: None,
        }
    }

    pub fn set_logger(&mut self, logger: Logger) {
        self.logger = Some(logger);
    }

    pub fn define_word(&mut self, name: &str, word: Word) {
        self.interp.define(name, word);
    }

    fn trace(&self, data: Record) {
        if let Some(ref logger) = self.logger {
            logger.log(self.current.1, self.current.0, data);
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn last_delivered(&self, source: TickSource) -> i64 {
        self.last_delivered[source.index()]
    }

    pub fn sequence(&self, id: SequenceId) -> Option<&Sequence> {
        self.pool.get(&id)
    }

    pub fn sequences(&self) -> impl Iterator<Item = &Sequence> {
        self.pool.values()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.pool.values().filter(|seq| seq.is_active()).count()
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn register_sequence(
        &mut self,
        stmts: &[Stmt],
        mode: TimingMode,
        group: Option<GroupId>,
    ) -> Result<SequenceId, Error> {
        let program = assemble(stmts)?;
        Ok(self.register_program(program, mode, group, None))
    }

    pub fn register_program(
        &mut self,
        program: Program,
        mode: TimingMode,
        group: Option<GroupId>,
        parent: Option<SequenceId>,
    ) -> SequenceId {
        let id = self.next_id;
        self.next_id += 1;
        let seq = Sequence::new(id, program, mode, group, parent, &self.units);
        self.pool.insert(id, seq);
        id
    }

    pub fn register_handler(
        &mut self,
        kind: EventKind,
        user_id: Option<i64>,
        stmts: &[Stmt],
        mode: TimingMode,
        group: Option<GroupId>,
    ) -> Result<HandlerId, Error> {
        let program = assemble(stmts)?;
        Ok(self
            .registry
            .register(kind, user_id, mode, program, None, group))
    }

    pub fn deactivate_handler(&mut self, id: HandlerId) -> bool {
        self.registry.deactivate(id)
    }

    /// Deactivate a sequence along with the handlers it registered
    pub fn deactivate(&mut self, id: SequenceId) -> bool {
        self.registry.deactivate_parent(id);
        let was_active = match self.pool.get_mut(&id) {
            Some(seq) if seq.is_active() => {
                seq.deactivate();
                true
            }
            _ => false,
        };
        if was_active {
            self.trace(Record::Deactivated { sequence: id });
        }
        was_active
    }

    pub fn deactivate_group(&mut self, group: GroupId) -> usize {
        self.registry.deactivate_group(group);
        let ids: Vec<SequenceId> = self
            .pool
            .values()
            .filter(|seq| seq.is_active() && seq.group() == Some(group))
            .map(|seq| seq.id())
            .collect();
        for &id in &ids {
            self.deactivate(id);
        }
        ids.len()
    }

    pub fn deactivate_all(&mut self) -> usize {
        self.registry.deactivate_all();
        let mut count = 0;
        for seq in self.pool.values_mut() {
            if seq.is_active() {
                seq.deactivate();
                count += 1;
            }
        }
        self.pending.clear();
        count
    }

    /// Fire an event from outside tick delivery. Spawned sequences run on the
    /// next tick of their timing mode.
    pub fn fire_event(&mut self, kind: EventKind, user_id: Option<i64>, payload: Payload) -> usize {
        if self.is_terminated() {
            return 0;
        }
        self.spawn_from(kind, user_id, &payload)
    }

    /// Deliver every tick of `source` after the last delivered one up to and
    /// including `current`, returning how many were delivered
    pub fn deliver_through(&mut self, source: TickSource, current: i64) -> Result<usize, ScheduleErr> {
        let last = self.last_delivered(source);
        if current < last {
            return Err(ScheduleErr::NonMonotonic {
                origin: source,
                tick: current,
                expected: last + 1,
            });
        }
        for tick in (last + 1)..=current {
            self.notify_tick(source, tick)?;
        }
        Ok((current - last) as usize)
    }

    /// Deliver exactly the tick following the last one delivered for `source`
    pub fn notify_tick(&mut self, source: TickSource, tick: i64) -> Result<(), ScheduleErr> {
        let expected = self.last_delivered(source) + 1;
        if tick < expected {
            return Err(ScheduleErr::NonMonotonic {
                origin: source,
                tick: tick,
                expected: expected,
            });
        }
        if tick > expected {
            return Err(ScheduleErr::Skipped {
                origin: source,
                tick: tick,
                expected: expected,
            });
        }
        self.last_delivered[source.index()] = tick;
        self.current = (Some(source), tick);

        if self.is_terminated() {
            let count = self.deactivate_all();
            if count > 0 {
                log::info!(target: "lockstep::scheduler", "terminated, deactivated {} sequences", count);
            }
            return Ok(());
        }

        for seq in self.pool.values_mut() {
            if seq.mode().source() == source {
                seq.tick_wait();
            }
        }
        self.drive_ready(source, tick);

        self.pending.push_back(Pending {
            kind: source.event(),
            user_id: None,
            payload: Payload::new().with("tick", tick),
        });
        let mut rounds = 0;
        while !self.pending.is_empty() {
            if rounds == self.max_event_rounds {
                log::warn!(
                    target: "lockstep::scheduler",
                    "dropping {} events after {} rounds at {:?} tick {}",
                    self.pending.len(),
                    rounds,
                    source,
                    tick
                );
                self.pending.clear();
                break;
            }
            rounds += 1;
            let batch: Vec<Pending> = self.pending.drain(..).collect();
            for event in batch {
                self.spawn_from(event.kind, event.user_id, &event.payload);
            }
            self.drive_ready(source, tick);
        }

        self.delivered += 1;
        if self.delivered % self.compaction_interval.max(1) == 0 {
            self.compact();
        }
        Ok(())
    }

    fn spawn_from(&mut self, kind: EventKind, user_id: Option<i64>, payload: &Payload) -> usize {
        let templates = self.registry.fire(kind, user_id);
        let spawned = templates.len();
        for template in templates {
            self.spawn(template, payload);
        }
        let is_tick = kind == EventKind::AudioTick || kind == EventKind::FrameTick;
        if spawned > 0 || !is_tick {
            self.trace(Record::Fired {
                event: kind,
                user_id: user_id,
                spawned: spawned,
            });
        }
        spawned
    }

    fn spawn(&mut self, template: Template, payload: &Payload) -> SequenceId {
        let id = self.register_program(template.program, template.mode, template.group, template.parent);
        if let Some(seq) = self.pool.get_mut(&id) {
            for &(ref name, ref value) in &payload.values {
                seq.scope_mut().set(name, value.clone());
            }
        }
        self.trace(Record::Spawned {
            sequence: id,
            handler: Some(template.id),
            parent: template.parent,
        });
        id
    }

    fn drive_ready(&mut self, source: TickSource, tick: i64) {
        let ready: Vec<SequenceId> = self
            .pool
            .values()
            .filter(|seq| seq.is_ready() && seq.mode().source() == source)
            .map(|seq| seq.id())
            .collect();
        for id in ready {
            self.drive(id, tick);
        }
    }

    /// Run one sequence until it suspends or ends. It is taken out of the
    /// pool meanwhile so the remaining sequences can serve as its scope chain.
    fn drive(&mut self, id: SequenceId, tick: i64) {
        let mut seq = match self.pool.remove(&id) {
            Some(seq) => seq,
            None => return,
        };
        if !seq.is_ready() {
            self.pool.insert(id, seq);
            return;
        }

        self.trace(Record::Resumed { sequence: id });
        seq.begin();
        let (res, effects) = {
            let mut env = Env::new(tick, self.units, &self.pool, &self.terminated, self.budget);
            let res = self.interp.run(&mut seq, &mut env);
            (res, env.effects)
        };

        match res {
            Ok(Flow::Suspend(ticks)) => {
                seq.suspend(ticks);
                self.trace(Record::Suspended {
                    sequence: id,
                    ticks: ticks,
                });
            }
            Ok(Flow::Finished) => {
                seq.terminate();
                self.trace(Record::Terminated { sequence: id });
            }
            Ok(Flow::Halted) | Ok(Flow::Continue) => {
                seq.yield_ready();
                seq.deactivate();
                self.trace(Record::Deactivated { sequence: id });
            }
            Err(err) => {
                log::warn!(
                    target: "lockstep::scheduler",
                    "sequence {} faulted at tick {}: {}",
                    id,
                    tick,
                    err
                );
                self.trace(Record::Faulted {
                    sequence: id,
                    error: err.to_string(),
                });
                seq.set_fault(err);
            }
        }

        let group = seq.group();
        self.pool.insert(id, seq);
        self.apply(id, group, effects);
    }

    fn apply(&mut self, id: SequenceId, group: Option<GroupId>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Listen {
                    parent,
                    listener,
                    mode,
                } => {
                    self.registry.register(
                        listener.kind,
                        listener.user_id,
                        mode,
                        listener.program.clone(),
                        Some(parent),
                        group,
                    );
                }
                Effect::Emit { user_id, payload } => {
                    self.pending.push_back(Pending {
                        kind: EventKind::User,
                        user_id: Some(user_id),
                        payload: payload,
                    });
                }
                Effect::Print(text) => {
                    log::info!(target: "lockstep::script", "[{}] {}", id, text);
                    self.trace(Record::Printed {
                        sequence: id,
                        text: text,
                    });
                }
            }
        }
    }

    /// Remove inactive sequences and handlers. Sequences that are still the
    /// parent of a live sequence or handler are kept so lookups through them
    /// keep resolving.
    pub fn compact(&mut self) -> usize {
        let mut keep: HashSet<SequenceId> = HashSet::new();
        let mut roots: Vec<SequenceId> = self
            .pool
            .values()
            .filter(|seq| seq.is_active())
            .filter_map(|seq| seq.parent())
            .collect();
        roots.extend(
            self.registry
                .templates()
                .iter()
                .filter(|t| t.active)
                .filter_map(|t| t.parent),
        );
        for root in roots {
            let mut next = Some(root);
            while let Some(id) = next {
                if !keep.insert(id) {
                    break;
                }
                next = self.pool.get(&id).and_then(|seq| seq.parent());
            }
        }

        let before = self.pool.len();
        self.pool.retain(|id, seq| seq.is_active() || keep.contains(id));
        let removed = before - self.pool.len();
        let handlers = self.registry.compact();
        if removed > 0 || handlers > 0 {
            log::debug!(
                target: "lockstep::scheduler",
                "compacted {} sequences and {} handlers",
                removed,
                handlers
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::RuntimeErr;
    use crate::vm::{BinaryOp, Expr, SequenceState, Value};
    use std::sync::mpsc::channel;

    fn scheduler() -> Scheduler {
        Scheduler::new(&EngineConfig::default(), Arc::new(AtomicBool::new(false)))
    }

    fn incr(name: &str) -> Stmt {
        Stmt::assign(name, Expr::binary(BinaryOp::Add, Expr::var(name), Expr::int(1)))
    }

    fn var(sched: &Scheduler, id: SequenceId, name: &str) -> Option<Value> {
        sched.sequence(id).and_then(|seq| seq.scope().get(name).cloned())
    }

    #[test]
    fn test_rejects_out_of_order() {
        let mut sched = scheduler();
        assert_eq!(
            sched.notify_tick(TickSource::Audio, 1),
            Err(ScheduleErr::Skipped {
                origin: TickSource::Audio,
                tick: 1,
                expected: 0,
            })
        );
        sched.notify_tick(TickSource::Audio, 0).unwrap();
        assert_eq!(
            sched.notify_tick(TickSource::Audio, 0),
            Err(ScheduleErr::NonMonotonic {
                origin: TickSource::Audio,
                tick: 0,
                expected: 1,
            })
        );
        // Sources are independent
        sched.notify_tick(TickSource::Frame, 0).unwrap();
        assert_eq!(sched.last_delivered(TickSource::Audio), 0);
    }

    #[test]
    fn test_deliver_through_each_tick_once() {
        let mut sched = scheduler();
        let (tx, rx) = channel();
        sched.set_logger(Logger::new(tx));
        sched
            .register_handler(
                EventKind::AudioTick,
                None,
                &[Stmt::call("print", vec![Expr::var("tick")])],
                TimingMode::AudioTime,
                None,
            )
            .unwrap();

        assert_eq!(sched.deliver_through(TickSource::Audio, 4), Ok(5));
        assert_eq!(sched.deliver_through(TickSource::Audio, 4), Ok(0));
        assert_eq!(sched.deliver_through(TickSource::Audio, 9), Ok(5));
        assert!(sched.deliver_through(TickSource::Audio, 3).is_err());
        drop(sched);

        let printed: Vec<String> = rx
            .iter()
            .filter_map(|msg| match msg.data {
                Record::Printed { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        let expected: Vec<String> = (0..10).map(|t: i64| t.to_string()).collect();
        assert_eq!(printed, expected);
    }

    #[test]
    fn test_wait_in_frame_steps() {
        let mut sched = scheduler();
        let id = sched
            .register_sequence(
                &[
                    Stmt::step(4),
                    Stmt::wait(2),
                    Stmt::assign("done", Expr::bool(true)),
                    Stmt::wait(1),
                ],
                TimingMode::FrameTime,
                None,
            )
            .unwrap();

        sched.notify_tick(TickSource::Frame, 0).unwrap();
        assert_eq!(sched.sequence(id).unwrap().wait_ticks_remaining(), 23);
        for tick in 1..24 {
            sched.notify_tick(TickSource::Frame, tick).unwrap();
            assert_eq!(sched.sequence(id).unwrap().state(), SequenceState::Waiting);
            assert_eq!(var(&sched, id, "done"), None);
        }
        sched.notify_tick(TickSource::Frame, 24).unwrap();
        assert_eq!(var(&sched, id, "done"), Some(Value::Bool(true)));
        assert_eq!(sched.sequence(id).unwrap().wait_ticks_remaining(), 11);
    }

    #[test]
    fn test_audio_sequences_ignore_frame_ticks() {
        let mut sched = scheduler();
        let id = sched
            .register_sequence(
                &[Stmt::wait(1), Stmt::assign("done", Expr::bool(true))],
                TimingMode::AudioTime,
                None,
            )
            .unwrap();
        sched.deliver_through(TickSource::Frame, 200).unwrap();
        assert_eq!(sched.sequence(id).unwrap().state(), SequenceState::Ready);

        // 480 ppq gives 60 ticks per step
        sched.deliver_through(TickSource::Audio, 59).unwrap();
        assert_eq!(var(&sched, id, "done"), None);
        sched.notify_tick(TickSource::Audio, 60).unwrap();
        assert_eq!(var(&sched, id, "done"), Some(Value::Bool(true)));
        assert_eq!(sched.sequence(id).unwrap().state(), SequenceState::Terminated);
    }

    #[test]
    fn test_fault_isolated() {
        let mut sched = scheduler();
        let bad = sched
            .register_sequence(
                &[Stmt::assign(
                    "x",
                    Expr::binary(BinaryOp::Div, Expr::int(1), Expr::int(0)),
                )],
                TimingMode::FrameTime,
                None,
            )
            .unwrap();
        let good = sched
            .register_sequence(&[Stmt::assign("x", Expr::int(1))], TimingMode::FrameTime, None)
            .unwrap();
        sched.notify_tick(TickSource::Frame, 0).unwrap();

        let seq = sched.sequence(bad).unwrap();
        assert!(!seq.is_active());
        assert_eq!(seq.fault(), Some(&RuntimeErr::DivisionByZero));
        assert_eq!(var(&sched, good, "x"), Some(Value::Int(1)));
    }

    #[test]
    fn test_groups_and_handlers() {
        let mut sched = scheduler();
        let counter = sched
            .register_sequence(
                &[
                    Stmt::assign("hits", Expr::int(0)),
                    Stmt::While {
                        cond: Expr::bool(true),
                        body: vec![Stmt::wait(1)],
                    },
                ],
                TimingMode::FrameTime,
                Some(1),
            )
            .unwrap();
        sched
            .register_handler(
                EventKind::Key,
                Some(32),
                &[Stmt::assign("pressed", Expr::var("key"))],
                TimingMode::FrameTime,
                Some(2),
            )
            .unwrap();
        let other = sched
            .register_sequence(&[Stmt::wait(100)], TimingMode::FrameTime, Some(2))
            .unwrap();

        sched.notify_tick(TickSource::Frame, 0).unwrap();
        assert_eq!(sched.fire_event(EventKind::Key, Some(13), Payload::new()), 0);
        assert_eq!(
            sched.fire_event(EventKind::Key, Some(32), Payload::new().with("key", 32)),
            1
        );
        sched.notify_tick(TickSource::Frame, 1).unwrap();
        let spawned = sched
            .sequences()
            .find(|seq| seq.scope().contains("pressed"))
            .map(|seq| seq.id())
            .unwrap();
        assert_eq!(var(&sched, spawned, "pressed"), Some(Value::Int(32)));

        assert_eq!(sched.deactivate_group(2), 1);
        assert!(!sched.sequence(other).unwrap().is_active());
        assert!(sched.sequence(counter).unwrap().is_active());
        assert_eq!(sched.fire_event(EventKind::Key, Some(32), Payload::new()), 0);
    }

    #[test]
    fn test_on_and_emit_share_parent_scope() {
        let mut sched = scheduler();
        let parent = sched
            .register_sequence(
                &[
                    Stmt::assign("Base", Expr::int(10)),
                    Stmt::On {
                        event: EventKind::User,
                        user_id: Some(5),
                        mode: None,
                        body: vec![Stmt::assign(
                            "sum",
                            Expr::binary(BinaryOp::Add, Expr::var("base"), Expr::var("payload")),
                        )],
                    },
                    Stmt::Emit {
                        user_id: Expr::int(5),
                        payload: Some(Expr::int(7)),
                    },
                ],
                TimingMode::FrameTime,
                None,
            )
            .unwrap();
        sched.notify_tick(TickSource::Frame, 0).unwrap();

        let child = sched
            .sequences()
            .find(|seq| seq.parent() == Some(parent))
            .map(|seq| seq.id())
            .unwrap();
        assert_eq!(var(&sched, child, "sum"), Some(Value::Int(17)));
        assert_eq!(var(&sched, parent, "sum"), None);
    }

    #[test]
    fn test_event_rounds_bounded() {
        let mut sched = scheduler();
        // Every user event emits another one
        sched
            .register_handler(
                EventKind::User,
                Some(1),
                &[Stmt::Emit {
                    user_id: Expr::int(1),
                    payload: None,
                }],
                TimingMode::FrameTime,
                None,
            )
            .unwrap();
        sched
            .register_sequence(
                &[Stmt::Emit {
                    user_id: Expr::int(1),
                    payload: None,
                }],
                TimingMode::FrameTime,
                None,
            )
            .unwrap();
        sched.notify_tick(TickSource::Frame, 0).unwrap();
        let spawned = sched.len() - 1;
        assert_eq!(spawned, EngineConfig::default().max_event_rounds);
        sched.notify_tick(TickSource::Frame, 1).unwrap();
    }

    #[test]
    fn test_termination_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut sched = Scheduler::new(&EngineConfig::default(), flag.clone());
        let id = sched
            .register_sequence(
                &[Stmt::While {
                    cond: Expr::bool(true),
                    body: vec![incr("n"), Stmt::wait(0)],
                }],
                TimingMode::FrameTime,
                None,
            )
            .unwrap();
        flag.store(true, Ordering::SeqCst);
        sched.notify_tick(TickSource::Frame, 0).unwrap();
        assert_eq!(sched.active_count(), 0);
        assert_eq!(var(&sched, id, "n"), None);
        assert_eq!(sched.fire_event(EventKind::Click, None, Payload::new()), 0);
    }

    #[test]
    fn test_compact_keeps_parents() {
        let mut config = EngineConfig::default();
        config.compaction_interval = 4;
        let mut sched = Scheduler::new(&config, Arc::new(AtomicBool::new(false)));
        let parent = sched
            .register_sequence(
                &[
                    Stmt::assign("greeting", Expr::str("hi")),
                    Stmt::On {
                        event: EventKind::Click,
                        user_id: None,
                        mode: None,
                        body: vec![Stmt::assign("seen", Expr::var("greeting"))],
                    },
                ],
                TimingMode::FrameTime,
                None,
            )
            .unwrap();
        let done = sched
            .register_sequence(&[], TimingMode::FrameTime, None)
            .unwrap();
        sched.deliver_through(TickSource::Frame, 3).unwrap();

        assert!(sched.sequence(done).is_none());
        assert_eq!(
            sched.sequence(parent).unwrap().state(),
            SequenceState::Terminated
        );

        sched.fire_event(EventKind::Click, None, Payload::new());
        sched.notify_tick(TickSource::Frame, 4).unwrap();
        let child = sched
            .sequences()
            .find(|seq| seq.parent() == Some(parent))
            .map(|seq| seq.id())
            .unwrap();
        assert_eq!(var(&sched, child, "seen"), Some(Value::from("hi")));
    }
}
