use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;

use lockstep::log::{LogMessage, Logger, Record};
use lockstep::vm::{BinaryOp, Expr, SequenceState};
use lockstep::{EngineConfig, EventKind, RuntimeErr, Scheduler, Stmt, TickSource, TimingMode, Value};

fn scheduler(config: &EngineConfig) -> (Scheduler, Receiver<LogMessage>) {
    let (sender, receiver) = channel();
    let mut sched = Scheduler::new(config, Arc::new(AtomicBool::new(false)));
    sched.set_logger(Logger::new(sender));
    (sched, receiver)
}

fn printed(receiver: &Receiver<LogMessage>) -> Vec<(i64, String)> {
    receiver
        .try_iter()
        .filter_map(|msg| match msg.data {
            Record::Printed { text, .. } => Some((msg.tick, text)),
            _ => None,
        })
        .collect()
}

fn add(lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(BinaryOp::Add, lhs, rhs)
}

#[test]
fn test_variables_ignore_case() {
    let (mut sched, _) = scheduler(&EngineConfig::default());
    let id = sched
        .register_sequence(
            &[
                Stmt::assign("Count", Expr::int(1)),
                Stmt::assign("COUNT", add(Expr::var("count"), Expr::int(1))),
            ],
            TimingMode::AudioTime,
            None,
        )
        .unwrap();
    sched.notify_tick(TickSource::Audio, 0).unwrap();

    let seq = sched.sequence(id).unwrap();
    assert_eq!(seq.scope().len(), 1);
    assert_eq!(seq.scope().get("cOuNt"), Some(&Value::Int(2)));
    assert_eq!(seq.state(), SequenceState::Terminated);
}

#[test]
fn test_handler_reads_parent_scope() {
    let (mut sched, receiver) = scheduler(&EngineConfig::default());
    sched
        .register_sequence(
            &[
                Stmt::assign("Base", Expr::int(5)),
                Stmt::On {
                    event: EventKind::User,
                    user_id: Some(1),
                    mode: Some(TimingMode::AudioTime),
                    body: vec![
                        Stmt::assign("local", Expr::binary(BinaryOp::Mul, Expr::var("base"), Expr::int(2))),
                        Stmt::call("print", vec![Expr::call("str", vec![Expr::var("LOCAL")])]),
                    ],
                },
                Stmt::Emit {
                    user_id: Expr::int(1),
                    payload: None,
                },
                Stmt::wait(1),
                Stmt::assign("base", Expr::int(7)),
                Stmt::Emit {
                    user_id: Expr::int(1),
                    payload: None,
                },
            ],
            TimingMode::AudioTime,
            None,
        )
        .unwrap();
    sched.deliver_through(TickSource::Audio, 120).unwrap();

    // One wait step is ppq / 8 ticks
    assert_eq!(
        printed(&receiver),
        vec![(0, String::from("10")), (60, String::from("14"))]
    );
}

#[test]
fn test_fault_is_isolated() {
    let (mut sched, receiver) = scheduler(&EngineConfig::default());
    let bad = sched
        .register_sequence(
            &[
                Stmt::call("print", vec![Expr::str("before")]),
                Stmt::assign("x", Expr::binary(BinaryOp::Div, Expr::int(1), Expr::int(0))),
                Stmt::call("print", vec![Expr::str("after")]),
            ],
            TimingMode::AudioTime,
            None,
        )
        .unwrap();
    let unknown = sched
        .register_sequence(&[Stmt::call("nope", vec![])], TimingMode::AudioTime, None)
        .unwrap();
    let good = sched
        .register_sequence(
            &[
                Stmt::wait(1),
                Stmt::call("print", vec![Expr::str("still here")]),
            ],
            TimingMode::AudioTime,
            None,
        )
        .unwrap();
    sched.deliver_through(TickSource::Audio, 60).unwrap();

    assert_eq!(sched.sequence(bad).unwrap().fault(), Some(&RuntimeErr::DivisionByZero));
    assert_eq!(
        sched.sequence(unknown).unwrap().fault(),
        Some(&RuntimeErr::UnknownWord(String::from("nope")))
    );
    assert!(!sched.sequence(bad).unwrap().is_active());
    assert_eq!(sched.sequence(good).unwrap().fault(), None);
    assert_eq!(
        printed(&receiver),
        vec![(0, String::from("before")), (60, String::from("still here"))]
    );
}

#[test]
fn test_unbound_variable() {
    let (mut sched, _) = scheduler(&EngineConfig::default());
    let id = sched
        .register_sequence(
            &[Stmt::assign("y", Expr::var("missing"))],
            TimingMode::FrameTime,
            None,
        )
        .unwrap();
    sched.notify_tick(TickSource::Frame, 0).unwrap();
    assert_eq!(
        sched.sequence(id).unwrap().fault(),
        Some(&RuntimeErr::UnboundVariable(String::from("missing")))
    );
}

#[test]
fn test_runaway_loop_exhausts_budget() {
    let config = EngineConfig {
        max_instructions_per_tick: 50,
        ..EngineConfig::default()
    };
    let (mut sched, receiver) = scheduler(&config);
    let runaway = sched
        .register_sequence(
            &[Stmt::While {
                cond: Expr::bool(true),
                body: vec![Stmt::assign("n", Expr::int(1))],
            }],
            TimingMode::FrameTime,
            None,
        )
        .unwrap();
    sched
        .register_sequence(
            &[Stmt::call("print", vec![Expr::str("ok")])],
            TimingMode::FrameTime,
            None,
        )
        .unwrap();
    sched.notify_tick(TickSource::Frame, 0).unwrap();

    assert_eq!(
        sched.sequence(runaway).unwrap().fault(),
        Some(&RuntimeErr::BudgetExhausted(50))
    );
    assert_eq!(printed(&receiver), vec![(0, String::from("ok"))]);
}

#[test]
fn test_step_changes_wait_length() {
    let (mut sched, receiver) = scheduler(&EngineConfig::default());
    sched
        .register_sequence(
            &[
                Stmt::step(4),
                Stmt::wait(1),
                Stmt::call("print", vec![Expr::call("tick", vec![])]),
                Stmt::step(1),
                Stmt::wait(2),
                Stmt::call("print", vec![Expr::call("tick", vec![])]),
            ],
            TimingMode::FrameTime,
            None,
        )
        .unwrap();
    sched.deliver_through(TickSource::Frame, 30).unwrap();
    assert_eq!(
        printed(&receiver),
        vec![(12, String::from("12")), (18, String::from("18"))]
    );
}
