use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::err::RuntimeErr;

use super::scope::{lookup, ScopeChain};
use super::sequence::{Sequence, StepUnits};
use super::types::{
    BinaryOp, Expr, Flow, Instr, InterpResult, Listener, Payload, SequenceId, TimingMode,
    UnaryOp, Value,
};
use super::words::{builtins, Word};

/// Side effects of running a sequence, applied by the scheduler afterwards
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    Listen {
        parent: SequenceId,
        listener: Arc<Listener>,
        mode: TimingMode,
    },
    Emit {
        user_id: i64,
        payload: Payload,
    },
    Print(String),
}

/// Everything outside the sequence itself an instruction may observe
pub struct Env<'a> {
    pub tick: i64,
    pub units: StepUnits,
    pub chain: &'a dyn ScopeChain,
    pub terminated: &'a AtomicBool,
    pub budget: usize,
    pub effects: Vec<Effect>,
}

impl<'a> Env<'a> {
    pub fn new(
        tick: i64,
        units: StepUnits,
        chain: &'a dyn ScopeChain,
        terminated: &'a AtomicBool,
        budget: usize,
    ) -> Env<'a> {
        Env {
            tick: tick,
            units: units,
            chain: chain,
            terminated: terminated,
            budget: budget,
            effects: Vec::new(),
        }
    }
}

fn int(op: &'static str, val: &Value) -> Result<i64, RuntimeErr> {
    val.as_int()
        .ok_or_else(|| RuntimeErr::ExpectedInt(op, val.type_name()))
}

fn unary(op: UnaryOp, val: &Value) -> Result<Value, RuntimeErr> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!val.is_truthy())),
        UnaryOp::Neg => Ok(Value::Int(int("-", val)?.wrapping_neg())),
        UnaryOp::BitNot => Ok(Value::Int(!int("~", val)?)),
    }
}

fn mismatch(op: BinaryOp, lhs: &Value, rhs: &Value) -> RuntimeErr {
    RuntimeErr::TypeMismatch(op.symbol(), lhs.type_name(), rhs.type_name())
}

/// Apply a binary operator to two evaluated operands. Logical operators
/// only land here once both sides are known.
pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeErr> {
    if let (&Value::Str(ref a), &Value::Str(ref b)) = (lhs, rhs) {
        return match op {
            BinaryOp::Add => Ok(Value::Str(format!("{}{}", a, b))),
            BinaryOp::Eq => Ok(Value::Bool(a == b)),
            BinaryOp::Ne => Ok(Value::Bool(a != b)),
            BinaryOp::Lt => Ok(Value::Bool(a < b)),
            BinaryOp::Le => Ok(Value::Bool(a <= b)),
            BinaryOp::Gt => Ok(Value::Bool(a > b)),
            BinaryOp::Ge => Ok(Value::Bool(a >= b)),
            BinaryOp::And => Ok(Value::Bool(lhs.is_truthy() && rhs.is_truthy())),
            BinaryOp::Or => Ok(Value::Bool(lhs.is_truthy() || rhs.is_truthy())),
            _ => Err(mismatch(op, lhs, rhs)),
        };
    }

    let (a, b) = match (lhs.as_int(), rhs.as_int()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(mismatch(op, lhs, rhs)),
    };

    let out = match op {
        BinaryOp::Add => Value::Int(a.wrapping_add(b)),
        BinaryOp::Sub => Value::Int(a.wrapping_sub(b)),
        BinaryOp::Mul => Value::Int(a.wrapping_mul(b)),
        BinaryOp::Div => {
            if b == 0 {
                return Err(RuntimeErr::DivisionByZero);
            }
            Value::Int(a.wrapping_div(b))
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(RuntimeErr::ModuloByZero);
            }
            Value::Int(a.wrapping_rem(b))
        }
        BinaryOp::BitAnd => Value::Int(a & b),
        BinaryOp::BitOr => Value::Int(a | b),
        BinaryOp::BitXor => Value::Int(a ^ b),
        BinaryOp::Shl => Value::Int(a.wrapping_shl(b as u32)),
        BinaryOp::Shr => Value::Int(a.wrapping_shr(b as u32)),
        BinaryOp::Eq => Value::Bool(a == b),
        BinaryOp::Ne => Value::Bool(a != b),
        BinaryOp::Lt => Value::Bool(a < b),
        BinaryOp::Le => Value::Bool(a <= b),
        BinaryOp::Gt => Value::Bool(a > b),
        BinaryOp::Ge => Value::Bool(a >= b),
        BinaryOp::And => Value::Bool(a != 0 && b != 0),
        BinaryOp::Or => Value::Bool(a != 0 || b != 0),
    };
    Ok(out)
}

pub struct Interpreter {
    words: HashMap<String, Word>,
}

impl Default for Interpreter {
    fn default() -> Interpreter {
        Interpreter::new()
    }
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter { words: builtins() }
    }

    /// Add or replace a word callable from scripts
    pub fn define(&mut self, name: &str, word: Word) {
        self.words.insert(name.to_lowercase(), word);
    }

    pub fn eval(&self, expr: &Expr, seq: &Sequence, env: &mut Env) -> Result<Value, RuntimeErr> {
        match *expr {
            Expr::Lit(ref val) => Ok(val.clone()),
            Expr::Var(ref name) => lookup(seq.scope(), seq.parent(), env.chain, name)
                .cloned()
                .ok_or_else(|| RuntimeErr::UnboundVariable(name.clone())),
            Expr::Unary(op, ref operand) => {
                let val = self.eval(operand, seq, env)?;
                unary(op, &val)
            }
            Expr::Binary(op, ref lhs, ref rhs) => {
                let lhs = self.eval(lhs, seq, env)?;
                match op {
                    BinaryOp::And if !lhs.is_truthy() => return Ok(Value::Bool(false)),
                    BinaryOp::Or if lhs.is_truthy() => return Ok(Value::Bool(true)),
                    _ => (),
                }
                let rhs = self.eval(rhs, seq, env)?;
                binary(op, &lhs, &rhs)
            }
            Expr::Call(ref name, ref args) => {
                let word = *self
                    .words
                    .get(&name.to_lowercase())
                    .ok_or_else(|| RuntimeErr::UnknownWord(name.clone()))?;
                let mut vals = Vec::with_capacity(args.len());
                for arg in args {
                    vals.push(self.eval(arg, seq, env)?);
                }
                word(env, &vals)
            }
        }
    }

    /// Execute the instruction at the sequence's program counter
    pub fn step(&self, seq: &mut Sequence, env: &mut Env) -> InterpResult {
        let program = seq.program().clone();
        let pc = seq.pc();
        let instr = match program.get(pc) {
            Some(instr) => instr,
            None => return Ok(Flow::Finished),
        };

        match *instr {
            Instr::Assign(ref name, ref expr) => {
                let val = self.eval(expr, seq, env)?;
                seq.scope_mut().set(name, val);
                seq.set_pc(pc + 1);
            }
            Instr::Eval(ref expr) => {
                self.eval(expr, seq, env)?;
                seq.set_pc(pc + 1);
            }
            Instr::Jump(target) => seq.set_pc(target),
            Instr::JumpIf(ref cond, target) => {
                let next = if self.eval(cond, seq, env)?.is_truthy() {
                    target
                } else {
                    pc + 1
                };
                seq.set_pc(next);
            }
            Instr::JumpUnless(ref cond, target) => {
                let next = if self.eval(cond, seq, env)?.is_truthy() {
                    pc + 1
                } else {
                    target
                };
                seq.set_pc(next);
            }
            Instr::Push(ref expr) => {
                let val = self.eval(expr, seq, env)?;
                seq.stack_mut().push(val);
                seq.set_pc(pc + 1);
            }
            Instr::JumpIfCase(ref expr, target) => {
                let val = self.eval(expr, seq, env)?;
                let subject = seq.stack().last().ok_or(RuntimeErr::StackExhausted)?;
                let next = if binary(BinaryOp::Eq, subject, &val)?.is_truthy() {
                    target
                } else {
                    pc + 1
                };
                seq.set_pc(next);
            }
            Instr::Pop => {
                seq.stack_mut().pop().ok_or(RuntimeErr::StackExhausted)?;
                seq.set_pc(pc + 1);
            }
            Instr::Wait(ref expr) => {
                let steps = int("wait", &self.eval(expr, seq, env)?)?.max(0);
                seq.set_pc(pc + 1);
                let ticks = steps.saturating_mul(i64::from(seq.ticks_per_step()));
                return Ok(Flow::Suspend(ticks));
            }
            Instr::Step(ref expr) => {
                let divisor = int("step", &self.eval(expr, seq, env)?)?;
                if divisor < 1 || divisor > i64::from(u32::max_value()) {
                    return Err(RuntimeErr::InvalidStep(divisor));
                }
                let units = env.units;
                seq.set_step(divisor as u32, &units);
                seq.set_pc(pc + 1);
            }
            Instr::Listen(ref listener) => {
                env.effects.push(Effect::Listen {
                    parent: seq.id(),
                    listener: listener.clone(),
                    mode: listener.mode.unwrap_or_else(|| seq.mode()),
                });
                seq.set_pc(pc + 1);
            }
            Instr::Emit(ref user_id, ref payload) => {
                let user_id = int("emit", &self.eval(user_id, seq, env)?)?;
                let payload = match *payload {
                    Some(ref expr) => Payload::new().with("payload", self.eval(expr, seq, env)?),
                    None => Payload::new(),
                };
                env.effects.push(Effect::Emit {
                    user_id: user_id,
                    payload: payload,
                });
                seq.set_pc(pc + 1);
            }
            Instr::Exit => {
                seq.set_pc(program.len());
                return Ok(Flow::Finished);
            }
        }
        Ok(Flow::Continue)
    }

    /// Run until the sequence suspends, finishes, or the engine terminates
    pub fn run(&self, seq: &mut Sequence, env: &mut Env) -> InterpResult {
        let mut executed = 0;
        loop {
            if env.terminated.load(Ordering::SeqCst) {
                return Ok(Flow::Halted);
            }
            if executed >= env.budget {
                return Err(RuntimeErr::BudgetExhausted(env.budget));
            }
            executed += 1;
            match self.step(seq, env)? {
                Flow::Continue => (),
                flow => return Ok(flow),
            }
        }
    }
}
