use std::fmt;
use std::sync::Arc;

use crate::err::RuntimeErr;

pub type SequenceId = u64;
pub type GroupId = u64;
pub type HandlerId = u64;

pub type InterpResult = Result<Flow, RuntimeErr>;

/// Values a sequence can hold in its variables or on its operand stack
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match *self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
        }
    }

    /// Integer view of the value, booleans count as 0 or 1
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(n) => Some(n),
            Value::Bool(b) => Some(i64::from(b)),
            Value::Str(_) => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match *self {
            Value::Int(n) => n != 0,
            Value::Bool(b) => b,
            Value::Str(ref s) => !s.is_empty(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(ref s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Value {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl<'a> From<&'a str> for Value {
    fn from(s: &'a str) -> Value {
        Value::Str(String::from(s))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Lit(Value),
    Var(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    pub fn int(n: i64) -> Expr {
        Expr::Lit(Value::Int(n))
    }

    pub fn bool(b: bool) -> Expr {
        Expr::Lit(Value::Bool(b))
    }

    pub fn str(s: &str) -> Expr {
        Expr::Lit(Value::from(s))
    }

    pub fn var(name: &str) -> Expr {
        Expr::Var(String::from(name))
    }

    pub fn unary(op: UnaryOp, expr: Expr) -> Expr {
        Expr::Unary(op, Box::new(expr))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call(String::from(name), args)
    }
}

/// The kind of stimulus an event handler responds to
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FrameTick,
    AudioTick,
    Key,
    Click,
    AudioEnd,
    User,
}

/// Which clock a sequence measures its waits against
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    FrameTime,
    AudioTime,
}

impl TimingMode {
    pub fn source(self) -> TickSource {
        match self {
            TimingMode::FrameTime => TickSource::Frame,
            TimingMode::AudioTime => TickSource::Audio,
        }
    }
}

impl Default for TimingMode {
    fn default() -> TimingMode {
        TimingMode::FrameTime
    }
}

/// Producer of a delivered tick
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickSource {
    Frame,
    Audio,
}

impl TickSource {
    pub fn index(self) -> usize {
        match self {
            TickSource::Frame => 0,
            TickSource::Audio => 1,
        }
    }

    pub fn event(self) -> EventKind {
        match self {
            TickSource::Frame => EventKind::FrameTick,
            TickSource::Audio => EventKind::AudioTick,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub value: Expr,
    pub body: Vec<Stmt>,
}

/// Script statements, the form sequences are registered in
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stmt {
    Assign(String, Expr),
    Call(String, Vec<Expr>),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        #[serde(default)]
        otherwise: Vec<Stmt>,
    },
    For {
        #[serde(default)]
        init: Vec<Stmt>,
        cond: Expr,
        #[serde(default)]
        update: Vec<Stmt>,
        body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    DoWhile {
        body: Vec<Stmt>,
        cond: Expr,
    },
    Switch {
        subject: Expr,
        cases: Vec<Case>,
        #[serde(default)]
        default: Vec<Stmt>,
    },
    Break,
    Continue,
    Wait(Expr),
    Step(Expr),
    /// Register an event handler whose sequences see this one's variables
    On {
        event: EventKind,
        #[serde(default)]
        user_id: Option<i64>,
        #[serde(default)]
        mode: Option<TimingMode>,
        body: Vec<Stmt>,
    },
    Emit {
        user_id: Expr,
        #[serde(default)]
        payload: Option<Expr>,
    },
    Exit,
}

impl Stmt {
    pub fn assign(name: &str, value: Expr) -> Stmt {
        Stmt::Assign(String::from(name), value)
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Stmt {
        Stmt::Call(String::from(name), args)
    }

    pub fn wait(steps: i64) -> Stmt {
        Stmt::Wait(Expr::int(steps))
    }

    pub fn step(divisor: i64) -> Stmt {
        Stmt::Step(Expr::int(divisor))
    }
}

/// Handler registration carried by a `Listen` instruction
#[derive(Clone, Debug, PartialEq)]
pub struct Listener {
    pub kind: EventKind,
    pub user_id: Option<i64>,
    pub mode: Option<TimingMode>,
    pub program: Program,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Instr {
    Assign(String, Expr),
    Eval(Expr),
    Jump(usize),
    JumpIf(Expr, usize),
    JumpUnless(Expr, usize),
    /// Push a switch subject onto the operand stack
    Push(Expr),
    /// Jump when the top of the operand stack equals the expression
    JumpIfCase(Expr, usize),
    Pop,
    Wait(Expr),
    Step(Expr),
    Listen(Arc<Listener>),
    Emit(Expr, Option<Expr>),
    Exit,
}

/// Assembled instructions, cheap to clone between sequences
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    instrs: Arc<[Instr]>,
}

impl Program {
    pub fn new(instrs: Vec<Instr>) -> Program {
        Program {
            instrs: Arc::from(instrs),
        }
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn get(&self, pc: usize) -> Option<&Instr> {
        self.instrs.get(pc)
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }
}

/// Outcome of executing a single instruction
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Flow {
    Continue,
    /// Suspend for this many ticks, already converted from steps
    Suspend(i64),
    Finished,
    /// The engine was terminated before the sequence yielded
    Halted,
}

/// Named values handed to sequences spawned by an event
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub values: Vec<(String, Value)>,
}

impl Payload {
    pub fn new() -> Payload {
        Payload { values: Vec::new() }
    }

    pub fn with<V: Into<Value>>(mut self, name: &str, value: V) -> Payload {
        self.values.push((String::from(name), value.into()));
        self
    }
}
