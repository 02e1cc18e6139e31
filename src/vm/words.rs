use std::collections::HashMap;

use crate::err::RuntimeErr;

use super::interp::{Effect, Env};
use super::types::Value;

pub type Word = fn(&mut Env, &[Value]) -> Result<Value, RuntimeErr>;

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), RuntimeErr> {
    if args.len() != expected {
        return Err(RuntimeErr::InvalidArgs(String::from(name), expected, args.len()));
    }
    Ok(())
}

fn int_arg(name: &'static str, val: &Value) -> Result<i64, RuntimeErr> {
    val.as_int()
        .ok_or_else(|| RuntimeErr::ExpectedInt(name, val.type_name()))
}

/// Absolute value, wrapping at the minimum integer
pub fn abs(_: &mut Env, args: &[Value]) -> Result<Value, RuntimeErr> {
    arity("abs", args, 1)?;
    Ok(Value::Int(int_arg("abs", &args[0])?.wrapping_abs()))
}

pub fn min(_: &mut Env, args: &[Value]) -> Result<Value, RuntimeErr> {
    if args.is_empty() {
        return Err(RuntimeErr::InvalidArgs(String::from("min"), 1, 0));
    }
    let mut out = i64::max_value();
    for arg in args {
        out = out.min(int_arg("min", arg)?);
    }
    Ok(Value::Int(out))
}

pub fn max(_: &mut Env, args: &[Value]) -> Result<Value, RuntimeErr> {
    if args.is_empty() {
        return Err(RuntimeErr::InvalidArgs(String::from("max"), 1, 0));
    }
    let mut out = i64::min_value();
    for arg in args {
        out = out.max(int_arg("max", arg)?);
    }
    Ok(Value::Int(out))
}

/// Constrain a value between a lower and upper bound
pub fn clamp(_: &mut Env, args: &[Value]) -> Result<Value, RuntimeErr> {
    arity("clamp", args, 3)?;
    let val = int_arg("clamp", &args[0])?;
    let lo = int_arg("clamp", &args[1])?;
    let hi = int_arg("clamp", &args[2])?;
    Ok(Value::Int(val.max(lo).min(hi)))
}

/// Length of a string in characters
pub fn len(_: &mut Env, args: &[Value]) -> Result<Value, RuntimeErr> {
    arity("len", args, 1)?;
    match args[0] {
        Value::Str(ref s) => Ok(Value::Int(s.chars().count() as i64)),
        ref other => Err(RuntimeErr::TypeMismatch("len", other.type_name(), "str")),
    }
}

pub fn str(_: &mut Env, args: &[Value]) -> Result<Value, RuntimeErr> {
    arity("str", args, 1)?;
    Ok(Value::Str(args[0].to_string()))
}

/// The tick currently being delivered
pub fn tick(env: &mut Env, args: &[Value]) -> Result<Value, RuntimeErr> {
    arity("tick", args, 0)?;
    Ok(Value::Int(env.tick))
}

/// Write the arguments to the trace log, separated by spaces
pub fn print(env: &mut Env, args: &[Value]) -> Result<Value, RuntimeErr> {
    let text = args
        .iter()
        .map(|arg| arg.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    env.effects.push(Effect::Print(text));
    Ok(Value::Int(0))
}

/// Table of the words every interpreter starts with
pub fn builtins() -> HashMap<String, Word> {
    let mut words: HashMap<String, Word> = HashMap::new();
    words.insert(String::from("abs"), abs);
    words.insert(String::from("min"), min);
    words.insert(String::from("max"), max);
    words.insert(String::from("clamp"), clamp);
    words.insert(String::from("len"), len);
    words.insert(String::from("str"), str);
    words.insert(String::from("tick"), tick);
    words.insert(String::from("print"), print);
    words
}
