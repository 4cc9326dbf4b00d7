//! Native modules a namespace can import and bind functions from with
//! `defj`.
//!
//! Unlike builtins, host functions carry no signature: the `defj` form
//! ascribes one. Every function checks the kinds of its arguments, so a
//! wrong ascription faults instead of misreading memory.

use crate::fault::{raise, RuntimeError};
use crate::object::{alloc, object, FnObject, Object, Word};

/// One exported function, called as `extern "C" fn(env, args...) -> Word`.
#[derive(Debug, Clone, Copy)]
pub struct HostFn {
    pub name: &'static str,
    pub arity: usize,
    pub code: *const u8,
}

impl HostFn {
    /// Heap object generated code calls through, named after the var bound to it.
    pub fn to_word(&self, var_name: &str) -> Word {
        alloc(Object::Fn(FnObject {
            name: var_name.into(),
            code: self.code,
            arity: self.arity,
            captures: Box::new([]),
        }))
    }
}

/// A named group of host functions, addressed as `package/Name`.
#[derive(Debug, Clone)]
pub struct HostModule {
    pub package: &'static str,
    pub name: &'static str,
    pub fns: Vec<HostFn>,
}

impl HostModule {
    pub fn function(&self, name: &str) -> Option<&HostFn> {
        self.fns.iter().find(|f| f.name == name)
    }
}

pub const HOST_PACKAGE: &str = "brj.host";

pub fn host_modules() -> Vec<HostModule> {
    vec![
        HostModule {
            package: HOST_PACKAGE,
            name: "Math",
            fns: vec![
                HostFn { name: "abs", arity: 1, code: brj_host_math_abs as *const u8 },
                HostFn { name: "max", arity: 2, code: brj_host_math_max as *const u8 },
                HostFn { name: "min", arity: 2, code: brj_host_math_min as *const u8 },
                HostFn { name: "quot", arity: 2, code: brj_host_math_quot as *const u8 },
                HostFn { name: "rem", arity: 2, code: brj_host_math_rem as *const u8 },
            ],
        },
        HostModule {
            package: HOST_PACKAGE,
            name: "Str",
            fns: vec![
                HostFn { name: "length", arity: 1, code: brj_host_str_length as *const u8 },
                HostFn { name: "upper", arity: 1, code: brj_host_str_upper as *const u8 },
                HostFn { name: "lower", arity: 1, code: brj_host_str_lower as *const u8 },
                HostFn { name: "trim", arity: 1, code: brj_host_str_trim as *const u8 },
                HostFn { name: "repeat", arity: 2, code: brj_host_str_repeat as *const u8 },
            ],
        },
    ]
}

pub fn host_module(package: &str, name: &str) -> Option<HostModule> {
    host_modules()
        .into_iter()
        .find(|m| m.package == package && m.name == name)
}

fn int_arg(word: Word) -> Result<i64, Word> {
    match unsafe { object(word) } {
        Object::Int(n) => Ok(*n),
        other => Err(raise(RuntimeError::WrongKind {
            expected: "Int",
            found: other.kind(),
        })),
    }
}

fn str_arg<'a>(word: Word) -> Result<&'a str, Word> {
    match unsafe { object(word) } {
        Object::Str(s) => Ok(s),
        other => Err(raise(RuntimeError::WrongKind {
            expected: "Str",
            found: other.kind(),
        })),
    }
}

fn int(n: i64) -> Word {
    alloc(Object::Int(n))
}

fn string(s: String) -> Word {
    alloc(Object::Str(s))
}

// ── brj.host/Math ────────────────────────────────────────────────

extern "C" fn brj_host_math_abs(_env: Word, a: Word) -> Word {
    int_arg(a).map_or_else(|fault| fault, |a| int(a.wrapping_abs()))
}

fn int_pair(a: Word, b: Word, op: impl FnOnce(i64, i64) -> Word) -> Word {
    match (int_arg(a), int_arg(b)) {
        (Ok(a), Ok(b)) => op(a, b),
        (Err(fault), _) | (_, Err(fault)) => fault,
    }
}

extern "C" fn brj_host_math_max(_env: Word, a: Word, b: Word) -> Word {
    int_pair(a, b, |a, b| int(a.max(b)))
}

extern "C" fn brj_host_math_min(_env: Word, a: Word, b: Word) -> Word {
    int_pair(a, b, |a, b| int(a.min(b)))
}

extern "C" fn brj_host_math_quot(_env: Word, a: Word, b: Word) -> Word {
    int_pair(a, b, |a, b| match b {
        0 => raise(RuntimeError::DivideByZero),
        b => int(a.wrapping_div(b)),
    })
}

extern "C" fn brj_host_math_rem(_env: Word, a: Word, b: Word) -> Word {
    int_pair(a, b, |a, b| match b {
        0 => raise(RuntimeError::DivideByZero),
        b => int(a.wrapping_rem(b)),
    })
}

// ── brj.host/Str ─────────────────────────────────────────────────

extern "C" fn brj_host_str_length(_env: Word, s: Word) -> Word {
    str_arg(s).map_or_else(|fault| fault, |s| int(s.chars().count() as i64))
}

extern "C" fn brj_host_str_upper(_env: Word, s: Word) -> Word {
    str_arg(s).map_or_else(|fault| fault, |s| string(s.to_uppercase()))
}

extern "C" fn brj_host_str_lower(_env: Word, s: Word) -> Word {
    str_arg(s).map_or_else(|fault| fault, |s| string(s.to_lowercase()))
}

extern "C" fn brj_host_str_trim(_env: Word, s: Word) -> Word {
    str_arg(s).map_or_else(|fault| fault, |s| string(s.trim().to_string()))
}

/// Negative counts repeat zero times.
extern "C" fn brj_host_str_repeat(_env: Word, s: Word, n: Word) -> Word {
    match (str_arg(s), int_arg(n)) {
        (Ok(s), Ok(n)) => string(s.repeat(n.max(0) as usize)),
        (Err(fault), _) | (_, Err(fault)) => fault,
    }
}
