use crate::abi::brj_vector_conj;
use crate::fault::{raise, RuntimeError};
use crate::object::{alloc, alloc_pinned, bool_word, object, FnObject, Object, Word};
use crate::value::Value;

/// A natively implemented function in the core namespace.
pub struct Builtin {
    pub name: &'static str,
    /// Type form, read by the analyser's type parser.
    pub signature: &'static str,
    pub arity: usize,
    pub code: *const u8,
}

impl Builtin {
    /// Pinned heap object generated code calls through.
    pub fn to_word(&self) -> Word {
        alloc_pinned(Object::Fn(FnObject {
            name: self.name.into(),
            code: self.code,
            arity: self.arity,
            captures: Box::new([]),
        }))
    }
}

pub fn builtins() -> Vec<Builtin> {
    vec![
        Builtin { name: "+", signature: "(Fn Int Int Int)", arity: 2, code: brj_core_add as *const u8 },
        Builtin { name: "-", signature: "(Fn Int Int Int)", arity: 2, code: brj_core_sub as *const u8 },
        Builtin { name: "*", signature: "(Fn Int Int Int)", arity: 2, code: brj_core_mul as *const u8 },
        Builtin { name: "=", signature: "(Fn Int Int Bool)", arity: 2, code: brj_core_eq as *const u8 },
        Builtin { name: "<", signature: "(Fn Int Int Bool)", arity: 2, code: brj_core_lt as *const u8 },
        Builtin { name: ">", signature: "(Fn Int Int Bool)", arity: 2, code: brj_core_gt as *const u8 },
        Builtin { name: "not", signature: "(Fn Bool Bool)", arity: 1, code: brj_core_not as *const u8 },
        Builtin { name: "count", signature: "(Fn [a] Int)", arity: 1, code: brj_core_count as *const u8 },
        Builtin { name: "conj", signature: "(Fn [a] a [a])", arity: 2, code: brj_core_conj as *const u8 },
        Builtin { name: "str", signature: "(Fn a Str)", arity: 1, code: brj_core_str as *const u8 },
        Builtin { name: "concat", signature: "(Fn Str Str Str)", arity: 2, code: brj_core_concat as *const u8 },
    ]
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

fn int_op(a: Word, b: Word, op: impl FnOnce(i64, i64) -> Word) -> Word {
    match (int_arg(a), int_arg(b)) {
        (Ok(a), Ok(b)) => op(a, b),
        (Err(fault), _) | (_, Err(fault)) => fault,
    }
}

extern "C" fn brj_core_add(_env: Word, a: Word, b: Word) -> Word {
    int_op(a, b, |a, b| alloc(Object::Int(a.wrapping_add(b))))
}

extern "C" fn brj_core_sub(_env: Word, a: Word, b: Word) -> Word {
    int_op(a, b, |a, b| alloc(Object::Int(a.wrapping_sub(b))))
}

extern "C" fn brj_core_mul(_env: Word, a: Word, b: Word) -> Word {
    int_op(a, b, |a, b| alloc(Object::Int(a.wrapping_mul(b))))
}

extern "C" fn brj_core_eq(_env: Word, a: Word, b: Word) -> Word {
    int_op(a, b, |a, b| bool_word(a == b))
}

extern "C" fn brj_core_lt(_env: Word, a: Word, b: Word) -> Word {
    int_op(a, b, |a, b| bool_word(a < b))
}

extern "C" fn brj_core_gt(_env: Word, a: Word, b: Word) -> Word {
    int_op(a, b, |a, b| bool_word(a > b))
}

extern "C" fn brj_core_not(_env: Word, a: Word) -> Word {
    match unsafe { object(a) } {
        Object::Bool(b) => bool_word(!b),
        other => raise(RuntimeError::WrongKind {
            expected: "Bool",
            found: other.kind(),
        }),
    }
}

extern "C" fn brj_core_count(_env: Word, coll: Word) -> Word {
    let len = match unsafe { object(coll) } {
        Object::Vector(items) => items.len(),
        Object::Set(items) => items.len(),
        Object::Map(entries) => entries.len(),
        other => {
            return raise(RuntimeError::WrongKind {
                expected: "collection",
                found: other.kind(),
            });
        }
    };
    alloc(Object::Int(len as i64))
}

extern "C" fn brj_core_conj(_env: Word, coll: Word, elem: Word) -> Word {
    brj_vector_conj(coll, elem)
}

extern "C" fn brj_core_str(_env: Word, value: Word) -> Word {
    match Value::decode(value) {
        Ok(Value::Str(s)) => alloc(Object::Str(s)),
        Ok(other) => alloc(Object::Str(other.to_string())),
        Err(err) => raise(err),
    }
}

extern "C" fn brj_core_concat(_env: Word, a: Word, b: Word) -> Word {
    match unsafe { (object(a), object(b)) } {
        (Object::Str(a), Object::Str(b)) => alloc(Object::Str(format!("{}{}", a, b))),
        (Object::Str(_), other) | (other, _) => raise(RuntimeError::WrongKind {
            expected: "Str",
            found: other.kind(),
        }),
    }
}
