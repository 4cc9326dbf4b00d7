//! `extern "C"` entry points called from generated code.
//!
//! Every argument and result is a [`Word`]. Helpers never panic across the
//! boundary: a value of the wrong kind raises a fault and yields the fault word.

use std::cell::Cell;
use std::sync::Arc;

use crate::fault::{fault_pending, raise, RuntimeError};
use crate::object::{alloc, object, ConstructorLayout, FnObject, Handle, Object, VariantObject, VarCell, Word};
use crate::stack::stack_exhausted;

fn wrong_kind(expected: &'static str, found: &Object) -> Word {
    raise(RuntimeError::WrongKind {
        expected,
        found: found.kind(),
    })
}

// ── Collections ──────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn brj_vector_empty() -> Word {
    alloc(Object::Vector(im::Vector::new()))
}

#[unsafe(no_mangle)]
pub extern "C" fn brj_vector_conj(vector: Word, elem: Word) -> Word {
    match unsafe { object(vector) } {
        Object::Vector(items) => {
            let mut items = items.clone();
            items.push_back(Handle(elem));
            alloc(Object::Vector(items))
        }
        other => wrong_kind("vector", other),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn brj_set_empty() -> Word {
    alloc(Object::Set(im::OrdSet::new()))
}

#[unsafe(no_mangle)]
pub extern "C" fn brj_set_conj(set: Word, elem: Word) -> Word {
    match unsafe { object(set) } {
        Object::Set(items) => alloc(Object::Set(items.update(Handle(elem)))),
        other => wrong_kind("set", other),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn brj_map_empty() -> Word {
    alloc(Object::Map(im::OrdMap::new()))
}

#[unsafe(no_mangle)]
pub extern "C" fn brj_map_assoc(map: Word, key: Word, value: Word) -> Word {
    match unsafe { object(map) } {
        Object::Map(entries) => alloc(Object::Map(entries.update(Handle(key), Handle(value)))),
        other => wrong_kind("map", other),
    }
}

// ── Closures ─────────────────────────────────────────────────────

/// Allocates a closure over `code` with `captures` empty capture slots.
#[unsafe(no_mangle)]
pub extern "C" fn brj_closure_new(code: i64, arity: i64, captures: i64) -> Word {
    alloc(Object::Fn(FnObject {
        name: "fn".into(),
        code: code as *const u8,
        arity: arity as usize,
        captures: (0..captures).map(|_| Cell::new(0)).collect(),
    }))
}

#[unsafe(no_mangle)]
pub extern "C" fn brj_closure_set(closure: Word, idx: i64, value: Word) -> Word {
    match unsafe { object(closure) } {
        Object::Fn(f) => match f.captures.get(idx as usize) {
            Some(slot) => {
                slot.set(value);
                closure
            }
            None => raise(RuntimeError::Escaped),
        },
        other => wrong_kind("function", other),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn brj_closure_get(closure: Word, idx: i64) -> Word {
    match unsafe { object(closure) } {
        Object::Fn(f) => match f.captures.get(idx as usize) {
            Some(slot) => slot.get(),
            None => raise(RuntimeError::Escaped),
        },
        other => wrong_kind("function", other),
    }
}

/// Resolves the code pointer for calling `callee` with `argc` arguments.
/// Returns 0 (after raising) when the call cannot proceed, including when a
/// fault is already pending or the stack budget is spent.
#[unsafe(no_mangle)]
pub extern "C" fn brj_fn_entry(callee: Word, argc: i64) -> i64 {
    if fault_pending() {
        return 0;
    }
    if stack_exhausted() {
        raise(RuntimeError::StackOverflow);
        return 0;
    }
    match unsafe { object(callee) } {
        Object::Fn(f) if f.arity == argc as usize => f.code as i64,
        Object::Fn(f) => {
            raise(RuntimeError::Arity {
                name: f.name.clone(),
                expected: f.arity,
                found: argc as usize,
            });
            0
        }
        Object::Fault => 0,
        other => {
            raise(RuntimeError::NotAFunction(other.kind()));
            0
        }
    }
}

// ── Variants ─────────────────────────────────────────────────────

/// Allocates an instance of the constructor at `layout`, fields zeroed.
///
/// `layout` is the address of an `Arc<ConstructorLayout>` the compiler keeps alive.
#[unsafe(no_mangle)]
pub extern "C" fn brj_variant_new(layout: i64) -> Word {
    let ptr = layout as *const ConstructorLayout;
    let constructor = unsafe {
        Arc::increment_strong_count(ptr);
        Arc::from_raw(ptr)
    };
    let fields = (0..constructor.arity).map(|_| Cell::new(0)).collect();
    alloc(Object::Variant(VariantObject { constructor, fields }))
}

#[unsafe(no_mangle)]
pub extern "C" fn brj_variant_set(variant: Word, idx: i64, value: Word) -> Word {
    match unsafe { object(variant) } {
        Object::Variant(v) => match v.fields.get(idx as usize) {
            Some(slot) => {
                slot.set(value);
                variant
            }
            None => raise(RuntimeError::Escaped),
        },
        other => wrong_kind("variant", other),
    }
}

// ── Globals ──────────────────────────────────────────────────────

/// Called when a link cell is still empty at the time it is read.
#[unsafe(no_mangle)]
pub extern "C" fn brj_unbound(cell: i64) -> Word {
    let cell = unsafe { &*(cell as *const VarCell) };
    raise(RuntimeError::UnboundVar(cell.name().clone()))
}

/// Every helper generated code may import, by symbol name.
pub fn symbols() -> Vec<(&'static str, *const u8)> {
    vec![
        ("brj_vector_empty", brj_vector_empty as *const u8),
        ("brj_vector_conj", brj_vector_conj as *const u8),
        ("brj_set_empty", brj_set_empty as *const u8),
        ("brj_set_conj", brj_set_conj as *const u8),
        ("brj_map_empty", brj_map_empty as *const u8),
        ("brj_map_assoc", brj_map_assoc as *const u8),
        ("brj_closure_new", brj_closure_new as *const u8),
        ("brj_closure_set", brj_closure_set as *const u8),
        ("brj_closure_get", brj_closure_get as *const u8),
        ("brj_fn_entry", brj_fn_entry as *const u8),
        ("brj_variant_new", brj_variant_new as *const u8),
        ("brj_variant_set", brj_variant_set as *const u8),
        ("brj_unbound", brj_unbound as *const u8),
    ]
}
