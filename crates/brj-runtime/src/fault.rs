use std::cell::RefCell;

use smol_str::SmolStr;

use crate::object::{fault_word, Word};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("unbound var: {0}")]
    UnboundVar(SmolStr),

    #[error("not a function: {0}")]
    NotAFunction(&'static str),

    #[error("arity mismatch calling {name}: expected {expected} arguments, got {found}")]
    Arity {
        name: SmolStr,
        expected: usize,
        found: usize,
    },

    #[error("expected {expected}, got {found}")]
    WrongKind {
        expected: &'static str,
        found: &'static str,
    },

    #[error("{0} values cannot be passed in from the host")]
    NotEncodable(&'static str),

    #[error("division by zero")]
    DivideByZero,

    #[error("stack overflow")]
    StackOverflow,

    #[error("fault value escaped without a recorded fault")]
    Escaped,
}

// Generated code cannot unwind, so helpers record the first fault here and
// hand back the fault word; the host checks after every entry call.
thread_local! {
    static FAULT: RefCell<Option<RuntimeError>> = const { RefCell::new(None) };
}

/// Records `err` unless a fault is already pending, returning the fault word.
pub fn raise(err: RuntimeError) -> Word {
    FAULT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            log::trace!("runtime fault: {}", err);
            *slot = Some(err);
        }
    });
    fault_word()
}

pub fn take_fault() -> Option<RuntimeError> {
    FAULT.with(|slot| slot.borrow_mut().take())
}

pub fn fault_pending() -> bool {
    FAULT.with(|slot| slot.borrow().is_some())
}
