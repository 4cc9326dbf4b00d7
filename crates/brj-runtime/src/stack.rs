//! Native stack budget for generated code.
//!
//! Compiled functions recurse on the host stack, so unbounded recursion
//! would overflow it and abort the process. [`StackGuard`] records a lowest
//! permitted stack address for the current thread; every call from generated
//! code passes through `brj_fn_entry`, which faults once the stack has grown
//! past that address.

use std::cell::Cell;

thread_local! {
    // 0 while no guard is active.
    static STACK_LIMIT: Cell<usize> = const { Cell::new(0) };
}

/// Limits generated code entered while this guard lives to `budget` bytes of
/// stack below the caller's frame. Nested guards never loosen the limit.
pub struct StackGuard {
    previous: usize,
}

impl StackGuard {
    pub fn enter(budget: usize) -> Self {
        let limit = stack_address().saturating_sub(budget);
        let previous = STACK_LIMIT.with(|slot| {
            let previous = slot.get();
            slot.set(if previous == 0 { limit } else { previous.max(limit) });
            previous
        });
        Self { previous }
    }
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        STACK_LIMIT.with(|slot| slot.set(self.previous));
    }
}

// Stacks grow downwards on every target cranelift-native supports.
#[inline(never)]
fn stack_address() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

pub(crate) fn stack_exhausted() -> bool {
    let limit = STACK_LIMIT.with(Cell::get);
    limit != 0 && stack_address() < limit
}
