//! Bridje runtime: the object model generated code operates on.
//!
//! ## Representation
//!
//! Every runtime value is a [`Word`], the address of a boxed [`Object`] on
//! the heap of the thread that created it. Booleans are two per-thread
//! singletons so generated code can test them by comparing words.
//!
//! ## Globals
//!
//! Each top-level var owns a [`VarCell`]. Generated code never embeds a
//! var's value directly; it loads it from the cell at the moment of use, so
//! redefining the var is visible to code compiled earlier.
//!
//! ## Faults
//!
//! Compiled code cannot unwind. Helpers that hit a runtime error record it
//! via [`raise`] and return the fault word; callers collect it with
//! [`take_fault`] once control is back in the host.
//!
//! ## Memory
//!
//! Objects are reclaimed by a mark and sweep [`collect`] rooted at whatever
//! the host still holds, normally the words in every live [`VarCell`].
//! Literals baked into generated code are allocated with [`alloc_pinned`].

mod abi;
mod builtins;
mod fault;
mod host;
mod object;
mod stack;
mod value;

pub use abi::*;
pub use builtins::{builtins, Builtin};
pub use fault::{fault_pending, raise, take_fault, RuntimeError};
pub use host::{host_module, host_modules, HostFn, HostModule, HOST_PACKAGE};
pub use object::{
    alloc, alloc_pinned, bool_word, collect, fault_word, heap_size, object, should_collect,
    ConstructorLayout, DataLayout, FnObject, Handle, Object, VarCell, VariantObject, Word,
};
pub use stack::StackGuard;
pub use value::Value;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn int(n: i64) -> Word {
        alloc(Object::Int(n))
    }

    fn decode(word: Word) -> String {
        Value::decode(word).expect("decode").to_string()
    }

    #[test]
    fn vectors_are_persistent() {
        let empty = brj_vector_empty();
        let one = brj_vector_conj(empty, int(1));
        let two = brj_vector_conj(one, int(2));
        assert_eq!(decode(empty), "[]");
        assert_eq!(decode(one), "[1]");
        assert_eq!(decode(two), "[1 2]");
    }

    #[test]
    fn sets_dedupe_by_content() {
        let a = alloc(Object::Str("a".into()));
        let a_again = alloc(Object::Str("a".into()));
        let set = brj_set_conj(brj_set_conj(brj_set_empty(), a), a_again);
        assert_eq!(decode(set), r#"#{"a"}"#);
    }

    #[test]
    fn map_assoc_replaces_existing_key() {
        let map = brj_map_assoc(brj_map_empty(), int(1), int(10));
        let map = brj_map_assoc(map, int(1), int(11));
        let map = brj_map_assoc(map, int(0), int(5));
        assert_eq!(decode(map), "{0 5 1 11}");
    }

    #[test]
    fn closure_captures_round_trip() {
        let closure = brj_closure_new(0, 1, 2);
        brj_closure_set(closure, 0, int(7));
        brj_closure_set(closure, 1, bool_word(true));
        assert_eq!(decode(brj_closure_get(closure, 0)), "7");
        assert_eq!(brj_closure_get(closure, 1), bool_word(true));
    }

    #[test]
    fn fn_entry_checks_arity() {
        let closure = brj_closure_new(0x1000, 2, 0);
        assert_eq!(brj_fn_entry(closure, 2), 0x1000);
        assert_eq!(brj_fn_entry(closure, 1), 0);
        insta::assert_snapshot!(
            take_fault().unwrap().to_string(),
            @"arity mismatch calling fn: expected 2 arguments, got 1"
        );
    }

    #[test]
    fn calling_a_non_function_faults() {
        assert_eq!(brj_fn_entry(int(3), 0), 0);
        assert_eq!(take_fault(), Some(RuntimeError::NotAFunction("Int")));
    }

    #[inline(never)]
    fn entry_below(callee: Word) -> i64 {
        let frame = [0u8; 8192];
        std::hint::black_box(&frame);
        brj_fn_entry(callee, 0)
    }

    #[test]
    fn fn_entry_faults_past_stack_budget() {
        let thunk = brj_closure_new(0x2000, 0, 0);
        {
            let _guard = StackGuard::enter(1 << 20);
            assert_eq!(entry_below(thunk), 0x2000);
        }
        {
            let _guard = StackGuard::enter(1024);
            assert_eq!(entry_below(thunk), 0);
            assert_eq!(take_fault(), Some(RuntimeError::StackOverflow));
        }
        assert_eq!(entry_below(thunk), 0x2000);
    }

    #[test]
    fn pending_fault_stops_further_calls() {
        let thunk = brj_closure_new(0x2000, 0, 0);
        raise(RuntimeError::StackOverflow);
        assert_eq!(brj_fn_entry(thunk, 0), 0);
        assert_eq!(take_fault(), Some(RuntimeError::StackOverflow));
        assert_eq!(brj_fn_entry(thunk, 0), 0x2000);
    }

    #[test]
    fn collect_frees_what_roots_cannot_reach() {
        unsafe { collect([]) };
        let baseline = heap_size();
        let kept = brj_vector_conj(brj_vector_empty(), int(1));
        let closure = brj_closure_new(0, 0, 1);
        brj_closure_set(closure, 0, kept);
        for n in 0..100 {
            int(n);
        }
        let literal = alloc_pinned(Object::Str("lit".into()));

        let freed = unsafe { collect([closure]) };
        // The empty vector and the hundred ints are garbage.
        assert_eq!(freed, 101);
        assert_eq!(heap_size(), baseline + 4);
        assert_eq!(decode(brj_closure_get(closure, 0)), "[1]");
        assert_eq!(decode(literal), r#""lit""#);

        unsafe { collect([]) };
        assert_eq!(heap_size(), baseline + 1);
        assert!(!should_collect());
    }

    #[test]
    fn first_fault_wins() {
        raise(RuntimeError::UnboundVar("user/x".into()));
        raise(RuntimeError::Escaped);
        assert_eq!(take_fault(), Some(RuntimeError::UnboundVar("user/x".into())));
        assert_eq!(take_fault(), None);
    }

    #[test]
    fn variants_carry_their_layout() {
        let maybe = Arc::new(DataLayout { name: "user/Maybe".into() });
        let just = Arc::new(ConstructorLayout {
            data_type: maybe,
            name: "Just".into(),
            tag: 0,
            arity: 1,
        });
        let v = brj_variant_new(Arc::as_ptr(&just) as i64);
        brj_variant_set(v, 0, int(1));
        assert_eq!(
            Value::decode(v).unwrap(),
            Value::Variant {
                data_type: "user/Maybe".into(),
                constructor: "Just".into(),
                fields: vec![Value::Int(1)],
            }
        );
        assert_eq!(Arc::strong_count(&just), 2);
    }

    #[test]
    fn unbound_cell_names_the_var() {
        let cell = VarCell::new("user/later");
        brj_unbound(cell.address());
        insta::assert_snapshot!(take_fault().unwrap().to_string(), @"unbound var: user/later");
    }

    #[test]
    fn builtins_fault_on_wrong_kind() {
        let add = builtins().into_iter().find(|b| b.name == "+").unwrap();
        let f: extern "C" fn(Word, Word, Word) -> Word = unsafe { std::mem::transmute(add.code) };
        assert_eq!(decode(f(0, int(4), int(7))), "11");
        assert_eq!(f(0, int(4), bool_word(false)), fault_word());
        insta::assert_snapshot!(take_fault().unwrap().to_string(), @"expected Int, got Bool");
    }

    #[test]
    fn host_functions_check_their_arguments() {
        let math = host_module(HOST_PACKAGE, "Math").unwrap();
        let quot = math.function("quot").unwrap();
        let word = quot.to_word("app/quot");
        let code = brj_fn_entry(word, 2);
        let f: extern "C" fn(Word, Word, Word) -> Word = unsafe { std::mem::transmute(code) };
        assert_eq!(decode(f(word, int(-7), int(2))), "-3");
        assert_eq!(f(word, int(1), int(0)), fault_word());
        assert_eq!(take_fault(), Some(RuntimeError::DivideByZero));

        let length = host_module(HOST_PACKAGE, "Str").unwrap().function("length").copied().unwrap();
        let f: extern "C" fn(Word, Word) -> Word = unsafe { std::mem::transmute(length.code) };
        assert_eq!(decode(f(0, alloc(Object::Str("héllo".into())))), "5");
        assert_eq!(f(0, int(5)), fault_word());
        insta::assert_snapshot!(take_fault().unwrap().to_string(), @"expected Str, got Int");

        assert!(host_module(HOST_PACKAGE, "Nope").is_none());
        assert!(math.function("sqrt").is_none());
    }

    #[test]
    fn encode_then_decode_nested_value() {
        let value = Value::Map(vec![(
            Value::Str("xs".into()),
            Value::Vector(vec![Value::Int(1), Value::Set(vec![Value::Bool(true)])]),
        )]);
        assert_eq!(Value::decode(value.encode().unwrap()).unwrap(), value);
        assert_eq!(
            Value::Fn { name: "f".into(), arity: 1 }.encode(),
            Err(RuntimeError::NotEncodable("function"))
        );
    }
}
