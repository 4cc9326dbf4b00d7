use brj_analyser::analyse;
use brj_ast::{Range, Symbol};
use brj_reader::{read_all, Form};
use brj_typeck::infer;

use super::*;

fn read_one(src: &str) -> Form {
    let mut forms = read_all(src).expect("read");
    assert_eq!(forms.len(), 1, "expected one form in {src:?}");
    forms.remove(0)
}

/// Drives the compiler directly on the test thread, the way the session
/// worker does.
struct Repl {
    compiler: Compiler,
    env: Env,
    ns: NS,
}

impl Repl {
    fn new() -> Self {
        Self::with_config(CodegenConfig {
            opt_level: OptLevel::None,
            verify: true,
            ..CodegenConfig::default()
        })
    }

    fn with_config(config: CodegenConfig) -> Self {
        Self {
            compiler: Compiler::new(config).expect("compiler"),
            env: core_env().expect("core env"),
            ns: NS::user(),
        }
    }

    fn typed(&self, src: &str) -> Expr<Type> {
        let expr = analyse(&self.env, &self.ns, &read_one(src)).expect("analyse");
        infer(&expr).expect("infer")
    }

    fn type_err(&self, src: &str) -> String {
        let expr = analyse(&self.env, &self.ns, &read_one(src)).expect("analyse");
        infer(&expr).expect_err("type error").to_string()
    }

    fn compile_typed(&mut self, typed: &Expr<Type>) -> Result<Compiled, CompileError> {
        let compiled = self.compiler.compile(&self.env, typed)?;
        if let Outcome::Ns(ns) = &compiled.outcome {
            self.ns = ns.clone();
        }
        self.env = compiled.env.clone();
        Ok(compiled)
    }

    fn compile(&mut self, src: &str) -> Result<Compiled, CompileError> {
        let typed = self.typed(src);
        self.compile_typed(&typed)
    }

    fn eval(&mut self, src: &str) -> String {
        match self.compile(src) {
            Ok(compiled) => compiled.outcome.to_string(),
            Err(err) => panic!("evaluating {src:?} failed: {err}"),
        }
    }

    fn eval_err(&mut self, src: &str) -> String {
        match self.compile(src) {
            Ok(compiled) => panic!("expected {src:?} to fail, got {}", compiled.outcome),
            Err(err) => err.to_string(),
        }
    }

    fn var(&self, name: &str) -> Option<&Var> {
        self.env.var(&FQSymbol::new(self.ns.clone(), Symbol::new(name)))
    }
}

fn eval(src: &str) -> String {
    Repl::new().eval(src)
}

// ── Expressions ──────────────────────────────────────────────────

#[test]
fn let_and_builtin_calls() {
    let mut repl = Repl::new();
    let compiled = repl.compile("(let [x 4 y 3] (+ x (+ x y)))").expect("compile");
    let Outcome::Value { value, ty } = compiled.outcome else {
        panic!("expected a value");
    };
    assert_eq!(value, Value::Int(11));
    assert_eq!(ty, Type::Int);
}

#[test]
fn collection_literals() {
    assert_eq!(eval("[1 2 3]"), "[1 2 3]");
    assert_eq!(eval("[]"), "[]");
    assert_eq!(eval("#{3 1 2 1}"), "#{1 2 3}");
    assert_eq!(eval(r#"{"b" 2 "a" 1}"#), r#"{"a" 1 "b" 2}"#);
    assert_eq!(eval("[(conj [1] 2) (conj [] 3)]"), "[[1 2] [3]]");
}

#[test]
fn if_selects_a_branch() {
    assert_eq!(eval(r#"(if (< 1 2) "yes" "no")"#), r#""yes""#);
    assert_eq!(eval("(if (= 1 2) 1 (* 6 7))"), "42");
    assert_eq!(eval("(if (not true) [] [false])"), "[false]");
}

#[test]
fn builtins_on_strings() {
    assert_eq!(eval(r#"(concat "n=" (str (- 10 3)))"#), r#""n=7""#);
    assert_eq!(eval("(str [1 2])"), r#""[1 2]""#);
}

// ── Closures ─────────────────────────────────────────────────────

#[test]
fn closure_captures_exactly_the_free_locals() {
    let mut repl = Repl::new();
    let compiled = repl.compile("(let [y 2] ((fn (x) (+ x y)) 4))").expect("compile");
    assert_eq!(compiled.outcome.to_string(), "6");
    assert_eq!(compiled.closures.len(), 1);
    assert_eq!(compiled.closures[0].params, vec!["x"]);
    assert_eq!(compiled.closures[0].captures, vec!["y"]);
}

#[test]
fn nested_closures_thread_captures_through() {
    let mut repl = Repl::new();
    let compiled = repl
        .compile("(let [a 1 b 2] ((fn (x) ((fn (y) (+ a (+ b y))) x)) 10))")
        .expect("compile");
    assert_eq!(compiled.outcome.to_string(), "13");
    let captures: Vec<_> = compiled.closures.iter().map(|c| c.captures.clone()).collect();
    assert_eq!(captures, vec![vec!["a", "b"], vec!["a", "b"]]);
}

#[test]
fn captures_follow_identity_not_name() {
    assert_eq!(eval("(let [x 1 f (fn (y) (+ x y)) x 10] (f x))"), "11");
}

#[test]
fn closures_escape_their_defining_call() {
    let mut repl = Repl::new();
    repl.eval("(def (adder n) (fn (x) (+ x n)))");
    assert_eq!(repl.eval("((adder 5) 10)"), "15");
    assert_eq!(repl.eval("(let [add1 (adder 1) add2 (adder 2)] [(add1 0) (add2 0)])"), "[1 2]");
}

#[test]
fn higher_order_and_polymorphic_locals() {
    let mut repl = Repl::new();
    repl.eval("(def (twice f x) (f (f x)))");
    assert_eq!(repl.eval("(twice (fn (n) (* n 3)) 2)"), "18");
    assert_eq!(repl.eval("(let [id (fn (x) x)] [(count (id [1 2])) (id 3)])"), "[2 3]");
}

#[test]
fn let_bound_aliases_of_globals_stay_polymorphic() {
    let mut repl = Repl::new();
    repl.eval("(def (identity x) x)");
    assert_eq!(repl.eval(r#"(let [f identity] [(str (f 1)) (f "s")])"#), r#"["1" "s"]"#);
}

// ── Definitions and linkage ──────────────────────────────────────

#[test]
fn defs_bind_values_and_functions() {
    let mut repl = Repl::new();
    assert_eq!(repl.eval("(def (double x) (+ x x))"), "user/double : (Fn Int Int)");
    assert_eq!(repl.eval("(double 21)"), "42");
    assert_eq!(repl.eval("(def answer (double 21))"), "user/answer : Int");
    assert_eq!(repl.eval("answer"), "42");
    assert_eq!(repl.var("double").map(|v| v.kind.clone()), Some(VarKind::Fn { arity: 1 }));
    assert_eq!(repl.eval("double"), "<fn user/double/1>");
}

#[test]
fn forward_declarations_allow_recursion() {
    let mut repl = Repl::new();
    assert_eq!(repl.eval("(:: fact (Fn Int Int))"), "(:: user/fact (Fn Int Int))");
    repl.eval("(def (fact n) (if (< n 1) 1 (* n (fact (- n 1)))))");
    assert_eq!(repl.eval("(fact 5)"), "120");
}

#[test]
fn mutual_recursion_through_declared_cells() {
    let mut repl = Repl::new();
    repl.eval("(:: even? (Fn Int Bool))");
    repl.eval("(def (odd? n) (if (= n 0) false (even? (- n 1))))");
    repl.eval("(def (even? n) (if (= n 0) true (odd? (- n 1))))");
    assert_eq!(repl.eval("[(even? 10) (odd? 7) (even? 3)]"), "[true true false]");
}

#[test]
fn calling_a_declared_but_undefined_var_faults() {
    let mut repl = Repl::new();
    repl.eval("(:: later (Fn Int Int))");
    repl.eval("(def (use-later x) (later x))");
    insta::assert_snapshot!(repl.eval_err("(use-later 1)"), @"unbound var: user/later");
    repl.eval("(def (later x) (* x 10))");
    assert_eq!(repl.eval("(use-later 1)"), "10");
}

#[test]
fn compatible_redefinition_is_seen_by_earlier_callers() {
    let mut repl = Repl::new();
    repl.eval("(def (f) 1)");
    repl.eval("(def (g) (f))");
    assert_eq!(repl.eval("(g)"), "1");
    let cell = repl.var("f").map(|v| v.cell.clone()).expect("f");

    repl.eval("(def (f) 2)");
    assert_eq!(repl.eval("(g)"), "2");
    assert!(repl.var("f").is_some_and(|v| Arc::ptr_eq(&v.cell, &cell)));
}

#[test]
fn incompatible_redefinition_gets_a_fresh_cell() {
    let mut repl = Repl::new();
    repl.eval("(def (f) 1)");
    repl.eval("(def (g) (f))");
    let cell = repl.var("f").map(|v| v.cell.clone()).expect("f");

    assert_eq!(repl.eval(r#"(def (f) "one")"#), "user/f : (Fn Str)");
    assert!(repl.var("f").is_some_and(|v| !Arc::ptr_eq(&v.cell, &cell)));
    assert_eq!(repl.eval("(g)"), "1");
    assert_eq!(repl.eval("(f)"), r#""one""#);
}

#[test]
fn failed_definitions_leave_the_env_alone() {
    let mut repl = Repl::new();
    repl.eval("(def x 1)");
    repl.eval("(:: missing Int)");
    let version = repl.env.version();

    insta::assert_snapshot!(repl.eval_err("(def x missing)"), @"unbound var: user/missing");
    insta::assert_snapshot!(repl.eval_err("(def boom missing)"), @"unbound var: user/missing");
    assert_eq!(repl.env.version(), version);
    assert!(repl.var("boom").is_none());
    assert_eq!(repl.eval("x"), "1");
}

#[test]
fn calls_through_parameters() {
    let mut repl = Repl::new();
    repl.eval("(def (apply-to f x) (f x))");
    assert_eq!(repl.eval("(apply-to (fn (n) (+ n 1)) 41)"), "42");
    assert_eq!(repl.eval("(apply-to not false)"), "true");
}

// ── Data types ───────────────────────────────────────────────────

#[test]
fn value_constructors_are_nominal_singletons() {
    let mut repl = Repl::new();
    assert_eq!(repl.eval("(defdata Month Jan Feb Mar)"), "user/Month Jan Feb Mar");
    let compiled = repl.compile("Mar").expect("compile");
    assert_eq!(
        compiled.outcome,
        Outcome::Value {
            value: Value::Variant {
                data_type: "user/Month".into(),
                constructor: "Mar".into(),
                fields: vec![],
            },
            ty: Type::Data("user/Month".into()),
        }
    );

    repl.eval("(defdata Quarter Q1 Q2 Q3)");
    insta::assert_snapshot!(repl.type_err("[Mar Q1]"), @"[1:1-1:9] cannot unify user/Month with user/Quarter");
    assert_eq!(repl.eval("#{Mar Jan Mar}"), "#{Jan Mar}");
}

#[test]
fn vector_constructors_build_instances() {
    let mut repl = Repl::new();
    repl.eval("(defdata (Maybe a) Nothing (Just a))");
    assert_eq!(repl.eval("(Just [1 2])"), "(Just [1 2])");
    assert_eq!(repl.eval("[(Just 1) Nothing]"), "[(Just 1) Nothing]");
    assert_eq!(repl.eval("(let [mk Just] (mk true))"), "(Just true)");

    let compiled = repl.compile("(Just (Just 1))").expect("compile");
    let Outcome::Value { ty, .. } = compiled.outcome else {
        panic!("expected a value");
    };
    assert_eq!(ty.pretty(), "(user/Maybe (user/Maybe Int))");

    repl.eval("(defdata Shape (Rect Int Int) (Circle Int))");
    assert_eq!(repl.eval("[(Rect 2 3) (Circle 1)]"), "[(Rect 2 3) (Circle 1)]");
    assert_eq!(
        repl.var("Rect").map(|v| v.kind.clone()),
        Some(VarKind::Constructor {
            data_type: FQSymbol::new(NS::user(), Symbol::new("Shape")),
            arity: 2,
        })
    );
}

#[test]
fn constructor_arity_is_checked_at_compile_time() {
    let mut repl = Repl::new();
    repl.eval("(defdata (Maybe a) Nothing (Just a))");
    let mut typed = repl.typed("(Just 1)");
    let ExprKind::VarCall { args, .. } = &mut typed.kind else {
        panic!("expected a var call");
    };
    args.push(args[0].clone());
    let err = repl.compile_typed(&typed).expect_err("arity");
    insta::assert_snapshot!(err.to_string(), @"[1:1-1:9] user/Just takes 1 arguments, got 2");
}

// ── Host functions ───────────────────────────────────────────────

#[test]
fn defj_binds_imported_host_functions() {
    let mut repl = Repl::new();
    assert_eq!(repl.eval("(ns app {imports {brj.host [Str Math]}})"), "ns app");
    assert_eq!(repl.eval("(defj shout Str upper (Fn Str Str))"), "app/shout : (Fn Str Str)");
    repl.eval("(defj str-len Str length (Fn Str Int))");
    repl.eval("(defj quot Math quot (Fn Int Int Int))");

    assert_eq!(repl.eval(r#"(shout "héllo")"#), r#""HÉLLO""#);
    assert_eq!(repl.eval(r#"(+ (str-len "abc") (quot 7 2))"#), "6");
    assert_eq!(repl.eval(r#"(let [f shout] (f "x"))"#), r#""X""#);
    assert_eq!(repl.var("shout").map(|v| v.kind.clone()), Some(VarKind::Host { arity: 1 }));
    insta::assert_snapshot!(repl.eval_err("(quot 1 0)"), @"division by zero");
    assert!(repl.type_err("(shout 1)").contains("cannot unify"));
}

#[test]
fn mis_ascribed_host_functions_fault_at_run_time() {
    let mut repl = Repl::new();
    repl.eval("(ns app {imports {brj.host [Str]}})");
    repl.eval("(defj bad-len Str length (Fn Int Int))");
    insta::assert_snapshot!(repl.eval_err("(bad-len 3)"), @"expected Str, got Int");
}

// ── Consistency ──────────────────────────────────────────────────

#[test]
fn unbound_locals_are_consistency_errors() {
    let mut repl = Repl::new();
    let ghost = LocalVar::new("ghost");
    let expr = Expr::new(Range::default(), Type::Int, ExprKind::Local(ghost));
    let err = repl.compile_typed(&expr).expect_err("consistency");
    assert!(
        matches!(&err, CompileError::Consistency { message } if message.starts_with("local ghost#")),
        "unexpected error: {err}"
    );
}

#[test]
fn every_opt_level_agrees() {
    for opt_level in [OptLevel::None, OptLevel::Speed, OptLevel::SpeedAndSize] {
        let mut repl = Repl::with_config(CodegenConfig {
            opt_level,
            verify: true,
            ..CodegenConfig::default()
        });
        repl.eval("(:: sum-to (Fn Int Int))");
        repl.eval("(def (sum-to n) (if (< n 1) 0 (+ n (sum-to (- n 1)))))");
        assert_eq!(repl.eval("(sum-to 10)"), "55", "at {opt_level}");
        assert_eq!(repl.eval("(let [sq (fn (n) (* n n))] (sq 9))"), "81", "at {opt_level}");
    }
}

// ── Stack and heap ───────────────────────────────────────────────

#[test]
fn deep_recursion_faults_instead_of_overflowing() {
    let mut repl = Repl::new();
    repl.eval("(:: sum-to (Fn Int Int))");
    repl.eval("(def (sum-to n) (if (< n 1) 0 (+ n (sum-to (- n 1)))))");
    insta::assert_snapshot!(repl.eval_err("(sum-to 10000000)"), @"stack overflow");
    assert_eq!(repl.eval("(sum-to 100)"), "5050");

    let var = repl.var("sum-to").cloned().expect("sum-to");
    let err = repl.compiler.invoke(&var, &[Value::Int(10_000_000)]).expect_err("overflow");
    assert_eq!(err, CompileError::Runtime(RuntimeError::StackOverflow));
    assert_eq!(repl.compiler.invoke(&var, &[Value::Int(4)]), Ok(Value::Int(10)));
}

#[test]
fn garbage_from_evaluation_is_reclaimed() {
    let mut repl = Repl::new();
    repl.eval("(:: sum-to (Fn Int Int))");
    repl.eval("(def (sum-to n) (if (< n 1) 0 (+ n (sum-to (- n 1)))))");
    repl.eval("(def kept [[1 2] [3]])");
    repl.compiler.collect_garbage();
    let baseline = brj_runtime::heap_size();

    for _ in 0..10 {
        assert_eq!(repl.eval("(sum-to 1000)"), "500500");
    }
    // Each run allocates a couple of thousand objects, so without collection
    // ten runs would leave about twenty thousand behind.
    let size = brj_runtime::heap_size();
    assert!(size < baseline + 2 * 4096, "heap grew from {baseline} to {size}");

    // Only the pinned literal of each run's code survives.
    repl.compiler.collect_garbage();
    assert_eq!(brj_runtime::heap_size(), baseline + 10);
    assert_eq!(repl.eval("kept"), "[[1 2] [3]]");
}
