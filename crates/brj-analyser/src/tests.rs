use std::sync::Arc;

use brj_ast::{ExprKind, FQSymbol, Symbol, Var, VarKind, NS};
use brj_env::Env;
use brj_reader::read_all;
use brj_runtime::VarCell;
use brj_types::Type;

use super::*;

fn fq(ns: &str, name: &str) -> FQSymbol {
    FQSymbol::new(NS::new(ns), Symbol::new(name))
}

fn var(sym: FQSymbol, ty: Type) -> Var {
    let kind = match &ty {
        Type::Fn(params, _) => VarKind::Fn { arity: params.len() },
        _ => VarKind::Value,
    };
    let cell = Arc::new(VarCell::new(sym.to_string()));
    Var::new(sym, kind, cell).with_inferred(ty)
}

fn test_env() -> Env {
    let int2 = Type::func(vec![Type::Int, Type::Int], Type::Int);
    Env::new()
        .with_var(var(fq("brj.core", "+"), int2.clone()))
        .with_var(var(fq("lib.math", "square"), Type::func(vec![Type::Int], Type::Int)))
        .with_var(var(fq("lib.math", "pi"), Type::Int))
        .with_var(var(fq("lib.str", "pi"), Type::Str))
}

fn analyse_in(env: &Env, ns: &str, src: &str) -> Result<Expr<()>, ResolutionError> {
    let forms = read_all(src).expect("read");
    assert_eq!(forms.len(), 1, "expected one form in {src:?}");
    analyse(env, &NS::new(ns), &forms[0])
}

fn analyse_ok(src: &str) -> Expr<()> {
    match analyse_in(&test_env(), "user", src) {
        Ok(expr) => expr,
        Err(err) => panic!("analysis of {src:?} failed: {err}"),
    }
}

fn analyse_err(src: &str) -> String {
    match analyse_in(&test_env(), "user", src) {
        Ok(_) => panic!("expected {src:?} to fail"),
        Err(err) => err.to_string(),
    }
}

fn type_of(src: &str) -> String {
    let forms = read_all(src).expect("read");
    analyse_type(&test_env(), &NS::user(), &forms[0])
        .expect("type")
        .pretty()
}

// ── Scope resolution ─────────────────────────────────────────────

#[test]
fn let_shadowing_mints_distinct_locals() {
    let expr = analyse_ok("(let [x 1 x [x]] x)");
    let ExprKind::Let { bindings, body } = &expr.kind else {
        panic!("expected let, got {:?}", expr.kind);
    };
    let (first, second) = (&bindings[0].local, &bindings[1].local);
    assert_ne!(first, second);
    let ExprKind::Vector(elems) = &bindings[1].expr.kind else {
        panic!("expected vector");
    };
    assert!(matches!(&elems[0].kind, ExprKind::Local(l) if l == first));
    assert!(matches!(&body.kind, ExprKind::Local(l) if l == second));
}

#[test]
fn locals_go_out_of_scope() {
    insta::assert_snapshot!(
        analyse_err("[(let [y 1] y) y]"),
        @"[1:16-1:17] unable to resolve symbol: y"
    );
}

#[test]
fn global_heads_become_var_calls() {
    let expr = analyse_ok("(+ 1 2)");
    let ExprKind::VarCall { var, args } = &expr.kind else {
        panic!("expected var call, got {:?}", expr.kind);
    };
    assert_eq!(var.sym, fq("brj.core", "+"));
    assert_eq!(args.len(), 2);
}

#[test]
fn local_heads_become_calls() {
    let expr = analyse_ok("(fn (f) (f 1))");
    let ExprKind::Fn { params, body } = &expr.kind else {
        panic!("expected fn");
    };
    let ExprKind::Call { callee, .. } = &body.kind else {
        panic!("expected call, got {:?}", body.kind);
    };
    assert!(matches!(&callee.kind, ExprKind::Local(l) if *l == params[0]));
}

#[test]
fn locals_shadow_globals() {
    let expr = analyse_ok("(let [+ 1] +)");
    let ExprKind::Let { body, .. } = &expr.kind else {
        panic!("expected let");
    };
    assert!(matches!(body.kind, ExprKind::Local(_)));
}

#[test]
fn qualified_symbols_resolve_by_namespace_name() {
    let expr = analyse_ok("lib.str/pi");
    assert!(matches!(&expr.kind, ExprKind::Global(v) if v.sym == fq("lib.str", "pi")));
}

#[test]
fn unresolved_symbol() {
    insta::assert_snapshot!(analyse_err("(frobnicate 1)"), @"[1:2-1:12] unable to resolve symbol: frobnicate");
    insta::assert_snapshot!(analyse_err("nope/x"), @"[1:1-1:7] unable to resolve symbol: nope/x");
}

#[test]
fn malformed_special_forms() {
    insta::assert_snapshot!(analyse_err("(if true 1)"), @"[1:1-1:12] if expects a test, a then branch and an else branch");
    insta::assert_snapshot!(analyse_err("(let [x] x)"), @"[1:6-1:9] let bindings must pair every name with an expression");
    insta::assert_snapshot!(analyse_err("(fn (1) 1)"), @"[1:6-1:7] expected a symbol to bind, got integer");
    insta::assert_snapshot!(analyse_err("[(def x 1)]"), @"[1:3-1:6] def is only allowed at top level");
    insta::assert_snapshot!(analyse_err("()"), @"[1:1-1:3] cannot evaluate an empty list");
}

// ── Top-level forms ──────────────────────────────────────────────

#[test]
fn def_sugar_builds_a_fn() {
    let expr = analyse_ok("(def (double x) (+ x x))");
    let ExprKind::Def { sym, declared, body } = &expr.kind else {
        panic!("expected def");
    };
    assert_eq!(*sym, fq("user", "double"));
    assert!(declared.is_none());
    assert!(matches!(&body.kind, ExprKind::Fn { params, .. } if params.len() == 1));
}

#[test]
fn def_picks_up_a_forward_declaration() {
    let declared = Type::func(vec![Type::Int], Type::Int);
    let env = test_env().with_var(Var::declared(fq("user", "fact"), declared.clone()));
    let expr = analyse_in(&env, "user", "(def (fact n) (fact n))").expect("analyse");
    let ExprKind::Def { declared: found, body, .. } = &expr.kind else {
        panic!("expected def");
    };
    assert_eq!(found.as_ref(), Some(&declared));
    let ExprKind::Fn { body, .. } = &body.kind else {
        panic!("expected fn");
    };
    assert!(matches!(&body.kind, ExprKind::VarCall { var, .. } if var.sym == fq("user", "fact")));
}

#[test]
fn type_forms() {
    assert_eq!(type_of("(Fn a [a] {Str #{Int}})"), "(Fn a [a] {Str #{Int}})");
    assert_eq!(type_of("(Fn (Fn a b) [a] [b])"), "(Fn (Fn a b) [a] [b])");
    assert_eq!(type_of("Bool"), "Bool");
}

#[test]
fn type_def_shares_variables_within_one_ascription() {
    let expr = analyse_ok("(:: id (Fn a a))");
    let ExprKind::TypeDef { ty: Type::Fn(params, ret), .. } = &expr.kind else {
        panic!("expected type def");
    };
    assert_eq!(params[0], **ret);
}

#[test]
fn defdata_constructors() {
    let expr = analyse_ok("(defdata (List a) Empty (Cons a (List a)))");
    let ExprKind::DefData(dt) = &expr.kind else {
        panic!("expected defdata");
    };
    assert_eq!(dt.sym, fq("user", "List"));
    let types: Vec<String> = dt
        .constructors
        .iter()
        .map(|c| format!("{} {}", c.sym, dt.constructor_type(c).pretty()))
        .collect();
    insta::assert_snapshot!(types.join("\n"), @r"
    user/Empty (user/List a)
    user/Cons (Fn a (user/List a) (user/List a))
    ");
}

#[test]
fn defdata_errors() {
    insta::assert_snapshot!(
        analyse_err("(defdata Box (Box a))"),
        @"[1:19-1:20] unknown type variable: a"
    );
    insta::assert_snapshot!(
        analyse_err("(defdata (Pair a) (Pair a Pair))"),
        @"[1:27-1:31] Pair expects 1 type arguments"
    );
    insta::assert_snapshot!(
        analyse_err("(defdata Month Jan Jan)"),
        @"[1:20-1:23] duplicate constructor user/Jan"
    );
}

// ── Namespaces ───────────────────────────────────────────────────

#[test]
fn ns_declaration() {
    let expr = analyse_ok("(ns app.core {aliases {m lib.math} refers {lib.str [pi]}})");
    let ExprKind::Ns(decl) = &expr.kind else {
        panic!("expected ns");
    };
    assert_eq!(decl.ns, NS::new("app.core"));
    assert_eq!(decl.aliases, vec![(Symbol::new("m"), NS::new("lib.math"))]);
    assert_eq!(decl.refers, vec![(Symbol::new("pi"), fq("lib.str", "pi"))]);
}

#[test]
fn ns_declaration_errors() {
    insta::assert_snapshot!(
        analyse_err("(ns app {aliases {m lib.nope}})"),
        @"[1:21-1:29] unknown namespace: lib.nope"
    );
    insta::assert_snapshot!(
        analyse_err("(ns app {aliases {lib.str lib.math}})"),
        @"[1:19-1:26] alias lib.str clashes with existing namespace lib.str (it points at lib.math)"
    );
    insta::assert_snapshot!(
        analyse_err("(ns app {refers {lib.math [pi] lib.str [pi]}})"),
        @"[1:41-1:43] pi is referred from both lib.math and lib.str"
    );
    insta::assert_snapshot!(
        analyse_err("(ns app {refers {lib.math [tau]}})"),
        @"[1:28-1:31] unable to resolve symbol: lib.math/tau"
    );
}

#[test]
fn ns_imports_host_modules() {
    let expr = analyse_ok("(ns app {imports {brj.host [Str Math]}})");
    let ExprKind::Ns(decl) = &expr.kind else {
        panic!("expected ns");
    };
    assert_eq!(
        decl.imports,
        vec![
            (Symbol::new("Str"), fq("brj.host", "Str")),
            (Symbol::new("Math"), fq("brj.host", "Math")),
        ]
    );
}

#[test]
fn ns_import_errors() {
    insta::assert_snapshot!(
        analyse_err("(ns app {imports {brj.host [Regex]}})"),
        @"[1:29-1:34] unknown host module: brj.host/Regex"
    );
    insta::assert_snapshot!(
        analyse_err("(ns app {imports {brj.host [Str Str]}})"),
        @"[1:33-1:36] duplicate import Str"
    );
    insta::assert_snapshot!(
        analyse_err("(ns app {requires {}})"),
        @"[1:10-1:18] unknown ns option: requires"
    );
}

fn importing_env() -> Env {
    let forms = read_all("(ns app {imports {brj.host [Str]}})").expect("read");
    let env = test_env();
    let ExprKind::Ns(decl) = analyse(&env, &NS::user(), &forms[0]).expect("ns").kind else {
        panic!("expected ns");
    };
    env.with_ns(&decl)
}

#[test]
fn defj_binds_an_imported_host_function() {
    let expr = analyse_in(&importing_env(), "app", "(defj shout Str upper (Fn Str Str))").expect("analyse");
    let ExprKind::DefJ { sym, host, ty } = &expr.kind else {
        panic!("expected defj");
    };
    assert_eq!(*sym, fq("app", "shout"));
    assert_eq!(
        *host,
        HostFnRef {
            module: fq("brj.host", "Str"),
            name: Symbol::new("upper"),
            arity: 1,
        }
    );
    assert_eq!(ty.pretty(), "(Fn Str Str)");
}

#[test]
fn defj_errors() {
    let env = importing_env();
    let err = |src: &str| analyse_in(&env, "app", src).expect_err("defj error").to_string();
    insta::assert_snapshot!(err("(defj f Regex m (Fn Str Str))"), @"[1:9-1:14] unknown host module: Regex");
    insta::assert_snapshot!(
        err("(defj f Str shout (Fn Str Str))"),
        @"[1:13-1:18] host module brj.host/Str has no function shout"
    );
    insta::assert_snapshot!(
        err("(defj f Str upper (Fn Str Str Str))"),
        @"[1:19-1:35] brj.host/Str.upper takes 1 arguments, defj needs a Fn type to match, got (Fn Str Str Str)"
    );
    insta::assert_snapshot!(err("(defj f Str upper)"), @"[1:1-1:19] defj expects a name, a host module, a function name and a type");
    insta::assert_snapshot!(
        analyse_err("(defj f Str upper (Fn Str Str))"),
        @"[1:9-1:12] unknown host module: Str"
    );
    insta::assert_snapshot!(
        err("(let [x 1] (defj f Str upper (Fn Str Str)))"),
        @"[1:13-1:17] defj is only allowed at top level"
    );
}

#[test]
fn aliases_apply_after_the_ns_is_installed() {
    let forms = read_all("(ns app {aliases {m lib.math}})").expect("read");
    let env = test_env();
    let ExprKind::Ns(decl) = analyse(&env, &NS::user(), &forms[0]).expect("ns").kind else {
        panic!("expected ns");
    };
    let env = env.with_ns(&decl);
    let expr = analyse_in(&env, "app", "(m/square 3)").expect("analyse");
    assert!(matches!(&expr.kind, ExprKind::VarCall { var, .. } if var.sym == fq("lib.math", "square")));
}
