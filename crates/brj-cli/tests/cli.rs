use predicates::prelude::*;
use std::fs;

fn brj() -> assert_cmd::Command {
    assert_cmd::cargo::cargo_bin_cmd!("brj").into()
}

fn fixture_path(name: &str) -> String {
    format!("{}/tests/fixtures/{}.brj", env!("CARGO_MANIFEST_DIR"), name)
}

// ── read command ────────────────────────────────────────────

#[test]
fn read_prints_forms() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("forms.brj");
    fs::write(&file, "(def x   [1 2]) ; comment\n#{\"a\"}").unwrap();

    brj()
        .args(["read", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout("(def x [1 2])\n#{\"a\"}\n");
}

#[test]
fn read_error_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("open.brj");
    fs::write(&file, "(def x").unwrap();

    brj()
        .args(["read", file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

// ── check command ───────────────────────────────────────────

#[test]
fn check_prints_types() {
    brj()
        .args(["check", &fixture_path("functions")])
        .assert()
        .success()
        .stdout(predicate::str::contains("user/fact : (Fn Int Int)"))
        .stdout(predicate::str::contains("(fact 5) : Int"))
        .stdout(predicate::str::ends_with("OK\n"));
}

#[test]
fn check_does_not_run_anything() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("later.brj");
    fs::write(&file, "(:: later Int)\n(def x later)").unwrap();

    brj()
        .args(["check", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("user/x : Int"));
}

#[test]
fn check_type_error_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("bad.brj");
    fs::write(&file, "(def x (+ 1 true))").unwrap();

    brj()
        .args(["check", file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot unify"))
        .stderr(predicate::str::contains("bad.brj"));
}

// ── run command ─────────────────────────────────────────────

#[test]
fn run_prints_expression_values() {
    brj()
        .args(["run", &fixture_path("functions")])
        .assert()
        .success()
        .stdout("120\n42\n");
}

#[test]
fn run_prints_data_values() {
    brj()
        .args(["run", &fixture_path("data")])
        .assert()
        .success()
        .stdout("Mar\n(Just [1 2 3])\n#{Jan}\n");
}

#[test]
fn run_echo_prints_definitions() {
    brj()
        .args(["run", "--echo", &fixture_path("data")])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("user/Month Jan Feb Mar\nuser/Maybe Just Nothing\n"));
}

#[test]
fn run_reports_runtime_faults() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("later.brj");
    fs::write(&file, "(:: later Int)\n(def x later)").unwrap();

    brj()
        .args(["run", file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unbound var: user/later"));
}

#[test]
fn run_calls_host_functions() {
    brj()
        .args(["run", &fixture_path("host")])
        .assert()
        .success()
        .stdout("\"BRIDJE\"\n4\n");
    brj()
        .args(["check", &fixture_path("host")])
        .assert()
        .success()
        .stdout(predicate::str::contains("app/shout : (Fn Str Str)"));
}

#[test]
fn run_reports_runaway_recursion() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("deep.brj");
    fs::write(
        &file,
        "(:: sum-to (Fn Int Int))\n(def (sum-to n) (if (< n 1) 0 (+ n (sum-to (- n 1)))))\n(sum-to 10000000)",
    )
    .unwrap();

    brj()
        .args(["run", file.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("stack overflow"));
}

#[test]
fn run_with_every_opt_level() {
    for level in ["none", "speed", "speed_and_size"] {
        brj()
            .args(["run", "--opt-level", level, "--no-verify", &fixture_path("functions")])
            .assert()
            .success()
            .stdout("120\n42\n");
    }
}

#[test]
fn run_rejects_unknown_opt_level() {
    brj()
        .args(["run", "--opt-level", "fast", &fixture_path("functions")])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown opt level 'fast'"));
}

// ── packages ────────────────────────────────────────────────

#[test]
fn run_package_sources_in_order() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("brj.pkg"),
        r#"(package (name "demo") (sources "lib.brj" "main.brj") (opt-level "none"))"#,
    )
    .unwrap();
    fs::write(dir.path().join("lib.brj"), "(def (square x) (* x x))").unwrap();
    fs::write(dir.path().join("main.brj"), "(square 7)").unwrap();

    brj().current_dir(dir.path()).arg("run").assert().success().stdout("49\n");
    brj()
        .current_dir(dir.path())
        .arg("check")
        .assert()
        .success()
        .stdout("user/square : (Fn Int Int)\n(square 7) : Int\nOK\n");
}

#[test]
fn run_without_manifest_fails() {
    let dir = tempfile::tempdir().unwrap();

    brj()
        .current_dir(dir.path())
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no brj.pkg manifest found"));
}
