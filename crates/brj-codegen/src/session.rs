//! The env update queue.
//!
//! A [`Session`] owns one worker thread that holds the compiler, the current
//! env and the current namespace. Every update is a job sent to that thread;
//! jobs run one at a time in submission order and the caller blocks on its
//! own reply. A new env is published to readers only after the whole
//! read → analyse → infer → compile pipeline for a form has succeeded.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};

use brj_analyser::analyse;
use brj_ast::{FQSymbol, Symbol, NS};
use brj_env::Env;
use brj_reader::{read_all, Form};
use brj_runtime::Value;
use brj_typeck::infer;

use crate::config::WORKER_STACK_RESERVE;
use crate::{core_env, Compiler, EvalError, Outcome, SessionConfig};

type Job = Box<dyn FnOnce(&mut Worker) + Send>;

struct Worker {
    compiler: Compiler,
    env: Env,
    ns: NS,
    published: Arc<RwLock<Env>>,
}

impl Worker {
    fn eval(&mut self, form: &Form) -> Result<Outcome, EvalError> {
        let expr = analyse(&self.env, &self.ns, form)?;
        let typed = infer(&expr)?;
        let compiled = self.compiler.compile(&self.env, &typed)?;
        if let Outcome::Ns(ns) = &compiled.outcome {
            self.ns = ns.clone();
        }
        if compiled.env.version() != self.env.version() {
            self.publish(compiled.env);
        }
        Ok(compiled.outcome)
    }

    fn publish(&mut self, env: Env) {
        log::debug!("publishing env v{}", env.version());
        self.env = env.clone();
        match self.published.write() {
            Ok(mut guard) => *guard = env,
            Err(poisoned) => *poisoned.into_inner() = env,
        }
    }

    /// `ns/name` or `alias/name` as written, or a bare name resolved from
    /// the current namespace.
    fn resolve(&self, sym: &str) -> Result<FQSymbol, EvalError> {
        match sym.split_once('/') {
            Some((qualifier, name)) if !qualifier.is_empty() && !name.is_empty() => {
                let ns = self
                    .env
                    .resolve_qualifier(&self.ns, qualifier)
                    .unwrap_or_else(|| NS::new(qualifier));
                Ok(FQSymbol::new(ns, Symbol::new(name)))
            }
            _ => self
                .env
                .resolve_var(&self.ns, &Symbol::new(sym))
                .map(|var| var.sym.clone())
                .ok_or_else(|| EvalError::UnknownVar(sym.to_string())),
        }
    }
}

pub struct Session {
    jobs: Option<mpsc::Sender<Job>>,
    published: Arc<RwLock<Env>>,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self, EvalError> {
        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let published = Arc::new(RwLock::new(Env::new()));
        let shared = published.clone();
        let mut codegen = config.codegen;
        let usable = config.stack_size.saturating_sub(WORKER_STACK_RESERVE);
        if codegen.stack_budget > usable {
            log::debug!("stack budget {} exceeds the worker's stack, clamping to {}", codegen.stack_budget, usable);
            codegen.stack_budget = usable;
        }

        let worker = thread::Builder::new()
            .name(config.worker_name.clone())
            .stack_size(config.stack_size)
            .spawn(move || {
                let started = Compiler::new(codegen).and_then(|compiler| Ok((compiler, core_env()?)));
                let (compiler, env) = match started {
                    Ok(started) => started,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let mut worker = Worker {
                    compiler,
                    env: Env::new(),
                    ns: NS::user(),
                    published: shared,
                };
                worker.publish(env);
                let _ = ready_tx.send(Ok(()));

                log::debug!("env worker started");
                for job in jobs_rx {
                    job(&mut worker);
                }
                log::debug!("env worker stopped");
            })
            .map_err(|e| EvalError::Spawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => return Err(EvalError::WorkerGone),
        }

        Ok(Self {
            jobs: Some(jobs_tx),
            published,
            worker: Some(worker),
        })
    }

    /// Reads `source` and evaluates its forms in order, stopping at the
    /// first failure. Forms before it stay applied.
    pub fn eval_str(&self, source: &str) -> Result<Vec<Outcome>, EvalError> {
        let forms = read_all(source)?;
        let mut outcomes = Vec::with_capacity(forms.len());
        for form in forms {
            outcomes.push(self.eval_form(form)?);
        }
        Ok(outcomes)
    }

    pub fn eval_form(&self, form: Form) -> Result<Outcome, EvalError> {
        self.submit(move |worker| worker.eval(&form))
    }

    /// Calls the function bound to `sym` with host arguments.
    pub fn invoke(&self, sym: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        let sym = sym.to_string();
        self.submit(move |worker| {
            let fq = worker.resolve(&sym)?;
            let var = worker
                .env
                .var(&fq)
                .ok_or_else(|| EvalError::UnknownVar(fq.to_string()))?;
            Ok(worker.compiler.invoke(var, &args)?)
        })
    }

    /// The most recently published env.
    pub fn env(&self) -> Env {
        match self.published.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn current_ns(&self) -> Result<NS, EvalError> {
        self.submit(|worker| Ok(worker.ns.clone()))
    }

    fn submit<T, F>(&self, f: F) -> Result<T, EvalError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Worker) -> Result<T, EvalError> + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();
        let job: Job = Box::new(move |worker| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| f(worker))).unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                log::warn!("env update panicked: {}", message);
                Err(EvalError::Panicked(message))
            });
            let _ = reply_tx.send(result);
        });

        let jobs = self.jobs.as_ref().ok_or(EvalError::WorkerGone)?;
        jobs.send(job).map_err(|_| EvalError::WorkerGone)?;
        reply_rx.recv().map_err(|_| EvalError::WorkerGone)?
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("env worker exited with a panic");
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use brj_runtime::RuntimeError;

    use super::*;

    fn session() -> Session {
        Session::new(SessionConfig::default()).expect("session")
    }

    fn eval(session: &Session, src: &str) -> String {
        match session.eval_str(src) {
            Ok(outcomes) => outcomes.iter().map(|o| o.to_string()).collect::<Vec<_>>().join("\n"),
            Err(err) => panic!("evaluating {src:?} failed: {err}"),
        }
    }

    #[test]
    fn evaluates_on_the_worker_thread() {
        let session = session();
        assert_eq!(eval(&session, "(let [x 4 y 3] (+ x (+ x y)))"), "11");
    }

    #[test]
    fn definitions_are_published() {
        let session = session();
        let before = session.env().version();
        eval(&session, "(def (double x) (+ x x))");
        let env = session.env();
        assert!(env.version() > before);
        let sym = FQSymbol::new(NS::user(), Symbol::new("double"));
        assert_eq!(
            env.var(&sym).and_then(|v| v.visible_type()).map(|t| t.pretty()),
            Some("(Fn Int Int)".to_string())
        );
    }

    #[test]
    fn failed_updates_leave_the_env_untouched() {
        let session = session();
        eval(&session, "(def x 1)");
        let before = session.env().version();
        let err = session.eval_str(r#"(def y (+ x "one"))"#).expect_err("type error");
        assert!(matches!(err, EvalError::Type(_)));
        let err = session.eval_str("(:: later Int) (def z later)").expect_err("unbound");
        insta::assert_snapshot!(err.to_string(), @"unbound var: user/later");
        let env = session.env();
        assert!(env.var(&FQSymbol::new(NS::user(), Symbol::new("y"))).is_none());
        assert!(env.var(&FQSymbol::new(NS::user(), Symbol::new("z"))).is_none());
        assert_eq!(env.version(), before + 1);
    }

    #[test]
    fn invoke_calls_compiled_globals() {
        let session = session();
        eval(&session, "(def (add3 a b c) (+ a (+ b c)))");
        let result = session.invoke("add3", vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(result, Ok(Value::Int(6)));
        let result = session.invoke("brj.core/count", vec![Value::Vector(vec![Value::Bool(true)])]);
        assert_eq!(result, Ok(Value::Int(1)));
    }

    #[test]
    fn invoke_reports_arity_and_unknown_vars() {
        let session = session();
        eval(&session, "(def (id x) x)");
        let err = session.invoke("id", vec![]).expect_err("arity");
        insta::assert_snapshot!(err.to_string(), @"arity mismatch calling user/id: expected 1 arguments, got 0");
        let err = session.invoke("nope", vec![]).expect_err("unknown");
        insta::assert_snapshot!(err.to_string(), @"no such var: nope");
    }

    #[test]
    fn ns_switches_the_current_namespace() {
        let session = session();
        eval(&session, "(def (square x) (* x x))");
        eval(&session, "(ns app {aliases {u user}})");
        assert_eq!(session.current_ns(), Ok(NS::new("app")));
        assert_eq!(eval(&session, "(u/square 7)"), "49");
        assert_eq!(session.invoke("u/square", vec![Value::Int(3)]), Ok(Value::Int(9)));
    }

    #[test]
    fn runaway_recursion_faults_and_the_worker_keeps_serving() {
        let session = session();
        eval(
            &session,
            "(:: sum-to (Fn Int Int))
             (def (sum-to n) (if (< n 1) 0 (+ n (sum-to (- n 1)))))",
        );
        let err = session.eval_str("(sum-to 10000000)").expect_err("overflow");
        insta::assert_snapshot!(err.to_string(), @"stack overflow");
        let err = session.invoke("sum-to", vec![Value::Int(10_000_000)]).expect_err("overflow");
        assert_eq!(err, EvalError::from(RuntimeError::StackOverflow));
        assert_eq!(eval(&session, "(sum-to 100)"), "5050");
    }

    #[test]
    fn stack_budget_is_clamped_to_the_worker_stack() {
        let mut config = SessionConfig {
            stack_size: 8 << 20,
            ..SessionConfig::default()
        };
        config.codegen.stack_budget = 1 << 30;
        let session = Session::new(config).expect("session");
        eval(
            &session,
            "(:: sum-to (Fn Int Int))
             (def (sum-to n) (if (< n 1) 0 (+ n (sum-to (- n 1)))))",
        );
        assert!(session.eval_str("(sum-to 10000000)").is_err());
        assert_eq!(eval(&session, "(sum-to 1000)"), "500500");
    }

    #[test]
    fn updates_from_many_threads_are_serialised() {
        let session = Arc::new(session());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let session = session.clone();
                thread::spawn(move || session.eval_str(&format!("(def v{i} {i})")).map(|_| ()))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().expect("join"), Ok(()));
        }
        let env = session.env();
        for i in 0..4 {
            assert!(env.var(&FQSymbol::new(NS::user(), Symbol::new(format!("v{i}")))).is_some());
        }
    }
}
