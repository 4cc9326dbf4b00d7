use std::sync::Arc;

use brj_analyser::analyse;
use brj_ast::{Expr, ExprKind, Var, VarKind, NS};
use brj_codegen::{core_env, EvalError, Outcome};
use brj_env::Env;
use brj_reader::{read_all, Form};
use brj_runtime::VarCell;
use brj_types::Type;
use brj_typeck::infer;

/// Resolves and type-checks forms without generating or running code.
///
/// Definitions extend the env with vars whose cells stay unbound, so later
/// forms see their names and types exactly as a run would.
pub struct Checker {
    env: Env,
    ns: NS,
}

impl Checker {
    pub fn new() -> Result<Self, EvalError> {
        Ok(Self {
            env: core_env()?,
            ns: NS::user(),
        })
    }

    /// One summary line per form.
    pub fn check_str(&mut self, source: &str) -> Result<Vec<String>, EvalError> {
        let forms = read_all(source)?;
        forms.iter().map(|form| self.check_form(form)).collect()
    }

    pub fn check_form(&mut self, form: &Form) -> Result<String, EvalError> {
        let expr = analyse(&self.env, &self.ns, form)?;
        let typed = infer(&expr)?;
        let (env, line) = self.declare(&typed, form);
        self.env = env;
        Ok(line)
    }

    fn declare(&mut self, typed: &Expr<Type>, form: &Form) -> (Env, String) {
        match &typed.kind {
            ExprKind::Def { sym, declared, body } => {
                let kind = match &body.kind {
                    ExprKind::Fn { params, .. } => VarKind::Fn { arity: params.len() },
                    _ => VarKind::Value,
                };
                let cell = self
                    .env
                    .var(sym)
                    .map(|var| var.cell.clone())
                    .unwrap_or_else(|| Arc::new(VarCell::new(sym.to_string())));
                let var = Var::new(sym.clone(), kind, cell)
                    .with_declared(declared.clone())
                    .with_inferred(body.ann.clone());
                let ty = declared.clone().unwrap_or_else(|| body.ann.clone());
                let outcome = Outcome::Defined { sym: sym.clone(), ty };
                (self.env.with_var(var), outcome.to_string())
            }
            ExprKind::TypeDef { sym, ty } => {
                let outcome = Outcome::Declared {
                    sym: sym.clone(),
                    ty: ty.clone(),
                };
                (self.env.with_var(Var::declared(sym.clone(), ty.clone())), outcome.to_string())
            }
            ExprKind::DefData(dt) => {
                let vars = dt.constructors.iter().map(|constructor| {
                    let kind = VarKind::Constructor {
                        data_type: dt.sym.clone(),
                        arity: constructor.arity(),
                    };
                    let cell = Arc::new(VarCell::new(constructor.sym.to_string()));
                    Var::new(constructor.sym.clone(), kind, cell).with_inferred(dt.constructor_type(constructor))
                });
                let env = self.env.with_data_type(dt.clone(), vars);
                let outcome = Outcome::DataType {
                    sym: dt.sym.clone(),
                    constructors: dt.constructors.iter().map(|c| c.sym.clone()).collect(),
                };
                (env, outcome.to_string())
            }
            ExprKind::DefJ { sym, host, ty } => {
                let cell = Arc::new(VarCell::new(sym.to_string()));
                let var = Var::new(sym.clone(), VarKind::Host { arity: host.arity }, cell).with_declared(Some(ty.clone()));
                let outcome = Outcome::Defined {
                    sym: sym.clone(),
                    ty: ty.clone(),
                };
                (self.env.with_var(var), outcome.to_string())
            }
            ExprKind::Ns(decl) => {
                self.ns = decl.ns.clone();
                (self.env.with_ns(decl), Outcome::Ns(decl.ns.clone()).to_string())
            }
            _ => (self.env.clone(), format!("{} : {}", form, typed.ann.pretty())),
        }
    }
}
