//! Scope resolution: turns read forms into untyped [`Expr`] trees.
//!
//! Bare symbols resolve to the innermost enclosing local of that name, then
//! through the [`Env`] (current namespace, its refers, `brj.core`). Every
//! binding site mints its own [`LocalVar`], so later stages never compare
//! locals by name.

mod error;
mod ns;
mod types;

use smol_str::SmolStr;

use brj_ast::{
    Constructor, ConstructorKind, DataType, Expr, ExprKind, FQSymbol, HostFnRef, LetBinding,
    LocalVar, QSymbol, Symbol, NS,
};
use brj_env::Env;
use brj_reader::{Form, FormKind, Range};
use brj_runtime::host_module;
use brj_types::{Type, TypeVar};

pub use error::ResolutionError;
pub use types::analyse_type;

use error::malformed;
use types::{is_type_var, Declaring, TypeAnalyser};

/// Analyses one top-level form read in namespace `ns`.
pub fn analyse(env: &Env, ns: &NS, form: &Form) -> Result<Expr<()>, ResolutionError> {
    let mut analyser = Analyser {
        env,
        ns,
        locals: Vec::new(),
    };
    analyser.analyse_top(form)
}

struct Analyser<'a> {
    env: &'a Env,
    ns: &'a NS,
    /// Innermost binding last.
    locals: Vec<(SmolStr, LocalVar)>,
}

const TOP_LEVEL_ONLY: &[&str] = &["def", "::", "defdata", "defj", "ns"];

fn node(range: Range, kind: ExprKind<()>) -> Expr<()> {
    Expr::new(range, (), kind)
}

impl<'a> Analyser<'a> {
    fn analyse_top(&mut self, form: &Form) -> Result<Expr<()>, ResolutionError> {
        if let FormKind::List(items) = &form.kind {
            if let Some((head, args)) = items.split_first() {
                match head.as_symbol() {
                    Some("def") => return self.analyse_def(args, form),
                    Some("::") => return self.analyse_type_def(args, form),
                    Some("defdata") => return self.analyse_defdata(args, form),
                    Some("defj") => return self.analyse_defj(args, form),
                    Some("ns") => {
                        let decl = ns::analyse_ns(self.env, args, form)?;
                        return Ok(node(form.range, ExprKind::Ns(decl)));
                    }
                    _ => {}
                }
            }
        }
        self.analyse_expr(form)
    }

    // ── Expressions ───────────────────────────────────────────────

    fn analyse_expr(&mut self, form: &Form) -> Result<Expr<()>, ResolutionError> {
        let range = form.range;
        let kind = match &form.kind {
            FormKind::Bool(b) => ExprKind::Bool(*b),
            FormKind::Int(n) => ExprKind::Int(*n),
            FormKind::Str(s) => ExprKind::Str(s.clone()),
            FormKind::Symbol(name) => self.analyse_symbol(name, form)?,
            FormKind::QSymbol(qualifier, name) => {
                let qsym = QSymbol {
                    qualifier: qualifier.clone(),
                    name: Symbol(name.clone()),
                };
                match self.env.resolve_qvar(self.ns, &qsym) {
                    Some(var) => ExprKind::Global(var.clone()),
                    None => return Err(unresolved(form)),
                }
            }
            FormKind::Vector(elems) => ExprKind::Vector(self.analyse_all(elems)?),
            FormKind::Set(elems) => ExprKind::Set(self.analyse_all(elems)?),
            FormKind::Map(entries) => ExprKind::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((self.analyse_expr(k)?, self.analyse_expr(v)?)))
                    .collect::<Result<_, ResolutionError>>()?,
            ),
            FormKind::List(items) => return self.analyse_list(items, form),
        };
        Ok(node(range, kind))
    }

    fn analyse_all(&mut self, forms: &[Form]) -> Result<Vec<Expr<()>>, ResolutionError> {
        forms.iter().map(|f| self.analyse_expr(f)).collect()
    }

    fn lookup_local(&self, name: &str) -> Option<&LocalVar> {
        self.locals
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, local)| local)
    }

    fn analyse_symbol(&self, name: &SmolStr, form: &Form) -> Result<ExprKind<()>, ResolutionError> {
        if let Some(local) = self.lookup_local(name) {
            return Ok(ExprKind::Local(local.clone()));
        }
        match self.env.resolve_var(self.ns, &Symbol(name.clone())) {
            Some(var) => Ok(ExprKind::Global(var.clone())),
            None => Err(unresolved(form)),
        }
    }

    fn analyse_list(&mut self, items: &[Form], form: &Form) -> Result<Expr<()>, ResolutionError> {
        let Some((head, args)) = items.split_first() else {
            return Err(malformed("cannot evaluate an empty list", form.range));
        };
        match head.as_symbol() {
            Some("let") => return self.analyse_let(args, form),
            Some("if") => return self.analyse_if(args, form),
            Some("fn") => return self.analyse_fn(args, form),
            Some(top) if TOP_LEVEL_ONLY.contains(&top) => {
                return Err(malformed(format!("{} is only allowed at top level", top), head.range));
            }
            _ => {}
        }

        let args = self.analyse_all(args)?;
        let callee = self.analyse_expr(head)?;
        let kind = match callee.kind {
            ExprKind::Global(var) => ExprKind::VarCall { var, args },
            _ => ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
        };
        Ok(node(form.range, kind))
    }

    fn analyse_let(&mut self, args: &[Form], form: &Form) -> Result<Expr<()>, ResolutionError> {
        let [bindings, body] = args else {
            return Err(malformed("let expects a binding vector and a body", form.range));
        };
        let FormKind::Vector(pairs) = &bindings.kind else {
            return Err(malformed(
                format!("let bindings must be a vector, got {}", bindings.describe()),
                bindings.range,
            ));
        };
        if pairs.len() % 2 != 0 {
            return Err(malformed(
                "let bindings must pair every name with an expression",
                bindings.range,
            ));
        }

        let depth = self.locals.len();
        let result = self.analyse_let_bindings(pairs, body, form.range);
        self.locals.truncate(depth);
        result
    }

    fn analyse_let_bindings(
        &mut self,
        pairs: &[Form],
        body: &Form,
        range: Range,
    ) -> Result<Expr<()>, ResolutionError> {
        let mut bindings = Vec::with_capacity(pairs.len() / 2);
        for pair in pairs.chunks(2) {
            let name = binding_name(&pair[0])?;
            let expr = self.analyse_expr(&pair[1])?;
            let local = LocalVar::new(name.clone());
            self.locals.push((name, local.clone()));
            bindings.push(LetBinding { local, expr });
        }
        let body = self.analyse_expr(body)?;
        Ok(node(
            range,
            ExprKind::Let {
                bindings,
                body: Box::new(body),
            },
        ))
    }

    fn analyse_if(&mut self, args: &[Form], form: &Form) -> Result<Expr<()>, ResolutionError> {
        let [test, then, otherwise] = args else {
            return Err(malformed("if expects a test, a then branch and an else branch", form.range));
        };
        let test = self.analyse_expr(test)?;
        let then = self.analyse_expr(then)?;
        let otherwise = self.analyse_expr(otherwise)?;
        Ok(node(
            form.range,
            ExprKind::If {
                test: Box::new(test),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
        ))
    }

    fn analyse_fn(&mut self, args: &[Form], form: &Form) -> Result<Expr<()>, ResolutionError> {
        let [params, body] = args else {
            return Err(malformed("fn expects a parameter list and a body", form.range));
        };
        let params = match &params.kind {
            FormKind::List(ps) | FormKind::Vector(ps) => ps,
            _ => {
                return Err(malformed(
                    format!("fn parameters must be a list, got {}", params.describe()),
                    params.range,
                ));
            }
        };
        self.analyse_fn_parts(params, body, form.range)
    }

    fn analyse_fn_parts(
        &mut self,
        params: &[Form],
        body: &Form,
        range: Range,
    ) -> Result<Expr<()>, ResolutionError> {
        let depth = self.locals.len();
        let mut locals = Vec::with_capacity(params.len());
        for p in params {
            let name = match binding_name(p) {
                Ok(name) => name,
                Err(err) => {
                    self.locals.truncate(depth);
                    return Err(err);
                }
            };
            let local = LocalVar::new(name.clone());
            self.locals.push((name, local.clone()));
            locals.push(local);
        }
        let body = self.analyse_expr(body);
        self.locals.truncate(depth);
        Ok(node(
            range,
            ExprKind::Fn {
                params: locals,
                body: Box::new(body?),
            },
        ))
    }

    // ── Top-level forms ──────────────────────────────────────────

    fn fq(&self, name: SmolStr) -> FQSymbol {
        FQSymbol::new(self.ns.clone(), Symbol(name))
    }

    fn analyse_def(&mut self, args: &[Form], form: &Form) -> Result<Expr<()>, ResolutionError> {
        let [target, body] = args else {
            return Err(malformed("def expects a name and a body", form.range));
        };
        let (sym, body) = match &target.kind {
            FormKind::Symbol(name) => (self.fq(name.clone()), self.analyse_expr(body)?),
            FormKind::List(sig) => {
                let Some((name, params)) = sig.split_first() else {
                    return Err(malformed("def signature needs a name", target.range));
                };
                let name = binding_name(name)?;
                (self.fq(name), self.analyse_fn_parts(params, body, form.range)?)
            }
            _ => {
                return Err(malformed(
                    format!("expected a name to define, got {}", target.describe()),
                    target.range,
                ));
            }
        };
        let declared = self.env.var(&sym).and_then(|var| var.declared_type.clone());
        Ok(node(
            form.range,
            ExprKind::Def {
                sym,
                declared,
                body: Box::new(body),
            },
        ))
    }

    fn analyse_type_def(&mut self, args: &[Form], form: &Form) -> Result<Expr<()>, ResolutionError> {
        let [name, ty] = args else {
            return Err(malformed(":: expects a name and a type", form.range));
        };
        let sym = self.fq(binding_name(name)?);
        let ty = analyse_type(self.env, self.ns, ty)?;
        Ok(node(form.range, ExprKind::TypeDef { sym, ty }))
    }

    /// `(defj name Module fn Type)`, where `Module` was imported by the
    /// current namespace and `Type` is a function type of the host
    /// function's arity.
    fn analyse_defj(&mut self, args: &[Form], form: &Form) -> Result<Expr<()>, ResolutionError> {
        let [name, module, function, ty] = args else {
            return Err(malformed(
                "defj expects a name, a host module, a function name and a type",
                form.range,
            ));
        };
        let sym = self.fq(binding_name(name)?);
        let module_sym = Symbol(binding_name(module)?);
        let Some(module_path) = self.env.resolve_import(self.ns, &module_sym) else {
            return Err(ResolutionError::UnknownHostModule {
                module: module_sym.to_string(),
                range: module.range,
            });
        };
        let host = host_module(&module_path.ns.0, &module_path.name.0).ok_or_else(|| {
            ResolutionError::UnknownHostModule {
                module: module_path.to_string(),
                range: module.range,
            }
        })?;
        let fn_name = Symbol(binding_name(function)?);
        let Some(host_fn) = host.function(&fn_name.0) else {
            return Err(ResolutionError::UnknownHostFn {
                module: module_path.clone(),
                name: fn_name,
                range: function.range,
            });
        };

        let ascribed = analyse_type(self.env, self.ns, ty)?;
        match &ascribed {
            Type::Fn(params, _) if params.len() == host_fn.arity => {}
            _ => {
                return Err(malformed(
                    format!(
                        "{}.{} takes {} arguments, defj needs a Fn type to match, got {}",
                        module_path,
                        fn_name,
                        host_fn.arity,
                        ascribed.pretty()
                    ),
                    ty.range,
                ));
            }
        }

        Ok(node(
            form.range,
            ExprKind::DefJ {
                sym,
                host: HostFnRef {
                    module: module_path.clone(),
                    name: fn_name,
                    arity: host_fn.arity,
                },
                ty: ascribed,
            },
        ))
    }

    fn analyse_defdata(&mut self, args: &[Form], form: &Form) -> Result<Expr<()>, ResolutionError> {
        let Some((header, constructor_forms)) = args.split_first() else {
            return Err(malformed("defdata expects a name and constructors", form.range));
        };
        let (name, params) = match &header.kind {
            FormKind::Symbol(name) => (name.clone(), Vec::new()),
            FormKind::List(items) => match items.split_first() {
                Some((name, params)) => (binding_name(name)?, type_params(params)?),
                None => return Err(malformed("defdata needs a type name", header.range)),
            },
            _ => {
                return Err(malformed(
                    format!("expected a data type name, got {}", header.describe()),
                    header.range,
                ));
            }
        };
        if is_type_var(&name) {
            return Err(malformed(
                format!("data type names must be capitalised: {}", name),
                header.range,
            ));
        }
        if constructor_forms.is_empty() {
            return Err(malformed(format!("{} has no constructors", name), form.range));
        }

        let sym = self.fq(name);
        let declaring = Declaring {
            sym: &sym,
            arity: params.len(),
        };
        let mut types = TypeAnalyser::closed(self.env, self.ns, &params, declaring);
        let mut constructors = Vec::with_capacity(constructor_forms.len());
        for c in constructor_forms {
            let constructor = match &c.kind {
                FormKind::Symbol(cname) => Constructor {
                    sym: FQSymbol::new(self.ns.clone(), Symbol(cname.clone())),
                    kind: ConstructorKind::Value,
                },
                FormKind::List(items) => {
                    let Some((cname, fields)) = items.split_first() else {
                        return Err(malformed("constructor needs a name", c.range));
                    };
                    let fields = fields
                        .iter()
                        .map(|f| types.analyse(f))
                        .collect::<Result<Vec<_>, _>>()?;
                    Constructor {
                        sym: FQSymbol::new(self.ns.clone(), Symbol(binding_name(cname)?)),
                        kind: ConstructorKind::Vector(fields),
                    }
                }
                _ => {
                    return Err(malformed(
                        format!("expected a constructor, got {}", c.describe()),
                        c.range,
                    ));
                }
            };
            if constructors.iter().any(|other: &Constructor| other.sym == constructor.sym) {
                return Err(malformed(format!("duplicate constructor {}", constructor.sym), c.range));
            }
            constructors.push(constructor);
        }

        Ok(node(
            form.range,
            ExprKind::DefData(DataType {
                sym: sym.clone(),
                type_vars: params.into_iter().map(|(_, v)| v).collect(),
                constructors,
            }),
        ))
    }
}

fn unresolved(form: &Form) -> ResolutionError {
    ResolutionError::Unresolved {
        sym: form.to_string(),
        range: form.range,
    }
}

fn binding_name(form: &Form) -> Result<SmolStr, ResolutionError> {
    match &form.kind {
        FormKind::Symbol(name) if name != "::" => Ok(name.clone()),
        _ => Err(malformed(
            format!("expected a symbol to bind, got {}", form.describe()),
            form.range,
        )),
    }
}

fn type_params(forms: &[Form]) -> Result<Vec<(SmolStr, TypeVar)>, ResolutionError> {
    let mut params: Vec<(SmolStr, TypeVar)> = Vec::with_capacity(forms.len());
    for f in forms {
        let name = binding_name(f)?;
        if !is_type_var(&name) {
            return Err(malformed(format!("type parameters must be lowercase: {}", name), f.range));
        }
        if params.iter().any(|(n, _)| *n == name) {
            return Err(malformed(format!("duplicate type parameter {}", name), f.range));
        }
        params.push((name, TypeVar::fresh()));
    }
    Ok(params)
}

#[cfg(test)]
mod tests;
