//! Hindley-Milner inference over analysed expressions.
//!
//! Inference is bottom-up. Each node returns its typed tree together with a
//! [`MonomorphicEnv`] of constraints on the locals it references but does not
//! bind; scope-closing nodes (`fn`, `let`) solve and discharge them.

mod mono;

use brj_ast::{Expr, ExprKind, FQSymbol, LetBinding, LocalVar, Var};
use brj_reader::Range;
use brj_types::{unify, Type, TypeEquation, TypeMapping, UnificationError};

pub use mono::MonomorphicEnv;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeError {
    #[error("[{range}] {source}")]
    Unification {
        source: UnificationError,
        range: Range,
    },

    #[error("[{range}] {sym} is declared as {} but its definition has type {}", .declared.pretty(), .inferred.pretty())]
    AscriptionMismatch {
        sym: FQSymbol,
        declared: Type,
        inferred: Type,
        range: Range,
    },
}

/// Infers a type for every node of a top-level expression.
pub fn infer(expr: &Expr<()>) -> Result<Expr<Type>, TypeError> {
    let typing = infer_in(expr, &LocalTypeEnv::default())?;
    if !typing.mono.is_empty() {
        log::warn!("top-level expression left {} local(s) unbound", typing.mono.iter().count());
    }
    log::trace!("inferred {}", typing.expr.ann.pretty());
    Ok(typing.expr)
}

struct Typing {
    mono: MonomorphicEnv,
    expr: Expr<Type>,
}

/// What a let-bound local stands for: its binding's type together with the
/// constraints that binding places on enclosing locals.
#[derive(Debug, Clone)]
struct LocalTyping {
    ty: Type,
    mono: MonomorphicEnv,
}

impl LocalTyping {
    /// Renames the type and its constraints with one shared fresh mapping.
    fn instantiate(&self) -> LocalTyping {
        let mut ftvs = self.ty.ftvs();
        self.mono.collect_ftvs(&mut ftvs);
        let mapping = TypeMapping::fresh_for(ftvs);
        LocalTyping {
            ty: self.ty.apply(&mapping),
            mono: self.mono.apply(&mapping),
        }
    }
}

type LocalTypeEnv = im::HashMap<LocalVar, LocalTyping>;

fn typed(range: Range, ty: Type, kind: ExprKind<Type>) -> Expr<Type> {
    Expr::new(range, ty, kind)
}

/// Solves the constraints of `monos` together with `equations`.
fn solve<'a>(
    range: Range,
    monos: impl IntoIterator<Item = &'a MonomorphicEnv>,
    equations: Vec<TypeEquation>,
) -> Result<(MonomorphicEnv, TypeMapping), TypeError> {
    let (mono, merged) = MonomorphicEnv::union(monos);
    let mapping = unify(equations.into_iter().chain(merged))
        .map_err(|source| TypeError::Unification { source, range })?;
    Ok((mono.apply(&mapping), mapping))
}

fn var_type(var: &Var) -> Type {
    match var.visible_type() {
        Some(ty) => ty.instantiate(),
        None => Type::fresh_var(),
    }
}

fn infer_all(exprs: &[Expr<()>], locals: &LocalTypeEnv) -> Result<Vec<Typing>, TypeError> {
    exprs.iter().map(|e| infer_in(e, locals)).collect()
}

/// Element-type inference shared by vector and set literals.
fn infer_elems(
    elems: &[Expr<()>],
    locals: &LocalTypeEnv,
    range: Range,
) -> Result<(MonomorphicEnv, Type, Vec<Expr<Type>>), TypeError> {
    let typings = infer_all(elems, locals)?;
    let elem = Type::fresh_var();
    let equations = typings
        .iter()
        .map(|t| TypeEquation::new(elem.clone(), t.expr.ann.clone()))
        .collect();
    let (mono, mapping) = solve(range, typings.iter().map(|t| &t.mono), equations)?;
    let elems = typings.iter().map(|t| t.expr.apply(&mapping)).collect();
    Ok((mono, elem.apply(&mapping), elems))
}

fn infer_in(expr: &Expr<()>, locals: &LocalTypeEnv) -> Result<Typing, TypeError> {
    let range = expr.range;
    let plain = |ty: Type, kind: ExprKind<Type>| Typing {
        mono: MonomorphicEnv::empty(),
        expr: typed(range, ty, kind),
    };

    Ok(match &expr.kind {
        ExprKind::Bool(b) => plain(Type::Bool, ExprKind::Bool(*b)),
        ExprKind::Str(s) => plain(Type::Str, ExprKind::Str(s.clone())),
        ExprKind::Int(n) => plain(Type::Int, ExprKind::Int(*n)),

        ExprKind::Vector(elems) => {
            let (mono, elem, elems) = infer_elems(elems, locals, range)?;
            Typing {
                mono,
                expr: typed(range, Type::vector(elem), ExprKind::Vector(elems)),
            }
        }
        ExprKind::Set(elems) => {
            let (mono, elem, elems) = infer_elems(elems, locals, range)?;
            Typing {
                mono,
                expr: typed(range, Type::set(elem), ExprKind::Set(elems)),
            }
        }
        ExprKind::Map(entries) => {
            let mut keys = Vec::with_capacity(entries.len());
            let mut values = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                keys.push(infer_in(k, locals)?);
                values.push(infer_in(v, locals)?);
            }
            let (key, value) = (Type::fresh_var(), Type::fresh_var());
            let equations = keys
                .iter()
                .map(|t| TypeEquation::new(key.clone(), t.expr.ann.clone()))
                .chain(
                    values
                        .iter()
                        .map(|t| TypeEquation::new(value.clone(), t.expr.ann.clone())),
                )
                .collect();
            let monos = keys.iter().chain(&values).map(|t| &t.mono);
            let (mono, mapping) = solve(range, monos, equations)?;
            let entries = keys
                .iter()
                .zip(&values)
                .map(|(k, v)| (k.expr.apply(&mapping), v.expr.apply(&mapping)))
                .collect();
            Typing {
                mono,
                expr: typed(
                    range,
                    Type::map(key.apply(&mapping), value.apply(&mapping)),
                    ExprKind::Map(entries),
                ),
            }
        }

        ExprKind::Call { callee, args } => {
            let callee = infer_in(callee, locals)?;
            let args = infer_all(args, locals)?;
            let ret = Type::fresh_var();
            let expected = Type::func(args.iter().map(|a| a.expr.ann.clone()).collect(), ret.clone());
            let equations = vec![TypeEquation::new(callee.expr.ann.clone(), expected)];
            let monos = std::iter::once(&callee.mono).chain(args.iter().map(|a| &a.mono));
            let (mono, mapping) = solve(range, monos, equations)?;
            Typing {
                mono,
                expr: typed(
                    range,
                    ret.apply(&mapping),
                    ExprKind::Call {
                        callee: Box::new(callee.expr.apply(&mapping)),
                        args: args.iter().map(|a| a.expr.apply(&mapping)).collect(),
                    },
                ),
            }
        }
        ExprKind::VarCall { var, args } => {
            let args = infer_all(args, locals)?;
            let ret = Type::fresh_var();
            let expected = Type::func(args.iter().map(|a| a.expr.ann.clone()).collect(), ret.clone());
            let equations = vec![TypeEquation::new(var_type(var), expected)];
            let (mono, mapping) = solve(range, args.iter().map(|a| &a.mono), equations)?;
            Typing {
                mono,
                expr: typed(
                    range,
                    ret.apply(&mapping),
                    ExprKind::VarCall {
                        var: var.clone(),
                        args: args.iter().map(|a| a.expr.apply(&mapping)).collect(),
                    },
                ),
            }
        }

        ExprKind::Let { bindings, body } => {
            let mut scope = locals.clone();
            let mut binding_monos = Vec::with_capacity(bindings.len());
            let mut typed_bindings = Vec::with_capacity(bindings.len());
            for binding in bindings {
                let typing = infer_in(&binding.expr, &scope)?;
                let mono = typing.mono.minus(&binding.local);
                scope.insert(
                    binding.local.clone(),
                    LocalTyping {
                        ty: typing.expr.ann.clone(),
                        mono: mono.clone(),
                    },
                );
                binding_monos.push(mono);
                typed_bindings.push((binding.local.clone(), typing.expr));
            }

            let body = infer_in(body, &scope)?;
            let monos = binding_monos.iter().chain(std::iter::once(&body.mono));
            let (mono, mapping) = solve(range, monos, Vec::new())?;
            let mono = mono.minus_all(bindings.iter().map(|b| &b.local));
            Typing {
                mono,
                expr: typed(
                    range,
                    body.expr.ann.apply(&mapping),
                    ExprKind::Let {
                        bindings: typed_bindings
                            .into_iter()
                            .map(|(local, expr)| LetBinding {
                                local,
                                expr: expr.apply(&mapping),
                            })
                            .collect(),
                        body: Box::new(body.expr.apply(&mapping)),
                    },
                ),
            }
        }

        ExprKind::If {
            test,
            then,
            otherwise,
        } => {
            let test = infer_in(test, locals)?;
            let then = infer_in(then, locals)?;
            let otherwise = infer_in(otherwise, locals)?;
            let result = Type::fresh_var();
            let equations = vec![
                TypeEquation::new(test.expr.ann.clone(), Type::Bool),
                TypeEquation::new(result.clone(), then.expr.ann.clone()),
                TypeEquation::new(result.clone(), otherwise.expr.ann.clone()),
            ];
            let (mono, mapping) = solve(range, [&test.mono, &then.mono, &otherwise.mono], equations)?;
            Typing {
                mono,
                expr: typed(
                    range,
                    result.apply(&mapping),
                    ExprKind::If {
                        test: Box::new(test.expr.apply(&mapping)),
                        then: Box::new(then.expr.apply(&mapping)),
                        otherwise: Box::new(otherwise.expr.apply(&mapping)),
                    },
                ),
            }
        }

        ExprKind::Local(local) => match locals.get(local) {
            Some(binding) => {
                let LocalTyping { ty, mono } = binding.instantiate();
                Typing {
                    mono,
                    expr: typed(range, ty, ExprKind::Local(local.clone())),
                }
            }
            None => {
                let ty = Type::fresh_var();
                Typing {
                    mono: MonomorphicEnv::singleton(local.clone(), ty.clone()),
                    expr: typed(range, ty, ExprKind::Local(local.clone())),
                }
            }
        },

        ExprKind::Global(var) => plain(var_type(var), ExprKind::Global(var.clone())),

        ExprKind::Fn { params, body } => {
            let body = infer_in(body, locals)?;
            let param_types = params
                .iter()
                .map(|p| body.mono.get(p).cloned().unwrap_or_else(Type::fresh_var))
                .collect();
            let ty = Type::func(param_types, body.expr.ann.clone());
            Typing {
                mono: body.mono.minus_all(params),
                expr: typed(
                    range,
                    ty,
                    ExprKind::Fn {
                        params: params.clone(),
                        body: Box::new(body.expr),
                    },
                ),
            }
        }

        ExprKind::Def {
            sym,
            declared,
            body,
        } => {
            let body = infer_in(body, locals)?;
            if let Some(declared) = declared {
                check_ascription(sym, declared, &body.expr.ann, range)?;
            }
            Typing {
                mono: body.mono,
                expr: typed(
                    range,
                    Type::EnvIo,
                    ExprKind::Def {
                        sym: sym.clone(),
                        declared: declared.clone(),
                        body: Box::new(body.expr),
                    },
                ),
            }
        }
        ExprKind::TypeDef { sym, ty } => plain(
            Type::EnvIo,
            ExprKind::TypeDef {
                sym: sym.clone(),
                ty: ty.clone(),
            },
        ),
        ExprKind::Ns(decl) => plain(Type::EnvIo, ExprKind::Ns(decl.clone())),
        ExprKind::DefData(data_type) => plain(Type::EnvIo, ExprKind::DefData(data_type.clone())),
        ExprKind::DefJ { sym, host, ty } => plain(
            Type::EnvIo,
            ExprKind::DefJ {
                sym: sym.clone(),
                host: host.clone(),
                ty: ty.clone(),
            },
        ),
    })
}

/// A declaration must be the inferred type or an instance of it.
fn check_ascription(sym: &FQSymbol, declared: &Type, inferred: &Type, range: Range) -> Result<(), TypeError> {
    if declared.subtype_of(inferred) {
        return Ok(());
    }
    Err(TypeError::AscriptionMismatch {
        sym: sym.clone(),
        declared: declared.clone(),
        inferred: inferred.clone(),
        range,
    })
}
