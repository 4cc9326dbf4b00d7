//! Cranelift JIT back end and the single-worker session that drives the
//! whole pipeline.
//!
//! [`Compiler::compile`] takes one typed top-level expression and returns the
//! env it produces together with what it evaluated or defined. Each call
//! builds a fresh JIT module; earlier modules stay mapped because code
//! compiled from them is still reachable through link cells.
//!
//! Heap objects are collected between entries, never while generated code
//! is on the stack, with every cell the compiler has linked or bound as the
//! roots.

mod config;
mod core_ns;
mod emit;
mod error;
mod jit_helpers;
mod session;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use brj_ast::{DataType, Expr, ExprKind, FQSymbol, HostFnRef, LocalVar, Var, VarKind, NS};
use brj_env::Env;
use brj_runtime::{
    alloc, brj_fn_entry, collect, heap_size, host_module, should_collect, take_fault, ConstructorLayout, DataLayout, FnObject,
    Object, RuntimeError, StackGuard, Value, VarCell, VariantObject, Word,
};
use brj_types::Type;
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_jit::JITModule;
use cranelift_module::FuncId;

pub use crate::config::{CodegenConfig, OptLevel, SessionConfig};
pub use crate::core_ns::core_env;
pub use crate::emit::ClosureInfo;
pub use crate::error::{CompileError, EvalError};
pub use crate::session::Session;

use crate::emit::{Retained, Unit};

fn make_isa(config: &CodegenConfig) -> Result<OwnedTargetIsa, CompileError> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("opt_level", config.opt_level.as_setting())
        .map_err(|e| CompileError::backend(format!("setting opt_level: {}", e)))?;
    flag_builder
        .set("enable_verifier", if config.verify { "true" } else { "false" })
        .map_err(|e| CompileError::backend(format!("setting enable_verifier: {}", e)))?;

    let isa_builder =
        cranelift_native::builder().map_err(|e| CompileError::backend(format!("native ISA: {}", e)))?;

    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| CompileError::backend(format!("ISA finish: {}", e)))
}

// ── Results ──────────────────────────────────────────────────────

/// What one top-level form did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value { value: Value, ty: Type },
    Defined { sym: FQSymbol, ty: Type },
    Declared { sym: FQSymbol, ty: Type },
    DataType { sym: FQSymbol, constructors: Vec<FQSymbol> },
    Ns(NS),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Value { value, .. } => write!(f, "{}", value),
            Outcome::Defined { sym, ty } => write!(f, "{} : {}", sym, ty.pretty()),
            Outcome::Declared { sym, ty } => write!(f, "(:: {} {})", sym, ty.pretty()),
            Outcome::DataType { sym, constructors } => {
                write!(f, "{}", sym)?;
                for constructor in constructors {
                    write!(f, " {}", constructor.name)?;
                }
                Ok(())
            }
            Outcome::Ns(ns) => write!(f, "ns {}", ns),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Compiled {
    pub env: Env,
    pub outcome: Outcome,
    /// Closures generated while compiling this form, in declaration order.
    pub closures: Vec<ClosureInfo>,
}

// ── Compiler ─────────────────────────────────────────────────────

/// Owns all generated code. Compiled code and the heap objects it embeds
/// belong to the thread that created the compiler.
pub struct Compiler {
    config: CodegenConfig,
    isa: OwnedTargetIsa,
    _old_modules: Vec<JITModule>,
    /// Every cell generated code reads or the compiler bound, by address.
    /// The words they hold are the collector's roots.
    cells: HashMap<i64, Arc<VarCell>>,
    _layouts: Vec<Arc<ConstructorLayout>>,
    units: usize,
}

impl Compiler {
    pub fn new(config: CodegenConfig) -> Result<Self, CompileError> {
        let isa = make_isa(&config)?;
        Ok(Self {
            config,
            isa,
            _old_modules: Vec::new(),
            cells: HashMap::new(),
            _layouts: Vec::new(),
            units: 0,
        })
    }

    pub fn config(&self) -> &CodegenConfig {
        &self.config
    }

    pub fn compile(&mut self, env: &Env, expr: &Expr<Type>) -> Result<Compiled, CompileError> {
        let compiled = self.compile_form(env, expr);
        self.maybe_collect();
        compiled
    }

    fn compile_form(&mut self, env: &Env, expr: &Expr<Type>) -> Result<Compiled, CompileError> {
        match &expr.kind {
            ExprKind::Def { sym, declared, body } => self.compile_def(env, sym, declared.as_ref(), body),
            ExprKind::TypeDef { sym, ty } => Ok(Compiled {
                env: env.with_var(declare(env, sym, ty)),
                outcome: Outcome::Declared {
                    sym: sym.clone(),
                    ty: ty.clone(),
                },
                closures: Vec::new(),
            }),
            ExprKind::DefData(dt) => self.compile_data(env, dt),
            ExprKind::DefJ { sym, host, ty } => self.compile_defj(env, sym, host, ty),
            ExprKind::Ns(decl) => Ok(Compiled {
                env: env.with_ns(decl),
                outcome: Outcome::Ns(decl.ns.clone()),
                closures: Vec::new(),
            }),
            _ => {
                let (word, closures) = self.run_thunk(expr)?;
                Ok(Compiled {
                    env: env.clone(),
                    outcome: Outcome::Value {
                        value: Value::decode(word)?,
                        ty: expr.ann.clone(),
                    },
                    closures,
                })
            }
        }
    }

    fn unit(&mut self) -> Result<Unit, CompileError> {
        self.units += 1;
        Unit::new(self.isa.clone(), format!("unit{}", self.units))
    }

    fn retain(&mut self, retained: Retained) -> Vec<ClosureInfo> {
        let Retained {
            module,
            cells,
            closures,
        } = retained;
        self._old_modules.push(module);
        for cell in cells {
            self.track(cell);
        }
        closures
    }

    fn track(&mut self, cell: Arc<VarCell>) {
        self.cells.entry(cell.address()).or_insert(cell);
    }

    /// Collects the heap if it has grown enough since the last collection.
    pub fn maybe_collect(&mut self) {
        if should_collect() {
            self.collect_garbage();
        }
    }

    /// Frees every heap object no cell can reach. Returns how many were freed.
    pub fn collect_garbage(&mut self) -> usize {
        let roots: Vec<Word> = self.cells.values().filter_map(|cell| cell.get()).collect();
        let freed = unsafe { collect(roots) };
        log::debug!("{} heap objects live after collection", heap_size());
        freed
    }

    /// Compiles `(fn params body)` as a standalone entry and returns its code.
    fn compile_entry(&mut self, params: &[LocalVar], body: &Expr<Type>) -> Result<(*const u8, Vec<ClosureInfo>), CompileError> {
        let mut unit = self.unit()?;
        let id = unit.define_entry(params, body)?;
        let retained = unit.finalize()?;
        let code = retained.code(id);
        let closures = self.retain(retained);
        if !closures.is_empty() {
            log::debug!("converted {} closures", closures.len());
        }
        Ok((code, closures))
    }

    /// Runs `expr` once and returns the word it produced.
    fn run_thunk(&mut self, expr: &Expr<Type>) -> Result<(Word, Vec<ClosureInfo>), CompileError> {
        let (code, closures) = self.compile_entry(&[], expr)?;
        let entry: extern "C" fn(Word) -> Word = unsafe { std::mem::transmute(code) };
        take_fault();
        let word = {
            let _guard = StackGuard::enter(self.config.stack_budget);
            entry(0)
        };
        match take_fault() {
            Some(err) => Err(err.into()),
            None => Ok((word, closures)),
        }
    }

    fn compile_def(
        &mut self,
        env: &Env,
        sym: &FQSymbol,
        declared: Option<&Type>,
        body: &Expr<Type>,
    ) -> Result<Compiled, CompileError> {
        let ty = declared.unwrap_or(&body.ann).clone();
        let (word, kind, closures) = match &body.kind {
            ExprKind::Fn { params, body: fn_body } => {
                let (code, closures) = self.compile_entry(params, fn_body)?;
                let word = alloc(Object::Fn(FnObject {
                    name: sym.to_string().into(),
                    code,
                    arity: params.len(),
                    captures: Box::new([]),
                }));
                (word, VarKind::Fn { arity: params.len() }, closures)
            }
            _ => {
                let (word, closures) = self.run_thunk(body)?;
                (word, VarKind::Value, closures)
            }
        };

        let cell = link_cell(env, sym, &ty);
        cell.set(word);
        self.track(cell.clone());
        let var = Var::new(sym.clone(), kind, cell)
            .with_declared(declared.cloned())
            .with_inferred(body.ann.clone());
        Ok(Compiled {
            env: env.with_var(var),
            outcome: Outcome::Defined { sym: sym.clone(), ty },
            closures,
        })
    }

    /// Binds `sym` straight to the host function's code; no unit is built.
    fn compile_defj(&mut self, env: &Env, sym: &FQSymbol, host: &HostFnRef, ty: &Type) -> Result<Compiled, CompileError> {
        let module = host_module(&host.module.ns.0, &host.module.name.0)
            .ok_or_else(|| CompileError::consistency(format!("no host module {}", host.module)))?;
        let host_fn = module
            .function(&host.name.0)
            .filter(|f| f.arity == host.arity)
            .ok_or_else(|| CompileError::consistency(format!("no host function {} of {} arguments", host, host.arity)))?;

        let cell = link_cell(env, sym, ty);
        cell.set(host_fn.to_word(&sym.to_string()));
        self.track(cell.clone());
        log::debug!("bound {} to host function {}", sym, host);
        let var = Var::new(sym.clone(), VarKind::Host { arity: host.arity }, cell).with_declared(Some(ty.clone()));
        Ok(Compiled {
            env: env.with_var(var),
            outcome: Outcome::Defined {
                sym: sym.clone(),
                ty: ty.clone(),
            },
            closures: Vec::new(),
        })
    }

    fn compile_data(&mut self, env: &Env, dt: &DataType) -> Result<Compiled, CompileError> {
        let data = Arc::new(DataLayout {
            name: dt.sym.type_name(),
        });

        let mut unit = if dt.constructors.iter().any(|c| c.arity() > 0) {
            Some(self.unit()?)
        } else {
            None
        };
        let mut shapes: Vec<(Arc<ConstructorLayout>, Option<FuncId>)> = Vec::with_capacity(dt.constructors.len());
        for (tag, constructor) in dt.constructors.iter().enumerate() {
            let layout = Arc::new(ConstructorLayout {
                data_type: data.clone(),
                name: constructor.sym.name.0.clone(),
                tag,
                arity: constructor.arity(),
            });
            let id = match unit.as_mut() {
                Some(unit) if layout.arity > 0 => Some(unit.define_constructor(&layout)?),
                _ => None,
            };
            shapes.push((layout, id));
        }
        let retained = match unit {
            Some(unit) => Some(unit.finalize()?),
            None => None,
        };

        let mut vars = Vec::with_capacity(shapes.len());
        for (constructor, (layout, id)) in dt.constructors.iter().zip(&shapes) {
            let word = match (id, &retained) {
                (Some(id), Some(retained)) => alloc(Object::Fn(FnObject {
                    name: constructor.sym.name.0.clone(),
                    code: retained.code(*id),
                    arity: layout.arity,
                    captures: Box::new([]),
                })),
                (None, _) => alloc(Object::Variant(VariantObject {
                    constructor: layout.clone(),
                    fields: Box::new([]),
                })),
                (Some(_), None) => {
                    return Err(CompileError::consistency(format!(
                        "constructor {} has no compiled unit",
                        constructor.sym
                    )));
                }
            };
            let ty = dt.constructor_type(constructor);
            let cell = link_cell(env, &constructor.sym, &ty);
            cell.set(word);
            self.track(cell.clone());
            let kind = VarKind::Constructor {
                data_type: dt.sym.clone(),
                arity: layout.arity,
            };
            vars.push(Var::new(constructor.sym.clone(), kind, cell).with_inferred(ty));
        }

        if let Some(retained) = retained {
            self.retain(retained);
        }
        self._layouts.extend(shapes.into_iter().map(|(layout, _)| layout));

        Ok(Compiled {
            env: env.with_data_type(dt.clone(), vars),
            outcome: Outcome::DataType {
                sym: dt.sym.clone(),
                constructors: dt.constructors.iter().map(|c| c.sym.clone()).collect(),
            },
            closures: Vec::new(),
        })
    }
}

/// The cell a (re)definition of `sym` at type `ty` links through: the
/// existing one when the visible type is unchanged up to renaming, else a
/// fresh one so code compiled against the old type keeps the old artifact.
fn link_cell(env: &Env, sym: &FQSymbol, ty: &Type) -> Arc<VarCell> {
    match env.var(sym) {
        Some(existing) if existing.visible_type().is_some_and(|old| old.alpha_equivalent(ty)) => {
            existing.cell.clone()
        }
        Some(_) => {
            log::debug!("{} changed type, linking it through a fresh cell", sym);
            Arc::new(VarCell::new(sym.to_string()))
        }
        None => Arc::new(VarCell::new(sym.to_string())),
    }
}

fn declare(env: &Env, sym: &FQSymbol, ty: &Type) -> Var {
    match env.var(sym) {
        Some(existing) if existing.visible_type().is_some_and(|old| old.alpha_equivalent(ty)) => {
            existing.clone().with_declared(Some(ty.clone()))
        }
        _ => Var::declared(sym.clone(), ty.clone()),
    }
}

// ── Host calls ───────────────────────────────────────────────────

impl Compiler {
    /// Calls the function bound to `var` with host arguments.
    ///
    /// `var` must have been compiled by this compiler.
    pub fn invoke(&mut self, var: &Var, args: &[Value]) -> Result<Value, CompileError> {
        let result = self.call_var(var, args);
        self.maybe_collect();
        result
    }

    fn call_var(&mut self, var: &Var, args: &[Value]) -> Result<Value, CompileError> {
        let callee = var
            .cell
            .get()
            .ok_or_else(|| RuntimeError::UnboundVar(var.cell.name().clone()))?;
        let args = args.iter().map(Value::encode).collect::<Result<Vec<_>, _>>()?;

        take_fault();
        let result = {
            let _guard = StackGuard::enter(self.config.stack_budget);
            let code = brj_fn_entry(callee, args.len() as i64);
            if code == 0 {
                return Err(take_fault().unwrap_or(RuntimeError::Escaped).into());
            }
            unsafe { call_code(code as *const u8, callee, &args) }?
        };
        match take_fault() {
            Some(err) => Err(err.into()),
            None => Ok(Value::decode(result)?),
        }
    }
}

/// # Safety
///
/// `code` must be the entry of a function word taking `args.len()` arguments.
unsafe fn call_code(code: *const u8, env: Word, args: &[Word]) -> Result<Word, CompileError> {
    type F0 = extern "C" fn(Word) -> Word;
    type F1 = extern "C" fn(Word, Word) -> Word;
    type F2 = extern "C" fn(Word, Word, Word) -> Word;
    type F3 = extern "C" fn(Word, Word, Word, Word) -> Word;
    type F4 = extern "C" fn(Word, Word, Word, Word, Word) -> Word;
    type F5 = extern "C" fn(Word, Word, Word, Word, Word, Word) -> Word;
    type F6 = extern "C" fn(Word, Word, Word, Word, Word, Word, Word) -> Word;

    unsafe {
        Ok(match *args {
            [] => std::mem::transmute::<*const u8, F0>(code)(env),
            [a] => std::mem::transmute::<*const u8, F1>(code)(env, a),
            [a, b] => std::mem::transmute::<*const u8, F2>(code)(env, a, b),
            [a, b, c] => std::mem::transmute::<*const u8, F3>(code)(env, a, b, c),
            [a, b, c, d] => std::mem::transmute::<*const u8, F4>(code)(env, a, b, c, d),
            [a, b, c, d, e] => std::mem::transmute::<*const u8, F5>(code)(env, a, b, c, d, e),
            [a, b, c, d, e, f] => std::mem::transmute::<*const u8, F6>(code)(env, a, b, c, d, e, f),
            _ => {
                return Err(CompileError::consistency(format!(
                    "host calls take at most 6 arguments, got {}",
                    args.len()
                )));
            }
        })
    }
}

#[cfg(test)]
mod tests;
