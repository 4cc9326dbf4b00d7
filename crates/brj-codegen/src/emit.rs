//! Lowering typed expressions to Cranelift IR.
//!
//! Every value is a word. A [`Unit`] owns one JIT module and defines the
//! entry function for one top-level form plus every closure reachable from
//! it; closures are declared when their literal is lowered and defined
//! afterwards from a worklist.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use brj_ast::{closed_over_vars, Expr, ExprKind, LocalVar, Var};
use brj_runtime::{alloc_pinned, bool_word, fault_word, ConstructorLayout, Object, VarCell, Word};
use brj_types::Type;
use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{types, BlockArg, FuncRef, Function, InstBuilder, MemFlags, UserFuncName, Value};
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};

use crate::jit_helpers::{register_jit_symbols, word_signature, Helper, Helpers};
use crate::CompileError;

/// What closure conversion produced for one nested fn literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureInfo {
    pub name: String,
    pub params: Vec<String>,
    /// Captured locals, in slot order.
    pub captures: Vec<String>,
}

struct FnJob {
    id: FuncId,
    params: Vec<LocalVar>,
    captures: Vec<LocalVar>,
    body: Expr<Type>,
}

pub(crate) struct Unit {
    module: JITModule,
    helpers: Helpers,
    name: String,
    pending: Vec<FnJob>,
    closures: Vec<ClosureInfo>,
    /// Keyed by cell address, one entry however many sites read it.
    cells: HashMap<i64, Arc<VarCell>>,
    fn_count: usize,
}

/// What a finished unit leaves behind: code that must stay mapped and the
/// cells it reads.
pub(crate) struct Retained {
    pub module: JITModule,
    pub cells: Vec<Arc<VarCell>>,
    pub closures: Vec<ClosureInfo>,
}

impl Unit {
    pub(crate) fn new(isa: OwnedTargetIsa, name: impl Into<String>) -> Result<Self, CompileError> {
        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        register_jit_symbols(&mut builder);
        let mut module = JITModule::new(builder);
        let helpers = Helpers::declare(&mut module)?;
        Ok(Self {
            module,
            helpers,
            name: name.into(),
            pending: Vec::new(),
            closures: Vec::new(),
            cells: HashMap::new(),
            fn_count: 0,
        })
    }

    /// Declares a function taking the callee's own word plus `arity` parameters.
    fn declare_fn(&mut self, arity: usize) -> Result<(FuncId, String), CompileError> {
        self.fn_count += 1;
        let name = format!("{}_f{}", self.name, self.fn_count);
        let sig = word_signature(&self.module, arity + 1);
        let id = self
            .module
            .declare_function(&name, Linkage::Local, &sig)
            .map_err(|e| CompileError::backend(format!("declare fn '{}': {}", name, e)))?;
        Ok((id, name))
    }

    /// Defines `(fn params body)` with no captures, then every closure it needs.
    pub(crate) fn define_entry(&mut self, params: &[LocalVar], body: &Expr<Type>) -> Result<FuncId, CompileError> {
        let (id, _) = self.declare_fn(params.len())?;
        self.pending.push(FnJob {
            id,
            params: params.to_vec(),
            captures: Vec::new(),
            body: body.clone(),
        });
        while let Some(job) = self.pending.pop() {
            self.define_job(job)?;
        }
        Ok(id)
    }

    /// Defines a function building one instance of `layout` from its fields.
    pub(crate) fn define_constructor(&mut self, layout: &Arc<ConstructorLayout>) -> Result<FuncId, CompileError> {
        let (id, _) = self.declare_fn(layout.arity)?;
        let layout_addr = Arc::as_ptr(layout) as i64;
        self.define_with(id, layout.arity, |ctx, fields| {
            let layout = ctx.word(layout_addr);
            let variant = ctx.call_helper(Helper::VariantNew, &[layout]);
            for (idx, field) in fields.iter().enumerate() {
                let idx = ctx.word(idx as i64);
                ctx.call_helper(Helper::VariantSet, &[variant, idx, *field]);
            }
            Ok(variant)
        })?;
        Ok(id)
    }

    fn define_job(&mut self, job: FnJob) -> Result<(), CompileError> {
        let FnJob {
            id,
            params,
            captures,
            body,
        } = job;
        self.define_with(id, params.len(), |ctx, args| {
            for (local, value) in params.iter().zip(args) {
                ctx.locals.insert(local.clone(), *value);
            }
            let env = ctx.env_word;
            for (idx, local) in captures.iter().enumerate() {
                let idx = ctx.word(idx as i64);
                let value = ctx.call_helper(Helper::ClosureGet, &[env, idx]);
                ctx.locals.insert(local.clone(), value);
            }
            ctx.lower(&body)
        })
    }

    fn define_with(
        &mut self,
        id: FuncId,
        arity: usize,
        body: impl FnOnce(&mut FnCompileCtx<'_, '_>, &[Value]) -> Result<Value, CompileError>,
    ) -> Result<(), CompileError> {
        let sig = word_signature(&self.module, arity + 1);
        let mut func = Function::with_name_signature(UserFuncName::default(), sig);
        let mut fb_ctx = FunctionBuilderContext::new();
        let mut builder = FunctionBuilder::new(&mut func, &mut fb_ctx);

        let entry_block = builder.create_block();
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);
        builder.seal_block(entry_block);
        let block_params: Vec<Value> = builder.block_params(entry_block).to_vec();

        {
            let mut ctx = FnCompileCtx {
                builder: &mut builder,
                unit: self,
                env_word: block_params[0],
                locals: HashMap::new(),
                helper_refs: HashMap::new(),
            };
            let result = body(&mut ctx, &block_params[1..])?;
            ctx.builder.ins().return_(&[result]);
        }

        builder.seal_all_blocks();
        builder.finalize();

        let mut ctx = Context::for_function(func);
        self.module
            .define_function(id, &mut ctx)
            .map_err(|e| CompileError::backend(format!("define fn in {}: {}", self.name, e)))?;
        Ok(())
    }

    pub(crate) fn finalize(mut self) -> Result<Retained, CompileError> {
        self.module
            .finalize_definitions()
            .map_err(|e| CompileError::backend(format!("finalize {}: {}", self.name, e)))?;
        log::trace!(
            "finalized {}: {} functions, {} closures",
            self.name,
            self.fn_count,
            self.closures.len()
        );
        Ok(Retained {
            module: self.module,
            cells: self.cells.into_values().collect(),
            closures: self.closures,
        })
    }
}

impl Retained {
    pub(crate) fn code(&self, id: FuncId) -> *const u8 {
        self.module.get_finalized_function(id)
    }
}

// ── Per-function lowering ────────────────────────────────────────

pub(crate) struct FnCompileCtx<'a, 'b> {
    builder: &'a mut FunctionBuilder<'b>,
    unit: &'a mut Unit,
    /// The word of the FnObject being called; holds the capture slots.
    env_word: Value,
    locals: HashMap<LocalVar, Value>,
    helper_refs: HashMap<Helper, FuncRef>,
}

impl FnCompileCtx<'_, '_> {
    fn word(&mut self, word: Word) -> Value {
        self.builder.ins().iconst(types::I64, word)
    }

    fn call_helper(&mut self, helper: Helper, args: &[Value]) -> Value {
        let func_ref = match self.helper_refs.get(&helper) {
            Some(func_ref) => *func_ref,
            None => {
                let id = self.unit.helpers.id(helper);
                let func_ref = self.unit.module.declare_func_in_func(id, self.builder.func);
                self.helper_refs.insert(helper, func_ref);
                func_ref
            }
        };
        let call = self.builder.ins().call(func_ref, args);
        self.builder.inst_results(call)[0]
    }

    fn lookup(&self, local: &LocalVar) -> Result<Value, CompileError> {
        self.locals
            .get(local)
            .copied()
            .ok_or_else(|| CompileError::consistency(format!("local {}#{} is not in scope", local, local.id())))
    }

    fn lower_all(&mut self, exprs: &[Expr<Type>]) -> Result<Vec<Value>, CompileError> {
        exprs.iter().map(|e| self.lower(e)).collect()
    }

    pub(crate) fn lower(&mut self, expr: &Expr<Type>) -> Result<Value, CompileError> {
        match &expr.kind {
            ExprKind::Bool(b) => Ok(self.word(bool_word(*b))),
            ExprKind::Int(n) => Ok(self.word(alloc_pinned(Object::Int(*n)))),
            ExprKind::Str(s) => Ok(self.word(alloc_pinned(Object::Str(s.clone())))),
            ExprKind::Vector(elems) => {
                let mut acc = self.call_helper(Helper::VectorEmpty, &[]);
                for elem in elems {
                    let value = self.lower(elem)?;
                    acc = self.call_helper(Helper::VectorConj, &[acc, value]);
                }
                Ok(acc)
            }
            ExprKind::Set(elems) => {
                let mut acc = self.call_helper(Helper::SetEmpty, &[]);
                for elem in elems {
                    let value = self.lower(elem)?;
                    acc = self.call_helper(Helper::SetConj, &[acc, value]);
                }
                Ok(acc)
            }
            ExprKind::Map(entries) => {
                let mut acc = self.call_helper(Helper::MapEmpty, &[]);
                for (key, value) in entries {
                    let key = self.lower(key)?;
                    let value = self.lower(value)?;
                    acc = self.call_helper(Helper::MapAssoc, &[acc, key, value]);
                }
                Ok(acc)
            }
            ExprKind::Local(local) => self.lookup(local),
            ExprKind::Global(var) => Ok(self.load_global(var)),
            ExprKind::VarCall { var, args } => {
                if let Some(expected) = var.constructor_arity() {
                    if expected != args.len() {
                        return Err(CompileError::ConstructorArity {
                            sym: var.sym.clone(),
                            expected,
                            found: args.len(),
                            range: expr.range,
                        });
                    }
                }
                let callee = self.load_global(var);
                let args = self.lower_all(args)?;
                Ok(self.call_value(callee, &args))
            }
            ExprKind::Call { callee, args } => {
                let callee = self.lower(callee)?;
                let args = self.lower_all(args)?;
                Ok(self.call_value(callee, &args))
            }
            ExprKind::Let { bindings, body } => {
                for binding in bindings {
                    let value = self.lower(&binding.expr)?;
                    self.locals.insert(binding.local.clone(), value);
                }
                self.lower(body)
            }
            ExprKind::If {
                test,
                then,
                otherwise,
            } => self.lower_if(test, then, otherwise),
            ExprKind::Fn { params, body } => self.lower_closure(params, body),
            ExprKind::Def { sym, .. } | ExprKind::TypeDef { sym, .. } | ExprKind::DefJ { sym, .. } => {
                Err(CompileError::consistency(format!("definition of {} in expression position", sym)))
            }
            ExprKind::DefData(dt) => Err(CompileError::consistency(format!(
                "data type {} in expression position",
                dt.sym
            ))),
            ExprKind::Ns(decl) => Err(CompileError::consistency(format!(
                "ns {} in expression position",
                decl.ns
            ))),
        }
    }

    /// Reads the var's cell at the moment of use.
    fn load_global(&mut self, var: &Var) -> Value {
        self.unit
            .cells
            .entry(var.cell.address())
            .or_insert_with(|| var.cell.clone());
        let addr = self.word(var.cell.address());
        let word = self.builder.ins().load(types::I64, MemFlags::trusted(), addr, 0);

        let unbound_block = self.builder.create_block();
        let merge_block = self.builder.create_block();
        self.builder.append_block_param(merge_block, types::I64);
        self.builder
            .ins()
            .brif(word, merge_block, &[BlockArg::Value(word)], unbound_block, &[]);

        self.builder.switch_to_block(unbound_block);
        let fault = self.call_helper(Helper::Unbound, &[addr]);
        self.builder.ins().jump(merge_block, &[BlockArg::Value(fault)]);

        self.builder.switch_to_block(merge_block);
        self.builder.block_params(merge_block)[0]
    }

    /// Calls a function word; a callee that cannot be entered yields the fault word.
    fn call_value(&mut self, callee: Value, args: &[Value]) -> Value {
        let argc = self.word(args.len() as i64);
        let code = self.call_helper(Helper::FnEntry, &[callee, argc]);

        let call_block = self.builder.create_block();
        let fault_block = self.builder.create_block();
        let merge_block = self.builder.create_block();
        self.builder.append_block_param(merge_block, types::I64);
        self.builder.ins().brif(code, call_block, &[], fault_block, &[]);

        self.builder.switch_to_block(call_block);
        let sig = word_signature(&self.unit.module, args.len() + 1);
        let sig_ref = self.builder.import_signature(sig);
        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(callee);
        call_args.extend_from_slice(args);
        let call = self.builder.ins().call_indirect(sig_ref, code, &call_args);
        let result = self.builder.inst_results(call)[0];
        self.builder.ins().jump(merge_block, &[BlockArg::Value(result)]);

        self.builder.switch_to_block(fault_block);
        let fault = self.word(fault_word());
        self.builder.ins().jump(merge_block, &[BlockArg::Value(fault)]);

        self.builder.switch_to_block(merge_block);
        self.builder.block_params(merge_block)[0]
    }

    fn lower_if(&mut self, test: &Expr<Type>, then: &Expr<Type>, otherwise: &Expr<Type>) -> Result<Value, CompileError> {
        let test = self.lower(test)?;
        let true_word = self.word(bool_word(true));
        let cond = self.builder.ins().icmp(IntCC::Equal, test, true_word);

        let then_block = self.builder.create_block();
        let else_block = self.builder.create_block();
        let merge_block = self.builder.create_block();
        self.builder.append_block_param(merge_block, types::I64);
        self.builder.ins().brif(cond, then_block, &[], else_block, &[]);

        self.builder.switch_to_block(then_block);
        let then_val = self.lower(then)?;
        self.builder.ins().jump(merge_block, &[BlockArg::Value(then_val)]);

        self.builder.switch_to_block(else_block);
        let else_val = self.lower(otherwise)?;
        self.builder.ins().jump(merge_block, &[BlockArg::Value(else_val)]);

        self.builder.switch_to_block(merge_block);
        Ok(self.builder.block_params(merge_block)[0])
    }

    /// Closure conversion: captures get one slot each, filled here from the
    /// current bindings; the body is defined later from the unit's worklist.
    fn lower_closure(&mut self, params: &[LocalVar], body: &Expr<Type>) -> Result<Value, CompileError> {
        let bound: BTreeSet<LocalVar> = params.iter().cloned().collect();
        let captures: Vec<LocalVar> = closed_over_vars(&bound, body).into_iter().collect();
        let captured = captures
            .iter()
            .map(|local| self.lookup(local))
            .collect::<Result<Vec<_>, _>>()?;

        let (id, name) = self.unit.declare_fn(params.len())?;
        self.unit.closures.push(ClosureInfo {
            name,
            params: params.iter().map(|p| p.name().to_string()).collect(),
            captures: captures.iter().map(|c| c.name().to_string()).collect(),
        });
        self.unit.pending.push(FnJob {
            id,
            params: params.to_vec(),
            captures,
            body: body.clone(),
        });

        let func_ref = self.unit.module.declare_func_in_func(id, self.builder.func);
        let code = self.builder.ins().func_addr(types::I64, func_ref);
        let arity = self.word(params.len() as i64);
        let slots = self.word(captured.len() as i64);
        let closure = self.call_helper(Helper::ClosureNew, &[code, arity, slots]);
        for (idx, value) in captured.into_iter().enumerate() {
            let idx = self.word(idx as i64);
            self.call_helper(Helper::ClosureSet, &[closure, idx, value]);
        }
        Ok(closure)
    }
}
