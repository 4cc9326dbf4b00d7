use std::sync::Arc;

use brj_analyser::analyse_type;
use brj_ast::{FQSymbol, Symbol, Var, VarKind, NS};
use brj_env::Env;
use brj_reader::read_all;
use brj_runtime::{builtins, VarCell};

use crate::CompileError;

/// An env holding `brj.core` with every builtin bound, plus the empty
/// `user` namespace.
///
/// The builtins are allocated on the calling thread's heap.
pub fn core_env() -> Result<Env, CompileError> {
    let core = NS::core();
    let mut env = Env::new();
    for builtin in builtins() {
        let forms = read_all(builtin.signature)
            .map_err(|e| CompileError::consistency(format!("signature of {}: {}", builtin.name, e)))?;
        let [form] = forms.as_slice() else {
            return Err(CompileError::consistency(format!(
                "signature of {} must be a single type form",
                builtin.name
            )));
        };
        let ty = analyse_type(&env, &core, form)
            .map_err(|e| CompileError::consistency(format!("signature of {}: {}", builtin.name, e)))?;

        let sym = FQSymbol::new(core.clone(), Symbol::new(builtin.name));
        let cell = Arc::new(VarCell::new(sym.to_string()));
        cell.set(builtin.to_word());
        let var = Var::new(sym, VarKind::Builtin { arity: builtin.arity }, cell).with_inferred(ty);
        env = env.with_var(var);
    }
    log::debug!("core env ready at v{}", env.version());
    Ok(env)
}
