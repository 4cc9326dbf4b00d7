use cranelift_codegen::ir::{types, AbiParam, Signature};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};

use crate::CompileError;

/// Runtime entry points generated code imports. Every parameter and result
/// is a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Helper {
    VectorEmpty,
    VectorConj,
    SetEmpty,
    SetConj,
    MapEmpty,
    MapAssoc,
    ClosureNew,
    ClosureSet,
    ClosureGet,
    FnEntry,
    VariantNew,
    VariantSet,
    Unbound,
}

impl Helper {
    const ALL: [Helper; 13] = [
        Helper::VectorEmpty,
        Helper::VectorConj,
        Helper::SetEmpty,
        Helper::SetConj,
        Helper::MapEmpty,
        Helper::MapAssoc,
        Helper::ClosureNew,
        Helper::ClosureSet,
        Helper::ClosureGet,
        Helper::FnEntry,
        Helper::VariantNew,
        Helper::VariantSet,
        Helper::Unbound,
    ];

    fn symbol(self) -> &'static str {
        match self {
            Helper::VectorEmpty => "brj_vector_empty",
            Helper::VectorConj => "brj_vector_conj",
            Helper::SetEmpty => "brj_set_empty",
            Helper::SetConj => "brj_set_conj",
            Helper::MapEmpty => "brj_map_empty",
            Helper::MapAssoc => "brj_map_assoc",
            Helper::ClosureNew => "brj_closure_new",
            Helper::ClosureSet => "brj_closure_set",
            Helper::ClosureGet => "brj_closure_get",
            Helper::FnEntry => "brj_fn_entry",
            Helper::VariantNew => "brj_variant_new",
            Helper::VariantSet => "brj_variant_set",
            Helper::Unbound => "brj_unbound",
        }
    }

    fn arity(self) -> usize {
        match self {
            Helper::VectorEmpty | Helper::SetEmpty | Helper::MapEmpty => 0,
            Helper::VariantNew | Helper::Unbound => 1,
            Helper::VectorConj | Helper::SetConj | Helper::ClosureGet | Helper::FnEntry => 2,
            Helper::MapAssoc | Helper::ClosureNew | Helper::ClosureSet | Helper::VariantSet => 3,
        }
    }
}

/// Registers every runtime symbol on a JITBuilder.
pub(crate) fn register_jit_symbols(builder: &mut JITBuilder) {
    for (name, ptr) in brj_runtime::symbols() {
        builder.symbol(name, ptr);
    }
}

/// `arity` words in, one word out.
pub(crate) fn word_signature(module: &JITModule, arity: usize) -> Signature {
    let mut sig = module.make_signature();
    for _ in 0..arity {
        sig.params.push(AbiParam::new(types::I64));
    }
    sig.returns.push(AbiParam::new(types::I64));
    sig
}

/// The helpers as imported into one module.
pub(crate) struct Helpers {
    ids: Vec<FuncId>,
}

impl Helpers {
    pub(crate) fn declare(module: &mut JITModule) -> Result<Self, CompileError> {
        let mut ids = Vec::with_capacity(Helper::ALL.len());
        for helper in Helper::ALL {
            let sig = word_signature(module, helper.arity());
            let id = module
                .declare_function(helper.symbol(), Linkage::Import, &sig)
                .map_err(|e| CompileError::backend(format!("declare {}: {}", helper.symbol(), e)))?;
            ids.push(id);
        }
        Ok(Self { ids })
    }

    pub(crate) fn id(&self, helper: Helper) -> FuncId {
        self.ids[helper as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_helper_is_exported_by_the_runtime() {
        let exported: Vec<&str> = brj_runtime::symbols().into_iter().map(|(name, _)| name).collect();
        for helper in Helper::ALL {
            assert!(exported.contains(&helper.symbol()), "{} is not exported", helper.symbol());
        }
        assert_eq!(exported.len(), Helper::ALL.len());
    }
}
