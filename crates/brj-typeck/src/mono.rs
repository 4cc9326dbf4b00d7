use std::collections::BTreeSet;

use brj_ast::LocalVar;
use brj_types::{Type, TypeEquation, TypeMapping, TypeVar};

/// Constraints on locals that are referenced but not yet bound: each maps to
/// the type its uses require.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonomorphicEnv {
    typings: im::HashMap<LocalVar, Type>,
}

impl MonomorphicEnv {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn singleton(local: LocalVar, ty: Type) -> Self {
        Self {
            typings: im::HashMap::unit(local, ty),
        }
    }

    pub fn get(&self, local: &LocalVar) -> Option<&Type> {
        self.typings.get(local)
    }

    pub fn is_empty(&self) -> bool {
        self.typings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LocalVar, &Type)> {
        self.typings.iter()
    }

    pub fn minus(&self, local: &LocalVar) -> Self {
        Self {
            typings: self.typings.without(local),
        }
    }

    pub fn minus_all<'a>(&self, locals: impl IntoIterator<Item = &'a LocalVar>) -> Self {
        let mut typings = self.typings.clone();
        for local in locals {
            typings.remove(local);
        }
        Self { typings }
    }

    pub fn apply(&self, mapping: &TypeMapping) -> Self {
        if mapping.is_empty() {
            return self.clone();
        }
        Self {
            typings: self
                .typings
                .iter()
                .map(|(local, ty)| (local.clone(), ty.apply(mapping)))
                .collect(),
        }
    }

    /// Every free type variable mentioned by a constraint.
    pub fn collect_ftvs(&self, acc: &mut BTreeSet<TypeVar>) {
        for ty in self.typings.values() {
            ty.collect_ftvs(acc);
        }
    }

    /// Merges `envs` into one. A local constrained in more than one env gets a
    /// fresh variable plus one equation per constraint; solving those makes
    /// the constraints agree or fails.
    pub fn union<'a>(envs: impl IntoIterator<Item = &'a MonomorphicEnv>) -> (MonomorphicEnv, Vec<TypeEquation>) {
        let mut seen: im::HashMap<LocalVar, Vec<Type>> = im::HashMap::new();
        for env in envs {
            for (local, ty) in env.typings.iter() {
                seen.entry(local.clone()).or_insert_with(Vec::new).push(ty.clone());
            }
        }

        let mut typings = im::HashMap::new();
        let mut equations = Vec::new();
        for (local, mut types) in seen {
            if types.len() == 1 {
                typings.insert(local, types.remove(0));
                continue;
            }
            let var = Type::fresh_var();
            for ty in types {
                equations.push(TypeEquation::new(var.clone(), ty));
            }
            typings.insert(local, var);
        }
        (MonomorphicEnv { typings }, equations)
    }
}

#[cfg(test)]
mod tests {
    use brj_types::unify;

    use super::*;

    #[test]
    fn union_equates_shared_locals() {
        let x = LocalVar::new("x");
        let a = Type::fresh_var();
        let left = MonomorphicEnv::singleton(x.clone(), a.clone());
        let right = MonomorphicEnv::singleton(x.clone(), Type::Int);
        let (merged, equations) = MonomorphicEnv::union([&left, &right]);
        assert_eq!(equations.len(), 2);
        let mapping = unify(equations).expect("unify");
        assert_eq!(merged.apply(&mapping).get(&x), Some(&Type::Int));
        assert_eq!(a.apply(&mapping), Type::Int);
    }

    #[test]
    fn conflicting_constraints_fail_to_unify() {
        let x = LocalVar::new("x");
        let (_, equations) = MonomorphicEnv::union([
            &MonomorphicEnv::singleton(x.clone(), Type::Str),
            &MonomorphicEnv::singleton(x, Type::Int),
        ]);
        assert!(unify(equations).is_err());
    }

    #[test]
    fn minus_all_removes_bound_locals() {
        let x = LocalVar::new("x");
        let y = LocalVar::new("y");
        let (env, _) = MonomorphicEnv::union([
            &MonomorphicEnv::singleton(x.clone(), Type::Int),
            &MonomorphicEnv::singleton(y.clone(), Type::Str),
        ]);
        let env = env.minus_all([&x]);
        assert!(env.get(&x).is_none());
        assert_eq!(env.get(&y), Some(&Type::Str));
    }
}
