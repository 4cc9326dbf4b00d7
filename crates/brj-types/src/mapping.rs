use std::fmt;

use crate::{Type, TypeNamer, TypeVar};

/// A finite substitution from type variables to types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeMapping {
    mapping: im::HashMap<TypeVar, Type>,
}

impl TypeMapping {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn singleton(var: TypeVar, ty: Type) -> Self {
        Self {
            mapping: im::HashMap::unit(var, ty),
        }
    }

    /// Maps each of `vars` to a fresh type variable.
    pub fn fresh_for(vars: impl IntoIterator<Item = TypeVar>) -> Self {
        Self {
            mapping: vars
                .into_iter()
                .map(|v| (v, Type::fresh_var()))
                .collect(),
        }
    }

    pub fn get(&self, var: TypeVar) -> Option<&Type> {
        self.mapping.get(&var)
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TypeVar, &Type)> {
        self.mapping.iter()
    }

    /// `self` followed by `second`: `second` is applied to the range of
    /// `self`, and `second`'s own bindings are added where `self` has none.
    pub fn compose(&self, second: &TypeMapping) -> TypeMapping {
        let mut mapping: im::HashMap<TypeVar, Type> = self
            .mapping
            .iter()
            .map(|(v, t)| (*v, t.apply(second)))
            .collect();
        for (v, t) in second.mapping.iter() {
            if !mapping.contains_key(v) {
                mapping.insert(*v, t.clone());
            }
        }
        TypeMapping { mapping }
    }
}

impl fmt::Display for TypeMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.mapping.iter().collect();
        entries.sort_by_key(|(v, _)| **v);
        let mut namer = TypeNamer::default();
        write!(f, "{{")?;
        for (i, (v, t)) in entries.into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            let var = namer.render(&Type::Var(*v));
            write!(f, "{} := {}", var, namer.render(t))?;
        }
        write!(f, "}}")
    }
}
