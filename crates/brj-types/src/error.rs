use std::fmt;

use crate::{Type, TypeNamer, TypeVar};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnificationError {
    /// Two types that cannot be made equal.
    Mismatch { left: Type, right: Type },
    /// Binding `var` to `ty` would build an infinite type.
    Circular { var: TypeVar, ty: Type },
}

impl fmt::Display for UnificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut namer = TypeNamer::default();
        match self {
            UnificationError::Mismatch { left, right } => {
                let left = namer.render(left);
                write!(f, "cannot unify {} with {}", left, namer.render(right))
            }
            UnificationError::Circular { var, ty } => {
                let var = namer.render(&Type::Var(*var));
                write!(f, "circular type: {} occurs in {}", var, namer.render(ty))
            }
        }
    }
}
