use std::collections::VecDeque;

use crate::{Type, TypeMapping, UnificationError};

/// A pair of types required to be equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEquation {
    pub left: Type,
    pub right: Type,
}

impl TypeEquation {
    pub fn new(left: Type, right: Type) -> Self {
        Self { left, right }
    }

    pub fn apply(&self, mapping: &TypeMapping) -> TypeEquation {
        TypeEquation::new(self.left.apply(mapping), self.right.apply(mapping))
    }
}

/// Solves `equations` into their most general unifier.
pub fn unify(
    equations: impl IntoIterator<Item = TypeEquation>,
) -> Result<TypeMapping, UnificationError> {
    let mut work: VecDeque<TypeEquation> = equations.into_iter().collect();
    let mut mapping = TypeMapping::empty();

    while let Some(TypeEquation { left, right }) = work.pop_front() {
        if left == right {
            continue;
        }

        match (left, right) {
            (Type::Var(var), right) => {
                if right.occurs(var) {
                    return Err(UnificationError::Circular { var, ty: right });
                }
                let single = TypeMapping::singleton(var, right);
                for eq in work.iter_mut() {
                    *eq = eq.apply(&single);
                }
                mapping = mapping.compose(&single);
            }

            (left, Type::Var(var)) => {
                work.push_front(TypeEquation::new(Type::Var(var), left));
            }

            (Type::Fn(p1, r1), Type::Fn(p2, r2)) => {
                if p1.len() != p2.len() {
                    return Err(UnificationError::Mismatch {
                        left: Type::Fn(p1, r1),
                        right: Type::Fn(p2, r2),
                    });
                }
                work.push_front(TypeEquation::new(*r1, *r2));
                for (a, b) in p1.into_iter().zip(p2).rev() {
                    work.push_front(TypeEquation::new(a, b));
                }
            }

            (Type::Applied(b1, a1), Type::Applied(b2, a2)) => {
                if a1.len() != a2.len() {
                    return Err(UnificationError::Mismatch {
                        left: Type::Applied(b1, a1),
                        right: Type::Applied(b2, a2),
                    });
                }
                work.push_front(TypeEquation::new(*b1, *b2));
                for (a, b) in a1.into_iter().zip(a2).rev() {
                    work.push_front(TypeEquation::new(a, b));
                }
            }

            (Type::Vector(e1), Type::Vector(e2)) | (Type::Set(e1), Type::Set(e2)) => {
                work.push_front(TypeEquation::new(*e1, *e2));
            }

            (Type::Map(k1, v1), Type::Map(k2, v2)) => {
                work.push_front(TypeEquation::new(*v1, *v2));
                work.push_front(TypeEquation::new(*k1, *k2));
            }

            (left, right) => return Err(UnificationError::Mismatch { left, right }),
        }
    }

    Ok(mapping)
}
