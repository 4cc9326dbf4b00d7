//! Type model for Bridje: the closed type algebra, substitutions, and
//! Robinson-style unification.
//!
//! Everything here is a pure value. Applying a [`TypeMapping`] always returns a
//! new [`Type`]; nothing is updated in place.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use smol_str::SmolStr;

mod error;
mod mapping;
mod unify;

pub use error::UnificationError;
pub use mapping::TypeMapping;
pub use unify::{unify, TypeEquation};

// ── Type variables ───────────────────────────────────────────────

static NEXT_TYPE_VAR: AtomicU32 = AtomicU32::new(1);

/// An opaque type variable. Only [`TypeVar::fresh`] mints new ones, so two
/// variables are the same only if they came from the same call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeVar(pub(crate) u32);

impl TypeVar {
    pub fn fresh() -> Self {
        TypeVar(NEXT_TYPE_VAR.fetch_add(1, Ordering::Relaxed))
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TypeVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

// ── Types ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    Str,
    Int,
    /// Result of top-level declarations: they act on the environment.
    EnvIo,
    /// `[T]`
    Vector(Box<Type>),
    /// `#{T}`
    Set(Box<Type>),
    /// `{K V}`
    Map(Box<Type>, Box<Type>),
    /// `(Fn P1 .. Pn R)`
    Fn(Vec<Type>, Box<Type>),
    Var(TypeVar),
    /// Nominal data type, identified by its fully-qualified declaration symbol.
    Data(SmolStr),
    /// A nominal type applied to type arguments: `(Maybe Int)`.
    Applied(Box<Type>, Vec<Type>),
}

impl Type {
    pub fn vector(elem: Type) -> Type {
        Type::Vector(Box::new(elem))
    }

    pub fn set(elem: Type) -> Type {
        Type::Set(Box::new(elem))
    }

    pub fn map(key: Type, value: Type) -> Type {
        Type::Map(Box::new(key), Box::new(value))
    }

    pub fn func(params: Vec<Type>, ret: Type) -> Type {
        Type::Fn(params, Box::new(ret))
    }

    pub fn fresh_var() -> Type {
        Type::Var(TypeVar::fresh())
    }

    /// Free type variables, in a stable order.
    pub fn ftvs(&self) -> BTreeSet<TypeVar> {
        let mut acc = BTreeSet::new();
        self.collect_ftvs(&mut acc);
        acc
    }

    pub fn collect_ftvs(&self, acc: &mut BTreeSet<TypeVar>) {
        match self {
            Type::Bool | Type::Str | Type::Int | Type::EnvIo | Type::Data(_) => {}
            Type::Var(v) => {
                acc.insert(*v);
            }
            Type::Vector(elem) | Type::Set(elem) => elem.collect_ftvs(acc),
            Type::Map(k, v) => {
                k.collect_ftvs(acc);
                v.collect_ftvs(acc);
            }
            Type::Fn(params, ret) => {
                for p in params {
                    p.collect_ftvs(acc);
                }
                ret.collect_ftvs(acc);
            }
            Type::Applied(base, args) => {
                base.collect_ftvs(acc);
                for a in args {
                    a.collect_ftvs(acc);
                }
            }
        }
    }

    pub fn occurs(&self, var: TypeVar) -> bool {
        match self {
            Type::Bool | Type::Str | Type::Int | Type::EnvIo | Type::Data(_) => false,
            Type::Var(v) => *v == var,
            Type::Vector(elem) | Type::Set(elem) => elem.occurs(var),
            Type::Map(k, v) => k.occurs(var) || v.occurs(var),
            Type::Fn(params, ret) => params.iter().any(|p| p.occurs(var)) || ret.occurs(var),
            Type::Applied(base, args) => base.occurs(var) || args.iter().any(|a| a.occurs(var)),
        }
    }

    /// Substitutes `mapping` through every child position.
    pub fn apply(&self, mapping: &TypeMapping) -> Type {
        if mapping.is_empty() {
            return self.clone();
        }
        match self {
            Type::Bool | Type::Str | Type::Int | Type::EnvIo | Type::Data(_) => self.clone(),
            Type::Var(v) => match mapping.get(*v) {
                Some(t) => t.clone(),
                None => self.clone(),
            },
            Type::Vector(elem) => Type::vector(elem.apply(mapping)),
            Type::Set(elem) => Type::set(elem.apply(mapping)),
            Type::Map(k, v) => Type::map(k.apply(mapping), v.apply(mapping)),
            Type::Fn(params, ret) => Type::func(
                params.iter().map(|p| p.apply(mapping)).collect(),
                ret.apply(mapping),
            ),
            Type::Applied(base, args) => Type::Applied(
                Box::new(base.apply(mapping)),
                args.iter().map(|a| a.apply(mapping)).collect(),
            ),
        }
    }

    /// Replaces every free type variable with a fresh one.
    pub fn instantiate(&self) -> Type {
        self.apply(&TypeMapping::fresh_for(self.ftvs()))
    }

    pub fn alpha_equivalent(&self, other: &Type) -> bool {
        self.alpha_equivalent_with(other, &mut AlphaRenaming::default())
    }

    /// Structural equality up to a consistent bijection of type variables,
    /// threading the bijection through `renaming`.
    pub fn alpha_equivalent_with(&self, other: &Type, renaming: &mut AlphaRenaming) -> bool {
        match (self, other) {
            (Type::Var(a), Type::Var(b)) => renaming.pair(*a, *b),
            (Type::Bool, Type::Bool)
            | (Type::Str, Type::Str)
            | (Type::Int, Type::Int)
            | (Type::EnvIo, Type::EnvIo) => true,
            (Type::Data(a), Type::Data(b)) => a == b,
            (Type::Vector(a), Type::Vector(b)) | (Type::Set(a), Type::Set(b)) => {
                a.alpha_equivalent_with(b, renaming)
            }
            (Type::Map(k1, v1), Type::Map(k2, v2)) => {
                k1.alpha_equivalent_with(k2, renaming) && v1.alpha_equivalent_with(v2, renaming)
            }
            (Type::Fn(p1, r1), Type::Fn(p2, r2)) => {
                p1.len() == p2.len()
                    && p1
                        .iter()
                        .zip(p2)
                        .all(|(a, b)| a.alpha_equivalent_with(b, renaming))
                    && r1.alpha_equivalent_with(r2, renaming)
            }
            (Type::Applied(b1, a1), Type::Applied(b2, a2)) => {
                a1.len() == a2.len()
                    && b1.alpha_equivalent_with(b2, renaming)
                    && a1
                        .iter()
                        .zip(a2)
                        .all(|(a, b)| a.alpha_equivalent_with(b, renaming))
            }
            _ => false,
        }
    }

    /// `self` is `other`, or an instance of it: unifying the two and applying
    /// the result to `other` gives back `self` up to renaming.
    pub fn subtype_of(&self, other: &Type) -> bool {
        match unify([TypeEquation::new(self.clone(), other.clone())]) {
            Ok(mapping) => self.alpha_equivalent(&other.apply(&mapping)),
            Err(_) => false,
        }
    }

    /// Renders the type with variables renamed `a`, `b`, ... in order of
    /// first appearance, so alpha-equivalent types print identically.
    pub fn pretty(&self) -> String {
        TypeNamer::default().render(self)
    }
}

/// Bijection between the variables of two types, built up during an
/// alpha-equivalence check.
#[derive(Debug, Default, Clone)]
pub struct AlphaRenaming {
    forward: HashMap<TypeVar, TypeVar>,
    backward: HashMap<TypeVar, TypeVar>,
}

impl AlphaRenaming {
    fn pair(&mut self, a: TypeVar, b: TypeVar) -> bool {
        match (self.forward.get(&a), self.backward.get(&b)) {
            (None, None) => {
                self.forward.insert(a, b);
                self.backward.insert(b, a);
                true
            }
            (Some(fa), Some(bb)) => *fa == b && *bb == a,
            _ => false,
        }
    }
}

// ── Printing ─────────────────────────────────────────────────────

/// Assigns readable names to type variables across several renders, so
/// related types (both sides of a mismatch) share one naming.
#[derive(Debug, Default)]
pub struct TypeNamer {
    names: HashMap<TypeVar, String>,
}

impl TypeNamer {
    pub fn render(&mut self, ty: &Type) -> String {
        let mut out = String::new();
        self.write(ty, &mut out);
        out
    }

    fn name(&mut self, var: TypeVar) -> String {
        let next = self.names.len();
        self.names
            .entry(var)
            .or_insert_with(|| {
                let letter = (b'a' + (next % 26) as u8) as char;
                if next < 26 {
                    letter.to_string()
                } else {
                    format!("{}{}", letter, next / 26)
                }
            })
            .clone()
    }

    fn write(&mut self, ty: &Type, out: &mut String) {
        match ty {
            Type::Bool => out.push_str("Bool"),
            Type::Str => out.push_str("Str"),
            Type::Int => out.push_str("Int"),
            Type::EnvIo => out.push_str("EnvIO"),
            Type::Data(name) => out.push_str(name),
            Type::Var(v) => {
                let name = self.name(*v);
                out.push_str(&name);
            }
            Type::Vector(elem) => {
                out.push('[');
                self.write(elem, out);
                out.push(']');
            }
            Type::Set(elem) => {
                out.push_str("#{");
                self.write(elem, out);
                out.push('}');
            }
            Type::Map(k, v) => {
                out.push('{');
                self.write(k, out);
                out.push(' ');
                self.write(v, out);
                out.push('}');
            }
            Type::Fn(params, ret) => {
                out.push_str("(Fn");
                for p in params {
                    out.push(' ');
                    self.write(p, out);
                }
                out.push(' ');
                self.write(ret, out);
                out.push(')');
            }
            Type::Applied(base, args) => {
                out.push('(');
                self.write(base, out);
                for a in args {
                    out.push(' ');
                    self.write(a, out);
                }
                out.push(')');
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "Bool"),
            Type::Str => write!(f, "Str"),
            Type::Int => write!(f, "Int"),
            Type::EnvIo => write!(f, "EnvIO"),
            Type::Data(name) => write!(f, "{}", name),
            Type::Var(v) => write!(f, "{}", v),
            Type::Vector(elem) => write!(f, "[{}]", elem),
            Type::Set(elem) => write!(f, "#{{{}}}", elem),
            Type::Map(k, v) => write!(f, "{{{} {}}}", k, v),
            Type::Fn(params, ret) => {
                write!(f, "(Fn")?;
                for p in params {
                    write!(f, " {}", p)?;
                }
                write!(f, " {})", ret)
            }
            Type::Applied(base, args) => {
                write!(f, "({}", base)?;
                for a in args {
                    write!(f, " {}", a)?;
                }
                write!(f, ")")
            }
        }
    }
}
