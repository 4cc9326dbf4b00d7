mod closure;
mod print;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use smol_str::SmolStr;

pub use brj_reader::Range;
use brj_runtime::VarCell;
use brj_types::{Type, TypeMapping, TypeVar};

pub use closure::closed_over_vars;
pub use print::print_expr;

// ── Symbols ───────────────────────────────────────────────────────

/// An unqualified name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(pub SmolStr);

impl Symbol {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Symbol(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A namespace identifier, e.g. `brj.core`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NS(pub SmolStr);

impl NS {
    pub const CORE: &'static str = "brj.core";
    pub const USER: &'static str = "user";

    pub fn new(name: impl Into<SmolStr>) -> Self {
        NS(name.into())
    }

    pub fn core() -> Self {
        NS(SmolStr::new_static(Self::CORE))
    }

    pub fn user() -> Self {
        NS(SmolStr::new_static(Self::USER))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A symbol as written with a qualifier, `q/name`. The qualifier is an
/// alias or a namespace name until resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QSymbol {
    pub qualifier: SmolStr,
    pub name: Symbol,
}

impl fmt::Display for QSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.qualifier, self.name)
    }
}

/// A resolved, fully-qualified symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FQSymbol {
    pub ns: NS,
    pub name: Symbol,
}

impl FQSymbol {
    pub fn new(ns: NS, name: Symbol) -> Self {
        Self { ns, name }
    }

    /// The nominal identity a data type declared under this symbol carries.
    pub fn type_name(&self) -> SmolStr {
        SmolStr::new(self.to_string())
    }
}

impl fmt::Display for FQSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ns, self.name)
    }
}

// ── Locals ────────────────────────────────────────────────────────

static NEXT_LOCAL: AtomicU32 = AtomicU32::new(1);

/// A binding occurrence. Every [`LocalVar::new`] mints a distinct identity;
/// equality, hashing and ordering look only at that identity, never the name.
#[derive(Debug, Clone)]
pub struct LocalVar {
    id: u32,
    name: SmolStr,
}

impl LocalVar {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            id: NEXT_LOCAL.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for LocalVar {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for LocalVar {}

impl Hash for LocalVar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for LocalVar {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LocalVar {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for LocalVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ── Vars ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarKind {
    /// Ascribed with `::` but not yet defined.
    Declared,
    Value,
    Fn { arity: usize },
    Constructor { data_type: FQSymbol, arity: usize },
    Builtin { arity: usize },
    /// Bound to a host function by `defj`.
    Host { arity: usize },
}

/// A resolved top-level binding.
#[derive(Debug, Clone)]
pub struct Var {
    pub sym: FQSymbol,
    pub declared_type: Option<Type>,
    pub inferred_type: Option<Type>,
    pub kind: VarKind,
    /// Where the compiled artifact lives. Shared by every version of the env
    /// this var appears in.
    pub cell: Arc<VarCell>,
}

impl Var {
    pub fn new(sym: FQSymbol, kind: VarKind, cell: Arc<VarCell>) -> Self {
        Self {
            sym,
            declared_type: None,
            inferred_type: None,
            kind,
            cell,
        }
    }

    /// A `::` declaration with a fresh, empty cell.
    pub fn declared(sym: FQSymbol, ty: Type) -> Self {
        let cell = Arc::new(VarCell::new(sym.to_string()));
        Self {
            declared_type: Some(ty),
            ..Self::new(sym, VarKind::Declared, cell)
        }
    }

    pub fn with_inferred(mut self, ty: Type) -> Self {
        self.inferred_type = Some(ty);
        self
    }

    pub fn with_declared(mut self, ty: Option<Type>) -> Self {
        self.declared_type = ty;
        self
    }

    /// The declared type if there is one, otherwise the inferred type.
    pub fn visible_type(&self) -> Option<&Type> {
        self.declared_type.as_ref().or(self.inferred_type.as_ref())
    }

    pub fn is_fn(&self) -> bool {
        matches!(self.visible_type(), Some(Type::Fn(..)))
    }

    pub fn constructor_arity(&self) -> Option<usize> {
        match &self.kind {
            VarKind::Constructor { arity, .. } => Some(*arity),
            _ => None,
        }
    }
}

// ── Data types ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstructorKind {
    /// Nullary: a single shared instance.
    Value,
    /// Carries one field per parameter type, in declared order.
    Vector(Vec<Type>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constructor {
    pub sym: FQSymbol,
    pub kind: ConstructorKind,
}

impl Constructor {
    pub fn arity(&self) -> usize {
        match &self.kind {
            ConstructorKind::Value => 0,
            ConstructorKind::Vector(params) => params.len(),
        }
    }
}

/// A nominal sum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataType {
    pub sym: FQSymbol,
    pub type_vars: Vec<TypeVar>,
    pub constructors: Vec<Constructor>,
}

impl DataType {
    /// The type of a value of this data type, applied to its own
    /// parameters when it has any.
    pub fn ty(&self) -> Type {
        let base = Type::Data(self.sym.type_name());
        if self.type_vars.is_empty() {
            base
        } else {
            Type::Applied(
                Box::new(base),
                self.type_vars.iter().map(|v| Type::Var(*v)).collect(),
            )
        }
    }

    /// Value constructors have the data type itself; vector constructors
    /// are functions from their fields to it.
    pub fn constructor_type(&self, constructor: &Constructor) -> Type {
        match &constructor.kind {
            ConstructorKind::Value => self.ty(),
            ConstructorKind::Vector(params) => Type::func(params.clone(), self.ty()),
        }
    }
}

// ── Namespace declarations ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsDecl {
    pub ns: NS,
    pub aliases: Vec<(Symbol, NS)>,
    pub refers: Vec<(Symbol, FQSymbol)>,
    /// Host modules by the name the namespace uses for them, e.g.
    /// `Str` → `brj.host/Str`.
    pub imports: Vec<(Symbol, FQSymbol)>,
}

impl NsDecl {
    pub fn new(ns: NS) -> Self {
        Self {
            ns,
            aliases: Vec::new(),
            refers: Vec::new(),
            imports: Vec::new(),
        }
    }
}

/// The host function a `defj` binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFnRef {
    pub module: FQSymbol,
    pub name: Symbol,
    pub arity: usize,
}

impl fmt::Display for HostFnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

// ── Expressions ───────────────────────────────────────────────────

/// Expression tree, annotated with `A` at every node: `()` after analysis, a
/// [`Type`] after inference.
#[derive(Debug, Clone)]
pub struct Expr<A> {
    pub range: Range,
    pub ann: A,
    pub kind: ExprKind<A>,
}

#[derive(Debug, Clone)]
pub struct LetBinding<A> {
    pub local: LocalVar,
    pub expr: Expr<A>,
}

#[derive(Debug, Clone)]
pub enum ExprKind<A> {
    Bool(bool),
    Str(String),
    Int(i64),
    Vector(Vec<Expr<A>>),
    Set(Vec<Expr<A>>),
    Map(Vec<(Expr<A>, Expr<A>)>),
    /// Call through an arbitrary callee expression.
    Call {
        callee: Box<Expr<A>>,
        args: Vec<Expr<A>>,
    },
    /// Call to a known global function.
    VarCall {
        var: Var,
        args: Vec<Expr<A>>,
    },
    Let {
        bindings: Vec<LetBinding<A>>,
        body: Box<Expr<A>>,
    },
    If {
        test: Box<Expr<A>>,
        then: Box<Expr<A>>,
        otherwise: Box<Expr<A>>,
    },
    Local(LocalVar),
    Global(Var),
    Fn {
        params: Vec<LocalVar>,
        body: Box<Expr<A>>,
    },
    Ns(NsDecl),
    Def {
        sym: FQSymbol,
        declared: Option<Type>,
        body: Box<Expr<A>>,
    },
    TypeDef {
        sym: FQSymbol,
        ty: Type,
    },
    DefData(DataType),
    /// `(defj name Module fn Type)`: binds a host function at the ascribed type.
    DefJ {
        sym: FQSymbol,
        host: HostFnRef,
        ty: Type,
    },
}

impl<A> Expr<A> {
    pub fn new(range: Range, ann: A, kind: ExprKind<A>) -> Self {
        Self { range, ann, kind }
    }

    /// Rebuilds the tree with every annotation passed through `f`.
    pub fn map_ann<B>(&self, f: &mut impl FnMut(&A) -> B) -> Expr<B> {
        let kind = match &self.kind {
            ExprKind::Bool(b) => ExprKind::Bool(*b),
            ExprKind::Str(s) => ExprKind::Str(s.clone()),
            ExprKind::Int(n) => ExprKind::Int(*n),
            ExprKind::Vector(elems) => ExprKind::Vector(elems.iter().map(|e| e.map_ann(f)).collect()),
            ExprKind::Set(elems) => ExprKind::Set(elems.iter().map(|e| e.map_ann(f)).collect()),
            ExprKind::Map(entries) => ExprKind::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.map_ann(f), v.map_ann(f)))
                    .collect(),
            ),
            ExprKind::Call { callee, args } => ExprKind::Call {
                callee: Box::new(callee.map_ann(f)),
                args: args.iter().map(|a| a.map_ann(f)).collect(),
            },
            ExprKind::VarCall { var, args } => ExprKind::VarCall {
                var: var.clone(),
                args: args.iter().map(|a| a.map_ann(f)).collect(),
            },
            ExprKind::Let { bindings, body } => ExprKind::Let {
                bindings: bindings
                    .iter()
                    .map(|b| LetBinding {
                        local: b.local.clone(),
                        expr: b.expr.map_ann(f),
                    })
                    .collect(),
                body: Box::new(body.map_ann(f)),
            },
            ExprKind::If {
                test,
                then,
                otherwise,
            } => ExprKind::If {
                test: Box::new(test.map_ann(f)),
                then: Box::new(then.map_ann(f)),
                otherwise: Box::new(otherwise.map_ann(f)),
            },
            ExprKind::Local(local) => ExprKind::Local(local.clone()),
            ExprKind::Global(var) => ExprKind::Global(var.clone()),
            ExprKind::Fn { params, body } => ExprKind::Fn {
                params: params.clone(),
                body: Box::new(body.map_ann(f)),
            },
            ExprKind::Ns(decl) => ExprKind::Ns(decl.clone()),
            ExprKind::Def {
                sym,
                declared,
                body,
            } => ExprKind::Def {
                sym: sym.clone(),
                declared: declared.clone(),
                body: Box::new(body.map_ann(f)),
            },
            ExprKind::TypeDef { sym, ty } => ExprKind::TypeDef {
                sym: sym.clone(),
                ty: ty.clone(),
            },
            ExprKind::DefData(data_type) => ExprKind::DefData(data_type.clone()),
            ExprKind::DefJ { sym, host, ty } => ExprKind::DefJ {
                sym: sym.clone(),
                host: host.clone(),
                ty: ty.clone(),
            },
        };
        Expr {
            range: self.range,
            ann: f(&self.ann),
            kind,
        }
    }
}

impl Expr<Type> {
    pub fn ty(&self) -> &Type {
        &self.ann
    }

    /// Substitutes `mapping` into every annotation of the tree.
    pub fn apply(&self, mapping: &TypeMapping) -> Expr<Type> {
        if mapping.is_empty() {
            return self.clone();
        }
        self.map_ann(&mut |ty: &Type| ty.apply(mapping))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_vars_compare_by_identity() {
        let a = LocalVar::new("x");
        let b = LocalVar::new("x");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert!(a < b);
    }

    #[test]
    fn visible_type_prefers_declaration() {
        let sym = FQSymbol::new(NS::user(), Symbol::new("f"));
        let declared = Type::func(vec![Type::Int], Type::Int);
        let var = Var::declared(sym, declared.clone()).with_inferred(Type::fresh_var());
        assert_eq!(var.visible_type(), Some(&declared));
        assert!(var.is_fn());
        assert!(!var.cell.is_bound());
    }

    #[test]
    fn data_type_shapes() {
        let a = TypeVar::fresh();
        let maybe = FQSymbol::new(NS::user(), Symbol::new("Maybe"));
        let dt = DataType {
            sym: maybe.clone(),
            type_vars: vec![a],
            constructors: vec![
                Constructor {
                    sym: FQSymbol::new(NS::user(), Symbol::new("Just")),
                    kind: ConstructorKind::Vector(vec![Type::Var(a)]),
                },
                Constructor {
                    sym: FQSymbol::new(NS::user(), Symbol::new("Nothing")),
                    kind: ConstructorKind::Value,
                },
            ],
        };
        assert_eq!(dt.constructors[0].arity(), 1);
        assert_eq!(dt.constructor_type(&dt.constructors[0]).pretty(), "(Fn a (user/Maybe a))");
        assert_eq!(dt.constructor_type(&dt.constructors[1]).pretty(), "(user/Maybe a)");
    }
}
