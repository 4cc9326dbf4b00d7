//! The versioned global environment.
//!
//! An [`Env`] is a persistent value: every `with_*` returns a new Env sharing
//! structure with the old one, which stays valid and unchanged. Readers holding
//! an older version never observe a later update.

use brj_ast::{DataType, FQSymbol, NsDecl, QSymbol, Symbol, Var, NS};

/// Per-namespace import tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NsEnv {
    pub aliases: im::HashMap<Symbol, NS>,
    pub refers: im::HashMap<Symbol, FQSymbol>,
    pub imports: im::HashMap<Symbol, FQSymbol>,
}

impl NsEnv {
    pub fn from_decl(decl: &NsDecl) -> Self {
        Self {
            aliases: decl.aliases.iter().cloned().collect(),
            refers: decl.refers.iter().cloned().collect(),
            imports: decl.imports.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Env {
    namespaces: im::HashMap<NS, NsEnv>,
    vars: im::HashMap<FQSymbol, Var>,
    data_types: im::HashMap<FQSymbol, DataType>,
    version: u64,
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl Env {
    /// An environment holding only the empty `user` namespace.
    pub fn new() -> Self {
        Self {
            namespaces: im::HashMap::unit(NS::user(), NsEnv::default()),
            vars: im::HashMap::new(),
            data_types: im::HashMap::new(),
            version: 0,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    fn bumped(&self) -> Self {
        Self {
            version: self.version + 1,
            ..self.clone()
        }
    }

    // ── Updates ──────────────────────────────────────────────────

    /// Adds or replaces a top-level var.
    pub fn with_var(&self, var: Var) -> Env {
        let mut env = self.bumped();
        log::debug!("env v{}: var {}", env.version, var.sym);
        if !env.namespaces.contains_key(&var.sym.ns) {
            env.namespaces.insert(var.sym.ns.clone(), NsEnv::default());
        }
        env.vars.insert(var.sym.clone(), var);
        env
    }

    /// Adds a data type together with the vars of its constructors.
    pub fn with_data_type(&self, data_type: DataType, constructors: impl IntoIterator<Item = Var>) -> Env {
        let mut env = self.bumped();
        log::debug!("env v{}: data type {}", env.version, data_type.sym);
        if !env.namespaces.contains_key(&data_type.sym.ns) {
            env.namespaces.insert(data_type.sym.ns.clone(), NsEnv::default());
        }
        for var in constructors {
            env.vars.insert(var.sym.clone(), var);
        }
        env.data_types.insert(data_type.sym.clone(), data_type);
        env
    }

    /// Creates or replaces the import tables of `decl.ns`.
    pub fn with_ns(&self, decl: &NsDecl) -> Env {
        let mut env = self.bumped();
        log::debug!("env v{}: ns {}", env.version, decl.ns);
        env.namespaces.insert(decl.ns.clone(), NsEnv::from_decl(decl));
        env
    }

    // ── Lookup ───────────────────────────────────────────────────

    pub fn has_ns(&self, ns: &NS) -> bool {
        self.namespaces.contains_key(ns)
    }

    pub fn ns_env(&self, ns: &NS) -> Option<&NsEnv> {
        self.namespaces.get(ns)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &NS> {
        self.namespaces.keys()
    }

    pub fn var(&self, sym: &FQSymbol) -> Option<&Var> {
        self.vars.get(sym)
    }

    pub fn vars(&self) -> impl Iterator<Item = &Var> {
        self.vars.values()
    }

    pub fn data_type(&self, sym: &FQSymbol) -> Option<&DataType> {
        self.data_types.get(sym)
    }

    /// Resolves a bare symbol seen in `ns`: the namespace's own vars, then its
    /// refers, then the core namespace.
    pub fn resolve_var(&self, ns: &NS, sym: &Symbol) -> Option<&Var> {
        self.resolve_in(ns, sym, &self.vars)
    }

    pub fn resolve_data_type(&self, ns: &NS, sym: &Symbol) -> Option<&DataType> {
        self.resolve_in(ns, sym, &self.data_types)
    }

    fn resolve_in<'a, T>(
        &self,
        ns: &NS,
        sym: &Symbol,
        table: &'a im::HashMap<FQSymbol, T>,
    ) -> Option<&'a T>
    where
        T: Clone,
    {
        if let Some(found) = table.get(&FQSymbol::new(ns.clone(), sym.clone())) {
            return Some(found);
        }
        if let Some(target) = self.ns_env(ns).and_then(|ns_env| ns_env.refers.get(sym)) {
            return table.get(target);
        }
        table.get(&FQSymbol::new(NS::core(), sym.clone()))
    }

    /// Maps a symbol qualifier written in `ns` to a namespace: an alias first,
    /// then a namespace with that exact name.
    pub fn resolve_qualifier(&self, ns: &NS, qualifier: &str) -> Option<NS> {
        let alias = Symbol::new(qualifier);
        if let Some(target) = self.ns_env(ns).and_then(|ns_env| ns_env.aliases.get(&alias)) {
            return Some(target.clone());
        }
        let direct = NS::new(qualifier);
        self.has_ns(&direct).then_some(direct)
    }

    /// The host module `ns` imported under `sym`.
    pub fn resolve_import(&self, ns: &NS, sym: &Symbol) -> Option<&FQSymbol> {
        self.ns_env(ns)?.imports.get(sym)
    }

    pub fn resolve_qvar(&self, ns: &NS, sym: &QSymbol) -> Option<&Var> {
        let target = self.resolve_qualifier(ns, &sym.qualifier)?;
        self.vars.get(&FQSymbol::new(target, sym.name.clone()))
    }

    pub fn resolve_qdata_type(&self, ns: &NS, sym: &QSymbol) -> Option<&DataType> {
        let target = self.resolve_qualifier(ns, &sym.qualifier)?;
        self.data_types.get(&FQSymbol::new(target, sym.name.clone()))
    }
}
