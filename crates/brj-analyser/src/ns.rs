use std::collections::HashMap;

use brj_ast::{FQSymbol, NsDecl, Symbol, NS};
use brj_env::Env;
use brj_runtime::host_module;
use brj_reader::{Form, FormKind};

use crate::error::{malformed, ResolutionError};

/// `(ns name)` or `(ns name {aliases {a some.ns} refers {some.ns [x y]} imports {brj.host [Str]}})`.
pub(crate) fn analyse_ns(env: &Env, args: &[Form], form: &Form) -> Result<NsDecl, ResolutionError> {
    let (name, opts) = match args {
        [name] => (name, None),
        [name, opts] => (name, Some(opts)),
        _ => return Err(malformed("ns expects a name and an optional options map", form.range)),
    };
    let ns = match name.as_symbol() {
        Some(s) => NS::new(s),
        None => {
            return Err(malformed(
                format!("expected a namespace name, got {}", name.describe()),
                name.range,
            ));
        }
    };

    let mut decl = NsDecl::new(ns);
    let Some(opts) = opts else {
        return Ok(decl);
    };
    let FormKind::Map(entries) = &opts.kind else {
        return Err(malformed(
            format!("expected an options map, got {}", opts.describe()),
            opts.range,
        ));
    };
    for (key, value) in entries {
        match key.as_symbol() {
            Some("aliases") => decl.aliases = aliases(env, value)?,
            Some("refers") => decl.refers = refers(env, value)?,
            Some("imports") => decl.imports = imports(value)?,
            _ => return Err(malformed(format!("unknown ns option: {}", key), key.range)),
        }
    }
    Ok(decl)
}

fn map_entries<'f>(form: &'f Form, what: &str) -> Result<&'f [(Form, Form)], ResolutionError> {
    match &form.kind {
        FormKind::Map(entries) => Ok(entries),
        _ => Err(malformed(
            format!("{} must be a map, got {}", what, form.describe()),
            form.range,
        )),
    }
}

fn known_ns(env: &Env, form: &Form) -> Result<NS, ResolutionError> {
    let Some(name) = form.as_symbol() else {
        return Err(malformed(
            format!("expected a namespace name, got {}", form.describe()),
            form.range,
        ));
    };
    let ns = NS::new(name);
    if !env.has_ns(&ns) {
        return Err(ResolutionError::UnknownNamespace {
            ns,
            range: form.range,
        });
    }
    Ok(ns)
}

fn aliases(env: &Env, form: &Form) -> Result<Vec<(Symbol, NS)>, ResolutionError> {
    let mut out = Vec::new();
    for (alias, target) in map_entries(form, "aliases")? {
        let Some(name) = alias.as_symbol() else {
            return Err(malformed(
                format!("expected an alias symbol, got {}", alias.describe()),
                alias.range,
            ));
        };
        let target = known_ns(env, target)?;
        let shadowed = NS::new(name);
        if shadowed != target && env.has_ns(&shadowed) {
            return Err(ResolutionError::AmbiguousAlias {
                alias: Symbol::new(name),
                target,
                range: alias.range,
            });
        }
        out.push((Symbol::new(name), target));
    }
    Ok(out)
}

fn refers(env: &Env, form: &Form) -> Result<Vec<(Symbol, FQSymbol)>, ResolutionError> {
    let mut out = Vec::new();
    let mut seen: HashMap<Symbol, NS> = HashMap::new();
    for (source, names) in map_entries(form, "refers")? {
        let source_ns = known_ns(env, source)?;
        let FormKind::Vector(names) = &names.kind else {
            return Err(malformed(
                format!("refers for {} must be a vector, got {}", source_ns, names.describe()),
                names.range,
            ));
        };
        for name in names {
            let Some(s) = name.as_symbol() else {
                return Err(malformed(
                    format!("expected a symbol to refer, got {}", name.describe()),
                    name.range,
                ));
            };
            let sym = Symbol::new(s);
            let target = FQSymbol::new(source_ns.clone(), sym.clone());
            if env.var(&target).is_none() {
                return Err(ResolutionError::Unresolved {
                    sym: target.to_string(),
                    range: name.range,
                });
            }
            if let Some(first) = seen.get(&sym) {
                if *first != source_ns {
                    return Err(ResolutionError::AmbiguousRefer {
                        sym,
                        first: first.clone(),
                        second: source_ns,
                        range: name.range,
                    });
                }
                continue;
            }
            seen.insert(sym.clone(), source_ns.clone());
            out.push((sym, target));
        }
    }
    Ok(out)
}

/// `{package [Module ...]}`: each module is then known by its bare name.
fn imports(form: &Form) -> Result<Vec<(Symbol, FQSymbol)>, ResolutionError> {
    let mut out: Vec<(Symbol, FQSymbol)> = Vec::new();
    for (package, modules) in map_entries(form, "imports")? {
        let Some(package_name) = package.as_symbol() else {
            return Err(malformed(
                format!("expected a package name, got {}", package.describe()),
                package.range,
            ));
        };
        let FormKind::Vector(modules) = &modules.kind else {
            return Err(malformed(
                format!("imports for {} must be a vector, got {}", package_name, modules.describe()),
                modules.range,
            ));
        };
        for module in modules {
            let Some(name) = module.as_symbol() else {
                return Err(malformed(
                    format!("expected a host module name, got {}", module.describe()),
                    module.range,
                ));
            };
            let target = FQSymbol::new(NS::new(package_name), Symbol::new(name));
            if host_module(package_name, name).is_none() {
                return Err(ResolutionError::UnknownHostModule {
                    module: target.to_string(),
                    range: module.range,
                });
            }
            let sym = Symbol::new(name);
            if out.iter().any(|(seen, _)| *seen == sym) {
                return Err(malformed(format!("duplicate import {}", name), module.range));
            }
            out.push((sym, target));
        }
    }
    Ok(out)
}
