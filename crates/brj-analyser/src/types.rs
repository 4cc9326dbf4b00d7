use std::collections::HashMap;

use smol_str::SmolStr;

use brj_ast::{FQSymbol, QSymbol, Symbol, NS};
use brj_env::Env;
use brj_reader::{Form, FormKind};
use brj_types::{Type, TypeVar};

use crate::error::{malformed, ResolutionError};

/// Analyses a type form. Lowercase symbols are type variables, shared across
/// all their occurrences in `form`.
pub fn analyse_type(env: &Env, ns: &NS, form: &Form) -> Result<Type, ResolutionError> {
    TypeAnalyser::open(env, ns).analyse(form)
}

/// The data type currently being declared, visible to its own constructors.
pub(crate) struct Declaring<'a> {
    pub sym: &'a FQSymbol,
    pub arity: usize,
}

pub(crate) struct TypeAnalyser<'a> {
    env: &'a Env,
    ns: &'a NS,
    vars: HashMap<SmolStr, TypeVar>,
    /// Unknown lowercase symbols mint new variables instead of failing.
    open: bool,
    declaring: Option<Declaring<'a>>,
}

impl<'a> TypeAnalyser<'a> {
    pub(crate) fn open(env: &'a Env, ns: &'a NS) -> Self {
        Self {
            env,
            ns,
            vars: HashMap::new(),
            open: true,
            declaring: None,
        }
    }

    /// Only `params` may appear as type variables.
    pub(crate) fn closed(
        env: &'a Env,
        ns: &'a NS,
        params: &[(SmolStr, TypeVar)],
        declaring: Declaring<'a>,
    ) -> Self {
        Self {
            env,
            ns,
            vars: params.iter().cloned().collect(),
            open: false,
            declaring: Some(declaring),
        }
    }

    pub(crate) fn analyse(&mut self, form: &Form) -> Result<Type, ResolutionError> {
        match &form.kind {
            FormKind::Symbol(name) => match name.as_str() {
                "Int" => Ok(Type::Int),
                "Str" => Ok(Type::Str),
                "Bool" => Ok(Type::Bool),
                _ if is_type_var(name) => self.type_var(name, form),
                _ => {
                    let (base, arity) = self.data_type(Symbol(name.clone()), None, form)?;
                    if arity != 0 {
                        return Err(malformed(
                            format!("{} expects {} type arguments", name, arity),
                            form.range,
                        ));
                    }
                    Ok(base)
                }
            },
            FormKind::QSymbol(qualifier, name) => {
                let qsym = QSymbol {
                    qualifier: qualifier.clone(),
                    name: Symbol(name.clone()),
                };
                let (base, arity) = self.data_type(qsym.name.clone(), Some(&qsym), form)?;
                if arity != 0 {
                    return Err(malformed(
                        format!("{} expects {} type arguments", qsym, arity),
                        form.range,
                    ));
                }
                Ok(base)
            }
            FormKind::Vector(elems) => match elems.as_slice() {
                [elem] => Ok(Type::vector(self.analyse(elem)?)),
                _ => Err(malformed("vector type takes exactly one element type", form.range)),
            },
            FormKind::Set(elems) => match elems.as_slice() {
                [elem] => Ok(Type::set(self.analyse(elem)?)),
                _ => Err(malformed("set type takes exactly one element type", form.range)),
            },
            FormKind::Map(entries) => match entries.as_slice() {
                [(k, v)] => Ok(Type::map(self.analyse(k)?, self.analyse(v)?)),
                _ => Err(malformed("map type takes one key and one value type", form.range)),
            },
            FormKind::List(items) => self.analyse_list(items, form),
            _ => Err(malformed(
                format!("expected a type, got {}", form.describe()),
                form.range,
            )),
        }
    }

    fn analyse_list(&mut self, items: &[Form], form: &Form) -> Result<Type, ResolutionError> {
        let Some((head, args)) = items.split_first() else {
            return Err(malformed("expected a type, got ()", form.range));
        };
        if head.is_symbol("Fn") {
            let Some((ret, params)) = args.split_last() else {
                return Err(malformed("Fn type needs a return type", form.range));
            };
            let params = params
                .iter()
                .map(|p| self.analyse(p))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Type::func(params, self.analyse(ret)?));
        }
        let (base, arity) = match &head.kind {
            FormKind::Symbol(name) if !is_type_var(name) => {
                self.data_type(Symbol(name.clone()), None, head)?
            }
            FormKind::QSymbol(qualifier, name) => {
                let qsym = QSymbol {
                    qualifier: qualifier.clone(),
                    name: Symbol(name.clone()),
                };
                self.data_type(qsym.name.clone(), Some(&qsym), head)?
            }
            _ => {
                return Err(malformed(
                    format!("expected a data type name, got {}", head.describe()),
                    head.range,
                ));
            }
        };
        if args.len() != arity {
            return Err(malformed(
                format!("{} expects {} type arguments, got {}", head, arity, args.len()),
                form.range,
            ));
        }
        let args = args
            .iter()
            .map(|a| self.analyse(a))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Type::Applied(Box::new(base), args))
    }

    fn type_var(&mut self, name: &SmolStr, form: &Form) -> Result<Type, ResolutionError> {
        if let Some(var) = self.vars.get(name) {
            return Ok(Type::Var(*var));
        }
        if !self.open {
            return Err(malformed(format!("unknown type variable: {}", name), form.range));
        }
        let var = TypeVar::fresh();
        self.vars.insert(name.clone(), var);
        Ok(Type::Var(var))
    }

    /// Resolves a data type name to its nominal base type and parameter count.
    fn data_type(
        &self,
        name: Symbol,
        qualified: Option<&QSymbol>,
        form: &Form,
    ) -> Result<(Type, usize), ResolutionError> {
        if let (Some(declaring), None) = (&self.declaring, qualified) {
            if declaring.sym.ns == *self.ns && declaring.sym.name == name {
                return Ok((Type::Data(declaring.sym.type_name()), declaring.arity));
            }
        }
        let found = match qualified {
            Some(qsym) => self.env.resolve_qdata_type(self.ns, qsym),
            None => self.env.resolve_data_type(self.ns, &name),
        };
        match found {
            Some(dt) => Ok((Type::Data(dt.sym.type_name()), dt.type_vars.len())),
            None => Err(ResolutionError::Unresolved {
                sym: form.to_string(),
                range: form.range,
            }),
        }
    }
}

pub(crate) fn is_type_var(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_lowercase())
}
