use std::collections::BTreeSet;

use crate::{Expr, ExprKind, LocalVar};

/// Every local referenced in `expr` that `bound` does not cover, in LocalVar
/// order. Nested fn literals and lets extend the bound set for their bodies.
pub fn closed_over_vars<A>(bound: &BTreeSet<LocalVar>, expr: &Expr<A>) -> BTreeSet<LocalVar> {
    let mut acc = BTreeSet::new();
    collect(bound, expr, &mut acc);
    acc
}

fn collect<A>(bound: &BTreeSet<LocalVar>, expr: &Expr<A>, acc: &mut BTreeSet<LocalVar>) {
    match &expr.kind {
        ExprKind::Bool(_)
        | ExprKind::Str(_)
        | ExprKind::Int(_)
        | ExprKind::Global(_)
        | ExprKind::Ns(_)
        | ExprKind::TypeDef { .. }
        | ExprKind::DefData(_)
        | ExprKind::DefJ { .. } => {}
        ExprKind::Local(local) => {
            if !bound.contains(local) {
                acc.insert(local.clone());
            }
        }
        ExprKind::Vector(elems) | ExprKind::Set(elems) => {
            for elem in elems {
                collect(bound, elem, acc);
            }
        }
        ExprKind::Map(entries) => {
            for (k, v) in entries {
                collect(bound, k, acc);
                collect(bound, v, acc);
            }
        }
        ExprKind::Call { callee, args } => {
            collect(bound, callee, acc);
            for arg in args {
                collect(bound, arg, acc);
            }
        }
        ExprKind::VarCall { args, .. } => {
            for arg in args {
                collect(bound, arg, acc);
            }
        }
        ExprKind::Let { bindings, body } => {
            let mut inner = bound.clone();
            for binding in bindings {
                collect(&inner, &binding.expr, acc);
                inner.insert(binding.local.clone());
            }
            collect(&inner, body, acc);
        }
        ExprKind::If {
            test,
            then,
            otherwise,
        } => {
            collect(bound, test, acc);
            collect(bound, then, acc);
            collect(bound, otherwise, acc);
        }
        ExprKind::Fn { params, body } => {
            let mut inner = bound.clone();
            inner.extend(params.iter().cloned());
            collect(&inner, body, acc);
        }
        ExprKind::Def { body, .. } => collect(bound, body, acc),
    }
}
