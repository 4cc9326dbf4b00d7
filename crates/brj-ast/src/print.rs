use brj_types::{Type, TypeNamer};

use crate::{Expr, ExprKind, LetBinding};

/// Renders a typed tree one node per line, each with its type. Type variables
/// are named consistently across the whole tree.
pub fn print_expr(expr: &Expr<Type>) -> String {
    let mut printer = PrettyPrinter {
        namer: TypeNamer::default(),
        buf: String::new(),
        indent: 0,
    };
    printer.print(expr);
    printer.buf
}

struct PrettyPrinter {
    namer: TypeNamer,
    buf: String,
    indent: usize,
}

impl PrettyPrinter {
    fn write_indent(&mut self) {
        for _ in 0..self.indent {
            self.buf.push_str("  ");
        }
    }

    fn writeln(&mut self, s: &str) {
        self.write_indent();
        self.buf.push_str(s);
        self.buf.push('\n');
    }

    fn node(&mut self, label: &str, ty: &Type) {
        let ty = self.namer.render(ty);
        self.writeln(&format!("{} : {}", label, ty));
    }

    fn nested(&mut self, exprs: &[Expr<Type>]) {
        self.indent += 1;
        for e in exprs {
            self.print(e);
        }
        self.indent -= 1;
    }

    fn print(&mut self, expr: &Expr<Type>) {
        let ty = &expr.ann;
        match &expr.kind {
            ExprKind::Bool(b) => self.node(&b.to_string(), ty),
            ExprKind::Int(n) => self.node(&n.to_string(), ty),
            ExprKind::Str(s) => self.node(&format!("{:?}", s), ty),
            ExprKind::Local(local) => self.node(&format!("local {}#{}", local.name(), local.id()), ty),
            ExprKind::Global(var) => self.node(&format!("global {}", var.sym), ty),
            ExprKind::Vector(elems) => {
                self.node("vector", ty);
                self.nested(elems);
            }
            ExprKind::Set(elems) => {
                self.node("set", ty);
                self.nested(elems);
            }
            ExprKind::Map(entries) => {
                self.node("map", ty);
                self.indent += 1;
                for (k, v) in entries {
                    self.print(k);
                    self.print(v);
                }
                self.indent -= 1;
            }
            ExprKind::Call { callee, args } => {
                self.node("call", ty);
                self.indent += 1;
                self.print(callee);
                self.indent -= 1;
                self.nested(args);
            }
            ExprKind::VarCall { var, args } => {
                self.node(&format!("call {}", var.sym), ty);
                self.nested(args);
            }
            ExprKind::Let { bindings, body } => {
                self.node("let", ty);
                self.indent += 1;
                for LetBinding { local, expr } in bindings {
                    self.writeln(&format!("{}#{} =", local.name(), local.id()));
                    self.indent += 1;
                    self.print(expr);
                    self.indent -= 1;
                }
                self.print(body);
                self.indent -= 1;
            }
            ExprKind::If {
                test,
                then,
                otherwise,
            } => {
                self.node("if", ty);
                self.indent += 1;
                self.print(test);
                self.print(then);
                self.print(otherwise);
                self.indent -= 1;
            }
            ExprKind::Fn { params, body } => {
                let params: Vec<String> = params
                    .iter()
                    .map(|p| format!("{}#{}", p.name(), p.id()))
                    .collect();
                self.node(&format!("fn ({})", params.join(" ")), ty);
                self.indent += 1;
                self.print(body);
                self.indent -= 1;
            }
            ExprKind::Ns(decl) => self.node(&format!("ns {}", decl.ns), ty),
            ExprKind::Def { sym, body, .. } => {
                self.node(&format!("def {}", sym), ty);
                self.indent += 1;
                self.print(body);
                self.indent -= 1;
            }
            ExprKind::TypeDef { sym, ty: declared } => {
                let declared = self.namer.render(declared);
                self.node(&format!(":: {} {}", sym, declared), ty);
            }
            ExprKind::DefJ { sym, host, ty: declared } => {
                let declared = self.namer.render(declared);
                self.node(&format!("defj {} {} {}", sym, host, declared), ty);
            }
            ExprKind::DefData(data_type) => {
                self.node(&format!("defdata {}", data_type.sym), ty);
                self.indent += 1;
                for c in &data_type.constructors {
                    let cty = data_type.constructor_type(c);
                    self.node(&c.sym.to_string(), &cty);
                }
                self.indent -= 1;
            }
        }
    }
}
