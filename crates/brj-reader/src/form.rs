use std::fmt;

use smol_str::SmolStr;

use crate::{lex, LineIndex, Range, ReadError, Span, Token};

/// A read form: the structural tree the analyser consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct Form {
    pub kind: FormKind,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormKind {
    Bool(bool),
    Int(i64),
    Str(String),
    Symbol(SmolStr),
    /// `ns/name`, split at the first `/` that is neither leading nor trailing.
    QSymbol(SmolStr, SmolStr),
    List(Vec<Form>),
    Vector(Vec<Form>),
    Set(Vec<Form>),
    /// `{k v ...}`, kept as ordered pairs.
    Map(Vec<(Form, Form)>),
}

impl Form {
    pub fn as_symbol(&self) -> Option<&str> {
        match &self.kind {
            FormKind::Symbol(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_symbol(&self, name: &str) -> bool {
        self.as_symbol() == Some(name)
    }

    /// Short description used in "expected X, got Y" diagnostics.
    pub fn describe(&self) -> &'static str {
        match &self.kind {
            FormKind::Bool(_) => "boolean",
            FormKind::Int(_) => "integer",
            FormKind::Str(_) => "string",
            FormKind::Symbol(_) => "symbol",
            FormKind::QSymbol(..) => "qualified symbol",
            FormKind::List(_) => "list",
            FormKind::Vector(_) => "vector",
            FormKind::Set(_) => "set",
            FormKind::Map(_) => "map",
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, forms: &[Form], close: &str) -> fmt::Result {
    f.write_str(open)?;
    for (i, form) in forms.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{}", form)?;
    }
    f.write_str(close)
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FormKind::Bool(b) => write!(f, "{}", b),
            FormKind::Int(n) => write!(f, "{}", n),
            FormKind::Str(s) => write!(f, "{:?}", s),
            FormKind::Symbol(s) => write!(f, "{}", s),
            FormKind::QSymbol(ns, name) => write!(f, "{}/{}", ns, name),
            FormKind::List(forms) => write_seq(f, "(", forms, ")"),
            FormKind::Vector(forms) => write_seq(f, "[", forms, "]"),
            FormKind::Set(forms) => write_seq(f, "#{", forms, "}"),
            FormKind::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                f.write_str("}")
            }
        }
    }
}

fn symbol_kind(name: SmolStr) -> FormKind {
    match name.find('/') {
        Some(idx) if idx > 0 && idx < name.len() - 1 => {
            FormKind::QSymbol(SmolStr::new(&name[..idx]), SmolStr::new(&name[idx + 1..]))
        }
        _ => FormKind::Symbol(name),
    }
}

/// Read every top-level form in `source`, collecting errors instead of stopping at the first.
pub fn read(source: &str) -> (Vec<Form>, Vec<ReadError>) {
    let index = LineIndex::new(source);
    let (tokens, lex_errors) = lex(source);
    let mut reader = Reader {
        tokens: &tokens,
        pos: 0,
        index: &index,
        errors: lex_errors
            .into_iter()
            .map(|span| ReadError {
                message: format!(
                    "unexpected character '{}'",
                    &source[span.start as usize..span.end as usize]
                ),
                range: index.range(span),
            })
            .collect(),
    };
    let mut result = Vec::new();
    while !reader.at_end() {
        if let Some(form) = reader.read_form() {
            result.push(form);
        }
    }
    (result, reader.errors)
}

/// Read `source`, failing on the first error.
pub fn read_all(source: &str) -> Result<Vec<Form>, ReadError> {
    let (forms, mut errors) = read(source);
    if errors.is_empty() {
        Ok(forms)
    } else {
        Err(errors.remove(0))
    }
}

struct Reader<'a> {
    tokens: &'a [(Token, Span)],
    pos: usize,
    index: &'a LineIndex<'a>,
    errors: Vec<ReadError>,
}

impl<'a> Reader<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> (Token, Span) {
        let tok = self.tokens[self.pos].clone();
        self.pos += 1;
        tok
    }

    fn error(&mut self, message: impl Into<String>, span: Span) {
        self.errors.push(ReadError {
            message: message.into(),
            range: self.index.range(span),
        });
    }

    /// Reads children up to the closing token. `None` if the input ends first.
    fn read_seq(&mut self, close: &Token, open: &str, start: Span) -> Option<(Vec<Form>, Span)> {
        let mut children = Vec::new();
        loop {
            match self.peek() {
                None => {
                    self.error(format!("unclosed '{}'", open), start);
                    return None;
                }
                Some(t) if t == close => {
                    let (_, end) = self.advance();
                    return Some((children, start.merge(end)));
                }
                Some(_) => {
                    if let Some(child) = self.read_form() {
                        children.push(child);
                    }
                }
            }
        }
    }

    fn read_form(&mut self) -> Option<Form> {
        let (token, span) = self.advance();
        let kind = match token {
            Token::Int(n) => FormKind::Int(n),
            Token::String(s) => FormKind::Str(s),
            Token::True => FormKind::Bool(true),
            Token::False => FormKind::Bool(false),
            Token::ColonColon => FormKind::Symbol(SmolStr::new_static("::")),
            Token::Symbol(name) => symbol_kind(name),

            Token::LParen => {
                let (children, span) = self.read_seq(&Token::RParen, "(", span)?;
                return Some(self.form(FormKind::List(children), span));
            }
            Token::LBracket => {
                let (children, span) = self.read_seq(&Token::RBracket, "[", span)?;
                return Some(self.form(FormKind::Vector(children), span));
            }
            Token::HashBrace => {
                let (children, span) = self.read_seq(&Token::RBrace, "#{", span)?;
                return Some(self.form(FormKind::Set(children), span));
            }
            Token::LBrace => {
                let (children, span) = self.read_seq(&Token::RBrace, "{", span)?;
                if children.len() % 2 != 0 {
                    self.error("map literal must contain an even number of forms", span);
                    return None;
                }
                let mut entries = Vec::with_capacity(children.len() / 2);
                let mut iter = children.into_iter();
                while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                    entries.push((k, v));
                }
                return Some(self.form(FormKind::Map(entries), span));
            }

            Token::RParen | Token::RBracket | Token::RBrace => {
                let text = match token {
                    Token::RParen => ")",
                    Token::RBracket => "]",
                    _ => "}",
                };
                self.error(format!("unexpected '{}'", text), span);
                return None;
            }
        };
        Some(self.form(kind, span))
    }

    fn form(&self, kind: FormKind, span: Span) -> Form {
        Form {
            kind,
            range: self.index.range(span),
        }
    }
}
