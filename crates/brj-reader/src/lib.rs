use std::fmt;

use logos::Logos;
use smol_str::SmolStr;

mod form;

pub use form::{read, read_all, Form, FormKind};

/// Source span as byte offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// 1-based line/column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Line/column range attached to every form. Used for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Range {
    pub start: Pos,
    pub end: Pos,
}

impl Range {
    pub fn new(start: Pos, end: Pos) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Byte offset → line/column lookup for one source text. Columns count
/// characters, not bytes.
pub struct LineIndex<'a> {
    source: &'a str,
    line_starts: Vec<u32>,
}

impl<'a> LineIndex<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        Self { source, line_starts }
    }

    pub fn pos(&self, offset: u32) -> Pos {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let start = self.line_starts[line] as usize;
        let col = match self.source.get(start..offset as usize) {
            Some(text) => text.chars().count() as u32,
            None => offset - start as u32,
        };
        Pos {
            line: line as u32 + 1,
            col: col + 1,
        }
    }

    pub fn range(&self, span: Span) -> Range {
        Range::new(self.pos(span.start), self.pos(span.end))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("[{range}] {message}")]
pub struct ReadError {
    pub message: String,
    pub range: Range,
}

fn parse_string(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1];
    let mut result = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                'n' => result.push('\n'),
                't' => result.push('\t'),
                'r' => result.push('\r'),
                '\\' => result.push('\\'),
                '"' => result.push('"'),
                '0' => result.push('\0'),
                other => {
                    result.push('\\');
                    result.push(other);
                }
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n,]+")]
#[logos(skip r";[^\n]*")]
pub enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("#{")]
    HashBrace,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    #[regex(r"-?[0-9]+", priority = 3, callback = |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""([^"\\]|\\.)*""#, callback = parse_string)]
    String(String),

    #[token("true")]
    True,
    #[token("false")]
    False,

    /// The ascription operator `::`.
    #[token("::")]
    ColonColon,

    /// Symbol, possibly qualified: `foo`, `+`, `my.ns/greet`
    #[regex(r"[a-zA-Z_+\-*/<>=!&|^~?][a-zA-Z0-9_+\-*/<>=!&|^~.?]*", priority = 1, callback = |lex| SmolStr::new(lex.slice()))]
    Symbol(SmolStr),
}

/// Lex source code into a list of (token, span) pairs.
pub fn lex(source: &str) -> (Vec<(Token, Span)>, Vec<Span>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let span = Span::new(range.start as u32, range.end as u32);
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(_) => errors.push(span),
        }
    }

    (tokens, errors)
}
