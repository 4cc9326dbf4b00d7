use brj_ast::{FQSymbol, Symbol, NS};
use brj_reader::Range;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolutionError {
    #[error("[{range}] unable to resolve symbol: {sym}")]
    Unresolved { sym: String, range: Range },

    #[error("[{range}] unknown namespace: {ns}")]
    UnknownNamespace { ns: NS, range: Range },

    #[error("[{range}] alias {alias} clashes with existing namespace {alias} (it points at {target})")]
    AmbiguousAlias { alias: Symbol, target: NS, range: Range },

    #[error("[{range}] {sym} is referred from both {first} and {second}")]
    AmbiguousRefer {
        sym: Symbol,
        first: NS,
        second: NS,
        range: Range,
    },

    #[error("[{range}] unknown host module: {module}")]
    UnknownHostModule { module: String, range: Range },

    #[error("[{range}] host module {module} has no function {name}")]
    UnknownHostFn {
        module: FQSymbol,
        name: Symbol,
        range: Range,
    },

    #[error("[{range}] {message}")]
    Malformed { message: String, range: Range },
}

impl ResolutionError {
    pub fn range(&self) -> Range {
        match self {
            ResolutionError::Unresolved { range, .. }
            | ResolutionError::UnknownNamespace { range, .. }
            | ResolutionError::AmbiguousAlias { range, .. }
            | ResolutionError::AmbiguousRefer { range, .. }
            | ResolutionError::UnknownHostModule { range, .. }
            | ResolutionError::UnknownHostFn { range, .. }
            | ResolutionError::Malformed { range, .. } => *range,
        }
    }
}

pub(crate) fn malformed(message: impl Into<String>, range: Range) -> ResolutionError {
    ResolutionError::Malformed {
        message: message.into(),
        range,
    }
}
