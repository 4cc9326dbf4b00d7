use brj_analyser::ResolutionError;
use brj_ast::{FQSymbol, Range};
use brj_reader::ReadError;
use brj_runtime::RuntimeError;
use brj_typeck::TypeError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// A typed tree the earlier passes should never have produced.
    #[error("internal consistency error: {message}")]
    Consistency { message: String },

    #[error("[{range}] {sym} takes {expected} arguments, got {found}")]
    ConstructorArity {
        sym: FQSymbol,
        expected: usize,
        found: usize,
        range: Range,
    },

    #[error("backend error: {message}")]
    Backend { message: String },

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl CompileError {
    pub(crate) fn consistency(message: impl Into<String>) -> Self {
        CompileError::Consistency {
            message: message.into(),
        }
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        CompileError::Backend {
            message: message.into(),
        }
    }
}

/// Everything a [`Session`](crate::Session) caller can see go wrong.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("no such var: {0}")]
    UnknownVar(String),

    #[error("could not start the env worker: {0}")]
    Spawn(String),

    #[error("the env worker has stopped")]
    WorkerGone,

    #[error("env update panicked: {0}")]
    Panicked(String),
}

impl From<RuntimeError> for EvalError {
    fn from(err: RuntimeError) -> Self {
        EvalError::Compile(CompileError::Runtime(err))
    }
}
