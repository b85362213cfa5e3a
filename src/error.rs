//! Error types shared across the bridge.
//!
//! Every failure surfaces synchronously to the immediate caller. Failures
//! raised inside a registered native function during script execution never
//! reach the host as an [`Error`]; they are converted into a script-level
//! fault string at the native/script boundary (see [`crate::adapter`]).

/// Errors produced by the value bridge and session layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A value's actual kind differs from what the operation required.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Source failed to compile; carries the engine's rendered error.
    #[error("compile error: {0}")]
    CompileError(String),

    /// A runtime-level fault during execution or call.
    #[error("script error: {0}")]
    ScriptError(String),

    /// A nested-table pull exceeded the configured recursion budget.
    ///
    /// A subkind of script error: the traversal guard against cyclic engine
    /// tables fired. Only raised when the `truncate-deep-tables` feature is
    /// disabled; otherwise the untraversed subtree reads as nil.
    #[error("table too deep: recursion budget exhausted")]
    TableTooDeep,

    /// An operation was invoked on a session whose engine has been released.
    #[error("uninitialized resource: {0}")]
    UninitializedResource(&'static str),

    /// A malformed argument, such as an unrecognized load-mode token.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine's stack could not be grown to the required capacity.
    #[error("stack overflow: engine refused to grow its stack")]
    StackOverflow,
}

impl Error {
    /// Construct a `TypeMismatch` from the expected and actual kind names.
    pub fn mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Error::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl From<crate::engine::EngineFault> for Error {
    fn from(fault: crate::engine::EngineFault) -> Error {
        match fault {
            crate::engine::EngineFault::Compile(msg) => Error::CompileError(msg),
            crate::engine::EngineFault::Runtime(msg) => Error::ScriptError(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
