use thiserror::Error;

/// Compile-time failures: the expression text cannot become a program.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("type error: {0}")]
    Type(String),
}

impl ExprError {
    pub(crate) fn parse(offset: usize, message: impl Into<String>) -> Self {
        ExprError::Parse {
            offset,
            message: message.into(),
        }
    }
}

/// Runtime failures while evaluating a compiled program.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("no such key '{0}'")]
    NoSuchKey(String),
    #[error("index {0} out of range")]
    IndexOutOfRange(i64),
    #[error("{0}")]
    TypeMismatch(String),
    #[error("expression returned {0}, expected a boolean")]
    NonBoolean(&'static str),
}
