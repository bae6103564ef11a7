use thiserror::Error;

/// Everything that can abort a conversion. All of these are fatal: the
/// output file is left as flushed and the process exits nonzero.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse failure: {0}")]
    Parse(String),
    #[error("cannot find identifier in declarator for {0:?}")]
    MissingDeclarator(String),
    #[error("unknown token {0:?} in declarator")]
    UnknownToken(String),
    #[error("cannot find member {0:?} in initialized aggregate")]
    UnknownField(String),
    #[error("unknown enum constant {0:?}")]
    UnknownEnumConstant(String),
    #[error("unsupported expression: {0}")]
    UnsupportedExpression(String),
    #[error("mixed array and member designators in one initializer list")]
    MixedDesignators,
    #[error("cannot resolve enclosing compound statement")]
    NoEnclosingScope,
    #[error("cannot parse type {0:?} in floating-point evaluator")]
    FloatCastType(String),
}

pub type Result<T> = std::result::Result<T, Error>;
