use thiserror::Error;

/// Errors produced when parsing money values or account keys from text.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("unsupported currency: {0}")]
    UnknownCurrency(String),
    #[error("invalid account key: {0}")]
    InvalidKey(String),
}
