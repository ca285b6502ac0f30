use thiserror::Error;

use crate::application::LayerError;

/// Banker custom errors.
#[derive(Error, Debug)]
pub enum BankerError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("\"{0}\" account not found!")]
    UnknownAccount(String),
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
    #[error("merge invariant violated: {0}")]
    MergeInvariant(String),
    #[error("sync task failed: {0}")]
    Task(String),
    #[error(transparent)]
    Layer(#[from] LayerError),
}
