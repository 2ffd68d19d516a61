use std::io;
use std::path::PathBuf;

/// Errors produced by dataset loading, evaluation and training.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A dataset or weight file could not be found.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    /// A weight vector does not match the model's feature dimension.
    #[error("weight vector has dimension {got}, model expects {expected}")]
    InvalidDimension { expected: usize, got: usize },
    /// An internal vector (gradient buffer, history entry) has the wrong length.
    #[error("vector has dimension {got}, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },
    /// An objective or gradient evaluation produced NaN or infinity.
    #[error("objective or gradient evaluation produced a non-finite value")]
    NotANumber,
    /// The line search could not make progress within machine precision.
    #[error("line search failed to satisfy its conditions within machine precision")]
    Roundoff,
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A persisted weight file contains a line that is not a real number.
    #[error("line {line}: invalid weight value {text:?}")]
    ParseWeight { line: usize, text: String },
}

pub type Result<T> = std::result::Result<T, Error>;
