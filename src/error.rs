//! Error types shared by every model and trainer.

use thiserror::Error;

/// Failures surfaced by model construction, inference and training.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// An unrecognized unit family tag, or invalid family parameters.
    #[error("invalid unit family: {0}")]
    InvalidUnitFamily(String),

    /// A weight, bias or input vector whose shape disagrees with the
    /// declared unit sizes.
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A recursive structure that is cyclic, refers to missing positions, or
    /// assembles a visible vector of the wrong size.
    #[error("structural mismatch: {0}")]
    StructuralMismatch(String),

    /// A non-finite activation or gradient was produced during training.
    ///
    /// The model has been restored to the parameters it held after
    /// `last_stable_epoch` completed (`None` means the initial parameters).
    #[error("numerical instability in epoch {epoch}")]
    NumericalInstability {
        epoch: usize,
        last_stable_epoch: Option<usize>,
    },

    /// An out-of-range training option.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Returns a `DimensionMismatch` error unless `actual == expected`.
pub(crate) fn check_len(
    context: &'static str,
    expected: usize,
    actual: usize,
) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch {
            context,
            expected,
            actual,
        })
    }
}
