use crate::error::Result;

/// Read-only inference with fitted parameters.
pub trait Transform {
    type Input: ?Sized;
    type Output;

    /// Maps `input` to its latent representation.
    fn transform(&self, input: &Self::Input) -> Result<Self::Output>;
}
