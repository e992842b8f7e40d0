//! Backpropagation of reconstruction error through an [`AutoEncoder`].
//!
//! The output loss is chosen to match the output unit family (squared error
//! for Gaussian units, cross-entropy for binary and softmax units), so the
//! error at the output pre-activation is simply `x − y`. It is then pushed
//! back through the decoder weights and the hidden activation.

use crate::autoencoder::{AutoEncoder, AutoEncoderParams};
use crate::config::TrainingConfig;
use crate::error::{check_len, Result};
use crate::matrix;
use crate::trainer::{Trainable, Trainer};

use ndarray::Array1;
use rand::Rng;

/// Trains an [`AutoEncoder`] by gradient descent on its reconstruction loss.
pub type BackpropTrainer = Trainer<AutoEncoder>;

impl Trainable for AutoEncoder {
    type Example = Array1<f64>;
    type Params = AutoEncoderParams;

    fn params(&self) -> &AutoEncoderParams {
        AutoEncoder::params(self)
    }

    fn params_mut(&mut self) -> &mut AutoEncoderParams {
        AutoEncoder::params_mut(self)
    }

    fn check_example(&self, x: &Array1<f64>) -> Result<()> {
        check_len("input vector", self.input_size(), x.len())
    }

    fn accumulate_gradient<R>(
        &self,
        x: &Array1<f64>,
        config: &TrainingConfig,
        _rng: &mut R,
        gradient: &mut AutoEncoderParams,
    ) -> Result<f64>
    where
        R: Rng + ?Sized,
    {
        self.check_example(x)?;
        let h = self.encode(x);
        let y = self.decode(&h);

        // Gradients point downhill on the loss.
        let output_delta = x - &y;
        let mut hidden_delta = self.hidden().backprop(&h, &self.decode_transpose(&output_delta));
        if let Some(sparsity) = &config.sparsity {
            hidden_delta -= &h.mapv(|h| sparsity.penalty * (h - sparsity.target));
        }

        matrix::add_outer(&mut gradient.encode_weights, 1.0, x, &hidden_delta);
        match gradient.decode_weights.as_mut() {
            Some(w) => matrix::add_outer(w, 1.0, &h, &output_delta),
            // Tied: the decoder's contribution lands on the shared matrix.
            None => matrix::add_outer(&mut gradient.encode_weights, 1.0, &output_delta, &h),
        }
        gradient.hidden_bias += &hidden_delta;
        gradient.output_bias += &output_delta;

        Ok(self.output().loss(x, &y))
    }
}
