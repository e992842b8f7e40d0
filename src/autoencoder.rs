//! A two-layer auto-encoder built from the same unit families as the RBM.

use crate::config::TrainingConfig;
use crate::error::{check_len, Error, Result};
use crate::matrix;
use crate::trainer::{self, Parameters};
use crate::transform::Transform;
use crate::units::Unit;
use crate::utils::{AllFinite, ZeroOut};

use ndarray::{Array1, Array2};
use rand::Rng;

/// Standard deviation of the initial weights.
const INIT_STD_DEV: f64 = 0.2;

/// The learned parameters of an auto-encoder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoEncoderParams {
    /// Encoder weights, `input × hidden`.
    pub encode_weights: Array2<f64>,
    /// Decoder weights, `hidden × input`, or `None` when the decoder reuses
    /// the transposed encoder weights.
    pub decode_weights: Option<Array2<f64>>,
    pub hidden_bias: Array1<f64>,
    pub output_bias: Array1<f64>,
}

impl AutoEncoderParams {
    pub fn zeros(input: usize, hidden: usize, tied: bool) -> Self {
        AutoEncoderParams {
            encode_weights: Array2::zeros((input, hidden)),
            decode_weights: if tied {
                None
            } else {
                Some(Array2::zeros((hidden, input)))
            },
            hidden_bias: Array1::zeros(hidden),
            output_bias: Array1::zeros(input),
        }
    }
}

impl ZeroOut for AutoEncoderParams {
    fn zero_out(&mut self) {
        self.encode_weights.zero_out();
        self.decode_weights.zero_out();
        self.hidden_bias.zero_out();
        self.output_bias.zero_out();
    }
}

impl AllFinite for AutoEncoderParams {
    fn all_finite(&self) -> bool {
        self.encode_weights.all_finite()
            && self.decode_weights.all_finite()
            && self.hidden_bias.all_finite()
            && self.output_bias.all_finite()
    }
}

impl Parameters for AutoEncoderParams {
    fn zeros_like(&self) -> Self {
        let (input, hidden) = self.encode_weights.dim();
        AutoEncoderParams::zeros(input, hidden, self.decode_weights.is_none())
    }

    fn scale(&mut self, factor: f64) {
        self.encode_weights *= factor;
        if let Some(w) = self.decode_weights.as_mut() {
            *w *= factor;
        }
        self.hidden_bias *= factor;
        self.output_bias *= factor;
    }

    fn momentum_step(&mut self, velocity: &mut Self, gradient: &Self, config: &TrainingConfig) {
        trainer::momentum_step(
            &mut self.encode_weights,
            &mut velocity.encode_weights,
            &gradient.encode_weights,
            config,
            true,
        );
        if let (Some(p), Some(v), Some(g)) = (
            self.decode_weights.as_mut(),
            velocity.decode_weights.as_mut(),
            gradient.decode_weights.as_ref(),
        ) {
            trainer::momentum_step(p, v, g, config, true);
        }
        trainer::momentum_step(
            &mut self.hidden_bias,
            &mut velocity.hidden_bias,
            &gradient.hidden_bias,
            config,
            false,
        );
        trainer::momentum_step(
            &mut self.output_bias,
            &mut velocity.output_bias,
            &gradient.output_bias,
            config,
            false,
        );
    }
}

/// An encoder/decoder pair trained to reproduce its input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoEncoder {
    /// The reconstruction layer; also fixes the input size.
    output: Unit,
    hidden: Unit,
    params: AutoEncoderParams,
}

impl AutoEncoder {
    /// Initializes a new, untrained auto-encoder.
    ///
    /// Arguments:
    ///
    ///  * `output` - the unit family and size of the reconstruction, which
    ///               is also the size of the input.
    ///  * `hidden` - the latent layer.
    ///  * `tied` - whether the decoder reuses the transposed encoder
    ///             weights.
    pub fn new<R>(output: Unit, hidden: Unit, tied: bool, rng: &mut R) -> Result<Self>
    where
        R: Rng + ?Sized,
    {
        check_sizes(&output, &hidden)?;
        let (input, latent) = (output.size(), hidden.size());
        let encode_weights = matrix::random_normal(rng, input, latent, INIT_STD_DEV);
        let decode_weights = if tied {
            None
        } else {
            Some(matrix::random_normal(rng, latent, input, INIT_STD_DEV))
        };
        let params = AutoEncoderParams {
            encode_weights,
            decode_weights,
            hidden_bias: Array1::zeros(latent),
            output_bias: Array1::zeros(input),
        };
        Ok(AutoEncoder {
            output,
            hidden,
            params,
        })
    }

    /// Creates an auto-encoder from existing parameters, verifying their
    /// shapes.
    pub fn from_params(output: Unit, hidden: Unit, params: AutoEncoderParams) -> Result<Self> {
        check_sizes(&output, &hidden)?;
        check_len("encode weight rows", output.size(), params.encode_weights.nrows())?;
        check_len("encode weight columns", hidden.size(), params.encode_weights.ncols())?;
        if let Some(w) = &params.decode_weights {
            check_len("decode weight rows", hidden.size(), w.nrows())?;
            check_len("decode weight columns", output.size(), w.ncols())?;
        }
        check_len("hidden bias", hidden.size(), params.hidden_bias.len())?;
        check_len("output bias", output.size(), params.output_bias.len())?;
        Ok(AutoEncoder {
            output,
            hidden,
            params,
        })
    }

    pub fn output(&self) -> &Unit {
        &self.output
    }

    pub fn hidden(&self) -> &Unit {
        &self.hidden
    }

    pub fn input_size(&self) -> usize {
        self.output.size()
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden.size()
    }

    pub fn params(&self) -> &AutoEncoderParams {
        &self.params
    }

    /// Whether the decoder shares the encoder's weights.
    pub fn is_tied(&self) -> bool {
        self.params.decode_weights.is_none()
    }

    /// Maps an input to its latent code.
    ///
    /// Panics if `x` does not have `input_size` entries.
    pub fn encode(&self, x: &Array1<f64>) -> Array1<f64> {
        assert_eq!(x.len(), self.input_size());
        let pre = x.dot(&self.params.encode_weights) + &self.params.hidden_bias;
        self.hidden.expected(&pre)
    }

    /// Maps a latent code back to input space.
    ///
    /// Panics if `h` does not have `hidden_size` entries.
    pub fn decode(&self, h: &Array1<f64>) -> Array1<f64> {
        assert_eq!(h.len(), self.hidden_size());
        self.output.expected(&self.decode_preactivation(h))
    }

    pub fn reconstruct(&self, x: &Array1<f64>) -> Array1<f64> {
        self.decode(&self.encode(x))
    }

    /// The loss of the reconstruction of `x`, measured with the output
    /// family's matching loss.
    pub fn reconstruction_loss(&self, x: &Array1<f64>) -> f64 {
        self.output.loss(x, &self.reconstruct(x))
    }

    fn decode_preactivation(&self, h: &Array1<f64>) -> Array1<f64> {
        let linear = match &self.params.decode_weights {
            Some(w) => h.dot(w),
            None => self.params.encode_weights.dot(h),
        };
        linear + &self.params.output_bias
    }

    /// Projects an output-space error back onto the hidden layer, through
    /// whichever matrix the decoder uses.
    pub(crate) fn decode_transpose(&self, delta: &Array1<f64>) -> Array1<f64> {
        match &self.params.decode_weights {
            Some(w) => w.dot(delta),
            None => delta.dot(&self.params.encode_weights),
        }
    }

    pub(crate) fn params_mut(&mut self) -> &mut AutoEncoderParams {
        &mut self.params
    }
}

impl Transform for AutoEncoder {
    type Input = Array1<f64>;
    type Output = Array1<f64>;

    fn transform(&self, x: &Array1<f64>) -> Result<Array1<f64>> {
        check_len("input vector", self.input_size(), x.len())?;
        Ok(self.encode(x))
    }
}

fn check_sizes(output: &Unit, hidden: &Unit) -> Result<()> {
    if output.size() == 0 || hidden.size() == 0 {
        return Err(Error::InvalidConfiguration(format!(
            "layer sizes must be positive, got {} input and {} hidden",
            output.size(),
            hidden.size()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn tied_identity_reconstructs_input() {
        let params = AutoEncoderParams {
            encode_weights: Array2::eye(3),
            decode_weights: None,
            hidden_bias: Array1::zeros(3),
            output_bias: Array1::zeros(3),
        };
        let ae = AutoEncoder::from_params(Unit::gaussian(3), Unit::gaussian(3), params).unwrap();
        let x = array![0.25, -1.5, 3.0];
        let y = ae.reconstruct(&x);
        for i in 0..3 {
            assert_abs_diff_eq!(y[i], x[i], epsilon = 1e-12);
        }
        assert_abs_diff_eq!(ae.reconstruction_loss(&x), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn new_allocates_decoder_only_when_untied() {
        let mut rng = StdRng::seed_from_u64(0);
        let tied = AutoEncoder::new(Unit::binary(5), Unit::binary(2), true, &mut rng).unwrap();
        assert!(tied.is_tied());
        assert_eq!(tied.params().encode_weights.dim(), (5, 2));

        let untied = AutoEncoder::new(Unit::binary(5), Unit::binary(2), false, &mut rng).unwrap();
        assert!(!untied.is_tied());
        assert_eq!(untied.params().decode_weights.as_ref().map(|w| w.dim()), Some((2, 5)));

        assert!(matches!(
            AutoEncoder::new(Unit::binary(0), Unit::binary(2), true, &mut rng),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn from_params_checks_shapes() {
        let mut params = AutoEncoderParams::zeros(4, 2, false);
        params.decode_weights = Some(Array2::zeros((4, 2)));
        assert_eq!(
            AutoEncoder::from_params(Unit::binary(4), Unit::binary(2), params),
            Err(Error::DimensionMismatch {
                context: "decode weight rows",
                expected: 2,
                actual: 4,
            })
        );
    }

    #[test]
    fn tied_decoder_uses_transposed_encoder() {
        let w = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let tied = AutoEncoderParams {
            encode_weights: w.clone(),
            decode_weights: None,
            hidden_bias: Array1::zeros(2),
            output_bias: Array1::zeros(3),
        };
        let untied = AutoEncoderParams {
            decode_weights: Some(w.t().to_owned()),
            ..tied.clone()
        };
        let a = AutoEncoder::from_params(Unit::gaussian(3), Unit::gaussian(2), tied).unwrap();
        let b = AutoEncoder::from_params(Unit::gaussian(3), Unit::gaussian(2), untied).unwrap();
        let x = array![1.0, -1.0, 0.5];
        assert_eq!(a.reconstruct(&x), b.reconstruct(&x));
        assert_eq!(a.decode_transpose(&x), b.decode_transpose(&x));
    }

    #[test]
    fn transform_checks_length() {
        let mut rng = StdRng::seed_from_u64(1);
        let ae = AutoEncoder::new(Unit::binary(3), Unit::binary(2), true, &mut rng).unwrap();
        assert_eq!(ae.transform(&array![1.0, 0.0, 1.0]).unwrap().len(), 2);
        assert!(matches!(
            ae.transform(&array![1.0]),
            Err(Error::DimensionMismatch { context: "input vector", .. })
        ));
    }
}
