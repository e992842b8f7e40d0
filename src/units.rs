//! Stochastic unit families.
//!
//! A `Unit` describes one layer of nodes: how a pre-activation vector turns
//! into an expected activation, how a stochastic state is drawn from it, and
//! what the layer contributes to an energy function.

use crate::error::{Error, Result};

use ndarray::Array1;
use rand::Rng;
use rand_distr::StandardNormal;
use std::fmt;
use std::str::FromStr;

/// Smallest probability fed to a logarithm when computing cross-entropy.
const LOG_FLOOR: f64 = 1e-12;

/// The closed set of supported unit families.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum UnitFamily {
    /// Bernoulli units with a logistic sigmoid activation.
    Binary,
    /// Linear units with additive zero-mean Gaussian noise of the given
    /// variance.
    ///
    /// The variance only sets the spread of sampled states. Energies, free
    /// energies and losses always use the unit-variance quadratic, so data
    /// fed to Gaussian layers should be standardized.
    Gaussian { variance: f64 },
    /// A single categorical variable encoded one-hot across the layer.
    Softmax,
}

impl UnitFamily {
    /// Gaussian units with unit variance.
    pub fn gaussian() -> Self {
        UnitFamily::Gaussian { variance: 1.0 }
    }

    /// Gaussian units with a fixed `variance`, which must be finite and
    /// positive.
    pub fn gaussian_with_variance(variance: f64) -> Result<Self> {
        if !(variance.is_finite() && variance > 0.0) {
            return Err(Error::InvalidUnitFamily(format!(
                "gaussian variance must be positive, got {}",
                variance
            )));
        }
        Ok(UnitFamily::Gaussian { variance })
    }

    /// Short tag naming the family.
    pub fn tag(&self) -> &'static str {
        match self {
            UnitFamily::Binary => "binary",
            UnitFamily::Gaussian { .. } => "gaussian",
            UnitFamily::Softmax => "softmax",
        }
    }
}

impl FromStr for UnitFamily {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "binary" | "bernoulli" | "sigmoid" => Ok(UnitFamily::Binary),
            "gaussian" | "linear" => Ok(UnitFamily::gaussian()),
            "softmax" | "categorical" => Ok(UnitFamily::Softmax),
            _ => Err(Error::InvalidUnitFamily(tag.to_string())),
        }
    }
}

impl fmt::Display for UnitFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UnitFamily::Gaussian { variance } if *variance != 1.0 => {
                write!(f, "gaussian(variance={})", variance)
            }
            _ => f.write_str(self.tag()),
        }
    }
}

/// A layer's expected activation paired with a stochastic sample from it.
#[derive(Clone, Debug, PartialEq)]
pub struct Activation {
    pub expected: Array1<f64>,
    pub sample: Array1<f64>,
}

/// Describes a layer of `size` units of a single family.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    family: UnitFamily,
    size: usize,
}

impl Unit {
    pub fn new(family: UnitFamily, size: usize) -> Self {
        Unit { family, size }
    }

    pub fn binary(size: usize) -> Self {
        Unit::new(UnitFamily::Binary, size)
    }

    pub fn gaussian(size: usize) -> Self {
        Unit::new(UnitFamily::gaussian(), size)
    }

    pub fn softmax(size: usize) -> Self {
        Unit::new(UnitFamily::Softmax, size)
    }

    pub fn family(&self) -> UnitFamily {
        self.family
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Maps a pre-activation vector to the layer's expected activation.
    pub fn expected(&self, pre: &Array1<f64>) -> Array1<f64> {
        match self.family {
            UnitFamily::Binary => pre.mapv(sigmoid),
            UnitFamily::Gaussian { .. } => pre.clone(),
            UnitFamily::Softmax => softmax(pre),
        }
    }

    /// Draws a stochastic state whose mean is `expected`.
    pub fn sample<R>(&self, expected: &Array1<f64>, rng: &mut R) -> Array1<f64>
    where
        R: Rng + ?Sized,
    {
        match self.family {
            UnitFamily::Binary => expected.mapv(|p| {
                if rng.gen::<f64>() < p {
                    1.0
                } else {
                    0.0
                }
            }),
            UnitFamily::Gaussian { variance } => {
                let std_dev = variance.sqrt();
                expected.mapv(|mean| {
                    let noise: f64 = rng.sample(StandardNormal);
                    mean + std_dev * noise
                })
            }
            UnitFamily::Softmax => {
                let mut one_hot = Array1::<f64>::zeros(expected.len());
                if !one_hot.is_empty() {
                    one_hot[categorical_index(expected, rng)] = 1.0;
                }
                one_hot
            }
        }
    }

    /// Computes the expected activation and a sample drawn from it.
    pub fn activate<R>(&self, pre: &Array1<f64>, rng: &mut R) -> Activation
    where
        R: Rng + ?Sized,
    {
        let expected = self.expected(pre);
        let sample = self.sample(&expected, rng);
        Activation { expected, sample }
    }

    /// The layer's contribution to a free energy once it has been summed
    /// (or integrated) out, given its total input `pre`.
    ///
    /// Constant terms that do not depend on `pre` are dropped. Gaussian
    /// layers use `Σx²/2` whatever their sampling variance.
    pub fn log_partition(&self, pre: &Array1<f64>) -> f64 {
        match self.family {
            UnitFamily::Binary => pre.iter().map(|&x| softplus(x)).sum(),
            UnitFamily::Gaussian { .. } => {
                pre.iter().map(|&x| 0.5 * x * x).sum()
            }
            UnitFamily::Softmax => log_sum_exp(pre),
        }
    }

    /// The energy a state of this layer carries on its own, independent of
    /// biases and connections: `‖v‖²/2` for Gaussian layers of any sampling
    /// variance.
    pub fn self_energy(&self, state: &Array1<f64>) -> f64 {
        match self.family {
            UnitFamily::Gaussian { .. } => 0.5 * state.dot(state),
            _ => 0.0,
        }
    }

    /// Multiplies `upstream` by the Jacobian of the activation, evaluated
    /// at the layer's *output* `y`.
    pub fn backprop(&self, y: &Array1<f64>, upstream: &Array1<f64>) -> Array1<f64> {
        match self.family {
            UnitFamily::Binary => y.mapv(|y| y * (1.0 - y)) * upstream,
            UnitFamily::Gaussian { .. } => upstream.clone(),
            UnitFamily::Softmax => {
                let inner = y.dot(upstream);
                y * &upstream.mapv(|g| g - inner)
            }
        }
    }

    /// Reconstruction loss of `output` against `target` for this family:
    /// squared error for Gaussian units, cross-entropy otherwise.
    pub fn loss(&self, target: &Array1<f64>, output: &Array1<f64>) -> f64 {
        match self.family {
            UnitFamily::Gaussian { .. } => {
                0.5 * target
                    .iter()
                    .zip(output.iter())
                    .map(|(t, o)| (t - o) * (t - o))
                    .sum::<f64>()
            }
            UnitFamily::Binary => -target
                .iter()
                .zip(output.iter())
                .map(|(&t, &o)| {
                    t * o.max(LOG_FLOOR).ln()
                        + (1.0 - t) * (1.0 - o).max(LOG_FLOOR).ln()
                })
                .sum::<f64>(),
            UnitFamily::Softmax => -target
                .iter()
                .zip(output.iter())
                .map(|(&t, &o)| t * o.max(LOG_FLOOR).ln())
                .sum::<f64>(),
        }
    }
}

/// The logistic function.
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// `ln(1 + e^x)`, computed without overflow for large `|x|`.
pub fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

fn log_sum_exp(x: &Array1<f64>) -> f64 {
    let max = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + x.iter().map(|&v| (v - max).exp()).sum::<f64>().ln()
}

fn softmax(x: &Array1<f64>) -> Array1<f64> {
    let max = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exp = x.mapv(|v| (v - max).exp());
    let total = exp.sum();
    exp / total
}

/// Picks an index with probability proportional to `weights`.
fn categorical_index<R>(weights: &Array1<f64>, rng: &mut R) -> usize
where
    R: Rng + ?Sized,
{
    let total: f64 = weights.sum();
    let threshold = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        cumulative += w;
        if threshold < cumulative {
            return i;
        }
    }
    weights.len() - 1
}
