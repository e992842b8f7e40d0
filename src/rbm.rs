//! A [Restricted Boltzmann Machine]
//! (https://en.wikipedia.org/wiki/Restricted_Boltzmann_machine).
//!
//! The energy of a joint configuration is
//!
//! ```text
//! E(v, h) = S_v(v) + S_h(h) − vᵗWh − b_vᵗv − b_hᵗh
//! ```
//!
//! where `S` is each layer's self energy (zero for binary and softmax units,
//! `‖x‖²/2` for Gaussian units).
//!
//! # Example
//!
//! ```
//! # use ebm::prelude::*;
//! # use ndarray::array;
//! # use rand::{rngs::StdRng, SeedableRng};
//! let mut rng = StdRng::seed_from_u64(42);
//! let mut rbm = Rbm::new(Unit::binary(4), Unit::binary(2), &mut rng).unwrap();
//!
//! let data = vec![array![1.0, 1.0, 0.0, 0.0], array![0.0, 0.0, 1.0, 1.0]];
//! let config = TrainingConfig::default().epochs(50).learning_rate(0.1);
//! let report = train(&mut rbm, &data, config, &mut rng).unwrap();
//!
//! assert_eq!(report.epochs.len(), 50);
//! assert_eq!(rbm.transform(&data[0]).unwrap().len(), 2);
//! ```

use crate::config::TrainingConfig;
use crate::error::{check_len, Error, Result};
use crate::matrix;
use crate::trainer::{self, Parameters};
use crate::transform::Transform;
use crate::units::{Activation, Unit, UnitFamily};
use crate::utils::{AllFinite, ZeroOut};

use ndarray::{Array1, Array2};
use rand::Rng;

/// Standard deviation of the initial weights.
const INIT_STD_DEV: f64 = 0.01;

/// The learned parameters of an RBM.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RbmParams {
    /// Interaction weights, `visible × hidden`.
    pub weights: Array2<f64>,
    pub visible_bias: Array1<f64>,
    pub hidden_bias: Array1<f64>,
}

impl RbmParams {
    pub fn zeros(visible: usize, hidden: usize) -> Self {
        RbmParams {
            weights: Array2::zeros((visible, hidden)),
            visible_bias: Array1::zeros(visible),
            hidden_bias: Array1::zeros(hidden),
        }
    }

    /// Accumulates `scale` times the sufficient statistics of one
    /// `(visible, hidden)` configuration.
    pub(crate) fn add_statistics(&mut self, scale: f64, v: &Array1<f64>, h: &Array1<f64>) {
        matrix::add_outer(&mut self.weights, scale, v, h);
        self.visible_bias.scaled_add(scale, v);
        self.hidden_bias.scaled_add(scale, h);
    }

    /// Adds `other` into `self`.
    pub(crate) fn add(&mut self, other: &RbmParams) {
        self.weights += &other.weights;
        self.visible_bias += &other.visible_bias;
        self.hidden_bias += &other.hidden_bias;
    }
}

impl ZeroOut for RbmParams {
    fn zero_out(&mut self) {
        self.weights.zero_out();
        self.visible_bias.zero_out();
        self.hidden_bias.zero_out();
    }
}

impl AllFinite for RbmParams {
    fn all_finite(&self) -> bool {
        self.weights.all_finite()
            && self.visible_bias.all_finite()
            && self.hidden_bias.all_finite()
    }
}

impl Parameters for RbmParams {
    fn zeros_like(&self) -> Self {
        let (visible, hidden) = self.weights.dim();
        RbmParams::zeros(visible, hidden)
    }

    fn scale(&mut self, factor: f64) {
        self.weights *= factor;
        self.visible_bias *= factor;
        self.hidden_bias *= factor;
    }

    fn momentum_step(&mut self, velocity: &mut Self, gradient: &Self, config: &TrainingConfig) {
        trainer::momentum_step(
            &mut self.weights,
            &mut velocity.weights,
            &gradient.weights,
            config,
            true,
        );
        trainer::momentum_step(
            &mut self.visible_bias,
            &mut velocity.visible_bias,
            &gradient.visible_bias,
            config,
            false,
        );
        trainer::momentum_step(
            &mut self.hidden_bias,
            &mut velocity.hidden_bias,
            &gradient.hidden_bias,
            config,
            false,
        );
    }
}

/// A two-layer undirected model of visible and hidden units.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rbm {
    visible: Unit,
    hidden: Unit,
    params: RbmParams,
}

impl Rbm {
    /// Creates a new, untrained RBM with small random weights and zero
    /// biases.
    pub fn new<R>(visible: Unit, hidden: Unit, rng: &mut R) -> Result<Self>
    where
        R: Rng + ?Sized,
    {
        check_sizes(&visible, &hidden)?;
        let params = RbmParams {
            weights: matrix::random_normal(rng, visible.size(), hidden.size(), INIT_STD_DEV),
            visible_bias: Array1::zeros(visible.size()),
            hidden_bias: Array1::zeros(hidden.size()),
        };
        Ok(Rbm {
            visible,
            hidden,
            params,
        })
    }

    /// Creates an RBM from existing parameters, verifying their shapes.
    pub fn from_params(visible: Unit, hidden: Unit, params: RbmParams) -> Result<Self> {
        check_sizes(&visible, &hidden)?;
        check_len("weight rows", visible.size(), params.weights.nrows())?;
        check_len("weight columns", hidden.size(), params.weights.ncols())?;
        check_len("visible bias", visible.size(), params.visible_bias.len())?;
        check_len("hidden bias", hidden.size(), params.hidden_bias.len())?;
        Ok(Rbm {
            visible,
            hidden,
            params,
        })
    }

    pub fn visible(&self) -> &Unit {
        &self.visible
    }

    pub fn hidden(&self) -> &Unit {
        &self.hidden
    }

    pub fn visible_size(&self) -> usize {
        self.visible.size()
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden.size()
    }

    pub fn params(&self) -> &RbmParams {
        &self.params
    }

    /// Returns the linear input to the hidden layer, `vᵗW + b_h`.
    ///
    /// Panics if `v` does not have `visible_size` entries.
    pub fn hidden_preactivation(&self, v: &Array1<f64>) -> Array1<f64> {
        assert_eq!(v.len(), self.visible_size());
        v.dot(&self.params.weights) + &self.params.hidden_bias
    }

    /// Returns the linear input to the visible layer, `Wh + b_v`.
    ///
    /// Panics if `h` does not have `hidden_size` entries.
    pub fn visible_preactivation(&self, h: &Array1<f64>) -> Array1<f64> {
        assert_eq!(h.len(), self.hidden_size());
        self.params.weights.dot(h) + &self.params.visible_bias
    }

    /// Computes `E[h|v]` without sampling.
    pub fn hidden_expectation(&self, v: &Array1<f64>) -> Array1<f64> {
        self.hidden.expected(&self.hidden_preactivation(v))
    }

    /// Computes `E[v|h]` without sampling.
    pub fn visible_expectation(&self, h: &Array1<f64>) -> Array1<f64> {
        self.visible.expected(&self.visible_preactivation(h))
    }

    /// Computes the hidden expectation given `v` and a sample drawn from it.
    pub fn hidden_given_visible<R>(&self, v: &Array1<f64>, rng: &mut R) -> Activation
    where
        R: Rng + ?Sized,
    {
        self.hidden.activate(&self.hidden_preactivation(v), rng)
    }

    /// Computes the visible expectation given `h` and a sample drawn from it.
    pub fn visible_given_hidden<R>(&self, h: &Array1<f64>, rng: &mut R) -> Activation
    where
        R: Rng + ?Sized,
    {
        self.visible.activate(&self.visible_preactivation(h), rng)
    }

    /// The energy of the joint configuration `(v, h)`.
    pub fn energy(&self, v: &Array1<f64>, h: &Array1<f64>) -> f64 {
        let p = &self.params;
        let interaction = v.dot(&p.weights.dot(h));
        self.visible.self_energy(v) + self.hidden.self_energy(h)
            - (interaction + p.visible_bias.dot(v) + p.hidden_bias.dot(h))
    }

    /// The free energy of `v`, with the hidden layer summed out
    /// analytically.
    ///
    /// For binary hidden units this is
    /// `S_v(v) − b_vᵗv − Σ_j ln(1 + exp((vᵗW + b_h)_j))`.
    pub fn free_energy(&self, v: &Array1<f64>) -> f64 {
        self.visible.self_energy(v)
            - self.params.visible_bias.dot(v)
            - self.hidden.log_partition(&self.hidden_preactivation(v))
    }

    /// Runs one deterministic up-down pass, returning `E[v|E[h|v]]`.
    pub fn reconstruct(&self, v: &Array1<f64>) -> Array1<f64> {
        self.visible_expectation(&self.hidden_expectation(v))
    }

    /// Squared error between `v` and its reconstruction.
    pub fn reconstruction_error(&self, v: &Array1<f64>) -> f64 {
        matrix::squared_distance(v, &self.reconstruct(v))
    }

    /// Mean free energy of `held_out` minus mean free energy of `train`.
    ///
    /// A gap that keeps growing during training indicates overfitting.
    pub fn free_energy_gap(&self, train: &[Array1<f64>], held_out: &[Array1<f64>]) -> f64 {
        self.mean_free_energy(held_out) - self.mean_free_energy(train)
    }

    fn mean_free_energy(&self, data: &[Array1<f64>]) -> f64 {
        if data.is_empty() {
            return 0.0;
        }
        data.iter().map(|v| self.free_energy(v)).sum::<f64>() / data.len() as f64
    }

    /// Sets the visible bias from the statistics of `data`.
    ///
    /// Binary units get the log-odds of each unit being on, softmax units
    /// the log-frequency of each category, and Gaussian units the data mean.
    pub fn init_visible_bias(&mut self, data: &[Array1<f64>]) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidConfiguration(
                "cannot derive visible bias from an empty dataset".to_string(),
            ));
        }
        let mut mean = Array1::<f64>::zeros(self.visible_size());
        for v in data {
            check_len("visible vector", self.visible_size(), v.len())?;
            mean += v;
        }
        mean /= data.len() as f64;

        self.params.visible_bias = match self.visible.family() {
            UnitFamily::Binary => mean.mapv(|p: f64| {
                let p = p.max(1e-3).min(1.0 - 1e-3);
                (p / (1.0 - p)).ln()
            }),
            UnitFamily::Softmax => mean.mapv(|p: f64| p.max(1e-3).ln()),
            UnitFamily::Gaussian { .. } => mean,
        };
        Ok(())
    }

    pub(crate) fn params_mut(&mut self) -> &mut RbmParams {
        &mut self.params
    }
}

impl Transform for Rbm {
    type Input = Array1<f64>;
    type Output = Array1<f64>;

    /// Returns the hidden expectation `E[h|v]`.
    fn transform(&self, v: &Array1<f64>) -> Result<Array1<f64>> {
        check_len("visible vector", self.visible_size(), v.len())?;
        Ok(self.hidden_expectation(v))
    }
}

fn check_sizes(visible: &Unit, hidden: &Unit) -> Result<()> {
    if visible.size() == 0 || hidden.size() == 0 {
        return Err(Error::InvalidConfiguration(format!(
            "layer sizes must be positive, got {} visible and {} hidden",
            visible.size(),
            hidden.size()
        )));
    }
    Ok(())
}
