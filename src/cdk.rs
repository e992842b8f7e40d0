//! k-step Contrastive Divergence.
//!
//! Each example runs a short block Gibbs chain from the data:
//!
//! 1. `H⁰ = E[h|V⁰]`, and a sample `H⁰ₛ` drawn from it.
//! 2. For `i = 1..k`, `V^i` is sampled from `H^{i-1}ₛ`, then `H^i = E[h|V^i]`
//!    (sampled again while `i < k`).
//! 3. The gradient estimate is `V⁰ᵗH⁰ − V^kᵗH^k` for the weights,
//!    `V⁰ − V^k` for the visible bias and `H⁰ − H^k` for the hidden bias.
//!
//! The trainer averages these over a batch and applies them with momentum.
//!
//! With `persistent_chains` set, the data only supplies the positive
//! statistics. The negative statistics come from fantasy particles that the
//! trainer keeps between batches: each batch advances every particle by `k`
//! Gibbs steps and subtracts the mean of their end points.

use crate::config::{Sparsity, TrainingConfig};
use crate::error::{check_len, Result};
use crate::rbm::{Rbm, RbmParams};
use crate::trainer::{Trainable, Trainer};
use crate::units::Activation;

use ndarray::Array1;
use rand::Rng;

/// Trains an [`Rbm`] with k-step Contrastive Divergence.
pub type CdkTrainer = Trainer<Rbm>;

/// A model that supports block Gibbs sampling between two layers.
pub(crate) trait Gibbs {
    /// Samples the hidden layer given a visible state.
    fn up<R>(&self, v: &Array1<f64>, rng: &mut R) -> Activation
    where
        R: Rng + ?Sized;

    /// Samples the visible layer given a hidden state.
    fn down<R>(&self, h: &Array1<f64>, rng: &mut R) -> Activation
    where
        R: Rng + ?Sized;
}

impl Gibbs for Rbm {
    fn up<R>(&self, v: &Array1<f64>, rng: &mut R) -> Activation
    where
        R: Rng + ?Sized,
    {
        self.hidden_given_visible(v, rng)
    }

    fn down<R>(&self, h: &Array1<f64>, rng: &mut R) -> Activation
    where
        R: Rng + ?Sized,
    {
        self.visible_given_hidden(h, rng)
    }
}

/// The end points of one contrastive divergence chain.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Chain {
    /// Hidden expectation given the data, `H⁰`.
    pub data_hidden: Array1<f64>,
    /// Final visible state of the chain, `V^k`.
    pub model_visible: Array1<f64>,
    /// Hidden expectation given `V^k`, `H^k`.
    pub model_hidden: Array1<f64>,
}

impl Chain {
    /// Accumulates this chain's gradient estimate into `gradient`.
    pub fn accumulate(&self, data: &Array1<f64>, gradient: &mut RbmParams) {
        gradient.add_statistics(1.0, data, &self.data_hidden);
        gradient.add_statistics(-1.0, &self.model_visible, &self.model_hidden);
    }
}

/// Runs a `k`-step chain starting at the data vector `v0`.
///
/// With `mean_field` set, expectations are propagated in place of samples.
pub(crate) fn run_chain<G, R>(
    model: &G,
    v0: &Array1<f64>,
    k: usize,
    mean_field: bool,
    rng: &mut R,
) -> Chain
where
    G: Gibbs,
    R: Rng + ?Sized,
{
    let pick = |a: Activation| if mean_field { a.expected } else { a.sample };

    let positive = model.up(v0, rng);
    let data_hidden = positive.expected.clone();
    let mut hidden = pick(positive);
    let mut visible = v0.clone();
    let mut model_hidden = data_hidden.clone();
    for step in 1..=k {
        visible = pick(model.down(&hidden, rng));
        let negative = model.up(&visible, rng);
        if step < k {
            hidden = pick(negative);
        } else {
            model_hidden = negative.expected;
        }
    }
    Chain {
        data_hidden,
        model_visible: visible,
        model_hidden,
    }
}

/// Accumulates one example's contribution: the full CD-k estimate, or only
/// the positive statistics when persistent chains supply the negative phase.
pub(crate) fn accumulate_example<G, R>(
    model: &G,
    v: &Array1<f64>,
    config: &TrainingConfig,
    rng: &mut R,
    gradient: &mut RbmParams,
) where
    G: Gibbs,
    R: Rng + ?Sized,
{
    let data_hidden = if config.persistent_chains > 0 {
        let h = model.up(v, rng).expected;
        gradient.add_statistics(1.0, v, &h);
        h
    } else {
        let chain = run_chain(model, v, config.cd_steps, config.mean_field, rng);
        chain.accumulate(v, gradient);
        chain.data_hidden
    };
    if let Some(sparsity) = &config.sparsity {
        apply_sparsity(gradient, &data_hidden, sparsity);
    }
}

/// Advances every persistent particle by `cd_steps` Gibbs steps and
/// subtracts the mean of their end-point statistics from `gradient`.
pub(crate) fn advance_chains<G, R>(
    model: &G,
    chains: &mut [Array1<f64>],
    config: &TrainingConfig,
    rng: &mut R,
    gradient: &mut RbmParams,
) where
    G: Gibbs,
    R: Rng + ?Sized,
{
    if chains.is_empty() {
        return;
    }
    let scale = -1.0 / chains.len() as f64;
    for particle in chains.iter_mut() {
        let chain = run_chain(model, particle, config.cd_steps, config.mean_field, rng);
        gradient.add_statistics(scale, &chain.model_visible, &chain.model_hidden);
        *particle = chain.model_visible;
    }
}

/// Applies the sparsity penalty for one example's hidden expectation.
///
/// The penalty `penalty·(h − target)` is subtracted from the hidden bias
/// gradient and from every row of the weight gradient.
pub(crate) fn apply_sparsity(gradient: &mut RbmParams, hidden: &Array1<f64>, sparsity: &Sparsity) {
    let penalty = hidden.mapv(|h| sparsity.penalty * (h - sparsity.target));
    gradient.hidden_bias -= &penalty;
    for mut row in gradient.weights.rows_mut() {
        row -= &penalty;
    }
}

impl Trainable for Rbm {
    type Example = Array1<f64>;
    type Params = RbmParams;

    fn params(&self) -> &RbmParams {
        Rbm::params(self)
    }

    fn params_mut(&mut self) -> &mut RbmParams {
        Rbm::params_mut(self)
    }

    fn check_example(&self, v: &Array1<f64>) -> Result<()> {
        check_len("visible vector", self.visible_size(), v.len())
    }

    fn accumulate_gradient<R>(
        &self,
        v: &Array1<f64>,
        config: &TrainingConfig,
        rng: &mut R,
        gradient: &mut RbmParams,
    ) -> Result<f64>
    where
        R: Rng + ?Sized,
    {
        self.check_example(v)?;
        accumulate_example(self, v, config, rng, gradient);
        Ok(self.reconstruction_error(v))
    }

    fn free_energy(&self, v: &Array1<f64>) -> Option<f64> {
        Some(Rbm::free_energy(self, v))
    }

    /// Particles start at the all-zero visible state.
    fn start_chains(&self, count: usize) -> Option<Vec<Array1<f64>>> {
        Some(vec![Array1::zeros(self.visible_size()); count])
    }

    fn persistent_phase<R>(
        &self,
        chains: &mut [Array1<f64>],
        config: &TrainingConfig,
        rng: &mut R,
        gradient: &mut RbmParams,
    ) where
        R: Rng + ?Sized,
    {
        advance_chains(self, chains, config, rng, gradient);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::trainer::{train, StopCondition};
    use crate::units::Unit;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn binary_vectors(n: usize) -> Vec<Array1<f64>> {
        (0..1 << n)
            .map(|bits: usize| Array1::from_shape_fn(n, |i| ((bits >> i) & 1) as f64))
            .collect()
    }

    fn patterns() -> Vec<Array1<f64>> {
        vec![
            array![1.0, 1.0, 0.0, 0.0],
            array![0.0, 0.0, 1.0, 1.0],
            array![1.0, 1.0, 1.0, 0.0],
            array![0.0, 1.0, 1.0, 1.0],
        ]
    }

    fn rbm(hidden: usize, seed: u64) -> Rbm {
        let mut rng = StdRng::seed_from_u64(seed);
        Rbm::new(Unit::binary(4), Unit::binary(hidden), &mut rng).unwrap()
    }

    /// Exact mean log-likelihood of `data`, by enumerating every visible
    /// configuration.
    fn log_likelihood(rbm: &Rbm, data: &[Array1<f64>]) -> f64 {
        let log_z = binary_vectors(rbm.visible_size())
            .iter()
            .map(|v| (-rbm.free_energy(v)).exp())
            .sum::<f64>()
            .ln();
        data.iter().map(|v| -rbm.free_energy(v) - log_z).sum::<f64>() / data.len() as f64
    }

    fn cd1_config() -> TrainingConfig {
        TrainingConfig::default()
            .learning_rate(0.1)
            .momentum(0.0)
            .weight_decay(0.0)
            .cd_steps(1)
    }

    #[test]
    fn chain_with_mean_field_is_deterministic() {
        let model = rbm(3, 1);
        let v = patterns()[0].clone();
        let a = run_chain(&model, &v, 3, true, &mut StdRng::seed_from_u64(1));
        let b = run_chain(&model, &v, 3, true, &mut StdRng::seed_from_u64(2));
        assert_eq!(a, b);
        assert_eq!(a.data_hidden, model.hidden_expectation(&v));
    }

    #[test]
    fn single_step_mean_field_gradient() {
        let model = rbm(3, 2);
        let v = patterns()[1].clone();
        let mut gradient = RbmParams::zeros(4, 3);
        let mut rng = StdRng::seed_from_u64(0);
        let config = cd1_config().mean_field(true);
        model.accumulate_gradient(&v, &config, &mut rng, &mut gradient).unwrap();

        let h0 = model.hidden_expectation(&v);
        let v1 = model.visible_expectation(&h0);
        let h1 = model.hidden_expectation(&v1);
        for i in 0..4 {
            assert_abs_diff_eq!(gradient.visible_bias[i], v[i] - v1[i], epsilon = 1e-12);
            for j in 0..3 {
                assert_abs_diff_eq!(
                    gradient.weights[[i, j]],
                    v[i] * h0[j] - v1[i] * h1[j],
                    epsilon = 1e-12
                );
            }
        }
        for j in 0..3 {
            assert_abs_diff_eq!(gradient.hidden_bias[j], h0[j] - h1[j], epsilon = 1e-12);
        }
    }

    #[test]
    fn sparsity_penalizes_active_units() {
        let mut gradient = RbmParams::zeros(2, 2);
        let sparsity = Sparsity {
            target: 0.1,
            penalty: 0.5,
        };
        apply_sparsity(&mut gradient, &array![0.9, 0.1], &sparsity);
        assert_abs_diff_eq!(gradient.hidden_bias[0], -0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(gradient.hidden_bias[1], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(gradient.weights[[1, 0]], -0.4, epsilon = 1e-12);
    }

    #[test]
    fn rejects_wrong_sized_examples_before_training() {
        let mut model = rbm(3, 0);
        let before = model.clone();
        let data = vec![array![1.0, 0.0, 1.0, 0.0], array![1.0, 0.0]];
        let result = train(&mut model, &data, cd1_config(), &mut StdRng::seed_from_u64(0));
        assert_eq!(
            result,
            Err(Error::DimensionMismatch {
                context: "visible vector",
                expected: 4,
                actual: 2,
            })
        );
        assert_eq!(model, before);
    }

    #[test]
    fn zero_learning_rate_leaves_parameters_unchanged() {
        let mut model = rbm(3, 4);
        let before = model.clone();
        let config = cd1_config().learning_rate(0.0).momentum(0.9).weight_decay(0.01).epochs(5);
        train(&mut model, &patterns(), config, &mut StdRng::seed_from_u64(4)).unwrap();
        assert_eq!(model, before);
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let config = cd1_config().epochs(20).batch_size(3).shuffle(true);
        let mut a = rbm(3, 5);
        let mut b = rbm(3, 5);
        let ra = train(&mut a, &patterns(), config.clone(), &mut StdRng::seed_from_u64(6)).unwrap();
        let rb = train(&mut b, &patterns(), config, &mut StdRng::seed_from_u64(6)).unwrap();
        assert_eq!(a, b);
        assert_eq!(ra, rb);
    }

    #[test]
    fn cancellation_matches_training_on_completed_batches() {
        let data: Vec<_> = patterns().into_iter().chain(patterns()).collect();
        let config = cd1_config().batch_size(2).epochs(3).momentum(0.5);

        let mut cancelled = rbm(3, 7);
        let report = CdkTrainer::new(config.clone())
            .stop_condition(StopCondition::Batches(3))
            .train(&mut cancelled, &data, &mut StdRng::seed_from_u64(8))
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.batches_completed, 3);

        let mut reference = rbm(3, 7);
        train(&mut reference, &data[..6], config.epochs(1), &mut StdRng::seed_from_u64(8)).unwrap();
        assert_eq!(cancelled, reference);
    }

    #[test]
    fn exploding_weights_surface_instability() {
        let params = RbmParams {
            weights: Array2::from_elem((2, 2), 1e300),
            visible_bias: Array1::zeros(2),
            hidden_bias: Array1::zeros(2),
        };
        let mut model = Rbm::from_params(Unit::gaussian(2), Unit::gaussian(2), params).unwrap();
        let before = model.clone();
        let result = train(
            &mut model,
            &[array![1e10, 1e10]],
            cd1_config().epochs(3),
            &mut StdRng::seed_from_u64(0),
        );
        assert!(matches!(result, Err(Error::NumericalInstability { epoch: 1, .. })));
        assert_eq!(model, before);
    }

    #[test]
    fn large_k_drives_reconstruction_error_down() {
        let mut model =
            Rbm::new(Unit::binary(4), Unit::binary(8), &mut StdRng::seed_from_u64(10)).unwrap();
        let config = cd1_config().cd_steps(10).momentum(0.5).epochs(1000);
        let mut rng = StdRng::seed_from_u64(11);
        let report = train(&mut model, &patterns(), config, &mut rng).unwrap();
        let first = report.epochs[0].reconstruction_error.unwrap();
        let last = report.final_error().unwrap();
        assert!(last < 0.5 * first, "error went from {} to {}", first, last);
    }

    #[test]
    fn larger_k_does_not_hurt_likelihood() {
        let data = patterns();
        let mean_likelihood = |k: usize| {
            let mut total = 0.0;
            for seed in 0..5 {
                let mut model = rbm(3, seed);
                let config = cd1_config().cd_steps(k).epochs(200);
                train(&mut model, &data, config, &mut StdRng::seed_from_u64(100 + seed)).unwrap();
                total += log_likelihood(&model, &data);
            }
            total / 5.0
        };
        let cd1 = mean_likelihood(1);
        let cd5 = mean_likelihood(5);
        assert!(cd5 >= cd1 - 0.1, "CD-5 {} vs CD-1 {}", cd5, cd1);
    }

    #[test]
    fn persistent_positive_phase_uses_data_only() {
        let model = rbm(3, 14);
        let v = patterns()[2].clone();
        let config = cd1_config().persistent_chains(4);
        let mut gradient = RbmParams::zeros(4, 3);
        model
            .accumulate_gradient(&v, &config, &mut StdRng::seed_from_u64(0), &mut gradient)
            .unwrap();

        let mut expected = RbmParams::zeros(4, 3);
        expected.add_statistics(1.0, &v, &model.hidden_expectation(&v));
        assert_eq!(gradient, expected);
    }

    #[test]
    fn persistent_chains_advance_and_subtract_statistics() {
        let model = rbm(3, 15);
        let config = cd1_config().mean_field(true).persistent_chains(2);
        let mut chains = model.start_chains(2).unwrap();
        assert_eq!(chains, vec![Array1::<f64>::zeros(4); 2]);

        let mut gradient = RbmParams::zeros(4, 3);
        let mut rng = StdRng::seed_from_u64(0);
        model.persistent_phase(&mut chains, &config, &mut rng, &mut gradient);

        let v1 = model.reconstruct(&Array1::zeros(4));
        let h1 = model.hidden_expectation(&v1);
        for i in 0..4 {
            assert_abs_diff_eq!(chains[0][i], v1[i], epsilon = 1e-12);
            assert_abs_diff_eq!(gradient.visible_bias[i], -v1[i], epsilon = 1e-12);
        }
        for j in 0..3 {
            assert_abs_diff_eq!(gradient.hidden_bias[j], -h1[j], epsilon = 1e-12);
        }

        // A second call continues from where the particles stopped.
        let mut again = RbmParams::zeros(4, 3);
        model.persistent_phase(&mut chains, &config, &mut rng, &mut again);
        let v2 = model.reconstruct(&v1);
        for i in 0..4 {
            assert_abs_diff_eq!(chains[1][i], v2[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn persistent_training_lowers_free_energy_of_data() {
        let data = patterns();
        let mut model = rbm(3, 16);
        let config = cd1_config()
            .learning_rate(0.05)
            .batch_size(4)
            .epochs(1000)
            .persistent_chains(10);
        let report = CdkTrainer::new(config)
            .train(&mut model, &data, &mut StdRng::seed_from_u64(17))
            .unwrap();
        assert_eq!(report.epochs.len(), 1000);

        let unseen: Vec<_> = binary_vectors(4)
            .into_iter()
            .filter(|v| !data.contains(v))
            .collect();
        assert!(model.free_energy_gap(&data, &unseen) > 0.0);
    }

    #[test]
    fn trained_vectors_have_lower_free_energy() {
        let data = patterns();
        let mut model = rbm(3, 12);
        let config = cd1_config().epochs(500);
        let report = CdkTrainer::new(config)
            .train(&mut model, &data, &mut StdRng::seed_from_u64(13))
            .unwrap();
        assert!(report.last_epoch().unwrap().free_energy.is_some());

        let unseen: Vec<_> = binary_vectors(4)
            .into_iter()
            .filter(|v| !data.contains(v))
            .collect();
        let mean = |vs: &[Array1<f64>]| {
            vs.iter().map(|v| model.free_energy(v)).sum::<f64>() / vs.len() as f64
        };
        let unseen_mean = mean(&unseen);
        assert!(mean(&data) < unseen_mean);
        for v in &data {
            assert!(model.free_energy(v) < unseen_mean, "{} not below {}", v, unseen_mean);
        }
        assert!(model.free_energy_gap(&data, &unseen) > 0.0);
    }
}
