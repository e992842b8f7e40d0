//! Contrastive divergence for recursive RBMs.
//!
//! Every position of a structure contributes one CD-k chain on the shared
//! parameters, started from its assembled visible vector. A structure's
//! gradient is the mean of its positions' contributions, so long sequences
//! and small trees carry the same weight within a batch.
//!
//! Persistent chains run over whole assembled visible vectors, input
//! segment and context slots together.

use super::{site_error, RecursiveRbm, Structure};
use crate::cdk::{accumulate_example, advance_chains, Gibbs};
use crate::config::TrainingConfig;
use crate::error::Result;
use crate::rbm::RbmParams;
use crate::trainer::{Parameters, Trainable, Trainer};
use crate::units::Activation;

use ndarray::Array1;
use rand::Rng;

/// Trains a [`RecursiveRbm`] on structured examples.
pub type RecursiveCdkTrainer = Trainer<RecursiveRbm>;

impl Gibbs for RecursiveRbm {
    fn up<R>(&self, v: &Array1<f64>, rng: &mut R) -> Activation
    where
        R: Rng + ?Sized,
    {
        self.rbm().hidden_given_visible(v, rng)
    }

    fn down<R>(&self, h: &Array1<f64>, rng: &mut R) -> Activation
    where
        R: Rng + ?Sized,
    {
        self.visible_given_hidden(h, rng)
    }
}

impl Trainable for RecursiveRbm {
    type Example = Structure;
    type Params = RbmParams;

    fn params(&self) -> &RbmParams {
        self.rbm().params()
    }

    fn params_mut(&mut self) -> &mut RbmParams {
        self.rbm_mut().params_mut()
    }

    fn check_example(&self, structure: &Structure) -> Result<()> {
        self.check_features(structure)
    }

    fn accumulate_gradient<R>(
        &self,
        structure: &Structure,
        config: &TrainingConfig,
        rng: &mut R,
        gradient: &mut RbmParams,
    ) -> Result<f64>
    where
        R: Rng + ?Sized,
    {
        // The whole structure is validated here, before any sampling.
        let forward = self.forward(structure)?;
        let sites = forward.sites();

        let mut local = gradient.zeros_like();
        let mut error = 0.0;
        for site in sites {
            accumulate_example(self, &site.visible, config, rng, &mut local);
            error += site_error(self, &site.visible);
        }

        let n = sites.len() as f64;
        local.scale(1.0 / n);
        gradient.add(&local);
        Ok(error / n)
    }

    fn free_energy(&self, structure: &Structure) -> Option<f64> {
        RecursiveRbm::free_energy(self, structure).ok()
    }

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
