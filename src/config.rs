//! Training options shared by every trainer.

use crate::error::{Error, Result};

/// Pushes the mean activation of each hidden unit towards `target`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sparsity {
    /// Desired mean activation of every hidden unit, in `(0, 1)`.
    pub target: f64,
    /// Strength of the penalty. Must be non-negative.
    pub penalty: f64,
}

/// The recognized set of training options.
///
/// A configuration is immutable for the duration of one training run. Every
/// field has a default, so a partial record deserializes cleanly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub epochs: usize,
    pub batch_size: usize,
    /// Number of Gibbs steps in each contrastive divergence chain. Ignored
    /// by the backpropagation trainer.
    pub cd_steps: usize,
    /// Shuffle the example order at the start of every epoch.
    pub shuffle: bool,
    /// Run Gibbs chains on expectations rather than samples.
    pub mean_field: bool,
    pub sparsity: Option<Sparsity>,
    /// Number of persistent negative-phase chains. Zero trains with plain
    /// contrastive divergence, where every chain restarts at the data.
    pub persistent_chains: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            learning_rate: 0.1,
            momentum: 0.5,
            weight_decay: 0.0001,
            epochs: 100,
            batch_size: 1,
            cd_steps: 1,
            shuffle: false,
            mean_field: false,
            sparsity: None,
            persistent_chains: 0,
        }
    }
}

impl TrainingConfig {
    /// Sets the learning rate.
    pub fn learning_rate(mut self, rate: f64) -> Self {
        self.learning_rate = rate;
        self
    }

    /// Sets the momentum coefficient.
    pub fn momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    /// Sets the L2 penalty applied to weight matrices.
    pub fn weight_decay(mut self, decay: f64) -> Self {
        self.weight_decay = decay;
        self
    }

    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn cd_steps(mut self, k: usize) -> Self {
        self.cd_steps = k;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn mean_field(mut self, mean_field: bool) -> Self {
        self.mean_field = mean_field;
        self
    }

    pub fn sparsity(mut self, target: f64, penalty: f64) -> Self {
        self.sparsity = Some(Sparsity { target, penalty });
        self
    }

    /// Switches to persistent contrastive divergence with `chains` fantasy
    /// particles.
    pub fn persistent_chains(mut self, chains: usize) -> Self {
        self.persistent_chains = chains;
        self
    }

    /// Verifies that every option is in range, returning an error if
    /// something is wrong.
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate >= 0.0) {
            return Err(invalid("learning_rate", self.learning_rate));
        }
        if !(self.momentum >= 0.0 && self.momentum < 1.0) {
            return Err(invalid("momentum", self.momentum));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(invalid("weight_decay", self.weight_decay));
        }
        if self.epochs == 0 {
            return Err(invalid("epochs", 0));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", 0));
        }
        if self.cd_steps == 0 {
            return Err(invalid("cd_steps", 0));
        }
        if let Some(sparsity) = self.sparsity {
            if !(sparsity.target > 0.0 && sparsity.target < 1.0) {
                return Err(invalid("sparsity.target", sparsity.target));
            }
            if !(sparsity.penalty.is_finite() && sparsity.penalty >= 0.0) {
                return Err(invalid("sparsity.penalty", sparsity.penalty));
            }
        }
        Ok(())
    }
}

fn invalid<V: std::fmt::Display>(option: &str, value: V) -> Error {
    Error::InvalidConfiguration(format!("{} out of range: {}", option, value))
}
