//! Utilities for training models using gradient ascent with momentum.

use crate::config::TrainingConfig;
use crate::error::{Error, Result};
use crate::utils::{AllFinite, ZeroOut};

use itertools::multizip;
use ndarray::{Array, Array1, Dimension};
use rand::seq::SliceRandom;
use rand::Rng;
use std::fmt;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

/// A set of learned parameters.
///
/// The trainer keeps gradient and velocity buffers of the same type as the
/// parameters they shadow.
pub trait Parameters: Clone + ZeroOut + AllFinite {
    /// Returns a zeroed buffer with the same shape.
    fn zeros_like(&self) -> Self;

    /// Multiplies every entry by `factor`.
    fn scale(&mut self, factor: f64);

    /// Applies one momentum update:
    ///
    /// `velocity ← momentum·velocity + rate·(gradient − decay·weights)`,
    /// then `self ← self + velocity`. Weight decay applies to weight
    /// matrices only.
    fn momentum_step(&mut self, velocity: &mut Self, gradient: &Self, config: &TrainingConfig);
}

/// Makes a model trainable by one of the crate's trainers.
pub trait Trainable {
    /// A single training example.
    type Example;

    /// The model's learned parameters.
    type Params: Parameters;

    fn params(&self) -> &Self::Params;

    fn params_mut(&mut self) -> &mut Self::Params;

    /// Checks an example's dimensions before any training step runs.
    fn check_example(&self, example: &Self::Example) -> Result<()>;

    /// Using the provided training example, accumulate a gradient estimate
    /// into `gradient`. Returns the reconstruction error for the example.
    ///
    /// On error `gradient` is left untouched.
    fn accumulate_gradient<R>(
        &self,
        example: &Self::Example,
        config: &TrainingConfig,
        rng: &mut R,
        gradient: &mut Self::Params,
    ) -> Result<f64>
    where
        R: Rng + ?Sized;

    /// Returns a free-energy proxy for `example`, if the model defines one.
    fn free_energy(&self, _example: &Self::Example) -> Option<f64> {
        None
    }

    /// Creates `count` persistent negative-phase chains, or `None` if the
    /// model has no negative phase to run them for.
    fn start_chains(&self, _count: usize) -> Option<Vec<Array1<f64>>> {
        None
    }

    /// Advances every persistent chain and subtracts the mean of their
    /// statistics from a batch gradient.
    ///
    /// Only called with chains returned by [`Trainable::start_chains`].
    fn persistent_phase<R>(
        &self,
        _chains: &mut [Array1<f64>],
        _config: &TrainingConfig,
        _rng: &mut R,
        _gradient: &mut Self::Params,
    ) where
        R: Rng + ?Sized,
    {
    }
}

/// Applies the momentum rule of [`Parameters::momentum_step`] to a single
/// array.
pub(crate) fn momentum_step<D>(
    param: &mut Array<f64, D>,
    velocity: &mut Array<f64, D>,
    gradient: &Array<f64, D>,
    config: &TrainingConfig,
    decay: bool,
) where
    D: Dimension,
{
    let decay = if decay { config.weight_decay } else { 0.0 };
    for (p, v, g) in multizip((param.iter_mut(), velocity.iter_mut(), gradient.iter())) {
        *v = config.momentum * *v + config.learning_rate * (g - decay * *p);
        *p += *v;
    }
}

/// Training statistics for one epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    /// One-based epoch number.
    pub epoch: usize,
    /// Mean reconstruction error over the examples used this epoch, or
    /// `None` if every example was skipped.
    pub reconstruction_error: Option<f64>,
    /// Mean free energy of the training data after the epoch, for models
    /// that define one.
    pub free_energy: Option<f64>,
    /// Number of batches applied.
    pub batches: usize,
    /// Examples skipped because of a structural mismatch.
    pub skipped: usize,
}

/// The result of a training run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochReport>,
    /// Total number of batches applied to the model.
    pub batches_completed: usize,
    /// Whether training stopped early at a batch boundary.
    pub cancelled: bool,
}

impl TrainingReport {
    /// Returns the statistics of the last (possibly partial) epoch.
    pub fn last_epoch(&self) -> Option<&EpochReport> {
        self.epochs.last()
    }

    /// Returns the reconstruction error of the last epoch.
    pub fn final_error(&self) -> Option<f64> {
        self.last_epoch().and_then(|e| e.reconstruction_error)
    }
}

/// Logging frequency to use during training
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Logging {
    /// No logs will be emitted
    Silent,
    /// A summary will be logged at completion
    Completion,
    /// A summary will be logged after every `n` epochs
    Epochs(usize),
}

impl Logging {
    /// Performs logging at the end of an epoch.
    fn epoch(&self, report: &EpochReport) {
        if let Logging::Epochs(freq) = *self {
            if freq > 0 && report.epoch % freq == 0 {
                match (report.reconstruction_error, report.free_energy) {
                    (Some(error), Some(fe)) => log::info!(
                        "Epoch {}:\terror={:.6}\tfree_energy={:.6}",
                        report.epoch,
                        error,
                        fe
                    ),
                    (Some(error), None) => {
                        log::info!("Epoch {}:\terror={:.6}", report.epoch, error)
                    }
                    (None, _) => log::info!(
                        "Epoch {}:\tno examples used ({} skipped)",
                        report.epoch,
                        report.skipped
                    ),
                }
            }
        }
    }

    /// Performs logging at the end of training.
    fn completion(&self, report: &TrainingReport, start_time: Instant) {
        if let Logging::Silent = *self {
            return;
        }
        log::info!(
            "Ran {} epochs ({} batches) in {:.3} seconds{}.",
            report.epochs.len(),
            report.batches_completed,
            start_time.elapsed().as_secs_f64(),
            if report.cancelled { ", cancelled" } else { "" }
        );
        if let Some(error) = report.final_error() {
            log::info!("Final reconstruction error: {}", error);
        }
    }
}

/// When to stop training before the configured number of epochs.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum StopCondition {
    /// Stops after the provided number of batches
    Batches(usize),
    /// Stops when an epoch's error drops below the provided threshold
    ErrorThreshold(f64),
    /// Stops after the provided duration
    Duration(Duration),
}

impl From<Duration> for StopCondition {
    fn from(duration: Duration) -> StopCondition {
        StopCondition::Duration(duration)
    }
}

impl StopCondition {
    /// Returns true if training should stop at the current batch boundary.
    fn at_batch(&self, progress: &Progress) -> bool {
        match *self {
            StopCondition::Batches(batches) => progress.batches_completed >= batches,
            StopCondition::Duration(duration) => progress.elapsed > duration,
            StopCondition::ErrorThreshold(_) => false,
        }
    }

    /// Returns true if training should stop after an epoch.
    fn at_epoch(&self, training_error: f64) -> bool {
        match *self {
            StopCondition::ErrorThreshold(threshold) => training_error < threshold,
            _ => false,
        }
    }
}

/// What to do with an example whose structure is invalid.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum InvalidExamples {
    /// Stop the run and return the error.
    Abort,
    /// Log the error, leave the example out and keep training.
    Skip,
}

/// Where a training run stands at a batch boundary.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Progress {
    /// One-based epoch number.
    pub epoch: usize,
    /// Batches applied since training began.
    pub batches_completed: usize,
    pub elapsed: Duration,
}

/// A caller-supplied cancellation check.
pub type CancelCheck = Box<dyn FnMut(&Progress) -> bool>;

/// A builder for training models.
///
/// Momentum buffers live only for the duration of one call to
/// [`Trainer::train`]. The model must not be trained by two trainers at
/// once.
pub struct Trainer<T: Trainable> {
    config: TrainingConfig,
    logging: Logging,
    stop_condition: Option<StopCondition>,
    cancel: Option<CancelCheck>,
    invalid_examples: InvalidExamples,
    model: PhantomData<fn(&mut T)>,
}

impl<T: Trainable> fmt::Debug for Trainer<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Trainer")
            .field("config", &self.config)
            .field("logging", &self.logging)
            .field("stop_condition", &self.stop_condition)
            .field("cancel", &self.cancel.is_some())
            .field("invalid_examples", &self.invalid_examples)
            .finish()
    }
}

impl<T: Trainable> Trainer<T> {
    /// Creates a new Trainer instance.
    ///
    /// The trainer is initialized with some default values. These defaults
    /// are:
    ///
    /// * No early stopping.
    /// * Logs on training completion.
    /// * Aborts on the first invalid example.
    pub fn new(config: TrainingConfig) -> Self {
        Trainer {
            config,
            logging: Logging::Completion,
            stop_condition: None,
            cancel: None,
            invalid_examples: InvalidExamples::Abort,
            model: PhantomData,
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Sets the type of logging to be emitted during training.
    pub fn logging(mut self, logging: Logging) -> Self {
        self.logging = logging;
        self
    }

    /// Sets a condition to finish training early.
    pub fn stop_condition<C>(mut self, condition: C) -> Self
    where
        C: Into<StopCondition>,
    {
        self.stop_condition = Some(condition.into());
        self
    }

    /// Sets a cancellation check, consulted at every batch boundary.
    pub fn cancel_when<F>(mut self, check: F) -> Self
    where
        F: FnMut(&Progress) -> bool + 'static,
    {
        self.cancel = Some(Box::new(check));
        self
    }

    /// Sets the policy for examples with an invalid structure.
    pub fn on_invalid_example(mut self, policy: InvalidExamples) -> Self {
        self.invalid_examples = policy;
        self
    }

    /// Trains `model` in place on the provided `examples`.
    ///
    /// Examples are visited in order unless the configuration asks for
    /// shuffling; the final batch of an epoch may be smaller than the batch
    /// size. On numerical instability the model is restored to the
    /// parameters of the last completed epoch.
    pub fn train<R>(
        &mut self,
        model: &mut T,
        examples: &[T::Example],
        rng: &mut R,
    ) -> Result<TrainingReport>
    where
        R: Rng + ?Sized,
    {
        self.validate(model, examples)?;
        let mut chains = self.start_chains(model)?;

        let config = self.config.clone();
        let mut velocity = model.params().zeros_like();
        let mut gradient = model.params().zeros_like();
        let mut stable = model.params().clone();
        let mut last_stable_epoch = None;
        let mut order: Vec<usize> = (0..examples.len()).collect();
        let mut report = TrainingReport::default();
        let start_time = Instant::now();

        'epochs: for epoch in 1..=config.epochs {
            if config.shuffle {
                order.shuffle(rng);
            }
            let mut training_error = 0.0;
            let mut used = 0;
            let mut batches = 0;
            let mut skipped = 0;

            for batch in order.chunks(config.batch_size) {
                let progress = Progress {
                    epoch,
                    batches_completed: report.batches_completed,
                    elapsed: start_time.elapsed(),
                };
                if self.should_cancel(&progress) {
                    log::warn!(
                        "Training cancelled in epoch {} after {} batches",
                        epoch,
                        report.batches_completed
                    );
                    report.cancelled = true;
                    if batches > 0 {
                        report.epochs.push(EpochReport {
                            epoch,
                            reconstruction_error: Some(training_error / used as f64),
                            free_energy: None,
                            batches,
                            skipped,
                        });
                    }
                    break 'epochs;
                }

                gradient.zero_out();
                let mut batch_error = 0.0;
                let mut batch_used = 0;
                for &i in batch {
                    match model.accumulate_gradient(&examples[i], &config, rng, &mut gradient) {
                        Ok(error) => {
                            batch_error += error;
                            batch_used += 1;
                        }
                        Err(Error::StructuralMismatch(reason))
                            if self.invalid_examples == InvalidExamples::Skip =>
                        {
                            log::warn!("Skipping example {}: {}", i, reason);
                            skipped += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                if batch_used == 0 {
                    continue;
                }

                gradient.scale(1.0 / batch_used as f64);
                if let Some(chains) = chains.as_mut() {
                    model.persistent_phase(chains, &config, rng, &mut gradient);
                }
                if !gradient.all_finite() || !batch_error.is_finite() {
                    return Err(restore(model, stable, epoch, last_stable_epoch));
                }
                model
                    .params_mut()
                    .momentum_step(&mut velocity, &gradient, &config);
                if !model.params().all_finite() {
                    return Err(restore(model, stable, epoch, last_stable_epoch));
                }
                log::debug!(
                    "Epoch {} batch {}: error={}",
                    epoch,
                    batches,
                    batch_error / batch_used as f64
                );

                training_error += batch_error;
                used += batch_used;
                batches += 1;
                report.batches_completed += 1;
            }

            let epoch_report = EpochReport {
                epoch,
                reconstruction_error: if used > 0 {
                    Some(training_error / used as f64)
                } else {
                    None
                },
                free_energy: mean_free_energy(model, examples),
                batches,
                skipped,
            };
            self.logging.epoch(&epoch_report);
            let done = match (self.stop_condition, epoch_report.reconstruction_error) {
                (Some(condition), Some(error)) => condition.at_epoch(error),
                _ => false,
            };
            report.epochs.push(epoch_report);
            stable = model.params().clone();
            last_stable_epoch = Some(epoch);
            if done {
                break;
            }
        }

        self.logging.completion(&report, start_time);
        Ok(report)
    }

    /// Verifies that the configuration and every example are valid before
    /// any training step runs.
    fn validate(&self, model: &T, examples: &[T::Example]) -> Result<()> {
        self.config.validate()?;
        if examples.is_empty() {
            return Err(Error::InvalidConfiguration(
                "no training examples".to_string(),
            ));
        }
        for example in examples {
            model.check_example(example)?;
        }
        Ok(())
    }

    /// Creates the persistent chains the configuration asks for.
    fn start_chains(&self, model: &T) -> Result<Option<Vec<Array1<f64>>>> {
        let count = self.config.persistent_chains;
        if count == 0 {
            return Ok(None);
        }
        model.start_chains(count).map(Some).ok_or_else(|| {
            Error::InvalidConfiguration(
                "persistent_chains set for a model without a negative phase".to_string(),
            )
        })
    }

    fn should_cancel(&mut self, progress: &Progress) -> bool {
        let stop = self
            .stop_condition
            .map_or(false, |c| c.at_batch(progress));
        stop || self.cancel.as_mut().map_or(false, |check| check(progress))
    }
}

fn restore<T: Trainable>(
    model: &mut T,
    stable: T::Params,
    epoch: usize,
    last_stable_epoch: Option<usize>,
) -> Error {
    log::warn!(
        "Non-finite gradient in epoch {}; restoring parameters from epoch {:?}",
        epoch,
        last_stable_epoch
    );
    *model.params_mut() = stable;
    Error::NumericalInstability {
        epoch,
        last_stable_epoch,
    }
}

/// Mean free energy over the examples that define one.
fn mean_free_energy<T: Trainable>(model: &T, examples: &[T::Example]) -> Option<f64> {
    let (total, count) = examples
        .iter()
        .filter_map(|example| model.free_energy(example))
        .fold((0.0, 0usize), |(total, count), fe| (total + fe, count + 1));
    if count == 0 {
        None
    } else {
        Some(total / count as f64)
    }
}

/// Trains `model` on `examples` with default trainer settings, returning the
/// per-epoch report.
pub fn train<T, R>(
    model: &mut T,
    examples: &[T::Example],
    config: TrainingConfig,
    rng: &mut R,
) -> Result<TrainingReport>
where
    T: Trainable,
    R: Rng + ?Sized,
{
    Trainer::new(config).train(model, examples, rng)
}
