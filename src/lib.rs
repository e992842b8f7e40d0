//! Energy-based and auto-associative models for unsupervised representation
//! learning: restricted Boltzmann machines trained with contrastive
//! divergence, recursive RBMs over sequences and trees, and auto-encoders
//! trained with backpropagation.

#[macro_use]
extern crate serde_derive;

pub mod autoencoder;
pub mod backprop;
pub mod cdk;
pub mod config;
pub mod error;
pub mod rbm;
pub mod recursive;
pub mod trainer;
pub mod transform;
pub mod units;

mod matrix;
mod utils;

pub use crate::config::{Sparsity, TrainingConfig};
pub use crate::error::{Error, Result};
pub use crate::trainer::train;

/// The types most callers need.
pub mod prelude {
    pub use crate::autoencoder::{AutoEncoder, AutoEncoderParams};
    pub use crate::backprop::BackpropTrainer;
    pub use crate::cdk::CdkTrainer;
    pub use crate::config::{Sparsity, TrainingConfig};
    pub use crate::error::{Error, Result};
    pub use crate::rbm::{Rbm, RbmParams};
    pub use crate::recursive::{RecursiveCdkTrainer, RecursiveRbm, Structure};
    pub use crate::trainer::{
        train, InvalidExamples, Logging, StopCondition, Trainable, Trainer, TrainingReport,
    };
    pub use crate::transform::Transform;
    pub use crate::units::{Unit, UnitFamily};
}
