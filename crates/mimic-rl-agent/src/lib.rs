//! Behavioural cloning for mimic
//!
//! This crate trains policies to imitate expert demonstrations:
//! - An explicit [`Session`] holding every policy variable
//! - Parameter transfer into session variables ([`VarAssign`])
//! - MLP policies with categorical or diagonal-Gaussian heads, looked up by name
//! - Adam and SGD optimizers
//! - The [`BcTrainer`], rollout evaluation and policy persistence

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bc;
pub mod dataset;
pub mod distribution;
pub mod optimizer;
pub mod params;
pub mod persistence;
pub mod policy;
pub mod registry;
pub mod rollout;
pub mod session;
pub mod utils;

// Re-export the trainer
pub use bc::{BcConfig, BcTrainer, EpochProgress, TrainSummary};
pub use dataset::{Batch, Batches, ExpertDataset};
pub use persistence::{reconstruct_policy, SavedPolicyRecord};

// Re-export execution context and parameter transfer
pub use params::{set_vars, VarAssign};
pub use session::{Session, SessionId, VarHandle};

// Re-export policy components
pub use distribution::ActionDistribution;
pub use optimizer::{Adam, Optimizer, OptimizerConfig, Sgd};
pub use policy::{Activation, MlpConfig, MlpPolicy, Policy, PolicyKwargs};
pub use registry::{list_policies, make_policy, register_policy, PolicyFactory, PolicyRegistry};
pub use rollout::{generate_trajectories, rollout_stats, RolloutStats, SampleUntil};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        BcConfig, BcTrainer, EpochProgress, OptimizerConfig, Policy, PolicyKwargs, RolloutStats,
        SampleUntil, Session, VarAssign,
    };
    pub use mimic_rl_core::prelude::*;
}
