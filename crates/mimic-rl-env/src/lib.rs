//! Reinforcement learning environments for mimic
//!
//! This crate provides the environments the behavioural-cloning trainer is
//! evaluated against:
//! - Classic control environments (CartPole, Mountain Car)
//! - A hand-written CartPole expert for demonstration collection
//! - Wrappers and a name-based registry

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classic;
pub mod registry;
pub mod wrappers;

// Re-export environments
pub use classic::{cartpole_expert, collect_expert_episodes, CartPoleEnv, ClassicTrajectory, MountainCarEnv};
pub use registry::{list_envs, make_env, register_env, ClassicEnv, EnvRegistry};
pub use wrappers::TimeLimit;

// Re-export core types
pub use mimic_rl_core::{
    Action, ActionSpace, Environment, EnvironmentConfig, Observation, ObservationSpace, Reward,
    State, Step,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{make_env, CartPoleEnv, EnvRegistry, TimeLimit};
    pub use mimic_rl_core::prelude::*;
}
