//! Core reinforcement learning traits and types for mimic
//!
//! This crate provides the foundational abstractions shared by the
//! behavioural-cloning trainer, the environments and the CLI: observation
//! and action spaces, the environment protocol, trajectories and the
//! flattened expert-transition dataset.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action;
pub mod environment;
pub mod error;
pub mod observation;
pub mod reward;
pub mod space;
pub mod state;
pub mod trajectory;

// Re-export core traits and types
pub use action::{Action, ActionSpace, ContinuousAction, ContinuousSpace, DiscreteAction, DiscreteSpace};
pub use environment::{Environment, EnvironmentConfig, Step, StepInfo};
pub use error::{RLError, Result};
pub use observation::{BoxObservationSpace, Observation, ObservationSpace, VectorObservation};
pub use reward::Reward;
pub use space::SpaceSpec;
pub use state::{State, Terminal, VectorState};
pub use trajectory::{Trajectory, Transition, Transitions};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        Action, ActionSpace, Environment, Observation, ObservationSpace, Result, Reward,
        SpaceSpec, State, Step, Trajectory, Transitions,
    };
}
