//! Environment traits and types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Action, ActionSpace, Observation, ObservationSpace, Reward, State};

/// Result of a single environment step
#[derive(Debug, Clone)]
pub struct Step<O, S> {
    /// Observation from the environment
    pub observation: O,
    /// Reward signal
    pub reward: Reward,
    /// Whether the episode is done
    pub done: bool,
    /// Whether the episode was truncated (e.g., time limit)
    pub truncated: bool,
    /// Additional info from the environment
    pub info: StepInfo,
    /// Internal state (if available)
    pub state: Option<S>,
}

impl<O, S> Step<O, S> {
    /// Whether this step ended the episode, by termination or truncation
    pub fn is_last(&self) -> bool {
        self.done || self.truncated
    }
}

/// Additional information from a step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepInfo {
    /// Custom fields
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Configuration for environments
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Random seed
    pub seed: Option<u64>,
    /// Maximum episode steps
    pub max_steps: Option<usize>,
    /// Additional parameters
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// Core environment trait
#[async_trait]
pub trait Environment: Send + Sync {
    /// Observation type
    type Observation: Observation;
    /// Action type
    type Action: Action;
    /// State type
    type State: State;

    /// Get the observation space
    fn observation_space(&self) -> Box<dyn ObservationSpace<Observation = Self::Observation>>;

    /// Get the action space
    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>>;

    /// Reset the environment
    async fn reset(&mut self) -> crate::Result<(Self::Observation, StepInfo)>;

    /// Take a step in the environment
    async fn step(&mut self, action: Self::Action) -> crate::Result<Step<Self::Observation, Self::State>>;

    /// Close the environment
    async fn close(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<E> Environment for Box<E>
where
    E: Environment + ?Sized,
{
    type Observation = E::Observation;
    type Action = E::Action;
    type State = E::State;

    fn observation_space(&self) -> Box<dyn ObservationSpace<Observation = Self::Observation>> {
        (**self).observation_space()
    }

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        (**self).action_space()
    }

    async fn reset(&mut self) -> crate::Result<(Self::Observation, StepInfo)> {
        (**self).reset().await
    }

    async fn step(&mut self, action: Self::Action) -> crate::Result<Step<Self::Observation, Self::State>> {
        (**self).step(action).await
    }

    async fn close(&mut self) -> crate::Result<()> {
        (**self).close().await
    }
}
