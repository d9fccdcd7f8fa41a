//! Environment wrappers for common transformations

use async_trait::async_trait;

use mimic_rl_core::{ActionSpace, Environment, ObservationSpace, Step, StepInfo};

/// Time limit wrapper
///
/// Marks the step that reaches `max_steps` as truncated unless the inner
/// environment already ended the episode on that step.
pub struct TimeLimit<E> {
    /// Inner environment
    pub env: E,
    /// Maximum steps
    pub max_steps: usize,
    /// Current step count
    pub steps: usize,
}

impl<E> TimeLimit<E> {
    /// Create a new time limit wrapper
    pub fn new(env: E, max_steps: usize) -> Self {
        Self {
            env,
            max_steps,
            steps: 0,
        }
    }
}

#[async_trait]
impl<E> Environment for TimeLimit<E>
where
    E: Environment,
{
    type Observation = E::Observation;
    type Action = E::Action;
    type State = E::State;

    fn observation_space(&self) -> Box<dyn ObservationSpace<Observation = Self::Observation>> {
        self.env.observation_space()
    }

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        self.env.action_space()
    }

    async fn reset(&mut self) -> mimic_rl_core::Result<(Self::Observation, StepInfo)> {
        self.steps = 0;
        self.env.reset().await
    }

    async fn step(&mut self, action: Self::Action) -> mimic_rl_core::Result<Step<Self::Observation, Self::State>> {
        self.steps += 1;
        let mut step = self.env.step(action).await?;

        if self.steps >= self.max_steps && !step.done {
            step.truncated = true;
        }

        Ok(step)
    }

    async fn close(&mut self) -> mimic_rl_core::Result<()> {
        self.env.close().await
    }
}
