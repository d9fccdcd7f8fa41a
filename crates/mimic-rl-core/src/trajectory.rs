//! Trajectories and flattened transition datasets

use ndarray::{concatenate, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Action, Observation, RLError, Reward};

/// Single transition in a trajectory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition<O, A, S> {
    /// Current observation
    pub observation: O,
    /// Action taken
    pub action: A,
    /// Reward received
    pub reward: Reward,
    /// Next observation
    pub next_observation: O,
    /// Whether episode ended
    pub done: bool,
    /// Internal state (if available)
    pub state: Option<S>,
    /// Next internal state (if available)
    pub next_state: Option<S>,
}

/// Complete trajectory of an episode
#[derive(Debug, Clone)]
pub struct Trajectory<O, A, S> {
    /// Sequence of transitions
    pub transitions: Vec<Transition<O, A, S>>,
    /// Total reward
    pub total_reward: f64,
    /// Episode ID
    pub episode_id: String,
}

impl<O, A, S> Trajectory<O, A, S> {
    /// Create a new empty trajectory
    pub fn new(episode_id: String) -> Self {
        Self {
            transitions: Vec::new(),
            total_reward: 0.0,
            episode_id,
        }
    }

    /// Add a transition to the trajectory
    pub fn push(&mut self, transition: Transition<O, A, S>) {
        self.total_reward += transition.reward.0;
        self.transitions.push(transition);
    }

    /// Get the length of the trajectory
    #[must_use]
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Check if trajectory is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

/// Flattened, aligned arrays of transitions.
///
/// Row `i` of every field describes the same transition. Discrete actions are
/// stored as a single column holding the action index. The arrays are fixed at
/// construction; build a new value (for example with [`Transitions::concat`])
/// to grow a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TransitionsRecord")]
pub struct Transitions {
    obs: Array2<f32>,
    acts: Array2<f32>,
    next_obs: Array2<f32>,
    rews: Array1<f32>,
    dones: Vec<bool>,
}

#[derive(Deserialize)]
struct TransitionsRecord {
    obs: Array2<f32>,
    acts: Array2<f32>,
    next_obs: Array2<f32>,
    rews: Array1<f32>,
    dones: Vec<bool>,
}

impl TryFrom<TransitionsRecord> for Transitions {
    type Error = RLError;

    fn try_from(record: TransitionsRecord) -> crate::Result<Self> {
        Self::new(record.obs, record.acts, record.next_obs, record.rews, record.dones)
    }
}

impl Transitions {
    /// Build a dataset from aligned arrays
    pub fn new(
        obs: Array2<f32>,
        acts: Array2<f32>,
        next_obs: Array2<f32>,
        rews: Array1<f32>,
        dones: Vec<bool>,
    ) -> crate::Result<Self> {
        let n = obs.nrows();
        for actual in [acts.nrows(), next_obs.nrows(), rews.len(), dones.len()] {
            if actual != n {
                return Err(RLError::DimensionMismatch { expected: n, actual });
            }
        }
        if next_obs.ncols() != obs.ncols() {
            return Err(RLError::DimensionMismatch {
                expected: obs.ncols(),
                actual: next_obs.ncols(),
            });
        }
        Ok(Self {
            obs,
            acts,
            next_obs,
            rews,
            dones,
        })
    }

    /// Flatten whole episodes into one dataset
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_trajectories<O, A, S>(trajectories: &[Trajectory<O, A, S>]) -> crate::Result<Self>
    where
        O: Observation,
        A: Action,
    {
        let first = trajectories
            .iter()
            .flat_map(|t| t.transitions.first())
            .next()
            .ok_or_else(|| RLError::Configuration("no transitions to flatten".to_string()))?;
        let obs_dim = first.observation.to_vec().len();
        let act_dim = first.action.to_vec().len();

        let n: usize = trajectories.iter().map(Trajectory::len).sum();
        let mut obs = Vec::with_capacity(n * obs_dim);
        let mut next_obs = Vec::with_capacity(n * obs_dim);
        let mut acts = Vec::with_capacity(n * act_dim);
        let mut rews = Vec::with_capacity(n);
        let mut dones = Vec::with_capacity(n);

        for transition in trajectories.iter().flat_map(|t| &t.transitions) {
            extend_row(&mut obs, &transition.observation.to_vec(), obs_dim)?;
            extend_row(&mut next_obs, &transition.next_observation.to_vec(), obs_dim)?;
            extend_row(&mut acts, &transition.action.to_vec(), act_dim)?;
            rews.push(transition.reward.0 as f32);
            dones.push(transition.done);
        }

        debug!(
            episodes = trajectories.len(),
            transitions = n,
            obs_dim,
            act_dim,
            "flattened trajectories"
        );

        Self::new(
            to_matrix(n, obs_dim, obs)?,
            to_matrix(n, act_dim, acts)?,
            to_matrix(n, obs_dim, next_obs)?,
            Array1::from_vec(rews),
            dones,
        )
    }

    /// Append `other` after `self`
    pub fn concat(&self, other: &Self) -> crate::Result<Self> {
        if self.obs_dim() != other.obs_dim() {
            return Err(RLError::DimensionMismatch {
                expected: self.obs_dim(),
                actual: other.obs_dim(),
            });
        }
        if self.act_dim() != other.act_dim() {
            return Err(RLError::DimensionMismatch {
                expected: self.act_dim(),
                actual: other.act_dim(),
            });
        }
        let stack2 = |a: &Array2<f32>, b: &Array2<f32>| {
            concatenate(Axis(0), &[a.view(), b.view()])
                .map_err(|e| RLError::Computation(e.to_string()))
        };
        let rews = concatenate(Axis(0), &[self.rews.view(), other.rews.view()])
            .map_err(|e| RLError::Computation(e.to_string()))?;
        let mut dones = self.dones.clone();
        dones.extend_from_slice(&other.dones);

        Self::new(
            stack2(&self.obs, &other.obs)?,
            stack2(&self.acts, &other.acts)?,
            stack2(&self.next_obs, &other.next_obs)?,
            rews,
            dones,
        )
    }

    /// Number of transitions
    #[must_use]
    pub fn len(&self) -> usize {
        self.obs.nrows()
    }

    /// Whether the dataset holds no transitions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Width of one observation row
    #[must_use]
    pub fn obs_dim(&self) -> usize {
        self.obs.ncols()
    }

    /// Width of one action row
    #[must_use]
    pub fn act_dim(&self) -> usize {
        self.acts.ncols()
    }

    /// Observations, one row per transition
    #[must_use]
    pub fn obs(&self) -> &Array2<f32> {
        &self.obs
    }

    /// Actions, one row per transition
    #[must_use]
    pub fn acts(&self) -> &Array2<f32> {
        &self.acts
    }

    /// Observations after each action
    #[must_use]
    pub fn next_obs(&self) -> &Array2<f32> {
        &self.next_obs
    }

    /// Rewards
    #[must_use]
    pub fn rews(&self) -> &Array1<f32> {
        &self.rews
    }

    /// Episode-end flags
    #[must_use]
    pub fn dones(&self) -> &[bool] {
        &self.dones
    }
}

#[allow(clippy::cast_possible_truncation)]
fn extend_row(dest: &mut Vec<f32>, row: &[f64], width: usize) -> crate::Result<()> {
    if row.len() != width {
        return Err(RLError::DimensionMismatch {
            expected: width,
            actual: row.len(),
        });
    }
    dest.extend(row.iter().map(|&v| v as f32));
    Ok(())
}

fn to_matrix(rows: usize, cols: usize, data: Vec<f32>) -> crate::Result<Array2<f32>> {
    Array2::from_shape_vec((rows, cols), data).map_err(|e| RLError::Computation(e.to_string()))
}
