//! Policy rollouts and episode statistics

use ndarray::Array1;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, info};
use uuid::Uuid;

use mimic_rl_core::{Action, Environment, Observation, RLError, Result, SpaceSpec, Step, Trajectory, Transition};

use crate::policy::Policy;
use crate::session::Session;
use crate::utils::clip_to_bounds;

/// When to stop collecting episodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleUntil {
    /// At least this many complete episodes
    MinEpisodes(usize),
    /// At least this many environment steps, in complete episodes
    MinTimesteps(usize),
}

impl SampleUntil {
    fn is_satisfied(self, episodes: usize, timesteps: usize) -> bool {
        match self {
            Self::MinEpisodes(n) => episodes >= n,
            Self::MinTimesteps(n) => timesteps >= n,
        }
    }
}

/// Aggregate statistics over a set of episodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutStats {
    /// Number of episodes
    pub n_traj: usize,
    /// Mean undiscounted return
    pub return_mean: f64,
    /// Population standard deviation of the return
    pub return_std: f64,
    /// Lowest return
    pub return_min: f64,
    /// Highest return
    pub return_max: f64,
    /// Mean episode length
    pub len_mean: f64,
    /// Population standard deviation of the episode length
    pub len_std: f64,
    /// Shortest episode
    pub len_min: usize,
    /// Longest episode
    pub len_max: usize,
}

/// Run whole episodes with `policy` until `sample_until` holds.
///
/// Episodes end on termination or truncation. Continuous actions are clipped
/// to the action space bounds before they reach the environment.
pub async fn generate_trajectories<E, P, R>(
    policy: &P,
    session: &Session,
    env: &mut E,
    sample_until: SampleUntil,
    deterministic: bool,
    rng: &mut R,
) -> Result<Vec<Trajectory<E::Observation, E::Action, E::State>>>
where
    E: Environment + ?Sized,
    P: Policy + ?Sized,
    R: RngCore + Send,
{
    let bounds = match &policy.kwargs().action_space {
        SpaceSpec::Box { low, high, .. } => Some((low.clone(), high.clone())),
        SpaceSpec::Discrete { .. } => None,
    };

    let mut trajectories = Vec::new();
    let mut timesteps = 0;
    while !sample_until.is_satisfied(trajectories.len(), timesteps) {
        let (mut observation, _) = env.reset().await?;
        let mut trajectory = Trajectory::new(Uuid::new_v4().to_string());

        loop {
            #[allow(clippy::cast_possible_truncation)]
            let features: Array1<f32> = observation.to_vec().into_iter().map(|v| v as f32).collect();
            let raw = policy.predict(session, features.view(), deterministic, &mut *rng)?;
            let mut values: Vec<f64> = raw.iter().map(|&v| f64::from(v)).collect();
            if let Some((low, high)) = &bounds {
                clip_to_bounds(&mut values, low, high);
            }
            let action = E::Action::from_slice(&values)?;

            let Step {
                observation: next_observation,
                reward,
                done,
                truncated,
                state,
                ..
            } = env.step(action.clone()).await?;

            trajectory.push(Transition {
                observation,
                action,
                reward,
                next_observation: next_observation.clone(),
                done,
                state: None,
                next_state: state,
            });
            observation = next_observation;
            if done || truncated {
                break;
            }
        }

        debug!(
            episode = %trajectory.episode_id,
            length = trajectory.len(),
            total_reward = trajectory.total_reward,
            "rollout episode finished"
        );
        timesteps += trajectory.len();
        trajectories.push(trajectory);
    }

    info!(episodes = trajectories.len(), timesteps, "rollout complete");
    Ok(trajectories)
}

/// Return and length statistics of `trajectories`
#[allow(clippy::cast_precision_loss)]
pub fn rollout_stats<O, A, S>(trajectories: &[Trajectory<O, A, S>]) -> Result<RolloutStats> {
    if trajectories.is_empty() {
        return Err(RLError::Computation(
            "cannot summarize an empty set of trajectories".to_string(),
        ));
    }
    let returns: Vec<f64> = trajectories.iter().map(|t| t.total_reward).collect();
    let lengths: Vec<usize> = trajectories.iter().map(Trajectory::len).collect();
    let lengths_f: Vec<f64> = lengths.iter().map(|&l| l as f64).collect();

    Ok(RolloutStats {
        n_traj: trajectories.len(),
        return_mean: Statistics::mean(&returns),
        return_std: Statistics::population_std_dev(&returns),
        return_min: Statistics::min(&returns),
        return_max: Statistics::max(&returns),
        len_mean: Statistics::mean(&lengths_f),
        len_std: Statistics::population_std_dev(&lengths_f),
        len_min: lengths.iter().copied().min().unwrap_or(0),
        len_max: lengths.iter().copied().max().unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyKwargs;
    use crate::registry::make_policy;
    use approx::assert_relative_eq;
    use mimic_rl_core::{DiscreteAction, EnvironmentConfig, Reward, VectorObservation, VectorState};
    use mimic_rl_env::CartPoleEnv;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn episode(rewards: &[f64]) -> Trajectory<VectorObservation, DiscreteAction, VectorState> {
        let mut trajectory = Trajectory::new("t".to_string());
        for &r in rewards {
            trajectory.push(Transition {
                observation: VectorObservation::new(vec![0.0]),
                action: DiscreteAction(0),
                reward: Reward(r),
                next_observation: VectorObservation::new(vec![0.0]),
                done: false,
                state: None,
                next_state: None,
            });
        }
        trajectory
    }

    #[test]
    fn test_rollout_stats() {
        let stats = rollout_stats(&[episode(&[1.0, 1.0]), episode(&[2.0, 2.0, 2.0, 2.0])]).unwrap();
        assert_eq!(stats.n_traj, 2);
        assert_relative_eq!(stats.return_mean, 5.0);
        assert_relative_eq!(stats.return_std, 3.0);
        assert_relative_eq!(stats.return_min, 2.0);
        assert_relative_eq!(stats.return_max, 8.0);
        assert_relative_eq!(stats.len_mean, 3.0);
        assert_relative_eq!(stats.len_std, 1.0);
        assert_eq!((stats.len_min, stats.len_max), (2, 4));
    }

    #[test]
    fn test_rollout_stats_rejects_empty() {
        let none: Vec<Trajectory<VectorObservation, DiscreteAction, VectorState>> = Vec::new();
        assert!(matches!(rollout_stats(&none), Err(RLError::Computation(_))));
    }

    async fn cartpole_rollout(sample_until: SampleUntil) -> Vec<Trajectory<VectorObservation, DiscreteAction, VectorState>> {
        let mut env = CartPoleEnv::new(EnvironmentConfig {
            seed: Some(5),
            ..EnvironmentConfig::default()
        })
        .unwrap();
        let kwargs = PolicyKwargs::new(env.observation_space().spec(), env.action_space().spec());
        let mut session = Session::new();
        let mut rng = StdRng::seed_from_u64(5);
        let policy = make_policy("linear", &mut session, "eval", &kwargs, false, &mut rng).unwrap();
        generate_trajectories(policy.as_ref(), &session, &mut env, sample_until, false, &mut rng)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_min_episodes() {
        let trajectories = cartpole_rollout(SampleUntil::MinEpisodes(3)).await;
        assert_eq!(trajectories.len(), 3);
        for trajectory in &trajectories {
            assert!(!trajectory.is_empty());
            let last = trajectory.transitions.last().unwrap();
            assert!(last.done || trajectory.len() == 500);
            assert!(trajectory.transitions[..trajectory.len() - 1].iter().all(|t| !t.done));
        }
    }

    #[tokio::test]
    async fn test_min_timesteps() {
        let trajectories = cartpole_rollout(SampleUntil::MinTimesteps(100)).await;
        let total: usize = trajectories.iter().map(Trajectory::len).sum();
        assert!(total >= 100);
        let without_last: usize = trajectories[..trajectories.len() - 1].iter().map(Trajectory::len).sum();
        assert!(without_last < 100);
    }
}
