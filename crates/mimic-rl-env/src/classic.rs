//! Classic control environments

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use mimic_rl_core::{
    ActionSpace, BoxObservationSpace, DiscreteAction, DiscreteSpace, Environment,
    EnvironmentConfig, ObservationSpace, RLError, Result, Reward, Step, StepInfo, Terminal,
    Trajectory, Transition, VectorObservation, VectorState,
};

/// Largest finite bound exposed by the spaces below, mirroring gym's float32 limit
const UNBOUNDED: f64 = f32::MAX as f64;

fn rng_from(config: &EnvironmentConfig) -> StdRng {
    match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// CartPole environment
pub struct CartPoleEnv {
    /// Current state
    state: CartPoleState,
    /// Configuration
    config: CartPoleConfig,
    /// Step count
    steps: usize,
    rng: StdRng,
}

#[derive(Debug, Clone)]
struct CartPoleState {
    x: f64,         // Cart position
    x_dot: f64,     // Cart velocity
    theta: f64,     // Pole angle
    theta_dot: f64, // Pole angular velocity
}

#[derive(Debug, Clone)]
struct CartPoleConfig {
    gravity: f64,
    mass_cart: f64,
    mass_pole: f64,
    length: f64,
    force_mag: f64,
    tau: f64,
    max_steps: usize,
    x_threshold: f64,
    theta_threshold: f64,
}

impl Default for CartPoleConfig {
    fn default() -> Self {
        Self {
            gravity: 9.8,
            mass_cart: 1.0,
            mass_pole: 0.1,
            length: 0.5,
            force_mag: 10.0,
            tau: 0.02,
            max_steps: 500,
            x_threshold: 2.4,
            theta_threshold: 0.209, // ~12 degrees
        }
    }
}

impl CartPoleEnv {
    /// Create a new CartPole environment
    pub fn new(config: EnvironmentConfig) -> Result<Self> {
        let mut cartpole = CartPoleConfig::default();
        if let Some(max_steps) = config.max_steps {
            cartpole.max_steps = max_steps;
        }
        Ok(Self {
            state: CartPoleState {
                x: 0.0,
                x_dot: 0.0,
                theta: 0.0,
                theta_dot: 0.0,
            },
            config: cartpole,
            steps: 0,
            rng: rng_from(&config),
        })
    }

    fn get_observation(&self) -> VectorObservation {
        VectorObservation {
            data: vec![
                self.state.x,
                self.state.x_dot,
                self.state.theta,
                self.state.theta_dot,
            ],
        }
    }

    fn is_terminated(&self) -> bool {
        self.state.x.abs() > self.config.x_threshold
            || self.state.theta.abs() > self.config.theta_threshold
    }
}

/// Hand-written CartPole controller used to produce expert demonstrations.
///
/// Pushes the cart toward the side the pole is falling to, with a small
/// correction for cart drift. Balances the pole for the full episode from
/// the usual reset distribution.
#[must_use]
pub fn cartpole_expert(observation: &VectorObservation) -> DiscreteAction {
    let [x, x_dot, theta, theta_dot] = match observation.data.as_slice() {
        [a, b, c, d] => [*a, *b, *c, *d],
        _ => return DiscreteAction(0),
    };
    let push = theta + 0.5 * theta_dot + 0.01 * x + 0.1 * x_dot;
    DiscreteAction(usize::from(push > 0.0))
}

/// Episode recorded from a classic-control environment
pub type ClassicTrajectory = Trajectory<VectorObservation, DiscreteAction, VectorState>;

/// Run `episodes` whole episodes of `env` under [`cartpole_expert`].
///
/// Episodes end on termination or truncation; wrap the environment in a
/// [`TimeLimit`](crate::TimeLimit) to bound their length.
pub async fn collect_expert_episodes<E>(env: &mut E, episodes: usize) -> Result<Vec<ClassicTrajectory>>
where
    E: Environment<Observation = VectorObservation, Action = DiscreteAction, State = VectorState> + ?Sized,
{
    let mut trajectories = Vec::with_capacity(episodes);
    for episode in 0..episodes {
        let (mut observation, _info) = env.reset().await?;
        let mut trajectory = ClassicTrajectory::new(format!("expert-{episode}"));
        loop {
            let action = cartpole_expert(&observation);
            let step = env.step(action).await?;
            let last = step.is_last();
            trajectory.push(Transition {
                observation,
                action,
                reward: step.reward,
                next_observation: step.observation.clone(),
                done: step.done,
                state: None,
                next_state: step.state,
            });
            observation = step.observation;
            if last {
                break;
            }
        }
        trajectories.push(trajectory);
    }
    Ok(trajectories)
}

#[async_trait]
impl Environment for CartPoleEnv {
    type Observation = VectorObservation;
    type Action = DiscreteAction;
    type State = VectorState;

    fn observation_space(&self) -> Box<dyn ObservationSpace<Observation = Self::Observation>> {
        let high = vec![
            self.config.x_threshold * 2.0,
            UNBOUNDED,
            self.config.theta_threshold * 2.0,
            UNBOUNDED,
        ];
        let low = high.iter().map(|&x| -x).collect();

        Box::new(BoxObservationSpace {
            low,
            high,
            shape: vec![4],
        })
    }

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        Box::new(DiscreteSpace::new(2)) // 0: push left, 1: push right
    }

    async fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        let rng = &mut self.rng;
        self.state = CartPoleState {
            x: rng.gen_range(-0.05..0.05),
            x_dot: rng.gen_range(-0.05..0.05),
            theta: rng.gen_range(-0.05..0.05),
            theta_dot: rng.gen_range(-0.05..0.05),
        };
        self.steps = 0;

        Ok((self.get_observation(), StepInfo::default()))
    }

    async fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation, Self::State>> {
        let force = match action.0 {
            0 => -self.config.force_mag,
            1 => self.config.force_mag,
            other => return Err(RLError::InvalidAction(format!("Invalid action: {other}"))),
        };

        let cos_theta = self.state.theta.cos();
        let sin_theta = self.state.theta.sin();

        let total_mass = self.config.mass_cart + self.config.mass_pole;
        let pole_mass_length = self.config.mass_pole * self.config.length;

        let temp = (force + pole_mass_length * self.state.theta_dot.powi(2) * sin_theta) / total_mass;
        let theta_acc = (self.config.gravity * sin_theta - cos_theta * temp)
            / (self.config.length * (4.0 / 3.0 - self.config.mass_pole * cos_theta.powi(2) / total_mass));
        let x_acc = temp - pole_mass_length * theta_acc * cos_theta / total_mass;

        // Euler integration
        let dt = self.config.tau;
        self.state.x += dt * self.state.x_dot;
        self.state.x_dot += dt * x_acc;
        self.state.theta += dt * self.state.theta_dot;
        self.state.theta_dot += dt * theta_acc;

        self.steps += 1;

        let done = self.is_terminated();
        let truncated = self.steps >= self.config.max_steps && !done;

        Ok(Step {
            observation: self.get_observation(),
            reward: Reward(1.0), // Reward of 1 for each step survived
            done,
            truncated,
            info: StepInfo::default(),
            state: Some(VectorState {
                data: vec![self.state.x, self.state.x_dot, self.state.theta, self.state.theta_dot],
                terminal: if done {
                    Terminal::Yes
                } else if truncated {
                    Terminal::Truncated
                } else {
                    Terminal::No
                },
            }),
        })
    }
}

/// Mountain Car environment
pub struct MountainCarEnv {
    /// Current state
    state: MountainCarState,
    /// Configuration
    config: MountainCarConfig,
    /// Step count
    steps: usize,
    rng: StdRng,
}

#[derive(Debug, Clone)]
struct MountainCarState {
    position: f64,
    velocity: f64,
}

#[derive(Debug, Clone)]
struct MountainCarConfig {
    min_position: f64,
    max_position: f64,
    max_speed: f64,
    goal_position: f64,
    goal_velocity: f64,
    force: f64,
    gravity: f64,
    max_steps: usize,
}

impl Default for MountainCarConfig {
    fn default() -> Self {
        Self {
            min_position: -1.2,
            max_position: 0.6,
            max_speed: 0.07,
            goal_position: 0.5,
            goal_velocity: 0.0,
            force: 0.001,
            gravity: 0.0025,
            max_steps: 200,
        }
    }
}

impl MountainCarEnv {
    /// Create a new Mountain Car environment
    pub fn new(config: EnvironmentConfig) -> Result<Self> {
        let mut mountain_car = MountainCarConfig::default();
        if let Some(max_steps) = config.max_steps {
            mountain_car.max_steps = max_steps;
        }
        Ok(Self {
            state: MountainCarState {
                position: -0.5,
                velocity: 0.0,
            },
            config: mountain_car,
            steps: 0,
            rng: rng_from(&config),
        })
    }

    fn get_observation(&self) -> VectorObservation {
        VectorObservation {
            data: vec![self.state.position, self.state.velocity],
        }
    }
}

#[async_trait]
impl Environment for MountainCarEnv {
    type Observation = VectorObservation;
    type Action = DiscreteAction;
    type State = VectorState;

    fn observation_space(&self) -> Box<dyn ObservationSpace<Observation = Self::Observation>> {
        Box::new(BoxObservationSpace {
            low: vec![self.config.min_position, -self.config.max_speed],
            high: vec![self.config.max_position, self.config.max_speed],
            shape: vec![2],
        })
    }

    fn action_space(&self) -> Box<dyn ActionSpace<Action = Self::Action>> {
        Box::new(DiscreteSpace::new(3)) // 0: push left, 1: no push, 2: push right
    }

    async fn reset(&mut self) -> Result<(Self::Observation, StepInfo)> {
        self.state = MountainCarState {
            position: self.rng.gen_range(-0.6..-0.4),
            velocity: 0.0,
        };
        self.steps = 0;

        Ok((self.get_observation(), StepInfo::default()))
    }

    async fn step(&mut self, action: Self::Action) -> Result<Step<Self::Observation, Self::State>> {
        let force = match action.0 {
            0 => -1.0,
            1 => 0.0,
            2 => 1.0,
            other => return Err(RLError::InvalidAction(format!("Invalid action: {other}"))),
        };

        self.state.velocity += force * self.config.force + (3.0 * self.state.position).cos() * (-self.config.gravity);
        self.state.velocity = self.state.velocity.clamp(-self.config.max_speed, self.config.max_speed);

        self.state.position += self.state.velocity;
        self.state.position = self.state.position.clamp(self.config.min_position, self.config.max_position);

        // Stop at the left wall
        if self.state.position <= self.config.min_position && self.state.velocity < 0.0 {
            self.state.velocity = 0.0;
        }

        self.steps += 1;

        let done = self.state.position >= self.config.goal_position
            && self.state.velocity >= self.config.goal_velocity;
        let truncated = self.steps >= self.config.max_steps && !done;

        Ok(Step {
            observation: self.get_observation(),
            reward: Reward(-1.0),
            done,
            truncated,
            info: StepInfo::default(),
            state: Some(VectorState {
                data: vec![self.state.position, self.state.velocity],
                terminal: if done { Terminal::Yes } else { Terminal::No },
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u64) -> EnvironmentConfig {
        EnvironmentConfig {
            seed: Some(seed),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cartpole_random_actions_terminate() {
        let mut env = CartPoleEnv::new(seeded(0)).unwrap();
        env.reset().await.unwrap();
        let mut steps = 0;
        loop {
            let step = env.step(DiscreteAction(0)).await.unwrap();
            steps += 1;
            if step.is_last() {
                assert!(step.done);
                break;
            }
        }
        assert!(steps < 100, "always pushing left should topple the pole quickly");
    }

    #[tokio::test]
    async fn test_cartpole_expert_balances_until_truncation() {
        let config = EnvironmentConfig {
            seed: Some(7),
            max_steps: Some(200),
            ..Default::default()
        };
        let mut env = CartPoleEnv::new(config).unwrap();
        let (mut obs, _) = env.reset().await.unwrap();
        let mut steps = 0;
        loop {
            let step = env.step(cartpole_expert(&obs)).await.unwrap();
            steps += 1;
            if step.is_last() {
                assert!(step.truncated);
                assert!(!step.done);
                break;
            }
            obs = step.observation;
        }
        assert_eq!(steps, 200);
    }

    #[tokio::test]
    async fn test_collect_expert_episodes() {
        let config = EnvironmentConfig {
            seed: Some(11),
            max_steps: Some(50),
            ..Default::default()
        };
        let mut env = CartPoleEnv::new(config).unwrap();
        let episodes = collect_expert_episodes(&mut env, 3).await.unwrap();
        assert_eq!(episodes.len(), 3);
        for episode in &episodes {
            assert_eq!(episode.len(), 50);
            assert!(approx::relative_eq!(episode.total_reward, 50.0));
            assert!(episode.transitions.iter().all(|t| t.action == cartpole_expert(&t.observation)));
        }
        assert_eq!(episodes[2].episode_id, "expert-2");

        let transitions = mimic_rl_core::Transitions::from_trajectories(&episodes).unwrap();
        assert_eq!(transitions.len(), 150);
        assert_eq!(collect_expert_episodes(&mut env, 0).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_cartpole_rejects_invalid_action() {
        let mut env = CartPoleEnv::new(seeded(1)).unwrap();
        env.reset().await.unwrap();
        assert!(matches!(
            env.step(DiscreteAction(2)).await,
            Err(RLError::InvalidAction(_))
        ));
    }

    #[tokio::test]
    async fn test_cartpole_spaces_serialize() {
        let env = CartPoleEnv::new(seeded(2)).unwrap();
        let spec = env.observation_space().spec();
        assert_eq!(spec.flat_dim(), 4);
        let json = serde_json::to_string(&spec).unwrap();
        let back: mimic_rl_core::SpaceSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
        assert_eq!(env.action_space().spec(), mimic_rl_core::SpaceSpec::Discrete { n: 2 });
    }

    #[tokio::test]
    async fn test_mountain_car_truncates() {
        let config = EnvironmentConfig {
            seed: Some(3),
            max_steps: Some(50),
            ..Default::default()
        };
        let mut env = MountainCarEnv::new(config).unwrap();
        env.reset().await.unwrap();
        let mut last = None;
        for _ in 0..50 {
            last = Some(env.step(DiscreteAction(1)).await.unwrap());
        }
        let last = last.unwrap();
        assert!(last.truncated);
        assert!(approx::relative_eq!(last.reward.value(), -1.0));
    }
}
