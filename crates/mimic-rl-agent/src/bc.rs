//! Behavioural cloning trainer
//!
//! [`BcTrainer`] fits a policy to expert (observation, action) pairs by
//! minimizing the negative log-likelihood of the expert's actions under the
//! policy's action distribution.
//!
//! ```no_run
//! use mimic_rl_agent::{BcConfig, BcTrainer, Session};
//! use mimic_rl_core::{EnvironmentConfig, Transitions};
//! use mimic_rl_env::CartPoleEnv;
//!
//! # async fn run(demos: Transitions) -> mimic_rl_core::Result<()> {
//! let env = CartPoleEnv::new(EnvironmentConfig::default())?;
//! let mut trainer = BcTrainer::new(env, Session::new(), Some(demos), BcConfig::default())?;
//! trainer.train(10, None)?;
//! let stats = trainer.test_policy(10).await?;
//! println!("mean return {}", stats.return_mean);
//! trainer.save_policy("out/policy.json").await?;
//! # Ok(())
//! # }
//! ```

use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::path::Path;
use tracing::{info, trace, warn};

use mimic_rl_core::{Environment, RLError, Result, SpaceSpec, Transitions};

use crate::dataset::ExpertDataset;
use crate::distribution::action_indices;
use crate::optimizer::{Optimizer, OptimizerConfig};
use crate::policy::{Policy, PolicyKwargs};
use crate::registry::{make_policy, DEFAULT_POLICY};
use crate::rollout::{generate_trajectories, rollout_stats, RolloutStats, SampleUntil};
use crate::session::Session;
use crate::utils::Ewma;

/// Weight kept by the running loss average on each batch
const LOSS_SMOOTHING: f32 = 0.9;

/// Trainer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BcConfig {
    /// Registry identifier of the policy to train
    pub policy_class: String,
    /// Mini-batch size
    pub batch_size: usize,
    /// Optimizer and its hyperparameters
    pub optimizer: OptimizerConfig,
    /// Scope holding the trainer's variables
    pub name_scope: String,
    /// Bind to variables that already exist under `name_scope`
    pub reuse: bool,
    /// Seed for weight initialization, shuffling and action sampling
    pub seed: Option<u64>,
}

impl Default for BcConfig {
    fn default() -> Self {
        Self {
            policy_class: DEFAULT_POLICY.to_string(),
            batch_size: 32,
            optimizer: OptimizerConfig::default(),
            name_scope: "bc_supervised_loss".to_string(),
            reuse: false,
            seed: None,
        }
    }
}

impl BcConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings before any variable is created
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(RLError::Configuration("batch_size must be positive".to_string()));
        }
        if self.name_scope.is_empty() || self.name_scope.ends_with('/') {
            return Err(RLError::Configuration(format!(
                "invalid name scope {:?}",
                self.name_scope
            )));
        }
        self.optimizer.validate()
    }
}

/// Progress report handed to the epoch callback
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct EpochProgress {
    /// Zero-based index of the epoch that just finished
    pub epoch: usize,
    /// Epochs requested for this call to `train`
    pub n_epochs: usize,
    /// Batches processed in this epoch
    pub batches: usize,
    /// Batches processed since `train` was called
    pub total_batches: usize,
    /// Smoothed loss over this epoch, `None` if it had no batches
    pub loss_ewma: Option<f32>,
    /// Loss of the epoch's last batch
    pub last_loss: Option<f32>,
    /// Loss of every batch in this epoch, in order
    pub batch_losses: Vec<f32>,
    /// Samples consumed since `train` was called
    pub samples_seen: usize,
}

/// Outcome of a call to [`BcTrainer::train`]
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSummary {
    /// Epochs fully run
    pub epochs_completed: usize,
    /// Optimizer steps taken
    pub total_batches: usize,
    /// Smoothed loss of the last completed epoch
    pub final_loss_ewma: Option<f32>,
    /// Whether the callback asked to stop
    pub stopped_early: bool,
}

/// Behavioural cloning trainer bound to one environment and one session
pub struct BcTrainer<E: Environment> {
    env: E,
    config: BcConfig,
    session: Session,
    policy: Box<dyn Policy>,
    policy_kwargs: PolicyKwargs,
    optimizer: Box<dyn Optimizer>,
    expert_dataset: Option<ExpertDataset>,
    rng: StdRng,
}

impl<E: Environment> BcTrainer<E> {
    /// Build the policy, loss and optimizer.
    ///
    /// The policy lives under `"{name_scope}/model"` in `session`. When
    /// variables already exist under `name_scope` the call fails unless
    /// `config.reuse` is set, in which case the policy binds to them.
    pub fn new(
        env: E,
        mut session: Session,
        expert_demos: Option<Transitions>,
        config: BcConfig,
    ) -> Result<Self> {
        config.validate()?;
        if session.has_scope(&config.name_scope) && !config.reuse {
            return Err(RLError::Configuration(format!(
                "variables already exist under {}; set reuse to share them",
                config.name_scope
            )));
        }

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let policy_kwargs = PolicyKwargs::new(env.observation_space().spec(), env.action_space().spec());
        let model_scope = format!("{}/model", config.name_scope);
        let policy = make_policy(
            &config.policy_class,
            &mut session,
            &model_scope,
            &policy_kwargs,
            config.reuse,
            &mut rng,
        )?;
        let optimizer = config.optimizer.build();

        info!(
            policy = %config.policy_class,
            scope = %model_scope,
            variables = policy.trainable_variables().len(),
            batch_size = config.batch_size,
            reuse = config.reuse,
            "BC trainer ready"
        );

        let mut trainer = Self {
            env,
            config,
            session,
            policy,
            policy_kwargs,
            optimizer,
            expert_dataset: None,
            rng,
        };
        if let Some(demos) = expert_demos {
            trainer.set_expert_dataset(&demos)?;
        }
        Ok(trainer)
    }

    /// Replace the training data. Policy variables and optimizer state are kept.
    pub fn set_expert_dataset(&mut self, demos: &Transitions) -> Result<()> {
        let obs_dim = self.policy_kwargs.observation_space.flat_dim();
        let act_dim = self.policy_kwargs.action_space.flat_dim();
        if demos.obs_dim() != obs_dim {
            return Err(RLError::DimensionMismatch {
                expected: obs_dim,
                actual: demos.obs_dim(),
            });
        }
        if demos.act_dim() != act_dim {
            return Err(RLError::DimensionMismatch {
                expected: act_dim,
                actual: demos.act_dim(),
            });
        }
        if let SpaceSpec::Discrete { n } = self.policy_kwargs.action_space {
            action_indices(demos.acts().view(), n)?;
        }
        info!(samples = demos.len(), "expert dataset set");
        self.expert_dataset = Some(ExpertDataset::new(demos));
        Ok(())
    }

    /// Run `n_epochs` passes over the expert dataset.
    ///
    /// `on_epoch_end` sees an [`EpochProgress`] after every epoch; returning
    /// `ControlFlow::Break(())` stops training after that epoch.
    pub fn train(
        &mut self,
        n_epochs: usize,
        mut on_epoch_end: Option<&mut dyn FnMut(&EpochProgress) -> ControlFlow<()>>,
    ) -> Result<TrainSummary> {
        let Self {
            config,
            session,
            policy,
            optimizer,
            expert_dataset,
            rng,
            ..
        } = self;
        let dataset = expert_dataset.as_ref().ok_or(RLError::NoDataset)?;
        let batch_size = config.batch_size;
        let per_epoch = dataset.batches_per_epoch(batch_size);
        if per_epoch == 0 {
            warn!(
                samples = dataset.n_samples(),
                batch_size, "dataset is smaller than one batch; epochs will not update the policy"
            );
        }

        let mut summary = TrainSummary {
            epochs_completed: 0,
            total_batches: 0,
            final_loss_ewma: None,
            stopped_early: false,
        };
        let mut samples_seen = 0;

        for epoch in 0..n_epochs {
            let mut ewma = Ewma::new(LOSS_SMOOTHING);
            let mut batch_losses = Vec::with_capacity(per_epoch);

            for batch in dataset.iterate_once(batch_size, &mut *rng)? {
                let (loss, grads) = policy.nll_and_grads(session, batch.obs.view(), batch.acts.view())?;
                optimizer.step(session, policy.trainable_variables(), &grads)?;
                let smoothed = ewma.update(loss);
                batch_losses.push(loss);
                trace!(epoch, batch = batch_losses.len(), loss, loss_ewma = smoothed, "BC step");
                metrics::increment_counter!("mimic_bc_batches_total");
            }

            let batches = batch_losses.len();
            samples_seen += batches * batch_size;
            summary.total_batches += batches;
            summary.epochs_completed = epoch + 1;
            summary.final_loss_ewma = ewma.value();

            let progress = EpochProgress {
                epoch,
                n_epochs,
                batches,
                total_batches: summary.total_batches,
                loss_ewma: ewma.value(),
                last_loss: batch_losses.last().copied(),
                batch_losses,
                samples_seen,
            };
            info!(
                epoch,
                n_epochs,
                batches,
                loss_ewma = ?progress.loss_ewma,
                "BC epoch finished"
            );
            if let Some(value) = progress.loss_ewma {
                metrics::gauge!("mimic_bc_loss_ewma", f64::from(value));
            }

            if let Some(callback) = on_epoch_end.as_deref_mut() {
                if callback(&progress).is_break() {
                    info!(epoch, "training stopped by callback");
                    summary.stopped_early = true;
                    break;
                }
            }
        }
        Ok(summary)
    }

    /// Mean negative log-likelihood of `transitions`' actions under the current policy
    pub fn loss(&self, transitions: &Transitions) -> Result<f32> {
        self.policy
            .nll(&self.session, transitions.obs().view(), transitions.acts().view())
    }

    /// Roll out the current policy with sampled actions for at least
    /// `min_episodes` episodes and summarize the returns
    pub async fn test_policy(&mut self, min_episodes: usize) -> Result<RolloutStats> {
        let trajectories = generate_trajectories(
            self.policy.as_ref(),
            &self.session,
            &mut self.env,
            SampleUntil::MinEpisodes(min_episodes),
            false,
            &mut self.rng,
        )
        .await?;
        let stats = rollout_stats(&trajectories)?;
        info!(
            episodes = stats.n_traj,
            return_mean = stats.return_mean,
            return_std = stats.return_std,
            "policy evaluated"
        );
        Ok(stats)
    }

    /// Action of the current policy for one observation
    pub fn predict(&mut self, obs: ArrayView1<f32>, deterministic: bool) -> Result<Array1<f32>> {
        self.policy
            .predict(&self.session, obs, deterministic, &mut self.rng)
    }

    /// The policy being trained
    #[must_use]
    pub fn policy(&self) -> &dyn Policy {
        self.policy.as_ref()
    }

    /// Arguments the policy was built with
    #[must_use]
    pub fn policy_kwargs(&self) -> &PolicyKwargs {
        &self.policy_kwargs
    }

    /// Registry identifier of the policy
    #[must_use]
    pub fn policy_class(&self) -> &str {
        &self.config.policy_class
    }

    /// Trainer configuration
    #[must_use]
    pub fn config(&self) -> &BcConfig {
        &self.config
    }

    /// Current training data
    #[must_use]
    pub fn expert_dataset(&self) -> Option<&ExpertDataset> {
        self.expert_dataset.as_ref()
    }

    /// Session holding the policy's variables
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Mutable access to the session
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Give the session back, dropping the trainer
    #[must_use]
    pub fn into_session(self) -> Session {
        self.session
    }

    /// Evaluation environment
    #[must_use]
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Mutable access to the evaluation environment
    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }
}
