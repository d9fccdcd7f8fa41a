//! Policy networks for behavioural cloning
//!
//! A policy maps a batch of observations to an [`ActionDistribution`]. Its
//! parameters live in a [`Session`]; the policy itself only keeps handles, so
//! the same policy value can be evaluated against whatever the session
//! currently holds (after training steps, after loading saved weights, ...).

use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, Ix1, Ix2};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use mimic_rl_core::{RLError, Result, SpaceSpec};

use crate::distribution::ActionDistribution;
use crate::session::{Session, VarHandle};

/// Construction arguments shared by every policy variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyKwargs {
    /// Observation space the policy reads
    pub observation_space: SpaceSpec,
    /// Action space the policy acts in
    pub action_space: SpaceSpec,
    /// Number of parallel environments the policy is built for
    #[serde(default = "default_n_env")]
    pub n_env: usize,
    /// Rollout length hint
    #[serde(default = "default_n_steps")]
    pub n_steps: usize,
    /// Fixed batch size hint (`None` for any)
    #[serde(default)]
    pub n_batch: Option<usize>,
}

fn default_n_env() -> usize {
    1
}

fn default_n_steps() -> usize {
    1000
}

impl PolicyKwargs {
    /// Kwargs for the given spaces with default batch-shape hints
    #[must_use]
    pub fn new(observation_space: SpaceSpec, action_space: SpaceSpec) -> Self {
        Self {
            observation_space,
            action_space,
            n_env: default_n_env(),
            n_steps: default_n_steps(),
            n_batch: None,
        }
    }
}

/// Parametric mapping from observations to action distributions
pub trait Policy: Send + Sync {
    /// Registry identifier of this policy variant
    fn class_id(&self) -> &str;

    /// Arguments the policy was built with
    fn kwargs(&self) -> &PolicyKwargs;

    /// Name scope holding the policy's variables
    fn scope(&self) -> &str;

    /// Trainable variables in declaration order
    fn trainable_variables(&self) -> &[VarHandle];

    /// Action distribution for a batch of observations (`batch × obs_dim`)
    fn distribution(&self, session: &Session, obs: ArrayView2<f32>) -> Result<ActionDistribution>;

    /// Mean negative log-likelihood of `acts` and its gradient w.r.t. every
    /// trainable variable, ordered like [`Policy::trainable_variables`]
    fn nll_and_grads(
        &self,
        session: &Session,
        obs: ArrayView2<f32>,
        acts: ArrayView2<f32>,
    ) -> Result<(f32, Vec<ArrayD<f32>>)>;

    /// Mean negative log-likelihood of `acts`
    fn nll(&self, session: &Session, obs: ArrayView2<f32>, acts: ArrayView2<f32>) -> Result<f32> {
        let nll = self.distribution(session, obs)?.neglogp(acts)?;
        nll.mean()
            .ok_or_else(|| RLError::Computation("negative log-likelihood of an empty batch".to_string()))
    }

    /// Single action for a single observation
    fn predict(
        &self,
        session: &Session,
        obs: ArrayView1<f32>,
        deterministic: bool,
        rng: &mut dyn RngCore,
    ) -> Result<Array1<f32>> {
        let batch = obs.insert_axis(Axis(0));
        let dist = self.distribution(session, batch)?;
        let actions = if deterministic { dist.mode() } else { dist.sample(rng)? };
        Ok(actions.row(0).to_owned())
    }
}

/// Hidden-layer nonlinearity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// Hyperbolic tangent
    Tanh,
    /// Rectified linear unit
    Relu,
}

impl Activation {
    fn apply(self, x: &mut Array2<f32>) {
        match self {
            Self::Tanh => x.mapv_inplace(f32::tanh),
            Self::Relu => x.mapv_inplace(|v| v.max(0.0)),
        }
    }

    /// Derivative expressed through the activation's output
    fn derivative(self, y: &Array2<f32>) -> Array2<f32> {
        match self {
            Self::Tanh => y.mapv(|v| 1.0 - v * v),
            Self::Relu => y.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
        }
    }
}

/// MLP policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpConfig {
    /// Hidden layer sizes
    pub hidden_dims: Vec<usize>,
    /// Activation function
    pub activation: Activation,
}

impl MlpConfig {
    /// Tanh network with `layers` hidden layers of `width` units
    #[must_use]
    pub fn feed_forward(width: usize, layers: usize) -> Self {
        Self {
            hidden_dims: vec![width; layers],
            activation: Activation::Tanh,
        }
    }

    /// No hidden layers
    #[must_use]
    pub fn linear() -> Self {
        Self {
            hidden_dims: Vec::new(),
            activation: Activation::Tanh,
        }
    }
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self::feed_forward(32, 2)
    }
}

#[derive(Debug, Clone, Copy)]
struct Dense {
    weight: VarHandle,
    bias: VarHandle,
}

/// Multi-layer perceptron with a categorical or diagonal-Gaussian head
#[derive(Debug)]
pub struct MlpPolicy {
    class_id: String,
    kwargs: PolicyKwargs,
    config: MlpConfig,
    scope: String,
    /// Hidden layers followed by the output layer
    layers: Vec<Dense>,
    log_std: Option<VarHandle>,
    trainable: Vec<VarHandle>,
}

struct Forward {
    /// Input followed by every hidden layer's output
    activations: Vec<Array2<f32>>,
    head: Array2<f32>,
}

impl MlpPolicy {
    /// Build the network's variables under `scope`.
    ///
    /// With `reuse` the policy binds to variables that already exist under
    /// `scope` and leaves their values alone; otherwise it creates them with
    /// Glorot-uniform weights, zero biases and zero log-std.
    pub fn build(
        session: &mut Session,
        scope: &str,
        class_id: &str,
        kwargs: PolicyKwargs,
        config: MlpConfig,
        reuse: bool,
        rng: &mut dyn RngCore,
    ) -> Result<Self> {
        let obs_dim = kwargs.observation_space.flat_dim();
        let head_dim = kwargs.action_space.param_dim();
        if obs_dim == 0 || head_dim == 0 {
            return Err(RLError::Configuration(format!(
                "policy spaces must be non-empty (obs {obs_dim}, action {head_dim})"
            )));
        }

        let mut binder = Binder {
            session,
            reuse,
            rng,
            trainable: Vec::new(),
        };
        let mut layers = Vec::with_capacity(config.hidden_dims.len() + 1);
        let mut prev_dim = obs_dim;
        for (i, &dim) in config.hidden_dims.iter().enumerate() {
            layers.push(binder.dense(&format!("{scope}/pi/fc{i}"), prev_dim, dim)?);
            prev_dim = dim;
        }
        layers.push(binder.dense(&format!("{scope}/pi/out"), prev_dim, head_dim)?);

        let log_std = if kwargs.action_space.is_discrete() {
            None
        } else {
            Some(binder.variable(&format!("{scope}/pi/log_std"), &[head_dim], |_| ArrayD::zeros(vec![head_dim]))?)
        };

        debug!(
            scope,
            class_id,
            reuse,
            variables = binder.trainable.len(),
            "built MLP policy"
        );

        Ok(Self {
            class_id: class_id.to_string(),
            kwargs,
            config,
            scope: scope.to_string(),
            layers,
            log_std,
            trainable: binder.trainable,
        })
    }

    /// Network configuration
    #[must_use]
    pub fn config(&self) -> &MlpConfig {
        &self.config
    }

    fn forward(&self, session: &Session, obs: ArrayView2<f32>) -> Result<Forward> {
        let obs_dim = self.kwargs.observation_space.flat_dim();
        if obs.ncols() != obs_dim {
            return Err(RLError::DimensionMismatch {
                expected: obs_dim,
                actual: obs.ncols(),
            });
        }

        let mut activations = Vec::with_capacity(self.layers.len());
        let mut hidden = obs.to_owned();
        let (output, hidden_layers) = self
            .layers
            .split_last()
            .ok_or_else(|| RLError::Computation("policy has no layers".to_string()))?;

        for layer in hidden_layers {
            let mut next = hidden.dot(&matrix(session, layer.weight)?) + &vector(session, layer.bias)?;
            self.config.activation.apply(&mut next);
            activations.push(hidden);
            hidden = next;
        }
        let head = hidden.dot(&matrix(session, output.weight)?) + &vector(session, output.bias)?;
        activations.push(hidden);

        Ok(Forward { activations, head })
    }

    fn make_distribution(&self, session: &Session, head: Array2<f32>) -> Result<ActionDistribution> {
        match self.log_std {
            None => Ok(ActionDistribution::Categorical { logits: head }),
            Some(log_std) => Ok(ActionDistribution::DiagGaussian {
                mean: head,
                log_std: vector(session, log_std)?.to_owned(),
            }),
        }
    }
}

impl Policy for MlpPolicy {
    fn class_id(&self) -> &str {
        &self.class_id
    }

    fn kwargs(&self) -> &PolicyKwargs {
        &self.kwargs
    }

    fn scope(&self) -> &str {
        &self.scope
    }

    fn trainable_variables(&self) -> &[VarHandle] {
        &self.trainable
    }

    fn distribution(&self, session: &Session, obs: ArrayView2<f32>) -> Result<ActionDistribution> {
        let forward = self.forward(session, obs)?;
        self.make_distribution(session, forward.head)
    }

    fn nll_and_grads(
        &self,
        session: &Session,
        obs: ArrayView2<f32>,
        acts: ArrayView2<f32>,
    ) -> Result<(f32, Vec<ArrayD<f32>>)> {
        let Forward { activations, head } = self.forward(session, obs)?;
        let dist = self.make_distribution(session, head)?;
        let (loss, dist_grads) = dist.mean_neglogp_grad(acts)?;

        // Backpropagate from the head; activations[l] is the input of layer l.
        let mut layer_grads = Vec::with_capacity(self.layers.len());
        let mut delta = dist_grads.head;
        for (l, layer) in self.layers.iter().enumerate().rev() {
            let input = &activations[l];
            let d_weight = input.t().dot(&delta);
            let d_bias = delta.sum_axis(Axis(0));
            if l > 0 {
                let upstream = delta.dot(&matrix(session, layer.weight)?.t());
                delta = upstream * &self.config.activation.derivative(input);
            }
            layer_grads.push((d_weight, d_bias));
        }

        let mut grads = Vec::with_capacity(self.trainable.len());
        for (d_weight, d_bias) in layer_grads.into_iter().rev() {
            grads.push(d_weight.into_dyn());
            grads.push(d_bias.into_dyn());
        }
        if let Some(d_log_std) = dist_grads.log_std {
            grads.push(d_log_std.into_dyn());
        }
        Ok((loss, grads))
    }
}

/// Creates or looks up variables for one network build
struct Binder<'a> {
    session: &'a mut Session,
    reuse: bool,
    rng: &'a mut dyn RngCore,
    trainable: Vec<VarHandle>,
}

impl Binder<'_> {
    fn dense(&mut self, prefix: &str, in_dim: usize, out_dim: usize) -> Result<Dense> {
        let weight = self.variable(&format!("{prefix}/w"), &[in_dim, out_dim], |rng| {
            glorot_uniform(in_dim, out_dim, rng)
        })?;
        let bias = self.variable(&format!("{prefix}/b"), &[out_dim], |_| ArrayD::zeros(vec![out_dim]))?;
        Ok(Dense { weight, bias })
    }

    fn variable(
        &mut self,
        name: &str,
        shape: &[usize],
        init: impl FnOnce(&mut dyn RngCore) -> ArrayD<f32>,
    ) -> Result<VarHandle> {
        let handle = if self.reuse {
            let handle = self.session.find_variable(name).ok_or_else(|| {
                RLError::Configuration(format!("reuse requested but variable {name} does not exist"))
            })?;
            let existing = self.session.value(handle)?.shape();
            if existing != shape {
                return Err(RLError::ShapeMismatch {
                    expected: shape.to_vec(),
                    actual: existing.to_vec(),
                });
            }
            handle
        } else {
            let value = init(&mut *self.rng);
            self.session.create_variable(name, value, true)?
        };
        self.trainable.push(handle);
        Ok(handle)
    }
}

/// Xavier/Glorot uniform initialization
#[allow(clippy::cast_precision_loss)]
fn glorot_uniform(in_dim: usize, out_dim: usize, rng: &mut dyn RngCore) -> ArrayD<f32> {
    let limit = (6.0 / (in_dim + out_dim) as f32).sqrt();
    Array2::from_shape_simple_fn((in_dim, out_dim), || rng.gen_range(-limit..limit)).into_dyn()
}

fn matrix(session: &Session, handle: VarHandle) -> Result<ArrayView2<'_, f32>> {
    session
        .value(handle)?
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| RLError::Computation(e.to_string()))
}

fn vector(session: &Session, handle: VarHandle) -> Result<ArrayView1<'_, f32>> {
    session
        .value(handle)?
        .view()
        .into_dimensionality::<Ix1>()
        .map_err(|e| RLError::Computation(e.to_string()))
}
