//! Gradient-descent optimizers over session variables

use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};

use mimic_rl_core::{RLError, Result};

use crate::session::{Session, VarHandle};

/// Optimizer choice and hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    /// Adam with bias-corrected moment estimates
    Adam {
        /// Step size
        #[serde(default = "default_adam_lr")]
        learning_rate: f32,
        /// Decay of the first moment
        #[serde(default = "default_beta1")]
        beta1: f32,
        /// Decay of the second moment
        #[serde(default = "default_beta2")]
        beta2: f32,
        /// Denominator fuzz
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },
    /// Plain stochastic gradient descent with optional momentum
    Sgd {
        /// Step size
        learning_rate: f32,
        /// Momentum coefficient (0 disables)
        #[serde(default)]
        momentum: f32,
    },
}

fn default_adam_lr() -> f32 {
    1e-3
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_epsilon() -> f32 {
    1e-8
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam {
            learning_rate: default_adam_lr(),
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_epsilon(),
        }
    }
}

impl OptimizerConfig {
    /// Reject non-finite or out-of-range hyperparameters
    pub fn validate(&self) -> Result<()> {
        let ok = match *self {
            Self::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => {
                learning_rate > 0.0
                    && (0.0..1.0).contains(&beta1)
                    && (0.0..1.0).contains(&beta2)
                    && epsilon > 0.0
            }
            Self::Sgd {
                learning_rate,
                momentum,
            } => learning_rate > 0.0 && (0.0..1.0).contains(&momentum),
        };
        if ok {
            Ok(())
        } else {
            Err(RLError::Configuration(format!("invalid optimizer settings: {self:?}")))
        }
    }

    /// Fresh optimizer with empty state
    #[must_use]
    pub fn build(&self) -> Box<dyn Optimizer> {
        match *self {
            Self::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
                state: OptimizerState::default(),
            }),
            Self::Sgd {
                learning_rate,
                momentum,
            } => Box::new(Sgd {
                learning_rate,
                momentum,
                velocity: Vec::new(),
                steps: 0,
            }),
        }
    }
}

/// Applies gradients to session variables
pub trait Optimizer: Send + Sync {
    /// One update of `vars` along `grads` (same order and shapes)
    fn step(&mut self, session: &mut Session, vars: &[VarHandle], grads: &[ArrayD<f32>]) -> Result<()>;

    /// Number of updates applied so far
    fn steps(&self) -> usize;
}

/// Moment estimates kept between steps
#[derive(Debug, Default)]
struct OptimizerState {
    momentum: Vec<ArrayD<f32>>,
    velocity: Vec<ArrayD<f32>>,
    t: usize,
}

/// Adam optimizer
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    state: OptimizerState,
}

impl Optimizer for Adam {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    fn step(&mut self, session: &mut Session, vars: &[VarHandle], grads: &[ArrayD<f32>]) -> Result<()> {
        check_grads(session, vars, grads)?;
        if self.state.t == 0 {
            self.state.momentum = zeros_like(grads);
            self.state.velocity = zeros_like(grads);
        } else if self.state.momentum.len() != grads.len() {
            return Err(RLError::count_mismatch(self.state.momentum.len(), grads.len()));
        }
        self.state.t += 1;

        let (lr, b1, b2, eps) = (self.learning_rate, self.beta1, self.beta2, self.epsilon);
        let t = self.state.t as i32;
        let bias1 = 1.0 - b1.powi(t);
        let bias2 = 1.0 - b2.powi(t);

        for (((&handle, grad), m), v) in vars
            .iter()
            .zip(grads)
            .zip(&mut self.state.momentum)
            .zip(&mut self.state.velocity)
        {
            if m.shape() != grad.shape() {
                return Err(RLError::ShapeMismatch {
                    expected: m.shape().to_vec(),
                    actual: grad.shape().to_vec(),
                });
            }
            let param = session.value_mut(handle)?;
            Zip::from(param)
                .and(m)
                .and(v)
                .and(grad)
                .for_each(|p, m, v, &g| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    let m_hat = *m / bias1;
                    let v_hat = *v / bias2;
                    *p -= lr * m_hat / (v_hat.sqrt() + eps);
                });
        }
        Ok(())
    }

    fn steps(&self) -> usize {
        self.state.t
    }
}

/// Stochastic gradient descent
#[derive(Debug)]
pub struct Sgd {
    learning_rate: f32,
    momentum: f32,
    velocity: Vec<ArrayD<f32>>,
    steps: usize,
}

impl Optimizer for Sgd {
    fn step(&mut self, session: &mut Session, vars: &[VarHandle], grads: &[ArrayD<f32>]) -> Result<()> {
        check_grads(session, vars, grads)?;
        if self.steps == 0 {
            self.velocity = zeros_like(grads);
        } else if self.velocity.len() != grads.len() {
            return Err(RLError::count_mismatch(self.velocity.len(), grads.len()));
        }
        self.steps += 1;

        let (lr, mu) = (self.learning_rate, self.momentum);
        for ((&handle, grad), velocity) in vars.iter().zip(grads).zip(&mut self.velocity) {
            if velocity.shape() != grad.shape() {
                return Err(RLError::ShapeMismatch {
                    expected: velocity.shape().to_vec(),
                    actual: grad.shape().to_vec(),
                });
            }
            let param = session.value_mut(handle)?;
            Zip::from(param).and(velocity).and(grad).for_each(|p, u, &g| {
                *u = mu * *u + g;
                *p -= lr * *u;
            });
        }
        Ok(())
    }

    fn steps(&self) -> usize {
        self.steps
    }
}

fn check_grads(session: &Session, vars: &[VarHandle], grads: &[ArrayD<f32>]) -> Result<()> {
    if vars.len() != grads.len() {
        return Err(RLError::count_mismatch(vars.len(), grads.len()));
    }
    for (&handle, grad) in vars.iter().zip(grads) {
        let value = session.value(handle)?;
        if value.shape() != grad.shape() {
            return Err(RLError::ShapeMismatch {
                expected: value.shape().to_vec(),
                actual: grad.shape().to_vec(),
            });
        }
    }
    Ok(())
}

fn zeros_like(arrays: &[ArrayD<f32>]) -> Vec<ArrayD<f32>> {
    arrays.iter().map(|a| ArrayD::zeros(a.raw_dim())).collect()
}
