//! Action distributions produced by policy heads

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rand_distr::StandardNormal;
use std::f32::consts::PI;

use mimic_rl_core::{RLError, Result};

/// Batch of per-row action distributions
#[derive(Debug, Clone, PartialEq)]
pub enum ActionDistribution {
    /// Discrete actions, one row of unnormalized log-probabilities per sample
    Categorical {
        /// Logits, `batch × n_actions`
        logits: Array2<f32>,
    },
    /// Continuous actions with independent Gaussian components
    DiagGaussian {
        /// Means, `batch × act_dim`
        mean: Array2<f32>,
        /// Log standard deviations shared by every row
        log_std: Array1<f32>,
    },
}

/// Gradient of the mean negative log-likelihood w.r.t. distribution parameters
#[derive(Debug, Clone)]
pub struct DistributionGrads {
    /// Gradient w.r.t. the logits or means, same shape as those
    pub head: Array2<f32>,
    /// Gradient w.r.t. `log_std` (Gaussian only)
    pub log_std: Option<Array1<f32>>,
}

impl ActionDistribution {
    /// Number of rows
    #[must_use]
    pub fn batch_size(&self) -> usize {
        match self {
            Self::Categorical { logits } => logits.nrows(),
            Self::DiagGaussian { mean, .. } => mean.nrows(),
        }
    }

    /// Negative log-likelihood of each action row
    pub fn neglogp(&self, actions: ArrayView2<f32>) -> Result<Array1<f32>> {
        self.check_actions(actions)?;
        match self {
            Self::Categorical { logits } => {
                let indices = action_indices(actions, logits.ncols())?;
                Ok(logits
                    .outer_iter()
                    .zip(indices)
                    .map(|(row, a)| log_sum_exp(row.iter().copied()) - row[a])
                    .collect())
            }
            Self::DiagGaussian { mean, log_std } => {
                let std = log_std.mapv(f32::exp);
                #[allow(clippy::cast_precision_loss)]
                let constant = 0.5 * (2.0 * PI).ln() * log_std.len() as f32 + log_std.sum();
                let z = (&actions - mean) / &std;
                Ok(z.map_axis(Axis(1), |row| 0.5 * row.mapv(|v| v * v).sum() + constant))
            }
        }
    }

    /// Log-likelihood of each action row
    pub fn log_prob(&self, actions: ArrayView2<f32>) -> Result<Array1<f32>> {
        self.neglogp(actions).map(|nll| -nll)
    }

    /// Mean negative log-likelihood over the batch and its gradient
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_neglogp_grad(&self, actions: ArrayView2<f32>) -> Result<(f32, DistributionGrads)> {
        let nll = self.neglogp(actions)?;
        let loss = nll.mean().unwrap_or(0.0);
        let scale = 1.0 / self.batch_size() as f32;

        let grads = match self {
            Self::Categorical { logits } => {
                let indices = action_indices(actions, logits.ncols())?;
                let mut head = softmax(logits);
                for (mut row, a) in head.outer_iter_mut().zip(indices) {
                    row[a] -= 1.0;
                }
                head *= scale;
                DistributionGrads { head, log_std: None }
            }
            Self::DiagGaussian { mean, log_std } => {
                let std = log_std.mapv(f32::exp);
                let z = (&actions - mean) / &std;
                let head = -(&z / &std) * scale;
                let log_std_grad = z.mapv(|v| 1.0 - v * v).sum_axis(Axis(0)) * scale;
                DistributionGrads {
                    head,
                    log_std: Some(log_std_grad),
                }
            }
        };
        Ok((loss, grads))
    }

    /// Entropy of each row
    #[must_use]
    pub fn entropy(&self) -> Array1<f32> {
        match self {
            Self::Categorical { logits } => softmax(logits).map_axis(Axis(1), |p| {
                -p.iter().filter(|&&q| q > 0.0).map(|&q| q * q.ln()).sum::<f32>()
            }),
            Self::DiagGaussian { mean, log_std } => {
                let per_row = log_std.mapv(|s| s + 0.5 * (2.0 * PI * std::f32::consts::E).ln()).sum();
                Array1::from_elem(mean.nrows(), per_row)
            }
        }
    }

    /// Most likely action of each row
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn mode(&self) -> Array2<f32> {
        match self {
            Self::Categorical { logits } => {
                let best = logits.map_axis(Axis(1), |row| argmax(row.iter().copied()) as f32);
                best.insert_axis(Axis(1))
            }
            Self::DiagGaussian { mean, .. } => mean.clone(),
        }
    }

    /// Draw one action per row
    #[allow(clippy::cast_precision_loss)]
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Array2<f32>> {
        match self {
            Self::Categorical { logits } => {
                let probs = softmax(logits);
                let mut out = Array2::zeros((probs.nrows(), 1));
                for (row, slot) in probs.outer_iter().zip(out.iter_mut()) {
                    let index = WeightedIndex::new(row.iter().copied())
                        .map_err(|e| RLError::Computation(format!("cannot sample action: {e}")))?;
                    *slot = index.sample(rng) as f32;
                }
                Ok(out)
            }
            Self::DiagGaussian { mean, log_std } => {
                let std = log_std.mapv(f32::exp);
                let noise =
                    Array2::from_shape_simple_fn(mean.raw_dim(), || -> f32 { StandardNormal.sample(&mut *rng) });
                Ok(mean + &(noise * &std))
            }
        }
    }

    fn check_actions(&self, actions: ArrayView2<f32>) -> Result<()> {
        if actions.nrows() != self.batch_size() {
            return Err(RLError::DimensionMismatch {
                expected: self.batch_size(),
                actual: actions.nrows(),
            });
        }
        let width = match self {
            Self::Categorical { .. } => 1,
            Self::DiagGaussian { mean, .. } => mean.ncols(),
        };
        if actions.ncols() != width {
            return Err(RLError::DimensionMismatch {
                expected: width,
                actual: actions.ncols(),
            });
        }
        Ok(())
    }
}

/// Discrete actions as category indices; each must be an integer in `0..n`
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub(crate) fn action_indices(actions: ArrayView2<f32>, n: usize) -> Result<Vec<usize>> {
    actions
        .column(0)
        .iter()
        .map(|&a| {
            if a >= 0.0 && a.fract() == 0.0 && (a as usize) < n {
                Ok(a as usize)
            } else {
                Err(RLError::InvalidAction(format!("{a} is not an index below {n}")))
            }
        })
        .collect()
}

fn log_sum_exp(values: impl Iterator<Item = f32> + Clone) -> f32 {
    let max = values.clone().fold(f32::NEG_INFINITY, f32::max);
    max + values.map(|v| (v - max).exp()).sum::<f32>().ln()
}

fn softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut probs = logits.clone();
    for mut row in probs.outer_iter_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let total = row.sum();
        row /= total;
    }
    probs
}

fn argmax(values: impl Iterator<Item = f32>) -> usize {
    values
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, v)| if v > best.1 { (i, v) } else { best })
        .0
}
