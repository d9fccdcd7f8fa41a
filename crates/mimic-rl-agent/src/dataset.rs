//! Mini-batch access to expert demonstrations

use ndarray::{Array2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

use mimic_rl_core::{RLError, Result, Transitions};

/// Observation/action pairs drawn in shuffled mini-batches
#[derive(Debug, Clone)]
pub struct ExpertDataset {
    obs: Array2<f32>,
    acts: Array2<f32>,
}

/// One mini-batch of aligned rows
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Dataset rows this batch was drawn from
    pub indices: Vec<usize>,
    /// Observations, `batch_size × obs_dim`
    pub obs: Array2<f32>,
    /// Expert actions, `batch_size × act_dim`
    pub acts: Array2<f32>,
}

impl ExpertDataset {
    /// Keep the observations and actions of `transitions`
    #[must_use]
    pub fn new(transitions: &Transitions) -> Self {
        Self {
            obs: transitions.obs().clone(),
            acts: transitions.acts().clone(),
        }
    }

    /// Number of (observation, action) pairs
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.obs.nrows()
    }

    /// Width of an observation row
    #[must_use]
    pub fn obs_dim(&self) -> usize {
        self.obs.ncols()
    }

    /// Width of an action row
    #[must_use]
    pub fn act_dim(&self) -> usize {
        self.acts.ncols()
    }

    /// Full batches in one pass; the trailing partial batch is dropped
    #[must_use]
    pub fn batches_per_epoch(&self, batch_size: usize) -> usize {
        self.n_samples().checked_div(batch_size).unwrap_or(0)
    }

    /// One pass over a fresh random permutation of the data
    pub fn iterate_once<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Result<Batches<'_>> {
        if batch_size == 0 {
            return Err(RLError::Configuration("batch size must be positive".to_string()));
        }
        let mut order: Vec<usize> = (0..self.n_samples()).collect();
        order.shuffle(rng);
        Ok(Batches {
            dataset: self,
            order,
            batch_size,
            cursor: 0,
        })
    }
}

/// Lazy iterator over the batches of one pass
#[derive(Debug)]
pub struct Batches<'a> {
    dataset: &'a ExpertDataset,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let end = self.cursor + self.batch_size;
        let indices = self.order.get(self.cursor..end)?.to_vec();
        self.cursor = end;
        Some(Batch {
            obs: self.dataset.obs.select(Axis(0), &indices),
            acts: self.dataset.acts.select(Axis(0), &indices),
            indices,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.order.len().saturating_sub(self.cursor) / self.batch_size;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Batches<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[allow(clippy::cast_precision_loss)]
    fn dataset(n: usize) -> ExpertDataset {
        let obs = Array2::from_shape_fn((n, 2), |(i, j)| (i * 10 + j) as f32);
        let acts = Array2::from_shape_fn((n, 1), |(i, _)| (i % 2) as f32);
        let transitions =
            Transitions::new(obs.clone(), acts, obs, Array1::zeros(n), vec![false; n]).unwrap();
        ExpertDataset::new(&transitions)
    }

    #[test]
    fn test_rows_stay_aligned() {
        let data = dataset(10);
        let mut rng = StdRng::seed_from_u64(4);
        for batch in data.iterate_once(3, &mut rng).unwrap() {
            for (k, &i) in batch.indices.iter().enumerate() {
                assert_eq!(batch.obs[[k, 0]], (i * 10) as f32);
                assert_eq!(batch.acts[[k, 0]], (i % 2) as f32);
            }
        }
    }

    #[test]
    fn test_partial_batch_dropped() {
        let data = dataset(10);
        let mut rng = StdRng::seed_from_u64(4);
        let batches = data.iterate_once(4, &mut rng).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches.count(), 2);
        assert_eq!(data.batches_per_epoch(4), 2);
        assert_eq!(data.iterate_once(11, &mut rng).unwrap().count(), 0);
    }

    #[test]
    fn test_zero_batch_size() {
        let data = dataset(3);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(data.iterate_once(0, &mut rng), Err(RLError::Configuration(_))));
        assert_eq!(data.batches_per_epoch(0), 0);
    }

    #[test]
    fn test_passes_reshuffle() {
        let data = dataset(64);
        let mut rng = StdRng::seed_from_u64(11);
        let first: Vec<usize> = data.iterate_once(64, &mut rng).unwrap().flat_map(|b| b.indices).collect();
        let second: Vec<usize> = data.iterate_once(64, &mut rng).unwrap().flat_map(|b| b.indices).collect();
        assert_ne!(first, second);

        let (mut a, mut b) = (first, second);
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn prop_one_pass_covers_distinct_rows(n in 0usize..80, batch_size in 1usize..20, seed: u64) {
            let data = dataset(n);
            let mut rng = StdRng::seed_from_u64(seed);
            let batches: Vec<Batch> = data.iterate_once(batch_size, &mut rng).unwrap().collect();
            prop_assert_eq!(batches.len(), n / batch_size);

            let mut seen = std::collections::HashSet::new();
            for batch in &batches {
                prop_assert_eq!(batch.indices.len(), batch_size);
                prop_assert_eq!(batch.obs.nrows(), batch_size);
                prop_assert_eq!(batch.acts.nrows(), batch_size);
                for &i in &batch.indices {
                    prop_assert!(i < n);
                    prop_assert!(seen.insert(i));
                }
            }
        }
    }
}
