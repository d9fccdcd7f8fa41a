//! Small numeric helpers shared by the trainer and the evaluator

/// Exponentially weighted moving average seeded by its first sample
#[derive(Debug, Clone, Copy)]
pub struct Ewma {
    smoothing: f32,
    value: Option<f32>,
}

impl Ewma {
    /// `smoothing` is the weight kept by the old value on each update
    #[must_use]
    pub fn new(smoothing: f32) -> Self {
        Self {
            smoothing,
            value: None,
        }
    }

    /// Fold in one sample and return the new average
    pub fn update(&mut self, sample: f32) -> f32 {
        let next = match self.value {
            None => sample,
            Some(old) => self.smoothing * old + (1.0 - self.smoothing) * sample,
        };
        self.value = Some(next);
        next
    }

    /// Current average, `None` before the first sample
    #[must_use]
    pub fn value(&self) -> Option<f32> {
        self.value
    }
}

/// Clamp each component of `values` into `[low, high]`
pub fn clip_to_bounds(values: &mut [f64], low: &[f64], high: &[f64]) {
    for ((v, &lo), &hi) in values.iter_mut().zip(low).zip(high) {
        *v = v.max(lo).min(hi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ewma() {
        let mut ewma = Ewma::new(0.9);
        assert_eq!(ewma.value(), None);
        assert_relative_eq!(ewma.update(2.0), 2.0);
        assert_relative_eq!(ewma.update(1.0), 1.9);
        assert_relative_eq!(ewma.value().unwrap(), 1.9);
    }

    #[test]
    fn test_clip_to_bounds() {
        let mut values = [-3.0, 0.5, 9.0];
        clip_to_bounds(&mut values, &[-1.0; 3], &[1.0; 3]);
        assert_eq!(values, [-1.0, 0.5, 1.0]);
    }
}
