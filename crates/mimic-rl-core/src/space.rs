//! Serializable space descriptors
//!
//! Environments expose their spaces as trait objects; policies need a plain
//! description of them that can be stored next to saved weights and used to
//! rebuild the same network later. `SpaceSpec` is that description.

use serde::{Deserialize, Serialize};

/// Plain description of an observation or action space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpaceSpec {
    /// Bounded box of real values
    Box {
        /// Lower bounds (flattened)
        low: Vec<f64>,
        /// Upper bounds (flattened)
        high: Vec<f64>,
        /// Shape of a single element
        shape: Vec<usize>,
    },
    /// `n` discrete choices `0..n`
    Discrete {
        /// Number of choices
        n: usize,
    },
}

impl SpaceSpec {
    /// Number of scalars in one flattened element.
    ///
    /// A discrete value is stored as a single scalar holding its index.
    #[must_use]
    pub fn flat_dim(&self) -> usize {
        match self {
            Self::Box { shape, .. } => shape.iter().product(),
            Self::Discrete { .. } => 1,
        }
    }

    /// Width of a policy head that parameterizes a distribution over this space
    /// (logits for discrete spaces, means for boxes).
    #[must_use]
    pub fn param_dim(&self) -> usize {
        match self {
            Self::Box { shape, .. } => shape.iter().product(),
            Self::Discrete { n } => *n,
        }
    }

    /// Whether this is a discrete space
    #[must_use]
    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::Discrete { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dims() {
        let discrete = SpaceSpec::Discrete { n: 3 };
        assert_eq!(discrete.flat_dim(), 1);
        assert_eq!(discrete.param_dim(), 3);
        assert!(discrete.is_discrete());

        let boxed = SpaceSpec::Box {
            low: vec![-1.0; 6],
            high: vec![1.0; 6],
            shape: vec![2, 3],
        };
        assert_eq!(boxed.flat_dim(), 6);
        assert_eq!(boxed.param_dim(), 6);
        assert!(!boxed.is_discrete());
    }

    #[test]
    fn test_json_tagging() {
        let json = serde_json::to_string(&SpaceSpec::Discrete { n: 2 }).unwrap();
        assert_eq!(json, r#"{"type":"discrete","n":2}"#);
        let back: SpaceSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SpaceSpec::Discrete { n: 2 });
    }
}
