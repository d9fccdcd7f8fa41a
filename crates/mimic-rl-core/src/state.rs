//! State representations

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Trait for internal environment states
pub trait State: Clone + Debug + Send + Sync {
    /// Get a feature representation of the state
    fn features(&self) -> Vec<f64>;

    /// Check if this is a terminal state
    fn is_terminal(&self) -> bool {
        false
    }
}

/// Terminal state indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminal {
    /// Not a terminal state
    No,
    /// Terminal state (episode ends)
    Yes,
    /// Truncated (time limit reached)
    Truncated,
}

impl Terminal {
    /// Check if the state is terminal (either Yes or Truncated)
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::No)
    }
}

/// A simple vector state implementation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorState {
    /// The state vector
    pub data: Vec<f64>,
    /// Terminal status
    pub terminal: Terminal,
}

impl State for VectorState {
    fn features(&self) -> Vec<f64> {
        self.data.clone()
    }

    fn is_terminal(&self) -> bool {
        self.terminal.is_terminal()
    }
}
