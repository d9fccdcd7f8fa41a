//! Error types for the RL core library

use thiserror::Error;

/// Core error type for RL operations
#[derive(Error, Debug)]
pub enum RLError {
    /// Environment-related errors
    #[error("Environment error: {0}")]
    Environment(String),

    /// Agent-related errors
    #[error("Agent error: {0}")]
    Agent(String),

    /// Policy-related errors
    #[error("Policy error: {0}")]
    Policy(String),

    /// Invalid action
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Mutually exclusive or missing required arguments
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Array/variable count or shape mismatch
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// An operation needed an execution session and none was supplied
    #[error("No active session: supply a session to run this operation")]
    NoActiveSession,

    /// A variable handle was used with a session that does not own it
    #[error("Wrong session: handle belongs to session {actual}, not {expected}")]
    WrongContext { expected: u64, actual: u64 },

    /// Training was requested before any expert dataset was set
    #[error("No expert dataset: call set_expert_dataset before training")]
    NoDataset,

    /// A saved policy record does not fit the policy it describes
    #[error("Corrupt policy record: policy has {expected} parameters, record has {actual}")]
    RecordCorrupt { expected: usize, actual: usize },

    /// Policy identifier not present in the registry
    #[error("Unknown policy class: {0}")]
    UnknownPolicy(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RLError {
    /// Count mismatch reported as one-element shapes.
    #[must_use]
    pub fn count_mismatch(expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            expected: vec![expected],
            actual: vec![actual],
        }
    }
}

/// Result type alias for RL operations
pub type Result<T> = std::result::Result<T, RLError>;
