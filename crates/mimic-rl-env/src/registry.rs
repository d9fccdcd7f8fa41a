//! Environment registry for creating environments by name

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use mimic_rl_core::{DiscreteAction, Environment, EnvironmentConfig, RLError, VectorObservation, VectorState};
use tracing::debug;

use crate::classic::{CartPoleEnv, MountainCarEnv};

/// Boxed classic-control environment, as produced by the registry
pub type ClassicEnv = Box<
    dyn Environment<Observation = VectorObservation, Action = DiscreteAction, State = VectorState>,
>;

type EnvConstructor = Box<dyn Fn(EnvironmentConfig) -> mimic_rl_core::Result<ClassicEnv> + Send + Sync>;

lazy_static::lazy_static! {
    static ref REGISTRY: RwLock<EnvRegistry> = RwLock::new(EnvRegistry::with_builtins());
}

/// Registry of environment constructors keyed by name
pub struct EnvRegistry {
    /// Registered environments
    envs: HashMap<String, EnvConstructor>,
}

impl EnvRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            envs: HashMap::new(),
        }
    }

    /// Create a registry holding `cartpole` and `mountain_car`
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("cartpole", |config| Ok(Box::new(CartPoleEnv::new(config)?) as ClassicEnv));
        registry.register("mountain_car", |config| {
            Ok(Box::new(MountainCarEnv::new(config)?) as ClassicEnv)
        });
        registry
    }

    /// Register an environment
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(EnvironmentConfig) -> mimic_rl_core::Result<ClassicEnv> + Send + Sync + 'static,
    {
        self.envs.insert(name.into(), Box::new(constructor));
    }

    /// Create an environment by name
    pub fn make(&self, name: &str, config: EnvironmentConfig) -> mimic_rl_core::Result<ClassicEnv> {
        debug!(env = name, seed = ?config.seed, "creating environment");
        self.envs
            .get(name)
            .ok_or_else(|| RLError::Environment(format!("Unknown environment: {name}")))
            .and_then(|constructor| constructor(config))
    }

    /// List registered environments, sorted by name
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.envs.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for EnvRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Register an environment globally
pub fn register_env<F>(name: impl Into<String>, constructor: F)
where
    F: Fn(EnvironmentConfig) -> mimic_rl_core::Result<ClassicEnv> + Send + Sync + 'static,
{
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register(name, constructor);
}

/// Create an environment by name
pub fn make_env(name: &str, config: EnvironmentConfig) -> mimic_rl_core::Result<ClassicEnv> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .make(name, config)
}

/// List all registered environments
#[must_use]
pub fn list_envs() -> Vec<String> {
    REGISTRY.read().unwrap_or_else(PoisonError::into_inner).list()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrappers::TimeLimit;

    #[test]
    fn test_builtins_are_listed() {
        let names = list_envs();
        assert!(names.contains(&"cartpole".to_string()));
        assert!(names.contains(&"mountain_car".to_string()));
    }

    #[tokio::test]
    async fn test_make_env() {
        let mut env = make_env("cartpole", EnvironmentConfig::default()).unwrap();
        let (obs, _) = env.reset().await.unwrap();
        assert_eq!(obs.data.len(), 4);
        assert!(matches!(
            make_env("pong", EnvironmentConfig::default()),
            Err(RLError::Environment(_))
        ));
    }

    #[tokio::test]
    async fn test_register_env() {
        register_env("short_cartpole", |config| {
            Ok(Box::new(TimeLimit::new(CartPoleEnv::new(config)?, 5)) as ClassicEnv)
        });
        let mut env = make_env("short_cartpole", EnvironmentConfig::default()).unwrap();
        env.reset().await.unwrap();
        let mut truncated = false;
        for _ in 0..5 {
            let step = env.step(DiscreteAction(0)).await.unwrap();
            truncated = step.truncated;
            if step.is_last() {
                break;
            }
        }
        assert!(truncated);
        assert!(list_envs().contains(&"short_cartpole".to_string()));
    }
}
