//! Registry of policy variants
//!
//! Saved policies refer to their variant by a stable identifier; the registry
//! turns that identifier back into a constructor.

use lazy_static::lazy_static;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use mimic_rl_core::{RLError, Result};

use crate::policy::{MlpConfig, MlpPolicy, Policy, PolicyKwargs};
use crate::session::Session;

/// Default policy identifier
pub const DEFAULT_POLICY: &str = "feed_forward_32";

/// Builds a policy under `scope`, binding to existing variables when `reuse`
pub type PolicyFactory =
    fn(&mut Session, &str, &PolicyKwargs, bool, &mut dyn RngCore) -> Result<Box<dyn Policy>>;

/// Maps policy identifiers to factories
#[derive(Clone)]
pub struct PolicyRegistry {
    factories: HashMap<String, PolicyFactory>,
}

impl PolicyRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry seeded with the built-in variants
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("feed_forward_32", feed_forward_32);
        registry.register("feed_forward_64", feed_forward_64);
        registry.register("linear", linear);
        registry
    }

    /// Add or replace a variant
    pub fn register(&mut self, id: impl Into<String>, factory: PolicyFactory) {
        self.factories.insert(id.into(), factory);
    }

    /// Build a policy by identifier
    pub fn make(
        &self,
        id: &str,
        session: &mut Session,
        scope: &str,
        kwargs: &PolicyKwargs,
        reuse: bool,
        rng: &mut dyn RngCore,
    ) -> Result<Box<dyn Policy>> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| RLError::UnknownPolicy(id.to_string()))?;
        factory(session, scope, kwargs, reuse, rng)
    }

    /// Whether `id` is registered
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered identifiers, sorted
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn mlp(
    id: &str,
    config: MlpConfig,
    session: &mut Session,
    scope: &str,
    kwargs: &PolicyKwargs,
    reuse: bool,
    rng: &mut dyn RngCore,
) -> Result<Box<dyn Policy>> {
    let policy = MlpPolicy::build(session, scope, id, kwargs.clone(), config, reuse, rng)?;
    Ok(Box::new(policy))
}

fn feed_forward_32(
    session: &mut Session,
    scope: &str,
    kwargs: &PolicyKwargs,
    reuse: bool,
    rng: &mut dyn RngCore,
) -> Result<Box<dyn Policy>> {
    mlp("feed_forward_32", MlpConfig::feed_forward(32, 2), session, scope, kwargs, reuse, rng)
}

fn feed_forward_64(
    session: &mut Session,
    scope: &str,
    kwargs: &PolicyKwargs,
    reuse: bool,
    rng: &mut dyn RngCore,
) -> Result<Box<dyn Policy>> {
    mlp("feed_forward_64", MlpConfig::feed_forward(64, 2), session, scope, kwargs, reuse, rng)
}

fn linear(
    session: &mut Session,
    scope: &str,
    kwargs: &PolicyKwargs,
    reuse: bool,
    rng: &mut dyn RngCore,
) -> Result<Box<dyn Policy>> {
    mlp("linear", MlpConfig::linear(), session, scope, kwargs, reuse, rng)
}

lazy_static! {
    static ref REGISTRY: RwLock<PolicyRegistry> = RwLock::new(PolicyRegistry::with_builtins());
}

/// Register a policy variant globally
pub fn register_policy(id: impl Into<String>, factory: PolicyFactory) {
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .register(id, factory);
}

/// Build a policy from the global registry
pub fn make_policy(
    id: &str,
    session: &mut Session,
    scope: &str,
    kwargs: &PolicyKwargs,
    reuse: bool,
    rng: &mut dyn RngCore,
) -> Result<Box<dyn Policy>> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .make(id, session, scope, kwargs, reuse, rng)
}

/// List globally registered policy identifiers
#[must_use]
pub fn list_policies() -> Vec<String> {
    REGISTRY.read().unwrap_or_else(PoisonError::into_inner).list()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_rl_core::SpaceSpec;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn kwargs() -> PolicyKwargs {
        PolicyKwargs::new(
            SpaceSpec::Box {
                low: vec![-1.0; 4],
                high: vec![1.0; 4],
                shape: vec![4],
            },
            SpaceSpec::Discrete { n: 2 },
        )
    }

    #[test]
    fn test_builtins() {
        let registry = PolicyRegistry::default();
        assert_eq!(registry.list(), vec!["feed_forward_32", "feed_forward_64", "linear"]);

        let mut session = Session::new();
        let mut rng = StdRng::seed_from_u64(0);
        let policy = registry
            .make("linear", &mut session, "lin", &kwargs(), false, &mut rng)
            .unwrap();
        assert_eq!(policy.class_id(), "linear");
        assert_eq!(policy.trainable_variables().len(), 2);

        let policy = registry
            .make(DEFAULT_POLICY, &mut session, "ff", &kwargs(), false, &mut rng)
            .unwrap();
        assert_eq!(policy.class_id(), DEFAULT_POLICY);
        assert_eq!(policy.trainable_variables().len(), 6);
    }

    #[test]
    fn test_unknown_policy() {
        let mut session = Session::new();
        let mut rng = StdRng::seed_from_u64(0);
        let result = make_policy("transformer", &mut session, "x", &kwargs(), false, &mut rng);
        assert!(matches!(result, Err(RLError::UnknownPolicy(ref id)) if id == "transformer"));
    }

    #[test]
    fn test_register_policy() {
        fn wide(
            session: &mut Session,
            scope: &str,
            kwargs: &PolicyKwargs,
            reuse: bool,
            rng: &mut dyn RngCore,
        ) -> Result<Box<dyn Policy>> {
            mlp("registry_test_wide", MlpConfig::feed_forward(128, 1), session, scope, kwargs, reuse, rng)
        }

        register_policy("registry_test_wide", wide);
        assert!(list_policies().contains(&"registry_test_wide".to_string()));

        let mut session = Session::new();
        let mut rng = StdRng::seed_from_u64(0);
        let policy = make_policy("registry_test_wide", &mut session, "w", &kwargs(), false, &mut rng).unwrap();
        assert_eq!(policy.trainable_variables().len(), 4);
    }
}
