//! Saving trained policies and rebuilding them later

use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use mimic_rl_core::{Environment, RLError, Result};

use crate::bc::BcTrainer;
use crate::params::VarAssign;
use crate::policy::{Policy, PolicyKwargs};
use crate::registry::make_policy;
use crate::session::Session;

/// Scope under which reconstructed policies are built
pub const RECONSTRUCTED_SCOPE: &str = "reconstructed_policy";

/// On-disk form of a policy: its variant, construction arguments and weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPolicyRecord {
    /// Registry identifier
    pub policy_class: String,
    /// Construction arguments
    pub kwargs: PolicyKwargs,
    /// Trainable variable values, in declaration order
    pub params: Vec<ArrayD<f32>>,
}

impl SavedPolicyRecord {
    /// Snapshot `policy`'s current weights
    ///
    /// Fails if any weight is NaN or infinite, since JSON cannot carry those.
    pub fn capture(policy: &dyn Policy, session: &Session) -> Result<Self> {
        let handles = policy.trainable_variables();
        let params = session.read(handles)?;
        for (&handle, value) in handles.iter().zip(&params) {
            if let Some(bad) = value.iter().find(|v| !v.is_finite()) {
                return Err(RLError::Computation(format!(
                    "variable '{}' holds non-finite value {bad}",
                    session.name(handle)?
                )));
            }
        }
        Ok(Self {
            policy_class: policy.class_id().to_string(),
            kwargs: policy.kwargs().clone(),
            params,
        })
    }

    /// Write as JSON, creating parent directories and replacing any existing file
    pub async fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Read a record written by [`SavedPolicyRecord::write`]
    pub async fn read(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Build a fresh policy in `session` and load the saved weights into it
    pub fn restore(self, session: &mut Session) -> Result<Box<dyn Policy>> {
        let scope = session.unique_scope(RECONSTRUCTED_SCOPE);
        // Initial values are overwritten below.
        let mut rng = StdRng::seed_from_u64(0);
        let policy = make_policy(&self.policy_class, session, &scope, &self.kwargs, false, &mut rng)?;

        let expected = policy.trainable_variables().len();
        if self.params.len() != expected {
            return Err(RLError::RecordCorrupt {
                expected,
                actual: self.params.len(),
            });
        }
        VarAssign::new(self.params).scope(scope.as_str()).session(session).apply()?;

        info!(policy = %self.policy_class, scope = %scope, variables = expected, "policy reconstructed");
        Ok(policy)
    }
}

impl<E: Environment> BcTrainer<E> {
    /// Save the current policy's class, kwargs and weights to `path`
    pub async fn save_policy(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let record = SavedPolicyRecord::capture(self.policy(), self.session())?;
        record.write(path).await?;
        info!(path = %path.display(), variables = record.params.len(), "policy saved");
        Ok(())
    }

    /// Rebuild a policy saved with [`BcTrainer::save_policy`] inside `session`
    pub async fn reconstruct_policy(path: impl AsRef<Path>, session: &mut Session) -> Result<Box<dyn Policy>> {
        reconstruct_policy(path, session).await
    }
}

/// Rebuild a saved policy inside `session` under a fresh
/// `reconstructed_policy` scope
pub async fn reconstruct_policy(path: impl AsRef<Path>, session: &mut Session) -> Result<Box<dyn Policy>> {
    SavedPolicyRecord::read(path).await?.restore(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bc::BcConfig;
    use mimic_rl_core::{EnvironmentConfig, Transitions};
    use mimic_rl_env::CartPoleEnv;
    use ndarray::{array, Array1, Array2};

    fn trained_trainer() -> BcTrainer<CartPoleEnv> {
        let obs = array![
            [0.1_f32, 0.0, 0.05, 0.1],
            [0.0, -0.1, -0.05, -0.2],
            [-0.1, 0.2, 0.02, 0.0],
            [0.2, 0.0, -0.01, -0.1]
        ];
        let acts = array![[1.0_f32], [0.0], [1.0], [0.0]];
        let demos = Transitions::new(obs.clone(), acts, obs, Array1::zeros(4), vec![false; 4]).unwrap();
        let env = CartPoleEnv::new(EnvironmentConfig {
            seed: Some(1),
            ..EnvironmentConfig::default()
        })
        .unwrap();
        let config = BcConfig {
            batch_size: 2,
            seed: Some(21),
            ..BcConfig::default()
        };
        let mut trainer = BcTrainer::new(env, Session::new(), Some(demos), config).unwrap();
        trainer.train(3, None).unwrap();
        trainer
    }

    #[tokio::test]
    async fn test_save_and_reconstruct_round_trip() {
        let trainer = trained_trainer();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/policy.json");
        trainer.save_policy(&path).await.unwrap();

        let mut session = Session::new();
        let restored = BcTrainer::<CartPoleEnv>::reconstruct_policy(&path, &mut session)
            .await
            .unwrap();
        assert_eq!(restored.class_id(), trainer.policy_class());
        assert_eq!(restored.kwargs(), trainer.policy_kwargs());
        assert_eq!(restored.scope(), "reconstructed_policy");
        assert_eq!(
            session.read(restored.trainable_variables()).unwrap(),
            trainer.session().read(trainer.policy().trainable_variables()).unwrap()
        );

        let obs: Array2<f32> = array![[0.05, 0.0, -0.03, 0.1]];
        assert_eq!(
            restored.distribution(&session, obs.view()).unwrap(),
            trainer.policy().distribution(trainer.session(), obs.view()).unwrap()
        );

        let again = reconstruct_policy(&path, &mut session).await.unwrap();
        assert_eq!(again.scope(), "reconstructed_policy_1");
    }

    #[tokio::test]
    async fn test_save_rejects_non_finite_weights() {
        let mut trainer = trained_trainer();
        let bias = trainer.policy().trainable_variables()[1];
        trainer.session_mut().value_mut(bias).unwrap()[[0]] = f32::NAN;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let err = trainer.save_policy(&path).await.unwrap_err();
        assert!(matches!(err, RLError::Computation(ref msg) if msg.contains("pi/fc0/b")));
        assert!(!path.exists());

        trainer.session_mut().value_mut(bias).unwrap()[[0]] = f32::INFINITY;
        assert!(SavedPolicyRecord::capture(trainer.policy(), trainer.session()).is_err());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let trainer = trained_trainer();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        tokio::fs::write(&path, b"not json at all").await.unwrap();
        trainer.save_policy(&path).await.unwrap();
        let record = SavedPolicyRecord::read(&path).await.unwrap();
        assert_eq!(record.policy_class, "feed_forward_32");
        assert_eq!(record.params.len(), 6);
    }

    #[tokio::test]
    async fn test_corrupt_record() {
        let trainer = trained_trainer();
        let mut record = SavedPolicyRecord::capture(trainer.policy(), trainer.session()).unwrap();
        record.params.pop();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.json");
        record.write(&path).await.unwrap();

        let mut session = Session::new();
        let result = reconstruct_policy(&path, &mut session).await;
        assert!(matches!(result, Err(RLError::RecordCorrupt { expected: 6, actual: 5 })));
    }

    #[tokio::test]
    async fn test_unknown_policy_class() {
        let trainer = trained_trainer();
        let mut record = SavedPolicyRecord::capture(trainer.policy(), trainer.session()).unwrap();
        record.policy_class = "no_such_policy".to_string();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unknown.json");
        record.write(&path).await.unwrap();

        let mut session = Session::new();
        let result = reconstruct_policy(&path, &mut session).await;
        assert!(matches!(result, Err(RLError::UnknownPolicy(ref id)) if id == "no_such_policy"));
    }

    #[tokio::test]
    async fn test_missing_file_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new();
        let missing = reconstruct_policy(dir.path().join("absent.json"), &mut session).await;
        assert!(matches!(missing, Err(RLError::Io(_))));

        let path = dir.path().join("garbage.json");
        tokio::fs::write(&path, b"{\"policy_class\": 3}").await.unwrap();
        let garbage = reconstruct_policy(&path, &mut session).await;
        assert!(matches!(garbage, Err(RLError::Serialization(_))));
    }
}
