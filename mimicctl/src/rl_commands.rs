// Behavioural cloning command implementations for mimicctl

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use mimic_rl_agent::{
    generate_trajectories, list_policies, reconstruct_policy, rollout_stats, BcConfig, BcTrainer,
    EpochProgress, RolloutStats, SampleUntil, Session,
};
use mimic_rl_core::{Environment, EnvironmentConfig, Transitions};
use mimic_rl_env::{collect_expert_episodes, list_envs, make_env};

pub struct TrainOptions {
    pub env: String,
    pub demos: PathBuf,
    pub epochs: usize,
    pub config: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub policy_class: Option<String>,
    pub eval_episodes: usize,
    pub out: PathBuf,
}

fn env_config(seed: Option<u64>) -> EnvironmentConfig {
    EnvironmentConfig {
        seed,
        ..EnvironmentConfig::default()
    }
}

pub async fn collect(env_name: &str, episodes: usize, seed: Option<u64>, out: &Path) -> Result<()> {
    if env_name != "cartpole" {
        bail!("no built-in expert for environment '{env_name}' (available: cartpole)");
    }
    if episodes == 0 {
        bail!("at least one episode is required");
    }
    let mut env = make_env(env_name, env_config(seed))?;

    println!("🎬 Collecting {episodes} expert episodes on {env_name}");
    let trajectories = collect_expert_episodes(&mut env, episodes).await?;
    env.close().await?;

    let stats = rollout_stats(&trajectories)?;
    let transitions = Transitions::from_trajectories(&trajectories)?;
    write_json(out, &transitions).await?;

    println!("   Transitions: {}", transitions.len());
    print_stats(&stats);
    println!("✅ Demonstrations written to {}", out.display());
    Ok(())
}

pub async fn train(options: TrainOptions) -> Result<()> {
    let mut config = match &options.config {
        Some(path) => BcConfig::from_path(path)
            .with_context(|| format!("Failed to load trainer config {}", path.display()))?,
        None => BcConfig::default(),
    };
    if let Some(batch_size) = options.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(policy_class) = options.policy_class {
        config.policy_class = policy_class;
    }

    let bytes = tokio::fs::read(&options.demos)
        .await
        .with_context(|| format!("Failed to read demonstrations {}", options.demos.display()))?;
    let demos: Transitions =
        serde_json::from_slice(&bytes).context("Demonstrations file is not a valid transitions record")?;

    println!("🤖 Training behavioural cloning policy");
    println!("   Environment: {}", options.env);
    println!("   Policy: {}", config.policy_class);
    println!("   Samples: {}", demos.len());
    println!("   Epochs: {}", options.epochs);
    println!("   Batch size: {}", config.batch_size);

    let env = make_env(&options.env, env_config(config.seed))?;
    let mut trainer = BcTrainer::new(env, Session::new(), Some(demos), config)?;

    let mut report = |progress: &EpochProgress| -> ControlFlow<()> {
        match progress.loss_ewma {
            Some(loss) => println!("   epoch {:>3}/{}  loss {loss:.4}", progress.epoch + 1, progress.n_epochs),
            None => println!("   epoch {:>3}/{}  (no full batch)", progress.epoch + 1, progress.n_epochs),
        }
        ControlFlow::Continue(())
    };
    let summary = trainer.train(options.epochs, Some(&mut report))?;

    trainer
        .save_policy(&options.out)
        .await
        .with_context(|| format!("Failed to save policy to {}", options.out.display()))?;
    println!(
        "\n✅ Trained {} epochs ({} batches); policy saved to {}",
        summary.epochs_completed,
        summary.total_batches,
        options.out.display()
    );

    if options.eval_episodes > 0 {
        let stats = trainer.test_policy(options.eval_episodes).await?;
        print_stats(&stats);
    }
    trainer.env_mut().close().await?;
    Ok(())
}

pub async fn eval(
    env_name: &str,
    policy_path: &Path,
    episodes: usize,
    deterministic: bool,
    seed: Option<u64>,
) -> Result<()> {
    if episodes == 0 {
        bail!("at least one episode is required");
    }
    let mut session = Session::new();
    let policy = reconstruct_policy(policy_path, &mut session)
        .await
        .with_context(|| format!("Failed to load policy {}", policy_path.display()))?;
    let mut env = make_env(env_name, env_config(seed))?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    println!("📊 Evaluating '{}' on {env_name}", policy.class_id());
    let trajectories = generate_trajectories(
        policy.as_ref(),
        &session,
        &mut env,
        SampleUntil::MinEpisodes(episodes),
        deterministic,
        &mut rng,
    )
    .await?;
    env.close().await?;

    print_stats(&rollout_stats(&trajectories)?);
    Ok(())
}

pub fn list() {
    println!("Environments:");
    for name in list_envs() {
        println!("   {name}");
    }
    println!("Policies:");
    for id in list_policies() {
        println!("   {id}");
    }
}

fn print_stats(stats: &RolloutStats) {
    println!("   Episodes: {}", stats.n_traj);
    println!(
        "   Return: {:.2} ± {:.2} (min {:.1}, max {:.1})",
        stats.return_mean, stats.return_std, stats.return_min, stats.return_max
    );
    println!(
        "   Length: {:.1} ± {:.1} (min {}, max {})",
        stats.len_mean, stats.len_std, stats.len_min, stats.len_max
    );
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec(value)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_train_eval() {
        let dir = tempfile::tempdir().unwrap();
        let demos = dir.path().join("demos.json");
        let policy = dir.path().join("out/policy.json");

        collect("cartpole", 2, Some(3), &demos).await.unwrap();
        let bytes = std::fs::read(&demos).unwrap();
        let transitions: Transitions = serde_json::from_slice(&bytes).unwrap();
        assert!(transitions.len() >= 2);

        train(TrainOptions {
            env: "cartpole".to_string(),
            demos: demos.clone(),
            epochs: 1,
            config: None,
            batch_size: Some(8),
            policy_class: Some("linear".to_string()),
            eval_episodes: 1,
            out: policy.clone(),
        })
        .await
        .unwrap();
        assert!(policy.exists());

        eval("cartpole", &policy, 2, true, Some(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_collect_requires_expert() {
        let dir = tempfile::tempdir().unwrap();
        let result = collect("mountain_car", 1, None, &dir.path().join("d.json")).await;
        assert!(result.is_err());
    }
}
