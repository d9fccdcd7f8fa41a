//! Example: clone the heuristic CartPole expert and compare it with the cloned policy

use mimic_rl_agent::{reconstruct_policy, BcConfig, BcTrainer, Session};
use mimic_rl_core::{Environment, EnvironmentConfig, Transitions};
use mimic_rl_env::{collect_expert_episodes, CartPoleEnv, TimeLimit};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Collect expert episodes
    let mut env = TimeLimit::new(
        CartPoleEnv::new(EnvironmentConfig {
            seed: Some(0),
            ..EnvironmentConfig::default()
        })?,
        200,
    );
    let episodes = collect_expert_episodes(&mut env, 10).await?;
    for episode in &episodes {
        println!("Expert {}: reward {:.0}", episode.episode_id, episode.total_reward);
    }
    let demos = Transitions::from_trajectories(&episodes)?;
    println!("\nCollected {} expert transitions", demos.len());

    // Train
    let config = BcConfig {
        seed: Some(7),
        ..BcConfig::default()
    };
    let mut trainer = BcTrainer::new(env, Session::new(), Some(demos), config)?;
    let summary = trainer.train(20, None)?;
    println!(
        "Trained {} epochs ({} batches), final loss {:?}",
        summary.epochs_completed, summary.total_batches, summary.final_loss_ewma
    );

    let stats = trainer.test_policy(10).await?;
    println!(
        "Cloned policy: mean return {:.1} ± {:.1} over {} episodes",
        stats.return_mean, stats.return_std, stats.n_traj
    );

    // Save and load back into a separate session
    let path = std::env::temp_dir().join("mimic-demo/cartpole_policy.json");
    trainer.save_policy(&path).await?;
    let mut session = Session::new();
    let restored = reconstruct_policy(&path, &mut session).await?;
    println!(
        "Restored '{}' with {} variables from {}",
        restored.class_id(),
        restored.trainable_variables().len(),
        path.display()
    );

    trainer.env_mut().close().await?;
    Ok(())
}
