// mimic Control CLI
// Collect expert demonstrations, train behavioural-cloning policies, evaluate them

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod rl_commands;

#[derive(Parser)]
#[command(name = "mimicctl")]
#[command(about = "Behavioural cloning control CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Roll out the built-in expert and store its transitions
    Collect {
        /// Environment name (only cartpole has a built-in expert)
        #[arg(short, long, default_value = "cartpole")]
        env: String,

        /// Number of expert episodes
        #[arg(long, default_value = "20")]
        episodes: usize,

        /// Environment seed
        #[arg(long)]
        seed: Option<u64>,

        /// Output file for the demonstrations (JSON)
        #[arg(short, long, default_value = "demos.json")]
        out: PathBuf,
    },

    /// Train a policy on stored demonstrations and save it
    Train {
        /// Environment name
        #[arg(short, long, default_value = "cartpole")]
        env: String,

        /// Demonstrations written by `collect`
        #[arg(short, long, default_value = "demos.json")]
        demos: PathBuf,

        /// Number of passes over the demonstrations
        #[arg(long, default_value = "10")]
        epochs: usize,

        /// Trainer configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the configured batch size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Override the configured policy
        #[arg(long)]
        policy_class: Option<String>,

        /// Episodes used to evaluate the trained policy
        #[arg(long, default_value = "10")]
        eval_episodes: usize,

        /// Output file for the trained policy
        #[arg(short, long, default_value = "policy.json")]
        out: PathBuf,
    },

    /// Evaluate a saved policy
    Eval {
        /// Environment name
        #[arg(short, long, default_value = "cartpole")]
        env: String,

        /// Policy written by `train`
        #[arg(short, long, default_value = "policy.json")]
        policy: PathBuf,

        /// Number of evaluation episodes
        #[arg(long, default_value = "10")]
        episodes: usize,

        /// Take the most likely action instead of sampling
        #[arg(long)]
        deterministic: bool,

        /// Seed for the environment and action sampling
        #[arg(long)]
        seed: Option<u64>,
    },

    /// List available environments and policies
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Collect {
            env,
            episodes,
            seed,
            out,
        } => {
            rl_commands::collect(&env, episodes, seed, &out).await?;
        }

        Commands::Train {
            env,
            demos,
            epochs,
            config,
            batch_size,
            policy_class,
            eval_episodes,
            out,
        } => {
            let options = rl_commands::TrainOptions {
                env,
                demos,
                epochs,
                config,
                batch_size,
                policy_class,
                eval_episodes,
                out,
            };
            rl_commands::train(options).await?;
        }

        Commands::Eval {
            env,
            policy,
            episodes,
            deterministic,
            seed,
        } => {
            rl_commands::eval(&env, &policy, episodes, deterministic, seed).await?;
        }

        Commands::List => {
            rl_commands::list();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_train_arguments() {
        let cli = Cli::parse_from([
            "mimicctl", "train", "--demos", "d.json", "--epochs", "3", "--batch-size", "16",
        ]);
        let Commands::Train {
            epochs, batch_size, env, ..
        } = cli.command
        else {
            panic!("expected train");
        };
        assert_eq!(epochs, 3);
        assert_eq!(batch_size, Some(16));
        assert_eq!(env, "cartpole");
    }
}
