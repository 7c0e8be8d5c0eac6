use std::sync::Arc;

use clap::Parser;
use crucible_miner::cli::TrainArgs;
use crucible_miner::logging;
use crucible_miner::publish::PublishOutcome;
use crucible_miner::run::{print_competitions, run, Collaborators, RunError};
use crucible_registry::{FsRegistry, HfArtifactHub};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

fn setup_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing the current epoch");
            handle.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = TrainArgs::parse();
    logging::init(args.logs);

    if args.list_competitions {
        print_competitions();
        return Ok(());
    }

    let cancel = setup_ctrl_c();
    let registry = Arc::new(FsRegistry::new(&args.registry_dir));
    let collaborators = Collaborators {
        metadata: registry.clone(),
        hub: Arc::new(HfArtifactHub::new(std::env::var("HF_TOKEN").ok(), None)),
        membership: registry,
    };

    match run(&args, &collaborators, cancel).await {
        Ok(summary) => {
            match &summary.outcome {
                PublishOutcome::Published(model) => {
                    info!(run_id = %summary.run_id, %model, "run complete, model published")
                }
                PublishOutcome::SkippedThreshold {
                    best_avg_loss,
                    threshold,
                } => info!(
                    run_id = %summary.run_id,
                    best_avg_loss,
                    threshold,
                    "run complete, model kept local"
                ),
                PublishOutcome::SkippedOffline => {
                    info!(run_id = %summary.run_id, "offline run complete")
                }
            }
            Ok(())
        }
        Err(err @ RunError::Publish(_)) => {
            // training finished and the best checkpoint is intact on disk,
            // only the handoff to the network failed
            error!("{err}");
            std::process::exit(2);
        }
        Err(err) => Err(err.into()),
    }
}
