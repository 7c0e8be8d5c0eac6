use std::sync::Arc;

use crucible_core::{
    lookup_constraints, CompetitionId, ModelConstraints, OptimizerDefinition, RunIdentity,
    TrainingState, UnknownCompetition,
};
use crucible_data_provider::{DataProviderError, LocalDataProvider};
use crucible_metrics::{JsonlTelemetry, NullTelemetry, RunMetadata, TelemetrySink};
use crucible_modeling::{AdamW, CausalLM, CheckpointMeta, CheckpointStore, Device};
use crucible_registry::{
    ArtifactHub, MetadataStore, MinerIdentity, NetworkMembership, RegistryError,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bootstrap::{load_starting_model, BootstrapError};
use crate::cli::TrainArgs;
use crate::publish::{PublishError, PublishGate, PublishOutcome};
use crate::train::{TrainError, TrainingConfig, TrainingLoop};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Competition(#[from] UnknownCompetition),

    #[error("--hotkey is required for online runs")]
    MissingHotkey,

    #[error("registration check failed: {0}")]
    Registration(#[from] RegistryError),

    #[error("failed to index training data: {0}")]
    Data(#[from] DataProviderError),

    #[error("sequence length {got} exceeds the competition limit of {max}")]
    SequenceTooLong { got: usize, max: usize },

    #[error("--accumulation-steps must be at least 1")]
    ZeroAccumulationSteps,
}

/// Run failures, tagged by the lifecycle phase that produced them. A publish
/// failure notably arrives after training succeeded; the checkpoint on disk
/// is still valid.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("training failed: {0}")]
    Training(#[from] TrainError),

    #[error("training succeeded but publishing failed: {0}")]
    Publish(#[from] PublishError),
}

/// Network-facing collaborators, injected so tests and local testnets can
/// swap in their own registry and hub.
pub struct Collaborators {
    pub metadata: Arc<dyn MetadataStore>,
    pub hub: Arc<dyn ArtifactHub>,
    pub membership: Arc<dyn NetworkMembership>,
}

#[derive(Debug)]
pub struct RunSummary {
    pub run_id: RunIdentity,
    pub state: TrainingState,
    pub outcome: PublishOutcome,
}

struct Prepared {
    constraints: &'static ModelConstraints,
    identity: Option<MinerIdentity>,
    uid: Option<u32>,
    run_id: RunIdentity,
}

/// One full miner run: bootstrap, train, publish decision.
pub async fn run(
    args: &TrainArgs,
    collaborators: &Collaborators,
    cancel: CancellationToken,
) -> Result<RunSummary, RunError> {
    let prepared = prepare(args, collaborators)?;
    let mut telemetry = make_telemetry(args, &prepared);

    let result = lifecycle(args, collaborators, &prepared, telemetry.as_mut(), &cancel).await;

    // telemetry is closed on every exit path, including failed runs
    if let Err(e) = telemetry.finish() {
        warn!("failed to finalize telemetry: {e}");
    }
    result
}

fn prepare(args: &TrainArgs, collaborators: &Collaborators) -> Result<Prepared, ConfigError> {
    let constraints = lookup_constraints(args.competition_id)?;
    if args.sequence_length > constraints.max_sequence_length {
        return Err(ConfigError::SequenceTooLong {
            got: args.sequence_length,
            max: constraints.max_sequence_length,
        });
    }
    if args.accumulation_steps == 0 {
        return Err(ConfigError::ZeroAccumulationSteps);
    }

    let identity = match (args.offline, &args.hotkey) {
        (true, _) => None,
        (false, Some(hotkey)) => Some(MinerIdentity::new(hotkey.clone())),
        (false, None) => return Err(ConfigError::MissingHotkey),
    };
    let uid = match &identity {
        Some(identity) => {
            let uid = collaborators.membership.assert_registered(identity)?;
            info!(%identity, uid, "confirmed network registration");
            Some(uid)
        }
        None => None,
    };

    Ok(Prepared {
        constraints,
        identity,
        uid,
        run_id: RunIdentity::mint(),
    })
}

fn make_telemetry(args: &TrainArgs, prepared: &Prepared) -> Box<dyn TelemetrySink> {
    let Some(path) = &args.telemetry_path else {
        info!("no telemetry path configured, run will not be recorded");
        return Box::new(NullTelemetry);
    };
    let metadata = RunMetadata {
        run_name: prepared.run_id.to_string(),
        node_type: "miner".to_string(),
        competition: args.competition_id.to_string(),
        uid: prepared.uid,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    match JsonlTelemetry::start_run(path, &metadata) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            warn!(path = %path.display(), "failed to open telemetry, continuing without: {e}");
            Box::new(NullTelemetry)
        }
    }
}

async fn lifecycle(
    args: &TrainArgs,
    collaborators: &Collaborators,
    prepared: &Prepared,
    telemetry: &mut dyn TelemetrySink,
    cancel: &CancellationToken,
) -> Result<RunSummary, RunError> {
    let run_id = prepared.run_id.clone();
    let device = pick_device();
    info!(
        %run_id,
        competition = %args.competition_id,
        device = ?device,
        "starting miner run"
    );

    let provider = LocalDataProvider::new_from_directory(&args.data_dir, args.tokens_per_page)
        .map_err(ConfigError::Data)?;

    let source = args.model_source();
    info!(%source, "resolving starting model");
    let model = load_starting_model(
        &source,
        args.competition_id,
        prepared.constraints,
        collaborators.metadata.as_ref(),
        collaborators.hub.as_ref(),
        &device,
    )
    .await?;
    model.prepare_for_training();

    let mut optimizer = AdamW::new(
        model.variables(),
        args.lr,
        OptimizerDefinition::adamw_default(),
    )
    .map_err(BootstrapError::Model)?;

    let checkpoints = CheckpointStore::new(&args.model_dir);
    let mut state = TrainingState::default();

    // snapshot the starting weights so the run directory is valid even if
    // no epoch ever completes
    let initial_meta = CheckpointMeta {
        competition: args.competition_id,
        config: *model.config(),
        tokenizer: prepared.constraints.tokenizer,
        run_id: run_id.to_string(),
        epoch_step: 0,
        avg_loss: None,
    };
    let initial_dir = checkpoints
        .save(&model, &initial_meta)
        .map_err(TrainError::Checkpoint)?;
    info!(dir = %initial_dir.display(), "saved initial checkpoint");
    if let Err(e) = telemetry.save_artifact(&initial_dir) {
        warn!("failed to record initial checkpoint artifact: {e}");
    }

    let mut rng = match args.seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };

    let mut training = TrainingLoop {
        model: &model,
        optimizer: &mut optimizer,
        provider: &provider,
        checkpoints: &checkpoints,
        run_id: &run_id,
        competition: args.competition_id,
        tokenizer: prepared.constraints.tokenizer,
        config: TrainingConfig {
            batch_size: args.batch_size,
            sequence_length: args.sequence_length,
            accumulation_steps: args.accumulation_steps,
            pages_per_epoch: args.pages_per_epoch,
            epoch_budget: args.epoch_budget(),
        },
    };
    training.run(&mut state, telemetry, &mut rng, cancel)?;

    let gate = PublishGate {
        offline: args.offline,
        threshold: args.avg_loss_upload_threshold,
        hub_repo: args.hub_repo.clone(),
        competition: args.competition_id,
    };
    let outcome = gate
        .evaluate(
            &state,
            &checkpoints,
            &run_id,
            prepared.identity.as_ref(),
            collaborators.metadata.as_ref(),
            collaborators.hub.as_ref(),
            &device,
        )
        .await?;

    Ok(RunSummary {
        run_id,
        state,
        outcome,
    })
}

fn pick_device() -> Device {
    Device::cuda_if_available(0).unwrap_or(Device::Cpu)
}

pub fn print_competitions() {
    for id in CompetitionId::ALL {
        match crucible_core::constraints_for(id) {
            Some(c) => println!(
                "{id}: vocab_size={} hidden_size={} max_seq={} tokenizer={}",
                c.model.vocab_size, c.model.hidden_size, c.max_sequence_length, c.tokenizer
            ),
            None => println!("{id}: not scheduled"),
        }
    }
}
