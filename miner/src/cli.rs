use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use crucible_core::{CompetitionId, EpochBudget};

use crate::bootstrap::ModelSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogOutput {
    Console,
    Json,
    None,
}

fn parse_competition(raw: &str) -> Result<CompetitionId, String> {
    raw.parse().map_err(|e: crucible_core::UnknownCompetition| e.to_string())
}

#[derive(Parser, Debug)]
#[command(
    name = "crucible-miner",
    about = "Trains a competition entry and publishes it to the registry when it is good enough"
)]
pub struct TrainArgs {
    /// Competition to enter.
    #[clap(long, env, value_parser = parse_competition)]
    pub competition_id: CompetitionId,

    /// Skip all network interaction: no registration check, no publish.
    #[clap(long, env, default_value_t = false)]
    pub offline: bool,

    /// Start from the best model currently published for the competition.
    #[clap(long, env, default_value_t = false)]
    pub load_best: bool,

    /// Start from the model published by this participant uid.
    #[clap(long, env)]
    pub load_uid: Option<u32>,

    /// Start from a checkpoint directory on local disk.
    #[clap(long, env)]
    pub load_model_dir: Option<PathBuf>,

    /// Start from a single safetensors weights file on local disk.
    #[clap(long, env)]
    pub load_model: Option<PathBuf>,

    /// Where run checkpoints are written.
    #[clap(long, env, default_value = "local-models")]
    pub model_dir: PathBuf,

    /// Directory of pre-tokenized .bin token files to train on.
    #[clap(long, env)]
    pub data_dir: PathBuf,

    #[clap(long, env, default_value_t = 65536)]
    pub tokens_per_page: u64,

    #[clap(long, env, default_value_t = 1e-5)]
    pub lr: f64,

    #[clap(long, env, default_value_t = 8)]
    pub batch_size: usize,

    #[clap(long, env, default_value_t = 1024)]
    pub sequence_length: usize,

    /// Micro-batches accumulated into one optimizer step.
    #[clap(long, env, default_value_t = 5)]
    pub accumulation_steps: usize,

    /// Pages sampled from the corpus for each epoch.
    #[clap(long, env, default_value_t = 10)]
    pub pages_per_epoch: usize,

    /// Number of epochs to train; omit to train until interrupted.
    #[clap(long, env)]
    pub num_epochs: Option<u32>,

    /// Publish only when the best average loss falls strictly below this.
    /// The default of 0 means never publish.
    #[clap(long, env, default_value_t = 0.0)]
    pub avg_loss_upload_threshold: f64,

    /// Hub repo the best checkpoint is uploaded to when publishing.
    #[clap(long, env)]
    pub hub_repo: Option<String>,

    /// Participant hotkey; required for online runs.
    #[clap(long, env)]
    pub hotkey: Option<String>,

    /// Registry index directory.
    #[clap(long, env, default_value = "registry")]
    pub registry_dir: PathBuf,

    /// JSONL telemetry output path; omit to not record the run.
    #[clap(long, env)]
    pub telemetry_path: Option<PathBuf>,

    /// Seed for page sampling; omit for an entropy-derived seed.
    #[clap(long, env)]
    pub seed: Option<u64>,

    #[clap(long, env, value_enum, default_value = "console", ignore_case = true)]
    pub logs: LogOutput,

    /// Print the competition schedule and exit.
    #[clap(long, default_value_t = false)]
    pub list_competitions: bool,
}

impl TrainArgs {
    /// Resolves the four starting-model flags into one source. When several
    /// are set the most authoritative wins: best-on-network, then a specific
    /// participant, then a local checkpoint directory, then a weights file.
    pub fn model_source(&self) -> ModelSource {
        if self.load_best {
            ModelSource::BestOnNetwork
        } else if let Some(uid) = self.load_uid {
            ModelSource::Participant(uid)
        } else if let Some(dir) = &self.load_model_dir {
            ModelSource::LocalDir(dir.clone())
        } else if let Some(path) = &self.load_model {
            ModelSource::LocalFile(path.clone())
        } else {
            ModelSource::Scratch
        }
    }

    pub fn epoch_budget(&self) -> EpochBudget {
        match self.num_epochs {
            Some(n) => EpochBudget::Bounded(n),
            None => EpochBudget::Unbounded,
        }
    }
}
