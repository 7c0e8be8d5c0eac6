use crucible_core::{
    CompetitionId, EpochBudget, RunIdentity, TokenizerKind, TrainingState,
};
use crucible_data_provider::{sample_pages, DataProviderError, TokenizedDataProvider};
use crucible_metrics::{EpochRecord, StepRecord, TelemetrySink};
use crucible_modeling::{
    batch_to_tensor, AdamW, CausalLM, CheckpointError, CheckpointMeta, CheckpointStore,
    ModelError,
};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("epoch {epoch} produced no batches; the sampled pages are too small for the batch shape")]
    EmptyEpoch { epoch: u32 },

    #[error("model returned no loss for a labeled batch")]
    MissingLoss,

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("data error: {0}")]
    Data(#[from] DataProviderError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

#[derive(Clone, Copy, Debug)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub sequence_length: usize,
    pub accumulation_steps: usize,
    pub pages_per_epoch: usize,
    pub epoch_budget: EpochBudget,
}

/// Epoch-driven training with best-checkpoint tracking.
///
/// Each epoch samples fresh pages, walks their batches accumulating
/// gradients, and steps the optimizer every `accumulation_steps`-th batch.
/// When the epoch's average loss strictly improves on the best seen, the
/// run's checkpoint directory is overwritten with the current weights.
pub struct TrainingLoop<'a> {
    pub model: &'a dyn CausalLM,
    pub optimizer: &'a mut AdamW,
    pub provider: &'a dyn TokenizedDataProvider,
    pub checkpoints: &'a CheckpointStore,
    pub run_id: &'a RunIdentity,
    pub competition: CompetitionId,
    pub tokenizer: TokenizerKind,
    pub config: TrainingConfig,
}

impl TrainingLoop<'_> {
    pub fn run(
        &mut self,
        state: &mut TrainingState,
        telemetry: &mut dyn TelemetrySink,
        rng: &mut ChaCha8Rng,
        cancel: &CancellationToken,
    ) -> Result<(), TrainError> {
        loop {
            if self.config.epoch_budget.is_exhausted(state.epoch_step) {
                info!(epochs = state.epoch_step, "epoch budget exhausted");
                return Ok(());
            }
            if cancel.is_cancelled() {
                info!(epochs = state.epoch_step, "interrupted, stopping training");
                return Ok(());
            }
            self.run_epoch(state, telemetry, rng)?;
        }
    }

    fn run_epoch(
        &mut self,
        state: &mut TrainingState,
        telemetry: &mut dyn TelemetrySink,
        rng: &mut ChaCha8Rng,
    ) -> Result<(), TrainError> {
        let epoch = state.epoch_step;
        let pages = sample_pages(self.provider.max_page(), self.config.pages_per_epoch, rng);
        info!(epoch, pages = pages.len(), "loading pages for epoch");
        debug!(?pages, "sampled page indices");
        let loader = self.provider.make_loader(
            &pages,
            self.config.batch_size,
            self.config.sequence_length,
        )?;

        self.optimizer.zero_grad();
        let mut epoch_loss = 0.0f64;
        let mut n_batches = 0usize;

        for (i, batch) in loader.enumerate() {
            let input_ids = batch_to_tensor(&batch, self.model.device())?;
            let (_logits, loss) = self.model.forward(&input_ids, Some(&input_ids))?;
            let loss = loss.ok_or(TrainError::MissingLoss)?;
            let unscaled = loss.to_scalar::<f32>().map_err(ModelError::Tensor)? as f64;

            // scale before backward so accumulated gradients average over
            // the window instead of summing
            let scaled = (&loss * (1.0 / self.config.accumulation_steps as f64))
                .map_err(ModelError::Tensor)?;
            let grads = scaled.backward().map_err(ModelError::Tensor)?;
            self.optimizer.accumulate(&grads)?;
            drop(grads);
            self.model.release_cached_memory();

            if (i + 1) % self.config.accumulation_steps == 0 {
                self.optimizer.step()?;
                let step = state.record_optimizer_step();
                info!(step, epoch, loss = unscaled, "optimizer step");
                let record = StepRecord::new(step, epoch, unscaled, self.optimizer.lr());
                if let Err(e) = telemetry.log_step(&record) {
                    warn!("failed to record step telemetry: {e}");
                }
            }

            state.record_micro_batch();
            epoch_loss += unscaled;
            n_batches += 1;
        }

        if n_batches == 0 {
            return Err(TrainError::EmptyEpoch { epoch });
        }

        let avg_loss = epoch_loss / n_batches as f64;
        let improved = state.complete_epoch(avg_loss);
        info!(
            epoch,
            avg_loss,
            best = state.best_avg_loss,
            n_batches,
            "epoch complete"
        );
        let record = EpochRecord::new(epoch, avg_loss, state.best_avg_loss, n_batches);
        if let Err(e) = telemetry.log_epoch(&record) {
            warn!("failed to record epoch telemetry: {e}");
        }

        if improved {
            let meta = CheckpointMeta {
                competition: self.competition,
                config: *self.model.config(),
                tokenizer: self.tokenizer,
                run_id: self.run_id.to_string(),
                epoch_step: state.epoch_step,
                avg_loss: Some(avg_loss),
            };
            let dir = self.checkpoints.save(self.model, &meta)?;
            info!(dir = %dir.display(), avg_loss, "new best model checkpointed");
            if let Err(e) = telemetry.save_artifact(&dir) {
                warn!("failed to record checkpoint artifact: {e}");
            }
        }
        Ok(())
    }
}
