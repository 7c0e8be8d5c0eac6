use std::collections::HashMap;

use candle_core::{Device, Tensor, Var};
use crucible_core::{LmConfig, TokenBatch};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("tensor operation failed: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("batch has no rows")]
    EmptyBatch,

    #[error("sequence of length {got} is too short for next-token loss")]
    SequenceTooShort { got: usize },

    #[error("sequence of length {got} exceeds the model context of {max}")]
    SequenceTooLong { got: usize, max: usize },
}

/// The seam between the training loop and whatever model backs a run.
///
/// `forward` returns logits and, when labels are given, the *unscaled* mean
/// next-token loss. Scaling for gradient accumulation happens in the caller,
/// so the loss reported here is always comparable across configurations.
pub trait CausalLM: Send {
    fn forward(
        &self,
        input_ids: &Tensor,
        labels: Option<&Tensor>,
    ) -> Result<(Tensor, Option<Tensor>), ModelError>;

    fn config(&self) -> &LmConfig;

    fn device(&self) -> &Device;

    /// Trainable variables, shared with the optimizer.
    fn variables(&self) -> Vec<Var>;

    /// Snapshot of all weights by name, for serialization.
    fn named_tensors(&self) -> HashMap<String, Tensor>;

    /// Hook for backends that distinguish train/eval mode.
    fn prepare_for_training(&self) {}

    /// Hook for backends that hold device-side caches worth releasing
    /// between micro-batches.
    fn release_cached_memory(&self) {}

    fn max_context_length(&self) -> usize {
        self.config().max_position_embeddings
    }
}

/// Uploads a batch of token ids to the model's device as a `[b, s]` u32 tensor.
pub fn batch_to_tensor(batch: &TokenBatch, device: &Device) -> Result<Tensor, ModelError> {
    if batch.batch_size() == 0 {
        return Err(ModelError::EmptyBatch);
    }
    let shape = (batch.batch_size(), batch.sequence_length());
    Ok(Tensor::from_vec(batch.flattened(), shape, device)?)
}
