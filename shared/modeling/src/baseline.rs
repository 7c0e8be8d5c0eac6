use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Embedding, Linear, Module, VarBuilder, VarMap};
use crucible_core::LmConfig;

use crate::causal_lm::{CausalLM, ModelError};

/// Reference entry architecture: tied-width token embedding followed by an
/// untied linear head. Deliberately small so the lifecycle around it can be
/// exercised end to end on CPU; competition-grade architectures implement
/// the same trait.
pub struct BaselineLm {
    varmap: VarMap,
    embed_tokens: Embedding,
    lm_head: Linear,
    config: LmConfig,
    device: Device,
}

impl std::fmt::Debug for BaselineLm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaselineLm")
            .field("config", &self.config)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl BaselineLm {
    fn build(config: LmConfig, varmap: VarMap, device: &Device) -> Result<Self, ModelError> {
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let embed_tokens = candle_nn::embedding(
            config.vocab_size,
            config.hidden_size,
            vb.pp("model.embed_tokens"),
        )?;
        let lm_head =
            candle_nn::linear_no_bias(config.hidden_size, config.vocab_size, vb.pp("lm_head"))?;
        Ok(Self {
            varmap,
            embed_tokens,
            lm_head,
            config,
            device: device.clone(),
        })
    }

    pub fn from_scratch(config: LmConfig, device: &Device) -> Result<Self, ModelError> {
        Self::build(config, VarMap::new(), device)
    }

    /// Loads weights from a safetensors file into a freshly built graph.
    /// Building first registers every variable name, so a file with missing
    /// or mismatched tensors fails here rather than at first forward.
    pub fn from_safetensors(
        config: LmConfig,
        weights: &Path,
        device: &Device,
    ) -> Result<Self, ModelError> {
        let mut model = Self::build(config, VarMap::new(), device)?;
        model.varmap.load(weights)?;
        Ok(model)
    }
}

impl CausalLM for BaselineLm {
    fn forward(
        &self,
        input_ids: &Tensor,
        labels: Option<&Tensor>,
    ) -> Result<(Tensor, Option<Tensor>), ModelError> {
        let (_, seq_len) = input_ids.dims2()?;
        if seq_len > self.config.max_position_embeddings {
            return Err(ModelError::SequenceTooLong {
                got: seq_len,
                max: self.config.max_position_embeddings,
            });
        }
        let hidden = self.embed_tokens.forward(input_ids)?;
        let logits = self.lm_head.forward(&hidden)?;

        let loss = match labels {
            None => None,
            Some(labels) => {
                if seq_len < 2 {
                    return Err(ModelError::SequenceTooShort { got: seq_len });
                }
                // next-token convention: position t predicts token t+1
                let shift_logits = logits.narrow(1, 0, seq_len - 1)?;
                let shift_labels = labels.narrow(1, 1, seq_len - 1)?;
                let flat_logits =
                    shift_logits.reshape(((), self.config.vocab_size))?;
                let flat_labels = shift_labels.flatten_all()?;
                Some(candle_nn::loss::cross_entropy(&flat_logits, &flat_labels)?)
            }
        };
        Ok((logits, loss))
    }

    fn config(&self) -> &LmConfig {
        &self.config
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn variables(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    fn named_tensors(&self) -> HashMap<String, Tensor> {
        self.varmap
            .data()
            .lock()
            .unwrap()
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect()
    }
}
