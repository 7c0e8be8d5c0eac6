use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use candle_core::{DType, Device, Tensor, Var};
use crucible_core::LmConfig;

use crate::causal_lm::{CausalLM, ModelError};

/// Test double with scripted losses. Each forward call with labels pops the
/// next value off the script, falling back to `default_loss` when the script
/// runs out. The loss is still wired through a real variable so backward
/// passes and optimizer steps work end to end.
pub struct DummyModel {
    var: Var,
    script: Mutex<VecDeque<f32>>,
    default_loss: f32,
    config: LmConfig,
    device: Device,
}

impl DummyModel {
    pub fn new(config: LmConfig) -> Self {
        Self::with_script(config, &[])
    }

    pub fn with_script(config: LmConfig, losses: &[f32]) -> Self {
        let device = Device::Cpu;
        // test double, allocation of a tiny cpu tensor does not fail
        let var = Var::zeros(4, DType::F32, &device).unwrap();
        Self {
            var,
            script: Mutex::new(losses.iter().copied().collect()),
            default_loss: 4.0,
            config,
            device,
        }
    }
}

impl CausalLM for DummyModel {
    fn forward(
        &self,
        input_ids: &Tensor,
        labels: Option<&Tensor>,
    ) -> Result<(Tensor, Option<Tensor>), ModelError> {
        let (batch_size, seq_len) = input_ids.dims2()?;
        let logits = Tensor::zeros(
            (batch_size, seq_len, self.config.vocab_size),
            DType::F32,
            &self.device,
        )?;
        let loss = match labels {
            None => None,
            Some(_) => {
                let value = self
                    .script
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or(self.default_loss);
                // keep the graph attached to `var` so backward produces grads
                let loss = (self.var.as_tensor().sum_all()? * 0.0)?
                    .affine(1.0, value as f64)?;
                Some(loss)
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
        vec![self.var.clone()]
    }

    fn named_tensors(&self) -> HashMap<String, Tensor> {
        HashMap::from([("dummy.weight".to_string(), self.var.as_tensor().clone())])
    }
}
