use serde::{Deserialize, Serialize};

/// Optimizer hyperparameters, minus the learning rate which comes from the
/// run configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum OptimizerDefinition {
    AdamW {
        betas: [f64; 2],
        eps: f64,
        weight_decay: f64,
        clip_grad_norm: Option<f64>,
    },
}

impl OptimizerDefinition {
    pub fn adamw_default() -> Self {
        OptimizerDefinition::AdamW {
            betas: [0.9, 0.999],
            eps: 1e-8,
            weight_decay: 0.01,
            clip_grad_norm: None,
        }
    }
}
