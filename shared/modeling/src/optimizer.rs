use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use crucible_core::OptimizerDefinition;

use crate::causal_lm::ModelError;

/// Decoupled-weight-decay Adam over a fixed set of variables.
///
/// Gradients are accumulated explicitly: each backward pass hands its
/// `GradStore` to [`accumulate`](AdamW::accumulate), and [`step`](AdamW::step)
/// applies whatever has been gathered since the last step, then clears it.
/// The caller owns the decision of how many micro-batches make up one step.
pub struct AdamW {
    vars: Vec<Var>,
    exp_avg: Vec<Tensor>,
    exp_avg_sq: Vec<Tensor>,
    accumulated: Vec<Option<Tensor>>,
    lr: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    weight_decay: f64,
    clip_grad_norm: Option<f64>,
    t: i32,
}

impl AdamW {
    pub fn new(vars: Vec<Var>, lr: f64, def: OptimizerDefinition) -> Result<Self, ModelError> {
        let OptimizerDefinition::AdamW {
            betas,
            eps,
            weight_decay,
            clip_grad_norm,
        } = def;
        let exp_avg = vars
            .iter()
            .map(|v| Tensor::zeros(v.shape(), v.dtype(), v.device()))
            .collect::<Result<Vec<_>, _>>()?;
        let exp_avg_sq = vars
            .iter()
            .map(|v| Tensor::zeros(v.shape(), v.dtype(), v.device()))
            .collect::<Result<Vec<_>, _>>()?;
        let accumulated = vec![None; vars.len()];
        Ok(Self {
            vars,
            exp_avg,
            exp_avg_sq,
            accumulated,
            lr,
            beta1: betas[0],
            beta2: betas[1],
            eps,
            weight_decay,
            clip_grad_norm,
            t: 0,
        })
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Adds the gradients from one backward pass to the accumulation
    /// buffers. Variables absent from the store are left untouched.
    pub fn accumulate(&mut self, grads: &GradStore) -> Result<(), ModelError> {
        for (i, var) in self.vars.iter().enumerate() {
            if let Some(grad) = grads.get(var.as_tensor()) {
                self.accumulated[i] = Some(match self.accumulated[i].take() {
                    Some(acc) => (&acc + grad)?,
                    None => grad.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn zero_grad(&mut self) {
        for slot in self.accumulated.iter_mut() {
            *slot = None;
        }
    }

    /// Applies one optimizer step from the accumulated gradients and clears
    /// the buffers. A step with nothing accumulated is a no-op apart from
    /// advancing the bias-correction clock.
    pub fn step(&mut self) -> Result<(), ModelError> {
        self.t += 1;
        let clip_scale = self.clip_scale()?;
        let bias1 = 1.0 - self.beta1.powi(self.t);
        let bias2 = 1.0 - self.beta2.powi(self.t);

        for (i, var) in self.vars.iter().enumerate() {
            let Some(grad) = self.accumulated[i].take() else {
                continue;
            };
            let grad = if clip_scale != 1.0 {
                (&grad * clip_scale)?
            } else {
                grad
            };

            let m = ((&self.exp_avg[i] * self.beta1)? + (&grad * (1.0 - self.beta1))?)?;
            let v = ((&self.exp_avg_sq[i] * self.beta2)?
                + (grad.sqr()? * (1.0 - self.beta2))?)?;

            let m_hat = (&m * (1.0 / bias1))?;
            let v_hat = (&v * (1.0 / bias2))?;
            let denom = v_hat.sqrt()?.affine(1.0, self.eps)?;
            let update = (&m_hat / &denom)?;

            let mut next = (var.as_tensor() * (1.0 - self.lr * self.weight_decay))?;
            next = (&next - &(&update * self.lr)?)?;
            var.set(&next)?;

            self.exp_avg[i] = m;
            self.exp_avg_sq[i] = v;
        }
        Ok(())
    }

    fn clip_scale(&self) -> Result<f64, ModelError> {
        let Some(max_norm) = self.clip_grad_norm else {
            return Ok(1.0);
        };
        let mut sq_sum = 0.0f64;
        for grad in self.accumulated.iter().flatten() {
            sq_sum += grad.sqr()?.sum_all()?.to_scalar::<f32>()? as f64;
        }
        let total_norm = sq_sum.sqrt();
        if total_norm > max_norm {
            Ok(max_norm / (total_norm + 1e-6))
        } else {
            Ok(1.0)
        }
    }
}
