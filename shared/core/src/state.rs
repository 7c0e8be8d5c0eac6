use serde::{Deserialize, Serialize};

/// How many epochs a run trains for before moving on to the publish decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpochBudget {
    Bounded(u32),
    /// Train until externally interrupted.
    Unbounded,
}

impl EpochBudget {
    pub fn is_exhausted(&self, completed_epochs: u32) -> bool {
        match self {
            EpochBudget::Bounded(n) => completed_epochs >= *n,
            EpochBudget::Unbounded => false,
        }
    }
}

/// Mutable progress counters for one run.
///
/// `best_avg_loss` only ever decreases; it starts at infinity so the first
/// completed epoch always counts as an improvement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    pub epoch_step: u32,
    pub global_step: u64,
    pub accumulated_optimizer_steps: u32,
    pub best_avg_loss: f64,
}

impl Default for TrainingState {
    fn default() -> Self {
        Self {
            epoch_step: 0,
            global_step: 0,
            accumulated_optimizer_steps: 0,
            best_avg_loss: f64::INFINITY,
        }
    }
}

impl TrainingState {
    pub fn record_micro_batch(&mut self) {
        self.global_step += 1;
    }

    pub fn record_optimizer_step(&mut self) -> u32 {
        self.accumulated_optimizer_steps += 1;
        self.accumulated_optimizer_steps
    }

    /// Closes out an epoch. Returns true when `avg_loss` strictly improves
    /// on the best seen so far, which is the checkpoint-overwrite signal.
    pub fn complete_epoch(&mut self, avg_loss: f64) -> bool {
        self.epoch_step += 1;
        if avg_loss < self.best_avg_loss {
            self.best_avg_loss = avg_loss;
            true
        } else {
            false
        }
    }
}
