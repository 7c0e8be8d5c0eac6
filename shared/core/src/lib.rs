mod batch;
mod competition;
mod optimizer;
mod run_id;
mod state;

pub use batch::TokenBatch;
pub use competition::{
    constraints_for, lookup_constraints, CompetitionId, LmConfig, ModelConstraints,
    TokenizerKind, UnknownCompetition,
};
pub use optimizer::OptimizerDefinition;
pub use run_id::RunIdentity;
pub use state::{EpochBudget, TrainingState};
