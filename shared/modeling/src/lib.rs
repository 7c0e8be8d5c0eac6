mod baseline;
mod causal_lm;
mod checkpoint;
mod dummy;
mod optimizer;

pub use baseline::BaselineLm;
pub use causal_lm::{batch_to_tensor, CausalLM, ModelError};
pub use checkpoint::{
    load_checkpoint_dir, CheckpointError, CheckpointMeta, CheckpointStore, CONFIG_FILE,
    WEIGHTS_FILE,
};
pub use dummy::DummyModel;
pub use optimizer::AdamW;

pub use candle_core::{Device, Tensor, Var};
