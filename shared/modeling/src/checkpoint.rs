use std::fs;
use std::path::{Path, PathBuf};

use candle_core::Device;
use crucible_core::{CompetitionId, LmConfig, RunIdentity, TokenizerKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::baseline::BaselineLm;
use crate::causal_lm::{CausalLM, ModelError};

pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("checkpoint io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize checkpoint metadata: {0}")]
    SerializeMeta(serde_json::Error),

    #[error("failed to parse checkpoint metadata at {path}: {source}")]
    ParseMeta {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write weights: {0}")]
    WriteWeights(candle_core::Error),

    #[error("no checkpoint at {0}")]
    Missing(PathBuf),

    #[error("checkpoint declares config {found:?} but {expected:?} was required")]
    ArchitectureMismatch { expected: LmConfig, found: LmConfig },

    #[error("failed to load model from checkpoint: {0}")]
    Model(#[from] ModelError),
}

/// Everything needed to rebuild the model from the weights file, plus the
/// provenance a registry consumer wants to see.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub competition: CompetitionId,
    pub config: LmConfig,
    pub tokenizer: TokenizerKind,
    pub run_id: String,
    pub epoch_step: u32,
    /// Average loss of the epoch this checkpoint was taken from. `None` for
    /// the initial pre-training snapshot.
    pub avg_loss: Option<f64>,
}

/// Disk layout: one directory per run under `root`, holding `model.safetensors`
/// and `config.json`. Saves stage both files in a temp directory and swap it
/// in with renames, so a reader never sees a torn file or weights paired with
/// the previous snapshot's metadata.
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, run_id: &RunIdentity) -> PathBuf {
        self.root.join(run_id.as_str())
    }

    pub fn save(
        &self,
        model: &dyn CausalLM,
        meta: &CheckpointMeta,
    ) -> Result<PathBuf, CheckpointError> {
        let dir = self.root.join(&meta.run_id);
        let staging = self.root.join(format!(".tmp-{}", meta.run_id));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        candle_core::safetensors::save(&model.named_tensors(), staging.join(WEIGHTS_FILE))
            .map_err(CheckpointError::WriteWeights)?;
        let json =
            serde_json::to_string_pretty(meta).map_err(CheckpointError::SerializeMeta)?;
        fs::write(staging.join(CONFIG_FILE), json)?;

        if dir.exists() {
            let retired = self.root.join(format!(".old-{}", meta.run_id));
            if retired.exists() {
                fs::remove_dir_all(&retired)?;
            }
            fs::rename(&dir, &retired)?;
            fs::rename(&staging, &dir)?;
            fs::remove_dir_all(&retired)?;
        } else {
            fs::rename(&staging, &dir)?;
        }

        debug!(dir = %dir.display(), epoch = meta.epoch_step, "wrote checkpoint");
        Ok(dir)
    }

    pub fn load(
        &self,
        run_id: &RunIdentity,
        device: &Device,
    ) -> Result<(BaselineLm, CheckpointMeta), CheckpointError> {
        load_checkpoint_dir(&self.run_dir(run_id), device)
    }
}

/// Reads a checkpoint directory produced by [`CheckpointStore::save`].
pub fn load_checkpoint_dir(
    dir: &Path,
    device: &Device,
) -> Result<(BaselineLm, CheckpointMeta), CheckpointError> {
    let config_path = dir.join(CONFIG_FILE);
    let weights_path = dir.join(WEIGHTS_FILE);
    if !config_path.is_file() || !weights_path.is_file() {
        return Err(CheckpointError::Missing(dir.to_path_buf()));
    }
    let raw = fs::read_to_string(&config_path)?;
    let meta: CheckpointMeta =
        serde_json::from_str(&raw).map_err(|source| CheckpointError::ParseMeta {
            path: config_path,
            source,
        })?;
    let model = BaselineLm::from_safetensors(meta.config, &weights_path, device)?;
    Ok((model, meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Tensor;

    fn tiny_config() -> LmConfig {
        LmConfig {
            vocab_size: 11,
            hidden_size: 4,
            max_position_embeddings: 8,
        }
    }

    fn meta_for(run_id: &str) -> CheckpointMeta {
        CheckpointMeta {
            competition: CompetitionId::M770,
            config: tiny_config(),
            tokenizer: TokenizerKind::NeoX,
            run_id: run_id.to_string(),
            epoch_step: 2,
            avg_loss: Some(1.25),
        }
    }

    #[test]
    fn save_then_load_is_numerically_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let run_id = RunIdentity::from_raw("test-run");

        let model = BaselineLm::from_scratch(tiny_config(), &Device::Cpu).unwrap();
        store.save(&model, &meta_for("test-run")).unwrap();
        let (restored, meta) = store.load(&run_id, &Device::Cpu).unwrap();

        assert_eq!(meta.epoch_step, 2);
        assert_eq!(meta.avg_loss, Some(1.25));

        let probe =
            Tensor::from_vec(vec![1u32, 2, 3, 4, 5, 6], (1, 6), &Device::Cpu).unwrap();
        let (logits_a, _) = model.forward(&probe, None).unwrap();
        let (logits_b, _) = restored.forward(&probe, None).unwrap();
        let a = logits_a.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let b = logits_b.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn overwrite_replaces_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let run_id = RunIdentity::from_raw("test-run");

        let model = BaselineLm::from_scratch(tiny_config(), &Device::Cpu).unwrap();
        let mut meta = meta_for("test-run");
        meta.avg_loss = Some(3.0);
        store.save(&model, &meta).unwrap();
        meta.epoch_step = 5;
        meta.avg_loss = Some(2.0);
        store.save(&model, &meta).unwrap();

        let (_, loaded) = store.load(&run_id, &Device::Cpu).unwrap();
        assert_eq!(loaded.epoch_step, 5);
        assert_eq!(loaded.avg_loss, Some(2.0));
    }

    #[test]
    fn missing_directory_is_a_clean_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let err = store
            .load(&RunIdentity::from_raw("nope"), &Device::Cpu)
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Missing(_)));
    }

    #[test]
    fn no_staging_directories_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let model = BaselineLm::from_scratch(tiny_config(), &Device::Cpu).unwrap();
        store.save(&model, &meta_for("test-run")).unwrap();
        store.save(&model, &meta_for("test-run")).unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["test-run".to_string()]);
    }

    #[test]
    fn run_directory_holds_exactly_one_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let model = BaselineLm::from_scratch(tiny_config(), &Device::Cpu).unwrap();
        let mut meta = meta_for("test-run");
        store.save(&model, &meta).unwrap();
        meta.epoch_step = 3;
        let saved = store.save(&model, &meta).unwrap();
        let mut names: Vec<String> = fs::read_dir(&saved)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec![CONFIG_FILE.to_string(), WEIGHTS_FILE.to_string()]);
    }
}
