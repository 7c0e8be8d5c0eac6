use std::fmt;
use std::path::PathBuf;

use crucible_core::{CompetitionId, LmConfig, ModelConstraints};
use crucible_modeling::{
    load_checkpoint_dir, BaselineLm, CheckpointError, CheckpointMeta, Device, ModelError,
    CONFIG_FILE, WEIGHTS_FILE,
};
use crucible_registry::{find_artifact_file, ArtifactHub, MetadataStore, ModelRef, RegistryError};
use thiserror::Error;
use tracing::info;

/// Where the starting weights for a run come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelSource {
    BestOnNetwork,
    Participant(u32),
    LocalDir(PathBuf),
    LocalFile(PathBuf),
    Scratch,
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::BestOnNetwork => write!(f, "best published model"),
            ModelSource::Participant(uid) => write!(f, "model published by uid {uid}"),
            ModelSource::LocalDir(dir) => write!(f, "checkpoint directory {}", dir.display()),
            ModelSource::LocalFile(path) => write!(f, "weights file {}", path.display()),
            ModelSource::Scratch => write!(f, "fresh initialization"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("failed to fetch published model: {0}")]
    Fetch(#[from] RegistryError),

    #[error("failed to load checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("failed to initialize model: {0}")]
    Model(#[from] ModelError),
}

/// Materializes the starting model for a run. There are no retries here:
/// a source that cannot be loaded fails the whole run so the operator sees
/// it immediately rather than silently training from scratch.
pub async fn load_starting_model(
    source: &ModelSource,
    competition: CompetitionId,
    constraints: &ModelConstraints,
    metadata: &dyn MetadataStore,
    hub: &dyn ArtifactHub,
    device: &Device,
) -> Result<BaselineLm, BootstrapError> {
    match source {
        ModelSource::BestOnNetwork => {
            let model_ref = metadata.get_best(competition).await?;
            info!(model = %model_ref, "fetching best published model");
            from_published(&model_ref, constraints, hub, device).await
        }
        ModelSource::Participant(uid) => {
            let model_ref = metadata.get_for_participant(*uid).await?;
            info!(model = %model_ref, uid, "fetching participant's published model");
            from_published(&model_ref, constraints, hub, device).await
        }
        ModelSource::LocalDir(dir) => {
            let (model, meta) = load_checkpoint_dir(dir, device)?;
            check_architecture(constraints, meta.config)?;
            Ok(model)
        }
        ModelSource::LocalFile(path) => {
            // a bare weights file carries no metadata; the competition's
            // declared architecture is assumed
            Ok(BaselineLm::from_safetensors(constraints.model, path, device)?)
        }
        ModelSource::Scratch => Ok(BaselineLm::from_scratch(constraints.model, device)?),
    }
}

async fn from_published(
    model_ref: &ModelRef,
    constraints: &ModelConstraints,
    hub: &dyn ArtifactHub,
    device: &Device,
) -> Result<BaselineLm, BootstrapError> {
    let files = hub.download(model_ref).await?;
    let config_path = find_artifact_file(&files, CONFIG_FILE, &model_ref.repo_id)?;
    let weights_path = find_artifact_file(&files, WEIGHTS_FILE, &model_ref.repo_id)?;

    let raw = std::fs::read_to_string(config_path).map_err(RegistryError::Io)?;
    let meta: CheckpointMeta =
        serde_json::from_str(&raw).map_err(|source| CheckpointError::ParseMeta {
            path: config_path.to_path_buf(),
            source,
        })?;
    check_architecture(constraints, meta.config)?;
    Ok(BaselineLm::from_safetensors(meta.config, weights_path, device)?)
}

fn check_architecture(
    constraints: &ModelConstraints,
    found: LmConfig,
) -> Result<(), BootstrapError> {
    if found != constraints.model {
        return Err(CheckpointError::ArchitectureMismatch {
            expected: constraints.model,
            found,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::{lookup_constraints, TokenizerKind};
    use crucible_modeling::{CausalLM, CheckpointStore};
    use crucible_registry::{InMemoryMetadataStore, LocalArtifactHub};

    fn s1() -> (&'static ModelConstraints, CompetitionId) {
        (
            lookup_constraints(CompetitionId::S1).unwrap(),
            CompetitionId::S1,
        )
    }

    fn checkpoint_in(dir: &std::path::Path, config: LmConfig) -> std::path::PathBuf {
        let store = CheckpointStore::new(dir);
        let model = BaselineLm::from_scratch(config, &Device::Cpu).unwrap();
        let meta = CheckpointMeta {
            competition: CompetitionId::S1,
            config,
            tokenizer: TokenizerKind::NeoX,
            run_id: "seed-run".to_string(),
            epoch_step: 1,
            avg_loss: Some(2.0),
        };
        store.save(&model, &meta).unwrap()
    }

    #[tokio::test]
    async fn scratch_builds_the_declared_architecture() {
        let (constraints, competition) = s1();
        let metadata = InMemoryMetadataStore::default();
        let hub = LocalArtifactHub::new("/nonexistent");
        let model = load_starting_model(
            &ModelSource::Scratch,
            competition,
            constraints,
            &metadata,
            &hub,
            &Device::Cpu,
        )
        .await
        .unwrap();
        assert_eq!(*model.config(), constraints.model);
    }

    #[tokio::test]
    async fn local_dir_with_wrong_architecture_is_rejected() {
        let (constraints, competition) = s1();
        let tmp = tempfile::tempdir().unwrap();
        let other = LmConfig {
            vocab_size: 128,
            hidden_size: 16,
            max_position_embeddings: 32,
        };
        let ckpt = checkpoint_in(tmp.path(), other);

        let metadata = InMemoryMetadataStore::default();
        let hub = LocalArtifactHub::new("/nonexistent");
        let err = load_starting_model(
            &ModelSource::LocalDir(ckpt),
            competition,
            constraints,
            &metadata,
            &hub,
            &Device::Cpu,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Checkpoint(CheckpointError::ArchitectureMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn best_on_network_downloads_and_loads() {
        let (constraints, competition) = s1();
        let tmp = tempfile::tempdir().unwrap();
        let ckpt = checkpoint_in(&tmp.path().join("ckpts"), constraints.model);

        let hub_root = tmp.path().join("hub");
        let hub = LocalArtifactHub::new(&hub_root);
        let published = hub
            .upload(
                "org/best",
                &[ckpt.join(WEIGHTS_FILE), ckpt.join(CONFIG_FILE)],
            )
            .await
            .unwrap();

        let metadata = InMemoryMetadataStore::default();
        metadata.set_best(competition, published);

        let model = load_starting_model(
            &ModelSource::BestOnNetwork,
            competition,
            constraints,
            &metadata,
            &hub,
            &Device::Cpu,
        )
        .await
        .unwrap();
        assert_eq!(*model.config(), constraints.model);
    }

    #[tokio::test]
    async fn missing_best_entry_fails_the_bootstrap() {
        let (constraints, competition) = s1();
        let metadata = InMemoryMetadataStore::default();
        let hub = LocalArtifactHub::new("/nonexistent");
        let err = load_starting_model(
            &ModelSource::BestOnNetwork,
            competition,
            constraints,
            &metadata,
            &hub,
            &Device::Cpu,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Fetch(RegistryError::NoBestEntry(_))
        ));
    }

    #[tokio::test]
    async fn incomplete_artifact_fails_the_bootstrap() {
        let (constraints, competition) = s1();
        let tmp = tempfile::tempdir().unwrap();
        let ckpt = checkpoint_in(&tmp.path().join("ckpts"), constraints.model);

        let hub = LocalArtifactHub::new(tmp.path().join("hub"));
        // forget the config file
        let published = hub
            .upload("org/partial", &[ckpt.join(WEIGHTS_FILE)])
            .await
            .unwrap();
        let metadata = InMemoryMetadataStore::default();
        metadata.set_best(competition, published);

        let err = load_starting_model(
            &ModelSource::BestOnNetwork,
            competition,
            constraints,
            &metadata,
            &hub,
            &Device::Cpu,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Fetch(RegistryError::ArtifactIncomplete { .. })
        ));
    }

    #[tokio::test]
    async fn weights_file_loads_with_declared_architecture() {
        let (constraints, competition) = s1();
        let tmp = tempfile::tempdir().unwrap();
        let ckpt = checkpoint_in(tmp.path(), constraints.model);

        let metadata = InMemoryMetadataStore::default();
        let hub = LocalArtifactHub::new("/nonexistent");
        let model = load_starting_model(
            &ModelSource::LocalFile(ckpt.join(WEIGHTS_FILE)),
            competition,
            constraints,
            &metadata,
            &hub,
            &Device::Cpu,
        )
        .await
        .unwrap();
        assert_eq!(*model.config(), constraints.model);
    }
}
