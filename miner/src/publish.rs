use crucible_core::{CompetitionId, RunIdentity, TrainingState};
use crucible_modeling::{
    load_checkpoint_dir, CheckpointError, CheckpointStore, Device, CONFIG_FILE, WEIGHTS_FILE,
};
use crucible_registry::{ArtifactHub, MetadataStore, MinerIdentity, ModelRef, RegistryError};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("no hub repo configured; pass --hub-repo to publish")]
    MissingHubRepo,

    #[error("no identity available for an online publish")]
    MissingIdentity,

    #[error("best checkpoint failed to reload before upload: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("artifact upload failed: {0}")]
    Upload(#[source] RegistryError),

    #[error("registry publish failed: {0}")]
    Record(#[source] RegistryError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// Offline run; nothing leaves the machine regardless of quality.
    SkippedOffline,
    /// Online, but the model never got good enough to share.
    SkippedThreshold { best_avg_loss: f64, threshold: f64 },
    Published(ModelRef),
}

pub struct PublishGate {
    pub offline: bool,
    pub threshold: f64,
    pub hub_repo: Option<String>,
    pub competition: CompetitionId,
}

impl PublishGate {
    /// Decides whether the run's best checkpoint ships, and ships it.
    ///
    /// The checkpoint is reloaded from disk before upload so the artifact
    /// published is exactly the best snapshot, not whatever the live weights
    /// drifted to in later epochs.
    pub async fn evaluate(
        &self,
        state: &TrainingState,
        checkpoints: &CheckpointStore,
        run_id: &RunIdentity,
        identity: Option<&MinerIdentity>,
        metadata: &dyn MetadataStore,
        hub: &dyn ArtifactHub,
        device: &Device,
    ) -> Result<PublishOutcome, PublishError> {
        if self.offline {
            info!("offline run, skipping publish");
            return Ok(PublishOutcome::SkippedOffline);
        }
        if !(state.best_avg_loss < self.threshold) {
            info!(
                best = state.best_avg_loss,
                threshold = self.threshold,
                "best average loss not under the publish threshold, keeping model local"
            );
            return Ok(PublishOutcome::SkippedThreshold {
                best_avg_loss: state.best_avg_loss,
                threshold: self.threshold,
            });
        }

        let repo = self.hub_repo.clone().ok_or(PublishError::MissingHubRepo)?;
        let identity = identity.ok_or(PublishError::MissingIdentity)?;

        let dir = checkpoints.run_dir(run_id);
        let (_model, meta) = load_checkpoint_dir(&dir, device)?;
        debug!(
            epoch = meta.epoch_step,
            avg_loss = ?meta.avg_loss,
            "reloaded best checkpoint for upload"
        );

        let files = [dir.join(WEIGHTS_FILE), dir.join(CONFIG_FILE)];
        let model_ref = hub
            .upload(&repo, &files)
            .await
            .map_err(PublishError::Upload)?;
        metadata
            .publish(&model_ref, self.competition, identity)
            .await
            .map_err(PublishError::Record)?;
        info!(model = %model_ref, competition = %self.competition, "published model to the registry");
        Ok(PublishOutcome::Published(model_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::{lookup_constraints, TokenizerKind};
    use crucible_modeling::{BaselineLm, CheckpointMeta};
    use crucible_registry::{InMemoryMetadataStore, LocalArtifactHub};

    fn state_with_best(best: f64) -> TrainingState {
        TrainingState {
            epoch_step: 3,
            global_step: 30,
            accumulated_optimizer_steps: 6,
            best_avg_loss: best,
        }
    }

    fn gate(offline: bool, threshold: f64) -> PublishGate {
        PublishGate {
            offline,
            threshold,
            hub_repo: Some("org/entry".to_string()),
            competition: CompetitionId::S1,
        }
    }

    struct World {
        _dir: tempfile::TempDir,
        checkpoints: CheckpointStore,
        run_id: RunIdentity,
        metadata: InMemoryMetadataStore,
        hub: LocalArtifactHub,
    }

    fn world_with_checkpoint() -> World {
        let dir = tempfile::tempdir().unwrap();
        let checkpoints = CheckpointStore::new(dir.path().join("ckpts"));
        let run_id = RunIdentity::from_raw("test-run");

        let config = lookup_constraints(CompetitionId::S1).unwrap().model;
        let model = BaselineLm::from_scratch(config, &Device::Cpu).unwrap();
        checkpoints
            .save(
                &model,
                &CheckpointMeta {
                    competition: CompetitionId::S1,
                    config,
                    tokenizer: TokenizerKind::NeoX,
                    run_id: "test-run".to_string(),
                    epoch_step: 2,
                    avg_loss: Some(1.5),
                },
            )
            .unwrap();

        let metadata = InMemoryMetadataStore::default();
        metadata.set_participant(7, "miner-a", None);
        let hub = LocalArtifactHub::new(dir.path().join("hub"));
        World {
            _dir: dir,
            checkpoints,
            run_id,
            metadata,
            hub,
        }
    }

    #[tokio::test]
    async fn offline_always_skips_even_when_excellent() {
        let world = world_with_checkpoint();
        let outcome = gate(true, 2.0)
            .evaluate(
                &state_with_best(1.5),
                &world.checkpoints,
                &world.run_id,
                Some(&MinerIdentity::new("miner-a")),
                &world.metadata,
                &world.hub,
                &Device::Cpu,
            )
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::SkippedOffline);
        assert!(world.metadata.published().is_empty());
    }

    #[tokio::test]
    async fn below_threshold_publishes() {
        let world = world_with_checkpoint();
        let outcome = gate(false, 2.0)
            .evaluate(
                &state_with_best(1.5),
                &world.checkpoints,
                &world.run_id,
                Some(&MinerIdentity::new("miner-a")),
                &world.metadata,
                &world.hub,
                &Device::Cpu,
            )
            .await
            .unwrap();
        let PublishOutcome::Published(model_ref) = outcome else {
            panic!("expected a publish");
        };
        assert_eq!(model_ref.repo_id, "org/entry");

        let published = world.metadata.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, MinerIdentity::new("miner-a"));
        assert_eq!(published[0].1, CompetitionId::S1);

        // the uploaded artifact must itself be loadable
        let files = world.hub.download(&model_ref).await.unwrap();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn at_or_above_threshold_skips() {
        let world = world_with_checkpoint();
        for best in [2.0, 2.5] {
            let outcome = gate(false, 2.0)
                .evaluate(
                    &state_with_best(best),
                    &world.checkpoints,
                    &world.run_id,
                    Some(&MinerIdentity::new("miner-a")),
                    &world.metadata,
                    &world.hub,
                    &Device::Cpu,
                )
                .await
                .unwrap();
            assert!(matches!(outcome, PublishOutcome::SkippedThreshold { .. }));
        }
        assert!(world.metadata.published().is_empty());
    }

    #[tokio::test]
    async fn zero_threshold_never_publishes() {
        let world = world_with_checkpoint();
        let outcome = gate(false, 0.0)
            .evaluate(
                &state_with_best(0.0001),
                &world.checkpoints,
                &world.run_id,
                Some(&MinerIdentity::new("miner-a")),
                &world.metadata,
                &world.hub,
                &Device::Cpu,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, PublishOutcome::SkippedThreshold { .. }));
    }

    #[tokio::test]
    async fn registry_rejection_surfaces_as_record_error() {
        let world = world_with_checkpoint();
        world.metadata.fail_next_publishes();
        let err = gate(false, 2.0)
            .evaluate(
                &state_with_best(1.5),
                &world.checkpoints,
                &world.run_id,
                Some(&MinerIdentity::new("miner-a")),
                &world.metadata,
                &world.hub,
                &Device::Cpu,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Record(_)));
    }

    #[tokio::test]
    async fn missing_checkpoint_fails_the_publish() {
        let world = world_with_checkpoint();
        let err = gate(false, 2.0)
            .evaluate(
                &state_with_best(1.5),
                &world.checkpoints,
                &RunIdentity::from_raw("other-run"),
                Some(&MinerIdentity::new("miner-a")),
                &world.metadata,
                &world.hub,
                &Device::Cpu,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PublishError::Checkpoint(CheckpointError::Missing(_))
        ));
    }
}
