use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use crucible_core::CompetitionId;

use crate::types::{MinerIdentity, ModelRef};
use crate::{ArtifactHub, MetadataStore, NetworkMembership, RegistryError};

/// In-memory registry for tests. `fail_publish` flips every publish into an
/// error, to exercise the caller's failure path.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    best: Mutex<HashMap<CompetitionId, ModelRef>>,
    by_uid: Mutex<HashMap<u32, ModelRef>>,
    published: Mutex<Vec<(MinerIdentity, CompetitionId, ModelRef)>>,
    uids: Mutex<HashMap<String, u32>>,
    fail_publish: AtomicBool,
}

impl InMemoryMetadataStore {
    pub fn set_best(&self, competition: CompetitionId, model: ModelRef) {
        self.best.lock().unwrap().insert(competition, model);
    }

    pub fn set_participant(&self, uid: u32, hotkey: &str, model: Option<ModelRef>) {
        self.uids.lock().unwrap().insert(hotkey.to_string(), uid);
        if let Some(model) = model {
            self.by_uid.lock().unwrap().insert(uid, model);
        }
    }

    pub fn fail_next_publishes(&self) {
        self.fail_publish.store(true, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(MinerIdentity, CompetitionId, ModelRef)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get_best(&self, competition: CompetitionId) -> Result<ModelRef, RegistryError> {
        self.best
            .lock()
            .unwrap()
            .get(&competition)
            .cloned()
            .ok_or(RegistryError::NoBestEntry(competition))
    }

    async fn get_for_participant(&self, uid: u32) -> Result<ModelRef, RegistryError> {
        self.by_uid
            .lock()
            .unwrap()
            .get(&uid)
            .cloned()
            .ok_or(RegistryError::NoParticipantEntry(uid))
    }

    async fn publish(
        &self,
        artifact: &ModelRef,
        competition: CompetitionId,
        identity: &MinerIdentity,
    ) -> Result<(), RegistryError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(RegistryError::PublishRejected("scripted failure".into()));
        }
        self.published
            .lock()
            .unwrap()
            .push((identity.clone(), competition, artifact.clone()));
        Ok(())
    }
}

impl NetworkMembership for InMemoryMetadataStore {
    fn assert_registered(&self, identity: &MinerIdentity) -> Result<u32, RegistryError> {
        self.uids
            .lock()
            .unwrap()
            .get(&identity.hotkey)
            .copied()
            .ok_or_else(|| RegistryError::NotRegistered(identity.hotkey.clone()))
    }
}

/// Artifact hub backed by a plain directory, one subdirectory per repo id.
/// Stands in for the real hub in tests and fully offline setups.
pub struct LocalArtifactHub {
    root: PathBuf,
}

impl LocalArtifactHub {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn repo_dir(&self, repo_id: &str) -> PathBuf {
        // repo ids look like "org/name", keep the slash as a subdirectory
        self.root.join(repo_id)
    }
}

#[async_trait]
impl ArtifactHub for LocalArtifactHub {
    async fn download(&self, model: &ModelRef) -> Result<Vec<PathBuf>, RegistryError> {
        let dir = self.repo_dir(&model.repo_id);
        if !dir.is_dir() {
            return Err(RegistryError::ArtifactIncomplete {
                repo: model.repo_id.clone(),
                file: "*".to_string(),
            });
        }
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn upload(&self, repo_id: &str, files: &[PathBuf]) -> Result<ModelRef, RegistryError> {
        let dir = self.repo_dir(repo_id);
        tokio::fs::create_dir_all(&dir).await?;
        for path in files {
            let name = path
                .file_name()
                .ok_or_else(|| RegistryError::InvalidUploadFile(path.clone()))?;
            tokio::fs::copy(path, dir.join(name)).await?;
        }
        Ok(ModelRef::new(repo_id))
    }
}
