use std::path::{Path, PathBuf};

use async_trait::async_trait;
use crucible_core::CompetitionId;
use thiserror::Error;

mod fs_store;
mod hub;
mod mock;
mod types;

pub use fs_store::FsRegistry;
pub use hub::HfArtifactHub;
pub use mock::{InMemoryMetadataStore, LocalArtifactHub};
pub use types::{MinerIdentity, ModelRef, PublishedEntry};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("no published model for competition {0}")]
    NoBestEntry(CompetitionId),

    #[error("no published model for participant uid {0}")]
    NoParticipantEntry(u32),

    #[error("artifact {repo} is missing required file {file}")]
    ArtifactIncomplete { repo: String, file: String },

    #[error("identity {0} is not registered on the network")]
    NotRegistered(String),

    #[error("hub api error: {0}")]
    HubApi(#[from] hf_hub::api::tokio::ApiError),

    #[error("hub request failed: {0}")]
    HubHttp(#[from] reqwest::Error),

    #[error("hub rejected commit to {repo} with status {status}: {message}")]
    CommitRejected {
        repo: String,
        status: u16,
        message: String,
    },

    #[error("cannot upload {0}, not a regular file")]
    InvalidUploadFile(PathBuf),

    #[error("registry io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry index is corrupt: {0}")]
    CorruptIndex(#[from] serde_json::Error),

    #[error("publish rejected: {0}")]
    PublishRejected(String),
}

/// The chain-indexed side of the registry: who published what, and which
/// entry currently leads each competition.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_best(&self, competition: CompetitionId) -> Result<ModelRef, RegistryError>;

    async fn get_for_participant(&self, uid: u32) -> Result<ModelRef, RegistryError>;

    async fn publish(
        &self,
        artifact: &ModelRef,
        competition: CompetitionId,
        identity: &MinerIdentity,
    ) -> Result<(), RegistryError>;
}

/// Bulk weight storage referenced by registry entries.
#[async_trait]
pub trait ArtifactHub: Send + Sync {
    /// Fetches all model files of a published artifact, returning local paths.
    async fn download(&self, model: &ModelRef) -> Result<Vec<PathBuf>, RegistryError>;

    /// Uploads the given files as a new revision of `repo_id`.
    async fn upload(&self, repo_id: &str, files: &[PathBuf]) -> Result<ModelRef, RegistryError>;
}

/// Network membership checks, done once at startup for online runs.
pub trait NetworkMembership: Send + Sync {
    /// Returns the participant uid, or an error if the identity is unknown.
    fn assert_registered(&self, identity: &MinerIdentity) -> Result<u32, RegistryError>;
}

/// Picks the named file out of a downloaded artifact's file list.
pub fn find_artifact_file<'a>(
    files: &'a [PathBuf],
    name: &str,
    repo: &str,
) -> Result<&'a Path, RegistryError> {
    files
        .iter()
        .find(|p| p.file_name().map(|f| f == name).unwrap_or(false))
        .map(PathBuf::as_path)
        .ok_or_else(|| RegistryError::ArtifactIncomplete {
            repo: repo.to_string(),
            file: name.to_string(),
        })
}
