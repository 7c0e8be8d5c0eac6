use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hf_hub::{
    api::{
        tokio::{Api, ApiBuilder},
        Siblings,
    },
    Cache, Repo, RepoType,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};

use crate::types::ModelRef;
use crate::{ArtifactHub, RegistryError};

const MODEL_EXTENSIONS: [&str; 2] = [".safetensors", ".json"];
const MAX_CONCURRENT_DOWNLOADS: usize = 8;
const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Hugging Face backed artifact storage. Downloads go through the shared
/// hub cache, uploads commit a new revision via the hub's NDJSON commit
/// endpoint.
pub struct HfArtifactHub {
    token: Option<String>,
    cache_dir: Option<PathBuf>,
}

impl HfArtifactHub {
    pub fn new(token: Option<String>, cache_dir: Option<PathBuf>) -> Self {
        Self { token, cache_dir }
    }

    fn cache(&self) -> Cache {
        match &self.cache_dir {
            Some(dir) => Cache::new(dir.clone()),
            None => Cache::default(),
        }
    }

    fn token(&self) -> Option<String> {
        self.token.clone().or(self.cache().token())
    }

    fn api(&self) -> Result<Api, RegistryError> {
        let cache = self.cache();
        Ok(ApiBuilder::new()
            .with_cache_dir(cache.path().clone())
            .with_token(self.token())
            .with_progress(false)
            .build()?)
    }

    fn endpoint() -> String {
        std::env::var("HF_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string())
    }
}

fn is_model_file(sibling: &Siblings) -> bool {
    MODEL_EXTENSIONS
        .iter()
        .any(|ext| sibling.rfilename.ends_with(ext))
}

fn require_model_files(siblings: Vec<Siblings>, repo: &str) -> Result<Vec<Siblings>, RegistryError> {
    if siblings.is_empty() {
        return Err(RegistryError::ArtifactIncomplete {
            repo: repo.to_string(),
            file: "*.safetensors".to_string(),
        });
    }
    Ok(siblings)
}

#[derive(Deserialize)]
struct CommitResponse {
    #[serde(rename = "commitOid")]
    commit_oid: String,
}

#[async_trait]
impl ArtifactHub for HfArtifactHub {
    async fn download(&self, model: &ModelRef) -> Result<Vec<PathBuf>, RegistryError> {
        let repo = match &model.revision {
            Some(revision) => Repo::with_revision(
                model.repo_id.clone(),
                RepoType::Model,
                revision.clone(),
            ),
            None => Repo::model(model.repo_id.clone()),
        };
        let api = self.api()?.repo(repo);
        let siblings: Vec<_> = api
            .info()
            .await?
            .siblings
            .into_iter()
            .filter(is_model_file)
            .collect();
        let siblings = require_model_files(siblings, &model.repo_id)?;

        let mut paths = Vec::with_capacity(siblings.len());
        for chunk in siblings.chunks(MAX_CONCURRENT_DOWNLOADS) {
            let futures: Vec<_> = chunk
                .iter()
                .map(|sibling| async {
                    let start = Instant::now();
                    debug!(filename = sibling.rfilename, "starting file download from hub");
                    let res = api.get(&sibling.rfilename).await;
                    if res.is_ok() {
                        info!(
                            filename = sibling.rfilename,
                            duration_secs = start.elapsed().as_secs_f32(),
                            "finished downloading file from hub"
                        );
                    }
                    res
                })
                .collect();
            for future in futures {
                paths.push(future.await?);
            }
        }
        Ok(paths)
    }

    async fn upload(&self, repo_id: &str, files: &[PathBuf]) -> Result<ModelRef, RegistryError> {
        let mut lines = vec![json!({
            "key": "header",
            "value": { "summary": "model checkpoint" },
        })
        .to_string()];
        for path in files {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| RegistryError::InvalidUploadFile(path.clone()))?;
            let content = tokio::fs::read(path).await?;
            lines.push(
                json!({
                    "key": "file",
                    "value": {
                        "path": name,
                        "content": BASE64.encode(content),
                        "encoding": "base64",
                    },
                })
                .to_string(),
            );
        }

        let url = format!("{}/api/models/{repo_id}/commit/main", Self::endpoint());
        let mut request = reqwest::Client::new()
            .post(&url)
            .header("content-type", "application/x-ndjson")
            .body(lines.join("\n"));
        if let Some(token) = self.token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            error!(repo = repo_id, status, %message, "hub rejected artifact commit");
            return Err(RegistryError::CommitRejected {
                repo: repo_id.to_string(),
                status,
                message,
            });
        }
        let commit: CommitResponse = response.json().await?;
        info!(repo = repo_id, oid = %commit.commit_oid, "uploaded artifact files to hub");
        Ok(ModelRef::with_revision(repo_id, commit.commit_oid))
    }
}
