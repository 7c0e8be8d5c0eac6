use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use crucible_core::CompetitionId;
use tracing::info;

use crate::types::{MinerIdentity, ModelRef, PublishedEntry};
use crate::{MetadataStore, NetworkMembership, RegistryError};

/// Directory-backed registry index, the shape used by local testnets and
/// integration setups where no chain is running.
///
/// Layout under the root:
///   participants.json        hotkey -> uid map, maintained by the operator
///   best/<competition>.json  current leader, maintained by validators
///   entries/<hotkey>.json    latest entry published by each participant
pub struct FsRegistry {
    root: PathBuf,
}

impl FsRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn participants(&self) -> Result<HashMap<String, u32>, RegistryError> {
        let path = self.root.join("participants.json");
        if !path.is_file() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    fn entry_path(&self, hotkey: &str) -> PathBuf {
        self.root.join("entries").join(format!("{hotkey}.json"))
    }

    fn read_entry(&self, path: &Path) -> Result<PublishedEntry, RegistryError> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

#[async_trait]
impl MetadataStore for FsRegistry {
    async fn get_best(&self, competition: CompetitionId) -> Result<ModelRef, RegistryError> {
        let path = self.root.join("best").join(format!("{competition}.json"));
        if !path.is_file() {
            return Err(RegistryError::NoBestEntry(competition));
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }

    async fn get_for_participant(&self, uid: u32) -> Result<ModelRef, RegistryError> {
        let participants = self.participants()?;
        let hotkey = participants
            .iter()
            .find(|(_, &u)| u == uid)
            .map(|(hotkey, _)| hotkey.clone())
            .ok_or(RegistryError::NoParticipantEntry(uid))?;
        let path = self.entry_path(&hotkey);
        if !path.is_file() {
            return Err(RegistryError::NoParticipantEntry(uid));
        }
        Ok(self.read_entry(&path)?.model)
    }

    async fn publish(
        &self,
        artifact: &ModelRef,
        competition: CompetitionId,
        identity: &MinerIdentity,
    ) -> Result<(), RegistryError> {
        if !self.participants()?.contains_key(&identity.hotkey) {
            return Err(RegistryError::NotRegistered(identity.hotkey.clone()));
        }
        let entry = PublishedEntry {
            competition,
            model: artifact.clone(),
        };
        let path = self.entry_path(&identity.hotkey);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(&entry)?)?;
        info!(hotkey = %identity, %competition, model = %artifact, "recorded registry entry");
        Ok(())
    }
}

impl NetworkMembership for FsRegistry {
    fn assert_registered(&self, identity: &MinerIdentity) -> Result<u32, RegistryError> {
        self.participants()?
            .get(&identity.hotkey)
            .copied()
            .ok_or_else(|| RegistryError::NotRegistered(identity.hotkey.clone()))
    }
}
