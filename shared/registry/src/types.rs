use std::fmt;

use crucible_core::CompetitionId;
use serde::{Deserialize, Serialize};

/// Pointer to a model artifact on the hub. `revision` pins a specific
/// commit; `None` means whatever the repo's default branch points at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub repo_id: String,
    pub revision: Option<String>,
}

impl ModelRef {
    pub fn new(repo_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            revision: None,
        }
    }

    pub fn with_revision(repo_id: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            revision: Some(revision.into()),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.revision {
            Some(rev) => write!(f, "{}@{}", self.repo_id, rev),
            None => write!(f, "{}", self.repo_id),
        }
    }
}

/// Cryptographic identity of a participant, opaque to this crate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MinerIdentity {
    pub hotkey: String,
}

impl MinerIdentity {
    pub fn new(hotkey: impl Into<String>) -> Self {
        Self {
            hotkey: hotkey.into(),
        }
    }
}

impl fmt::Display for MinerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hotkey)
    }
}

/// One registry record: which artifact an identity entered into which
/// competition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedEntry {
    pub competition: CompetitionId,
    pub model: ModelRef,
}
